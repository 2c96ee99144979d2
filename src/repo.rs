use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use nix::fcntl::{Flock, FlockArg};

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, IoResultExt, Result};
use crate::hash::Oid;
use crate::object::{LooseObject, Object, ObjectStore, Payload};
use crate::refs;
use crate::types::{Commit, CommitInfo, ObjectKind, Tree, TreeEntry};

/// a repository: loose object store plus refs under one root
///
/// one read-write lock guards object and ref access. reads (`get`, `exists`,
/// ref reads) share it, writes (`store`, ref writes) hold it exclusively for
/// the one object or ref they touch. see [`crate::Transaction`] for what that
/// does and does not promise across a whole transaction.
pub struct Repository {
    path: PathBuf,
    config: Config,
    store: ObjectStore,
    lock: RwLock<()>,
    serial: Mutex<()>,
}

impl Repository {
    /// initialize a new repository at the given path
    pub fn init(path: &Path) -> Result<Self> {
        if path.join("objects").exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }

        // create directory structure
        fs::create_dir_all(path.join("objects")).with_path(path)?;
        fs::create_dir_all(path.join("refs/heads")).with_path(path)?;

        let config_path = path.join(CONFIG_FILE);
        let config = Config::load_or_default(&config_path)?;
        if !config_path.exists() {
            config.save(&config_path)?;
        }

        tracing::info!(path = %path.display(), "initialized repository");
        Ok(Self::with_config(path.to_path_buf(), config))
    }

    /// open an existing repository
    ///
    /// descends into `path/.git` when present, so an ordinary git work tree
    /// can be opened directly.
    pub fn open(path: &Path) -> Result<Self> {
        let dot_git = path.join(".git");
        let root = if dot_git.is_dir() {
            dot_git
        } else {
            path.to_path_buf()
        };

        if !root.join("objects").is_dir() {
            return Err(Error::NoRepo(path.to_path_buf()));
        }

        let config = Config::load_or_default(&root.join(CONFIG_FILE))?;
        tracing::debug!(path = %root.display(), "opened repository");
        Ok(Self::with_config(root, config))
    }

    fn with_config(path: PathBuf, config: Config) -> Self {
        let store = ObjectStore::with_compression(&path, config.compression());
        Self {
            path,
            config,
            store,
            lock: RwLock::new(()),
            serial: Mutex::new(()),
        }
    }

    /// repository root path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// repository configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    /// path to quire.toml
    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    /// path to objects directory
    pub fn objects_path(&self) -> PathBuf {
        self.store.objects_path().to_path_buf()
    }

    /// path to refs directory
    pub fn refs_path(&self) -> PathBuf {
        self.path.join("refs/heads")
    }

    /// path to lock file
    pub fn lock_path(&self) -> PathBuf {
        self.path.join("quire.lock")
    }

    /// the underlying object store, without locking
    pub fn object_store(&self) -> &ObjectStore {
        &self.store
    }

    pub(crate) fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        // guards no data, so poisoning is ignored
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn serial_guard(&self) -> MutexGuard<'_, ()> {
        self.serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// open an object by id
    pub fn get(&self, oid: &Oid) -> Result<LooseObject> {
        let _guard = self.read_guard();
        self.store.get(oid)
    }

    /// check if an object exists
    pub fn exists(&self, oid: &Oid) -> Result<bool> {
        let _guard = self.read_guard();
        self.store.exists(oid)
    }

    /// store a payload as an object of the given kind
    pub fn store(&self, kind: ObjectKind, payload: &[u8]) -> Result<Oid> {
        let _guard = self.write_guard();
        self.store.store(kind, payload)
    }

    pub fn store_blob(&self, payload: &[u8]) -> Result<Oid> {
        self.store(ObjectKind::Blob, payload)
    }

    pub fn store_tree(&self, tree: &Tree) -> Result<Oid> {
        self.store(ObjectKind::Tree, &tree.to_bytes())
    }

    pub fn store_commit(&self, commit: &Commit) -> Result<Oid> {
        self.store(ObjectKind::Commit, &commit.to_bytes())
    }

    /// oid a ref points at
    pub fn ref_oid(&self, ref_name: &str) -> Result<Oid> {
        refs::read_ref(self, ref_name)
    }

    /// resolve a ref to its commit
    pub fn ref_commit(&self, ref_name: &str) -> Result<(Commit, Oid)> {
        let oid = self.ref_oid(ref_name)?;
        let commit = self.commit(&oid)?;
        Ok((commit, oid))
    }

    /// load a commit, failing if the object is another kind
    pub fn commit(&self, oid: &Oid) -> Result<Commit> {
        match self.get(oid)? {
            Object::Commit(payload) => Commit::from_bytes(&payload.into_bytes()?),
            _ => Err(Error::NotACommit(*oid)),
        }
    }

    /// load a tree, failing if the object is another kind
    pub fn tree(&self, oid: &Oid) -> Result<Tree> {
        match self.get(oid)? {
            Object::Tree(payload) => Tree::from_bytes(&payload.into_bytes()?),
            _ => Err(Error::NotATree(*oid)),
        }
    }

    /// open a blob for streaming, failing if the object is another kind
    pub fn blob(&self, oid: &Oid) -> Result<Payload<BufReader<File>>> {
        match self.get(oid)? {
            Object::Blob(payload) => Ok(payload),
            _ => Err(Error::NotABlob(*oid)),
        }
    }

    /// read a whole blob into memory
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.blob(oid)?.into_bytes()
    }

    /// walk a `/` separated path down from `tree`
    pub fn lookup_in_tree(&self, tree: &Tree, path: &str) -> Result<TreeEntry> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (last, dirs) = segments
            .split_last()
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;

        let mut subtree: Option<Tree> = None;
        for segment in dirs {
            let current = subtree.as_ref().unwrap_or(tree);
            let entry = current
                .get(segment)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            // gitlinks and files are never walked into
            if !entry.is_directory() {
                return Err(Error::NotATree(entry.oid));
            }
            let next = self.tree(&entry.oid)?;
            subtree = Some(next);
        }

        subtree
            .as_ref()
            .unwrap_or(tree)
            .get(last)
            .cloned()
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    /// find the entry at `path` in the tree of the ref's commit
    pub fn lookup_entry_by_path(&self, ref_name: &str, path: &str) -> Result<TreeEntry> {
        let (commit, _) = self.ref_commit(ref_name)?;
        let root = self.tree(&commit.tree)?;
        self.lookup_in_tree(&root, path)
    }

    pub fn lookup_blob_by_path(&self, ref_name: &str, path: &str) -> Result<Vec<u8>> {
        let entry = self.lookup_entry_by_path(ref_name, path)?;
        self.read_blob(&entry.oid)
    }

    pub fn lookup_tree_by_path(&self, ref_name: &str, path: &str) -> Result<Tree> {
        let entry = self.lookup_entry_by_path(ref_name, path)?;
        self.tree(&entry.oid)
    }

    /// read the blob named `name` directly inside `tree`
    pub fn read_blob_from_tree(&self, tree: &Tree, name: &str) -> Result<Vec<u8>> {
        let entry = tree
            .get(name)
            .ok_or_else(|| Error::PathNotFound(name.to_string()))?;
        self.read_blob(&entry.oid)
    }

    /// create a ref pointing at a new root commit with an empty tree
    pub fn init_ref(&self, ref_name: &str, info: CommitInfo) -> Result<Oid> {
        refs::validate_ref_name(ref_name)?;
        if refs::ref_exists(self, ref_name) {
            return Err(Error::RefExists(ref_name.to_string()));
        }

        let tree = self.store_tree(&Tree::empty())?;
        let commit = self.store_commit(&info.into_commit(tree, vec![]))?;

        let _guard = self.write_guard();
        refs::write_ref_unlocked(self, ref_name, &commit)?;
        Ok(commit)
    }

    /// acquire exclusive file lock on the repository, waiting for it
    ///
    /// the lock is advisory and shared with other processes using quire.
    pub fn lock(&self) -> Result<RepoLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|_| Error::LockContention)?;

        Ok(RepoLock { flock })
    }

    /// try to acquire exclusive lock, returning None if already locked
    pub fn try_lock(&self) -> Result<Option<RepoLock>> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(RepoLock { flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }
}

/// guard that holds repository lock until dropped
pub struct RepoLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}
// lock is released automatically when Flock is dropped

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileMode, Signature};
    use std::io::Read;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("test-repo");
        let repo = Repository::init(&repo_path).unwrap();
        (dir, repo)
    }

    fn info() -> CommitInfo {
        CommitInfo::by(Signature::new("Tester", "tester@example.org", 1).with_timezone("+0000"), "root\n")
    }

    /// ref "master" -> commit -> { README, docs/ { guide.md, img/ { logo } } }
    fn populated_repo() -> (tempfile::TempDir, Repository) {
        let (dir, repo) = test_repo();

        let readme = repo.store_blob(b"readme").unwrap();
        let guide = repo.store_blob(b"guide").unwrap();
        let logo = repo.store_blob(b"logo").unwrap();

        let img = repo
            .store_tree(&Tree::new(vec![TreeEntry::new("logo", FileMode::Regular, logo)]).unwrap())
            .unwrap();
        let docs = repo
            .store_tree(
                &Tree::new(vec![
                    TreeEntry::new("guide.md", FileMode::Regular, guide),
                    TreeEntry::new("img", FileMode::Directory, img),
                ])
                .unwrap(),
            )
            .unwrap();
        let root = repo
            .store_tree(
                &Tree::new(vec![
                    TreeEntry::new("README", FileMode::Regular, readme),
                    TreeEntry::new("docs", FileMode::Directory, docs),
                ])
                .unwrap(),
            )
            .unwrap();

        let commit = repo.store_commit(&info().into_commit(root, vec![])).unwrap();
        refs::write_ref(&repo, "master", &commit).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_repo_init() {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("test-repo");

        let repo = Repository::init(&repo_path).unwrap();

        assert!(repo_path.join("objects").is_dir());
        assert!(repo_path.join("refs/heads").is_dir());
        assert!(repo_path.join("quire.toml").is_file());
        assert_eq!(repo.config().core.default_ref, "master");
    }

    #[test]
    fn test_repo_init_already_exists() {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("test-repo");

        Repository::init(&repo_path).unwrap();
        let result = Repository::init(&repo_path);

        assert!(matches!(result, Err(Error::RepoExists(_))));
    }

    #[test]
    fn test_repo_open() {
        let (_dir, repo) = test_repo();
        let reopened = Repository::open(repo.path()).unwrap();
        assert_eq!(reopened.path(), repo.path());
    }

    #[test]
    fn test_repo_open_descends_into_dot_git() {
        let dir = tempdir().unwrap();
        let work_tree = dir.path().join("work");
        fs::create_dir_all(work_tree.join(".git/objects")).unwrap();
        fs::create_dir_all(work_tree.join(".git/refs/heads")).unwrap();

        let repo = Repository::open(&work_tree).unwrap();
        assert_eq!(repo.path(), work_tree.join(".git"));
        assert_eq!(repo.refs_path(), work_tree.join(".git/refs/heads"));
        // no config file in a plain git directory
        assert_eq!(repo.config(), &Config::default());
    }

    #[test]
    fn test_repo_open_not_found() {
        let dir = tempdir().unwrap();
        let result = Repository::open(&dir.path().join("nonexistent"));
        assert!(matches!(result, Err(Error::NoRepo(_))));
    }

    #[test]
    fn test_config_compression_applies() {
        let (_dir, repo) = test_repo();
        let mut config = repo.config().clone();
        config.core.compression = 0;
        config.save(&repo.config_path()).unwrap();

        let repo = Repository::open(repo.path()).unwrap();
        let oid = repo.store_blob(&[b'x'; 1000]).unwrap();
        let raw = fs::read(repo.object_store().object_path(&oid)).unwrap();
        // stored, not deflated
        assert!(raw.len() > 1000);
        assert_eq!(repo.read_blob(&oid).unwrap(), vec![b'x'; 1000]);
    }

    #[test]
    fn test_typed_accessors() {
        let (_dir, repo) = populated_repo();
        let (commit, commit_oid) = repo.ref_commit("master").unwrap();
        assert!(commit.is_root());
        assert_eq!(repo.commit(&commit_oid).unwrap(), commit);

        let root = repo.tree(&commit.tree).unwrap();
        let readme = root.get("README").unwrap();

        assert!(matches!(repo.tree(&readme.oid), Err(Error::NotATree(_))));
        assert!(matches!(repo.blob(&commit.tree), Err(Error::NotABlob(_))));
        assert!(matches!(repo.commit(&readme.oid), Err(Error::NotACommit(_))));

        let mut content = String::new();
        repo.blob(&readme.oid).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "readme");
    }

    #[test]
    fn test_ref_not_a_commit() {
        let (_dir, repo) = test_repo();
        let blob = repo.store_blob(b"not a commit").unwrap();
        refs::write_ref(&repo, "broken", &blob).unwrap();

        assert!(matches!(repo.ref_commit("broken"), Err(Error::NotACommit(_))));
        assert!(matches!(repo.ref_commit("missing"), Err(Error::RefNotFound(_))));
    }

    #[test]
    fn test_lookup_entry_by_path() {
        let (_dir, repo) = populated_repo();

        let entry = repo.lookup_entry_by_path("master", "docs/img/logo").unwrap();
        assert_eq!(entry.name, "logo");
        assert_eq!(entry.mode, FileMode::Regular);

        let docs = repo.lookup_entry_by_path("master", "docs").unwrap();
        assert!(docs.is_directory());

        // leading and doubled slashes are tolerated
        assert_eq!(
            repo.lookup_entry_by_path("master", "/docs//guide.md").unwrap().name,
            "guide.md"
        );
    }

    #[test]
    fn test_lookup_missing_and_not_a_tree() {
        let (_dir, repo) = populated_repo();

        assert!(matches!(
            repo.lookup_entry_by_path("master", "docs/missing.md"),
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            repo.lookup_entry_by_path("master", "nowhere/guide.md"),
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            repo.lookup_entry_by_path("master", ""),
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            repo.lookup_entry_by_path("master", "README/child"),
            Err(Error::NotATree(_))
        ));
    }

    #[test]
    fn test_lookup_through_submodule() {
        let (_dir, repo) = test_repo();
        // a gitlink names a commit from another repository, absent here
        let foreign = Oid::from_hex("2222222222222222222222222222222222222222").unwrap();
        let root = repo
            .store_tree(&Tree::new(vec![TreeEntry::new("vendor", FileMode::Submodule, foreign)]).unwrap())
            .unwrap();
        let commit = repo.store_commit(&info().into_commit(root, vec![])).unwrap();
        refs::write_ref(&repo, "master", &commit).unwrap();

        match repo.lookup_entry_by_path("master", "vendor/lib.rs") {
            Err(Error::NotATree(oid)) => assert_eq!(oid, foreign),
            other => panic!("expected NotATree, got {:?}", other),
        }
        let vendor = repo.lookup_entry_by_path("master", "vendor").unwrap();
        assert_eq!(vendor.mode, FileMode::Submodule);
    }

    #[test]
    fn test_lookup_blob_and_tree_by_path() {
        let (_dir, repo) = populated_repo();

        assert_eq!(repo.lookup_blob_by_path("master", "docs/guide.md").unwrap(), b"guide");
        let img = repo.lookup_tree_by_path("master", "docs/img").unwrap();
        assert_eq!(img.len(), 1);
        assert_eq!(repo.read_blob_from_tree(&img, "logo").unwrap(), b"logo");
        assert!(matches!(
            repo.read_blob_from_tree(&img, "nope"),
            Err(Error::PathNotFound(_))
        ));
        assert!(matches!(
            repo.lookup_blob_by_path("master", "docs"),
            Err(Error::NotABlob(_))
        ));
    }

    #[test]
    fn test_init_ref() {
        let (_dir, repo) = test_repo();

        let oid = repo.init_ref("master", info()).unwrap();
        let (commit, head) = repo.ref_commit("master").unwrap();
        assert_eq!(head, oid);
        assert!(commit.is_root());
        assert!(repo.tree(&commit.tree).unwrap().is_empty());
        // well-known empty tree id
        assert_eq!(commit.tree.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");

        assert!(matches!(
            repo.init_ref("master", info()),
            Err(Error::RefExists(_))
        ));
    }

    #[test]
    fn test_concurrent_stores_and_reads() {
        let (_dir, repo) = test_repo();
        let repo = Arc::new(repo);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || {
                    let mut oids = Vec::new();
                    for j in 0..25 {
                        // every thread also writes the shared payload
                        let shared = repo.store_blob(b"shared").unwrap();
                        let own = repo.store_blob(format!("{}-{}", i, j).as_bytes()).unwrap();
                        assert_eq!(repo.read_blob(&shared).unwrap(), b"shared");
                        oids.push((own, format!("{}-{}", i, j)));
                    }
                    oids
                })
            })
            .collect();

        for handle in handles {
            for (oid, expected) in handle.join().unwrap() {
                assert_eq!(repo.read_blob(&oid).unwrap(), expected.as_bytes());
            }
        }
    }

    #[test]
    fn test_reads_do_not_block_each_other() {
        let (_dir, repo) = populated_repo();
        let readme = repo.lookup_entry_by_path("master", "README").unwrap().oid;

        // a reader that stays inside the lock for the whole test
        let held = repo.read_guard();
        let (tx, rx) = mpsc::channel();

        let repo = &repo;
        thread::scope(|s| {
            s.spawn(move || {
                let exists = repo.exists(&readme).unwrap();
                let content = repo.read_blob(&readme).unwrap();
                tx.send((exists, content)).unwrap();
            });

            let (exists, content) = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("reader blocked behind another reader");
            assert!(exists);
            assert_eq!(content, b"readme");
            drop(held);
        });
    }

    #[test]
    fn test_repo_lock() {
        let (_dir, repo) = test_repo();

        let lock = repo.lock().unwrap();

        // try to acquire again should fail
        assert!(repo.try_lock().unwrap().is_none());

        drop(lock);

        assert!(repo.try_lock().unwrap().is_some());
    }
}
