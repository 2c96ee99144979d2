use std::collections::BTreeMap;
use std::sync::MutexGuard;

use bstr::{BStr, BString, ByteSlice};

use crate::error::{Error, Result};
use crate::hash::Oid;
use crate::refs;
use crate::repo::{RepoLock, Repository};
use crate::types::{CommitInfo, FileMode, Tree, TreeEntry};

/// a file staged in a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedFile {
    pub mode: FileMode,
    pub oid: Oid,
}

/// held by a serialized transaction until it is committed or dropped
struct SerialGuard<'r> {
    _file: RepoLock,
    _local: MutexGuard<'r, ()>,
}

/// a set of edits against the tree of one ref, published as one commit
///
/// the tree is flattened into `path -> file` when the transaction starts and
/// rebuilt on [`Transaction::commit`]. a plain transaction holds no lock in
/// between: two transactions on the same ref may both commit, each with the
/// parent it started from, and the later ref write wins. use
/// [`Repository::start_serialized_transaction`] to rule that out.
pub struct Transaction<'r> {
    repo: &'r Repository,
    ref_name: String,
    parent: Oid,
    files: BTreeMap<BString, StagedFile>,
    _serial: Option<SerialGuard<'r>>,
}

impl Repository {
    /// start a transaction on the current commit of `ref_name`
    pub fn start_transaction(&self, ref_name: &str) -> Result<Transaction<'_>> {
        Transaction::start(self, ref_name, None)
    }

    /// start a transaction that excludes every other serialized transaction
    ///
    /// holds an in-process mutex plus an exclusive flock on `quire.lock`
    /// until the transaction is committed or dropped.
    pub fn start_serialized_transaction(&self, ref_name: &str) -> Result<Transaction<'_>> {
        let local = self.serial_guard();
        let file = self.lock()?;
        let guard = SerialGuard {
            _file: file,
            _local: local,
        };
        Transaction::start(self, ref_name, Some(guard))
    }
}

impl<'r> Transaction<'r> {
    fn start(repo: &'r Repository, ref_name: &str, serial: Option<SerialGuard<'r>>) -> Result<Self> {
        let (commit, parent) = repo.ref_commit(ref_name)?;

        let mut files = BTreeMap::new();
        flatten_tree(repo, &commit.tree, b"", &mut files)?;

        tracing::debug!(ref_name, %parent, files = files.len(), "started transaction");
        Ok(Self {
            repo,
            ref_name: ref_name.to_string(),
            parent,
            files,
            _serial: serial,
        })
    }

    /// ref this transaction will update
    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// commit the transaction started from
    pub fn parent(&self) -> Oid {
        self.parent
    }

    pub fn get(&self, path: impl AsRef<[u8]>) -> Option<&StagedFile> {
        self.files.get(BStr::new(path.as_ref()))
    }

    pub fn contains(&self, path: impl AsRef<[u8]>) -> bool {
        self.files.contains_key(BStr::new(path.as_ref()))
    }

    /// staged paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &BStr> {
        self.files.keys().map(|p| p.as_bstr())
    }

    /// read the stored payload of a staged path
    pub fn read(&self, path: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let file = self
            .files
            .get(BStr::new(path))
            .ok_or_else(|| Error::PathDoesNotExist(path.as_bstr().to_string()))?;
        self.repo.read_blob(&file.oid)
    }

    /// add a new file, failing if the path is already staged
    pub fn add(&mut self, path: impl AsRef<[u8]>, payload: &[u8]) -> Result<()> {
        let path = path.as_ref();
        validate_path(path)?;
        if self.contains(path) {
            return Err(Error::PathAlreadyExists(path.as_bstr().to_string()));
        }
        self.add_or_replace(path, payload)
    }

    /// add a regular file or replace whatever is staged at the path
    pub fn add_or_replace(&mut self, path: impl AsRef<[u8]>, payload: &[u8]) -> Result<()> {
        self.add_or_replace_with_mode(path, payload, FileMode::Regular)
    }

    pub fn add_or_replace_with_mode(
        &mut self,
        path: impl AsRef<[u8]>,
        payload: &[u8],
        mode: FileMode,
    ) -> Result<()> {
        let path = path.as_ref();
        validate_path(path)?;
        if mode.is_directory() {
            return Err(Error::InvalidFileMode(mode.to_string()));
        }
        self.check_shadowing(path)?;

        let oid = self.repo.store_blob(payload)?;
        self.files.insert(BString::from(path), StagedFile { mode, oid });
        Ok(())
    }

    /// remove a staged path, returning whether it was present
    pub fn delete(&mut self, path: impl AsRef<[u8]>) -> bool {
        self.files.remove(BStr::new(path.as_ref())).is_some()
    }

    /// move a file, keeping its mode and content
    pub fn move_path(&mut self, src: impl AsRef<[u8]>, dest: impl AsRef<[u8]>) -> Result<()> {
        let (src, dest) = (src.as_ref(), dest.as_ref());
        validate_path(dest)?;
        if self.contains(dest) {
            return Err(Error::PathAlreadyExists(dest.as_bstr().to_string()));
        }

        let file = self
            .files
            .remove(BStr::new(src))
            .ok_or_else(|| Error::PathDoesNotExist(src.as_bstr().to_string()))?;
        if let Err(e) = self.check_shadowing(dest) {
            self.files.insert(BString::from(src), file);
            return Err(e);
        }

        self.files.insert(BString::from(dest), file);
        Ok(())
    }

    /// write the edited tree and a commit on top of the parent, then move the ref
    pub fn commit(self, info: CommitInfo) -> Result<Oid> {
        let mut root = DirNode::default();
        for (path, file) in &self.files {
            root.insert(path, *file);
        }

        let tree = root.write(self.repo)?;
        let commit = self
            .repo
            .store_commit(&info.into_commit(tree, vec![self.parent]))?;
        refs::write_ref(self.repo, &self.ref_name, &commit)?;

        tracing::info!(
            ref_name = %self.ref_name,
            %commit,
            parent = %self.parent,
            files = self.files.len(),
            "committed transaction"
        );
        Ok(commit)
    }

    /// a file may not sit where a directory is staged, or inside a staged file
    fn check_shadowing(&self, path: &[u8]) -> Result<()> {
        for (i, &b) in path.iter().enumerate() {
            if b == b'/' && self.contains(&path[..i]) {
                return Err(Error::PathAlreadyExists(path[..i].as_bstr().to_string()));
            }
        }

        let mut dir_prefix = BString::from(path);
        dir_prefix.push(b'/');
        if let Some((existing, _)) = self.files.range(dir_prefix.clone()..).next() {
            if existing.as_bytes().starts_with(dir_prefix.as_bytes()) {
                return Err(Error::PathAlreadyExists(path.as_bstr().to_string()));
            }
        }
        Ok(())
    }
}

fn flatten_tree(
    repo: &Repository,
    oid: &Oid,
    prefix: &[u8],
    files: &mut BTreeMap<BString, StagedFile>,
) -> Result<()> {
    for entry in repo.tree(oid)?.into_entries() {
        let path = if prefix.is_empty() {
            entry.name
        } else {
            let mut path = BString::from(prefix);
            path.push(b'/');
            path.extend_from_slice(&entry.name);
            path
        };

        if entry.mode.is_directory() {
            flatten_tree(repo, &entry.oid, &path, files)?;
        } else {
            files.insert(
                path,
                StagedFile {
                    mode: entry.mode,
                    oid: entry.oid,
                },
            );
        }
    }
    Ok(())
}

/// relative, `/` separated, no empty or dot segments
fn validate_path(path: &[u8]) -> Result<()> {
    let valid = !path.is_empty()
        && !path.contains(&0)
        && path
            .split(|&b| b == b'/')
            .all(|segment| !segment.is_empty() && segment != b"." && segment != b"..");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.as_bstr().to_string()))
    }
}

/// one directory of the tree being rebuilt
#[derive(Default)]
struct DirNode {
    files: Vec<TreeEntry>,
    dirs: BTreeMap<BString, DirNode>,
}

impl DirNode {
    fn insert(&mut self, path: &[u8], file: StagedFile) {
        match path.find_byte(b'/') {
            Some(i) => self
                .dirs
                .entry(BString::from(&path[..i]))
                .or_default()
                .insert(&path[i + 1..], file),
            None => self.files.push(TreeEntry::new(path, file.mode, file.oid)),
        }
    }

    /// store subtrees first, then this tree
    fn write(self, repo: &Repository) -> Result<Oid> {
        let mut entries = self.files;
        for (name, node) in self.dirs {
            let oid = node.write(repo)?;
            entries.push(TreeEntry::new(name, FileMode::Directory, oid));
        }
        repo.store_tree(&Tree::new(entries)?)
    }
}
