use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_object_id, Oid};
use crate::object::decode;
use crate::refs::{list_refs, read_ref};
use crate::repo::Repository;
use crate::types::{FileMode, ObjectKind};

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    /// loose objects re-hashed
    pub objects_checked: usize,
    /// objects that fail to decode or whose content does not hash to their id
    pub corrupt_objects: Vec<CorruptObject>,
    /// missing objects referenced by refs or other objects
    pub missing_objects: Vec<MissingObject>,
    /// objects not reachable from any ref
    pub dangling_objects: Vec<Oid>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt_objects.is_empty() && self.missing_objects.is_empty()
    }
}

#[derive(Debug)]
pub struct CorruptObject {
    pub oid: Oid,
    pub message: String,
}

#[derive(Debug)]
pub struct MissingObject {
    pub oid: Oid,
    pub kind: ObjectKind,
    pub referenced_by: String,
}

/// verify repository integrity
pub fn fsck(repo: &Repository) -> Result<FsckReport> {
    let mut check = Check {
        repo,
        reachable: HashSet::new(),
        report: FsckReport::default(),
    };

    for ref_name in list_refs(repo)? {
        let oid = read_ref(repo, &ref_name)?;
        check.history(&oid, &format!("ref {}", ref_name))?;
    }

    let mut report = check.report;
    let reachable = check.reachable;

    for oid in repo.object_store().list()? {
        report.objects_checked += 1;

        if let Some(message) = rehash(repo, &oid)? {
            // already reported while walking
            if !report.corrupt_objects.iter().any(|c| c.oid == oid) {
                report.corrupt_objects.push(CorruptObject { oid, message });
            }
        }

        if !reachable.contains(&oid) {
            report.dangling_objects.push(oid);
        }
    }

    tracing::debug!(
        checked = report.objects_checked,
        corrupt = report.corrupt_objects.len(),
        missing = report.missing_objects.len(),
        dangling = report.dangling_objects.len(),
        "fsck finished"
    );
    Ok(report)
}

/// decode an object file and hash its content, describing any mismatch
fn rehash(repo: &Repository, oid: &Oid) -> Result<Option<String>> {
    let path = repo.object_store().object_path(oid);
    let file = File::open(&path).with_path(&path)?;

    let object = match decode(BufReader::new(file)) {
        Ok(object) => object,
        Err(e) if is_corruption(&e) => return Ok(Some(e.to_string())),
        Err(e) => return Err(e),
    };
    let kind = object.kind();
    let payload = match object.into_payload().into_bytes() {
        Ok(payload) => payload,
        Err(e) if is_corruption(&e) => return Ok(Some(e.to_string())),
        Err(e) => return Err(e),
    };

    let actual = compute_object_id(kind.as_str(), &payload);
    if actual != *oid {
        return Ok(Some(format!("hash mismatch: content hashes to {}", actual)));
    }
    Ok(None)
}

fn is_corruption(e: &Error) -> bool {
    e.is_malformed() || matches!(e, Error::Stream(_) | Error::InvalidEntryName(_))
}

struct Check<'a> {
    repo: &'a Repository,
    reachable: HashSet<Oid>,
    report: FsckReport,
}

impl Check<'_> {
    /// walk a ref's history with a work list, history length is unbounded
    fn history(&mut self, tip: &Oid, referenced_by: &str) -> Result<()> {
        let mut pending = vec![(*tip, referenced_by.to_string())];

        while let Some((oid, referenced_by)) = pending.pop() {
            if !self.reachable.insert(oid) {
                continue;
            }

            match self.repo.commit(&oid) {
                Ok(commit) => {
                    let by = format!("commit {}", oid);
                    self.tree(&commit.tree, &by)?;
                    for parent in commit.parents.iter().rev() {
                        pending.push((*parent, by.clone()));
                    }
                }
                Err(e) => self.record(&oid, ObjectKind::Commit, &referenced_by, e)?,
            }
        }
        Ok(())
    }

    fn tree(&mut self, oid: &Oid, referenced_by: &str) -> Result<()> {
        if !self.reachable.insert(*oid) {
            return Ok(());
        }

        match self.repo.tree(oid) {
            Ok(tree) => {
                let by = format!("tree {}", oid);
                for entry in tree.entries() {
                    match entry.mode {
                        FileMode::Directory => self.tree(&entry.oid, &by)?,
                        // gitlinks name commits in another repository
                        FileMode::Submodule => {}
                        _ => self.blob(&entry.oid, &by)?,
                    }
                }
                Ok(())
            }
            Err(e) => self.record(oid, ObjectKind::Tree, referenced_by, e),
        }
    }

    fn blob(&mut self, oid: &Oid, referenced_by: &str) -> Result<()> {
        if !self.reachable.insert(*oid) {
            return Ok(());
        }

        if !self.repo.exists(oid)? {
            self.report.missing_objects.push(MissingObject {
                oid: *oid,
                kind: ObjectKind::Blob,
                referenced_by: referenced_by.to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, oid: &Oid, kind: ObjectKind, referenced_by: &str, e: Error) -> Result<()> {
        match e {
            Error::ObjectNotFound { .. } => {
                self.report.missing_objects.push(MissingObject {
                    oid: *oid,
                    kind,
                    referenced_by: referenced_by.to_string(),
                });
                Ok(())
            }
            e if e.is_wrong_kind() || is_corruption(&e) => {
                self.report.corrupt_objects.push(CorruptObject {
                    oid: *oid,
                    message: format!("expected {} referenced by {}: {}", kind, referenced_by, e),
                });
                Ok(())
            }
            e => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::write_ref;
    use crate::types::{CommitInfo, Signature, Tree};
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    fn info() -> CommitInfo {
        CommitInfo::by(Signature::new("t", "t@example.org", 0), "msg\n")
    }

    fn test_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(&dir.path().join("repo")).unwrap();
        repo.init_ref("test", info()).unwrap();

        let mut tx = repo.start_transaction("test").unwrap();
        tx.add("file.txt", b"content").unwrap();
        tx.add("dir/nested.txt", b"nested").unwrap();
        tx.commit(info()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_fsck_healthy_repo() {
        let (_dir, repo) = test_repo();

        let report = fsck(&repo).unwrap();

        assert!(report.is_ok());
        assert!(report.corrupt_objects.is_empty());
        assert!(report.missing_objects.is_empty());
        assert!(report.dangling_objects.is_empty());
        // 2 commits, empty tree, root tree, dir tree, 2 blobs
        assert_eq!(report.objects_checked, 7);
    }

    #[test]
    fn test_fsck_with_dangling() {
        let (_dir, repo) = test_repo();
        let orphan = repo.store_blob(b"orphan").unwrap();

        let report = fsck(&repo).unwrap();

        assert!(report.is_ok());
        assert_eq!(report.dangling_objects, vec![orphan]);
    }

    #[test]
    fn test_fsck_missing_blob() {
        let (_dir, repo) = test_repo();
        let entry = repo.lookup_entry_by_path("test", "dir/nested.txt").unwrap();
        fs::remove_file(repo.object_store().object_path(&entry.oid)).unwrap();

        let report = fsck(&repo).unwrap();

        assert!(!report.is_ok());
        assert_eq!(report.missing_objects.len(), 1);
        assert_eq!(report.missing_objects[0].oid, entry.oid);
        assert_eq!(report.missing_objects[0].kind, ObjectKind::Blob);
        assert!(report.missing_objects[0].referenced_by.starts_with("tree "));
    }

    #[test]
    fn test_fsck_hash_mismatch() {
        let (_dir, repo) = test_repo();
        let store = repo.object_store();
        let victim = repo.lookup_entry_by_path("test", "file.txt").unwrap().oid;
        let other = repo.lookup_entry_by_path("test", "dir/nested.txt").unwrap().oid;

        // a valid object file stored under the wrong id
        fs::copy(store.object_path(&other), store.object_path(&victim)).unwrap();

        let report = fsck(&repo).unwrap();

        assert_eq!(report.corrupt_objects.len(), 1);
        assert_eq!(report.corrupt_objects[0].oid, victim);
        assert!(report.corrupt_objects[0].message.contains("hash mismatch"));
    }

    #[test]
    fn test_fsck_undecodable_tree() {
        let (_dir, repo) = test_repo();
        let dir_oid = repo.lookup_entry_by_path("test", "dir").unwrap().oid;
        fs::write(repo.object_store().object_path(&dir_oid), b"not zlib").unwrap();

        let report = fsck(&repo).unwrap();

        assert!(!report.is_ok());
        assert!(report.corrupt_objects.iter().any(|c| c.oid == dir_oid));
        // reported once even though the walk and the re-hash both see it
        assert_eq!(
            report.corrupt_objects.iter().filter(|c| c.oid == dir_oid).count(),
            1
        );
    }

    #[test]
    fn test_fsck_long_history_small_stack() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(&dir.path().join("repo")).unwrap();

        let tree = repo.store_tree(&Tree::default()).unwrap();
        let mut tip = repo.store_commit(&info().into_commit(tree, vec![])).unwrap();
        for _ in 0..2000 {
            tip = repo
                .store_commit(&info().into_commit(tree, vec![tip]))
                .unwrap();
        }
        write_ref(&repo, "long", &tip).unwrap();

        let report = thread::scope(|s| {
            thread::Builder::new()
                .stack_size(256 * 1024)
                .spawn_scoped(s, || fsck(&repo).unwrap())
                .unwrap()
                .join()
                .unwrap()
        });

        assert!(report.is_ok());
        assert!(report.dangling_objects.is_empty());
        // 2001 commits and one tree
        assert_eq!(report.objects_checked, 2002);
    }

    #[test]
    fn test_fsck_missing_parent() {
        let (_dir, repo) = test_repo();
        let (head, _) = repo.ref_commit("test").unwrap();
        let root = head.parents[0];
        fs::remove_file(repo.object_store().object_path(&root)).unwrap();

        let report = fsck(&repo).unwrap();

        assert_eq!(report.missing_objects.len(), 1);
        assert_eq!(report.missing_objects[0].oid, root);
        assert_eq!(report.missing_objects[0].kind, ObjectKind::Commit);
        assert!(report.missing_objects[0].referenced_by.starts_with("commit "));
    }
}
