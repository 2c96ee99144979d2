use bstr::BString;

use crate::error::Result;
use crate::refs::resolve_ref;
use crate::repo::Repository;
use crate::types::{Tree, TreeEntry};

/// list tree entry with full path
#[derive(Debug, Clone)]
pub struct LsTreeEntry {
    pub path: BString,
    pub entry: TreeEntry,
}

/// list tree contents, optionally at a specific path
///
/// a path naming a file lists just that entry.
pub fn ls_tree(repo: &Repository, rev: &str, path: Option<&str>) -> Result<Vec<LsTreeEntry>> {
    let tree = root_tree(repo, rev)?;

    let path = path.map(|p| p.trim_matches('/')).unwrap_or("");
    if path.is_empty() {
        return Ok(ls_tree_flat(&tree, b""));
    }

    let entry = repo.lookup_in_tree(&tree, path)?;
    if entry.is_directory() {
        let subtree = repo.tree(&entry.oid)?;
        Ok(ls_tree_flat(&subtree, path.as_bytes()))
    } else {
        Ok(vec![LsTreeEntry {
            path: BString::from(path),
            entry,
        }])
    }
}

/// list tree contents recursively, directories before their contents
pub fn ls_tree_recursive(repo: &Repository, rev: &str) -> Result<Vec<LsTreeEntry>> {
    let tree = root_tree(repo, rev)?;

    let mut entries = Vec::new();
    ls_tree_recursive_impl(repo, &tree, b"", &mut entries)?;
    Ok(entries)
}

fn root_tree(repo: &Repository, rev: &str) -> Result<Tree> {
    let commit_oid = resolve_ref(repo, rev)?;
    let commit = repo.commit(&commit_oid)?;
    repo.tree(&commit.tree)
}

fn join(prefix: &[u8], name: &[u8]) -> BString {
    let mut path = BString::from(prefix);
    if !prefix.is_empty() {
        path.push(b'/');
    }
    path.extend_from_slice(name);
    path
}

fn ls_tree_flat(tree: &Tree, prefix: &[u8]) -> Vec<LsTreeEntry> {
    tree.entries()
        .iter()
        .map(|entry| LsTreeEntry {
            path: join(prefix, &entry.name),
            entry: entry.clone(),
        })
        .collect()
}

fn ls_tree_recursive_impl(
    repo: &Repository,
    tree: &Tree,
    prefix: &[u8],
    entries: &mut Vec<LsTreeEntry>,
) -> Result<()> {
    for entry in tree.entries() {
        let path = join(prefix, &entry.name);

        entries.push(LsTreeEntry {
            path: path.clone(),
            entry: entry.clone(),
        });

        if entry.is_directory() {
            let subtree = repo.tree(&entry.oid)?;
            ls_tree_recursive_impl(repo, &subtree, &path, entries)?;
        }
    }

    Ok(())
}

impl std::fmt::Display for LsTreeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}\t{}",
            self.entry.mode,
            self.entry.mode.type_name(),
            self.entry.oid,
            self.path
        )
    }
}
