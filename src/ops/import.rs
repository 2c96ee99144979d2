use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use bstr::BString;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Oid;
use crate::refs::ref_exists;
use crate::repo::Repository;
use crate::types::{CommitInfo, FileMode};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// directory inside the tree to import into
    pub prefix: Option<String>,
    /// drop everything already under the prefix first
    pub replace: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub files: usize,
    pub symlinks: usize,
    /// sockets, fifos and devices have no tree representation
    pub skipped: usize,
}

/// stage a directory into one transaction on `ref_name` and commit it
///
/// a missing ref is created first with an empty root commit. `.git`
/// directories are not descended into.
pub fn import(
    repo: &Repository,
    source: &Path,
    ref_name: &str,
    info: CommitInfo,
    options: &ImportOptions,
) -> Result<(Oid, ImportStats)> {
    if !ref_exists(repo, ref_name) {
        repo.init_ref(ref_name, info.clone())?;
    }

    let prefix = options
        .prefix
        .as_deref()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());

    let mut tx = repo.start_transaction(ref_name)?;
    if options.replace {
        let stale: Vec<BString> = tx
            .paths()
            .filter(|p| match prefix {
                Some(prefix) => p
                    .strip_prefix(prefix.as_bytes())
                    .is_some_and(|rest| rest.starts_with(b"/")),
                None => true,
            })
            .map(BString::from)
            .collect();
        for path in stale {
            tx.delete(&path);
        }
    }

    let mut stats = ImportStats::default();
    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io {
            path: e.path().unwrap_or(source).to_path_buf(),
            source: e.into(),
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let path = entry.path();
        let rel = tree_path(source, path)?;
        let staged = match prefix {
            Some(prefix) => format!("{}/{}", prefix, rel),
            None => rel,
        };

        if file_type.is_symlink() {
            let target = fs::read_link(path).with_path(path)?;
            tx.add_or_replace_with_mode(&staged, target.as_os_str().as_bytes(), FileMode::Symlink)?;
            stats.symlinks += 1;
        } else if file_type.is_file() {
            let meta = entry.metadata().map_err(|e| Error::Io {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
            let mode = if meta.permissions().mode() & 0o111 != 0 {
                FileMode::Executable
            } else {
                FileMode::Regular
            };
            let content = fs::read(path).with_path(path)?;
            tx.add_or_replace_with_mode(&staged, &content, mode)?;
            stats.files += 1;
        } else {
            tracing::debug!(path = %path.display(), "skipping special file");
            stats.skipped += 1;
        }
    }

    let oid = tx.commit(info)?;
    tracing::info!(
        source = %source.display(),
        ref_name,
        files = stats.files,
        symlinks = stats.symlinks,
        "imported directory"
    );
    Ok((oid, stats))
}

/// `/` joined path of `path` relative to `source`
fn tree_path(source: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(source)
        .map_err(|_| Error::InvalidPath(path.display().to_string()))?;

    let mut segments = Vec::new();
    for component in rel.components() {
        let segment = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::InvalidPath(rel.to_string_lossy().to_string()))?;
        segments.push(segment);
    }
    Ok(segments.join("/"))
}
