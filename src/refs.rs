use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Oid;
use crate::repo::Repository;

/// write a ref (create or update)
///
/// ref_name can contain slashes for hierarchical refs like "wiki/drafts".
/// the new value is published by a rename, so readers see the old or the new
/// oid and never a partial file.
pub fn write_ref(repo: &Repository, ref_name: &str, oid: &Oid) -> Result<()> {
    validate_ref_name(ref_name)?;
    let _guard = repo.write_guard();
    write_ref_unlocked(repo, ref_name, oid)
}

pub(crate) fn write_ref_unlocked(repo: &Repository, ref_name: &str, oid: &Oid) -> Result<()> {
    let ref_path = ref_path(repo, ref_name);
    let parent = ref_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| repo.refs_path());

    fs::create_dir_all(&parent).with_path(&parent)?;

    // atomic write: temp -> fsync -> rename, temp lives next to the ref
    let tmp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let written = (|| {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        writeln!(tmp_file, "{}", oid.to_hex()).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
        fs::rename(&tmp_path, &ref_path).with_path(&ref_path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
        return written;
    }

    // fsync parent directory
    let dir = File::open(&parent).with_path(&parent)?;
    dir.sync_all().with_path(&parent)?;

    tracing::info!(ref_name, %oid, "updated ref");
    Ok(())
}

/// read a ref
pub fn read_ref(repo: &Repository, ref_name: &str) -> Result<Oid> {
    validate_ref_name(ref_name)?;
    let _guard = repo.read_guard();
    let ref_path = ref_path(repo, ref_name);

    let content = fs::read_to_string(&ref_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RefNotFound(ref_name.to_string())
        } else {
            Error::Io {
                path: ref_path.clone(),
                source: e,
            }
        }
    })?;

    Oid::from_hex(content.trim())
}

/// delete a ref
pub fn delete_ref(repo: &Repository, ref_name: &str) -> Result<()> {
    validate_ref_name(ref_name)?;
    let _guard = repo.write_guard();
    let ref_path = ref_path(repo, ref_name);

    fs::remove_file(&ref_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RefNotFound(ref_name.to_string())
        } else {
            Error::Io {
                path: ref_path,
                source: e,
            }
        }
    })?;

    tracing::info!(ref_name, "deleted ref");
    Ok(())
}

/// resolve a ref or oid string to an oid
///
/// if the string looks like an oid (40 hex chars), parse it directly.
/// otherwise, look it up as a ref name.
pub fn resolve_ref(repo: &Repository, ref_or_oid: &str) -> Result<Oid> {
    if ref_or_oid.len() == Oid::LEN * 2 && ref_or_oid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Oid::from_hex(ref_or_oid);
    }

    read_ref(repo, ref_or_oid)
}

/// list all refs
pub fn list_refs(repo: &Repository) -> Result<Vec<String>> {
    let _guard = repo.read_guard();
    let refs_dir = repo.refs_path();
    let mut refs = Vec::new();

    if refs_dir.exists() {
        collect_refs(&refs_dir, &refs_dir, &mut refs)?;
    }

    refs.sort();
    Ok(refs)
}

/// list refs matching a glob pattern
pub fn list_refs_matching(repo: &Repository, pattern: &str) -> Result<Vec<String>> {
    let all_refs = list_refs(repo)?;
    let glob = glob::Pattern::new(pattern).map_err(|e| Error::InvalidRef(e.to_string()))?;

    Ok(all_refs.into_iter().filter(|r| glob.matches(r)).collect())
}

/// check if a ref exists
pub fn ref_exists(repo: &Repository, ref_name: &str) -> bool {
    let _guard = repo.read_guard();
    ref_path(repo, ref_name).is_file()
}

/// get filesystem path for a ref
fn ref_path(repo: &Repository, ref_name: &str) -> PathBuf {
    repo.refs_path().join(ref_name)
}

/// recursively collect refs from directory
fn collect_refs(base: &Path, dir: &Path, refs: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        // in-flight temp files and lock files are not refs
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.ends_with(".lock") {
            continue;
        }

        if path.is_dir() {
            collect_refs(base, &path, refs)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                refs.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

/// validate ref name
pub(crate) fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRef("empty ref name".to_string()));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidRef(format!(
            "ref name cannot start or end with '/': {}",
            name
        )));
    }

    if name.contains("//") {
        return Err(Error::InvalidRef(format!(
            "ref name cannot contain '//': {}",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidRef(format!(
            "ref name cannot contain null byte: {}",
            name
        )));
    }

    if name.ends_with(".lock") {
        return Err(Error::InvalidRef(format!(
            "ref name cannot end with '.lock': {}",
            name
        )));
    }

    // path traversal and hidden components
    for component in name.split('/') {
        if component.starts_with('.') {
            return Err(Error::InvalidRef(format!(
                "ref name component cannot start with '.': {}",
                name
            )));
        }
    }

    Ok(())
}
