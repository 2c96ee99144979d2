use std::cmp::Ordering;
use std::collections::HashSet;
use std::io::Write;

use bstr::{BString, ByteSlice};

use crate::error::{Error, Result};
use crate::hash::Oid;
use crate::types::FileMode;

/// a directory tree - collection of entries in canonical order
///
/// canonical order compares names byte-wise, with directories compared as if
/// their name carried a trailing `/`. names are raw bytes, git puts no
/// encoding on them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a new tree, validating and sorting entries
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            validate_entry_name(entry.name.as_bytes())?;
            if !seen.insert(entry.name.as_bytes()) {
                return Err(Error::DuplicateEntryName(entry.name.to_string()));
            }
        }

        entries.sort_by(canonical_order);
        Ok(Self { entries })
    }

    /// create an empty tree
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// get entries slice
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// consume and return entries
    pub fn into_entries(self) -> Vec<TreeEntry> {
        self.entries
    }

    /// look up entry by name
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&TreeEntry> {
        let name = name.as_ref();
        self.entries.iter().find(|e| e.name.as_bytes() == name)
    }

    /// insert an entry, keeping canonical order
    pub fn add(&mut self, entry: TreeEntry) -> Result<()> {
        validate_entry_name(entry.name.as_bytes())?;
        if self.get(&entry.name).is_some() {
            return Err(Error::DuplicateEntryName(entry.name.to_string()));
        }
        let pos = self
            .entries
            .binary_search_by(|e| canonical_order(e, &entry))
            .unwrap_or_else(|pos| pos);
        self.entries.insert(pos, entry);
        Ok(())
    }

    /// remove an entry by name
    pub fn remove(&mut self, name: impl AsRef<[u8]>) -> Option<TreeEntry> {
        let name = name.as_ref();
        let pos = self.entries.iter().position(|e| e.name.as_bytes() == name)?;
        Some(self.entries.remove(pos))
    }

    /// number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// is tree empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// serialize into the tree object payload format
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for entry in &self.entries {
            w.write_all(entry.mode.as_tree_str().as_bytes())?;
            w.write_all(b" ")?;
            w.write_all(entry.name.as_bytes())?;
            w.write_all(b"\0")?;
            w.write_all(entry.oid.as_bytes())?;
        }
        Ok(())
    }

    /// serialized tree object payload
    pub fn to_bytes(&self) -> Vec<u8> {
        // 20 byte oid + mode + separators + name
        let mut out = Vec::with_capacity(self.entries.iter().map(|e| e.name.len() + 28).sum());
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_tree_str().as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// parse a tree object payload
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| Error::MalformedTree("entry mode is not terminated".to_string()))?;
            let mode_str = std::str::from_utf8(&rest[..space])
                .map_err(|_| Error::InvalidFileMode(String::from_utf8_lossy(&rest[..space]).into()))?;
            let mode: FileMode = mode_str.parse()?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::MalformedTree("entry name is not terminated".to_string()))?;
            let name = BString::from(&rest[..nul]);
            rest = &rest[nul + 1..];

            if rest.len() < Oid::LEN {
                return Err(Error::MalformedTree(format!(
                    "truncated oid for entry {}",
                    name
                )));
            }
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&rest[..Oid::LEN]);
            rest = &rest[Oid::LEN..];

            entries.push(TreeEntry::new(name, mode, Oid::from_bytes(raw)));
        }

        Self::new(entries)
    }
}

/// compare two entries by name, directories sorting as `name/`
fn canonical_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    a.sort_key().cmp(b.sort_key())
}

/// validate an entry name
fn validate_entry_name(name: &[u8]) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains(&b'/') {
        return Err(Error::InvalidEntryName(format!(
            "name contains '/': {}",
            name.as_bstr()
        )));
    }
    if name.contains(&0) {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name.as_bstr()
        )));
    }
    if name == b"." || name == b".." {
        return Err(Error::InvalidEntryName(format!(
            "reserved name: {}",
            name.as_bstr()
        )));
    }
    Ok(())
}

/// a single entry in a tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: BString,
    pub mode: FileMode,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(name: impl Into<BString>, mode: FileMode, oid: Oid) -> Self {
        Self {
            name: name.into(),
            mode,
            oid,
        }
    }

    /// is this a directory entry
    pub fn is_directory(&self) -> bool {
        self.mode.is_directory()
    }

    fn sort_key(&self) -> impl Iterator<Item = &u8> {
        let suffix: &[u8] = if self.is_directory() { b"/" } else { b"" };
        self.name.as_bytes().iter().chain(suffix)
    }
}
