//! quire - git-compatible loose object store
//!
//! reads and writes the loose object format of a git repository: zlib
//! compressed `<kind> <size>\0<payload>` files named by the SHA-1 of their
//! uncompressed bytes. on top of the store sit refs and transactions that
//! edit the tree of a ref by path and publish the result as one commit.
//!
//! # Core concepts
//!
//! - **Blob**: file content
//! - **Tree**: sorted directory listing of `(mode, name, oid)` entries
//! - **Commit**: a tree, its parents, author, committer and message
//! - **Ref**: a named pointer to a commit under `refs/heads/`
//! - **Transaction**: path level edits against one ref, committed at once
//!
//! # Example usage
//!
//! ```no_run
//! use quire::{CommitInfo, Repository, Signature};
//! use std::path::Path;
//!
//! let repo = Repository::init(Path::new("/path/to/repo")).unwrap();
//! let me = Signature::now("Wiki Bot", "bot@example.org");
//! repo.init_ref("master", CommitInfo::by(me.clone(), "init\n")).unwrap();
//!
//! let mut tx = repo.start_transaction("master").unwrap();
//! tx.add("pages/home.md", b"# home\n").unwrap();
//! tx.commit(CommitInfo::by(me, "add home page\n")).unwrap();
//!
//! let page = repo.lookup_blob_by_path("master", "pages/home.md").unwrap();
//! assert_eq!(page, b"# home\n");
//! ```

mod config;
mod error;
mod hash;
mod refs;
mod repo;
mod transaction;

pub mod object;
pub mod ops;
pub mod types;

pub use bstr::{BStr, BString};
pub use config::{Config, CoreConfig, UserConfig, CONFIG_FILE};
pub use error::{Error, IoResultExt, Result};
pub use hash::{compute_object_id, HashingWriter, Oid};
pub use object::{decode, encode, LooseObject, Object, ObjectStore, ObjectWriter, Payload};
pub use refs::{
    delete_ref, list_refs, list_refs_matching, read_ref, ref_exists, resolve_ref, write_ref,
};
pub use repo::{RepoLock, Repository};
pub use transaction::{StagedFile, Transaction};
pub use types::{Commit, CommitInfo, FileMode, ObjectKind, Signature, Tree, TreeEntry};
