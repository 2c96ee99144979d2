mod commit;
mod kind;
mod mode;
mod tree;

pub use commit::{Commit, CommitInfo, Signature};
pub use kind::ObjectKind;
pub use mode::FileMode;
pub use tree::{Tree, TreeEntry};
