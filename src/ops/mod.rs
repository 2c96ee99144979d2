//! high-level operations on quire repositories

mod fsck;
mod import;
mod log;
mod ls_tree;

pub use fsck::{fsck, CorruptObject, FsckReport, MissingObject};
pub use import::{import, ImportOptions, ImportStats};
pub use log::{log, LogEntry};
pub use ls_tree::{ls_tree, ls_tree_recursive, LsTreeEntry};
