mod memory;
mod node;
mod pager;

/// Disk resident btree, every node stored on its own page of a [`PageStore`].
mod btree;

mod btree_graph;
mod btree_verify;

pub use btree::{BTree, SharedTree, ROOT_PAGE};
pub use btree_verify::VerifyError;
pub use memory::MemoryPager;
pub use node::Key;
pub use pager::{PageId, PageStore, Pager, PagerOptions, HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
