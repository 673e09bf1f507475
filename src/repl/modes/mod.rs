mod btree;
mod pager;

pub use btree::BTreeMode;
pub use pager::PagerMode;
