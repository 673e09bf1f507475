pub mod config;
pub mod error;
pub mod index;
pub mod repl;
pub mod storage;
pub mod wal;


pub use error::{Error, Result};
pub use storage::{BTree, Key, PageStore, Pager, PagerOptions};
