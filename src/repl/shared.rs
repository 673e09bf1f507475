use crate::config::Config;
use crate::storage::{BTree, Pager};

/// State shared across all modes
pub struct SharedState {
    pub btree: BTree,

    /// Pager for raw page experiments, kept apart from the btree's file
    pub pager: Pager,

    pub config: Config,
}

impl SharedState {
    pub fn new(config: Config, btree: BTree, pager: Pager) -> Self {
        SharedState {
            btree,
            pager,
            config,
        }
    }

    pub fn close(self) -> crate::error::Result<()> {
        self.btree.close()?;
        self.pager.close()
    }
}
