use std::collections::HashMap;

use crate::error::Result;

use super::pager::{PageId, PageStore};

/// Keeps pages in a map instead of a file. Allocation follows the same LIFO free list policy as
/// the file backed pager, which makes it a drop in replacement for tree tests.
#[derive(Debug, Default)]
pub struct MemoryPager {
    pages: HashMap<PageId, Vec<u8>>,
    free_pages: Vec<PageId>,
    slots: u64,
}

impl MemoryPager {
    pub fn new() -> MemoryPager {
        MemoryPager::default()
    }

    pub fn free_pages(&self) -> &[PageId] {
        &self.free_pages
    }
}

impl PageStore for MemoryPager {
    fn write(&mut self, data: &[u8]) -> Result<PageId> {
        let page_idx = self.free_pages.pop().unwrap_or(self.slots);
        self.write_to(page_idx, data)?;
        Ok(page_idx)
    }

    fn write_to(&mut self, page_idx: PageId, data: &[u8]) -> Result<()> {
        self.free_pages.retain(|&p| p != page_idx);
        self.slots = self.slots.max(page_idx + 1);
        self.pages.insert(page_idx, data.to_vec());
        Ok(())
    }

    fn get_page(&self, page_idx: PageId) -> Result<Vec<u8>> {
        match self.pages.get(&page_idx) {
            Some(data) => Ok(data.clone()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("page {page_idx} was never written"),
            )
            .into()),
        }
    }

    fn delete_page(&mut self, page_idx: PageId) -> Result<()> {
        if !self.free_pages.contains(&page_idx) {
            self.free_pages.push(page_idx);
        }
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.slots)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
