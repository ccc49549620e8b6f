use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::buffer::page::Page;
use crate::common::{IndexId, PageNo, SpaceId};

/// Buffer pool page directory.
///
/// Pages are shared frames behind `RwLock`; the lock is the page latch.
/// The directory itself is a concurrent map so that lookups do not
/// serialize against each other.
#[derive(Debug, Default)]
pub struct BufferPool {
    pages: DashMap<(SpaceId, PageNo), Arc<RwLock<Page>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty page frame.
    pub fn create_page(&self, space: SpaceId, page_no: PageNo, index_id: IndexId) -> Arc<RwLock<Page>> {
        let page = Arc::new(RwLock::new(Page::new(space, page_no, index_id)));
        self.pages.insert((space, page_no), Arc::clone(&page));
        page
    }

    pub fn get_page(&self, space: SpaceId, page_no: PageNo) -> Option<Arc<RwLock<Page>>> {
        self.pages.get(&(space, page_no)).map(|p| Arc::clone(&p))
    }

    /// Drop the frame from the pool. The caller is responsible for having
    /// torn down any hash entries first.
    pub fn remove_page(&self, space: SpaceId, page_no: PageNo) -> Option<Arc<RwLock<Page>>> {
        self.pages.remove(&(space, page_no)).map(|(_, p)| p)
    }

    /// Current modify clock of a page, if it is in the pool.
    pub fn page_modify_clock(&self, space: SpaceId, page_no: PageNo) -> Option<u64> {
        self.get_page(space, page_no).map(|p| p.read().modify_clock())
    }

    pub fn n_pages(&self) -> usize {
        self.pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Value;
    use crate::record::RecField;

    #[test]
    fn test_create_get_remove() {
        let pool = BufferPool::new();
        pool.create_page(0, 5, 1);
        assert!(pool.get_page(0, 5).is_some());
        assert!(pool.get_page(0, 6).is_none());
        pool.remove_page(0, 5);
        assert!(pool.get_page(0, 5).is_none());
    }

    #[test]
    fn test_page_modify_clock_via_pool() {
        let pool = BufferPool::new();
        let page = pool.create_page(0, 5, 1);
        assert_eq!(pool.page_modify_clock(0, 5), Some(0));
        page.write().append_record(vec![RecField::new(Value::Integer(1))]);
        assert_eq!(pool.page_modify_clock(0, 5), Some(1));
    }
}
