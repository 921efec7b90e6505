//! RAII guards coupling a buffer pool pin with an optional page latch.
//! Ownership moves with the value; dropping a guard releases its latch
//! first and its pin second, exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::buffer_pool::BufferPoolManager;
use crate::page::Page;
use crate::PageId;

/// Pin-only guard. Page access goes through the transient `read`/`write`
/// accessors, which latch just for the borrow; `write` marks the page dirty.
pub struct BasicPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page: Arc<RwLock<Page>>,
    page_id: PageId,
    is_dirty: bool,
    defused: bool,
}

impl<'a> BasicPageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, page: Arc<RwLock<Page>>, page_id: PageId) -> Self {
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
            defused: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    pub fn write(&mut self) -> parking_lot::RwLockWriteGuard<'_, Page> {
        self.is_dirty = true;
        self.page.write()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Takes the shared latch and converts this guard. The pin carries over;
    /// the caller must not already hold a latch on this page.
    pub fn upgrade_read(mut self) -> ReadPageGuard<'a> {
        let latch = self.page.read_arc();
        self.defused = true;
        ReadPageGuard {
            latch: Some(latch),
            bpm: self.bpm,
            page_id: self.page_id,
            is_dirty: self.is_dirty,
        }
    }

    /// Takes the exclusive latch and converts this guard.
    pub fn upgrade_write(mut self) -> WritePageGuard<'a> {
        let latch = self.page.write_arc();
        self.defused = true;
        WritePageGuard {
            latch: Some(latch),
            bpm: self.bpm,
            page_id: self.page_id,
            is_dirty: self.is_dirty,
        }
    }
}

impl Drop for BasicPageGuard<'_> {
    fn drop(&mut self) {
        if !self.defused {
            let _ = self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// Pin plus shared latch. Dereferences to the page for reading.
pub struct ReadPageGuard<'a> {
    latch: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    is_dirty: bool,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held until drop")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch released before the pin; an unpinned page must never be
        // latched by this guard.
        self.latch.take();
        let _ = self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Pin plus exclusive latch. Mutable access marks the page dirty.
pub struct WritePageGuard<'a> {
    latch: Option<ArcRwLockWriteGuard<RawRwLock, Page>>,
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    is_dirty: bool,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held until drop")
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        self.is_dirty = true;
        self.latch.as_mut().expect("latch held until drop")
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
        let _ = self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}
