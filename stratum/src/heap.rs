//! Heap-organized row storage over a chain of slotted table pages. RIDs are
//! stable for the life of a row; metadata and payloads update in place.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::BufferPoolManager;
use crate::page::TupleMeta;
use crate::{PageId, Rid, INVALID_PAGE_ID};

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    /// Tail of the page chain; inserts go here.
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Creates an empty heap with one table page.
    pub fn create(bpm: Arc<BufferPoolManager>) -> io::Result<Self> {
        let first_page_id = {
            let mut guard = bpm.new_page_guarded()?.upgrade_write();
            guard.init_table_page();
            guard.page_id()
        };
        crate::stratum_debug_log!("[TableHeap::create] first page {first_page_id}");
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple to the tail page, chaining a fresh page when the tail
    /// is full. Returns `None` for a payload no empty page could hold.
    pub fn insert_tuple(&self, meta: &TupleMeta, payload: &[u8]) -> io::Result<Option<Rid>> {
        let mut last_page_id = self.last_page_id.lock();

        let mut guard = self.bpm.fetch_page_write(*last_page_id)?;
        if let Some(slot) = guard.insert_record(meta, payload) {
            return Ok(Some(Rid::new(guard.page_id(), slot)));
        }

        let mut next = self.bpm.new_page_guarded()?.upgrade_write();
        next.init_table_page();
        let next_page_id = next.page_id();
        guard.set_next_page_id(next_page_id);
        drop(guard);
        *last_page_id = next_page_id;

        match next.insert_record(meta, payload) {
            Some(slot) => Ok(Some(Rid::new(next_page_id, slot))),
            None => Ok(None),
        }
    }

    pub fn get_tuple(&self, rid: Rid) -> io::Result<(TupleMeta, Vec<u8>)> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let meta = guard.record_meta(rid.slot).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no tuple at {rid:?}"),
            )
        })?;
        let payload = guard
            .record_payload(rid.slot)
            .expect("slot with metadata has a payload")
            .to_vec();
        Ok((meta, payload))
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> io::Result<TupleMeta> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        guard.record_meta(rid.slot).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no tuple at {rid:?}"),
            )
        })
    }

    /// Rewrites a tuple's metadata and payload in place. The payload must
    /// not outgrow the slot's reservation.
    pub fn update_tuple_in_place(
        &self,
        meta: &TupleMeta,
        payload: &[u8],
        rid: Rid,
    ) -> io::Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        if !guard.update_record(rid.slot, meta, payload) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("in-place update at {rid:?} does not fit the slot"),
            ));
        }
        Ok(())
    }

    pub fn update_tuple_meta(&self, meta: &TupleMeta, rid: Rid) -> io::Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        if !guard.set_record_meta(rid.slot, meta) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no tuple at {rid:?}"),
            ));
        }
        Ok(())
    }

    /// Snapshot-free iterator in RID order. The end of the scan is captured
    /// at creation, so rows appended afterwards (including by the scanning
    /// statement itself) are not visited. Visibility is the caller's
    /// concern.
    pub fn make_iterator(&self) -> io::Result<TableIterator> {
        let last_page_id = *self.last_page_id.lock();
        let stop = {
            let guard = self.bpm.fetch_page_read(last_page_id)?;
            (last_page_id, guard.tuple_count())
        };
        Ok(TableIterator {
            bpm: self.bpm.clone(),
            current_page_id: self.first_page_id,
            current_slot: 0,
            stop_page_id: stop.0,
            stop_slot_count: stop.1,
        })
    }
}

/// Yields `(rid, meta, payload)` triples in stable RID order.
pub struct TableIterator {
    bpm: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_slot: u16,
    stop_page_id: PageId,
    stop_slot_count: u16,
}

impl TableIterator {
    #[allow(clippy::type_complexity)]
    pub fn next(&mut self) -> io::Result<Option<(Rid, TupleMeta, Vec<u8>)>> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let at_stop_page = self.current_page_id == self.stop_page_id;
            if at_stop_page && self.current_slot >= self.stop_slot_count {
                return Ok(None);
            }

            let guard = self.bpm.fetch_page_read(self.current_page_id)?;
            if self.current_slot < guard.tuple_count() {
                let rid = Rid::new(self.current_page_id, self.current_slot);
                let meta = guard
                    .record_meta(self.current_slot)
                    .expect("slot below tuple_count");
                let payload = guard
                    .record_payload(self.current_slot)
                    .expect("slot below tuple_count")
                    .to_vec();
                self.current_slot += 1;
                return Ok(Some((rid, meta, payload)));
            }

            if at_stop_page {
                return Ok(None);
            }
            self.current_page_id = guard.next_page_id();
            self.current_slot = 0;
        }
    }
}
