use crate::{PageData, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Logical metadata of one stored tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    /// Commit timestamp, or the id of the live writer when `>= TXN_START_ID`.
    pub ts: u64,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(ts: u64, is_deleted: bool) -> Self {
        TupleMeta { ts, is_deleted }
    }
}

/// Persisted form of `TupleMeta`: 8 bytes of timestamp, one deletion byte,
/// padding to 16.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TupleMetaData {
    ts: u64,
    is_deleted: u8,
    _padding: [u8; 7],
}

pub const TUPLE_META_SIZE: usize = std::mem::size_of::<TupleMetaData>();

/// Header of a slotted table page, stored at the front of the page.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TablePageHeader {
    next_page_id: PageId,
    tuple_count: u16,
    /// First free byte for record payloads, growing towards the page end.
    free_start: u16,
}

const TABLE_PAGE_HEADER_SIZE: usize = std::mem::size_of::<TablePageHeader>();

/// One entry of the slot array. The array grows backwards from the page end:
/// slot `i` lives at `PAGE_SIZE - (i + 1) * SLOT_SIZE`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TupleSlot {
    offset: u16,
    /// Reserved length of the record (metadata plus payload). In-place
    /// updates may shrink the payload but never outgrow this reservation.
    length: u16,
}

const SLOT_SIZE: usize = std::mem::size_of::<TupleSlot>();

/// A fixed-size page of raw bytes. Structured views (table page, hash index
/// pages) are layered on top through typed accessors.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: PageData,
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Page {
            id,
            data: [0; PAGE_SIZE],
        }
    }

    fn read_at<T: Copy>(&self, offset: usize) -> T {
        debug_assert!(offset + std::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe { std::ptr::read_unaligned(self.data.as_ptr().add(offset) as *const T) }
    }

    fn write_at<T: Copy>(&mut self, offset: usize, value: T) {
        debug_assert!(offset + std::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe {
            std::ptr::write_unaligned(self.data.as_mut_ptr().add(offset) as *mut T, value);
        }
    }

    pub(crate) fn read_u32_at(&self, offset: usize) -> u32 {
        self.read_at::<u32>(offset)
    }

    pub(crate) fn write_u32_at(&mut self, offset: usize, value: u32) {
        self.write_at::<u32>(offset, value);
    }

    pub(crate) fn read_u8_at(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub(crate) fn write_u8_at(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }
}

// Slotted table page view.
impl Page {
    /// Formats this page as an empty table page.
    pub fn init_table_page(&mut self) {
        self.write_table_header(&TablePageHeader {
            next_page_id: INVALID_PAGE_ID,
            tuple_count: 0,
            free_start: TABLE_PAGE_HEADER_SIZE as u16,
        });
    }

    fn read_table_header(&self) -> TablePageHeader {
        self.read_at::<TablePageHeader>(0)
    }

    fn write_table_header(&mut self, header: &TablePageHeader) {
        self.write_at::<TablePageHeader>(0, *header);
    }

    pub fn next_page_id(&self) -> PageId {
        self.read_table_header().next_page_id
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        let mut header = self.read_table_header();
        header.next_page_id = next_page_id;
        self.write_table_header(&header);
    }

    pub fn tuple_count(&self) -> u16 {
        self.read_table_header().tuple_count
    }

    fn slot_offset(slot: u16) -> usize {
        PAGE_SIZE - (slot as usize + 1) * SLOT_SIZE
    }

    fn read_slot(&self, slot: u16) -> TupleSlot {
        self.read_at::<TupleSlot>(Self::slot_offset(slot))
    }

    fn write_slot(&mut self, slot: u16, entry: &TupleSlot) {
        self.write_at::<TupleSlot>(Self::slot_offset(slot), *entry);
    }

    fn valid_slot(&self, slot: u16) -> Option<TupleSlot> {
        if slot >= self.tuple_count() {
            return None;
        }
        Some(self.read_slot(slot))
    }

    /// Appends a record, returning its slot index, or `None` when the page
    /// has no room for the record plus its slot entry.
    pub fn insert_record(&mut self, meta: &TupleMeta, payload: &[u8]) -> Option<u16> {
        let record_len = TUPLE_META_SIZE + payload.len();
        let header = self.read_table_header();

        let slot_array_start =
            PAGE_SIZE.checked_sub((header.tuple_count as usize + 1) * SLOT_SIZE)?;
        let free = slot_array_start.checked_sub(header.free_start as usize)?;
        if free < record_len {
            crate::stratum_debug_log!(
                "[Page::insert_record] page {} full: need {record_len}, have {free}",
                self.id
            );
            return None;
        }

        let slot = header.tuple_count;
        let offset = header.free_start;
        self.write_slot(
            slot,
            &TupleSlot {
                offset,
                length: record_len as u16,
            },
        );
        self.write_record_meta_at(offset as usize, meta);
        let payload_start = offset as usize + TUPLE_META_SIZE;
        self.data[payload_start..payload_start + payload.len()].copy_from_slice(payload);

        self.write_table_header(&TablePageHeader {
            next_page_id: header.next_page_id,
            tuple_count: slot + 1,
            free_start: offset + record_len as u16,
        });
        Some(slot)
    }

    fn write_record_meta_at(&mut self, offset: usize, meta: &TupleMeta) {
        self.write_at::<TupleMetaData>(
            offset,
            TupleMetaData {
                ts: meta.ts,
                is_deleted: meta.is_deleted as u8,
                _padding: [0; 7],
            },
        );
    }

    pub fn record_meta(&self, slot: u16) -> Option<TupleMeta> {
        let entry = self.valid_slot(slot)?;
        let raw = self.read_at::<TupleMetaData>(entry.offset as usize);
        Some(TupleMeta {
            ts: raw.ts,
            is_deleted: raw.is_deleted != 0,
        })
    }

    pub fn set_record_meta(&mut self, slot: u16, meta: &TupleMeta) -> bool {
        let Some(entry) = self.valid_slot(slot) else {
            return false;
        };
        self.write_record_meta_at(entry.offset as usize, meta);
        true
    }

    pub fn record_payload(&self, slot: u16) -> Option<&[u8]> {
        let entry = self.valid_slot(slot)?;
        let start = entry.offset as usize + TUPLE_META_SIZE;
        let end = entry.offset as usize + entry.length as usize;
        Some(&self.data[start..end])
    }

    /// Overwrites a record's metadata and payload in place. The payload may
    /// shrink but must fit the slot's original reservation; the reservation
    /// itself never changes, so trailing bytes of a shrunk record are zeroed.
    pub fn update_record(&mut self, slot: u16, meta: &TupleMeta, payload: &[u8]) -> bool {
        let Some(entry) = self.valid_slot(slot) else {
            return false;
        };
        if TUPLE_META_SIZE + payload.len() > entry.length as usize {
            return false;
        }
        self.write_record_meta_at(entry.offset as usize, meta);
        let start = entry.offset as usize + TUPLE_META_SIZE;
        let end = entry.offset as usize + entry.length as usize;
        self.data[start..start + payload.len()].copy_from_slice(payload);
        self.data[start + payload.len()..end].fill(0);
        true
    }
}
