//! Typed views over raw pages for the extendible hash index.
//!
//! Header page layout: `max_depth (4B), directory_page_ids[2^max_depth] (4B
//! each)`. Directory page layout: `max_depth (4B), global_depth (4B),
//! local_depths[2^max_depth] (1B each), bucket_page_ids[2^max_depth] (4B
//! each)`. Bucket page layout: `size (4B), max_size (4B), entries[max_size]`,
//! each entry a key/value pair in its fixed encoding.

use std::cmp::Ordering;

use crate::page::Page;
use crate::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};

/// Upper bound on the header's radix so its id array fits one page.
pub const HASH_HEADER_MAX_DEPTH: u32 = 9;
/// Upper bound on a directory's depth so its two arrays fit one page.
pub const HASH_DIRECTORY_MAX_DEPTH: u32 = 9;

const HEADER_IDS_OFFSET: usize = 4;
const DIRECTORY_LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_ENTRIES_OFFSET: usize = 8;

/// Fixed-width byte encoding used for keys and values stored in bucket
/// entries.
pub trait EntryCodec: Copy {
    const ENCODED_LEN: usize;
    fn encode_into(&self, buf: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Self;
}

impl EntryCodec for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_be_bytes());
    }

    fn decode_from(buf: &[u8]) -> Self {
        i64::from_be_bytes(buf[..8].try_into().expect("encoded i64 is 8 bytes"))
    }
}

impl EntryCodec for Rid {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        buf[6..8].fill(0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        Rid {
            page_id: PageId::from_le_bytes(buf[..4].try_into().expect("4-byte page id")),
            slot: u16::from_le_bytes(buf[4..6].try_into().expect("2-byte slot")),
        }
    }
}

/// Comparator capability over index keys.
pub trait KeyComparator<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Comparator for keys with a natural order.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdComparator;

impl<K: Ord> KeyComparator<K> for OrdComparator {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Number of entries a bucket page can hold for the given entry width.
pub fn bucket_capacity(entry_len: usize) -> u32 {
    ((PAGE_SIZE - BUCKET_ENTRIES_OFFSET) / entry_len) as u32
}

// Header page view: first-level radix on the high bits of the hash.
impl Page {
    pub fn init_hash_header(&mut self, max_depth: u32) {
        debug_assert!(max_depth <= HASH_HEADER_MAX_DEPTH);
        self.data.fill(0);
        self.write_u32_at(0, max_depth);
        for idx in 0..(1usize << max_depth) {
            self.write_u32_at(HEADER_IDS_OFFSET + idx * 4, INVALID_PAGE_ID);
        }
    }

    pub fn header_max_depth(&self) -> u32 {
        self.read_u32_at(0)
    }

    /// Directory slot for a hash: its top `max_depth` bits.
    pub fn header_directory_index(&self, hash: u32) -> usize {
        let max_depth = self.header_max_depth();
        if max_depth == 0 {
            return 0;
        }
        (hash >> (32 - max_depth)) as usize
    }

    pub fn header_directory_page_id(&self, idx: usize) -> PageId {
        self.read_u32_at(HEADER_IDS_OFFSET + idx * 4)
    }

    pub fn header_set_directory_page_id(&mut self, idx: usize, page_id: PageId) {
        self.write_u32_at(HEADER_IDS_OFFSET + idx * 4, page_id);
    }
}

// Directory page view.
impl Page {
    pub fn init_hash_directory(&mut self, max_depth: u32) {
        debug_assert!(max_depth <= HASH_DIRECTORY_MAX_DEPTH);
        self.data.fill(0);
        self.write_u32_at(0, max_depth);
        self.write_u32_at(4, 0);
        for idx in 0..(1usize << max_depth) {
            self.dir_set_bucket_page_id_raw(idx, INVALID_PAGE_ID);
        }
    }

    pub fn dir_max_depth(&self) -> u32 {
        self.read_u32_at(0)
    }

    pub fn dir_global_depth(&self) -> u32 {
        self.read_u32_at(4)
    }

    /// Live slot count: `2^global_depth`.
    pub fn dir_size(&self) -> usize {
        1usize << self.dir_global_depth()
    }

    pub fn dir_global_depth_mask(&self) -> u32 {
        (1u32 << self.dir_global_depth()) - 1
    }

    /// Bucket slot for a hash: its low `global_depth` bits.
    pub fn dir_bucket_index(&self, hash: u32) -> usize {
        (hash & self.dir_global_depth_mask()) as usize
    }

    pub fn dir_local_depth(&self, idx: usize) -> u32 {
        self.read_u8_at(DIRECTORY_LOCAL_DEPTHS_OFFSET + idx) as u32
    }

    pub fn dir_set_local_depth(&mut self, idx: usize, depth: u32) {
        self.write_u8_at(DIRECTORY_LOCAL_DEPTHS_OFFSET + idx, depth as u8);
    }

    pub fn dir_local_depth_mask(&self, idx: usize) -> u32 {
        (1u32 << self.dir_local_depth(idx)) - 1
    }

    fn bucket_ids_offset(&self) -> usize {
        DIRECTORY_LOCAL_DEPTHS_OFFSET + (1usize << self.dir_max_depth())
    }

    pub fn dir_bucket_page_id(&self, idx: usize) -> PageId {
        self.read_u32_at(self.bucket_ids_offset() + idx * 4)
    }

    fn dir_set_bucket_page_id_raw(&mut self, idx: usize, page_id: PageId) {
        let offset = self.bucket_ids_offset() + idx * 4;
        self.write_u32_at(offset, page_id);
    }

    pub fn dir_set_bucket_page_id(&mut self, idx: usize, page_id: PageId) {
        self.dir_set_bucket_page_id_raw(idx, page_id);
    }

    /// Doubles the slot array by duplicating it into the upper half.
    pub fn dir_incr_global_depth(&mut self) {
        let half = self.dir_size();
        debug_assert!((half << 1) <= (1usize << self.dir_max_depth()));

        let depths = DIRECTORY_LOCAL_DEPTHS_OFFSET;
        self.data
            .copy_within(depths..depths + half, depths + half);
        let ids = self.bucket_ids_offset();
        self.data
            .copy_within(ids..ids + half * 4, ids + half * 4);
        let global_depth = self.dir_global_depth();
        self.write_u32_at(4, global_depth + 1);
    }

    /// Halves the slot array, clearing the dropped upper half.
    pub fn dir_decr_global_depth(&mut self) {
        let global_depth = self.dir_global_depth();
        debug_assert!(global_depth > 0);
        self.write_u32_at(4, global_depth - 1);

        let half = self.dir_size();
        for idx in half..half * 2 {
            self.dir_set_local_depth(idx, 0);
            self.dir_set_bucket_page_id_raw(idx, INVALID_PAGE_ID);
        }
    }

    /// The directory may shrink when no slot uses its full depth.
    pub fn dir_can_shrink(&self) -> bool {
        if self.dir_global_depth() == 0 {
            return false;
        }
        (0..self.dir_size()).all(|idx| self.dir_local_depth(idx) < self.dir_global_depth())
    }
}

// Bucket page view, generic over the stored key/value encodings.
impl Page {
    pub fn init_hash_bucket(&mut self, max_size: u32) {
        self.data.fill(0);
        self.write_u32_at(0, 0);
        self.write_u32_at(4, max_size);
    }

    pub fn bucket_size(&self) -> u32 {
        self.read_u32_at(0)
    }

    pub fn bucket_max_size(&self) -> u32 {
        self.read_u32_at(4)
    }

    pub fn bucket_is_empty(&self) -> bool {
        self.bucket_size() == 0
    }

    pub fn bucket_is_full(&self) -> bool {
        self.bucket_size() >= self.bucket_max_size()
    }

    fn entry_offset<K: EntryCodec, V: EntryCodec>(idx: usize) -> usize {
        BUCKET_ENTRIES_OFFSET + idx * (K::ENCODED_LEN + V::ENCODED_LEN)
    }

    pub fn bucket_entry<K: EntryCodec, V: EntryCodec>(&self, idx: usize) -> (K, V) {
        let offset = Self::entry_offset::<K, V>(idx);
        let key = K::decode_from(&self.data[offset..offset + K::ENCODED_LEN]);
        let value = V::decode_from(
            &self.data[offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + V::ENCODED_LEN],
        );
        (key, value)
    }

    pub fn bucket_key_at<K: EntryCodec, V: EntryCodec>(&self, idx: usize) -> K {
        self.bucket_entry::<K, V>(idx).0
    }

    pub fn bucket_lookup<K, V, C>(&self, key: &K, cmp: &C) -> Option<V>
    where
        K: EntryCodec,
        V: EntryCodec,
        C: KeyComparator<K>,
    {
        for idx in 0..self.bucket_size() as usize {
            let (stored, value) = self.bucket_entry::<K, V>(idx);
            if cmp.compare(&stored, key) == Ordering::Equal {
                return Some(value);
            }
        }
        None
    }

    /// Appends the pair unless the bucket is full or the key already exists.
    pub fn bucket_insert<K, V, C>(&mut self, key: &K, value: &V, cmp: &C) -> bool
    where
        K: EntryCodec,
        V: EntryCodec,
        C: KeyComparator<K>,
    {
        if self.bucket_is_full() {
            return false;
        }
        if self.bucket_lookup::<K, V, C>(key, cmp).is_some() {
            return false;
        }
        let size = self.bucket_size() as usize;
        let offset = Self::entry_offset::<K, V>(size);
        key.encode_into(&mut self.data[offset..offset + K::ENCODED_LEN]);
        value.encode_into(
            &mut self.data[offset + K::ENCODED_LEN..offset + K::ENCODED_LEN + V::ENCODED_LEN],
        );
        self.write_u32_at(0, size as u32 + 1);
        true
    }

    /// Removes the entry at `idx`, shifting later entries down.
    pub fn bucket_remove_at<K: EntryCodec, V: EntryCodec>(&mut self, idx: usize) {
        let size = self.bucket_size() as usize;
        debug_assert!(idx < size);
        let entry_len = K::ENCODED_LEN + V::ENCODED_LEN;
        let from = Self::entry_offset::<K, V>(idx + 1);
        let to = Self::entry_offset::<K, V>(size);
        self.data.copy_within(from..to, from - entry_len);
        self.write_u32_at(0, size as u32 - 1);
    }

    pub fn bucket_remove<K, V, C>(&mut self, key: &K, cmp: &C) -> bool
    where
        K: EntryCodec,
        V: EntryCodec,
        C: KeyComparator<K>,
    {
        for idx in 0..self.bucket_size() as usize {
            let stored = self.bucket_key_at::<K, V>(idx);
            if cmp.compare(&stored, key) == Ordering::Equal {
                self.bucket_remove_at::<K, V>(idx);
                return true;
            }
        }
        false
    }
}
