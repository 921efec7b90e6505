//! Persistent extendible hash index. A header page fans out over directory
//! pages by the high bits of the hash; each directory maps the low
//! `global_depth` bits to bucket pages that hold the entries. Buckets split
//! on overflow and merge with their split image when emptied.

use std::hash::Hasher;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use twox_hash::XxHash64;

use crate::buffer_pool::BufferPoolManager;
use crate::hash_page::{EntryCodec, KeyComparator};
use crate::page_guard::WritePageGuard;
use crate::{PageId, INVALID_PAGE_ID};

/// Default key hash: XxHash64 over the key's fixed encoding, truncated.
pub fn default_hash<K: EntryCodec>(key: &K) -> u32 {
    let mut buf = vec![0u8; K::ENCODED_LEN];
    key.encode_into(&mut buf);
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&buf);
    hasher.finish() as u32
}

/// Disk-backed hash map over `(K, V)` with a pluggable comparator and hash
/// function. A single mutex serializes writers; readers crab down
/// header → directory → bucket on shared latches, releasing each parent
/// before fetching its child.
pub struct DiskHashIndex<K, V, C> {
    bpm: Arc<BufferPoolManager>,
    cmp: C,
    hash_fn: fn(&K) -> u32,
    header_page_id: PageId,
    directory_max_depth: u32,
    bucket_max_size: u32,
    latch: Mutex<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> DiskHashIndex<K, V, C>
where
    K: EntryCodec,
    V: EntryCodec,
    C: KeyComparator<K>,
{
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        cmp: C,
        hash_fn: fn(&K) -> u32,
        header_max_depth: u32,
        directory_max_depth: u32,
        bucket_max_size: u32,
    ) -> io::Result<Self> {
        let header_page_id = {
            let mut guard = bpm.new_page_guarded()?.upgrade_write();
            guard.init_hash_header(header_max_depth);
            guard.page_id()
        };
        crate::stratum_debug_log!(
            "[DiskHashIndex::new] header page {header_page_id}, dir depth {directory_max_depth}, bucket size {bucket_max_size}"
        );
        Ok(Self {
            bpm,
            cmp,
            hash_fn,
            header_page_id,
            directory_max_depth,
            bucket_max_size,
            latch: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    /// Point lookup. Parent guards are dropped before the child page is
    /// fetched, so readers never hold more than one latch.
    pub fn get(&self, key: &K) -> io::Result<Option<V>> {
        let hash = self.hash(key);

        let directory_page_id = {
            let header = self.bpm.fetch_page_read(self.header_page_id)?;
            let idx = header.header_directory_index(hash);
            header.header_directory_page_id(idx)
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let bucket_page_id = {
            let directory = self.bpm.fetch_page_read(directory_page_id)?;
            let idx = directory.dir_bucket_index(hash);
            directory.dir_bucket_page_id(idx)
        };
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let bucket = self.bpm.fetch_page_read(bucket_page_id)?;
        Ok(bucket.bucket_lookup::<K, V, C>(key, &self.cmp))
    }

    /// Inserts the pair. Returns `Ok(false)` for a duplicate key, or when
    /// splitting can no longer make room (directory exhausted); empty
    /// buckets created by the failed attempt are merged away.
    pub fn insert(&self, key: &K, value: &V) -> io::Result<bool> {
        let _writer = self.latch.lock();

        if self.get(key)?.is_some() {
            return Ok(false);
        }
        let hash = self.hash(key);

        let directory_page_id = {
            let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
            let idx = header.header_directory_index(hash);
            let mut directory_page_id = header.header_directory_page_id(idx);
            if directory_page_id == INVALID_PAGE_ID {
                directory_page_id = self.new_directory()?;
                header.header_set_directory_page_id(idx, directory_page_id);
            }
            directory_page_id
        };

        let mut directory = self.bpm.fetch_page_write(directory_page_id)?;
        loop {
            let bucket_idx = directory.dir_bucket_index(hash);
            let bucket_page_id = directory.dir_bucket_page_id(bucket_idx);
            {
                let mut bucket = self.bpm.fetch_page_write(bucket_page_id)?;
                if bucket.bucket_insert::<K, V, C>(key, value, &self.cmp) {
                    return Ok(true);
                }
            }
            if !self.split_bucket(&mut directory, bucket_idx)? {
                self.merge_empty_buckets(&mut directory)?;
                return Ok(false);
            }
        }
    }

    /// Removes the key. An emptied bucket is merged with its split image,
    /// shrinking the directory where possible.
    pub fn remove(&self, key: &K) -> io::Result<bool> {
        let _writer = self.latch.lock();

        let hash = self.hash(key);
        let directory_page_id = {
            let header = self.bpm.fetch_page_read(self.header_page_id)?;
            let idx = header.header_directory_index(hash);
            header.header_directory_page_id(idx)
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut directory = self.bpm.fetch_page_write(directory_page_id)?;
        let bucket_idx = directory.dir_bucket_index(hash);
        let bucket_page_id = directory.dir_bucket_page_id(bucket_idx);
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let emptied = {
            let mut bucket = self.bpm.fetch_page_write(bucket_page_id)?;
            if !bucket.bucket_remove::<K, V, C>(key, &self.cmp) {
                return Ok(false);
            }
            bucket.bucket_is_empty()
        };
        if emptied {
            self.try_merge(&mut directory, bucket_idx)?;
        }
        Ok(true)
    }

    /// Creates a directory page with a single empty bucket at slot 0.
    fn new_directory(&self) -> io::Result<PageId> {
        let bucket_page_id = {
            let mut bucket = self.bpm.new_page_guarded()?.upgrade_write();
            bucket.init_hash_bucket(self.bucket_max_size);
            bucket.page_id()
        };
        let mut directory = self.bpm.new_page_guarded()?.upgrade_write();
        directory.init_hash_directory(self.directory_max_depth);
        directory.dir_set_local_depth(0, 0);
        directory.dir_set_bucket_page_id(0, bucket_page_id);
        Ok(directory.page_id())
    }

    /// Splits the overflowing bucket once, growing the directory when the
    /// bucket is already at global depth. Returns `Ok(false)` when the
    /// directory cannot grow further.
    fn split_bucket(
        &self,
        directory: &mut WritePageGuard<'_>,
        bucket_idx: usize,
    ) -> io::Result<bool> {
        let mut global_depth = directory.dir_global_depth();
        let local_depth = directory.dir_local_depth(bucket_idx);
        if local_depth == global_depth {
            if global_depth == directory.dir_max_depth() {
                return Ok(false);
            }
            directory.dir_incr_global_depth();
            global_depth += 1;
        }

        let old_page_id = directory.dir_bucket_page_id(bucket_idx);
        let new_page_id = {
            let mut bucket = self.bpm.new_page_guarded()?.upgrade_write();
            bucket.init_hash_bucket(self.bucket_max_size);
            bucket.page_id()
        };
        crate::stratum_debug_log!(
            "[DiskHashIndex::split] bucket {old_page_id} -> {new_page_id} at slot {bucket_idx}"
        );

        // Deepen every slot of the old bucket's group and deal them between
        // the two buckets by bit `local_depth` of the slot index.
        let local_mask = directory.dir_local_depth_mask(bucket_idx) as usize;
        for i in 0..(1usize << (global_depth - local_depth)) {
            let idx = (bucket_idx & local_mask) + (i << local_depth);
            directory.dir_set_local_depth(idx, local_depth + 1);
            let target = if i & 1 == 0 { old_page_id } else { new_page_id };
            directory.dir_set_bucket_page_id(idx, target);
        }

        // Rehash the old bucket's entries into whichever side their
        // distinguishing bit selects.
        let mut old_bucket = self.bpm.fetch_page_write(old_page_id)?;
        let mut new_bucket = self.bpm.fetch_page_write(new_page_id)?;
        let mut idx = 0;
        while idx < old_bucket.bucket_size() as usize {
            let (entry_key, entry_value) = old_bucket.bucket_entry::<K, V>(idx);
            let entry_hash = self.hash(&entry_key);
            if entry_hash & (1u32 << local_depth) != 0 {
                new_bucket.bucket_insert::<K, V, C>(&entry_key, &entry_value, &self.cmp);
                old_bucket.bucket_remove_at::<K, V>(idx);
            } else {
                idx += 1;
            }
        }
        Ok(true)
    }

    /// Folds the empty bucket at `bucket_idx` into its split image, then
    /// shrinks the directory and keeps cascading while the surviving bucket
    /// is itself empty.
    fn try_merge(
        &self,
        directory: &mut WritePageGuard<'_>,
        mut bucket_idx: usize,
    ) -> io::Result<()> {
        loop {
            let local_depth = directory.dir_local_depth(bucket_idx);
            if local_depth == 0 {
                return Ok(());
            }
            let empty_page_id = directory.dir_bucket_page_id(bucket_idx);
            {
                let bucket = self.bpm.fetch_page_read(empty_page_id)?;
                if !bucket.bucket_is_empty() {
                    return Ok(());
                }
            }

            let image_idx = bucket_idx ^ (1usize << (local_depth - 1));
            if directory.dir_local_depth(image_idx) != local_depth {
                return Ok(());
            }
            let survivor_page_id = directory.dir_bucket_page_id(image_idx);
            if survivor_page_id == empty_page_id {
                return Ok(());
            }
            crate::stratum_debug_log!(
                "[DiskHashIndex::merge] bucket {empty_page_id} into {survivor_page_id}"
            );

            for idx in 0..directory.dir_size() {
                let page_id = directory.dir_bucket_page_id(idx);
                if page_id == empty_page_id || page_id == survivor_page_id {
                    directory.dir_set_local_depth(idx, local_depth - 1);
                    directory.dir_set_bucket_page_id(idx, survivor_page_id);
                }
            }
            self.bpm.delete_page(empty_page_id)?;

            while directory.dir_can_shrink() {
                directory.dir_decr_global_depth();
            }
            bucket_idx = image_idx & directory.dir_global_depth_mask() as usize;
        }
    }

    /// Sweeps the directory for empty buckets left behind by a failed
    /// insert attempt and merges them away.
    fn merge_empty_buckets(&self, directory: &mut WritePageGuard<'_>) -> io::Result<()> {
        loop {
            let mut merged = false;
            for idx in 0..directory.dir_size() {
                let page_id = directory.dir_bucket_page_id(idx);
                if page_id == INVALID_PAGE_ID {
                    continue;
                }
                let empty = {
                    let bucket = self.bpm.fetch_page_read(page_id)?;
                    bucket.bucket_is_empty()
                };
                if empty && directory.dir_local_depth(idx) > 0 {
                    let before = directory.dir_bucket_page_id(idx);
                    self.try_merge(directory, idx)?;
                    if directory.dir_bucket_page_id(idx) != before {
                        merged = true;
                        break;
                    }
                }
            }
            if !merged {
                return Ok(());
            }
        }
    }

    /// Global depth of the key space's directory (slot 0 of the header).
    /// Introspection for tests and tooling.
    pub fn global_depth(&self) -> io::Result<u32> {
        let directory_page_id = {
            let header = self.bpm.fetch_page_read(self.header_page_id)?;
            header.header_directory_page_id(0)
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(0);
        }
        let directory = self.bpm.fetch_page_read(directory_page_id)?;
        Ok(directory.dir_global_depth())
    }

    /// Local depth of the bucket at a directory slot. Introspection for
    /// tests and tooling.
    pub fn local_depth(&self, bucket_idx: usize) -> io::Result<u32> {
        let directory_page_id = {
            let header = self.bpm.fetch_page_read(self.header_page_id)?;
            header.header_directory_page_id(0)
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(0);
        }
        let directory = self.bpm.fetch_page_read(directory_page_id)?;
        Ok(directory.dir_local_depth(bucket_idx))
    }

    /// Whether the bucket at a directory slot holds no entries.
    pub fn bucket_empty(&self, bucket_idx: usize) -> io::Result<bool> {
        let directory_page_id = {
            let header = self.bpm.fetch_page_read(self.header_page_id)?;
            header.header_directory_page_id(0)
        };
        if directory_page_id == INVALID_PAGE_ID {
            return Ok(true);
        }
        let bucket_page_id = {
            let directory = self.bpm.fetch_page_read(directory_page_id)?;
            directory.dir_bucket_page_id(bucket_idx)
        };
        if bucket_page_id == INVALID_PAGE_ID {
            return Ok(true);
        }
        let bucket = self.bpm.fetch_page_read(bucket_page_id)?;
        Ok(bucket.bucket_is_empty())
    }
}
