use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{PageData, PageId, PAGE_SIZE};

/// Reads and writes pages of the flat database file. Page `n` lives at byte
/// offset `n * PAGE_SIZE`.
pub struct DiskManager {
    file: File,
    pub num_pages: u32,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::stratum_debug_log!("[DiskManager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, num_pages })
    }

    /// Reads one page into a fresh buffer. Reading past the end of the file
    /// yields a zeroed page, so freshly allocated pages need no formatting
    /// write before their first fetch.
    pub fn read_page(&mut self, page_id: PageId) -> io::Result<Box<PageData>> {
        let mut data: Box<PageData> = Box::new([0; PAGE_SIZE]);
        if page_id >= self.num_pages {
            return Ok(data);
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut read_so_far = 0;
        while read_so_far < PAGE_SIZE {
            let n = self.file.read(&mut data[read_so_far..])?;
            if n == 0 {
                break;
            }
            read_so_far += n;
        }
        // A short read means the tail page was never fully written; the
        // remainder stays zeroed.
        Ok(data)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &PageData) -> io::Result<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        if page_id >= self.num_pages {
            self.num_pages = page_id + 1;
        }
        Ok(())
    }
}
