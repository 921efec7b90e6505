//! Serializes page I/O through a request queue drained by a single worker
//! thread, so callers observe a linear order of disk operations.

use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::disk::DiskManager;
use crate::{PageData, PageId};

/// One unit of work for the disk worker. The completion sender fires exactly
/// once when the I/O is finished, carrying the result; disk errors reach the
/// caller without tearing down the worker.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        completion: Sender<io::Result<Box<PageData>>>,
    },
    Write {
        page_id: PageId,
        data: Box<PageData>,
        completion: Sender<io::Result<()>>,
    },
}

/// Owns the request queue and the worker thread. The worker is spawned in the
/// constructor and joined on shutdown; a `None` on the queue tells it to exit.
pub struct DiskScheduler {
    queue: Sender<Option<DiskRequest>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiskScheduler {
    pub fn new(disk: DiskManager) -> Self {
        let (queue, requests) = channel();
        let worker = thread::spawn(move || Self::run_worker(disk, requests));
        Self {
            queue,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn run_worker(mut disk: DiskManager, requests: Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = requests.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    crate::stratum_debug_log!("[DiskScheduler] read page {page_id}");
                    let _ = completion.send(disk.read_page(page_id));
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    crate::stratum_debug_log!("[DiskScheduler] write page {page_id}");
                    let _ = completion.send(disk.write_page(page_id, &data));
                }
            }
        }
    }

    /// Enqueues a request and returns immediately.
    pub fn schedule(&self, request: DiskRequest) {
        let _ = self.queue.send(Some(request));
    }

    /// Schedules a read and blocks on its completion.
    pub fn read_page(&self, page_id: PageId) -> io::Result<Box<PageData>> {
        let (completion, done) = channel();
        self.schedule(DiskRequest::Read {
            page_id,
            completion,
        });
        done.recv()
            .map_err(|_| io::Error::other("disk worker exited"))?
    }

    /// Schedules a write and blocks on its completion.
    pub fn write_page(&self, page_id: PageId, data: Box<PageData>) -> io::Result<()> {
        let (completion, done) = channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            completion,
        });
        done.recv()
            .map_err(|_| io::Error::other("disk worker exited"))?
    }

    /// Stops the worker after all previously scheduled requests have been
    /// served; the sentinel sits behind them in the queue. Safe to call more
    /// than once.
    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().take() {
            let _ = self.queue.send(None);
            let _ = worker.join();
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
