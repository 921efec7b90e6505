//! LRU-K replacement policy: evicts the frame whose backward K-distance is
//! largest, falling back to classical LRU among frames with fewer than K
//! recorded accesses.

use std::collections::{HashMap, VecDeque};
use std::io;

use crate::FrameId;

#[derive(Debug)]
struct LruKNode {
    /// Last K access timestamps, oldest first.
    history: VecDeque<u64>,
    is_evictable: bool,
}

pub struct LruKReplacer {
    nodes: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
    curr_size: usize,
    capacity: usize,
    k: usize,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            nodes: HashMap::new(),
            current_timestamp: 0,
            curr_size: 0,
            capacity,
            k,
        }
    }

    fn check_frame(&self, frame_id: FrameId) -> io::Result<()> {
        if frame_id >= self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame id {frame_id} out of range"),
            ));
        }
        Ok(())
    }

    /// Stamps an access for the frame, creating its history on first sight.
    /// History is trimmed to the last K timestamps.
    pub fn record_access(&mut self, frame_id: FrameId) -> io::Result<()> {
        self.check_frame(frame_id)?;
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        let node = self.nodes.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::new(),
            is_evictable: false,
        });
        if node.history.len() == self.k {
            node.history.pop_front();
        }
        node.history.push_back(timestamp);
        Ok(())
    }

    /// Flips the evictable flag, keeping the evictable count in sync.
    /// Untracked frames are left alone.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> io::Result<()> {
        self.check_frame(frame_id)?;
        if let Some(node) = self.nodes.get_mut(&frame_id) {
            if node.is_evictable != evictable {
                node.is_evictable = evictable;
                if evictable {
                    self.curr_size += 1;
                } else {
                    self.curr_size -= 1;
                }
            }
        }
        Ok(())
    }

    /// Picks the victim with the largest backward K-distance and forgets its
    /// history. Frames with fewer than K accesses have infinite distance and
    /// win outright; ties among them go to the earliest last access
    /// (classical LRU). Among full histories, the oldest K-th-most-recent
    /// access wins.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in &self.nodes {
            if !node.is_evictable {
                continue;
            }
            let infinite = node.history.len() < self.k;
            let key = if infinite {
                *node.history.back().expect("history is never empty")
            } else {
                *node.history.front().expect("history is never empty")
            };
            let better = match victim {
                None => true,
                Some((_, best_infinite, best_key)) => match (infinite, best_infinite) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => key < best_key,
                },
            };
            if better {
                victim = Some((frame_id, infinite, key));
            }
        }

        let (frame_id, _, _) = victim?;
        self.nodes.remove(&frame_id);
        self.curr_size -= 1;
        Some(frame_id)
    }

    /// Drops a specific frame regardless of its distance. Removing a
    /// non-evictable frame is a caller error; removing an untracked frame is
    /// a no-op.
    pub fn remove(&mut self, frame_id: FrameId) -> io::Result<()> {
        self.check_frame(frame_id)?;
        match self.nodes.get(&frame_id) {
            None => Ok(()),
            Some(node) if !node.is_evictable => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame {frame_id} is not evictable"),
            )),
            Some(_) => {
                self.nodes.remove(&frame_id);
                self.curr_size -= 1;
                Ok(())
            }
        }
    }

    /// Number of evictable frames currently tracked.
    pub fn size(&self) -> usize {
        self.curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_by_backward_k_distance() {
        let mut replacer = LruKReplacer::new(7, 2);

        for frame in [1, 2, 3, 4, 1] {
            replacer.record_access(frame).unwrap();
        }
        replacer.record_access(1).unwrap();
        for frame in 1..=4 {
            replacer.set_evictable(frame, true).unwrap();
        }
        assert_eq!(replacer.size(), 4);

        // Frames 2, 3, 4 have fewer than two accesses (infinite distance);
        // the earliest of them goes first. Frame 1 has a full history.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn full_histories_compare_by_kth_recent_access() {
        let mut replacer = LruKReplacer::new(4, 2);

        // Frame 0: accesses at 0, 3 -> K-th recent = 0.
        // Frame 1: accesses at 1, 2 -> K-th recent = 1.
        replacer.record_access(0).unwrap();
        replacer.record_access(1).unwrap();
        replacer.record_access(1).unwrap();
        replacer.record_access(0).unwrap();
        replacer.set_evictable(0, true).unwrap();
        replacer.set_evictable(1, true).unwrap();

        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn non_evictable_frames_are_skipped() {
        let mut replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0).unwrap();
        replacer.record_access(1).unwrap();
        replacer.set_evictable(0, false).unwrap();
        replacer.set_evictable(1, true).unwrap();

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn history_is_trimmed_to_k() {
        let mut replacer = LruKReplacer::new(4, 2);

        // Old accesses of frame 0 beyond the last two must not count.
        replacer.record_access(0).unwrap();
        replacer.record_access(0).unwrap();
        replacer.record_access(1).unwrap();
        replacer.record_access(1).unwrap();
        replacer.record_access(0).unwrap();
        // Frame 0 history: {1, 4}; frame 1 history: {2, 3}.
        replacer.set_evictable(0, true).unwrap();
        replacer.set_evictable(1, true).unwrap();

        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn rejects_out_of_range_frames() {
        let mut replacer = LruKReplacer::new(2, 2);
        assert!(replacer.record_access(2).is_err());
        assert!(replacer.set_evictable(9, true).is_err());
        assert!(replacer.remove(5).is_err());
    }

    #[test]
    fn remove_refuses_non_evictable_frames() {
        let mut replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0).unwrap();
        assert!(replacer.remove(0).is_err());

        replacer.set_evictable(0, true).unwrap();
        replacer.remove(0).unwrap();
        assert_eq!(replacer.size(), 0);
        // Untracked now, second remove is a no-op.
        replacer.remove(0).unwrap();
    }

    #[test]
    fn set_evictable_is_idempotent_on_size() {
        let mut replacer = LruKReplacer::new(2, 2);
        replacer.record_access(0).unwrap();
        replacer.set_evictable(0, true).unwrap();
        replacer.set_evictable(0, true).unwrap();
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(0, false).unwrap();
        replacer.set_evictable(0, false).unwrap();
        assert_eq!(replacer.size(), 0);
    }
}
