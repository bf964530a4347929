use super::replacer::{FrameId, Replacer};
use std::collections::{HashMap, VecDeque};

/// LRU-K replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance:
/// the gap between now and its k-th most recent access. Frames with fewer
/// than k recorded accesses have infinite distance and are preferred; ties
/// among them fall back to plain LRU on the earliest recorded access.
#[derive(Debug)]
pub struct LruKReplacer {
    k: usize,
    current_timestamp: u64,
    frames: HashMap<FrameId, FrameRecord>,
}

#[derive(Debug)]
struct FrameRecord {
    /// Up to k most recent access timestamps, oldest first.
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            current_timestamp: 0,
            frames: HashMap::new(),
        }
    }
}

impl Replacer for LruKReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame_id, record) in &self.frames {
            if !record.evictable {
                continue;
            }
            let infinite = record.history.len() < self.k;
            // For the infinite class compare first-access timestamps (older
            // wins); for the finite class compare the k-th most recent access
            // (older means larger backward distance).
            let reference = record.history.front().copied().unwrap_or(0);
            let better = match victim {
                None => true,
                Some((_, best_infinite, best_reference)) => {
                    if infinite != best_infinite {
                        infinite
                    } else {
                        reference < best_reference
                    }
                }
            };
            if better {
                victim = Some((frame_id, infinite, reference));
            }
        }

        let (frame_id, _, _) = victim?;
        self.frames.remove(&frame_id);
        Some(frame_id)
    }

    fn record_access(&mut self, frame_id: FrameId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        let record = self.frames.entry(frame_id).or_insert_with(|| FrameRecord {
            history: VecDeque::new(),
            evictable: false,
        });
        record.history.push_back(timestamp);
        if record.history.len() > self.k {
            record.history.pop_front();
        }
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(record) = self.frames.get_mut(&frame_id) {
            record.evictable = evictable;
        }
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    fn size(&self) -> usize {
        self.frames.values().filter(|r| r.evictable).count()
    }
}
