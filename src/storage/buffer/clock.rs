//! Clock replacement.
//!
//! Frames sit on a circle swept by a single hand. Eviction starts at the hand,
//! skips frames that are pinned, picks the first evictable one and leaves the
//! hand just past it. A sweep visits every frame at most once, so a fully
//! pinned pool is reported instead of spun on.

use super::replacer::{FrameId, Replacer};

#[derive(Debug)]
pub struct ClockReplacer {
    /// Whether each frame may currently be evicted.
    evictable: Vec<bool>,
    /// Next frame the sweep examines. Always `< evictable.len()` when non-empty.
    hand: usize,
    /// Number of `true` entries in `evictable`.
    size: usize,
}

impl ClockReplacer {
    /// Creates a replacer over `num_frames` frames, all evictable.
    pub fn new(num_frames: usize) -> Self {
        Self {
            evictable: vec![true; num_frames],
            hand: 0,
            size: num_frames,
        }
    }

    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl Replacer for ClockReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let num_frames = self.evictable.len();
        for _ in 0..num_frames {
            let frame_id = self.hand;
            self.hand = (self.hand + 1) % num_frames;
            if self.evictable[frame_id] {
                self.evictable[frame_id] = false;
                self.size -= 1;
                return Some(frame_id);
            }
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        if let Some(evictable) = self.evictable.get_mut(frame_id) {
            if *evictable {
                *evictable = false;
                self.size -= 1;
            }
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if let Some(evictable) = self.evictable.get_mut(frame_id) {
            if !*evictable {
                *evictable = true;
                self.size += 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.size
    }
}
