//! Outbound mailbox.
//!
//! Pending writes keyed by frame name. Every enqueue draws a sequence
//! number from a session-wide counter; a flush drains all names and
//! replays the frames in that order, so the relative order of writes
//! survives the keyed storage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use simlink_core::Frame;

use super::lock;

/// How a write combines with frames already pending under the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Keep only the newest frame.
    Replace,
    /// Keep every frame in order. A `cap` of zero means unbounded.
    Append { cap: usize },
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    frame: Frame,
}

#[derive(Debug, Default)]
pub struct Outbox {
    slots: Mutex<HashMap<String, Vec<Pending>>>,
    next_seq: AtomicU64,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `frame`.
    ///
    /// An append that would grow its name past `cap` is refused and the
    /// frame handed back; the caller must flush before retrying.
    pub fn try_push(&self, frame: Frame, mode: WriteMode) -> Result<(), Frame> {
        let mut slots = lock(&self.slots);
        match mode {
            WriteMode::Replace => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slots.insert(frame.name().to_string(), vec![Pending { seq, frame }]);
            }
            WriteMode::Append { cap } => {
                let queue = slots.entry(frame.name().to_string()).or_default();
                if cap > 0 && queue.len() >= cap {
                    return Err(frame);
                }
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                queue.push(Pending { seq, frame });
            }
        }
        Ok(())
    }

    /// Swap the mailbox for an empty one and return its frames in
    /// enqueue order.
    pub fn take_batch(&self) -> Vec<Frame> {
        let drained = std::mem::take(&mut *lock(&self.slots));
        let mut pending: Vec<Pending> = drained.into_values().flatten().collect();
        pending.sort_by_key(|p| p.seq);
        pending.into_iter().map(|p| p.frame).collect()
    }

    /// Frames pending under `name`.
    pub fn pending(&self, name: &str) -> usize {
        lock(&self.slots).get(name).map_or(0, Vec::len)
    }

    /// Total frames pending.
    pub fn len(&self) -> usize {
        lock(&self.slots).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).values().all(Vec::is_empty)
    }

    pub fn clear(&self) {
        lock(&self.slots).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(name: &str, v: f32) -> Frame {
        Frame::scalar(name, v)
    }

    #[test]
    fn replace_keeps_newest() {
        let outbox = Outbox::new();
        outbox.try_push(f("A.a.X", 1.0), WriteMode::Replace).unwrap();
        outbox.try_push(f("A.a.X", 2.0), WriteMode::Replace).unwrap();

        let batch = outbox.take_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].as_f64(), 2.0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn append_accumulates_in_order() {
        let outbox = Outbox::new();
        for i in 0..4 {
            outbox
                .try_push(f("A.a.Log", i as f32), WriteMode::Append { cap: 0 })
                .unwrap();
        }
        let values: Vec<f64> = outbox.take_batch().iter().map(Frame::as_f64).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn append_refuses_past_cap() {
        let outbox = Outbox::new();
        let mode = WriteMode::Append { cap: 2 };
        outbox.try_push(f("A.a.Log", 1.0), mode).unwrap();
        outbox.try_push(f("A.a.Log", 2.0), mode).unwrap();
        let refused = outbox.try_push(f("A.a.Log", 3.0), mode).unwrap_err();
        assert_eq!(refused.as_f64(), 3.0);
        assert_eq!(outbox.pending("A.a.Log"), 2);

        outbox.take_batch();
        outbox.try_push(refused, mode).unwrap();
        assert_eq!(outbox.pending("A.a.Log"), 1);
    }

    #[test]
    fn batch_is_ordered_across_names() {
        let outbox = Outbox::new();
        outbox.try_push(f("B.b.X", 1.0), WriteMode::Replace).unwrap();
        outbox.try_push(f("A.a.X", 2.0), WriteMode::Replace).unwrap();
        outbox.try_push(f("C.c.X", 3.0), WriteMode::Append { cap: 0 }).unwrap();
        // Replacing B moves it behind the others.
        outbox.try_push(f("B.b.X", 4.0), WriteMode::Replace).unwrap();

        let names: Vec<String> = outbox
            .take_batch()
            .iter()
            .map(|fr| fr.name().to_string())
            .collect();
        assert_eq!(names, vec!["A.a.X", "C.c.X", "B.b.X"]);
    }

    #[test]
    fn len_counts_all_names() {
        let outbox = Outbox::new();
        outbox.try_push(f("A.a.X", 1.0), WriteMode::Replace).unwrap();
        outbox.try_push(f("A.a.Y", 1.0), WriteMode::Append { cap: 0 }).unwrap();
        outbox.try_push(f("A.a.Y", 1.0), WriteMode::Append { cap: 0 }).unwrap();
        assert_eq!(outbox.len(), 3);
        outbox.clear();
        assert!(outbox.is_empty());
    }
}
