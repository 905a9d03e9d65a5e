//! Single-slot holder for the most recently published frame.
//!
//! One producer writes, any number of emission loops read. A read returns
//! either "no frame yet" or a complete frame; publishing swaps an `Arc` under
//! a short critical section, so readers can never observe partially written
//! pixel data and a slow reader never throttles the producer.

use std::sync::{Arc, Mutex};

use crate::stream::data::StreamFrame;

pub(crate) struct FrameSlot {
    latest: Mutex<Option<Arc<StreamFrame>>>,
}

impl FrameSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            latest: Mutex::new(None),
        })
    }

    /// Replace the slot contents. Visible to every subsequent `latest` call.
    pub(crate) fn publish(&self, frame: StreamFrame) {
        let frame = Arc::new(frame);
        if let Ok(mut guard) = self.latest.lock() {
            *guard = Some(frame);
        }
    }

    /// Most recently published frame, or `None` before the first publish.
    /// O(1): an `Arc` clone under the lock, independent of reader count.
    pub(crate) fn latest(&self) -> Option<Arc<StreamFrame>> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    pub(crate) fn latest_seq(&self) -> Option<u64> {
        self.latest().map(|frame| frame.seq)
    }
}
