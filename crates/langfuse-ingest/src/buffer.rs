// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;

use crate::event::{Batch, IngestionEvent};

/// In-memory queue of events waiting for the next flush.
///
/// Both `push` and `drain` take the same lock, and the swap that releases a
/// batch happens inside that critical section. An event is therefore handed
/// out by exactly one of the size trigger, the periodic loop or shutdown.
#[derive(Debug)]
pub struct EventBuffer {
    events: Mutex<Vec<IngestionEvent>>,
    batch_size: usize,
}

impl EventBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        EventBuffer {
            events: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Appends an event. Returns the full batch when this push brought the
    /// buffer to `batch_size`.
    pub fn push(&self, event: IngestionEvent) -> Option<Batch> {
        #[allow(clippy::expect_used)]
        let mut events = self.events.lock().expect("lock poisoned");
        events.push(event);
        if events.len() >= self.batch_size {
            let full = std::mem::replace(&mut *events, Vec::with_capacity(self.batch_size));
            return Some(Batch::new(full));
        }
        None
    }

    pub fn drain(&self) -> Batch {
        #[allow(clippy::expect_used)]
        let mut events = self.events.lock().expect("lock poisoned");
        Batch::new(std::mem::take(&mut *events))
    }

    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let events = self.events.lock().expect("lock poisoned");
        events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
