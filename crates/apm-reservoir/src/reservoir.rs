// SPDX-License-Identifier: Apache-2.0

//! Priority-weighted reservoir sampling.
//!
//! Below capacity every offer is kept. At capacity a new event competes
//! against the current minimum: strictly lower loses, strictly higher
//! evicts, equal priorities flip a fair coin. Under sustained overflow the
//! retained set is therefore a priority-weighted sample rather than
//! "first N" or "highest N so far".

use std::sync::Mutex;

use tracing::debug;

use crate::event::PriorityAware;

#[derive(Debug)]
struct Inner<T> {
    events: Vec<T>,
    capacity: usize,
    /// Offers observed since the last drain, kept or not.
    seen: u64,
}

/// Shared across all producer threads for one reporting key. `offer` never
/// blocks on anything but the internal lock and never panics on events.
#[derive(Debug)]
pub struct SamplingReservoir<T> {
    inner: Mutex<Inner<T>>,
}

/// Point-in-time result of a drain: events sorted by descending priority,
/// plus how many offers the period saw in total.
#[derive(Debug)]
pub struct ReservoirSnapshot<T> {
    pub events: Vec<T>,
    pub seen: u64,
}

impl<T: PriorityAware> SamplingReservoir<T> {
    pub fn new(capacity: usize) -> Self {
        SamplingReservoir {
            inner: Mutex::new(Inner {
                events: Vec::with_capacity(capacity.min(1024)),
                capacity,
                seen: 0,
            }),
        }
    }

    /// Offer an event. Returns whether it was retained. A capacity of zero
    /// drops everything, which fully disables a category without touching
    /// call sites.
    pub fn offer(&self, event: T) -> bool {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.seen += 1;

        if inner.capacity == 0 {
            return false;
        }
        if inner.events.len() < inner.capacity {
            inner.events.push(event);
            return true;
        }

        let min_index = min_priority_index(&inner.events);
        let min_priority = inner.events[min_index].priority();
        let priority = event.priority();
        if priority < min_priority {
            return false;
        }
        if priority == min_priority && rand::random::<bool>() {
            return false;
        }
        inner.events[min_index] = event;
        true
    }

    pub fn size(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("lock poisoned").events.len()
    }

    pub fn capacity(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("lock poisoned").capacity
    }

    pub fn seen(&self) -> u64 {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("lock poisoned").seen
    }

    /// Stable snapshot, safe to iterate while offers continue.
    pub fn as_list(&self) -> Vec<T>
    where
        T: Clone,
    {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("lock poisoned").events.clone()
    }

    /// Take everything and reset. Called only by the harvest scheduler.
    pub fn drain(&self) -> ReservoirSnapshot<T> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock poisoned");
        let mut events = std::mem::take(&mut inner.events);
        let seen = std::mem::take(&mut inner.seen);
        drop(inner);

        events.sort_by(|a, b| {
            b.priority()
                .partial_cmp(&a.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ReservoirSnapshot { events, seen }
    }

    pub fn clear(&self) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.events.clear();
        inner.seen = 0;
    }

    /// Adjust capacity between harvest cycles. Shrinking evicts the lowest
    /// priorities immediately; an already-taken snapshot is unaffected.
    pub fn set_capacity(&self, capacity: usize) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("lock poisoned");
        if capacity < inner.capacity {
            debug!(
                old = inner.capacity,
                new = capacity,
                "shrinking reservoir capacity"
            );
        }
        inner.capacity = capacity;
        if inner.events.len() > capacity {
            inner.events.sort_by(|a, b| {
                b.priority()
                    .partial_cmp(&a.priority())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            inner.events.truncate(capacity);
        }
    }
}

fn min_priority_index<T: PriorityAware>(events: &[T]) -> usize {
    let mut min_index = 0;
    let mut min_priority = events[0].priority();
    for (index, event) in events.iter().enumerate().skip(1) {
        let priority = event.priority();
        if priority < min_priority {
            min_priority = priority;
            min_index = index;
        }
    }
    min_index
}
