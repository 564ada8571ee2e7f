// SPDX-License-Identifier: Apache-2.0

//! Segments: out-of-band work with its own activity and timeout deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::thread::ThreadId;

use crate::tracer::{ActivityId, TracerId};
use crate::transaction::Transaction;

/// Weak handle into the owning transaction. Ending twice is a no-op; a
/// segment that is never ended is closed by the expiration sweeper.
#[derive(Debug)]
pub struct Segment {
    transaction: Weak<Transaction>,
    activity: ActivityId,
    tracer: TracerId,
    start_thread: ThreadId,
    ended: AtomicBool,
}

impl Segment {
    pub(crate) fn new(
        transaction: Weak<Transaction>,
        activity: ActivityId,
        tracer: TracerId,
    ) -> Self {
        Segment {
            transaction,
            activity,
            tracer,
            start_thread: std::thread::current().id(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn activity(&self) -> ActivityId {
        self.activity
    }

    /// Finish the segment's work. When the ending thread differs from the
    /// starting one, both identities land on the tracer's attributes.
    /// Returns false when it was already ended, timed out, or the
    /// transaction is gone.
    pub fn end(&self) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.transaction.upgrade() {
            Some(transaction) => {
                transaction.end_segment(self.activity, self.tracer, self.start_thread)
            }
            None => false,
        }
    }

    /// Drop the segment from the tracer tree instead of ending it. The
    /// owning transaction is no longer held open, and none of the segment's
    /// tracers are reported. A no-op when the segment already ended.
    pub fn ignore_if_unfinished(&self) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.transaction.upgrade() {
            Some(transaction) => transaction.ignore_segment(self.activity),
            None => false,
        }
    }
}
