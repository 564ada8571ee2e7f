// SPDX-License-Identifier: Apache-2.0

//! Explicit unit-of-work handle. Callers carry a `WorkContext` through
//! their request path instead of the agent guessing from thread identity.

use std::sync::{Arc, Weak};

use crate::tracer::ActivityId;
use crate::transaction::Transaction;

#[derive(Debug, Default)]
pub struct WorkContext {
    transaction: Option<Weak<Transaction>>,
    activity: Option<ActivityId>,
}

impl WorkContext {
    pub fn new() -> Self {
        WorkContext::default()
    }

    /// The bound transaction, if it is still alive.
    pub fn transaction(&self) -> Option<Arc<Transaction>> {
        self.transaction.as_ref().and_then(Weak::upgrade)
    }

    /// The activity this context's work runs under.
    pub fn activity(&self) -> Option<ActivityId> {
        self.activity
    }

    pub fn is_bound(&self) -> bool {
        self.transaction().is_some()
    }

    pub(crate) fn bind(&mut self, transaction: &Arc<Transaction>, activity: ActivityId) {
        self.transaction = Some(Arc::downgrade(transaction));
        self.activity = Some(activity);
    }

    pub fn clear(&mut self) {
        self.transaction = None;
        self.activity = None;
    }
}
