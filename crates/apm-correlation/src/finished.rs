// SPDX-License-Identifier: Apache-2.0

//! The record a transaction leaves behind, and the seam reporting
//! collaborators attach to.

use std::time::Duration;

use serde_json::{Map, Value};

use apm_trace_context::inbound::ParsedContext;

use crate::tracer::{TimeoutCause, TracerRecord};

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub error_class: String,
    pub message: String,
    pub expected: bool,
}

/// Aggregate timing for tracers the clamp dropped from the retained tree,
/// and for the tracers of over-limit activities merged in wholesale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerRollup {
    pub count: usize,
    pub total_duration: Duration,
}

impl TracerRollup {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
    }
}

/// Immutable snapshot of a transaction at the moment it finished.
#[derive(Debug, Clone)]
pub struct FinishedTransaction {
    pub guid: String,
    pub name: String,
    pub trace_id: String,
    pub start_timestamp_ms: u64,
    pub duration: Duration,
    pub priority: f32,
    pub sampled: bool,
    /// Inbound correlation fields, all absent for a root transaction.
    pub inbound: ParsedContext,
    /// Flattened call tree, parents before children.
    pub tracers: Vec<TracerRecord>,
    /// Aggregate of the tracers created after the clamp tripped.
    pub rollup: TracerRollup,
    pub error: Option<ErrorInfo>,
    pub timeout_cause: Option<TimeoutCause>,
    pub path_hash: Option<String>,
    pub alternate_path_hashes: Option<String>,
    pub user_attributes: Attributes,
    pub agent_attributes: Attributes,
    pub intrinsics: Attributes,
}

/// Reporting seam. Implementations must not block: records are dispatched
/// outside the transaction lock but on the finishing caller's thread.
pub trait TransactionListener: Send + Sync {
    fn transaction_finished(&self, record: &FinishedTransaction);

    /// An ignored transaction, or one that finished with no completed
    /// activities, is cancelled instead of reported.
    fn transaction_cancelled(&self, _guid: &str) {}
}
