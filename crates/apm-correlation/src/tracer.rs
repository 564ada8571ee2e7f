// SPDX-License-Identifier: Apache-2.0

//! Tracer call tree, stored as an arena inside each activity. Handles are
//! plain indices; nothing outside the owning transaction's lock ever holds
//! a reference into the arena.

use std::time::{Duration, Instant};

use crate::finished::Attributes;

/// Index into an activity's tracer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TracerId(pub(crate) usize);

/// Index into a transaction's activity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivityId(pub(crate) usize);

/// What the tracer contributes to the finished transaction.
///
/// `Full` tracers are retained in the call tree. `RollupOnly` tracers are
/// created once the per-transaction tracer clamp trips: they still record
/// aggregate timing into the overflow rollup but are dropped from the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerKind {
    Full,
    RollupOnly,
}

#[derive(Debug)]
pub(crate) struct TracerState {
    pub name: String,
    pub category: String,
    pub kind: TracerKind,
    pub started_at: Instant,
    pub duration: Option<Duration>,
    pub exit_code: Option<i32>,
    pub parent: Option<TracerId>,
    pub children: Vec<TracerId>,
    pub attributes: Attributes,
}

impl TracerState {
    pub fn new(
        name: String,
        category: String,
        kind: TracerKind,
        parent: Option<TracerId>,
    ) -> Self {
        TracerState {
            name,
            category,
            kind,
            started_at: Instant::now(),
            duration: None,
            exit_code: None,
            parent,
            children: Vec::new(),
            attributes: Attributes::new(),
        }
    }
}

/// Finished-tree node handed to reporting collaborators. `parent` indexes
/// into the flattened record list.
#[derive(Debug, Clone, PartialEq)]
pub struct TracerRecord {
    pub name: String,
    pub category: String,
    pub duration: Duration,
    pub exclusive_duration: Duration,
    pub exit_code: i32,
    pub parent: Option<usize>,
    pub attributes: Attributes,
}

/// Why async work was forcibly finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutCause {
    Segment,
    Token,
}

impl TimeoutCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutCause::Segment => "segment",
            TimeoutCause::Token => "token",
        }
    }
}
