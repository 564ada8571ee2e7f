// SPDX-License-Identifier: Apache-2.0

//! Event model for the five reported categories. Events are immutable once
//! created; the reservoir only ever reads their priority.

use serde::Serialize;
use serde_json::{Map, Value};

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Span,
    Transaction,
    Error,
    Custom,
    Log,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Span,
        EventCategory::Transaction,
        EventCategory::Error,
        EventCategory::Custom,
        EventCategory::Log,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Span => "span",
            EventCategory::Transaction => "transaction",
            EventCategory::Error => "error",
            EventCategory::Custom => "custom",
            EventCategory::Log => "log",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a reservoir needs to know about an event.
pub trait PriorityAware {
    fn priority(&self) -> f32;
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionEvent {
    pub guid: String,
    pub name: String,
    pub timestamp_ms: u64,
    pub duration_ms: f64,
    pub priority: f32,
    pub sampled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub error: bool,
    pub intrinsics: Attributes,
    pub user_attributes: Attributes,
    pub agent_attributes: Attributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub guid: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<String>,
    pub name: String,
    pub category: String,
    pub timestamp_ms: u64,
    pub duration_ms: f64,
    pub priority: f32,
    pub sampled: bool,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub error_class: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub timestamp_ms: u64,
    pub priority: f32,
    pub expected: bool,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomEvent {
    pub event_type: String,
    pub timestamp_ms: u64,
    pub priority: f32,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub message: String,
    pub severity: String,
    pub timestamp_ms: u64,
    pub priority: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub attributes: Attributes,
}

macro_rules! priority_aware {
    ($($event:ty),+) => {
        $(impl PriorityAware for $event {
            fn priority(&self) -> f32 {
                self.priority
            }
        })+
    };
}

priority_aware!(TransactionEvent, SpanEvent, ErrorEvent, CustomEvent, LogEvent);

// Priorities stand alone in tests and property checks.
impl PriorityAware for f32 {
    fn priority(&self) -> f32 {
        *self
    }
}
