// SPDX-License-Identifier: Apache-2.0

//! Metric name constants reported through the stats engine.

pub const SEGMENT_DELIMITER: &str = "/";

pub const SUPPORTABILITY_TRANSACTION_SEGMENT_CLAMP: &str =
    "Supportability/Transaction/SegmentClamp";
pub const SUPPORTABILITY_TRANSACTION_TOKEN_CLAMP: &str = "Supportability/Transaction/TokenClamp";

pub const SUPPORTABILITY_SEGMENT_TIMEOUT: &str = "Supportability/Timeout/Segment";
pub const SUPPORTABILITY_TOKEN_TIMEOUT: &str = "Supportability/Timeout/Token";

pub const SUPPORTABILITY_TRACE_CONTEXT_INVALID_PARENT: &str =
    "Supportability/TraceContext/TraceParent/Parse/Exception";
pub const SUPPORTABILITY_TRACE_CONTEXT_INVALID_STATE: &str =
    "Supportability/TraceContext/TraceState/Parse/Exception";
pub const SUPPORTABILITY_TRACE_CONTEXT_NO_VENDOR_ENTRY: &str =
    "Supportability/TraceContext/TraceState/NoAgentEntry";
pub const SUPPORTABILITY_TRACE_CONTEXT_UNTRUSTED_ACCOUNT: &str =
    "Supportability/TraceContext/UntrustedAccount";
pub const SUPPORTABILITY_ACCEPT_PAYLOAD_PARSE_EXCEPTION: &str =
    "Supportability/DistributedTrace/AcceptPayload/ParseException";
pub const SUPPORTABILITY_ACCEPT_PAYLOAD_UNTRUSTED_ACCOUNT: &str =
    "Supportability/DistributedTrace/AcceptPayload/Ignored/UntrustedAccount";
pub const SUPPORTABILITY_ACCEPT_PAYLOAD_MAJOR_VERSION: &str =
    "Supportability/DistributedTrace/AcceptPayload/Ignored/MajorVersion";

pub const SUPPORTABILITY_METRIC_NAMES_DROPPED: &str = "Supportability/MetricHarvest/Dropped";
pub const SUPPORTABILITY_ERROR_PAYLOAD_HALVED: &str = "Supportability/ErrorPayload/Halved";
pub const SUPPORTABILITY_HARVEST_RESPONSE_TIME: &str =
    "Supportability/Harvest/Scheduler/ResponseTime";

pub const TRANSACTION_EVENTS_SEEN: &str = "Supportability/Events/Transaction/Seen";
pub const TRANSACTION_EVENTS_SENT: &str = "Supportability/Events/Transaction/Sent";
pub const SPAN_EVENTS_SEEN: &str = "Supportability/Events/Span/Seen";
pub const SPAN_EVENTS_SENT: &str = "Supportability/Events/Span/Sent";
pub const ERROR_EVENTS_SEEN: &str = "Supportability/Events/Error/Seen";
pub const ERROR_EVENTS_SENT: &str = "Supportability/Events/Error/Sent";
pub const CUSTOM_EVENTS_SEEN: &str = "Supportability/Events/Custom/Seen";
pub const CUSTOM_EVENTS_SENT: &str = "Supportability/Events/Custom/Sent";
pub const LOG_EVENTS_SEEN: &str = "Supportability/Events/Log/Seen";
pub const LOG_EVENTS_SENT: &str = "Supportability/Events/Log/Sent";
