// SPDX-License-Identifier: Apache-2.0

//! Outbound header encoding. Produces the W3C pair and, when configured,
//! the legacy proprietary header, from one snapshot of correlation fields.

use tracing::debug;

use apm_core::config::AgentConfig;

use crate::obfuscate::obfuscate;
use crate::payload::{ParentType, TracePayload};
use crate::priority::is_sampled_priority;
use crate::w3c::{AgentTraceStateEntry, TraceParent, TraceState};

/// Correlation fields of the calling transaction at the moment of an
/// outbound request.
#[derive(Debug, Clone)]
pub struct OutboundContext {
    pub trace_id: String,
    /// Guid of the tracer making the request.
    pub span_id: String,
    pub transaction_id: Option<String>,
    pub priority: Option<f32>,
    pub sampled: Option<bool>,
    pub timestamp_ms: u64,
    /// Vendor tracestate entries received inbound, passed through untouched.
    pub vendor_states: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundHeaders {
    pub legacy: Option<String>,
    pub traceparent: String,
    pub tracestate: String,
}

pub fn encode_outbound(context: &OutboundContext, config: &AgentConfig) -> OutboundHeaders {
    let sampled = context
        .sampled
        .or_else(|| context.priority.map(is_sampled_priority));

    let payload = TracePayload {
        parent_type: ParentType::App,
        account_id: config.account_id.clone(),
        trust_key: if config.trust_key == config.account_id {
            None
        } else {
            Some(config.trust_key.clone())
        },
        application_id: config.primary_application_id.clone(),
        trace_id: context.trace_id.clone(),
        span_id: Some(context.span_id.clone()),
        transaction_id: context.transaction_id.clone(),
        priority: context.priority,
        sampled,
        timestamp_ms: context.timestamp_ms,
    };

    let legacy = if config.include_legacy_header {
        Some(render_legacy(&payload, config))
    } else {
        None
    };

    let traceparent = TraceParent::new(
        &TraceParent::pad_trace_id(&context.trace_id),
        &context.span_id,
        sampled.unwrap_or(false),
    )
    .render();

    let tracestate = TraceState {
        agent_entry: Some(AgentTraceStateEntry {
            trust_key: config.trust_key.clone(),
            parent_type: ParentType::App,
            account_id: config.account_id.clone(),
            application_id: config.primary_application_id.clone(),
            span_id: Some(context.span_id.clone()),
            transaction_id: context.transaction_id.clone(),
            sampled,
            priority: context.priority,
            timestamp_ms: context.timestamp_ms,
        }),
        vendor_states: context.vendor_states.clone(),
    }
    .render();

    OutboundHeaders {
        legacy,
        traceparent,
        tracestate,
    }
}

fn render_legacy(payload: &TracePayload, config: &AgentConfig) -> String {
    match &config.obfuscation_key {
        Some(key) if !key.is_empty() => match obfuscate(&payload.text(), key) {
            Ok(header) => header,
            Err(error) => {
                debug!("falling back to plain encoding: {error}");
                payload.http_safe()
            }
        },
        _ => payload.http_safe(),
    }
}
