// SPDX-License-Identifier: Apache-2.0

//! Inbound header decoding.
//!
//! `decode_inbound` is the single entry point instrumented request paths go
//! through. It never fails: malformed or distrusted headers degrade to an
//! empty [`ParsedContext`] (plus a supportability counter), so a transaction
//! that received garbage behaves exactly like one that received nothing.

use tracing::debug;

use apm_core::config::AgentConfig;
use apm_core::metric_names;
use apm_core::stats::StatsEngine;

use crate::error::ContextError;
use crate::obfuscate::deobfuscate;
use crate::payload::{ParentType, TracePayload};
use crate::priority::SampledState;
use crate::w3c::{TraceParent, TraceState};

/// Header carrying the proprietary payload.
pub const LEGACY_HEADER: &str = "x-apm-trace";
pub const TRACE_PARENT_HEADER: &str = "traceparent";
pub const TRACE_STATE_HEADER: &str = "tracestate";

/// Read-only view over a carrier's headers. Lookups are case-insensitive on
/// the implementor's side.
pub trait InboundHeaders {
    fn get(&self, name: &str) -> Option<&str>;

    /// All values for a repeatable header, in arrival order.
    fn get_all(&self, name: &str) -> Vec<&str> {
        self.get(name).into_iter().collect()
    }
}

impl InboundHeaders for std::collections::HashMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Which scheme produced the accepted context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Legacy,
    W3c,
}

/// Correlation fields extracted from inbound headers. Every field is absent
/// when decoding failed or nothing arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedContext {
    pub source: Option<ContextSource>,
    pub parent_type: Option<ParentType>,
    pub parent_account_id: Option<String>,
    pub parent_application_id: Option<String>,
    pub trace_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub sampled: SampledState,
    pub priority: Option<f32>,
    pub timestamp_ms: Option<u64>,
    /// Correlation id for the whole multi-hop trip; the trace id unless the
    /// caller carried a distinct one.
    pub trip_id: Option<String>,
    /// The caller's path hash, folded into every path hash computed here.
    pub referring_path_hash: Option<u32>,
    /// Vendor tracestate entries to pass through on outbound requests.
    pub vendor_states: Vec<String>,
}

impl ParsedContext {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
    }
}

/// Decode whichever scheme is present. The legacy header wins when both are
/// present and its payload is trusted; otherwise W3C is consulted.
pub fn decode_inbound(
    headers: &dyn InboundHeaders,
    config: &AgentConfig,
    stats: &mut StatsEngine,
) -> ParsedContext {
    if let Some(raw) = headers.get(LEGACY_HEADER) {
        match decode_legacy(raw, config) {
            Ok(context) => return context,
            Err(error) => {
                debug!("dropping inbound legacy payload: {error}");
                stats.increment_counter(legacy_failure_metric(&error));
            }
        }
    }

    if let Some(raw) = headers.get(TRACE_PARENT_HEADER) {
        match decode_w3c(raw, &headers.get_all(TRACE_STATE_HEADER), config, stats) {
            Ok(context) => return context,
            Err(error) => {
                debug!("dropping inbound trace context: {error}");
                stats.increment_counter(metric_names::SUPPORTABILITY_TRACE_CONTEXT_INVALID_PARENT);
            }
        }
    }

    ParsedContext::default()
}

fn legacy_failure_metric(error: &ContextError) -> &'static str {
    match error {
        ContextError::UntrustedAccount(_) => {
            metric_names::SUPPORTABILITY_ACCEPT_PAYLOAD_UNTRUSTED_ACCOUNT
        }
        ContextError::UnsupportedVersion(_) => {
            metric_names::SUPPORTABILITY_ACCEPT_PAYLOAD_MAJOR_VERSION
        }
        _ => metric_names::SUPPORTABILITY_ACCEPT_PAYLOAD_PARSE_EXCEPTION,
    }
}

fn decode_legacy(raw: &str, config: &AgentConfig) -> Result<ParsedContext, ContextError> {
    let payload = match TracePayload::parse(raw) {
        Ok(payload) => payload,
        Err(first_error) => match &config.obfuscation_key {
            // The sender may have obfuscated the header; retry after
            // deobfuscation before giving up.
            Some(key) => deobfuscate(raw, key)
                .and_then(|clear| TracePayload::parse(&clear))
                .map_err(|_| first_error)?,
            None => return Err(first_error),
        },
    };

    if !payload.is_trusted(&config.trust_key, &config.trusted_account_keys) {
        return Err(ContextError::UntrustedAccount(
            payload.effective_trust_key().to_string(),
        ));
    }

    Ok(ParsedContext {
        source: Some(ContextSource::Legacy),
        parent_type: Some(payload.parent_type),
        parent_account_id: Some(payload.account_id),
        parent_application_id: Some(payload.application_id),
        trace_id: Some(payload.trace_id.to_lowercase()),
        parent_span_id: payload.span_id,
        parent_transaction_id: payload.transaction_id,
        sampled: payload.sampled.into(),
        priority: payload.priority,
        timestamp_ms: Some(payload.timestamp_ms),
        trip_id: Some(payload.trace_id.to_lowercase()),
        referring_path_hash: None,
        vendor_states: Vec::new(),
    })
}

fn decode_w3c(
    traceparent: &str,
    tracestate_headers: &[&str],
    config: &AgentConfig,
    stats: &mut StatsEngine,
) -> Result<ParsedContext, ContextError> {
    let parent = TraceParent::parse(traceparent)?;

    // A bad tracestate only costs us the vendor fields; the traceparent ids
    // still correlate the trace.
    let state = match TraceState::parse(tracestate_headers, &config.trust_key) {
        Ok(state) => state,
        Err(error) => {
            debug!("dropping inbound tracestate: {error}");
            stats.increment_counter(metric_names::SUPPORTABILITY_TRACE_CONTEXT_INVALID_STATE);
            TraceState::default()
        }
    };
    if state.agent_entry.is_none() && !tracestate_headers.is_empty() {
        stats.increment_counter(metric_names::SUPPORTABILITY_TRACE_CONTEXT_NO_VENDOR_ENTRY);
    }

    let mut context = ParsedContext {
        source: Some(ContextSource::W3c),
        trip_id: Some(parent.trace_id.clone()),
        trace_id: Some(parent.trace_id),
        parent_span_id: Some(parent.parent_id),
        sampled: SampledState::from(Some(parent.sampled)),
        vendor_states: state.vendor_states,
        ..ParsedContext::default()
    };

    if let Some(entry) = state.agent_entry {
        context.parent_type = Some(entry.parent_type);
        context.parent_account_id = Some(entry.account_id);
        context.parent_application_id = Some(entry.application_id);
        context.parent_transaction_id = entry.transaction_id;
        context.timestamp_ms = Some(entry.timestamp_ms);
        context.priority = entry.priority;
        if let Some(sampled) = entry.sampled {
            context.sampled = SampledState::from(Some(sampled));
        }
        // The entry's span id is the caller's span; prefer it over the bare
        // traceparent id when present.
        if entry.span_id.is_some() {
            context.parent_span_id = entry.span_id;
        }
    }

    Ok(context)
}
