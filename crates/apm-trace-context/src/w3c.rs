// SPDX-License-Identifier: Apache-2.0

//! W3C `traceparent`/`tracestate` support.
//!
//! The agent owns exactly one tracestate entry, keyed `{trust_key}@apm`,
//! whose value is nine pipe-delimited fields. All other entries are vendor
//! state: validated, deduplicated, capped, and passed through unchanged.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ContextError;
use crate::payload::ParentType;
use crate::priority::format_priority;

const TRACE_PARENT_VERSION: &str = "00";
const SAMPLED_FLAG: u8 = 0x01;
const TRACE_STATE_VERSION: u32 = 0;
const TRACE_STATE_FIELD_COUNT: usize = 9;
/// Vendor entries kept beyond our own, per the 32-entry header limit.
const MAX_VENDOR_STATE_SIZE: usize = 31;
/// Entries with values longer than this are shed first when over the cap.
const LONG_VENDOR_STATE_SIZE: usize = 128;

fn vendor_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| {
        Regex::new(
            r"^([a-z][a-z0-9_\-*/]{0,255}|[a-z0-9][a-z0-9_\-*/]{0,240}@[a-z][a-z0-9_\-*/]{0,13})$",
        )
        .expect("static regex")
    })
}

fn vendor_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r"^[\x20-\x2b\x2d-\x3c\x3e-\x7e]{0,256}$").expect("static regex"))
}

/// Parsed `traceparent` header. Only version 00 fields are retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: String,
    pub parent_id: String,
    pub sampled: bool,
}

impl TraceParent {
    pub fn new(trace_id: &str, parent_id: &str, sampled: bool) -> Self {
        TraceParent {
            trace_id: trace_id.to_lowercase(),
            parent_id: parent_id.to_lowercase(),
            sampled,
        }
    }

    pub fn parse(header: &str) -> Result<TraceParent, ContextError> {
        let parts: Vec<&str> = header.trim().split('-').collect();
        if parts.len() < 4 {
            return Err(ContextError::MalformedTraceParent);
        }
        let version = parts[0];
        if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
            return Err(ContextError::MalformedTraceParent);
        }
        // Version 00 has exactly four fields; future versions may append.
        if version == TRACE_PARENT_VERSION && parts.len() != 4 {
            return Err(ContextError::MalformedTraceParent);
        }
        let trace_id = parts[1];
        let parent_id = parts[2];
        let flags = parts[3];
        if trace_id.len() != 32 || !is_lower_hex(trace_id) || trace_id.bytes().all(|b| b == b'0') {
            return Err(ContextError::MalformedTraceParent);
        }
        if parent_id.len() != 16 || !is_lower_hex(parent_id) || parent_id.bytes().all(|b| b == b'0')
        {
            return Err(ContextError::MalformedTraceParent);
        }
        if flags.len() != 2 || !is_lower_hex(flags) {
            return Err(ContextError::MalformedTraceParent);
        }
        let flags = u8::from_str_radix(flags, 16).map_err(|_| ContextError::MalformedTraceParent)?;
        Ok(TraceParent {
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            sampled: flags & SAMPLED_FLAG != 0,
        })
    }

    pub fn render(&self) -> String {
        let flags = if self.sampled { SAMPLED_FLAG } else { 0 };
        format!(
            "{TRACE_PARENT_VERSION}-{}-{}-{flags:02x}",
            self.trace_id, self.parent_id
        )
    }

    /// Trace ids shorter than 32 hex digits are left-padded with zeros.
    pub fn pad_trace_id(trace_id: &str) -> String {
        format!("{:0>32}", trace_id.to_lowercase())
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Our own tracestate entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTraceStateEntry {
    pub trust_key: String,
    pub parent_type: ParentType,
    pub account_id: String,
    pub application_id: String,
    pub span_id: Option<String>,
    pub transaction_id: Option<String>,
    pub sampled: Option<bool>,
    pub priority: Option<f32>,
    pub timestamp_ms: u64,
}

impl AgentTraceStateEntry {
    pub fn key(trust_key: &str) -> String {
        format!("{trust_key}@apm")
    }

    pub fn render(&self) -> String {
        let sampled = match self.sampled {
            Some(true) => "1",
            Some(false) => "0",
            None => "",
        };
        let priority = self.priority.map(format_priority).unwrap_or_default();
        format!(
            "{}={TRACE_STATE_VERSION}|{}|{}|{}|{}|{}|{sampled}|{priority}|{}",
            Self::key(&self.trust_key),
            self.parent_type.value(),
            self.account_id,
            self.application_id,
            self.span_id.as_deref().unwrap_or(""),
            self.transaction_id.as_deref().unwrap_or(""),
            self.timestamp_ms,
        )
    }

    fn parse_value(trust_key: &str, value: &str) -> Result<AgentTraceStateEntry, ContextError> {
        let fields: Vec<&str> = value.split('|').collect();
        if fields.len() < TRACE_STATE_FIELD_COUNT {
            return Err(ContextError::MalformedTraceState);
        }
        let version: u32 = fields[0].parse().map_err(|_| ContextError::MalformedTraceState)?;
        if version == TRACE_STATE_VERSION && fields.len() != TRACE_STATE_FIELD_COUNT {
            return Err(ContextError::MalformedTraceState);
        }
        let parent_type_value: u32 =
            fields[1].parse().map_err(|_| ContextError::MalformedTraceState)?;
        let sampled = match fields[6] {
            "1" => Some(true),
            "0" => Some(false),
            "" => None,
            _ => return Err(ContextError::MalformedTraceState),
        };
        // A garbled priority degrades to absent, the rest of the entry is
        // still usable for correlation.
        let priority = fields[7].parse::<f32>().ok();
        let timestamp_ms: u64 =
            fields[8].parse().map_err(|_| ContextError::MalformedTraceState)?;
        if fields[2].is_empty() || fields[3].is_empty() {
            return Err(ContextError::MalformedTraceState);
        }
        Ok(AgentTraceStateEntry {
            trust_key: trust_key.to_string(),
            parent_type: ParentType::from_value(parent_type_value)?,
            account_id: fields[2].to_string(),
            application_id: fields[3].to_string(),
            span_id: non_empty(fields[4]),
            transaction_id: non_empty(fields[5]),
            sampled,
            priority,
            timestamp_ms,
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// The full tracestate: our entry (when present and keyed by our trust key)
/// plus the surviving vendor entries in their original order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceState {
    pub agent_entry: Option<AgentTraceStateEntry>,
    pub vendor_states: Vec<String>,
}

impl TraceState {
    /// Parse one or more `tracestate` header values. Multiple headers are
    /// flattened as if comma-joined. Invalid entries and duplicate keys are
    /// dropped without failing the rest of the header.
    pub fn parse(headers: &[&str], trust_key: &str) -> Result<TraceState, ContextError> {
        let agent_key = AgentTraceStateEntry::key(trust_key);
        let mut agent_entry = None;
        let mut vendor_states: Vec<String> = Vec::new();
        let mut seen_keys: Vec<String> = Vec::new();

        for header in headers {
            for raw in header.split(',') {
                let entry = raw.trim();
                if entry.is_empty() {
                    continue;
                }
                let Some((key, value)) = entry.split_once('=') else {
                    continue;
                };
                if !vendor_key_regex().is_match(key) || !vendor_value_regex().is_match(value) {
                    continue;
                }
                if seen_keys.iter().any(|k| k == key) {
                    continue;
                }
                seen_keys.push(key.to_string());
                if key == agent_key {
                    agent_entry = Some(AgentTraceStateEntry::parse_value(trust_key, value)?);
                } else {
                    vendor_states.push(entry.to_string());
                }
            }
        }

        truncate_vendor_states(&mut vendor_states);
        Ok(TraceState {
            agent_entry,
            vendor_states,
        })
    }

    /// Render with our entry first, then the retained vendor states.
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.vendor_states.len());
        if let Some(entry) = &self.agent_entry {
            parts.push(entry.render());
        }
        parts.extend(self.vendor_states.iter().cloned());
        parts.join(",")
    }
}

/// Enforce the vendor-entry cap: shed oversized values first, then trim
/// from the back.
fn truncate_vendor_states(vendor_states: &mut Vec<String>) {
    if vendor_states.len() > MAX_VENDOR_STATE_SIZE {
        vendor_states.retain(|entry| entry.len() <= LONG_VENDOR_STATE_SIZE);
    }
    vendor_states.truncate(MAX_VENDOR_STATE_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE_ID: &str = "87b1c9a8687b4d9f8f767ac5e9c1ad6f";
    const PARENT_ID: &str = "5f474d64b9cc9b2a";

    #[test]
    fn test_traceparent_round_trip() {
        let header = format!("00-{TRACE_ID}-{PARENT_ID}-01");
        let parsed = TraceParent::parse(&header).unwrap();
        assert_eq!(parsed.trace_id, TRACE_ID);
        assert_eq!(parsed.parent_id, PARENT_ID);
        assert!(parsed.sampled);
        assert_eq!(parsed.render(), header);
    }

    #[test]
    fn test_traceparent_not_sampled() {
        let parsed = TraceParent::parse(&format!("00-{TRACE_ID}-{PARENT_ID}-00")).unwrap();
        assert!(!parsed.sampled);
    }

    #[test]
    fn test_traceparent_rejects_malformed() {
        for header in [
            "",
            "00",
            &format!("00-{TRACE_ID}-{PARENT_ID}"),
            &format!("00-{TRACE_ID}-{PARENT_ID}-01-extra"),
            &format!("ff-{TRACE_ID}-{PARENT_ID}-01"),
            &format!("00-{}-{PARENT_ID}-01", TRACE_ID.to_uppercase()),
            &format!("00-{}-{PARENT_ID}-01", "0".repeat(32)),
            &format!("00-{TRACE_ID}-{}-01", "0".repeat(16)),
            &format!("00-{TRACE_ID}-{PARENT_ID}-1"),
            &format!("00-short-{PARENT_ID}-01"),
        ] {
            assert!(TraceParent::parse(header).is_err(), "accepted: {header}");
        }
    }

    #[test]
    fn test_future_traceparent_version_tolerates_extra_fields() {
        let parsed = TraceParent::parse(&format!("01-{TRACE_ID}-{PARENT_ID}-01-future")).unwrap();
        assert_eq!(parsed.trace_id, TRACE_ID);
    }

    #[test]
    fn test_pad_trace_id() {
        assert_eq!(
            TraceParent::pad_trace_id("3221BF09aa0bcf0d"),
            "00000000000000003221bf09aa0bcf0d"
        );
    }

    fn agent_entry() -> AgentTraceStateEntry {
        AgentTraceStateEntry {
            trust_key: "33".to_string(),
            parent_type: ParentType::App,
            account_id: "12345".to_string(),
            application_id: "67890".to_string(),
            span_id: Some(PARENT_ID.to_string()),
            transaction_id: Some("27856f70d3d314b7".to_string()),
            sampled: Some(true),
            priority: Some(0.5),
            timestamp_ms: 1_563_574_856_827,
        }
    }

    #[test]
    fn test_agent_entry_render() {
        assert_eq!(
            agent_entry().render(),
            "33@apm=0|0|12345|67890|5f474d64b9cc9b2a|27856f70d3d314b7|1|0.5|1563574856827"
        );
    }

    #[test]
    fn test_tracestate_round_trip_with_vendors() {
        let header = format!("{},rojo=f06a0ba902b7,congo=t61rcWkgMzE", agent_entry().render());
        let state = TraceState::parse(&[&header], "33").unwrap();
        assert_eq!(state.agent_entry, Some(agent_entry()));
        assert_eq!(state.vendor_states, vec!["rojo=f06a0ba902b7", "congo=t61rcWkgMzE"]);
        assert_eq!(state.render(), header);
    }

    #[test]
    fn test_multiple_headers_flattened_and_deduped() {
        let state = TraceState::parse(&["rojo=first,congo=a", "rojo=second"], "33").unwrap();
        assert_eq!(state.agent_entry, None);
        assert_eq!(state.vendor_states, vec!["rojo=first", "congo=a"]);
    }

    #[test]
    fn test_invalid_vendor_entries_dropped() {
        let state =
            TraceState::parse(&["UPPER=bad,ok=fine,noequals,=novalue-key"], "33").unwrap();
        assert_eq!(state.vendor_states, vec!["ok=fine"]);
    }

    #[test]
    fn test_vendor_cap() {
        let entries: Vec<String> = (0..40).map(|i| format!("v{i}=x")).collect();
        let header = entries.join(",");
        let state = TraceState::parse(&[&header], "33").unwrap();
        assert_eq!(state.vendor_states.len(), MAX_VENDOR_STATE_SIZE);
        assert_eq!(state.vendor_states[0], "v0=x");
    }

    #[test]
    fn test_vendor_cap_sheds_long_values_first() {
        let long_value = "y".repeat(200);
        let mut entries: Vec<String> = (0..35).map(|i| format!("v{i}=x")).collect();
        entries.insert(0, format!("big=long{long_value}"));
        let state = TraceState::parse(&[&entries.join(",")], "33").unwrap();
        assert!(state.vendor_states.iter().all(|e| !e.starts_with("big=")));
    }

    #[test]
    fn test_tracestate_other_trust_key_is_vendor_state() {
        let header = agent_entry().render();
        let state = TraceState::parse(&[&header], "99").unwrap();
        assert_eq!(state.agent_entry, None);
        assert_eq!(state.vendor_states.len(), 1);
    }

    #[test]
    fn test_agent_entry_absent_fields() {
        let header = "33@apm=0|2|12345|67890|||||1563574856827";
        let state = TraceState::parse(&[header], "33").unwrap();
        let entry = state.agent_entry.unwrap();
        assert_eq!(entry.parent_type, ParentType::Mobile);
        assert_eq!(entry.span_id, None);
        assert_eq!(entry.transaction_id, None);
        assert_eq!(entry.sampled, None);
        assert_eq!(entry.priority, None);
    }

    #[test]
    fn test_agent_entry_bad_priority_degrades_to_absent() {
        let header = "33@apm=0|0|12345|67890|span|tx|1|notafloat|1563574856827";
        let state = TraceState::parse(&[header], "33").unwrap();
        assert_eq!(state.agent_entry.unwrap().priority, None);
    }

    #[test]
    fn test_agent_entry_wrong_field_count_is_error() {
        assert!(TraceState::parse(&["33@apm=0|0|12345|67890|span"], "33").is_err());
    }
}
