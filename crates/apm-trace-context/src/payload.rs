// SPDX-License-Identifier: Apache-2.0

//! The proprietary trace payload: a versioned JSON document, sent base64
//! encoded in the legacy header. Field names are wire-compatible and must
//! not change: `ty ac ap tr id tx pr sa ti tk` under `d`, version pair
//! under `v`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Highest payload major version this codec understands.
pub const SUPPORTED_MAJOR_VERSION: i64 = 0;
pub const MINOR_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentType {
    App,
    Browser,
    Mobile,
}

impl ParentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParentType::App => "App",
            ParentType::Browser => "Browser",
            ParentType::Mobile => "Mobile",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, ContextError> {
        match value {
            "App" => Ok(ParentType::App),
            "Browser" => Ok(ParentType::Browser),
            "Mobile" => Ok(ParentType::Mobile),
            other => Err(ContextError::UnknownParentType(other.to_string())),
        }
    }

    /// Numeric form used inside the tracestate entry.
    pub fn value(&self) -> u32 {
        match self {
            ParentType::App => 0,
            ParentType::Browser => 1,
            ParentType::Mobile => 2,
        }
    }

    pub fn from_value(value: u32) -> Result<Self, ContextError> {
        match value {
            0 => Ok(ParentType::App),
            1 => Ok(ParentType::Browser),
            2 => Ok(ParentType::Mobile),
            other => Err(ContextError::UnknownParentType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ParentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracePayload {
    pub parent_type: ParentType,
    pub account_id: String,
    /// Present only when it differs from the account id.
    pub trust_key: Option<String>,
    pub application_id: String,
    pub trace_id: String,
    /// Guid of the span that created the payload, absent when spans are off.
    pub span_id: Option<String>,
    pub transaction_id: Option<String>,
    pub priority: Option<f32>,
    pub sampled: Option<bool>,
    pub timestamp_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    v: [i64; 2],
    d: WireData,
}

#[derive(Serialize, Deserialize)]
struct WireData {
    ty: String,
    ac: String,
    ap: String,
    tr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sa: Option<bool>,
    ti: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tk: Option<String>,
}

impl TracePayload {
    /// JSON text form.
    pub fn text(&self) -> String {
        let wire = Wire {
            v: [SUPPORTED_MAJOR_VERSION, MINOR_VERSION],
            d: WireData {
                ty: self.parent_type.as_str().to_string(),
                ac: self.account_id.clone(),
                ap: self.application_id.clone(),
                tr: self.trace_id.clone(),
                id: self.span_id.clone(),
                tx: self.transaction_id.clone(),
                pr: self.priority,
                sa: self.sampled,
                ti: self.timestamp_ms,
                tk: self.trust_key.clone(),
            },
        };
        #[allow(clippy::expect_used)]
        serde_json::to_string(&wire).expect("payload serialization cannot fail")
    }

    /// Base64 form suitable for an HTTP header value.
    pub fn http_safe(&self) -> String {
        STANDARD.encode(self.text())
    }

    /// Parse either form. A leading `{` means raw JSON, anything else is
    /// treated as base64-wrapped JSON.
    pub fn parse(header: &str) -> Result<TracePayload, ContextError> {
        let trimmed = header.trim();
        if trimmed.is_empty() {
            return Err(ContextError::MissingField("payload"));
        }
        let json = if trimmed.starts_with('{') {
            trimmed.to_string()
        } else {
            let bytes = STANDARD
                .decode(trimmed)
                .map_err(|_| ContextError::MalformedBase64)?;
            String::from_utf8(bytes).map_err(|e| ContextError::MalformedJson(e.to_string()))?
        };

        let wire: Wire =
            serde_json::from_str(&json).map_err(|e| ContextError::MalformedJson(e.to_string()))?;

        if wire.v[0] > SUPPORTED_MAJOR_VERSION {
            return Err(ContextError::UnsupportedVersion(wire.v[0]));
        }
        if wire.d.ac.is_empty() {
            return Err(ContextError::MissingField("ac"));
        }
        if wire.d.ap.is_empty() {
            return Err(ContextError::MissingField("ap"));
        }
        if wire.d.tr.is_empty() {
            return Err(ContextError::MissingField("tr"));
        }
        if wire.d.id.is_none() && wire.d.tx.is_none() {
            return Err(ContextError::MissingField("id"));
        }

        Ok(TracePayload {
            parent_type: ParentType::from_str(&wire.d.ty)?,
            account_id: wire.d.ac,
            trust_key: wire.d.tk,
            application_id: wire.d.ap,
            trace_id: wire.d.tr,
            span_id: wire.d.id,
            transaction_id: wire.d.tx,
            priority: wire.d.pr,
            sampled: wire.d.sa,
            timestamp_ms: wire.d.ti,
        })
    }

    /// The key the receiver checks against its trusted accounts: the
    /// explicit trust key when present, the account id otherwise.
    pub fn effective_trust_key(&self) -> &str {
        self.trust_key.as_deref().unwrap_or(&self.account_id)
    }

    pub fn is_trusted(&self, trust_key: &str, trusted_account_keys: &[String]) -> bool {
        let effective = self.effective_trust_key();
        effective == trust_key || trusted_account_keys.iter().any(|k| k == effective)
    }
}
