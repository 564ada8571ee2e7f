// SPDX-License-Identifier: Apache-2.0

/// Decode/encode failures. None of these escape to instrumented code: the
/// inbound path catches every variant and degrades to "no trace context".
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("payload is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("payload is not valid base64")]
    MalformedBase64,

    #[error("unsupported payload major version {0}")]
    UnsupportedVersion(i64),

    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("account {0} is not trusted")]
    UntrustedAccount(String),

    #[error("malformed traceparent header")]
    MalformedTraceParent,

    #[error("malformed tracestate entry")]
    MalformedTraceState,

    #[error("unknown parent type {0}")]
    UnknownParentType(String),

    #[error("obfuscation key is empty")]
    EmptyObfuscationKey,
}
