// SPDX-License-Identifier: Apache-2.0

//! Distributed trace context codec: the proprietary payload scheme, the W3C
//! `traceparent`/`tracestate` pair, path-hash bookkeeping and the sampling
//! priority model. Everything here is pure data transformation; transport
//! and correlation live elsewhere.

pub mod error;
pub mod inbound;
pub mod obfuscate;
pub mod outbound;
pub mod path_hash;
pub mod payload;
pub mod priority;
pub mod w3c;

pub use error::ContextError;
pub use inbound::{decode_inbound, ContextSource, InboundHeaders, ParsedContext};
pub use outbound::{encode_outbound, OutboundContext, OutboundHeaders};
pub use payload::{ParentType, TracePayload};
pub use priority::{is_sampled_priority, SampledState, SAMPLED_PRIORITY};
