// SPDX-License-Identifier: Apache-2.0

//! The transport seam. The scheduler never does network I/O itself; it
//! classifies the errors this trait surfaces and drives the per-target
//! state machine from them.

use async_trait::async_trait;
use serde_json::Value;

use apm_reservoir::EventCategory;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transient failure. The target stays connected; the batch is retried
    /// through the reservoirs on the next cycle.
    #[error("retryable transport failure: {0}")]
    Retryable(String),

    /// The collector invalidated the session; reconnect before the next
    /// cycle.
    #[error("connection must be re-established: {0}")]
    ForceReconnect(String),

    /// Credentials rejected. Scheduling stops for the target until it is
    /// explicitly restarted.
    #[error("authentication rejected: {0}")]
    FatalAuth(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Events(EventCategory),
    Metrics,
}

/// One payload on its way out, tagged with the reporting target identity.
#[derive(Debug, Clone)]
pub struct HarvestBatch {
    pub target: String,
    pub kind: BatchKind,
    pub payload: Value,
}

/// Configuration the collector hands back on connect, applied between
/// harvest cycles.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub reservoir_sizes: Vec<(EventCategory, usize)>,
    pub sampling_target: Option<u32>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, target: &str) -> Result<ServerConfig, TransportError>;
    async fn send(&self, batch: HarvestBatch) -> Result<(), TransportError>;
}
