// SPDX-License-Identifier: Apache-2.0

//! Harvest pipeline: finished transactions become events through the
//! collector, events pool in per-target reservoirs, and the scheduler ships
//! them through a [`Transport`] on a fixed cadence or on demand.

pub mod collector;
pub mod scheduler;
pub mod target;
pub mod transport;

pub use collector::{EventCollector, SamplerConfigListener};
pub use scheduler::{HarvestListener, HarvestScheduler};
pub use target::{ConnectionState, ReportingTarget};
pub use transport::{BatchKind, HarvestBatch, ServerConfig, Transport, TransportError};
