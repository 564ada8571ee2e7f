// SPDX-License-Identifier: Apache-2.0

//! Priority sampling reservoirs and the event model they hold.

pub mod event;
pub mod reservoir;
pub mod set;

pub use event::{
    Attributes, CustomEvent, ErrorEvent, EventCategory, LogEvent, PriorityAware, SpanEvent,
    TransactionEvent,
};
pub use reservoir::{ReservoirSnapshot, SamplingReservoir};
pub use set::EventReservoirs;
