// SPDX-License-Identifier: Apache-2.0

//! One reservoir per event category, sized from configuration.

use apm_core::config::AgentConfig;

use crate::event::{
    CustomEvent, ErrorEvent, EventCategory, LogEvent, SpanEvent, TransactionEvent,
};
use crate::reservoir::SamplingReservoir;

/// The full set of reservoirs for one reporting target.
#[derive(Debug)]
pub struct EventReservoirs {
    pub transactions: SamplingReservoir<TransactionEvent>,
    pub spans: SamplingReservoir<SpanEvent>,
    pub errors: SamplingReservoir<ErrorEvent>,
    pub custom: SamplingReservoir<CustomEvent>,
    pub logs: SamplingReservoir<LogEvent>,
}

impl EventReservoirs {
    pub fn from_config(config: &AgentConfig) -> Self {
        EventReservoirs {
            transactions: SamplingReservoir::new(config.transaction_reservoir_size),
            spans: SamplingReservoir::new(config.span_reservoir_size),
            errors: SamplingReservoir::new(config.error_reservoir_size),
            custom: SamplingReservoir::new(config.custom_reservoir_size),
            logs: SamplingReservoir::new(config.log_reservoir_size),
        }
    }

    pub fn capacity_for(&self, category: EventCategory) -> usize {
        match category {
            EventCategory::Transaction => self.transactions.capacity(),
            EventCategory::Span => self.spans.capacity(),
            EventCategory::Error => self.errors.capacity(),
            EventCategory::Custom => self.custom.capacity(),
            EventCategory::Log => self.logs.capacity(),
        }
    }

    /// Server-driven resize, applied between harvest cycles.
    pub fn set_capacity(&self, category: EventCategory, capacity: usize) {
        match category {
            EventCategory::Transaction => self.transactions.set_capacity(capacity),
            EventCategory::Span => self.spans.set_capacity(capacity),
            EventCategory::Error => self.errors.set_capacity(capacity),
            EventCategory::Custom => self.custom.set_capacity(capacity),
            EventCategory::Log => self.logs.set_capacity(capacity),
        }
    }

    pub fn clear_all(&self) {
        self.transactions.clear();
        self.spans.clear();
        self.errors.clear();
        self.custom.clear();
        self.logs.clear();
    }
}
