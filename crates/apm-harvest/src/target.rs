// SPDX-License-Identifier: Apache-2.0

//! Per-target connection state and harvest bookkeeping.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use apm_core::stats::StatsEngine;
use apm_reservoir::EventReservoirs;

/// `Disconnected -> Connecting -> Connected <-> Harvesting`. `Halted` is
/// terminal until an explicit restart; repeated auth failures land there so
/// the scheduler never retries a bad credential forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Harvesting,
    Halted,
}

pub struct ReportingTarget {
    pub name: String,
    pub reservoirs: Arc<EventReservoirs>,
    pub stats: Arc<Mutex<StatsEngine>>,
    state: Mutex<ConnectionState>,
    last_harvest: Mutex<Option<Instant>>,
}

impl ReportingTarget {
    pub fn new(
        name: &str,
        reservoirs: Arc<EventReservoirs>,
        stats: Arc<Mutex<StatsEngine>>,
    ) -> Arc<Self> {
        Arc::new(ReportingTarget {
            name: name.to_string(),
            reservoirs,
            stats,
            state: Mutex::new(ConnectionState::Disconnected),
            last_harvest: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        #[allow(clippy::expect_used)]
        *self.state.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("lock poisoned") = state;
    }

    /// Atomically enter `Harvesting` from `Connected`. A harvest still
    /// running when the next tick fires simply makes the tick a no-op.
    pub(crate) fn try_begin_harvest(&self) -> bool {
        #[allow(clippy::expect_used)]
        let mut state = self.state.lock().expect("lock poisoned");
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Harvesting;
            true
        } else {
            false
        }
    }

    pub(crate) fn last_harvest(&self) -> Option<Instant> {
        #[allow(clippy::expect_used)]
        *self.last_harvest.lock().expect("lock poisoned")
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn mark_harvested(&self, at: Instant) {
        *self.last_harvest.lock().expect("lock poisoned") = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use apm_core::config::AgentConfig;

    use super::*;

    fn target() -> Arc<ReportingTarget> {
        ReportingTarget::new(
            "primary",
            Arc::new(EventReservoirs::from_config(&AgentConfig::default())),
            Arc::new(Mutex::new(StatsEngine::default())),
        )
    }

    #[test]
    fn test_harvest_requires_connected() {
        let target = target();
        assert_eq!(target.state(), ConnectionState::Disconnected);
        assert!(!target.try_begin_harvest());

        target.set_state(ConnectionState::Connected);
        assert!(target.try_begin_harvest());
        assert_eq!(target.state(), ConnectionState::Harvesting);
        // Re-entrancy guard: the next tick is a no-op.
        assert!(!target.try_begin_harvest());
    }
}
