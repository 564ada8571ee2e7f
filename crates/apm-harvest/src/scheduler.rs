// SPDX-License-Identifier: Apache-2.0

//! The harvest scheduler.
//!
//! Periodic mode runs a background timer; on-demand mode harvests only when
//! asked and skips targets that are not connected. Either way a harvest
//! snapshots reservoirs and stats first and performs all sends without
//! holding any lock, so producers are never blocked by network time.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use apm_core::config::AgentConfig;
use apm_core::metric_names;
use apm_core::stats::StatsEngine;
use apm_reservoir::{ErrorEvent, EventCategory, PriorityAware, SamplingReservoir};

use crate::target::{ConnectionState, ReportingTarget};
use crate::transport::{BatchKind, HarvestBatch, ServerConfig, Transport, TransportError};

/// Observer seam around each harvest cycle.
pub trait HarvestListener: Send + Sync {
    fn before_harvest(&self, _target: &str) {}
    fn after_harvest(&self, _target: &str) {}
    /// Collector-provided configuration, delivered on every connect.
    fn server_config(&self, _target: &str, _config: &ServerConfig) {}
}

pub struct HarvestScheduler {
    config: Arc<AgentConfig>,
    transport: Arc<dyn Transport>,
    targets: RwLock<Vec<Arc<ReportingTarget>>>,
    listeners: RwLock<Vec<Arc<dyn HarvestListener>>>,
}

impl HarvestScheduler {
    pub fn new(config: Arc<AgentConfig>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(HarvestScheduler {
            config,
            transport,
            targets: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn register_target(&self, target: Arc<ReportingTarget>) {
        #[allow(clippy::expect_used)]
        self.targets.write().expect("lock poisoned").push(target);
    }

    pub fn add_listener(&self, listener: Arc<dyn HarvestListener>) {
        #[allow(clippy::expect_used)]
        self.listeners.write().expect("lock poisoned").push(listener);
    }

    /// Bring a halted target back into rotation.
    pub fn restart_target(&self, name: &str) {
        for target in self.targets_snapshot() {
            if target.name == name && target.state() == ConnectionState::Halted {
                target.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// Periodic mode: first harvest after the initial delay, then every
    /// reporting period.
    pub fn spawn_periodic(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(scheduler.config.initial_harvest_delay) => {}
            }
            let mut ticker = tokio::time::interval(scheduler.config.reporting_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("harvest scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.harvest_cycle().await;
                    }
                }
            }
        })
    }

    /// One periodic cycle: connect targets that need it, then harvest.
    pub async fn harvest_cycle(&self) {
        for target in self.targets_snapshot() {
            match target.state() {
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    self.connect_target(&target).await;
                }
                _ => {}
            }
            if target.state() == ConnectionState::Connected {
                if self.should_harvest(&target) {
                    self.harvest_target(&target).await;
                } else {
                    debug!(target = %target.name, "minimum harvest interval not reached");
                }
            }
        }
    }

    /// On-demand mode: harvest synchronously, skipping any target whose
    /// connection state is not `Connected`.
    pub async fn harvest_now(&self) {
        for target in self.targets_snapshot() {
            if target.state() == ConnectionState::Connected {
                self.harvest_target(&target).await;
            } else {
                debug!(target = %target.name, "skipping harvest, not connected");
            }
        }
    }

    async fn connect_target(&self, target: &Arc<ReportingTarget>) {
        target.set_state(ConnectionState::Connecting);
        match self.transport.connect(&target.name).await {
            Ok(server_config) => {
                self.apply_server_config(target, &server_config);
                target.set_state(ConnectionState::Connected);
                debug!(target = %target.name, "connected");
            }
            Err(TransportError::FatalAuth(reason)) => {
                error!(target = %target.name, %reason, "authentication rejected, halting target");
                target.set_state(ConnectionState::Halted);
            }
            Err(error) => {
                warn!(target = %target.name, %error, "connect failed, will retry");
                target.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn apply_server_config(&self, target: &Arc<ReportingTarget>, server_config: &ServerConfig) {
        for (category, size) in &server_config.reservoir_sizes {
            target.reservoirs.set_capacity(*category, *size);
        }
        for listener in self.listeners_snapshot() {
            listener.server_config(&target.name, server_config);
        }
    }

    fn should_harvest(&self, target: &Arc<ReportingTarget>) -> bool {
        target
            .last_harvest()
            .map(|last| last.elapsed() >= self.config.min_harvest_interval)
            .unwrap_or(true)
    }

    async fn harvest_target(&self, target: &Arc<ReportingTarget>) {
        if !target.try_begin_harvest() {
            debug!(target = %target.name, "harvest already in progress");
            return;
        }
        for listener in self.listeners_snapshot() {
            listener.before_harvest(&target.name);
        }
        let started = Instant::now();

        let mut next_state = ConnectionState::Connected;
        let mut outcomes = Vec::with_capacity(EventCategory::ALL.len() + 1);
        for category in EventCategory::ALL {
            outcomes.push(self.send_category(target, category).await);
        }
        outcomes.push(self.send_metrics(target).await);
        for outcome in outcomes {
            match outcome {
                Ok(()) | Err(TransportError::Retryable(_)) => {}
                Err(TransportError::ForceReconnect(reason)) => {
                    warn!(target = %target.name, %reason, "collector requested reconnect");
                    next_state = ConnectionState::Connecting;
                }
                Err(TransportError::FatalAuth(reason)) => {
                    error!(target = %target.name, %reason, "authentication rejected, halting target");
                    next_state = ConnectionState::Halted;
                }
            }
        }

        self.record_stat(target, |stats| {
            stats.record_response_time(
                metric_names::SUPPORTABILITY_HARVEST_RESPONSE_TIME,
                started.elapsed(),
            );
        });
        target.mark_harvested(started);
        target.set_state(next_state);
        for listener in self.listeners_snapshot() {
            listener.after_harvest(&target.name);
        }
    }

    async fn send_category(
        &self,
        target: &Arc<ReportingTarget>,
        category: EventCategory,
    ) -> Result<(), TransportError> {
        match category {
            EventCategory::Transaction => {
                self.send_events(
                    target,
                    category,
                    &target.reservoirs.transactions,
                    metric_names::TRANSACTION_EVENTS_SENT,
                )
                .await
            }
            EventCategory::Span => {
                self.send_events(
                    target,
                    category,
                    &target.reservoirs.spans,
                    metric_names::SPAN_EVENTS_SENT,
                )
                .await
            }
            EventCategory::Error => self.send_errors(target).await,
            EventCategory::Custom => {
                self.send_events(
                    target,
                    category,
                    &target.reservoirs.custom,
                    metric_names::CUSTOM_EVENTS_SENT,
                )
                .await
            }
            EventCategory::Log => {
                self.send_events(
                    target,
                    category,
                    &target.reservoirs.logs,
                    metric_names::LOG_EVENTS_SENT,
                )
                .await
            }
        }
    }

    /// Drain one reservoir and send it. On failure the events go back
    /// through the reservoir, competing on priority with anything that
    /// arrived meanwhile.
    async fn send_events<T>(
        &self,
        target: &Arc<ReportingTarget>,
        category: EventCategory,
        reservoir: &SamplingReservoir<T>,
        sent_metric: &str,
    ) -> Result<(), TransportError>
    where
        T: Serialize + PriorityAware + Clone,
    {
        let snapshot = reservoir.drain();
        if snapshot.events.is_empty() {
            return Ok(());
        }
        let count = snapshot.events.len();
        let payload = json!({
            "events": snapshot.events,
            "seen": snapshot.seen,
            "sent": count,
        });
        let result = self
            .transport
            .send(HarvestBatch {
                target: target.name.clone(),
                kind: BatchKind::Events(category),
                payload,
            })
            .await;
        match result {
            Ok(()) => {
                self.record_stat(target, |stats| {
                    stats.increment_counter_by(sent_metric, count as u64);
                });
                Ok(())
            }
            Err(error) => {
                warn!(target = %target.name, %category, %error, "event batch failed, re-offering");
                for event in snapshot.events {
                    reservoir.offer(event);
                }
                Err(error)
            }
        }
    }

    /// Errors get the byte-budget treatment before leaving.
    async fn send_errors(&self, target: &Arc<ReportingTarget>) -> Result<(), TransportError> {
        let snapshot = target.reservoirs.errors.drain();
        if snapshot.events.is_empty() {
            return Ok(());
        }
        let events = self.halve_to_budget(target, snapshot.events);
        let count = events.len();
        let payload = json!({
            "events": events,
            "seen": snapshot.seen,
            "sent": count,
        });
        let result = self
            .transport
            .send(HarvestBatch {
                target: target.name.clone(),
                kind: BatchKind::Events(EventCategory::Error),
                payload,
            })
            .await;
        match result {
            Ok(()) => {
                self.record_stat(target, |stats| {
                    stats.increment_counter_by(metric_names::ERROR_EVENTS_SENT, count as u64);
                });
                Ok(())
            }
            Err(error) => {
                warn!(target = %target.name, %error, "error batch failed, re-offering");
                for event in events {
                    target.reservoirs.errors.offer(event);
                }
                Err(error)
            }
        }
    }

    /// Repeatedly drop the lowest-priority half until the serialized batch
    /// fits the byte budget. The drain snapshot arrives sorted by
    /// descending priority, so truncation keeps the most valuable half.
    fn halve_to_budget(
        &self,
        target: &Arc<ReportingTarget>,
        mut events: Vec<ErrorEvent>,
    ) -> Vec<ErrorEvent> {
        let budget = self.config.error_payload_max_bytes;
        loop {
            let bytes = serde_json::to_vec(&events).map(|v| v.len()).unwrap_or(0);
            if bytes <= budget || events.len() <= 1 {
                return events;
            }
            events.truncate(events.len() / 2);
            debug!(target = %target.name, retained = events.len(), "error payload over budget, halving");
            self.record_stat(target, |stats| {
                stats.increment_counter(metric_names::SUPPORTABILITY_ERROR_PAYLOAD_HALVED);
            });
        }
    }

    /// The merged stats batch. A failed send merges the snapshot back so
    /// nothing accumulated is lost.
    async fn send_metrics(&self, target: &Arc<ReportingTarget>) -> Result<(), TransportError> {
        let harvested = {
            #[allow(clippy::expect_used)]
            let mut stats = target.stats.lock().expect("lock poisoned");
            stats.harvest()
        };
        if harvested.is_empty() {
            return Ok(());
        }
        let payload = json!(harvested
            .iter()
            .map(|(name, stats)| json!([name.as_str(), stats]))
            .collect::<Vec<_>>());
        let result = self
            .transport
            .send(HarvestBatch {
                target: target.name.clone(),
                kind: BatchKind::Metrics,
                payload,
            })
            .await;
        if let Err(error) = &result {
            warn!(target = %target.name, %error, "metrics batch failed, carrying over");
            #[allow(clippy::expect_used)]
            let mut stats = target.stats.lock().expect("lock poisoned");
            for (name, entry) in &harvested {
                stats.merge_entry(name.as_str(), entry);
            }
        }
        result
    }

    fn record_stat(&self, target: &Arc<ReportingTarget>, f: impl FnOnce(&mut StatsEngine)) {
        #[allow(clippy::expect_used)]
        f(&mut target.stats.lock().expect("lock poisoned"))
    }

    fn targets_snapshot(&self) -> Vec<Arc<ReportingTarget>> {
        #[allow(clippy::expect_used)]
        self.targets.read().expect("lock poisoned").clone()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn HarvestListener>> {
        #[allow(clippy::expect_used)]
        self.listeners.read().expect("lock poisoned").clone()
    }
}
