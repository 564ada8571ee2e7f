// SPDX-License-Identifier: Apache-2.0

//! Bridges finished transactions into events and response-time metrics.
//! Installed on the transaction registry as a listener.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use apm_core::metric_names;
use apm_core::stats::StatsEngine;
use apm_correlation::guid::new_guid;
use apm_correlation::{FinishedTransaction, TransactionListener, TransactionRegistry};
use apm_reservoir::{
    ErrorEvent, EventReservoirs, SpanEvent, TransactionEvent,
};

use crate::scheduler::HarvestListener;
use crate::transport::ServerConfig;

/// Feeds the collector-provided sampling target back into the registry's
/// adaptive sampler.
pub struct SamplerConfigListener {
    registry: Arc<TransactionRegistry>,
}

impl SamplerConfigListener {
    pub fn new(registry: Arc<TransactionRegistry>) -> Arc<Self> {
        Arc::new(SamplerConfigListener { registry })
    }
}

impl HarvestListener for SamplerConfigListener {
    fn server_config(&self, _target: &str, config: &ServerConfig) {
        if let Some(target) = config.sampling_target {
            self.registry.set_sampling_target(target);
        }
    }
}

pub struct EventCollector {
    reservoirs: Arc<EventReservoirs>,
    stats: Arc<Mutex<StatsEngine>>,
}

impl EventCollector {
    pub fn new(reservoirs: Arc<EventReservoirs>, stats: Arc<Mutex<StatsEngine>>) -> Arc<Self> {
        Arc::new(EventCollector { reservoirs, stats })
    }
}

impl TransactionListener for EventCollector {
    fn transaction_finished(&self, record: &FinishedTransaction) {
        {
            #[allow(clippy::expect_used)]
            let mut stats = self.stats.lock().expect("lock poisoned");
            stats.record_response_time(&record.name, record.duration);
            stats.increment_counter(metric_names::TRANSACTION_EVENTS_SEEN);
            if record.error.is_some() {
                stats.increment_counter(metric_names::ERROR_EVENTS_SEEN);
            }
            if record.sampled {
                stats.increment_counter_by(
                    metric_names::SPAN_EVENTS_SEEN,
                    record.tracers.len() as u64,
                );
            }
        }

        let mut intrinsics = record.intrinsics.clone();
        if let Some(path_hash) = &record.path_hash {
            intrinsics.insert("path_hash".to_string(), Value::String(path_hash.clone()));
        }
        if let Some(alternates) = &record.alternate_path_hashes {
            intrinsics.insert(
                "alternate_path_hashes".to_string(),
                Value::String(alternates.clone()),
            );
        }

        self.reservoirs.transactions.offer(TransactionEvent {
            guid: record.guid.clone(),
            name: record.name.clone(),
            timestamp_ms: record.start_timestamp_ms,
            duration_ms: record.duration.as_secs_f64() * 1_000.0,
            priority: record.priority,
            sampled: record.sampled,
            trace_id: Some(record.trace_id.clone()),
            error: record.error.is_some(),
            intrinsics,
            user_attributes: record.user_attributes.clone(),
            agent_attributes: record.agent_attributes.clone(),
        });

        if let Some(error) = &record.error {
            self.reservoirs.errors.offer(ErrorEvent {
                error_class: error.error_class.clone(),
                message: error.message.clone(),
                transaction_guid: Some(record.guid.clone()),
                transaction_name: Some(record.name.clone()),
                timestamp_ms: record.start_timestamp_ms,
                priority: record.priority,
                expected: error.expected,
                attributes: record.agent_attributes.clone(),
            });
        }

        // Span events only exist for sampled transactions. Guids are
        // assigned here; parent links follow the flattened tree, with the
        // remote caller's span as the root's parent.
        if record.sampled {
            let guids: Vec<String> = record.tracers.iter().map(|_| new_guid()).collect();
            for (index, tracer) in record.tracers.iter().enumerate() {
                let parent_guid = match tracer.parent {
                    Some(parent) => Some(guids[parent].clone()),
                    None => record.inbound.parent_span_id.clone(),
                };
                self.reservoirs.spans.offer(SpanEvent {
                    guid: guids[index].clone(),
                    trace_id: record.trace_id.clone(),
                    transaction_guid: Some(record.guid.clone()),
                    parent_guid,
                    name: tracer.name.clone(),
                    category: tracer.category.clone(),
                    timestamp_ms: record.start_timestamp_ms,
                    duration_ms: tracer.duration.as_secs_f64() * 1_000.0,
                    priority: record.priority,
                    sampled: true,
                    attributes: tracer.attributes.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use apm_core::config::AgentConfig;
    use apm_correlation::ErrorInfo;
    use apm_trace_context::inbound::ParsedContext;

    use super::*;

    fn record(sampled: bool, with_error: bool) -> FinishedTransaction {
        FinishedTransaction {
            guid: "aaaaaaaaaaaaaaaa".to_string(),
            name: "WebTransaction/orders".to_string(),
            trace_id: "87b1c9a8687b4d9f8f767ac5e9c1ad6f".to_string(),
            start_timestamp_ms: 1_563_574_856_827,
            duration: Duration::from_millis(250),
            priority: if sampled { 1.5 } else { 0.2 },
            sampled,
            inbound: ParsedContext::default(),
            tracers: vec![
                apm_correlation::TracerRecord {
                    name: "dispatcher".to_string(),
                    category: "Web".to_string(),
                    duration: Duration::from_millis(250),
                    exclusive_duration: Duration::from_millis(50),
                    exit_code: 0,
                    parent: None,
                    attributes: apm_reservoir::Attributes::new(),
                },
                apm_correlation::TracerRecord {
                    name: "select".to_string(),
                    category: "Datastore".to_string(),
                    duration: Duration::from_millis(200),
                    exclusive_duration: Duration::from_millis(200),
                    exit_code: 0,
                    parent: Some(0),
                    attributes: apm_reservoir::Attributes::new(),
                },
            ],
            rollup: apm_correlation::TracerRollup::default(),
            error: with_error.then(|| ErrorInfo {
                error_class: "RuntimeException".to_string(),
                message: "boom".to_string(),
                expected: false,
            }),
            timeout_cause: None,
            path_hash: Some("3ff723aa".to_string()),
            alternate_path_hashes: None,
            user_attributes: apm_reservoir::Attributes::new(),
            agent_attributes: apm_reservoir::Attributes::new(),
            intrinsics: apm_reservoir::Attributes::new(),
        }
    }

    fn collector() -> (Arc<EventCollector>, Arc<EventReservoirs>, Arc<Mutex<StatsEngine>>) {
        let reservoirs = Arc::new(EventReservoirs::from_config(&AgentConfig::default()));
        let stats = Arc::new(Mutex::new(StatsEngine::default()));
        let collector = EventCollector::new(Arc::clone(&reservoirs), Arc::clone(&stats));
        (collector, reservoirs, stats)
    }

    #[test]
    fn test_sampled_transaction_produces_spans() {
        let (collector, reservoirs, stats) = collector();
        collector.transaction_finished(&record(true, false));

        assert_eq!(reservoirs.transactions.size(), 1);
        assert_eq!(reservoirs.spans.size(), 2);
        assert_eq!(reservoirs.errors.size(), 0);

        let spans = reservoirs.spans.as_list();
        let root = spans.iter().find(|s| s.name == "dispatcher").unwrap();
        let child = spans.iter().find(|s| s.name == "select").unwrap();
        assert_eq!(child.parent_guid.as_deref(), Some(root.guid.as_str()));
        assert_eq!(root.parent_guid, None);

        let stats = stats.lock().unwrap();
        assert_eq!(
            stats.get(metric_names::TRANSACTION_EVENTS_SEEN).unwrap().count,
            1
        );
        assert_eq!(stats.get(metric_names::SPAN_EVENTS_SEEN).unwrap().count, 2);
        assert!(stats.get("WebTransaction/orders").is_some());
    }

    #[test]
    fn test_unsampled_transaction_produces_no_spans() {
        let (collector, reservoirs, _) = collector();
        collector.transaction_finished(&record(false, false));
        assert_eq!(reservoirs.transactions.size(), 1);
        assert_eq!(reservoirs.spans.size(), 0);
    }

    #[test]
    fn test_error_event_emitted() {
        let (collector, reservoirs, stats) = collector();
        collector.transaction_finished(&record(true, true));
        assert_eq!(reservoirs.errors.size(), 1);
        let errors = reservoirs.errors.as_list();
        assert_eq!(errors[0].error_class, "RuntimeException");
        assert_eq!(
            stats.lock().unwrap().get(metric_names::ERROR_EVENTS_SEEN).unwrap().count,
            1
        );
    }

    #[test]
    fn test_root_span_parents_to_remote_caller() {
        let (collector, reservoirs, _) = collector();
        let mut finished = record(true, false);
        finished.inbound.parent_span_id = Some("5f474d64b9cc9b2a".to_string());
        collector.transaction_finished(&finished);
        let spans = reservoirs.spans.as_list();
        let root = spans.iter().find(|s| s.name == "dispatcher").unwrap();
        assert_eq!(root.parent_guid.as_deref(), Some("5f474d64b9cc9b2a"));
    }
}
