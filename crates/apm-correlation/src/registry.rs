// SPDX-License-Identifier: Apache-2.0

//! The transaction registry: the only owner of strong transaction
//! references. Everything else (contexts, tokens, segments) holds weak
//! handles, so a finished or timed-out transaction is freed as soon as the
//! registry drops it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use tracing::debug;

use apm_core::config::AgentConfig;
use apm_core::stats::StatsEngine;
use apm_trace_context::inbound::ParsedContext;
use apm_trace_context::priority::{priority_for_remote_parent, AdaptiveSampler};

use crate::context::WorkContext;
use crate::finished::TransactionListener;
use crate::transaction::{CompletionSink, Transaction, ROOT_ACTIVITY};

struct RegistryCore {
    transactions: Mutex<HashMap<String, Arc<Transaction>>>,
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
}

impl CompletionSink for RegistryCore {
    fn transaction_completed(&self, guid: &str) {
        #[allow(clippy::expect_used)]
        self.transactions
            .lock()
            .expect("lock poisoned")
            .remove(guid);
    }

    fn listeners(&self) -> Vec<Arc<dyn TransactionListener>> {
        #[allow(clippy::expect_used)]
        self.listeners.read().expect("lock poisoned").clone()
    }
}

pub struct TransactionRegistry {
    core: Arc<RegistryCore>,
    config: Arc<AgentConfig>,
    stats: Arc<Mutex<StatsEngine>>,
    sampler: Mutex<AdaptiveSampler>,
}

impl TransactionRegistry {
    pub fn new(config: Arc<AgentConfig>, stats: Arc<Mutex<StatsEngine>>) -> Self {
        TransactionRegistry {
            core: Arc::new(RegistryCore {
                transactions: Mutex::new(HashMap::new()),
                listeners: RwLock::new(Vec::new()),
            }),
            config,
            stats,
            sampler: Mutex::new(AdaptiveSampler::default()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        #[allow(clippy::expect_used)]
        self.core
            .listeners
            .write()
            .expect("lock poisoned")
            .push(listener);
    }

    /// The transaction bound to this unit of work, created if absent. No
    /// side effect when the context already holds a live transaction.
    pub fn get_or_create(&self, ctx: &mut WorkContext) -> Arc<Transaction> {
        if let Some(transaction) = ctx.transaction() {
            if !transaction.is_finished() {
                return transaction;
            }
        }
        self.begin(ctx, ParsedContext::default())
    }

    /// Start a transaction seeded with decoded inbound trace context.
    pub fn begin(&self, ctx: &mut WorkContext, inbound: ParsedContext) -> Arc<Transaction> {
        let priority = self.initial_priority(&inbound);
        let sink: Weak<RegistryCore> = Arc::downgrade(&self.core);
        let transaction = Transaction::new(
            Arc::clone(&self.config),
            Arc::clone(&self.stats),
            sink,
            inbound,
            priority,
        );
        #[allow(clippy::expect_used)]
        self.core
            .transactions
            .lock()
            .expect("lock poisoned")
            .insert(transaction.guid().to_string(), Arc::clone(&transaction));
        ctx.bind(&transaction, ROOT_ACTIVITY);
        debug!(guid = %transaction.guid(), trace_id = %transaction.trace_id(), "transaction started");
        transaction
    }

    fn initial_priority(&self, inbound: &ParsedContext) -> f32 {
        priority_for_remote_parent(
            inbound.sampled,
            inbound.priority,
            self.config.remote_parent_sampled,
            self.config.remote_parent_not_sampled,
        )
        .unwrap_or_else(|| {
            #[allow(clippy::expect_used)]
            self.sampler
                .lock()
                .expect("lock poisoned")
                .compute_priority()
        })
    }

    /// Server-provided sampling target, applied between harvest cycles.
    pub fn set_sampling_target(&self, target: u32) {
        #[allow(clippy::expect_used)]
        self.sampler.lock().expect("lock poisoned").set_target(target);
    }

    pub fn active_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        self.core.transactions.lock().expect("lock poisoned").len()
    }

    /// Run the timeout pass over every live transaction. The map lock is
    /// only held to snapshot; expiration runs per-transaction.
    pub fn expire_overdue(&self, now: Instant) {
        let transactions: Vec<Arc<Transaction>> = {
            #[allow(clippy::expect_used)]
            self.core
                .transactions
                .lock()
                .expect("lock poisoned")
                .values()
                .cloned()
                .collect()
        };
        for transaction in transactions {
            transaction.expire_overdue(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use apm_core::metric_names;
    use apm_trace_context::path_hash::{calculate_path_hash, hex_to_int, int_to_hex};
    use apm_trace_context::priority::SampledState;

    use super::*;
    use crate::finished::FinishedTransaction;
    use crate::naming::NamePriority;
    use crate::tracer::TimeoutCause;

    #[derive(Default)]
    struct Capture {
        finished: Mutex<Vec<FinishedTransaction>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl TransactionListener for Capture {
        fn transaction_finished(&self, record: &FinishedTransaction) {
            self.finished.lock().unwrap().push(record.clone());
        }

        fn transaction_cancelled(&self, guid: &str) {
            self.cancelled.lock().unwrap().push(guid.to_string());
        }
    }

    fn registry_with(config: AgentConfig) -> (TransactionRegistry, Arc<Capture>) {
        let registry = TransactionRegistry::new(
            Arc::new(config),
            Arc::new(Mutex::new(StatsEngine::default())),
        );
        let capture = Arc::new(Capture::default());
        registry.add_listener(Arc::clone(&capture) as Arc<dyn TransactionListener>);
        (registry, capture)
    }

    fn registry() -> (TransactionRegistry, Arc<Capture>) {
        registry_with(AgentConfig::default())
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let first = registry.get_or_create(&mut ctx);
        let second = registry.get_or_create(&mut ctx);
        assert_eq!(first.guid(), second.guid());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_simple_lifecycle() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        tx.set_name(NamePriority::Uri, false, "WebTransaction", &["orders"]);

        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "dispatcher").unwrap();
        let child = tx.tracer_started(activity, "Datastore", "select").unwrap();
        assert!(tx.tracer_finished(activity, child, 0));
        assert!(tx.tracer_finished(activity, root, 0));

        assert!(tx.is_finished());
        assert_eq!(registry.active_count(), 0);
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        let record = &finished[0];
        assert_eq!(record.name, "WebTransaction/orders");
        assert_eq!(record.tracers.len(), 2);
        assert_eq!(record.tracers[0].name, "dispatcher");
        assert_eq!(record.tracers[1].parent, Some(0));
        assert!(record.tracers[0].exclusive_duration <= record.tracers[0].duration);
    }

    #[test]
    fn test_out_of_order_finish_is_rejected() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let child = tx.tracer_started(activity, "Custom", "child").unwrap();
        assert!(!tx.tracer_finished(activity, root, 0));
        assert!(tx.tracer_finished(activity, child, 0));
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(!tx.tracer_finished(activity, root, 0));
    }

    #[test]
    fn test_ignored_transaction_is_cancelled() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        tx.ignore();
        assert!(tx.start_segment(activity, "External", "late").is_none());
        assert!(tx.create_token().is_none());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(tx.is_finished());
        assert_eq!(capture.finished.lock().unwrap().len(), 0);
        assert_eq!(capture.cancelled.lock().unwrap().len(), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_token_holds_transaction_open() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let token = tx.create_token().unwrap();

        assert!(tx.tracer_finished(activity, root, 0));
        assert!(!tx.is_finished());

        // Another unit of work links in through the token.
        let mut worker_ctx = WorkContext::new();
        assert!(token.link(&mut worker_ctx));
        let worker_activity = worker_ctx.activity().unwrap();
        let worker_tx = worker_ctx.transaction().unwrap();
        assert_eq!(worker_tx.guid(), tx.guid());
        let tracer = tx.tracer_started(worker_activity, "Java", "async").unwrap();
        assert!(tx.tracer_finished(worker_activity, tracer, 0));
        assert!(!tx.is_finished());

        assert!(token.expire());
        assert!(!token.expire());
        assert!(tx.is_finished());
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].tracers.len(), 2);
    }

    #[test]
    fn test_link_after_expire_fails() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let token = tx.create_token().unwrap();
        assert!(token.expire());
        let mut worker_ctx = WorkContext::new();
        assert!(!token.link(&mut worker_ctx));
        assert!(!worker_ctx.is_bound());
        tx.tracer_finished(activity, root, 0);
    }

    #[test]
    fn test_token_and_activity_completion_commute() {
        // Token expires before the root activity finishes.
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let token = tx.create_token().unwrap();
        assert!(token.expire());
        assert!(!tx.is_finished());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(tx.is_finished());
        assert_eq!(capture.finished.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tracer_clamp_retains_limit_and_counts_once() {
        let mut config = AgentConfig::default();
        config.max_tracers = 3;
        let stats = Arc::new(Mutex::new(StatsEngine::default()));
        let registry = TransactionRegistry::new(Arc::new(config), Arc::clone(&stats));
        let capture = Arc::new(Capture::default());
        registry.add_listener(Arc::clone(&capture) as Arc<dyn TransactionListener>);

        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        for i in 0..3000 {
            let tracer = tx
                .tracer_started(activity, "Custom", &format!("child-{i}"))
                .unwrap();
            assert!(tx.tracer_finished(activity, tracer, 0));
        }
        assert!(tx.tracer_finished(activity, root, 0));

        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].tracers.len(), 3);
        assert_eq!(finished[0].rollup.count, 2998);
        assert_eq!(finished[0].intrinsics["segment_clamp"], true);

        let stats = stats.lock().unwrap();
        let clamp = stats
            .get(metric_names::SUPPORTABILITY_TRANSACTION_SEGMENT_CLAMP)
            .unwrap();
        assert_eq!(clamp.count, 1);
        assert_eq!(clamp.total, 4.0);
    }

    #[test]
    fn test_token_clamp() {
        let mut config = AgentConfig::default();
        config.max_tokens = 2;
        let (registry, _) = registry_with(config);
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let first = tx.create_token().unwrap();
        let second = tx.create_token().unwrap();
        assert!(tx.create_token().is_none());
        first.expire();
        // The clamp counts issued tokens, not live ones.
        assert!(tx.create_token().is_none());
        second.expire();
    }

    #[test]
    fn test_segment_timeout_finishes_transaction() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let _segment = tx.start_segment(activity, "External", "slow-call").unwrap();
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(!tx.is_finished());

        registry.expire_overdue(Instant::now() + Duration::from_secs(601));
        assert!(tx.is_finished());
        assert_eq!(registry.active_count(), 0);
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].timeout_cause, Some(TimeoutCause::Segment));
        assert_eq!(finished[0].intrinsics["timeout_cause"], "segment");
    }

    #[test]
    fn test_token_timeout_finishes_transaction() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let _token = tx.create_token().unwrap();
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(!tx.is_finished());

        registry.expire_overdue(Instant::now() + Duration::from_secs(181));
        assert!(tx.is_finished());
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].timeout_cause, Some(TimeoutCause::Token));
    }

    #[test]
    fn test_segment_end_is_idempotent() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let segment = tx.start_segment(activity, "External", "call").unwrap();
        assert!(segment.end());
        assert!(!segment.end());
        tx.tracer_finished(activity, root, 0);
        assert!(tx.is_finished());
    }

    #[test]
    fn test_error_boosts_priority() {
        let mut config = AgentConfig::default();
        config.remote_parent_sampled = apm_core::config::SamplingPolicy::AlwaysOff;
        let (registry, _) = registry_with(config);
        let mut ctx = WorkContext::new();
        let inbound = ParsedContext {
            sampled: SampledState::True,
            ..ParsedContext::default()
        };
        let tx = registry.begin(&mut ctx, inbound);
        assert_eq!(tx.priority(), 0.0);
        tx.notice_error("java.lang.RuntimeException", "boom", false);
        assert!(tx.priority() >= 1.0);
    }

    #[test]
    fn test_segment_parents_to_active_tracer() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let segment = tx.start_segment(activity, "External", "call").unwrap();
        assert!(segment.end());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(tx.is_finished());

        let finished = capture.finished.lock().unwrap();
        let tracers = &finished[0].tracers;
        let root_index = tracers.iter().position(|t| t.name == "root").unwrap();
        let call = tracers.iter().find(|t| t.name == "call").unwrap();
        assert_eq!(call.parent, Some(root_index));
    }

    #[test]
    fn test_token_links_once() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let token = tx.create_token().unwrap();

        let mut worker_a = WorkContext::new();
        assert!(token.link(&mut worker_a));
        let mut worker_b = WorkContext::new();
        assert!(!token.link(&mut worker_b));
        assert!(!worker_b.is_bound());

        let worker_activity = worker_a.activity().unwrap();
        let tracer = tx.tracer_started(worker_activity, "Java", "async").unwrap();
        assert!(tx.tracer_finished(worker_activity, tracer, 0));
        assert!(token.expire());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(tx.is_finished());
    }

    #[test]
    fn test_idle_linked_activity_times_out() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let token = tx.create_token().unwrap();

        // The worker links in but never starts any work.
        let mut worker_ctx = WorkContext::new();
        assert!(token.link(&mut worker_ctx));
        assert!(token.expire());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(!tx.is_finished());

        registry.expire_overdue(Instant::now() + Duration::from_secs(181));
        assert!(tx.is_finished());
        assert_eq!(registry.active_count(), 0);
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].timeout_cause, Some(TimeoutCause::Token));
    }

    #[test]
    fn test_rollup_keeps_aggregate_timing() {
        let mut config = AgentConfig::default();
        config.max_tracers = 1;
        let (registry, capture) = registry_with(config);
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let clamped = tx.tracer_started(activity, "Custom", "clamped").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(tx.tracer_finished(activity, clamped, 0));
        assert!(tx.tracer_finished(activity, root, 0));

        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].tracers.len(), 1);
        assert_eq!(finished[0].rollup.count, 1);
        assert!(finished[0].rollup.total_duration >= Duration::from_millis(5));
    }

    #[test]
    fn test_ignored_segment_is_excluded() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let segment = tx.start_segment(activity, "External", "doomed").unwrap();
        assert!(segment.ignore_if_unfinished());
        assert!(!segment.end());
        assert!(tx.tracer_finished(activity, root, 0));
        assert!(tx.is_finished());

        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].tracers.len(), 1);
        assert_eq!(finished[0].tracers[0].name, "root");
        assert_eq!(finished[0].timeout_cause, None);
    }

    #[test]
    fn test_segment_ended_on_another_thread_records_identities() {
        let (registry, capture) = registry();
        let mut ctx = WorkContext::new();
        let tx = registry.get_or_create(&mut ctx);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        let segment = tx.start_segment(activity, "External", "handoff").unwrap();
        std::thread::spawn(move || assert!(segment.end()))
            .join()
            .unwrap();
        assert!(tx.tracer_finished(activity, root, 0));

        let finished = capture.finished.lock().unwrap();
        let handoff = finished[0]
            .tracers
            .iter()
            .find(|t| t.name == "handoff")
            .unwrap();
        assert_ne!(
            handoff.attributes["start_thread"],
            handoff.attributes["end_thread"]
        );
    }

    #[test]
    fn test_referring_path_hash_chains() {
        let mut config = AgentConfig::default();
        config.path_hashes_enabled = true;
        let (registry, capture) = registry_with(config);
        let mut ctx = WorkContext::new();
        let referring = hex_to_int("834f4c33").unwrap();
        let inbound = ParsedContext {
            referring_path_hash: Some(referring),
            ..ParsedContext::default()
        };
        let tx = registry.begin(&mut ctx, inbound);
        tx.set_name(NamePriority::Framework, false, "WebTransaction", &["chained"]);
        let activity = ctx.activity().unwrap();
        let root = tx.tracer_started(activity, "Web", "root").unwrap();
        assert!(tx.tracer_finished(activity, root, 0));

        let expected = int_to_hex(calculate_path_hash(
            Some("application"),
            Some("WebTransaction/chained"),
            Some(referring),
        ));
        let finished = capture.finished.lock().unwrap();
        assert_eq!(finished[0].path_hash.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_outbound_headers_cached_until_priority_changes() {
        let mut config = AgentConfig::default();
        config.remote_parent_sampled = apm_core::config::SamplingPolicy::AlwaysOff;
        let (registry, _) = registry_with(config);
        let mut ctx = WorkContext::new();
        let inbound = ParsedContext {
            sampled: SampledState::True,
            ..ParsedContext::default()
        };
        let tx = registry.begin(&mut ctx, inbound);

        let first = tx.outbound_headers("5f474d64b9cc9b2a");
        assert_eq!(first, tx.outbound_headers("5f474d64b9cc9b2a"));
        assert!(first.traceparent.ends_with("-00"));

        tx.notice_error("java.lang.RuntimeException", "boom", false);
        let boosted = tx.outbound_headers("5f474d64b9cc9b2a");
        assert_ne!(first, boosted);
        assert!(boosted.traceparent.ends_with("-01"));
    }

    #[test]
    fn test_inbound_priority_honored_by_adaptive_policy() {
        let (registry, _) = registry();
        let mut ctx = WorkContext::new();
        let inbound = ParsedContext {
            sampled: SampledState::True,
            priority: Some(0.75),
            trace_id: Some("87b1c9a8687b4d9f8f767ac5e9c1ad6f".to_string()),
            ..ParsedContext::default()
        };
        let tx = registry.begin(&mut ctx, inbound);
        assert_eq!(tx.priority(), 0.75);
        assert_eq!(tx.trace_id(), "87b1c9a8687b4d9f8f767ac5e9c1ad6f");
    }
}
