// SPDX-License-Identifier: Apache-2.0

//! The transaction state machine.
//!
//! All mutable state sits behind one per-transaction mutex, so unrelated
//! transactions never contend. Finish evaluation re-runs on every activity
//! completion and token expiration; it is idempotent and commutative over
//! arrival order. Listener dispatch always happens after the lock is
//! released.

use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::debug;

use apm_core::config::AgentConfig;
use apm_core::metric_names;
use apm_core::stats::StatsEngine;
use apm_trace_context::inbound::ParsedContext;
use apm_trace_context::outbound::{encode_outbound, OutboundContext, OutboundHeaders};
use apm_trace_context::path_hash::{calculate_path_hash, int_to_hex, AlternatePathHashes};
use apm_trace_context::priority::is_sampled_priority;
use apm_trace_context::SAMPLED_PRIORITY;

use crate::finished::{
    Attributes, ErrorInfo, FinishedTransaction, TracerRollup, TransactionListener,
};
use crate::guid::{new_guid, new_trace_id};
use crate::naming::{NamePriority, TransactionName};
use crate::segment::Segment;
use crate::token::{Token, TokenId};
use crate::tracer::{ActivityId, TimeoutCause, TracerId, TracerKind, TracerRecord, TracerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Finished,
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct ActivityState {
    tracers: Vec<TracerState>,
    stack: Vec<TracerId>,
    finished: bool,
    ignored: bool,
    is_root: bool,
    /// Tracer active on the caller's activity when this one was created.
    /// Roots the activity's tracers into the caller's tree.
    parent_link: Option<(ActivityId, TracerId)>,
    /// Forced-finish deadline for segment and token-linked activities.
    deadline: Option<(Instant, TimeoutCause)>,
}

impl ActivityState {
    fn new(
        is_root: bool,
        parent_link: Option<(ActivityId, TracerId)>,
        deadline: Option<(Instant, TimeoutCause)>,
    ) -> Self {
        ActivityState {
            tracers: Vec::new(),
            stack: Vec::new(),
            finished: false,
            ignored: false,
            is_root,
            parent_link,
            deadline,
        }
    }
}

#[derive(Debug)]
struct TokenState {
    expired: bool,
    linked: bool,
    issued_at: Instant,
}

struct TxState {
    phase: Phase,
    ignored: bool,
    name: TransactionName,
    activities: Vec<ActivityState>,
    running_activities: usize,
    root_activity_finished: bool,
    tokens: Vec<TokenState>,
    pending_tokens: usize,
    tracer_count: usize,
    rollup: TracerRollup,
    segment_clamp_recorded: bool,
    token_clamp_recorded: bool,
    priority: f32,
    inbound: ParsedContext,
    current_path_hash: Option<u32>,
    alternate_path_hashes: AlternatePathHashes,
    last_activity_finish: Option<Instant>,
    /// Rendered headers for the most recent requesting span.
    outbound_cache: Option<(String, OutboundHeaders)>,
    error: Option<ErrorInfo>,
    timeout_cause: Option<TimeoutCause>,
    user_attributes: Attributes,
    agent_attributes: Attributes,
}

/// What finish evaluation decided, carried out of the lock for dispatch.
enum Outcome {
    Finished(Box<FinishedTransaction>),
    Cancelled(String),
}

/// Hook through which finished transactions leave the correlation model.
/// The registry installs itself here so finished guids drop their strong
/// reference.
pub(crate) trait CompletionSink: Send + Sync {
    fn transaction_completed(&self, guid: &str);
    fn listeners(&self) -> Vec<Arc<dyn TransactionListener>>;
}

pub struct Transaction {
    guid: String,
    trace_id: String,
    started_at: Instant,
    start_timestamp_ms: u64,
    config: Arc<AgentConfig>,
    stats: Arc<Mutex<StatsEngine>>,
    sink: Weak<dyn CompletionSink>,
    inner: Mutex<TxState>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("guid", &self.guid)
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

pub(crate) const ROOT_ACTIVITY: ActivityId = ActivityId(0);

impl Transaction {
    pub(crate) fn new(
        config: Arc<AgentConfig>,
        stats: Arc<Mutex<StatsEngine>>,
        sink: Weak<dyn CompletionSink>,
        inbound: ParsedContext,
        priority: f32,
    ) -> Arc<Transaction> {
        let trace_id = inbound.trace_id.clone().unwrap_or_else(new_trace_id);
        let start_timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since| since.as_millis() as u64)
            .unwrap_or(0);

        Arc::new(Transaction {
            guid: new_guid(),
            trace_id,
            started_at: Instant::now(),
            start_timestamp_ms,
            config,
            stats,
            sink,
            inner: Mutex::new(TxState {
                phase: Phase::Running,
                ignored: false,
                name: TransactionName::default(),
                activities: vec![ActivityState::new(true, None, None)],
                running_activities: 1,
                root_activity_finished: false,
                tokens: Vec::new(),
                pending_tokens: 0,
                tracer_count: 0,
                rollup: TracerRollup::default(),
                segment_clamp_recorded: false,
                token_clamp_recorded: false,
                priority,
                inbound,
                current_path_hash: None,
                alternate_path_hashes: AlternatePathHashes::new(),
                last_activity_finish: None,
                outbound_cache: None,
                error: None,
                timeout_cause: None,
                user_attributes: Attributes::new(),
                agent_attributes: Attributes::new(),
            }),
        })
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn priority(&self) -> f32 {
        self.lock().priority
    }

    pub fn is_finished(&self) -> bool {
        self.lock().phase != Phase::Running
    }

    pub fn is_ignored(&self) -> bool {
        self.lock().ignored
    }

    pub fn name(&self) -> Option<String> {
        self.lock().name.as_str().map(str::to_string)
    }

    /// Exclude this transaction from all reporting. New segments, tracers
    /// and tokens are vetoed; already-running work finishes without error.
    pub fn ignore(&self) {
        self.lock().ignored = true;
    }

    /// Rename the transaction. Lower-priority candidates and any update
    /// after a freeze are rejected.
    pub fn set_name(
        &self,
        priority: NamePriority,
        freeze: bool,
        category: &str,
        parts: &[&str],
    ) -> bool {
        let mut state = self.lock();
        let renamed = state.name.set(priority, freeze, category, parts);
        if renamed && self.config.path_hashes_enabled {
            let hash = calculate_path_hash(
                Some(&self.config.app_name),
                state.name.as_str(),
                state.inbound.referring_path_hash,
            );
            state.alternate_path_hashes.record(hash);
            state.current_path_hash = Some(hash);
        }
        renamed
    }

    pub fn freeze_name(&self) {
        self.lock().name.freeze();
    }

    pub fn add_user_attribute(&self, key: &str, value: Value) {
        self.lock().user_attributes.insert(key.to_string(), value);
    }

    pub fn add_agent_attribute(&self, key: &str, value: Value) {
        self.lock().agent_attributes.insert(key.to_string(), value);
    }

    /// Record an error. An unexpected error boosts the priority over the
    /// sampled threshold so the trace is retained.
    pub fn notice_error(&self, error_class: &str, message: &str, expected: bool) {
        let mut state = self.lock();
        if state.error.as_ref().map(|e| e.expected).unwrap_or(true) {
            state.error = Some(ErrorInfo {
                error_class: error_class.to_string(),
                message: message.to_string(),
                expected,
            });
        }
        if !expected && state.priority < SAMPLED_PRIORITY {
            state.priority = SAMPLED_PRIORITY;
            // Already-rendered headers carry the old priority.
            state.outbound_cache = None;
        }
    }

    /// Start a tracer on the given activity. Returns `None` when the
    /// transaction is ignored or finished, or the activity already
    /// completed; callers treat that as "no instrumentation".
    pub fn tracer_started(
        &self,
        activity: ActivityId,
        category: &str,
        name: &str,
    ) -> Option<TracerId> {
        let mut state = self.lock();
        self.tracer_started_locked(&mut state, activity, category, name)
    }

    fn tracer_started_locked(
        &self,
        state: &mut TxState,
        activity: ActivityId,
        category: &str,
        name: &str,
    ) -> Option<TracerId> {
        if state.phase != Phase::Running || state.ignored {
            return None;
        }
        if state
            .activities
            .get(activity.0)
            .map(|a| a.finished)
            .unwrap_or(true)
        {
            return None;
        }

        let kind = if state.tracer_count < self.config.max_tracers {
            TracerKind::Full
        } else {
            if !state.segment_clamp_recorded {
                state.segment_clamp_recorded = true;
                self.record_value(
                    metric_names::SUPPORTABILITY_TRANSACTION_SEGMENT_CLAMP,
                    (self.config.max_tracers + 1) as f64,
                );
                debug!(guid = %self.guid, limit = self.config.max_tracers, "tracer clamp tripped");
            }
            TracerKind::RollupOnly
        };

        let activity_state = &mut state.activities[activity.0];
        let parent = activity_state.stack.last().copied();
        let id = TracerId(activity_state.tracers.len());
        activity_state.tracers.push(TracerState::new(
            name.to_string(),
            category.to_string(),
            kind,
            parent,
        ));
        if let Some(parent) = parent {
            activity_state.tracers[parent.0].children.push(id);
        }
        activity_state.stack.push(id);
        state.tracer_count += 1;
        Some(id)
    }

    /// Finish a tracer. Misuse (double finish, out-of-order finish) returns
    /// false and leaves state untouched. Finishing the last tracer of an
    /// activity completes that activity and re-runs finish evaluation.
    pub fn tracer_finished(&self, activity: ActivityId, tracer: TracerId, exit_code: i32) -> bool {
        let outcome = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                return false;
            }
            let mut rollup_duration = None;
            {
                let Some(activity_state) = state.activities.get_mut(activity.0) else {
                    return false;
                };
                if activity_state.finished || activity_state.stack.last() != Some(&tracer) {
                    debug!(guid = %self.guid, "tracer finished out of order");
                    return false;
                }
                activity_state.stack.pop();
                let tracer_state = &mut activity_state.tracers[tracer.0];
                let elapsed = tracer_state.started_at.elapsed();
                tracer_state.duration = Some(elapsed);
                tracer_state.exit_code = Some(exit_code);
                if tracer_state.kind == TracerKind::RollupOnly {
                    rollup_duration = Some(elapsed);
                }
            }
            if let Some(duration) = rollup_duration {
                state.rollup.record(duration);
            }

            if state.activities[activity.0].stack.is_empty() {
                complete_activity(&mut state, activity);
                self.evaluate_finish(&mut state)
            } else {
                None
            }
        };
        self.dispatch(outcome);
        true
    }

    /// Start a segment: a new activity owned by out-of-band work, with its
    /// own timeout deadline, parented to the tracer currently active on the
    /// caller's activity. `None` when the transaction is ignored or
    /// finished, which callers treat as a safe no-op marker.
    pub fn start_segment(
        self: &Arc<Self>,
        caller: ActivityId,
        category: &str,
        name: &str,
    ) -> Option<Segment> {
        let mut state = self.lock();
        if state.phase != Phase::Running || state.ignored {
            return None;
        }
        let parent_link = state
            .activities
            .get(caller.0)
            .filter(|a| !a.finished)
            .and_then(|a| a.stack.last().map(|tracer| (caller, *tracer)));
        let deadline = Instant::now() + self.config.segment_timeout;
        let activity = ActivityId(state.activities.len());
        state.activities.push(ActivityState::new(
            false,
            parent_link,
            Some((deadline, TimeoutCause::Segment)),
        ));
        state.running_activities += 1;

        match self.tracer_started_locked(&mut state, activity, category, name) {
            Some(tracer) => Some(Segment::new(Arc::downgrade(self), activity, tracer)),
            // Cannot happen for a freshly created activity, but never leave
            // a running activity with no way to finish.
            None => {
                complete_activity(&mut state, activity);
                None
            }
        }
    }

    pub(crate) fn end_segment(
        &self,
        activity: ActivityId,
        tracer: TracerId,
        start_thread: ThreadId,
    ) -> bool {
        let end_thread = std::thread::current().id();
        if end_thread != start_thread {
            let mut state = self.lock();
            if let Some(tracer_state) = state
                .activities
                .get_mut(activity.0)
                .and_then(|a| a.tracers.get_mut(tracer.0))
            {
                tracer_state.attributes.insert(
                    "start_thread".to_string(),
                    Value::String(format!("{start_thread:?}")),
                );
                tracer_state.attributes.insert(
                    "end_thread".to_string(),
                    Value::String(format!("{end_thread:?}")),
                );
            }
        }
        self.tracer_finished(activity, tracer, 0)
    }

    /// Drop an unfinished segment from the tree. The activity completes so
    /// the transaction can finish, but none of its tracers are retained.
    pub(crate) fn ignore_segment(&self, activity: ActivityId) -> bool {
        let outcome = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                return false;
            }
            {
                let Some(activity_state) = state.activities.get_mut(activity.0) else {
                    return false;
                };
                if activity_state.finished {
                    return false;
                }
                activity_state.ignored = true;
                activity_state.stack.clear();
            }
            complete_activity(&mut state, activity);
            self.evaluate_finish(&mut state)
        };
        self.dispatch(outcome);
        true
    }

    /// Hand out an async marker. The transaction cannot finish while any
    /// token is unresolved. `None` when ignored, finished, or clamped.
    pub fn create_token(self: &Arc<Self>) -> Option<Token> {
        let mut state = self.lock();
        if state.phase != Phase::Running || state.ignored {
            return None;
        }
        if state.tokens.len() >= self.config.max_tokens {
            if !state.token_clamp_recorded {
                state.token_clamp_recorded = true;
                self.record_value(
                    metric_names::SUPPORTABILITY_TRANSACTION_TOKEN_CLAMP,
                    (self.config.max_tokens + 1) as f64,
                );
            }
            return None;
        }
        let id = TokenId(state.tokens.len());
        state.tokens.push(TokenState {
            expired: false,
            linked: false,
            issued_at: Instant::now(),
        });
        state.pending_tokens += 1;
        Some(Token::new(Arc::downgrade(self), id))
    }

    /// Bind a new activity for the token's calling thread. Each token links
    /// at most once; a second link, an expired token, or a finished
    /// transaction all fail. The linked activity carries its own deadline
    /// so an idle worker can never pin the transaction.
    pub(crate) fn link_token(&self, token: TokenId) -> Option<ActivityId> {
        let mut state = self.lock();
        if state.phase != Phase::Running {
            return None;
        }
        {
            let token_state = state.tokens.get_mut(token.0)?;
            if token_state.expired || token_state.linked {
                return None;
            }
            token_state.linked = true;
        }
        let deadline = Instant::now() + self.config.token_timeout;
        let activity = ActivityId(state.activities.len());
        state.activities.push(ActivityState::new(
            false,
            None,
            Some((deadline, TimeoutCause::Token)),
        ));
        state.running_activities += 1;
        Some(activity)
    }

    /// Expire a token. Idempotent: the second call returns false. The last
    /// expiration re-runs finish evaluation.
    pub(crate) fn expire_token(&self, token: TokenId) -> bool {
        let outcome = {
            let mut state = self.lock();
            let Some(token_state) = state.tokens.get_mut(token.0) else {
                return false;
            };
            if token_state.expired {
                return false;
            }
            token_state.expired = true;
            state.pending_tokens -= 1;
            self.evaluate_finish(&mut state)
        };
        self.dispatch(outcome);
        true
    }

    /// Forcibly finish overdue segments and tokens. Called by the
    /// expiration sweeper, never by caller threads.
    pub(crate) fn expire_overdue(&self, now: Instant) {
        let outcome = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                return;
            }

            let overdue: Vec<(ActivityId, TimeoutCause)> = state
                .activities
                .iter()
                .enumerate()
                .filter_map(|(index, a)| match a.deadline {
                    Some((deadline, cause)) if !a.finished && deadline <= now => {
                        Some((ActivityId(index), cause))
                    }
                    _ => None,
                })
                .collect();
            for (activity, cause) in overdue {
                force_finish_activity(&mut state, activity, now);
                state.timeout_cause = Some(cause);
                self.increment_counter(match cause {
                    TimeoutCause::Segment => metric_names::SUPPORTABILITY_SEGMENT_TIMEOUT,
                    TimeoutCause::Token => metric_names::SUPPORTABILITY_TOKEN_TIMEOUT,
                });
            }

            let last_finish = state.last_activity_finish;
            let timeout = self.config.token_timeout;
            let overdue_tokens: Vec<usize> = state
                .tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| {
                    let base = last_finish
                        .map(|finish| finish.max(t.issued_at))
                        .unwrap_or(t.issued_at);
                    !t.expired && base + timeout <= now
                })
                .map(|(index, _)| index)
                .collect();
            for index in overdue_tokens {
                state.tokens[index].expired = true;
                state.pending_tokens -= 1;
                state.timeout_cause = Some(TimeoutCause::Token);
                self.increment_counter(metric_names::SUPPORTABILITY_TOKEN_TIMEOUT);
            }

            self.evaluate_finish(&mut state)
        };
        self.dispatch(outcome);
    }

    /// Outbound headers for a request made by the given tracer. Rendered
    /// once per span and cached; the cache drops whenever the priority
    /// moves.
    pub fn outbound_headers(&self, span_guid: &str) -> OutboundHeaders {
        let mut state = self.lock();
        if let Some((cached_guid, headers)) = &state.outbound_cache {
            if cached_guid == span_guid {
                return headers.clone();
            }
        }
        let headers = encode_outbound(
            &OutboundContext {
                trace_id: self.trace_id.clone(),
                span_id: span_guid.to_string(),
                transaction_id: Some(self.guid.clone()),
                priority: Some(state.priority),
                sampled: Some(is_sampled_priority(state.priority)),
                timestamp_ms: self.start_timestamp_ms,
                vendor_states: state.inbound.vendor_states.clone(),
            },
            &self.config,
        );
        state.outbound_cache = Some((span_guid.to_string(), headers.clone()));
        headers
    }

    /// The single finish decision point. Idempotent; callers dispatch the
    /// returned outcome after releasing the lock.
    fn evaluate_finish(&self, state: &mut TxState) -> Option<Outcome> {
        if state.phase != Phase::Running {
            return None;
        }
        if state.running_activities != 0
            || state.pending_tokens != 0
            || !state.root_activity_finished
        {
            return None;
        }

        let no_data = state
            .activities
            .iter()
            .all(|a| a.ignored || a.tracers.is_empty());
        if state.ignored || no_data {
            state.phase = Phase::Cancelled;
            return Some(Outcome::Cancelled(self.guid.clone()));
        }

        state.phase = Phase::Finished;
        Some(Outcome::Finished(Box::new(self.build_record(state))))
    }

    fn build_record(&self, state: &TxState) -> FinishedTransaction {
        let tracers = flatten_transaction(&state.activities);

        let mut intrinsics = Attributes::new();
        if state.segment_clamp_recorded {
            intrinsics.insert("segment_clamp".to_string(), Value::Bool(true));
        }
        if state.token_clamp_recorded {
            intrinsics.insert("token_clamp".to_string(), Value::Bool(true));
        }
        if let Some(cause) = state.timeout_cause {
            intrinsics.insert(
                "timeout_cause".to_string(),
                Value::String(cause.as_str().to_string()),
            );
        }
        if let Some(parent_type) = state.inbound.parent_type {
            intrinsics.insert(
                "parent.type".to_string(),
                Value::String(parent_type.to_string()),
            );
        }

        FinishedTransaction {
            guid: self.guid.clone(),
            name: state
                .name
                .as_str()
                .unwrap_or("OtherTransaction/unknown")
                .to_string(),
            trace_id: self.trace_id.clone(),
            start_timestamp_ms: self.start_timestamp_ms,
            duration: self.started_at.elapsed(),
            priority: state.priority,
            sampled: is_sampled_priority(state.priority),
            inbound: state.inbound.clone(),
            tracers,
            rollup: state.rollup,
            error: state.error.clone(),
            timeout_cause: state.timeout_cause,
            path_hash: state.current_path_hash.map(int_to_hex),
            alternate_path_hashes: state
                .current_path_hash
                .and_then(|hash| state.alternate_path_hashes.render(hash)),
            user_attributes: state.user_attributes.clone(),
            agent_attributes: state.agent_attributes.clone(),
            intrinsics,
        }
    }

    fn dispatch(&self, outcome: Option<Outcome>) {
        let Some(outcome) = outcome else { return };
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        sink.transaction_completed(&self.guid);
        match outcome {
            Outcome::Finished(record) => {
                for listener in sink.listeners() {
                    listener.transaction_finished(&record);
                }
            }
            Outcome::Cancelled(guid) => {
                debug!(%guid, "transaction cancelled");
                for listener in sink.listeners() {
                    listener.transaction_cancelled(&guid);
                }
            }
        }
    }

    fn increment_counter(&self, name: &str) {
        #[allow(clippy::expect_used)]
        self.stats
            .lock()
            .expect("lock poisoned")
            .increment_counter(name);
    }

    fn record_value(&self, name: &str, value: f64) {
        #[allow(clippy::expect_used)]
        self.stats
            .lock()
            .expect("lock poisoned")
            .record_value(name, value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TxState> {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("lock poisoned")
    }
}

fn complete_activity(state: &mut TxState, activity: ActivityId) {
    state.activities[activity.0].finished = true;
    state.running_activities -= 1;
    state.last_activity_finish = Some(Instant::now());
    if state.activities[activity.0].is_root {
        state.root_activity_finished = true;
    }
}

/// Timeout path: close every open tracer best-effort, then complete the
/// activity through the normal path.
fn force_finish_activity(state: &mut TxState, activity: ActivityId, now: Instant) {
    let mut rollup = TracerRollup::default();
    {
        let activity_state = &mut state.activities[activity.0];
        while let Some(tracer) = activity_state.stack.pop() {
            let tracer_state = &mut activity_state.tracers[tracer.0];
            let duration = now.saturating_duration_since(tracer_state.started_at);
            tracer_state.duration = Some(duration);
            tracer_state.exit_code = Some(-1);
            if tracer_state.kind == TracerKind::RollupOnly {
                rollup.record(duration);
            }
        }
    }
    state.rollup.count += rollup.count;
    state.rollup.total_duration += rollup.total_duration;
    complete_activity(state, activity);
}

/// Flatten every activity's finished `Full` tracers into one record list,
/// rewiring parent links to flat indices. A segment or linked activity's
/// root tracer resolves its parent through the activity's cross-activity
/// link; ignored activities and rollup-only tracers contribute nothing.
fn flatten_transaction(activities: &[ActivityState]) -> Vec<TracerRecord> {
    let mut records = Vec::new();
    let mut flat: Vec<Vec<Option<usize>>> = activities
        .iter()
        .map(|a| vec![None; a.tracers.len()])
        .collect();
    for (activity_index, activity) in activities.iter().enumerate() {
        if activity.ignored {
            continue;
        }
        for (index, tracer) in activity.tracers.iter().enumerate() {
            let (Some(duration), TracerKind::Full) = (tracer.duration, tracer.kind) else {
                continue;
            };
            let child_time: Duration = tracer
                .children
                .iter()
                .filter_map(|child| {
                    let child = &activity.tracers[child.0];
                    if child.kind == TracerKind::Full {
                        child.duration
                    } else {
                        None
                    }
                })
                .sum();
            let parent = match tracer.parent {
                Some(parent) => {
                    ancestor_flat_index(activity, &flat[activity_index], Some(parent))
                }
                // Activities are created after their caller, so the linked
                // tracer is already flattened when this one is reached.
                None => activity.parent_link.and_then(|(caller, caller_tracer)| {
                    ancestor_flat_index(
                        &activities[caller.0],
                        &flat[caller.0],
                        Some(caller_tracer),
                    )
                }),
            };
            flat[activity_index][index] = Some(records.len());
            records.push(TracerRecord {
                name: tracer.name.clone(),
                category: tracer.category.clone(),
                duration,
                exclusive_duration: duration.saturating_sub(child_time),
                exit_code: tracer.exit_code.unwrap_or(0),
                parent,
                attributes: tracer.attributes.clone(),
            });
        }
    }
    records
}

fn ancestor_flat_index(
    activity: &ActivityState,
    flat_index: &[Option<usize>],
    mut parent: Option<TracerId>,
) -> Option<usize> {
    while let Some(id) = parent {
        if let Some(index) = flat_index[id.0] {
            return Some(index);
        }
        parent = activity.tracers[id.0].parent;
    }
    None
}
