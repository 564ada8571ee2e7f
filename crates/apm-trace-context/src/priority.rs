// SPDX-License-Identifier: Apache-2.0

//! Sampling priority model. Priorities are floats; everything at or above
//! [`SAMPLED_PRIORITY`] is sampled by construction, which lets "force
//! sampled" paths encode the decision purely through the priority value.

use std::time::{Duration, Instant};

use apm_core::config::SamplingPolicy;

/// Priorities at or above this are always sampled.
pub const SAMPLED_PRIORITY: f32 = 1.0;
/// Assigned when policy says a remote-parent-sampled request is definitely
/// sampled. Strictly above everything an adaptive decision can produce.
pub const REMOTE_PARENT_SAMPLED_PRIORITY: f32 = 2.0;
pub const REMOTE_PARENT_NOT_SAMPLED_PRIORITY: f32 = 0.0;

const PRIORITY_DECIMAL_PLACES: f64 = 1e6;
const DEFAULT_SAMPLING_TARGET: u32 = 10;
const SAMPLING_TARGET_PERIOD: Duration = Duration::from_secs(60);

pub fn is_sampled_priority(priority: f32) -> bool {
    priority >= SAMPLED_PRIORITY
}

/// A remote parent's explicit sampled flag, when one arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampledState {
    True,
    False,
    #[default]
    Absent,
}

impl From<Option<bool>> for SampledState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => SampledState::True,
            Some(false) => SampledState::False,
            None => SampledState::Absent,
        }
    }
}

/// Random priority in `[0, 1)`, truncated to six decimal places so the
/// rendered form round-trips without drift.
pub fn next_priority() -> f32 {
    truncate_priority(rand::random::<f32>())
}

pub fn truncate_priority(priority: f32) -> f32 {
    ((f64::from(priority) * PRIORITY_DECIMAL_PLACES).floor() / PRIORITY_DECIMAL_PLACES) as f32
}

/// Render a priority the way it goes on the wire: up to six decimal places,
/// trailing zeros trimmed.
pub fn format_priority(priority: f32) -> String {
    let truncated = (f64::from(priority) * PRIORITY_DECIMAL_PLACES).floor() / PRIORITY_DECIMAL_PLACES;
    let mut rendered = format!("{truncated:.6}");
    while rendered.ends_with('0') {
        rendered.pop();
    }
    if rendered.ends_with('.') {
        rendered.pop();
    }
    rendered
}

/// Initial local priority for a request whose remote parent carried an
/// explicit sampled flag. `None` means the policy defers to the root
/// sampler (no flag arrived, or adaptive with no inbound priority).
pub fn priority_for_remote_parent(
    sampled: SampledState,
    inbound_priority: Option<f32>,
    remote_parent_sampled: SamplingPolicy,
    remote_parent_not_sampled: SamplingPolicy,
) -> Option<f32> {
    let policy = match sampled {
        SampledState::True => remote_parent_sampled,
        SampledState::False => remote_parent_not_sampled,
        SampledState::Absent => return inbound_priority,
    };
    match policy {
        SamplingPolicy::AlwaysOn => Some(REMOTE_PARENT_SAMPLED_PRIORITY),
        SamplingPolicy::AlwaysOff => Some(REMOTE_PARENT_NOT_SAMPLED_PRIORITY),
        SamplingPolicy::Adaptive => inbound_priority,
    }
}

/// Root sampler: the first `target` transactions of each period are boosted
/// over the sampled threshold, the rest keep their raw random priority.
#[derive(Debug)]
pub struct AdaptiveSampler {
    target: u32,
    sampled_in_period: u32,
    period_start: Instant,
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        AdaptiveSampler::new(DEFAULT_SAMPLING_TARGET)
    }
}

impl AdaptiveSampler {
    pub fn new(target: u32) -> Self {
        AdaptiveSampler {
            target,
            sampled_in_period: 0,
            period_start: Instant::now(),
        }
    }

    /// Server-provided sampling target, applied between harvest cycles.
    pub fn set_target(&mut self, target: u32) {
        self.target = target;
    }

    pub fn compute_priority(&mut self) -> f32 {
        let raw = next_priority();
        if self.period_start.elapsed() >= SAMPLING_TARGET_PERIOD {
            self.period_start = Instant::now();
            self.sampled_in_period = 0;
        }
        if self.sampled_in_period < self.target {
            self.sampled_in_period += 1;
            truncate_priority(raw + SAMPLED_PRIORITY)
        } else {
            raw
        }
    }
}
