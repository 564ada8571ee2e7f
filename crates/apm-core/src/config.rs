// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AgentError;

const DEFAULT_REPORTING_PERIOD_SECS: u64 = 60;
const DEFAULT_MIN_HARVEST_INTERVAL_SECS: u64 = 55;
const DEFAULT_INITIAL_HARVEST_DELAY_SECS: u64 = 30;

const DEFAULT_SPAN_RESERVOIR_SIZE: usize = 2_000;
const DEFAULT_TRANSACTION_RESERVOIR_SIZE: usize = 2_000;
const DEFAULT_ERROR_RESERVOIR_SIZE: usize = 100;
const DEFAULT_CUSTOM_RESERVOIR_SIZE: usize = 3_000;
const DEFAULT_LOG_RESERVOIR_SIZE: usize = 3_000;

const DEFAULT_MAX_TRACERS: usize = 3_000;
const DEFAULT_MAX_TOKENS: usize = 3_000;
const DEFAULT_SEGMENT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_TOKEN_TIMEOUT_SECS: u64 = 180;
const DEFAULT_EXPIRATION_SWEEP_MS: u64 = 1_000;

const DEFAULT_METRIC_LIMIT: usize = 15_000;
const DEFAULT_ERROR_PAYLOAD_MAX_BYTES: usize = 1_000_000;

/// How the agent treats a sampling decision made by a remote parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingPolicy {
    AlwaysOn,
    AlwaysOff,
    /// Honor the inbound priority when present, otherwise sample adaptively.
    #[default]
    Adaptive,
}

impl FromStr for SamplingPolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always_on" => Ok(SamplingPolicy::AlwaysOn),
            "always_off" => Ok(SamplingPolicy::AlwaysOff),
            "default" => Ok(SamplingPolicy::Adaptive),
            other => Err(AgentError::InvalidConfig(format!(
                "unknown sampling policy: {other}"
            ))),
        }
    }
}

/// Read-only configuration snapshot for one agent process.
///
/// Built once from the environment at startup; every component receives an
/// `Arc<AgentConfig>` and never observes mutation.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub app_name: String,
    pub account_id: String,
    pub primary_application_id: String,
    /// Trust key used to select our tracestate entry; falls back to the
    /// account id when unset.
    pub trust_key: String,
    /// Accounts whose inbound payloads are accepted.
    pub trusted_account_keys: Vec<String>,

    pub reporting_period: Duration,
    pub min_harvest_interval: Duration,
    pub initial_harvest_delay: Duration,

    pub span_reservoir_size: usize,
    pub transaction_reservoir_size: usize,
    pub error_reservoir_size: usize,
    pub custom_reservoir_size: usize,
    pub log_reservoir_size: usize,

    pub max_tracers: usize,
    pub max_tokens: usize,
    pub segment_timeout: Duration,
    pub token_timeout: Duration,
    pub expiration_sweep_interval: Duration,

    pub metric_limit: usize,
    pub error_payload_max_bytes: usize,

    /// Include the proprietary header alongside W3C on outbound requests.
    pub include_legacy_header: bool,
    /// Key for the legacy header obfuscation; `None` sends it unobfuscated.
    pub obfuscation_key: Option<String>,
    pub path_hashes_enabled: bool,

    pub remote_parent_sampled: SamplingPolicy,
    pub remote_parent_not_sampled: SamplingPolicy,
}

impl AgentConfig {
    pub fn from_env() -> Result<AgentConfig, AgentError> {
        let app_name = env::var("APM_APP_NAME")
            .map_err(|_| AgentError::InvalidConfig("APM_APP_NAME is not set".to_string()))?;
        let account_id = env::var("APM_ACCOUNT_ID")
            .map_err(|_| AgentError::InvalidConfig("APM_ACCOUNT_ID is not set".to_string()))?;
        let trust_key = env::var("APM_TRUST_KEY").unwrap_or_else(|_| account_id.clone());

        let trusted_account_keys = env::var("APM_TRUSTED_ACCOUNT_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let remote_parent_sampled = parse_policy_var("APM_REMOTE_PARENT_SAMPLED")?;
        let remote_parent_not_sampled = parse_policy_var("APM_REMOTE_PARENT_NOT_SAMPLED")?;

        Ok(AgentConfig {
            app_name,
            account_id,
            primary_application_id: env::var("APM_PRIMARY_APPLICATION_ID")
                .unwrap_or_else(|_| "0".to_string()),
            trust_key,
            trusted_account_keys,
            reporting_period: Duration::from_secs(
                env_u64("APM_REPORTING_PERIOD_SECS", DEFAULT_REPORTING_PERIOD_SECS),
            ),
            min_harvest_interval: Duration::from_secs(
                env_u64(
                    "APM_MIN_HARVEST_INTERVAL_SECS",
                    DEFAULT_MIN_HARVEST_INTERVAL_SECS,
                ),
            ),
            initial_harvest_delay: Duration::from_secs(
                env_u64(
                    "APM_INITIAL_HARVEST_DELAY_SECS",
                    DEFAULT_INITIAL_HARVEST_DELAY_SECS,
                ),
            ),
            span_reservoir_size: env_usize("APM_SPAN_RESERVOIR_SIZE", DEFAULT_SPAN_RESERVOIR_SIZE),
            transaction_reservoir_size: env_usize(
                "APM_TRANSACTION_RESERVOIR_SIZE",
                DEFAULT_TRANSACTION_RESERVOIR_SIZE,
            ),
            error_reservoir_size: env_usize(
                "APM_ERROR_RESERVOIR_SIZE",
                DEFAULT_ERROR_RESERVOIR_SIZE,
            ),
            custom_reservoir_size: env_usize(
                "APM_CUSTOM_RESERVOIR_SIZE",
                DEFAULT_CUSTOM_RESERVOIR_SIZE,
            ),
            log_reservoir_size: env_usize("APM_LOG_RESERVOIR_SIZE", DEFAULT_LOG_RESERVOIR_SIZE),
            max_tracers: env_usize("APM_SEGMENT_LIMIT", DEFAULT_MAX_TRACERS),
            max_tokens: env_usize("APM_TOKEN_LIMIT", DEFAULT_MAX_TOKENS),
            segment_timeout: Duration::from_secs(
                env_u64("APM_SEGMENT_TIMEOUT_SECS", DEFAULT_SEGMENT_TIMEOUT_SECS),
            ),
            token_timeout: Duration::from_secs(
                env_u64("APM_TOKEN_TIMEOUT_SECS", DEFAULT_TOKEN_TIMEOUT_SECS),
            ),
            expiration_sweep_interval: Duration::from_millis(
                env_u64("APM_EXPIRATION_SWEEP_MS", DEFAULT_EXPIRATION_SWEEP_MS),
            ),
            metric_limit: env_usize("APM_METRIC_LIMIT", DEFAULT_METRIC_LIMIT),
            error_payload_max_bytes: env_usize(
                "APM_ERROR_PAYLOAD_MAX_BYTES",
                DEFAULT_ERROR_PAYLOAD_MAX_BYTES,
            ),
            include_legacy_header: env::var("APM_EXCLUDE_LEGACY_HEADER")
                .map(|v| v != "true")
                .unwrap_or(true),
            obfuscation_key: env::var("APM_OBFUSCATION_KEY").ok(),
            path_hashes_enabled: env::var("APM_PATH_HASHES_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(false),
            remote_parent_sampled,
            remote_parent_not_sampled,
        })
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            app_name: "application".to_string(),
            account_id: "0".to_string(),
            primary_application_id: "0".to_string(),
            trust_key: "0".to_string(),
            trusted_account_keys: Vec::new(),
            reporting_period: Duration::from_secs(DEFAULT_REPORTING_PERIOD_SECS),
            min_harvest_interval: Duration::from_secs(DEFAULT_MIN_HARVEST_INTERVAL_SECS),
            initial_harvest_delay: Duration::from_secs(DEFAULT_INITIAL_HARVEST_DELAY_SECS),
            span_reservoir_size: DEFAULT_SPAN_RESERVOIR_SIZE,
            transaction_reservoir_size: DEFAULT_TRANSACTION_RESERVOIR_SIZE,
            error_reservoir_size: DEFAULT_ERROR_RESERVOIR_SIZE,
            custom_reservoir_size: DEFAULT_CUSTOM_RESERVOIR_SIZE,
            log_reservoir_size: DEFAULT_LOG_RESERVOIR_SIZE,
            max_tracers: DEFAULT_MAX_TRACERS,
            max_tokens: DEFAULT_MAX_TOKENS,
            segment_timeout: Duration::from_secs(DEFAULT_SEGMENT_TIMEOUT_SECS),
            token_timeout: Duration::from_secs(DEFAULT_TOKEN_TIMEOUT_SECS),
            expiration_sweep_interval: Duration::from_millis(DEFAULT_EXPIRATION_SWEEP_MS),
            metric_limit: DEFAULT_METRIC_LIMIT,
            error_payload_max_bytes: DEFAULT_ERROR_PAYLOAD_MAX_BYTES,
            include_legacy_header: true,
            obfuscation_key: None,
            path_hashes_enabled: false,
            remote_parent_sampled: SamplingPolicy::Adaptive,
            remote_parent_not_sampled: SamplingPolicy::Adaptive,
        }
    }
}

fn parse_policy_var(name: &str) -> Result<SamplingPolicy, AgentError> {
    match env::var(name) {
        Ok(value) => value.parse(),
        Err(_) => Ok(SamplingPolicy::default()),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
