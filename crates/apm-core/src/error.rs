// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the agent core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
