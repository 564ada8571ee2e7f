// SPDX-License-Identifier: Apache-2.0

//! Expiration sweeper: a dedicated timer task that enforces segment and
//! token deadlines so a busy or leaked caller can never starve timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::TransactionRegistry;

pub fn spawn_expiration_sweeper(
    registry: Arc<TransactionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("expiration sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    registry.expire_overdue(Instant::now());
                }
            }
        }
    })
}
