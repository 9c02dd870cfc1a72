//! Periodic key rotation task.
//!
//! Every instance runs its own timer; ticks are not synchronized across
//! instances and the distributed lock decides which one rotates.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token fires. A rotation already in
//! progress runs to completion first, so the lock is always released.

use crate::provider::{JwkProvider, RotationOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the key rotation background task.
///
/// The first rotation happens one `period` after start; the ring created at
/// startup is not rotated immediately. Missed ticks are delayed rather than
/// replayed in a burst.
#[instrument(skip_all, name = "ks.task.key_rotation")]
pub async fn start_key_rotation(
    provider: Arc<JwkProvider>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "ks.task.key_rotation",
        period_seconds = period.as_secs(),
        "Starting key rotation task"
    );

    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_rotation(&provider).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "ks.task.key_rotation",
                    "Key rotation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "ks.task.key_rotation", "Key rotation task stopped");
}

/// Run a single rotation attempt and log its outcome.
pub(crate) async fn run_rotation(provider: &JwkProvider) -> &'static str {
    let outcome = provider.rotate_keys().await;
    match &outcome {
        RotationOutcome::Rotated { new_key_id, .. } => {
            info!(
                target: "ks.task.key_rotation",
                new_key_id = %new_key_id,
                "Scheduled rotation committed"
            );
        }
        RotationOutcome::LockNotAcquired | RotationOutcome::InFlight => {
            debug!(target: "ks.task.key_rotation", "Scheduled rotation skipped");
        }
        RotationOutcome::Failed(e) => {
            warn!(
                target: "ks.task.key_rotation",
                kind = e.kind(),
                "Scheduled rotation failed, will retry next tick"
            );
        }
    }
    outcome.status()
}
