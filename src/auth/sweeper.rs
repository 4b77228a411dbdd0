//! Background cleanup of expired sessions, spent or expired action tokens
//! and elapsed lockouts.
//!
//! Runs on its own task at the configured interval with jitter. Request
//! handling never waits on it.

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use super::{action::ActionTokens, guard::LoginGuard, session::SessionStore, Clock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: u64,
    pub tokens_purged: u64,
    pub lockouts_cleared: u64,
}

pub struct Sweeper {
    sessions: SessionStore,
    tokens: ActionTokens,
    guard: LoginGuard,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        sessions: SessionStore,
        tokens: ActionTokens,
        guard: LoginGuard,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            tokens,
            guard,
            clock,
        }
    }

    /// One pass: deactivate expired sessions, drop dead action tokens, then
    /// reopen elapsed lockouts.
    ///
    /// # Errors
    /// Returns the first storage error.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let sessions_expired = self.sessions.purge_expired(now).await?;
        let tokens_purged = self.tokens.purge_expired(now).await?;
        let lockouts_cleared = self.guard.reconcile(now).await?;
        Ok(SweepReport {
            sessions_expired,
            tokens_purged,
            lockouts_cleared,
        })
    }

    /// Spawn the periodic loop. A zero interval disables it.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            info!("session sweeper disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            loop {
                let wait = jittered(interval, rng.gen_range(90..=110));
                debug!("next session sweep in {} ms", wait.as_millis());
                sleep(wait).await;

                match self.sweep_once().await {
                    Ok(report) => info!(
                        sessions_expired = report.sessions_expired,
                        tokens_purged = report.tokens_purged,
                        lockouts_cleared = report.lockouts_cleared,
                        "session sweep finished"
                    ),
                    Err(e) => error!("session sweep failed: {e:#}"),
                }
            }
        }))
    }
}

/// Scale `interval` by `percent` / 100.
fn jittered(interval: Duration, percent: u32) -> Duration {
    interval * percent / 100
}
