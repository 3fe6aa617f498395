//! Periodic evolution scheduler
//!
//! Every `evolution_check_interval_secs` one check is spawned per user. A
//! cycle waits for all of its checks before the next tick; users whose
//! previous check is still running (e.g. a manual request) come back as
//! `AlreadyInFlight`.

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db;
use crate::services::voice_evolution::{CheckRequest, EvolutionOutcome, VoiceEvolution};

/// Tally of one scheduler cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub users: usize,
    pub evolved: usize,
    pub deferred: usize,
    pub in_flight: usize,
    pub failed: usize,
}

pub struct EvolutionScheduler {
    db: SqlitePool,
    evolution: Arc<VoiceEvolution>,
    interval: Duration,
}

impl EvolutionScheduler {
    pub fn new(db: SqlitePool, evolution: Arc<VoiceEvolution>, interval: Duration) -> Self {
        Self {
            db,
            evolution,
            interval,
        }
    }

    /// Tick until `cancel_token` fires
    pub async fn run(self, cancel_token: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Evolution scheduler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Evolution scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let summary = self.run_cycle().await;
                    if summary.users > 0 {
                        info!(
                            users = summary.users,
                            evolved = summary.evolved,
                            deferred = summary.deferred,
                            in_flight = summary.in_flight,
                            failed = summary.failed,
                            "Evolution cycle finished"
                        );
                    }
                }
            }
        }
    }

    /// One check per known user
    pub async fn run_cycle(&self) -> CycleSummary {
        let users = match db::users::list_user_ids(&self.db).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Failed to list users for evolution cycle");
                return CycleSummary::default();
            }
        };

        let mut summary = CycleSummary {
            users: users.len(),
            ..CycleSummary::default()
        };

        let mut checks = JoinSet::new();
        for user_id in users {
            let evolution = Arc::clone(&self.evolution);
            checks.spawn(async move {
                (user_id, evolution.check(user_id, CheckRequest::Scheduled).await)
            });
        }

        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((_, Ok(EvolutionOutcome::Evolved { .. }))) => summary.evolved += 1,
                Ok((_, Ok(EvolutionOutcome::Deferred { .. }))) => summary.deferred += 1,
                Ok((_, Ok(EvolutionOutcome::AlreadyInFlight))) => summary.in_flight += 1,
                Ok((user_id, Ok(outcome))) => {
                    debug!(%user_id, ?outcome, "Evolution check finished");
                }
                Ok((user_id, Err(e))) => {
                    warn!(%user_id, error = %e, "Evolution check failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Evolution check task panicked");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
