//! Bulk refresh scheduler: walks the city × vegetable matrix at fixed
//! times of day and refreshes each target straight from the remote source.
//!
//! ## Run modes
//!
//! `run_once()`, one pass over the matrix (the `refresh` command):
//!   1. Record a `refresh_runs` row
//!   2. For each target, fetch → persist, sleeping `item_delay` (+ jitter) after each target that hit the remote
//!   3. Close the run row with the counts
//!
//! `run_forever()`, the daemon: sleeps until the next configured time,
//! spawns `run_once()`, and does cache sweeps and the daily retention prune
//! in between. Only one run is ever active; a run that comes due while
//! another is in progress is skipped.

use crate::config::{AppConfig, SchedulerConfig};
use crate::error::ResolveError;
use crate::models::ScrapeTarget;
use crate::resolver::{RefreshOutcome, Resolver};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Scheduler {
    resolver: Arc<Resolver>,
    config: SchedulerConfig,
    retention_days: u32,
    sweep_interval: Duration,
    active: Mutex<()>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl Scheduler {
    pub fn new(resolver: Arc<Resolver>, config: &AppConfig) -> Self {
        Self {
            resolver,
            config: config.scheduler.clone(),
            retention_days: config.storage.retention_days,
            sweep_interval: Duration::from_secs(config.cache.sweep_interval_secs.max(1)),
            active: Mutex::new(()),
        }
    }

    /// Configured targets, or the catalog's full matrix.
    pub fn targets(&self) -> Vec<ScrapeTarget> {
        match &self.config.targets {
            Some(t) if !t.is_empty() => t.clone(),
            _ => self.resolver.catalog().refresh_matrix(),
        }
    }

    /// One pass over the matrix. `None` when another run is already active.
    pub async fn run_once(&self) -> Option<RunSummary> {
        let targets = self.targets();
        self.run_targets(&targets).await
    }

    pub async fn run_targets(&self, targets: &[ScrapeTarget]) -> Option<RunSummary> {
        let Ok(_guard) = self.active.try_lock() else {
            warn!("Refresh run already in progress, skipping this one");
            return None;
        };

        let store = self.resolver.store();
        let run_id = store
            .begin_refresh_run()
            .map_err(|e| warn!("Could not record refresh run: {}", e))
            .ok();

        info!("=== Refresh run: {} targets ===", targets.len());
        let started = Instant::now();
        let mut summary = RunSummary::default();

        // Pause only between targets that actually went to the remote source.
        let mut hit_remote = false;
        for target in targets {
            if hit_remote {
                sleep(self.pause()).await;
            }
            summary.attempted += 1;

            let outcome = self.resolver.refresh(target, self.config.force_refresh).await;
            hit_remote = !matches!(
                outcome,
                Ok(RefreshOutcome::StillFresh) | Err(ResolveError::InputInvalid { .. })
            );
            match outcome {
                Ok(RefreshOutcome::Fetched(obs)) => {
                    summary.succeeded += 1;
                    info!("{}: ₹{}/kg at {}", target, obs.price_per_kg(), obs.market_name);
                }
                Ok(RefreshOutcome::NoData) => {
                    summary.no_data += 1;
                    info!("{}: no data", target);
                }
                Ok(RefreshOutcome::StillFresh) => {
                    summary.skipped += 1;
                    debug!("{}: still fresh", target);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("{}: {}", target, e);
                }
            }
        }
        summary.duration = started.elapsed();

        if let Some(id) = run_id {
            let note = (summary.failed > 0).then(|| format!("{} targets failed", summary.failed));
            if let Err(e) = store.finish_refresh_run(id, summary.attempted, summary.succeeded, summary.failed, note.as_deref()) {
                warn!("Could not close refresh run {}: {}", id, e);
            }
        }

        info!(
            "=== Done: {} attempted | {} ok | {} no data | {} skipped | {} failed | {:.1?} ===",
            summary.attempted, summary.succeeded, summary.no_data, summary.skipped, summary.failed, summary.duration
        );
        Some(summary)
    }

    fn pause(&self) -> Duration {
        let base = self.config.item_delay();
        if self.config.jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::random_range(0..=self.config.jitter_ms))
    }

    /// Drop expired cache entries and, once a day, observations older than
    /// the retention window.
    fn maintain(&self, last_prune: &mut Option<Instant>) {
        let cache = self.resolver.cache();
        let swept = cache.sweep_expired();
        if swept > 0 {
            debug!("Swept {} expired cache entries ({:?})", swept, cache.stats());
        }

        if last_prune.is_some_and(|t| t.elapsed() < PRUNE_EVERY) {
            return;
        }
        match self.resolver.store().prune(self.retention_days) {
            Ok(n) => {
                info!("Pruned {} observations older than {} days", n, self.retention_days);
                *last_prune = Some(Instant::now());
            }
            Err(e) => error!("Retention prune failed: {}", e),
        }
    }

    /// Daemon loop; returns when `shutdown` resolves. An in-flight run is
    /// left to finish on its own task.
    pub async fn run_forever<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let times = self.config.parsed_run_times();
        if times.is_empty() {
            warn!("No valid scheduler run times configured; only maintenance will run");
        }

        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_prune = None;
        tokio::pin!(shutdown);

        loop {
            let now = Local::now().naive_local();
            let wait = next_run_at(now, &times)
                .and_then(|at| {
                    info!("Next refresh run at {}", at);
                    (at - now).to_std().ok()
                })
                .unwrap_or(PRUNE_EVERY);
            let due = sleep(wait);
            tokio::pin!(due);

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("Scheduler stopping");
                        return;
                    }
                    _ = ticker.tick() => self.maintain(&mut last_prune),
                    _ = &mut due => {
                        let scheduler = Arc::clone(&self);
                        tokio::spawn(async move {
                            scheduler.run_once().await;
                        });
                        break;
                    }
                }
            }
        }
    }
}

/// First configured time strictly after `now`, rolling over to tomorrow.
pub fn next_run_at(now: NaiveDateTime, times: &[NaiveTime]) -> Option<NaiveDateTime> {
    let today = now.date();
    times
        .iter()
        .map(|t| today.and_time(*t))
        .filter(|at| *at > now)
        .min()
        .or_else(|| {
            let first = times.iter().min()?;
            Some((today + ChronoDuration::days(1)).and_time(*first))
        })
}
