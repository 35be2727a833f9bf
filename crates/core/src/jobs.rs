//! Periodic maintenance jobs.
//!
//! Five passes keep the store healthy and the affinity scores current:
//!
//! - `access_prune`: drop access events past retention (daily)
//! - `pattern_aggregation`: recompute co-access counts (hourly)
//! - `affinity_refresh`: fold new pattern evidence into scores (weekly)
//! - `share_sweep`: delete expired share tokens (daily)
//! - `cache_expiry`: delete expired cache entries (hourly)
//!
//! Every job has a running flag. A trigger that arrives while the same job
//! is still running is skipped rather than queued.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::Error;
use crate::cache::ContextDb;
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    AccessPrune,
    PatternAggregation,
    AffinityRefresh,
    ShareSweep,
    CacheExpiry,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::AccessPrune,
        JobKind::PatternAggregation,
        JobKind::AffinityRefresh,
        JobKind::ShareSweep,
        JobKind::CacheExpiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::AccessPrune => "access_prune",
            JobKind::PatternAggregation => "pattern_aggregation",
            JobKind::AffinityRefresh => "affinity_refresh",
            JobKind::ShareSweep => "share_sweep",
            JobKind::CacheExpiry => "cache_expiry",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// How often the scheduler triggers this job.
    pub fn period(&self, config: &AppConfig) -> Duration {
        let secs = match self {
            JobKind::AccessPrune => config.prune_interval_secs,
            JobKind::PatternAggregation => config.aggregate_interval_secs,
            JobKind::AffinityRefresh => config.affinity_interval_secs,
            JobKind::ShareSweep => config.share_sweep_interval_secs,
            JobKind::CacheExpiry => config.cache_sweep_interval_secs,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown job: {s}")))
    }
}

/// Per-job running flags.
#[derive(Debug, Default)]
pub struct JobGuard {
    running: [AtomicBool; 5],
}

impl JobGuard {
    /// Mark `kind` as running, or `None` if it already is.
    pub fn try_begin(&self, kind: JobKind) -> Option<JobPermit<'_>> {
        let flag = &self.running[kind.index()];
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobPermit { flag })
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running[kind.index()].load(Ordering::Acquire)
    }
}

/// Clears the job's running flag when dropped.
#[derive(Debug)]
pub struct JobPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for JobPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job ran; `affected` counts rows deleted or patterns/edges changed.
    Completed { affected: u64 },
    /// The same job was already running.
    Skipped,
}

/// Runs maintenance jobs on demand or on a schedule.
#[derive(Debug, Clone)]
pub struct Jobs {
    db: ContextDb,
    config: Arc<AppConfig>,
    guard: Arc<JobGuard>,
}

impl Jobs {
    pub fn new(db: ContextDb, config: Arc<AppConfig>) -> Self {
        Self { db, config, guard: Arc::new(JobGuard::default()) }
    }

    pub fn guard(&self) -> &JobGuard {
        &self.guard
    }

    /// Run one job now, unless it is already running.
    pub async fn run(&self, kind: JobKind) -> Result<JobOutcome, Error> {
        let Some(_permit) = self.guard.try_begin(kind) else {
            tracing::info!(job = %kind, "job already running, skipping trigger");
            return Ok(JobOutcome::Skipped);
        };

        let started = Instant::now();
        let config = &self.config;
        let affected = match kind {
            JobKind::AccessPrune => {
                self.db
                    .prune_access_retention(config.retention(), config.prune_batch_size)
                    .await?
            }
            JobKind::PatternAggregation => {
                self.db
                    .aggregate_patterns(config.adjacency_window())
                    .await?
                    .patterns_changed
            }
            JobKind::AffinityRefresh => {
                let report = self.db.refresh_affinity(config.affinity_params()).await?;
                report.created + report.updated
            }
            JobKind::ShareSweep => self.db.sweep_expired_shares(config.prune_batch_size).await?,
            JobKind::CacheExpiry => self.db.purge_expired_entries().await?,
        };

        tracing::info!(
            job = %kind,
            affected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job completed"
        );
        Ok(JobOutcome::Completed { affected })
    }

    /// Trigger every job on its configured period until `shutdown` flips to true.
    ///
    /// Each trigger runs on its own task so a slow job never delays another
    /// job's tick; a slow job's own next tick is skipped by the guard.
    pub fn spawn_scheduler(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let jobs = self.clone();

        tokio::spawn(async move {
            let mut prune = interval(JobKind::AccessPrune.period(&jobs.config));
            let mut aggregate = interval(JobKind::PatternAggregation.period(&jobs.config));
            let mut affinity = interval(JobKind::AffinityRefresh.period(&jobs.config));
            let mut share_sweep = interval(JobKind::ShareSweep.period(&jobs.config));
            let mut cache_sweep = interval(JobKind::CacheExpiry.period(&jobs.config));
            for timer in [&mut prune, &mut aggregate, &mut affinity, &mut share_sweep, &mut cache_sweep] {
                timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }

            tracing::info!(
                prune_secs = jobs.config.prune_interval_secs,
                aggregate_secs = jobs.config.aggregate_interval_secs,
                affinity_secs = jobs.config.affinity_interval_secs,
                "job scheduler started"
            );

            loop {
                let kind = tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("job scheduler shutting down");
                            break;
                        }
                        continue;
                    }
                    _ = prune.tick() => JobKind::AccessPrune,
                    _ = aggregate.tick() => JobKind::PatternAggregation,
                    _ = affinity.tick() => JobKind::AffinityRefresh,
                    _ = share_sweep.tick() => JobKind::ShareSweep,
                    _ = cache_sweep.tick() => JobKind::CacheExpiry,
                };

                let jobs = jobs.clone();
                tokio::spawn(async move {
                    if let Err(e) = jobs.run(kind).await {
                        tracing::error!(job = %kind, error = %e, "scheduled job failed");
                    }
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    async fn setup() -> (ContextDb, Jobs, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
        let db = ContextDb::open_in_memory_with_clock(Arc::new(clock.clone())).await.unwrap();
        let jobs = Jobs::new(db.clone(), Arc::new(AppConfig::default()));
        (db, jobs, clock)
    }

    #[test]
    fn test_job_names_roundtrip() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("reindex".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_guard_allows_one_runner() {
        let guard = JobGuard::default();
        let permit = guard.try_begin(JobKind::ShareSweep).unwrap();
        assert!(guard.try_begin(JobKind::ShareSweep).is_none());
        assert!(guard.try_begin(JobKind::CacheExpiry).is_some());

        drop(permit);
        assert!(!guard.is_running(JobKind::ShareSweep));
        assert!(guard.try_begin(JobKind::ShareSweep).is_some());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let (_, jobs, _) = setup().await;
        let held = jobs.guard().try_begin(JobKind::PatternAggregation).unwrap();

        assert_eq!(jobs.run(JobKind::PatternAggregation).await.unwrap(), JobOutcome::Skipped);

        drop(held);
        assert!(matches!(
            jobs.run(JobKind::PatternAggregation).await.unwrap(),
            JobOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cache_expiry_job() {
        let (db, jobs, clock) = setup().await;
        db.put_entry(&CacheKey::record("finding", "F-1"), b"ctx", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(2));

        assert_eq!(jobs.run(JobKind::CacheExpiry).await.unwrap(), JobOutcome::Completed { affected: 1 });
        assert!(!jobs.guard().is_running(JobKind::CacheExpiry));
    }

    #[tokio::test]
    async fn test_learning_pipeline() {
        let (db, jobs, clock) = setup().await;
        for user in ["alice", "bob", "carol", "dave"] {
            db.record_access(user, "finding", Some("F-1")).await.unwrap();
            clock.advance(chrono::Duration::minutes(3));
            db.record_access(user, "corrective_action", Some("CA-1")).await.unwrap();
            clock.advance(chrono::Duration::minutes(30));
        }

        assert_eq!(
            jobs.run(JobKind::PatternAggregation).await.unwrap(),
            JobOutcome::Completed { affected: 1 }
        );
        assert_eq!(
            jobs.run(JobKind::AffinityRefresh).await.unwrap(),
            JobOutcome::Completed { affected: 1 }
        );

        let related = db.related_types("finding", 5).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].target_type, "corrective_action");
        assert!((related[0].score - 4.0 / 50.0).abs() < 1e-9);

        clock.advance(chrono::Duration::days(31));
        assert_eq!(jobs.run(JobKind::AccessPrune).await.unwrap(), JobOutcome::Completed { affected: 8 });
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let (_, jobs, _) = setup().await;
        let (tx, rx) = watch::channel(false);
        let handle = jobs.spawn_scheduler(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
