//! Co-access pattern aggregation.
//!
//! Turns the access log into counts of "a user looked at type A, then at
//! type B shortly after". Counts are recomputed over the retained log on
//! every pass, so a pair that stops co-occurring shrinks as its old events
//! age out of retention.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use crate::Error;
use crate::access::AccessEvent;
use crate::cache::ContextDb;
use crate::clock::{from_db_timestamp, to_db_timestamp};

/// Why two record types tend to be looked at together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationType {
    CoAccess,
    Workflow,
    ParentChild,
    Reference,
    AuditFlow,
    Compliance,
    RiskRelated,
}

impl ExplanationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplanationType::CoAccess => "co_access",
            ExplanationType::Workflow => "workflow",
            ExplanationType::ParentChild => "parent_child",
            ExplanationType::Reference => "reference",
            ExplanationType::AuditFlow => "audit_flow",
            ExplanationType::Compliance => "compliance",
            ExplanationType::RiskRelated => "risk_related",
        }
    }

    /// Classify an ordered pair of record types.
    pub fn for_pair(source_type: &str, target_type: &str) -> Self {
        match (source_type, target_type) {
            ("engagement", "finding")
            | ("engagement", "working_paper")
            | ("engagement", "audit_program")
            | ("audit_program", "audit_procedure") => ExplanationType::ParentChild,

            ("finding", "corrective_action")
            | ("finding", "management_response")
            | ("corrective_action", "follow_up") => ExplanationType::Workflow,

            ("audit_plan", "engagement")
            | ("audit_program", "working_paper")
            | ("working_paper", "finding")
            | ("audit_procedure", "working_paper") => ExplanationType::AuditFlow,

            ("reconciliation", "journal_entry")
            | ("journal_entry", "reconciliation")
            | ("reconciliation", "bank_statement") => ExplanationType::Reference,

            ("compliance_requirement", "control")
            | ("control", "compliance_requirement")
            | ("regulation", "compliance_requirement") => ExplanationType::Compliance,

            ("finding", "risk") | ("risk", "control") | ("control", "risk") | ("risk", "finding") => {
                ExplanationType::RiskRelated
            }

            _ => ExplanationType::CoAccess,
        }
    }
}

impl fmt::Display for ExplanationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExplanationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "co_access" => Ok(ExplanationType::CoAccess),
            "workflow" => Ok(ExplanationType::Workflow),
            "parent_child" => Ok(ExplanationType::ParentChild),
            "reference" => Ok(ExplanationType::Reference),
            "audit_flow" => Ok(ExplanationType::AuditFlow),
            "compliance" => Ok(ExplanationType::Compliance),
            "risk_related" => Ok(ExplanationType::RiskRelated),
            other => Err(Error::InvalidInput(format!("unknown explanation type: {other}"))),
        }
    }
}

/// Directional co-access count between two record types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CoAccessPattern {
    pub source_type: String,
    pub target_type: String,
    pub co_access_count: u64,
    pub explanation_type: ExplanationType,
    /// Bumped every time the count changes.
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AggregationReport {
    pub events_scanned: u64,
    pub pairs_observed: u64,
    pub patterns_changed: u64,
}

/// Count ordered co-access pairs.
///
/// `events` must be ordered by user, then `accessed_at`, then id. For each
/// event, every distinct other record type the same user accessed at most
/// `window` earlier contributes one to (earlier type → this type).
pub fn co_access_counts(events: &[AccessEvent], window: Duration) -> BTreeMap<(String, String), u64> {
    let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();
    let mut recent: VecDeque<&AccessEvent> = VecDeque::new();
    let mut current_user: Option<&str> = None;

    for event in events {
        if current_user != Some(event.user.as_str()) {
            recent.clear();
            current_user = Some(event.user.as_str());
        }

        while let Some(front) = recent.front() {
            if event.accessed_at - front.accessed_at > window {
                recent.pop_front();
            } else {
                break;
            }
        }

        let sources: BTreeSet<&str> = recent
            .iter()
            .map(|earlier| earlier.record_type.as_str())
            .filter(|source| *source != event.record_type)
            .collect();
        for source in sources {
            *counts
                .entry((source.to_string(), event.record_type.clone()))
                .or_insert(0) += 1;
        }

        recent.push_back(event);
    }

    counts
}

impl ContextDb {
    /// Recompute co-access counts from the retained access log.
    ///
    /// Stored counts are replaced by the fresh ones; pairs no longer seen
    /// drop to zero but keep their row. Only real changes bump a pattern's
    /// revision, so re-running without new events changes nothing.
    pub async fn aggregate_patterns(&self, window: Duration) -> Result<AggregationReport, Error> {
        let events = self.access_events_by_user().await?;
        let counts = co_access_counts(&events, window);
        let now = to_db_timestamp(self.now());

        let mut report = AggregationReport {
            events_scanned: events.len() as u64,
            pairs_observed: counts.len() as u64,
            patterns_changed: 0,
        };

        let changed = self
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;

                let mut existing: HashMap<(String, String), i64> = HashMap::new();
                {
                    let mut stmt =
                        tx.prepare("SELECT source_type, target_type, co_access_count FROM co_access_patterns")?;
                    let rows = stmt.query_map([], |row| {
                        Ok(((row.get::<_, String>(0)?, row.get::<_, String>(1)?), row.get::<_, i64>(2)?))
                    })?;
                    for row in rows {
                        let (pair, count) = row?;
                        existing.insert(pair, count);
                    }
                }

                let mut changed = 0u64;

                for ((source, target), count) in &counts {
                    let count = *count as i64;
                    match existing.remove(&(source.clone(), target.clone())) {
                        Some(old) if old == count => {}
                        Some(_) => {
                            tx.execute(
                                "UPDATE co_access_patterns
                                SET co_access_count = ?3, revision = revision + 1, updated_at = ?4
                                WHERE source_type = ?1 AND target_type = ?2",
                                params![source, target, count, now],
                            )?;
                            changed += 1;
                        }
                        None => {
                            tx.execute(
                                "INSERT INTO co_access_patterns
                                (source_type, target_type, co_access_count, explanation_type, revision, updated_at)
                                VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                                params![
                                    source,
                                    target,
                                    count,
                                    ExplanationType::for_pair(source, target).as_str(),
                                    now
                                ],
                            )?;
                            changed += 1;
                        }
                    }
                }

                // Pairs absent from this pass stopped co-occurring.
                for ((source, target), old) in existing {
                    if old != 0 {
                        tx.execute(
                            "UPDATE co_access_patterns
                            SET co_access_count = 0, revision = revision + 1, updated_at = ?3
                            WHERE source_type = ?1 AND target_type = ?2",
                            params![source, target, now],
                        )?;
                        changed += 1;
                    }
                }

                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(Error::from)?;

        report.patterns_changed = changed;
        tracing::info!(
            events = report.events_scanned,
            pairs = report.pairs_observed,
            changed = report.patterns_changed,
            "aggregated co-access patterns"
        );
        Ok(report)
    }

    /// All stored patterns, highest count first.
    pub async fn list_patterns(&self) -> Result<Vec<CoAccessPattern>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<CoAccessPattern>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT source_type, target_type, co_access_count, explanation_type, revision, updated_at
                    FROM co_access_patterns ORDER BY co_access_count DESC, source_type, target_type",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?;

                let mut patterns = Vec::new();
                for row in rows {
                    let (source_type, target_type, count, explanation, revision, updated_at) = row?;
                    patterns.push(CoAccessPattern {
                        source_type,
                        target_type,
                        co_access_count: count as u64,
                        explanation_type: explanation.parse()?,
                        revision: revision as u64,
                        updated_at: from_db_timestamp(&updated_at)
                            .ok_or_else(|| Error::CorruptEntry(format!("unparseable timestamp: {updated_at}")))?,
                    });
                }
                Ok(patterns)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove every pattern. Affinity edges are left alone.
    pub async fn reset_patterns(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM co_access_patterns", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn event(id: i64, user: &str, record_type: &str, minutes: i64) -> AccessEvent {
        AccessEvent {
            id,
            user: user.into(),
            record_type: record_type.into(),
            record_id: None,
            accessed_at: start() + Duration::minutes(minutes),
        }
    }

    fn pair(source: &str, target: &str) -> (String, String) {
        (source.to_string(), target.to_string())
    }

    #[test]
    fn test_ordered_pair_within_window() {
        let events = vec![event(1, "alice", "engagement", 0), event(2, "alice", "finding", 5)];
        let counts = co_access_counts(&events, Duration::minutes(15));
        assert_eq!(counts.get(&pair("engagement", "finding")), Some(&1));
        assert_eq!(counts.get(&pair("finding", "engagement")), None);
    }

    #[test]
    fn test_outside_window_not_counted() {
        let events = vec![event(1, "alice", "engagement", 0), event(2, "alice", "finding", 16)];
        assert!(co_access_counts(&events, Duration::minutes(15)).is_empty());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let events = vec![event(1, "alice", "engagement", 0), event(2, "alice", "finding", 15)];
        assert_eq!(co_access_counts(&events, Duration::minutes(15)).len(), 1);
    }

    #[test]
    fn test_users_do_not_mix() {
        let events = vec![event(1, "alice", "engagement", 0), event(2, "bob", "finding", 1)];
        assert!(co_access_counts(&events, Duration::minutes(15)).is_empty());
    }

    #[test]
    fn test_same_type_not_paired_and_sources_deduplicated() {
        let events = vec![
            event(1, "alice", "finding", 0),
            event(2, "alice", "finding", 1),
            event(3, "alice", "corrective_action", 2),
        ];
        let counts = co_access_counts(&events, Duration::minutes(15));
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(&pair("finding", "corrective_action")), Some(&1));
    }

    #[test]
    fn test_explanation_table() {
        assert_eq!(ExplanationType::for_pair("finding", "corrective_action"), ExplanationType::Workflow);
        assert_eq!(ExplanationType::for_pair("engagement", "finding"), ExplanationType::ParentChild);
        assert_eq!(ExplanationType::for_pair("finding", "engagement"), ExplanationType::CoAccess);
        assert_eq!("risk_related".parse::<ExplanationType>().unwrap(), ExplanationType::RiskRelated);
    }

    async fn test_db() -> (ContextDb, ManualClock) {
        let clock = ManualClock::new(start());
        let db = ContextDb::open_in_memory_with_clock(Arc::new(clock.clone())).await.unwrap();
        (db, clock)
    }

    async fn view(db: &ContextDb, clock: &ManualClock, user: &str, record_type: &str) {
        db.record_access(user, record_type, Some("x")).await.unwrap();
        clock.advance(Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_aggregate_persists_counts_and_classification() {
        let (db, clock) = test_db().await;
        for user in ["alice", "bob", "carol"] {
            view(&db, &clock, user, "finding").await;
            view(&db, &clock, user, "corrective_action").await;
        }

        let report = db.aggregate_patterns(Duration::minutes(15)).await.unwrap();
        assert_eq!(report.events_scanned, 6);
        assert_eq!(report.patterns_changed, 1);

        let patterns = db.list_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].co_access_count, 3);
        assert_eq!(patterns[0].explanation_type, ExplanationType::Workflow);
        assert_eq!(patterns[0].revision, 1);
    }

    #[tokio::test]
    async fn test_reaggregate_without_new_events_changes_nothing() {
        let (db, clock) = test_db().await;
        view(&db, &clock, "alice", "engagement").await;
        view(&db, &clock, "alice", "finding").await;

        db.aggregate_patterns(Duration::minutes(15)).await.unwrap();
        let before = db.list_patterns().await.unwrap();

        clock.advance(Duration::hours(1));
        let report = db.aggregate_patterns(Duration::minutes(15)).await.unwrap();
        assert_eq!(report.patterns_changed, 0);
        assert_eq!(db.list_patterns().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_pruned_pairs_drop_to_zero_but_remain() {
        let (db, clock) = test_db().await;
        view(&db, &clock, "alice", "engagement").await;
        view(&db, &clock, "alice", "finding").await;
        db.aggregate_patterns(Duration::minutes(15)).await.unwrap();

        clock.advance(Duration::days(31));
        db.prune_access_retention(Duration::days(30), 1000).await.unwrap();
        db.aggregate_patterns(Duration::minutes(15)).await.unwrap();

        let patterns = db.list_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].co_access_count, 0);
        assert_eq!(patterns[0].revision, 2);

        assert_eq!(db.reset_patterns().await.unwrap(), 1);
        assert!(db.list_patterns().await.unwrap().is_empty());
    }
}
