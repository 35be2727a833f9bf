//! Affinity scores between record types.
//!
//! Each significant co-access pattern is folded into a long-lived score with
//! an exponential moving average:
//!
//! ```text
//! raw   = min(1, count / saturation)
//! score = old * decay + raw * (1 - decay)     (existing edge)
//! score = raw                                 (new edge)
//! ```
//!
//! Both inputs live in [0, 1] and the blend is convex, so scores stay in
//! [0, 1] for any sequence of updates. A pattern is folded once per revision;
//! re-running without new evidence leaves every edge untouched.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use crate::Error;
use crate::cache::ContextDb;
use crate::cache::key::validate_record_type;
use crate::clock::{from_db_timestamp, to_db_timestamp};
use crate::patterns::ExplanationType;

/// Tuning for the affinity fold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffinityParams {
    /// Patterns below this count are ignored.
    pub significance_threshold: u64,
    /// Count at which the raw score reaches 1.0.
    pub saturation_count: u64,
    /// Weight kept by the previous score, strictly inside (0, 1).
    pub decay: f64,
}

impl Default for AffinityParams {
    fn default() -> Self {
        Self { significance_threshold: 3, saturation_count: 50, decay: 0.8 }
    }
}

/// Normalize a co-access count into [0, 1], saturating at `saturation`.
pub fn raw_score(count: u64, saturation: u64) -> f64 {
    if saturation == 0 {
        return 1.0;
    }
    (count as f64 / saturation as f64).min(1.0)
}

/// Exponential moving average of the previous score and new evidence.
pub fn blend(old: f64, raw: f64, decay: f64) -> f64 {
    (old * decay + raw * (1.0 - decay)).clamp(0.0, 1.0)
}

/// Score after folding `count` into `previous`, or `None` when the count
/// is below the significance threshold.
pub fn next_score(previous: Option<f64>, count: u64, params: &AffinityParams) -> Option<f64> {
    if count < params.significance_threshold {
        return None;
    }
    let raw = raw_score(count, params.saturation_count);
    Some(match previous {
        Some(old) => blend(old, raw, params.decay),
        None => raw,
    })
}

/// Explanation template for a pattern classification.
///
/// `{source}` and `{target}` are filled in at read time.
pub fn explanation_template(kind: ExplanationType) -> &'static str {
    match kind {
        ExplanationType::CoAccess => "Users reviewing {source} often open {target} shortly after",
        ExplanationType::Workflow => "{target} follows {source} in the review workflow",
        ExplanationType::ParentChild => "{target} records belong to the parent {source}",
        ExplanationType::Reference => "{source} and {target} reference each other",
        ExplanationType::AuditFlow => "{target} is the next step after {source} in the audit process",
        ExplanationType::Compliance => "{source} and {target} are linked by compliance requirements",
        ExplanationType::RiskRelated => "{target} relates to the risks behind {source}",
    }
}

/// Fill a template's placeholders with readable type names.
pub fn render_explanation(template: &str, source_type: &str, target_type: &str) -> String {
    template
        .replace("{source}", &humanize(source_type))
        .replace("{target}", &humanize(target_type))
}

fn humanize(record_type: &str) -> String {
    record_type.replace('_', " ")
}

/// A learned relation between two record types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AffinityEdge {
    pub source_type: String,
    pub target_type: String,
    pub score: f64,
    pub explanation_template: String,
    pub last_updated: DateTime<Utc>,
}

/// A ranked suggestion for "related context".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RelatedType {
    pub target_type: String,
    pub score: f64,
    pub explanation: String,
}

/// Outcome of one affinity pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AffinityReport {
    /// Significant patterns with unfolded evidence.
    pub considered: u64,
    pub created: u64,
    pub updated: u64,
}

struct PendingFold {
    source_type: String,
    target_type: String,
    count: i64,
    explanation_type: String,
    revision: i64,
    previous_score: Option<f64>,
}

impl ContextDb {
    /// Fold pattern evidence into affinity edges.
    ///
    /// Only significant patterns whose current revision has not been folded
    /// yet are touched. Runs in one transaction.
    pub async fn refresh_affinity(&self, params: AffinityParams) -> Result<AffinityReport, Error> {
        if !(params.decay > 0.0 && params.decay < 1.0) {
            return Err(Error::InvalidInput(format!("decay must be in (0, 1), got {}", params.decay)));
        }

        let now = to_db_timestamp(self.now());
        let threshold = params.significance_threshold as i64;

        let report = self
            .conn
            .call(move |conn| -> Result<AffinityReport, Error> {
                let tx = conn.transaction()?;

                let pending = {
                    let mut stmt = tx.prepare(
                        "SELECT p.source_type, p.target_type, p.co_access_count, p.explanation_type,
                                p.revision, e.score
                        FROM co_access_patterns p
                        LEFT JOIN affinity_edges e
                            ON e.source_type = p.source_type AND e.target_type = p.target_type
                        WHERE p.co_access_count >= ?1
                        AND (e.folded_revision IS NULL OR e.folded_revision < p.revision)",
                    )?;
                    let rows = stmt.query_map(params![threshold], |row| {
                        Ok(PendingFold {
                            source_type: row.get(0)?,
                            target_type: row.get(1)?,
                            count: row.get(2)?,
                            explanation_type: row.get(3)?,
                            revision: row.get(4)?,
                            previous_score: row.get(5)?,
                        })
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let mut report = AffinityReport { considered: pending.len() as u64, ..Default::default() };

                for fold in pending {
                    let Some(score) = next_score(fold.previous_score, fold.count as u64, &params) else {
                        continue;
                    };

                    if fold.previous_score.is_some() {
                        tx.execute(
                            "UPDATE affinity_edges
                            SET score = ?3, folded_revision = ?4, last_updated = ?5
                            WHERE source_type = ?1 AND target_type = ?2",
                            params![fold.source_type, fold.target_type, score, fold.revision, now],
                        )?;
                        report.updated += 1;
                    } else {
                        let kind: ExplanationType = fold.explanation_type.parse()?;
                        tx.execute(
                            "INSERT INTO affinity_edges
                            (source_type, target_type, score, explanation_template, folded_revision, last_updated)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            params![
                                fold.source_type,
                                fold.target_type,
                                score,
                                explanation_template(kind),
                                fold.revision,
                                now
                            ],
                        )?;
                        report.created += 1;
                    }
                }

                tx.commit()?;
                Ok(report)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(
            considered = report.considered,
            created = report.created,
            updated = report.updated,
            "refreshed affinity scores"
        );
        Ok(report)
    }

    /// All edges, strongest first.
    pub async fn list_edges(&self) -> Result<Vec<AffinityEdge>, Error> {
        self.query_edges(None, None).await
    }

    /// Related types for `record_type`, highest score first, explanations rendered.
    pub async fn related_types(&self, record_type: &str, limit: usize) -> Result<Vec<RelatedType>, Error> {
        validate_record_type(record_type)?;
        let edges = self.query_edges(Some(record_type.to_string()), Some(limit)).await?;
        Ok(edges
            .into_iter()
            .map(|edge| RelatedType {
                explanation: render_explanation(&edge.explanation_template, &edge.source_type, &edge.target_type),
                target_type: edge.target_type,
                score: edge.score,
            })
            .collect())
    }

    async fn query_edges(&self, source_type: Option<String>, limit: Option<usize>) -> Result<Vec<AffinityEdge>, Error> {
        let limit = limit.map_or(-1, |l| l as i64);
        self.conn
            .call(move |conn| -> Result<Vec<AffinityEdge>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT source_type, target_type, score, explanation_template, last_updated
                    FROM affinity_edges
                    WHERE ?1 IS NULL OR source_type = ?1
                    ORDER BY score DESC, source_type, target_type
                    LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![source_type, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?;

                let mut edges = Vec::new();
                for row in rows {
                    let (source_type, target_type, score, explanation_template, last_updated) = row?;
                    edges.push(AffinityEdge {
                        source_type,
                        target_type,
                        score,
                        explanation_template,
                        last_updated: from_db_timestamp(&last_updated)
                            .ok_or_else(|| Error::CorruptEntry(format!("unparseable timestamp: {last_updated}")))?,
                    });
                }
                Ok(edges)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_raw_score_saturates() {
        assert!(approx(raw_score(0, 50), 0.0));
        assert!(approx(raw_score(25, 50), 0.5));
        assert!(approx(raw_score(50, 50), 1.0));
        assert!(approx(raw_score(500, 50), 1.0));
    }

    #[test]
    fn test_blend_reference_example() {
        // count 50 -> raw 1.0; old 0.4 with decay 0.8 -> 0.52
        let raw = raw_score(50, 50);
        assert!(approx(blend(0.4, raw, 0.8), 0.52));
    }

    #[test]
    fn test_next_score_threshold() {
        let params = AffinityParams::default();
        assert_eq!(next_score(None, 2, &params), None);
        assert_eq!(next_score(Some(0.9), 2, &params), None);
        assert!(approx(next_score(None, 3, &params).unwrap(), 0.06));
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        for decay in [0.01, 0.5, 0.8, 0.99] {
            let params = AffinityParams { decay, ..Default::default() };
            let mut score = None;
            for _ in 0..500 {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let count = state % 200;
                if let Some(next) = next_score(score, count, &params) {
                    assert!((0.0..=1.0).contains(&next), "score {next} out of range");
                    score = Some(next);
                }
            }
        }
    }

    #[test]
    fn test_decay_moves_toward_lower_evidence() {
        let params = AffinityParams::default();
        let mut score = next_score(None, 50, &params).unwrap();
        for _ in 0..10 {
            let next = next_score(Some(score), 5, &params).unwrap();
            assert!(next < score);
            score = next;
        }
        assert!(score > raw_score(5, 50));
    }

    #[test]
    fn test_render_explanation() {
        let text = render_explanation(
            explanation_template(ExplanationType::Workflow),
            "finding",
            "corrective_action",
        );
        assert_eq!(text, "corrective action follows finding in the review workflow");
    }

    async fn test_db() -> (ContextDb, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
        let db = ContextDb::open_in_memory_with_clock(Arc::new(clock.clone())).await.unwrap();
        (db, clock)
    }

    /// Write a pattern's count directly, bumping its revision like the aggregator does.
    async fn seed_pattern(db: &ContextDb, source: &'static str, target: &'static str, count: i64) {
        let now = to_db_timestamp(db.now());
        db.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO co_access_patterns
                    (source_type, target_type, co_access_count, explanation_type, revision, updated_at)
                    VALUES (?1, ?2, ?3, ?4, 1, ?5)
                    ON CONFLICT(source_type, target_type) DO UPDATE SET
                        co_access_count = excluded.co_access_count,
                        revision = co_access_patterns.revision + 1,
                        updated_at = excluded.updated_at",
                    params![source, target, count, ExplanationType::for_pair(source, target).as_str(), now],
                )
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_new_edge_takes_raw_score_and_template() {
        let (db, clock) = test_db().await;
        seed_pattern(&db, "finding", "corrective_action", 20).await;

        let report = db.refresh_affinity(AffinityParams::default()).await.unwrap();
        assert_eq!(report.created, 1);

        let edges = db.list_edges().await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(approx(edges[0].score, 0.4));
        assert_eq!(edges[0].explanation_template, explanation_template(ExplanationType::Workflow));
        assert_eq!(edges[0].last_updated, clock.now());
    }

    #[tokio::test]
    async fn test_existing_edge_blends() {
        let (db, clock) = test_db().await;
        seed_pattern(&db, "finding", "corrective_action", 20).await;
        db.refresh_affinity(AffinityParams::default()).await.unwrap();

        clock.advance(Duration::days(7));
        seed_pattern(&db, "finding", "corrective_action", 50).await;
        let report = db.refresh_affinity(AffinityParams::default()).await.unwrap();
        assert_eq!(report.updated, 1);

        let edges = db.list_edges().await.unwrap();
        assert!(approx(edges[0].score, 0.52));
        assert_eq!(edges[0].last_updated, clock.now());
    }

    #[tokio::test]
    async fn test_insignificant_patterns_ignored() {
        let (db, _) = test_db().await;
        seed_pattern(&db, "engagement", "finding", 2).await;

        let report = db.refresh_affinity(AffinityParams::default()).await.unwrap();
        assert_eq!(report, AffinityReport::default());
        assert!(db.list_edges().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_without_new_evidence_is_noop() {
        let (db, clock) = test_db().await;
        seed_pattern(&db, "engagement", "finding", 10).await;
        seed_pattern(&db, "finding", "risk", 30).await;
        db.refresh_affinity(AffinityParams::default()).await.unwrap();
        let before = db.list_edges().await.unwrap();

        clock.advance(Duration::minutes(1));
        let report = db.refresh_affinity(AffinityParams::default()).await.unwrap();
        assert_eq!(report, AffinityReport::default());
        assert_eq!(db.list_edges().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_related_types_ranked_and_rendered() {
        let (db, _) = test_db().await;
        seed_pattern(&db, "finding", "corrective_action", 40).await;
        seed_pattern(&db, "finding", "risk", 10).await;
        seed_pattern(&db, "engagement", "finding", 50).await;
        db.refresh_affinity(AffinityParams::default()).await.unwrap();

        let related = db.related_types("finding", 10).await.unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].target_type, "corrective_action");
        assert_eq!(related[1].target_type, "risk");
        assert_eq!(related[1].explanation, "risk relates to the risks behind finding");

        let limited = db.related_types("finding", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_bad_decay() {
        let (db, _) = test_db().await;
        let params = AffinityParams { decay: 1.0, ..Default::default() };
        assert!(matches!(db.refresh_affinity(params).await, Err(Error::InvalidInput(_))));
    }
}
