//! Access log of context views.
//!
//! Append-only record of "user U viewed context for record X", pruned on a
//! retention window in bounded batches so no single statement holds the
//! write lock for long.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

use crate::Error;
use crate::cache::ContextDb;
use crate::cache::key::validate_record_type;
use crate::clock::{cutoff_before, from_db_timestamp, to_db_timestamp};

/// One recorded context view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub id: i64,
    pub user: String,
    pub record_type: String,
    pub record_id: Option<String>,
    pub accessed_at: DateTime<Utc>,
}

impl ContextDb {
    /// Append an access event stamped with the current clock time.
    ///
    /// Returns the new event's id.
    pub async fn record_access(&self, user: &str, record_type: &str, record_id: Option<&str>) -> Result<i64, Error> {
        if user.is_empty() {
            return Err(Error::InvalidInput("user must not be empty".into()));
        }
        validate_record_type(record_type)?;

        let user = user.to_string();
        let record_type = record_type.to_string();
        let record_id = record_id.map(str::to_string);
        let accessed_at = to_db_timestamp(self.now());

        self.conn
            .call(move |conn| -> Result<i64, Error> {
                conn.execute(
                    "INSERT INTO access_events (user_id, record_type, record_id, accessed_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user, record_type, record_id, accessed_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete events accessed before `older_than`.
    ///
    /// Deletes at most `batch_size` rows per statement and repeats until a
    /// batch comes back short. Returns the total number deleted; a second
    /// call with the same cutoff deletes nothing.
    pub async fn prune_access_events(&self, older_than: DateTime<Utc>, batch_size: usize) -> Result<u64, Error> {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be greater than 0".into()));
        }

        let cutoff = to_db_timestamp(older_than);
        let limit = batch_size as i64;
        let mut total = 0u64;

        loop {
            let cutoff = cutoff.clone();
            let deleted = self
                .conn
                .call(move |conn| -> Result<u64, Error> {
                    let count = conn.execute(
                        "DELETE FROM access_events WHERE id IN (
                            SELECT id FROM access_events WHERE accessed_at < ?1 ORDER BY id LIMIT ?2
                        )",
                        params![cutoff, limit],
                    )?;
                    Ok(count as u64)
                })
                .await
                .map_err(Error::from)?;

            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
        }

        Ok(total)
    }

    /// Delete events older than the retention window measured from now.
    pub async fn prune_access_retention(&self, retention: chrono::Duration, batch_size: usize) -> Result<u64, Error> {
        let cutoff = cutoff_before(self.now(), retention)?;
        let deleted = self.prune_access_events(cutoff, batch_size).await?;
        tracing::info!(deleted, cutoff = %cutoff, "pruned access events");
        Ok(deleted)
    }

    /// Number of stored access events.
    pub async fn access_event_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM access_events", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// All retained events ordered by user, then time, then id.
    ///
    /// This is the order the pattern aggregator consumes.
    pub async fn access_events_by_user(&self) -> Result<Vec<AccessEvent>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<AccessEvent>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, record_type, record_id, accessed_at
                    FROM access_events ORDER BY user_id, accessed_at, id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?;

                let mut events = Vec::new();
                for row in rows {
                    let (id, user, record_type, record_id, accessed_at) = row?;
                    let Some(accessed_at) = from_db_timestamp(&accessed_at) else {
                        tracing::warn!(id, raw = %accessed_at, "skipping access event with bad timestamp");
                        continue;
                    };
                    events.push(AccessEvent { id, user, record_type, record_id, accessed_at });
                }
                Ok(events)
            })
            .await
            .map_err(Error::from)
    }
}
