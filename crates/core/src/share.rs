//! Expiring share tokens for context snapshots.
//!
//! A share captures the payload cached for a key at creation time. Later
//! puts or invalidations of the key do not change what the token resolves
//! to. Expiry is fixed at creation; resolving never extends it.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use crate::Error;
use crate::cache::compression::{CompressionType, decompress};
use crate::cache::hash::{new_share_token, payload_checksum};
use crate::cache::{CacheKey, ContextDb};
use crate::clock::{expiry_after, from_db_timestamp, to_db_timestamp};

/// Returned to the owner when a share is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShareGrant {
    pub token: String,
    pub key: CacheKey,
    /// Version of the cached payload that was captured.
    pub version: u64,
    pub expires_at: DateTime<Utc>,
}

/// The snapshot behind a live token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedContext {
    pub owner: String,
    pub key: CacheKey,
    pub version: u64,
    pub checksum: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareResolution {
    Found(SharedContext),
    /// Past its expiry but not swept yet.
    Expired,
    NotFound,
}

/// Creates, resolves and sweeps share tokens.
#[derive(Debug, Clone)]
pub struct ShareManager {
    db: ContextDb,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl ShareManager {
    pub fn new(db: ContextDb, default_ttl: Duration, max_ttl: Duration) -> Self {
        Self { db, default_ttl, max_ttl }
    }

    /// Share the payload currently cached for `key`.
    ///
    /// `ttl` defaults to the configured share lifetime and must be positive
    /// and no longer than the configured maximum. Fails with `NotCached`
    /// when the key has no live entry.
    pub async fn create_share(&self, owner: &str, key: &CacheKey, ttl: Option<Duration>) -> Result<ShareGrant, Error> {
        if owner.is_empty() {
            return Err(Error::InvalidInput("owner must not be empty".into()));
        }
        key.validate()?;

        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(Error::InvalidInput("share ttl must be greater than 0".into()));
        }
        if ttl > self.max_ttl {
            return Err(Error::InvalidInput(format!(
                "share ttl {}s exceeds maximum {}s",
                ttl.as_secs(),
                self.max_ttl.as_secs()
            )));
        }

        let token = new_share_token();
        let now = self.db.now();
        let expires_at = expiry_after(now, ttl)?;

        let version = self
            .db
            .snapshot_into_share(&token, owner, key, now, expires_at)
            .await?
            .ok_or_else(|| Error::NotCached(format!("no cached context for {key}")))?;

        tracing::info!(owner, key = %key, version, expires_at = %expires_at, "created share token");
        Ok(ShareGrant { token, key: key.clone(), version, expires_at })
    }

    /// Look up a token.
    pub async fn resolve(&self, token: &str) -> Result<ShareResolution, Error> {
        if token.is_empty() {
            return Ok(ShareResolution::NotFound);
        }
        self.db.load_share(token).await
    }

    /// Delete expired tokens in batches. Returns how many were removed.
    pub async fn sweep(&self, batch_size: usize) -> Result<u64, Error> {
        let deleted = self.db.sweep_expired_shares(batch_size).await?;
        tracing::info!(deleted, "swept expired share tokens");
        Ok(deleted)
    }
}

impl ContextDb {
    /// Copy the live entry for `key` into a new share row.
    ///
    /// Returns the captured version, or `None` when nothing is cached.
    async fn snapshot_into_share(
        &self, token: &str, owner: &str, key: &CacheKey, created_at: DateTime<Utc>, expires_at: DateTime<Utc>,
    ) -> Result<Option<u64>, Error> {
        let token = token.to_string();
        let owner = owner.to_string();
        let record_type = key.record_type.clone();
        let record_id = key.storage_id().to_string();
        let created_at = to_db_timestamp(created_at);
        let expires_at = to_db_timestamp(expires_at);

        let version = self
            .conn
            .call(move |conn| -> Result<Option<i64>, Error> {
                let tx = conn.transaction()?;

                let entry: Option<(i64, String, Vec<u8>, String)> = tx
                    .query_row(
                        "SELECT version, compression, payload, checksum FROM context_entries
                        WHERE record_type = ?1 AND record_id = ?2
                        AND (expires_at IS NULL OR expires_at > ?3)",
                        params![record_type, record_id, created_at],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;

                let Some((version, compression, payload, checksum)) = entry else {
                    return Ok(None);
                };

                tx.execute(
                    "INSERT INTO share_tokens (
                        token, owner_id, record_type, record_id, version, compression, payload, checksum,
                        created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        token,
                        owner,
                        record_type,
                        record_id,
                        version,
                        compression,
                        payload,
                        checksum,
                        created_at,
                        expires_at
                    ],
                )?;

                tx.commit()?;
                Ok(Some(version))
            })
            .await
            .map_err(Error::from)?;

        Ok(version.map(|v| v as u64))
    }

    async fn load_share(&self, token: &str) -> Result<ShareResolution, Error> {
        let token = token.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<ShareRow>, Error> {
                let row = conn
                    .query_row(
                        "SELECT owner_id, record_type, record_id, version, compression, payload, checksum,
                                created_at, expires_at
                        FROM share_tokens WHERE token = ?1",
                        params![token],
                        |row| {
                            Ok(ShareRow {
                                owner: row.get(0)?,
                                record_type: row.get(1)?,
                                record_id: row.get(2)?,
                                version: row.get(3)?,
                                compression: row.get(4)?,
                                payload: row.get(5)?,
                                checksum: row.get(6)?,
                                created_at: row.get(7)?,
                                expires_at: row.get(8)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(Error::from)?;

        let Some(row) = row else {
            return Ok(ShareResolution::NotFound);
        };

        let expires_at = parse_timestamp(&row.expires_at)?;
        if expires_at <= self.now() {
            return Ok(ShareResolution::Expired);
        }

        let key = CacheKey::from_storage(row.record_type, row.record_id);
        let payload = decompress(&row.payload, CompressionType::from_str(&row.compression)?)?;
        if payload_checksum(&payload) != row.checksum {
            return Err(Error::CorruptEntry(format!("checksum mismatch for share of {key}")));
        }

        Ok(ShareResolution::Found(SharedContext {
            owner: row.owner,
            key,
            version: row.version as u64,
            checksum: row.checksum,
            payload,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at,
        }))
    }

    /// Delete tokens whose expiry has passed, at most `batch_size` per statement.
    pub async fn sweep_expired_shares(&self, batch_size: usize) -> Result<u64, Error> {
        if batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be greater than 0".into()));
        }

        let now = to_db_timestamp(self.now());
        let limit = batch_size as i64;
        let mut total = 0u64;

        loop {
            let now = now.clone();
            let deleted = self
                .conn
                .call(move |conn| -> Result<u64, Error> {
                    let count = conn.execute(
                        "DELETE FROM share_tokens WHERE token IN (
                            SELECT token FROM share_tokens WHERE expires_at <= ?1 LIMIT ?2
                        )",
                        params![now, limit],
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

    /// Number of stored share tokens, expired or not.
    pub async fn share_count(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM share_tokens", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

struct ShareRow {
    owner: String,
    record_type: String,
    record_id: String,
    version: i64,
    compression: String,
    payload: Vec<u8>,
    checksum: String,
    created_at: String,
    expires_at: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    from_db_timestamp(raw).ok_or_else(|| Error::CorruptEntry(format!("unparseable timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    const HOUR: Duration = Duration::from_secs(3600);
    const WEEK: Duration = Duration::from_secs(7 * 86_400);

    async fn setup() -> (ContextDb, ShareManager, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap());
        let db = ContextDb::open_in_memory_with_clock(Arc::new(clock.clone())).await.unwrap();
        let shares = ShareManager::new(db.clone(), HOUR, WEEK);
        (db, shares, clock)
    }

    #[tokio::test]
    async fn test_share_lifecycle() {
        let (db, shares, clock) = setup().await;
        let key = CacheKey::record("finding", "F-1");
        db.put_entry(&key, b"finding context", None).await.unwrap();

        let grant = shares.create_share("alice", &key, Some(HOUR)).await.unwrap();
        assert_eq!(grant.version, 1);
        assert_eq!(grant.token.len(), 40);

        let ShareResolution::Found(shared) = shares.resolve(&grant.token).await.unwrap() else {
            panic!("expected live share");
        };
        assert_eq!(shared.payload, b"finding context");
        assert_eq!(shared.owner, "alice");
        assert_eq!(shared.key, key);

        clock.advance(chrono::Duration::hours(1) + chrono::Duration::seconds(1));
        assert_eq!(shares.sweep(1000).await.unwrap(), 1);
        assert_eq!(shares.resolve(&grant.token).await.unwrap(), ShareResolution::NotFound);
    }

    #[tokio::test]
    async fn test_expired_but_unswept_resolves_expired() {
        let (db, shares, clock) = setup().await;
        let key = CacheKey::aggregate("engagement");
        db.put_entry(&key, b"list", None).await.unwrap();

        let grant = shares.create_share("bob", &key, None).await.unwrap();
        clock.advance(chrono::Duration::hours(1));

        assert_eq!(shares.resolve(&grant.token).await.unwrap(), ShareResolution::Expired);
        assert_eq!(db.share_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_puts() {
        let (db, shares, _) = setup().await;
        let key = CacheKey::record("finding", "F-1");
        db.put_entry(&key, b"v1", None).await.unwrap();
        let grant = shares.create_share("alice", &key, None).await.unwrap();

        db.put_entry(&key, b"v2", None).await.unwrap();
        db.delete_entry(&key).await.unwrap();

        let ShareResolution::Found(shared) = shares.resolve(&grant.token).await.unwrap() else {
            panic!("expected live share");
        };
        assert_eq!(shared.payload, b"v1");
        assert_eq!(shared.version, 1);
    }

    #[tokio::test]
    async fn test_share_requires_cached_entry() {
        let (_, shares, _) = setup().await;
        let result = shares.create_share("alice", &CacheKey::record("finding", "missing"), None).await;
        assert!(matches!(result, Err(Error::NotCached(_))));
    }

    #[tokio::test]
    async fn test_share_ttl_bounds() {
        let (db, shares, _) = setup().await;
        let key = CacheKey::record("finding", "F-1");
        db.put_entry(&key, b"ctx", None).await.unwrap();

        let zero = shares.create_share("alice", &key, Some(Duration::ZERO)).await;
        assert!(matches!(zero, Err(Error::InvalidInput(_))));

        let too_long = shares.create_share("alice", &key, Some(WEEK + Duration::from_secs(1))).await;
        assert!(matches!(too_long, Err(Error::InvalidInput(_))));

        assert!(shares.create_share("alice", &key, Some(WEEK)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (_, shares, _) = setup().await;
        assert_eq!(shares.resolve("deadbeef").await.unwrap(), ShareResolution::NotFound);
        assert_eq!(shares.resolve("").await.unwrap(), ShareResolution::NotFound);
    }

    #[tokio::test]
    async fn test_sweep_in_batches_keeps_live_tokens() {
        let (db, shares, clock) = setup().await;
        let key = CacheKey::record("reconciliation", "R-1");
        db.put_entry(&key, b"ctx", None).await.unwrap();

        for _ in 0..7 {
            shares.create_share("carol", &key, Some(Duration::from_secs(60))).await.unwrap();
        }
        let keeper = shares.create_share("carol", &key, Some(HOUR)).await.unwrap();

        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(shares.sweep(3).await.unwrap(), 7);
        assert_eq!(db.share_count().await.unwrap(), 1);
        assert!(matches!(shares.resolve(&keeper.token).await.unwrap(), ShareResolution::Found(_)));
    }
}
