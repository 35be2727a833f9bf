//! Context entry operations.
//!
//! Provides the Cache Store: versioned, compressed context payloads with
//! optional TTL. Every put bumps the key's version, even for identical
//! content, so readers that want to skip redundant work compare checksums.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

use super::compression::{CompressionType, compress, decompress};
use super::connection::ContextDb;
use super::hash::payload_checksum;
use super::key::{CacheKey, validate_record_type};
use crate::Error;
use crate::clock::{expiry_after, from_db_timestamp, to_db_timestamp};

/// A live cache entry with its payload decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPayload {
    pub key: CacheKey,
    pub version: u64,
    pub checksum: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The payload a key held immediately before its current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousPayload {
    pub version: u64,
    pub checksum: String,
    pub payload: Vec<u8>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CacheStats {
    pub entries: u64,
    pub compressed_bytes: u64,
    pub payload_bytes: u64,
}

/// Storage backend for context payloads.
///
/// Single-key operations are atomic. Nothing spanning several keys is
/// transactional.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the live payload for `key`, or `None` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>, Error>;

    /// Store `payload` under `key` and return the new version.
    ///
    /// `None` or a zero TTL keeps the entry until it is invalidated.
    async fn put(&self, key: &CacheKey, payload: &[u8], ttl: Option<Duration>) -> Result<u64, Error>;

    /// Remove one entry. Returns whether an entry existed.
    async fn delete(&self, key: &CacheKey) -> Result<bool, Error>;

    /// Remove every entry of `record_type`, record-level and aggregate alike.
    async fn delete_prefix(&self, record_type: &str) -> Result<u64, Error>;
}

struct RawEntry {
    version: i64,
    compression: String,
    payload: Vec<u8>,
    checksum: String,
    created_at: String,
    expires_at: Option<String>,
    previous: Option<RawPrevious>,
}

struct RawPrevious {
    version: i64,
    compression: String,
    payload: Vec<u8>,
    checksum: String,
}

fn unpack(key: &CacheKey, compression: &str, data: &[u8], checksum: &str) -> Result<Vec<u8>, Error> {
    let payload = decompress(data, CompressionType::from_str(compression)?)?;
    if payload_checksum(&payload) != checksum {
        return Err(Error::CorruptEntry(format!("checksum mismatch for {key}")));
    }
    Ok(payload)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, Error> {
    from_db_timestamp(raw).ok_or_else(|| Error::CorruptEntry(format!("unparseable timestamp: {raw}")))
}

impl RawEntry {
    fn into_payload(self, key: &CacheKey) -> Result<(CachedPayload, Option<PreviousPayload>), Error> {
        let payload = unpack(key, &self.compression, &self.payload, &self.checksum)?;
        let previous = match self.previous {
            Some(prev) => Some(PreviousPayload {
                version: prev.version as u64,
                payload: unpack(key, &prev.compression, &prev.payload, &prev.checksum)?,
                checksum: prev.checksum,
            }),
            None => None,
        };

        let current = CachedPayload {
            key: key.clone(),
            version: self.version as u64,
            checksum: self.checksum,
            payload,
            created_at: parse_timestamp(&self.created_at)?,
            expires_at: self.expires_at.as_deref().map(parse_timestamp).transpose()?,
        };

        Ok((current, previous))
    }
}

impl ContextDb {
    async fn load_entry(&self, key: &CacheKey, with_previous: bool) -> Result<Option<RawEntry>, Error> {
        key.validate()?;
        let record_type = key.record_type.clone();
        let record_id = key.storage_id().to_string();
        let now = to_db_timestamp(self.now());
        let previous_columns = if with_previous {
            "prev_version, prev_compression, prev_payload, prev_checksum"
        } else {
            "NULL, NULL, NULL, NULL"
        };
        let sql = format!(
            "SELECT version, compression, payload, checksum, created_at, expires_at, {previous_columns}
             FROM context_entries
             WHERE record_type = ?1 AND record_id = ?2
             AND (expires_at IS NULL OR expires_at > ?3)"
        );

        self.conn
            .call(move |conn| -> Result<Option<RawEntry>, Error> {
                let entry = conn
                    .query_row(&sql, params![record_type, record_id, now], |row| {
                        let prev_version: Option<i64> = row.get(6)?;
                        let previous = match prev_version {
                            Some(version) => Some(RawPrevious {
                                version,
                                compression: row.get(7)?,
                                payload: row.get(8)?,
                                checksum: row.get(9)?,
                            }),
                            None => None,
                        };
                        Ok(RawEntry {
                            version: row.get(0)?,
                            compression: row.get(1)?,
                            payload: row.get(2)?,
                            checksum: row.get(3)?,
                            created_at: row.get(4)?,
                            expires_at: row.get(5)?,
                            previous,
                        })
                    })
                    .optional()?;
                Ok(entry)
            })
            .await
            .map_err(Error::from)
    }

    /// Get the live entry for a key.
    ///
    /// Returns None if the key was never stored, was deleted, or has expired.
    pub async fn get_entry(&self, key: &CacheKey) -> Result<Option<CachedPayload>, Error> {
        match self.load_entry(key, false).await? {
            Some(raw) => Ok(Some(raw.into_payload(key)?.0)),
            None => Ok(None),
        }
    }

    /// Get the live entry for a key together with the version it superseded.
    ///
    /// The previous payload is only kept while the entry stays live; a key
    /// that was deleted or expired before its last put has none.
    pub async fn get_entry_with_previous(
        &self, key: &CacheKey,
    ) -> Result<Option<(CachedPayload, Option<PreviousPayload>)>, Error> {
        match self.load_entry(key, true).await? {
            Some(raw) => Ok(Some(raw.into_payload(key)?)),
            None => Ok(None),
        }
    }

    /// Store a payload, bumping the key's version.
    ///
    /// The version counter lives in its own table so it keeps increasing
    /// across deletes. Both writes happen in one transaction.
    pub async fn put_entry(&self, key: &CacheKey, payload: &[u8], ttl: Option<Duration>) -> Result<u64, Error> {
        key.validate()?;

        let compression = self.compression();
        let compressed = compress(payload, compression)?;
        let checksum = payload_checksum(payload);
        let size_bytes = payload.len() as i64;

        let now = self.now();
        let created_at = to_db_timestamp(now);
        let expires_at = match ttl {
            Some(ttl) if !ttl.is_zero() => Some(to_db_timestamp(expiry_after(now, ttl)?)),
            _ => None,
        };

        let record_type = key.record_type.clone();
        let record_id = key.storage_id().to_string();

        let version = self
            .conn
            .call(move |conn| -> Result<i64, Error> {
                let tx = conn.transaction()?;

                tx.execute(
                    "INSERT INTO context_versions (record_type, record_id, version) VALUES (?1, ?2, 1)
                    ON CONFLICT(record_type, record_id) DO UPDATE SET version = version + 1",
                    params![record_type, record_id],
                )?;
                let version: i64 = tx.query_row(
                    "SELECT version FROM context_versions WHERE record_type = ?1 AND record_id = ?2",
                    params![record_type, record_id],
                    |row| row.get(0),
                )?;

                let previous: Option<(i64, String, Vec<u8>, String)> = tx
                    .query_row(
                        "SELECT version, compression, payload, checksum FROM context_entries
                        WHERE record_type = ?1 AND record_id = ?2
                        AND (expires_at IS NULL OR expires_at > ?3)",
                        params![record_type, record_id, created_at],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                let (prev_version, prev_compression, prev_payload, prev_checksum) = match previous {
                    Some((v, c, p, s)) => (Some(v), Some(c), Some(p), Some(s)),
                    None => (None, None, None, None),
                };

                tx.execute(
                    "INSERT OR REPLACE INTO context_entries (
                        record_type, record_id, version, compression, payload, checksum, size_bytes,
                        prev_version, prev_compression, prev_payload, prev_checksum,
                        created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        record_type,
                        record_id,
                        version,
                        compression.as_str(),
                        compressed,
                        checksum,
                        size_bytes,
                        prev_version,
                        prev_compression,
                        prev_payload,
                        prev_checksum,
                        created_at,
                        expires_at,
                    ],
                )?;

                tx.commit()?;
                Ok(version)
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(key = %key, version, bytes = size_bytes, "stored context entry");
        Ok(version as u64)
    }

    /// Delete the entry for a key.
    ///
    /// Returns whether an entry was removed. The version counter is kept.
    pub async fn delete_entry(&self, key: &CacheKey) -> Result<bool, Error> {
        key.validate()?;
        let record_type = key.record_type.clone();
        let record_id = key.storage_id().to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute(
                    "DELETE FROM context_entries WHERE record_type = ?1 AND record_id = ?2",
                    params![record_type, record_id],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every entry of a record type, including its aggregate entry.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_record_type(&self, record_type: &str) -> Result<u64, Error> {
        validate_record_type(record_type)?;
        let record_type = record_type.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM context_entries WHERE record_type = ?1", params![record_type])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete expired entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired_entries(&self) -> Result<u64, Error> {
        let now = to_db_timestamp(self.now());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM context_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Count stored entries and their sizes.
    pub async fn entry_stats(&self) -> Result<CacheStats, Error> {
        self.conn
            .call(|conn| -> Result<CacheStats, Error> {
                let stats = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(length(payload)), 0), COALESCE(SUM(size_bytes), 0)
                    FROM context_entries",
                    [],
                    |row| {
                        Ok(CacheStats {
                            entries: row.get::<_, i64>(0)? as u64,
                            compressed_bytes: row.get::<_, i64>(1)? as u64,
                            payload_bytes: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl CacheStore for ContextDb {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedPayload>, Error> {
        self.get_entry(key).await
    }

    async fn put(&self, key: &CacheKey, payload: &[u8], ttl: Option<Duration>) -> Result<u64, Error> {
        self.put_entry(key, payload, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, Error> {
        self.delete_entry(key).await
    }

    async fn delete_prefix(&self, record_type: &str) -> Result<u64, Error> {
        self.delete_record_type(record_type).await
    }
}
