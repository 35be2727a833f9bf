//! Context service: the operations the assistant-facing surface calls.
//!
//! Wires the cache store, access log, affinity ranking, sharing,
//! invalidation and jobs together. Read paths degrade instead of failing:
//! a broken store reads as a miss and a broken ranking as no suggestions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::affinity::RelatedType;
use crate::cache::hash::payload_checksum;
use crate::cache::key::validate_record_type;
use crate::cache::{CacheKey, CacheStats, ContextDb};
use crate::config::AppConfig;
use crate::delta::{Splice, worthwhile_splice};
use crate::invalidate::{InvalidationReport, Invalidator, RecordEvent};
use crate::jobs::{JobKind, JobOutcome, Jobs};
use crate::share::{ShareGrant, ShareManager, ShareResolution};

/// Answer to a context request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextResponse {
    /// Nothing cached; the caller computes the context and stores it.
    Miss,
    /// The caller's copy is current.
    Unchanged { version: u64, checksum: String },
    /// Apply `splice` to the caller's copy of `base_version`.
    Delta { version: u64, checksum: String, base_version: u64, splice: Splice },
    Full { version: u64, checksum: String, payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PutResult {
    pub version: u64,
    pub checksum: String,
}

/// A resolved share snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SharedPayload {
    pub owner: String,
    pub key: CacheKey,
    pub version: u64,
    pub checksum: String,
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ContextService {
    db: ContextDb,
    invalidator: Invalidator,
    shares: ShareManager,
    jobs: Jobs,
    config: Arc<AppConfig>,
}

impl ContextService {
    pub fn new(db: ContextDb, config: Arc<AppConfig>) -> Self {
        let invalidator = Invalidator::new(Arc::new(db.clone()));
        let shares = ShareManager::new(
            db.clone(),
            Duration::from_secs(config.share_ttl_secs),
            Duration::from_secs(config.max_share_ttl_secs),
        );
        let jobs = Jobs::new(db.clone(), Arc::clone(&config));
        Self { db, invalidator, shares, jobs, config }
    }

    pub fn db(&self) -> &ContextDb {
        &self.db
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    /// Serve cached context for a record (or a type's aggregate when
    /// `record_id` is `None`) and log the access.
    ///
    /// `known_version` is the version the caller already holds, if any.
    pub async fn get_context(
        &self, user: &str, record_type: &str, record_id: Option<&str>, known_version: Option<u64>,
    ) -> Result<ContextResponse, Error> {
        if user.is_empty() {
            return Err(Error::InvalidInput("user must not be empty".into()));
        }
        let key = CacheKey::new(record_type, record_id.map(str::to_string))?;

        if let Err(e) = self.db.record_access(user, record_type, record_id).await {
            tracing::warn!(user, key = %key, error = %e, "failed to record access");
        }

        let (current, previous) = match self.db.get_entry_with_previous(&key).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                return Ok(ContextResponse::Miss);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, serving miss");
                return Ok(ContextResponse::Miss);
            }
        };
        tracing::debug!(key = %key, version = current.version, "cache hit");

        if known_version == Some(current.version) {
            return Ok(ContextResponse::Unchanged { version: current.version, checksum: current.checksum });
        }

        if let Some(previous) = previous.filter(|p| known_version == Some(p.version)) {
            if previous.checksum == current.checksum {
                return Ok(ContextResponse::Unchanged { version: current.version, checksum: current.checksum });
            }
            if let Some(splice) = worthwhile_splice(&previous.payload, &current.payload, self.config.delta_max_ratio)
            {
                return Ok(ContextResponse::Delta {
                    version: current.version,
                    checksum: current.checksum,
                    base_version: previous.version,
                    splice,
                });
            }
        }

        Ok(ContextResponse::Full {
            version: current.version,
            checksum: current.checksum,
            payload: String::from_utf8_lossy(&current.payload).into_owned(),
        })
    }

    /// Store freshly computed context.
    ///
    /// `ttl_secs` of `None` uses the configured default; `Some(0)` keeps the
    /// entry until it is invalidated.
    pub async fn put_context(&self, key: &CacheKey, payload: &str, ttl_secs: Option<u64>) -> Result<PutResult, Error> {
        let ttl = match ttl_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.config.cache_ttl(),
        };
        let version = self.db.put_entry(key, payload.as_bytes(), ttl).await?;
        Ok(PutResult { version, checksum: payload_checksum(payload.as_bytes()) })
    }

    /// Record types related to `record_type`, best first.
    ///
    /// Never fails: any error is logged and yields no suggestions.
    pub async fn get_related_types(&self, record_type: &str, limit: Option<usize>) -> Vec<RelatedType> {
        let limit = limit.unwrap_or(self.config.related_limit);
        match self.db.related_types(record_type, limit).await {
            Ok(related) => related,
            Err(e) => {
                tracing::warn!(record_type, error = %e, "related type lookup failed");
                Vec::new()
            }
        }
    }

    pub async fn share_context(&self, owner: &str, key: &CacheKey, ttl_secs: Option<u64>) -> Result<ShareGrant, Error> {
        self.shares
            .create_share(owner, key, ttl_secs.map(Duration::from_secs))
            .await
    }

    /// Resolve a token; unknown and expired tokens are both `ShareNotAvailable`.
    pub async fn resolve_share(&self, token: &str) -> Result<SharedPayload, Error> {
        match self.shares.resolve(token).await? {
            ShareResolution::Found(shared) => Ok(SharedPayload {
                owner: shared.owner,
                key: shared.key,
                version: shared.version,
                checksum: shared.checksum,
                payload: String::from_utf8_lossy(&shared.payload).into_owned(),
                expires_at: shared.expires_at,
            }),
            ShareResolution::Expired => Err(Error::ShareNotAvailable("share token has expired".into())),
            ShareResolution::NotFound => Err(Error::ShareNotAvailable("share token not found".into())),
        }
    }

    pub async fn record_mutated(&self, record_type: &str, record_id: &str) -> InvalidationReport {
        self.invalidator.on_mutation(record_type, record_id).await
    }

    pub async fn record_deleted(&self, record_type: &str, record_id: &str) -> InvalidationReport {
        self.invalidator.on_deletion(record_type, record_id).await
    }

    pub async fn handle_record_event(&self, event: &RecordEvent) -> InvalidationReport {
        self.invalidator.handle(event).await
    }

    pub async fn run_job(&self, kind: JobKind) -> Result<JobOutcome, Error> {
        self.jobs.run(kind).await
    }

    /// Delete every entry of `record_type` and/or every expired entry.
    pub async fn cache_purge(&self, record_type: Option<&str>, expired: bool) -> Result<u64, Error> {
        if record_type.is_none() && !expired {
            return Err(Error::InvalidInput("at least one of record_type or expired must be specified".into()));
        }

        let mut deleted = 0;
        if let Some(record_type) = record_type {
            validate_record_type(record_type)?;
            deleted += self.db.delete_record_type(record_type).await?;
        }
        if expired {
            deleted += self.db.purge_expired_entries().await?;
        }

        tracing::info!(record_type, expired, deleted, "purged cache entries");
        Ok(deleted)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, Error> {
        self.db.entry_stats().await
    }
}
