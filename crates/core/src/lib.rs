//! Core of relctx, the context relevance cache.
//!
//! This crate provides:
//! - A versioned, compressed context cache with SQLite backend
//! - Invalidation driven by record mutations
//! - An access log and the co-access patterns derived from it
//! - Decayed affinity scores between record types
//! - Expiring share tokens for context snapshots
//! - Periodic maintenance jobs
//! - Unified error types and layered configuration

pub mod access;
pub mod affinity;
pub mod cache;
pub mod clock;
pub mod config;
pub mod delta;
pub mod error;
pub mod invalidate;
pub mod jobs;
pub mod patterns;
pub mod service;
pub mod share;

pub use affinity::{AffinityParams, RelatedType};
pub use cache::{CacheKey, CacheStore, CompressionType, ContextDb};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use invalidate::{InvalidationReport, Invalidator, RecordEvent};
pub use jobs::{JobKind, JobOutcome, Jobs};
pub use service::{ContextResponse, ContextService, PutResult, SharedPayload};
pub use share::{ShareGrant, ShareManager, ShareResolution};
