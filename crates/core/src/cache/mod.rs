//! SQLite-backed store for context payloads.
//!
//! This module provides the Cache Store using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Versioned entries keyed by (record type, record id | aggregate)
//! - Compressed payloads with SHA-256 checksums
//! - Per-entry TTL, or no expiry until invalidated
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod compression;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod key;
pub mod migrations;

pub use crate::Error;

pub use compression::CompressionType;
pub use connection::ContextDb;
pub use entries::{CacheStats, CacheStore, CachedPayload, PreviousPayload};
pub use key::CacheKey;
