//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use super::compression::CompressionType;
use super::migrations;
use crate::Error;
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Context database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread, plus the clock used to stamp and expire rows
/// and the compression applied to newly stored payloads. Cloning is cheap
/// and shares the connection.
#[derive(Clone, Debug)]
pub struct ContextDb {
    pub(crate) conn: Connection,
    clock: Arc<dyn Clock>,
    compression: CompressionType,
}

impl ContextDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, Arc::new(SystemClock)).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock)).await
    }

    /// Open an in-memory database driven by the given clock.
    pub async fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, clock).await
    }

    /// Compress newly stored payloads with the given algorithm.
    ///
    /// Existing rows keep the algorithm they were written with.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn, clock, compression: CompressionType::default() })
    }
}
