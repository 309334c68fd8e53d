//! redb storage engine implementation.
//!
//! This module provides the storage backend for the playbook using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery (shadow paging, no half-committed state)
//!
//! Bullet and trace records are JSON so that fields added by later versions
//! default cleanly when older records are read.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ::redb::{
    Database, DatabaseError, Durability, MultimapTable, ReadableMultimapTable, ReadableTable,
    ReadableTableMetadata, Table, WriteTransaction,
};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    decode_embedding, encode_embedding, encode_time_key, BulletUsage, DatabaseMetadata,
    BULLETS_TABLE, BULLET_EMBEDDINGS_TABLE, BULLET_USAGE_TABLE, METADATA_TABLE, SCHEMA_VERSION,
    TRACES_BY_TIME_TABLE, TRACES_TABLE,
};
use super::StorageEngine;
use crate::bullet::{validate_bullet, Bullet};
use crate::config::{Config, SyncMode};
use crate::error::{PlaybookError, Result, StorageError};
use crate::trace::Trace;
use crate::types::{BulletId, Embedding, Timestamp, TraceId};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "db_metadata";

/// redb storage engine wrapper.
///
/// Holds the redb database handle, cached metadata and the durability level
/// applied to every write transaction.
#[derive(Debug)]
pub struct RedbStorage {
    /// The redb database handle.
    db: Database,

    /// Cached database metadata.
    metadata: DatabaseMetadata,

    /// Path to the database file.
    path: PathBuf,

    /// Durability for write transactions, from `Config::sync_mode`.
    durability: Durability,
}

fn durability_for(mode: SyncMode) -> Durability {
    match mode {
        SyncMode::Normal => Durability::Immediate,
        SyncMode::Fast => Durability::Eventual,
        SyncMode::Paranoid => Durability::Paranoid,
    }
}

impl RedbStorage {
    /// Opens or creates a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database file is corrupted
    /// - The database is locked by another process
    /// - The database was written by a newer schema version
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "Opening storage engine");

        let db = Database::builder().create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StorageError::DatabaseLocked,
            other => StorageError::from(other),
        })?;

        let durability = durability_for(config.sync_mode);

        if db_exists {
            Self::open_existing(db, path.to_path_buf(), durability)
        } else {
            Self::initialize_new(db, path.to_path_buf(), durability)
        }
    }

    /// Creates every table the current schema defines.
    fn create_tables(txn: &WriteTransaction) -> Result<()> {
        let _ = txn.open_table(BULLETS_TABLE)?;
        let _ = txn.open_table(BULLET_EMBEDDINGS_TABLE)?;
        let _ = txn.open_table(BULLET_USAGE_TABLE)?;
        let _ = txn.open_table(TRACES_TABLE)?;
        let _ = txn.open_multimap_table(TRACES_BY_TIME_TABLE)?;
        Ok(())
    }

    fn write_metadata(txn: &WriteTransaction, metadata: &DatabaseMetadata) -> Result<()> {
        let mut meta_table = txn.open_table(METADATA_TABLE)?;
        let metadata_bytes = bincode::serialize(metadata)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;
        Ok(())
    }

    /// Initializes a new database with tables and metadata.
    #[instrument(skip(db), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf, durability: Durability) -> Result<Self> {
        info!("Initializing new playbook database");

        let metadata = DatabaseMetadata::new();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        Self::write_metadata(&write_txn, &metadata)?;
        Self::create_tables(&write_txn)?;
        write_txn.commit().map_err(StorageError::from)?;

        info!(schema_version = SCHEMA_VERSION, "Database initialized");

        Ok(Self {
            db,
            metadata,
            path,
            durability,
        })
    }

    /// Opens an existing database, upgrading older schemas in place.
    #[instrument(skip(db), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf, durability: Durability) -> Result<Self> {
        info!("Opening existing playbook database");

        let read_txn = db.begin_read().map_err(StorageError::from)?;

        let mut metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing database metadata"))?;

            bincode::deserialize::<DatabaseMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };

        drop(read_txn);

        if !metadata.is_compatible() {
            warn!(
                supported = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Database written by a newer schema"
            );
            return Err(PlaybookError::Storage(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }));
        }

        let upgrading = metadata.needs_upgrade();
        let from_version = metadata.schema_version;
        metadata.schema_version = SCHEMA_VERSION;
        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        if upgrading {
            Self::create_tables(&write_txn)?;
        }
        Self::write_metadata(&write_txn, &metadata)?;
        write_txn.commit().map_err(StorageError::from)?;

        if upgrading {
            info!(
                from = from_version,
                to = SCHEMA_VERSION,
                "Schema upgraded"
            );
        }
        info!(
            schema_version = metadata.schema_version,
            "Database opened successfully"
        );

        Ok(Self {
            db,
            metadata,
            path,
            durability,
        })
    }

    /// Returns a reference to the underlying redb database.
    #[inline]
    #[cfg(test)]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut txn = self.db.begin_write().map_err(StorageError::from)?;
        txn.set_durability(self.durability);
        Ok(txn)
    }
}

// ============================================================================
// Record helpers
// ============================================================================

/// JSON-encodes a bullet without its embedding (stored separately).
fn encode_bullet(bullet: &Bullet) -> Result<Vec<u8>> {
    let record = Bullet {
        embedding: None,
        ..bullet.clone()
    };
    Ok(serde_json::to_vec(&record)?)
}

fn decode_bullet(bytes: &[u8]) -> Result<Bullet> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_trace(bytes: &[u8]) -> Result<Trace> {
    Ok(serde_json::from_slice(bytes)?)
}

fn attach_embedding(
    bullet: &mut Bullet,
    embeddings: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<()> {
    if let Some(bytes) = embeddings.get(bullet.id.as_str())? {
        bullet.embedding = Some(decode_embedding(bytes.value())?);
    }
    Ok(())
}

/// Upserts one trace and keeps the time index in step with it.
fn write_trace(
    traces: &mut Table<&'static str, &'static [u8]>,
    index: &mut MultimapTable<&'static [u8; 8], &'static str>,
    trace: &Trace,
) -> Result<()> {
    let key = trace.id.as_str();
    let bytes = serde_json::to_vec(trace)?;
    let previous = traces
        .insert(key, bytes.as_slice())?
        .map(|old| decode_trace(old.value()))
        .transpose()?;
    if let Some(previous) = previous {
        index.remove(&encode_time_key(previous.created_at), key)?;
    }
    index.insert(&encode_time_key(trace.created_at), key)?;
    Ok(())
}

impl StorageEngine for RedbStorage {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn metadata(&self) -> &DatabaseMetadata {
        &self.metadata
    }

    #[instrument(skip(self))]
    fn close(self: Box<Self>) -> Result<()> {
        info!("Closing storage engine");

        // Committed transactions are already durable; dropping the handle
        // releases the file lock.
        drop(self.db);

        info!("Storage engine closed");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Bullets
    // =========================================================================

    fn upsert_bullets(&self, bullets: &[Bullet]) -> Result<(usize, usize)> {
        if bullets.is_empty() {
            return Ok((0, 0));
        }

        let mut encoded = Vec::with_capacity(bullets.len());
        for bullet in bullets {
            validate_bullet(bullet)?;
            encoded.push(encode_bullet(bullet)?);
        }

        let (mut added, mut updated) = (0, 0);
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(BULLETS_TABLE)?;
            let mut embeddings = write_txn.open_table(BULLET_EMBEDDINGS_TABLE)?;
            for (bullet, bytes) in bullets.iter().zip(&encoded) {
                let key = bullet.id.as_str();
                if table.insert(key, bytes.as_slice())?.is_some() {
                    updated += 1;
                } else {
                    added += 1;
                }
                match bullet.usable_embedding() {
                    Some(vector) => {
                        embeddings.insert(key, encode_embedding(vector).as_slice())?;
                    }
                    None => {
                        embeddings.remove(key)?;
                    }
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!(added, updated, "Bullets upserted");
        Ok((added, updated))
    }

    fn get_bullet(&self, id: &BulletId) -> Result<Option<Bullet>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(BULLETS_TABLE)?;
        let embeddings = read_txn.open_table(BULLET_EMBEDDINGS_TABLE)?;

        let bullet = match table.get(id.as_str())? {
            Some(value) => decode_bullet(value.value())?,
            None => return Ok(None),
        };
        let mut bullet = bullet;
        attach_embedding(&mut bullet, &embeddings)?;
        Ok(Some(bullet))
    }

    fn list_bullets(&self) -> Result<Vec<Bullet>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(BULLETS_TABLE)?;
        let embeddings = read_txn.open_table(BULLET_EMBEDDINGS_TABLE)?;

        let mut bullets = Vec::new();
        for result in table.iter()? {
            let (_, value) = result.map_err(StorageError::from)?;
            let mut bullet = decode_bullet(value.value())?;
            attach_embedding(&mut bullet, &embeddings)?;
            bullets.push(bullet);
        }

        Ok(bullets)
    }

    fn count_bullets(&self) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(BULLETS_TABLE)?;
        Ok(table.len()?)
    }

    fn fetch_embeddings(&self) -> Result<(Vec<Bullet>, Vec<Embedding>)> {
        let mut bullets = Vec::new();
        let mut vectors = Vec::new();
        for bullet in self.list_bullets()? {
            if let Some(vector) = bullet.usable_embedding() {
                vectors.push(vector.to_vec());
                bullets.push(bullet);
            }
        }
        Ok((bullets, vectors))
    }

    fn update_usage(&self, id: &BulletId, success: bool) -> Result<bool> {
        let key = id.as_str();
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(BULLETS_TABLE)?;
            let current = table
                .get(key)?
                .map(|value| decode_bullet(value.value()))
                .transpose()?;
            let Some(mut bullet) = current else {
                debug!(id = %id, "Usage for unknown bullet ignored");
                return Ok(false);
            };

            let now = Timestamp::now();
            bullet.record_use(success, now);
            table.insert(key, encode_bullet(&bullet)?.as_slice())?;

            let mut usage_table = write_txn.open_table(BULLET_USAGE_TABLE)?;
            let mut usage: BulletUsage = usage_table
                .get(key)?
                .map(|value| bincode::deserialize(value.value()))
                .transpose()?
                .unwrap_or_default();
            usage.total_uses += 1;
            usage.last_used_at = Some(now);
            usage_table.insert(key, bincode::serialize(&usage)?.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!(id = %id, success, "Bullet usage recorded");
        Ok(true)
    }

    fn get_usage(&self, id: &BulletId) -> Result<Option<BulletUsage>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(BULLET_USAGE_TABLE)?;
        match table.get(id.as_str())? {
            Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
            None => Ok(None),
        }
    }

    fn prune_to_ids(&self, keep_ids: &HashSet<BulletId>) -> Result<usize> {
        let write_txn = self.begin_write()?;
        let removed;
        {
            let mut table = write_txn.open_table(BULLETS_TABLE)?;
            let mut embeddings = write_txn.open_table(BULLET_EMBEDDINGS_TABLE)?;
            let mut usage = write_txn.open_table(BULLET_USAGE_TABLE)?;

            let mut doomed = Vec::new();
            for result in table.iter()? {
                let (key, _) = result?;
                let id = BulletId::from(key.value());
                if !keep_ids.contains(&id) {
                    doomed.push(id);
                }
            }

            for id in &doomed {
                table.remove(id.as_str())?;
                embeddings.remove(id.as_str())?;
                usage.remove(id.as_str())?;
            }
            removed = doomed.len();
        }
        write_txn.commit().map_err(StorageError::from)?;

        if removed > 0 {
            info!(removed, kept = keep_ids.len(), "Bullets pruned");
        }
        Ok(removed)
    }

    // =========================================================================
    // Traces
    // =========================================================================

    fn record_trace(&self, trace: &Trace) -> Result<()> {
        self.record_traces(std::slice::from_ref(trace))
    }

    fn record_traces(&self, traces: &[Trace]) -> Result<()> {
        if traces.is_empty() {
            return Ok(());
        }

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(TRACES_TABLE)?;
            let mut index = write_txn.open_multimap_table(TRACES_BY_TIME_TABLE)?;
            for trace in traces {
                write_trace(&mut table, &mut index, trace)?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;

        debug!(count = traces.len(), "Traces recorded");
        Ok(())
    }

    fn get_trace(&self, id: &TraceId) -> Result<Option<Trace>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(TRACES_TABLE)?;
        match table.get(id.as_str())? {
            Some(value) => Ok(Some(decode_trace(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_traces(&self, limit: usize) -> Result<Vec<Trace>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let index = read_txn.open_multimap_table(TRACES_BY_TIME_TABLE)?;
        let table = read_txn.open_table(TRACES_TABLE)?;

        let mut traces = Vec::new();
        'newest_first: for entry in index.iter()?.rev() {
            let (_, values) = entry?;
            let mut ids = Vec::new();
            for value in values {
                ids.push(value?.value().to_string());
            }
            for id in ids.into_iter().rev() {
                if let Some(bytes) = table.get(id.as_str())? {
                    traces.push(decode_trace(bytes.value())?);
                    if traces.len() >= limit {
                        break 'newest_first;
                    }
                }
            }
        }

        Ok(traces)
    }
}

// RedbStorage is auto Send + Sync: Database, DatabaseMetadata, PathBuf and
// Durability are all Send + Sync.
