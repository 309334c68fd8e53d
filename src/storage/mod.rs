//! Storage layer abstractions for the playbook.
//!
//! This module provides a trait-based abstraction over the storage engine.
//! The store exclusively owns all persisted bullet and trace state; the
//! ranker and curator re-read it on every call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Playbook                                │
//! │          Retriever ──┐        ┌── Curator                    │
//! │                      ▼        ▼                              │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                         ▲                                    │
//! │                   ┌─────┴─────┐                              │
//! │                   │RedbStorage│                              │
//! │                   └───────────┘                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating call is one write transaction, so a failed call leaves
//! no partial state behind.

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{BulletUsage, DatabaseMetadata, SCHEMA_VERSION};

use std::collections::HashSet;
use std::path::Path;

use crate::bullet::Bullet;
use crate::config::Config;
use crate::error::Result;
use crate::trace::Trace;
use crate::types::{BulletId, Embedding, TraceId};

/// Storage engine trait for the playbook.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. The engine assumes a single
/// logical writer per backing file.
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the database metadata.
    fn metadata(&self) -> &DatabaseMetadata;

    /// Closes the storage engine, flushing any pending writes.
    fn close(self: Box<Self>) -> Result<()>;

    /// Returns the path to the database file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Bullets
    // =========================================================================

    /// Inserts or replaces bullets keyed by id.
    ///
    /// Returns `(added, updated)`: a previously absent id counts as added, a
    /// replaced id as updated. Every bullet is validated first; one invalid
    /// bullet fails the whole call and nothing is written.
    fn upsert_bullets(&self, bullets: &[Bullet]) -> Result<(usize, usize)>;

    /// Retrieves a bullet by id, including its embedding.
    fn get_bullet(&self, id: &BulletId) -> Result<Option<Bullet>>;

    /// Lists every bullet. No order is implied.
    fn list_bullets(&self) -> Result<Vec<Bullet>>;

    /// Counts stored bullets.
    fn count_bullets(&self) -> Result<u64>;

    /// Returns bullets that have a non-empty embedding, paired index-wise
    /// with their vectors.
    fn fetch_embeddings(&self) -> Result<(Vec<Bullet>, Vec<Embedding>)>;

    /// Records one use of a bullet.
    ///
    /// Increments `helpful_count` when `success`, otherwise
    /// `harmful_count`, refreshes `last_used_at` and bumps the usage row.
    /// Returns `false` (and writes nothing) if the bullet is absent.
    fn update_usage(&self, id: &BulletId, success: bool) -> Result<bool>;

    /// Returns usage counters for a bullet, if any were recorded.
    fn get_usage(&self, id: &BulletId) -> Result<Option<BulletUsage>>;

    /// Deletes every bullet whose id is not in `keep_ids`.
    ///
    /// An empty `keep_ids` deletes every bullet. Returns the number deleted.
    fn prune_to_ids(&self, keep_ids: &HashSet<BulletId>) -> Result<usize>;

    // =========================================================================
    // Traces
    // =========================================================================

    /// Upserts a trace by id.
    fn record_trace(&self, trace: &Trace) -> Result<()>;

    /// Upserts several traces in one transaction.
    fn record_traces(&self, traces: &[Trace]) -> Result<()>;

    /// Retrieves a trace by id.
    fn get_trace(&self, id: &TraceId) -> Result<Option<Trace>>;

    /// Lists at most `limit` traces, most recent first.
    fn list_traces(&self, limit: usize) -> Result<Vec<Trace>>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
///
/// # Errors
///
/// Returns an error if:
/// - The database file is corrupted
/// - The database is locked by another process
/// - The database was written by a newer schema version
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}
