//! Database schema definitions and versioning.
//!
//! This module defines the table structure for the redb storage engine.
//! All table definitions are compile-time constants to ensure consistency.
//!
//! # Schema Versioning
//!
//! The schema version is stored in the metadata table. Upgrades are
//! additive: an older database is brought forward in place on open (missing
//! tables are created, record fields default), while a database written by
//! a newer version is refused.
//!
//! # Table Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ METADATA_TABLE                                               │
//! │   Key: &str           Value: bincode DatabaseMetadata        │
//! ├─────────────────────────────────────────────────────────────┤
//! │ BULLETS_TABLE                                                │
//! │   Key: &str (id)      Value: JSON bullet (no embedding)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │ BULLET_EMBEDDINGS_TABLE                                      │
//! │   Key: &str (id)      Value: raw little-endian f32 bytes     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ BULLET_USAGE_TABLE                       (since v2)          │
//! │   Key: &str (id)      Value: bincode BulletUsage             │
//! ├─────────────────────────────────────────────────────────────┤
//! │ TRACES_TABLE                                                 │
//! │   Key: &str (id)      Value: JSON trace                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │ TRACES_BY_TIME_TABLE (multimap)                              │
//! │   Key: [u8; 8] big-endian created_at   Value: &str trace id  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use redb::{MultimapTableDefinition, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::{Embedding, Timestamp};

/// Current schema version.
///
/// v1: bullets, embeddings, traces, time index.
/// v2: per-bullet usage table.
pub const SCHEMA_VERSION: u32 = 2;

/// Maximum bullet title length in characters.
pub const MAX_TITLE_CHARS: usize = 160;

/// Maximum bullet body length in characters.
pub const MAX_BODY_CHARS: usize = 1200;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for database-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Bullets table.
///
/// Key: bullet id
/// Value: JSON bullet record with `embedding` stripped
pub const BULLETS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("bullets");

/// Bullet embeddings.
///
/// Stored separately from bullets to keep the main table compact.
/// Key: bullet id
/// Value: raw f32 bytes (dimension * 4 bytes)
pub const BULLET_EMBEDDINGS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("bullet_embeddings");

/// Per-bullet usage counters.
pub const BULLET_USAGE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("bullet_usage");

/// Traces table.
///
/// Key: trace id
/// Value: JSON trace record
pub const TRACES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("traces");

/// Index: trace ids by creation time.
///
/// Using a multimap allows multiple traces with the same timestamp.
pub const TRACES_BY_TIME_TABLE: MultimapTableDefinition<&[u8; 8], &str> =
    MultimapTableDefinition::new("traces_by_time");

// ============================================================================
// Records
// ============================================================================

/// Database metadata stored in the metadata table.
///
/// This is serialized with bincode and stored under the key "db_metadata".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Timestamp when the database was created.
    pub created_at: Timestamp,

    /// Last time the database was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl DatabaseMetadata {
    /// Creates new metadata for a fresh database.
    pub fn new() -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// True when the stored version is readable by this build.
    pub fn is_compatible(&self) -> bool {
        self.schema_version <= SCHEMA_VERSION
    }

    /// True when the stored version predates this build.
    pub fn needs_upgrade(&self) -> bool {
        self.schema_version < SCHEMA_VERSION
    }
}

impl Default for DatabaseMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Usage counters kept alongside each bullet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletUsage {
    /// Number of times usage was recorded (helpful or harmful).
    pub total_uses: u64,
    /// Time of the latest recorded use.
    pub last_used_at: Option<Timestamp>,
}

// ============================================================================
// Encoding Helpers
// ============================================================================

/// Encodes a timestamp as an index key.
///
/// Big-endian bytes of the millisecond value, clamped at the epoch so that
/// lexicographic order matches time order.
#[inline]
pub fn encode_time_key(timestamp: Timestamp) -> [u8; 8] {
    (timestamp.as_millis().max(0) as u64).to_be_bytes()
}

/// Encodes an embedding as raw little-endian f32 bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes raw little-endian f32 bytes.
pub fn decode_embedding(bytes: &[u8]) -> Result<Embedding, StorageError> {
    if bytes.len() % 4 != 0 {
        return Err(StorageError::corrupted(format!(
            "embedding byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
