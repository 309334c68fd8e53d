//! # ace-playbook
//!
//! An evolving playbook of short reusable guidance notes ("bullets")
//! distilled from an agent's interaction history, served back as ranked
//! context for new queries.
//!
//! ## Quick Start
//!
//! ```rust
//! use ace_playbook::{Config, Playbook, Trace};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let playbook = Playbook::open(dir.path().join("playbook.db"), Config::default()).unwrap();
//!
//! // A failed exchange where no bullet helped is a gap
//! let trace = Trace::new("How should I page through the orders API?");
//! let delta = playbook.reflect(&[trace], None);
//! let report = playbook.merge(delta).unwrap();
//! assert_eq!(report.added, 1);
//!
//! let context = playbook.retrieve("How should I page through the orders API?").unwrap();
//! println!("{}", context.to_prompt_fragment());
//!
//! playbook.close().unwrap();
//! ```
//!
//! ## Key Concepts
//!
//! ### Bullet
//!
//! A **bullet** is one unit of guidance: a kind (strategy, rule, pitfall,
//! template, tool, concept), a title, a sanitized body, tags, usage
//! counters and an embedding.
//!
//! ### Delta
//!
//! A **delta** proposes new bullets, patches to existing ones, and traces
//! to persist. The curator merges it and returns an exact [`MergeReport`].
//!
//! ### Trace
//!
//! A **trace** records one query/response exchange and which bullets were
//! offered, used, or found misleading.
//!
//! ### Grow-and-refine
//!
//! In proactive mode every merge ends by pruning the store down to
//! `refine_window_size` bullets ranked by helpful minus harmful counts. In
//! lazy mode pruning only happens through [`Playbook::refine`].
//!
//! ## Features
//!
//! - `http-providers` (default) - OpenAI-compatible embedding and completion
//!   clients over blocking HTTP
//!
//! ## Thread Safety
//!
//! `Playbook` is `Send + Sync`. The store uses MVCC for concurrent reads;
//! merges assume one logical writer.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod error;
mod playbook;
mod trace;
mod types;

#[cfg(feature = "http-providers")]
mod http;

pub mod bullet;
pub mod completion;
pub mod config;
pub mod curator;
pub mod delta;
pub mod embedding;
pub mod evaluation;
pub mod pipeline;
pub mod reflector;
pub mod retrieval;
pub mod retry;
pub mod storage;
pub mod vector;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main interface
pub use playbook::{Playbook, PlaybookStats};

// Configuration
pub use config::{
    CompletionConfig, Config, CurationConfig, EmbeddingProvider, GrowAndRefine, RetrievalConfig,
    SyncMode,
};
pub use retry::RetryPolicy;

// Error handling
pub use error::{PlaybookError, Result, StorageError, ValidationError};

// Core types
pub use types::{BulletId, Embedding, Timestamp, TraceId};

// Domain types
pub use bullet::{Bullet, BulletKind, BulletPatch, PatchMode, PatchOp};
pub use delta::{Delta, MergeReport};
pub use trace::Trace;

// Engine components
pub use curator::Curator;
pub use evaluation::{compute_accuracy, EvaluationResult, Evaluator};
pub use reflector::{heuristic_reflect, Reflector};
pub use retrieval::{ContextSlice, Retriever, ScoredBullet};

// Storage (for advanced users)
pub use storage::DatabaseMetadata;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common usage.
///
/// ```rust
/// use ace_playbook::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bullet::{Bullet, BulletKind, BulletPatch};
    pub use crate::config::{Config, GrowAndRefine, SyncMode};
    pub use crate::delta::{Delta, MergeReport};
    pub use crate::error::{PlaybookError, Result};
    pub use crate::playbook::Playbook;
    pub use crate::retrieval::ContextSlice;
    pub use crate::trace::Trace;
    pub use crate::types::{BulletId, Timestamp, TraceId};
}
