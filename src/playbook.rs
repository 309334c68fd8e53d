//! Playbook handle and lifecycle operations.
//!
//! The [`Playbook`] struct is the primary interface. It owns the store and
//! the capability services and wires them into the retriever, curator and
//! reflector for each call.
//!
//! # Quick Start
//!
//! ```rust
//! use ace_playbook::{Bullet, BulletKind, Config, Delta, Playbook};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let playbook = Playbook::open(dir.path().join("playbook.db"), Config::default()).unwrap();
//!
//! let bullet = Bullet::new(BulletKind::Rule, "Units", "Always state units.").unwrap();
//! let report = playbook
//!     .merge(Delta { bullets: vec![bullet], ..Default::default() })
//!     .unwrap();
//! assert_eq!(report.added, 1);
//!
//! let context = playbook.retrieve("Always state units.").unwrap();
//! assert_eq!(context.len(), 1);
//!
//! playbook.close().unwrap();
//! ```
//!
//! # Thread Safety
//!
//! `Playbook` is `Send + Sync`. Reads may run concurrently; merges assume a
//! single logical writer.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::bullet::{Bullet, BulletKind};
use crate::completion::{create_completion_service, CompletionService, GenerationParams};
use crate::config::Config;
use crate::curator::Curator;
use crate::delta::{Delta, MergeReport};
use crate::embedding::{create_embedding_service, EmbeddingService};
use crate::error::Result;
use crate::reflector::Reflector;
use crate::retrieval::{ContextSlice, Retriever};
use crate::storage::{open_storage, DatabaseMetadata, StorageEngine};
use crate::trace::Trace;
use crate::types::{BulletId, TraceId};

/// Bullet counts for a playbook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlaybookStats {
    /// Total stored bullets.
    pub total_bullets: usize,
    /// Count per kind; kinds with no bullets are listed with 0.
    pub by_kind: BTreeMap<BulletKind, usize>,
}

/// The main playbook handle.
///
/// Create an instance with [`Playbook::open()`] and close it with
/// [`Playbook::close()`].
pub struct Playbook {
    /// Storage engine.
    storage: Box<dyn StorageEngine>,

    /// Embeds bullet bodies and queries.
    embedder: Box<dyn EmbeddingService>,

    /// Optional model for reflection.
    completion: Option<Box<dyn CompletionService>>,

    /// Configuration used to open this playbook.
    config: Config,
}

impl std::fmt::Debug for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playbook")
            .field("config", &self.config)
            .field("embedding_model", &self.embedder.model())
            .field("completion", &self.completion.as_ref().map(|c| c.model()))
            .finish_non_exhaustive()
    }
}

impl Playbook {
    /// Opens or creates a playbook at the specified path.
    ///
    /// Services are built from `config`: the embedding provider always, a
    /// completion service only when `config.completion` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration is invalid (see [`Config::validate`])
    /// - The database file is corrupted or locked
    /// - The database was written by a newer schema version
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedding_service(&config)?;
        let completion = create_completion_service(&config)?;
        Self::open_with_services(path, config, embedder, completion)
    }

    /// Opens a playbook with caller-supplied services.
    ///
    /// `config.embedding_provider` and `config.completion` are ignored in
    /// favor of the given services.
    pub fn open_with_services(
        path: impl AsRef<Path>,
        config: Config,
        embedder: Box<dyn EmbeddingService>,
        completion: Option<Box<dyn CompletionService>>,
    ) -> Result<Self> {
        config.validate()?;

        info!("Opening playbook");
        let storage = open_storage(&path, &config)?;

        info!(
            embedding_model = embedder.model(),
            reflection = if completion.is_some() { "model" } else { "heuristic" },
            sync_mode = ?config.sync_mode,
            "Playbook opened successfully"
        );

        Ok(Self {
            storage,
            embedder,
            completion,
            config,
        })
    }

    /// Closes the playbook. Committed writes are already durable.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing playbook");
        self.storage.close()?;
        info!("Playbook closed successfully");
        Ok(())
    }

    /// Configuration used to open this playbook.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Database metadata.
    #[inline]
    pub fn metadata(&self) -> &DatabaseMetadata {
        self.storage.metadata()
    }

    /// The underlying store.
    #[inline]
    pub fn storage(&self) -> &dyn StorageEngine {
        self.storage.as_ref()
    }

    /// The embedding service.
    #[inline]
    pub fn embedder(&self) -> &dyn EmbeddingService {
        self.embedder.as_ref()
    }

    /// The completion service, if configured.
    #[inline]
    pub fn completion(&self) -> Option<&dyn CompletionService> {
        self.completion.as_deref()
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Embeds `query` and returns the configured `top_k` bullets for it.
    pub fn retrieve(&self, query: &str) -> Result<ContextSlice> {
        let vector = self.embedder.embed(query)?;
        self.retrieve_by_embedding(&vector, self.config.retrieval.top_k)
    }

    /// Ranks bullets against a precomputed query vector.
    pub fn retrieve_by_embedding(&self, query: &[f32], top_k: usize) -> Result<ContextSlice> {
        Retriever::new(self.storage(), &self.config.retrieval).retrieve(query, top_k)
    }

    // =========================================================================
    // Curation and reflection
    // =========================================================================

    fn curator(&self) -> Curator<'_> {
        Curator::new(self.storage(), self.embedder(), &self.config.curation)
    }

    /// Merges a delta. See [`Curator::merge`].
    pub fn merge(&self, delta: Delta) -> Result<MergeReport> {
        self.curator().merge(delta)
    }

    /// Runs one pruning pass regardless of grow-and-refine mode.
    pub fn refine(&self) -> Result<usize> {
        self.curator().refine()
    }

    /// Proposes a delta for `traces`. Never fails.
    pub fn reflect(&self, traces: &[Trace], label: Option<&str>) -> Delta {
        let params = self
            .config
            .completion
            .as_ref()
            .map(GenerationParams::from)
            .unwrap_or_default();
        Reflector::new(self.completion(), params).reflect(traces, label)
    }

    // =========================================================================
    // Usage and traces
    // =========================================================================

    /// Applies a trace's attribution to bullet usage counters.
    ///
    /// Used ids count as helpful, misleading ids as harmful. Unknown ids are
    /// ignored. Returns the number of usages recorded.
    pub fn record_usage(&self, trace: &Trace) -> Result<usize> {
        let mut recorded = 0;
        for id in &trace.used_bullet_ids {
            recorded += usize::from(self.storage.update_usage(id, true)?);
        }
        for id in &trace.misleading_bullet_ids {
            recorded += usize::from(self.storage.update_usage(id, false)?);
        }
        debug!(trace = %trace.id, recorded, "Usage recorded");
        Ok(recorded)
    }

    /// Persists a trace outside of a merge.
    pub fn record_trace(&self, trace: &Trace) -> Result<()> {
        self.storage.record_trace(trace)
    }

    /// Looks up a trace.
    pub fn get_trace(&self, id: &TraceId) -> Result<Option<Trace>> {
        self.storage.get_trace(id)
    }

    /// Most recent traces first.
    pub fn list_traces(&self, limit: usize) -> Result<Vec<Trace>> {
        self.storage.list_traces(limit)
    }

    // =========================================================================
    // Bullets
    // =========================================================================

    /// Looks up a bullet.
    pub fn get_bullet(&self, id: &BulletId) -> Result<Option<Bullet>> {
        self.storage.get_bullet(id)
    }

    /// Every bullet, oldest first (ties by id).
    pub fn list_bullets(&self) -> Result<Vec<Bullet>> {
        let mut bullets = self.storage.list_bullets()?;
        bullets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(bullets)
    }

    /// Bullet totals per kind.
    pub fn stats(&self) -> Result<PlaybookStats> {
        let bullets = self.storage.list_bullets()?;
        let mut by_kind: BTreeMap<BulletKind, usize> =
            BulletKind::ALL.iter().map(|&kind| (kind, 0)).collect();
        for bullet in &bullets {
            *by_kind.entry(bullet.kind).or_default() += 1;
        }
        Ok(PlaybookStats {
            total_bullets: bullets.len(),
            by_kind,
        })
    }

    /// Every bullet as a pretty JSON array, embeddings included.
    pub fn export_bullets(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.list_bullets()?)?)
    }
}

// Playbook is auto Send + Sync: every boxed service and the storage engine
// are bounded by Send + Sync.
