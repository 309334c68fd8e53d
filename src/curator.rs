//! Curator: merges deltas into the store.
//!
//! # Merge Steps
//!
//! ```text
//! validate → embed → dedup → upsert kept → apply patches → record traces → prune
//! ```
//!
//! Each storage step is its own write transaction. The merge as a whole is
//! not atomic: a crash between steps leaves earlier steps applied.
//!
//! Only an embedding failure aborts a merge (before anything is written).
//! Invalid bullets, in-batch title collisions, unresolvable patch targets
//! and patches that would produce an invalid body are absorbed into the
//! [`MergeReport`] counters and logged.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument, warn};

use crate::bullet::{Bullet, BulletKind, BulletPatch, PatchOp};
use crate::config::{CurationConfig, GrowAndRefine};
use crate::delta::{Delta, MergeReport};
use crate::embedding::EmbeddingService;
use crate::error::Result;
use crate::storage::StorageEngine;
use crate::types::BulletId;
use crate::vector::cosine_similarity;

/// Applies deltas against a store.
///
/// Holds no state of its own; every call re-reads the store.
pub struct Curator<'a> {
    storage: &'a dyn StorageEngine,
    embedder: &'a dyn EmbeddingService,
    config: &'a CurationConfig,
}

impl<'a> Curator<'a> {
    /// Creates a curator.
    pub fn new(
        storage: &'a dyn StorageEngine,
        embedder: &'a dyn EmbeddingService,
        config: &'a CurationConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            config,
        }
    }

    /// Merges `delta` and reports exactly what happened.
    ///
    /// # Errors
    ///
    /// - `Embedding` if the provider fails; nothing is written.
    /// - `Storage` if a write fails; earlier steps stay applied.
    #[instrument(
        skip_all,
        fields(
            bullets = delta.bullets.len(),
            patches = delta.patches.len(),
            traces = delta.traces.len()
        )
    )]
    pub fn merge(&self, delta: Delta) -> Result<MergeReport> {
        let Delta {
            bullets,
            patches,
            traces,
        } = delta;
        let submitted = bullets.len();

        let mut candidates = self.validate(bullets);
        let mut report = MergeReport {
            skipped: submitted - candidates.len(),
            ..Default::default()
        };

        self.embed(&mut candidates)?;

        let (kept, deduplicated) = self.deduplicate(candidates)?;
        report.deduplicated = deduplicated;

        let (added, updated) = self.storage.upsert_bullets(&kept)?;
        report.added = added;
        report.updated = updated;

        report.updated += self.apply_patches(&patches)?;

        self.storage.record_traces(&traces)?;

        if self.config.grow_and_refine == GrowAndRefine::Proactive {
            self.refine()?;
        }

        info!(
            added = report.added,
            updated = report.updated,
            skipped = report.skipped,
            deduplicated = report.deduplicated,
            "Delta merged"
        );
        Ok(report)
    }

    /// Re-runs every candidate through bullet construction and drops later
    /// `(kind, title)` repeats.
    fn validate(&self, bullets: Vec<Bullet>) -> Vec<Bullet> {
        let mut seen: HashSet<(BulletKind, String)> = HashSet::new();
        let mut valid = Vec::with_capacity(bullets.len());

        for bullet in bullets {
            let title = bullet.title.clone();
            match bullet.revalidate() {
                Ok(bullet) => {
                    if seen.insert((bullet.kind, bullet.title.clone())) {
                        valid.push(bullet);
                    } else {
                        debug!(kind = %bullet.kind, title = %bullet.title, "Duplicate title in batch skipped");
                    }
                }
                Err(err) => {
                    warn!(title = %title, error = %err, "Invalid bullet skipped");
                }
            }
        }

        valid
    }

    fn embed(&self, bullets: &mut [Bullet]) -> Result<()> {
        if bullets.is_empty() {
            return Ok(());
        }
        let texts: Vec<&str> = bullets.iter().map(|b| b.body.as_str()).collect();
        let batch = self.embedder.embed_batch(&texts)?;
        batch.ensure_uniform(bullets.len())?;

        for (bullet, vector) in bullets.iter_mut().zip(batch.vectors) {
            bullet.embedding = Some(vector);
        }
        debug!(count = bullets.len(), model = %batch.model, "Bullets embedded");
        Ok(())
    }

    /// Drops candidates similar to a stored bullet, then folds candidates
    /// similar to an earlier one in the batch into it.
    ///
    /// Returns the survivors and the number dropped.
    fn deduplicate(&self, candidates: Vec<Bullet>) -> Result<(Vec<Bullet>, usize)> {
        let threshold = self.config.dedup_cosine_threshold;
        let (existing, _) = self.storage.fetch_embeddings()?;
        let mut kept: Vec<Bullet> = Vec::with_capacity(candidates.len());
        let mut dropped = 0;

        for bullet in candidates {
            let Some(vector) = bullet.usable_embedding() else {
                kept.push(bullet);
                continue;
            };

            let stored_match = existing.iter().find(|stored| {
                stored.id != bullet.id
                    && stored
                        .usable_embedding()
                        .is_some_and(|v| cosine_similarity(vector, v) >= threshold)
            });
            if let Some(stored) = stored_match {
                debug!(title = %bullet.title, duplicate_of = %stored.id, "Bullet deduplicated against store");
                dropped += 1;
                continue;
            }

            let batch_match = kept.iter_mut().find(|earlier| {
                earlier
                    .usable_embedding()
                    .is_some_and(|v| cosine_similarity(vector, v) >= threshold)
            });
            if let Some(earlier) = batch_match {
                debug!(title = %bullet.title, merged_into = %earlier.id, "Bullet merged within batch");
                absorb(earlier, bullet);
                dropped += 1;
                continue;
            }

            kept.push(bullet);
        }

        Ok((kept, dropped))
    }

    /// Applies patches in order and persists every mutated bullet in one
    /// upsert. Returns the number of distinct bullets mutated.
    fn apply_patches(&self, patches: &[BulletPatch]) -> Result<usize> {
        if patches.is_empty() {
            return Ok(0);
        }

        let mut mutated: Vec<Bullet> = Vec::new();
        let mut slots: HashMap<BulletId, usize> = HashMap::new();

        for patch in patches {
            let current = match slots.get(&patch.bullet_id) {
                Some(&slot) => mutated[slot].clone(),
                None => match self.storage.get_bullet(&patch.bullet_id)? {
                    Some(bullet) => bullet,
                    None => {
                        debug!(id = %patch.bullet_id, "Patch for unknown bullet ignored");
                        continue;
                    }
                },
            };

            let Some(patched) = apply_patch(current, patch) else {
                continue;
            };
            match slots.get(&patch.bullet_id) {
                Some(&slot) => mutated[slot] = patched,
                None => {
                    slots.insert(patch.bullet_id.clone(), mutated.len());
                    mutated.push(patched);
                }
            }
        }

        if mutated.is_empty() {
            return Ok(0);
        }
        self.storage.upsert_bullets(&mutated)?;
        Ok(mutated.len())
    }

    /// Keeps the `refine_window_size` best bullets by net helpfulness.
    ///
    /// Ties go to the newer bullet, then the smaller id. Does nothing while
    /// the store is within the window. Returns the number pruned.
    pub fn refine(&self) -> Result<usize> {
        let window = self.config.refine_window_size;
        let total = self.storage.count_bullets()?;
        if total <= window as u64 {
            return Ok(0);
        }

        let mut bullets = self.storage.list_bullets()?;
        sort_for_retention(&mut bullets);
        let keep: HashSet<BulletId> = bullets.into_iter().take(window).map(|b| b.id).collect();
        if keep.is_empty() {
            warn!(total, "Refine window is 0, clearing every bullet");
        }
        self.storage.prune_to_ids(&keep)
    }
}

/// Orders bullets best-first for retention.
pub fn sort_for_retention(bullets: &mut [Bullet]) {
    bullets.sort_by(|a, b| {
        b.net_helpfulness()
            .cmp(&a.net_helpfulness())
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Folds a near-duplicate into the bullet it duplicates.
fn absorb(target: &mut Bullet, duplicate: Bullet) {
    target.tags.extend(duplicate.tags);
    target.helpful_count += duplicate.helpful_count;
    target.source_trace_ids.extend(duplicate.source_trace_ids);
}

/// Applies one patch. `None` if the patch is dropped.
fn apply_patch(mut bullet: Bullet, patch: &BulletPatch) -> Option<Bullet> {
    match patch.op {
        PatchOp::IncHelpful => bullet.helpful_count += 1,
        PatchOp::IncHarmful => bullet.harmful_count += 1,
        PatchOp::Patch => {
            let text = patch.patch_text.as_deref().unwrap_or_default();
            if text.trim().is_empty() {
                debug!(id = %patch.bullet_id, "Empty patch text ignored");
                return None;
            }
            if let Err(err) = bullet.apply_text(text, patch.patch_mode) {
                warn!(id = %patch.bullet_id, error = %err, "Patch rejected");
                return None;
            }
        }
    }
    Some(bullet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bullet::PatchMode;
    use crate::config::Config;
    use crate::embedding::EmbeddingBatch;
    use crate::storage::RedbStorage;
    use crate::types::{Timestamp, TraceId};
    use tempfile::{tempdir, TempDir};

    /// Embeds by body: `x` → [1, 0], `y` → [0, 1], anything else → [1, 1].
    struct AxisEmbedding;

    impl EmbeddingService for AxisEmbedding {
        fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch> {
            let vectors = texts
                .iter()
                .map(|t| match t.chars().next() {
                    Some('x') => vec![1.0, 0.0],
                    Some('y') => vec![0.0, 1.0],
                    _ => vec![1.0, 1.0],
                })
                .collect();
            Ok(EmbeddingBatch {
                vectors,
                model: "axis".into(),
            })
        }

        fn model(&self) -> &str {
            "axis"
        }
    }

    fn open() -> (TempDir, RedbStorage) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &Config::default()).unwrap();
        (dir, storage)
    }

    fn bullet(title: &str, body: &str) -> Bullet {
        Bullet::new(BulletKind::Strategy, title, body).unwrap()
    }

    #[test]
    fn test_batch_merge_unions_into_earlier() {
        let (_dir, storage) = open();
        let config = CurationConfig::default();
        let curator = Curator::new(&storage, &AxisEmbedding, &config);

        let first = bullet("one", "x first")
            .with_tags(["a"])
            .with_helpful_count(1)
            .with_source_trace(TraceId::from("t1"));
        let second = bullet("two", "x second")
            .with_tags(["b"])
            .with_helpful_count(2)
            .with_source_trace(TraceId::from("t2"));
        let first_id = first.id.clone();

        let report = curator
            .merge(Delta {
                bullets: vec![first, second],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.deduplicated, 1);

        let stored = storage.get_bullet(&first_id).unwrap().unwrap();
        assert_eq!(stored.helpful_count, 3);
        assert_eq!(stored.tags.len(), 2);
        assert_eq!(stored.source_trace_ids.len(), 2);
    }

    #[test]
    fn test_patches_compose_and_count_once() {
        let (_dir, storage) = open();
        let config = CurationConfig::default();
        let curator = Curator::new(&storage, &AxisEmbedding, &config);

        let b = bullet("target", "x body");
        let id = b.id.clone();
        curator
            .merge(Delta {
                bullets: vec![b],
                ..Default::default()
            })
            .unwrap();

        let report = curator
            .merge(Delta {
                patches: vec![
                    BulletPatch::inc_helpful(id.clone()),
                    BulletPatch::inc_helpful(id.clone()),
                    BulletPatch::append(id.clone(), "more"),
                    BulletPatch::inc_harmful(BulletId::from("ghost")),
                ],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.updated, 1);

        let stored = storage.get_bullet(&id).unwrap().unwrap();
        assert_eq!(stored.helpful_count, 2);
        assert_eq!(stored.body, "x body\nmore");
        assert_eq!(stored.version, 1);
        assert!(stored.embedding.is_some());
    }

    #[test]
    fn test_invalid_patch_result_dropped() {
        let (_dir, storage) = open();
        let config = CurationConfig::default();
        let curator = Curator::new(&storage, &AxisEmbedding, &config);

        let b = bullet("target", "x body");
        let id = b.id.clone();
        storage.upsert_bullets(&[b]).unwrap();

        let report = curator
            .merge(Delta {
                patches: vec![
                    BulletPatch::replace(id.clone(), "run rm -rf / now"),
                    BulletPatch {
                        bullet_id: id.clone(),
                        op: PatchOp::Patch,
                        patch_text: None,
                        patch_mode: PatchMode::Append,
                    },
                ],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.updated, 0);
        assert_eq!(storage.get_bullet(&id).unwrap().unwrap().body, "x body");
    }

    #[test]
    fn test_retention_order() {
        let old = bullet("old", "x").with_created_at(Timestamp::from_millis(1));
        let new = bullet("new", "x").with_created_at(Timestamp::from_millis(2));
        let mut best = bullet("best", "x").with_created_at(Timestamp::from_millis(0));
        best.helpful_count = 5;
        let mut worst = bullet("worst", "x").with_created_at(Timestamp::from_millis(9));
        worst.harmful_count = 1;

        let mut bullets = vec![worst, old, best, new];
        sort_for_retention(&mut bullets);
        let titles: Vec<_> = bullets.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["best", "new", "old", "worst"]);
    }

    #[test]
    fn test_lazy_mode_never_prunes() {
        let (_dir, storage) = open();
        let config = CurationConfig {
            grow_and_refine: GrowAndRefine::Lazy,
            refine_window_size: 1,
            ..Default::default()
        };
        let curator = Curator::new(&storage, &AxisEmbedding, &config);
        curator
            .merge(Delta {
                bullets: vec![bullet("a", "x"), bullet("b", "y")],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(storage.count_bullets().unwrap(), 2);

        // An explicit refine pass still applies the window
        assert_eq!(curator.refine().unwrap(), 1);
        assert_eq!(storage.count_bullets().unwrap(), 1);
    }
}
