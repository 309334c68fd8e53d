//! Ranking: selects the bullets most relevant to a query vector.
//!
//! # Scoring
//!
//! ```text
//! score = alpha * cosine(query, bullet.embedding)
//!       + beta  * ln(1 + helpful_count)
//!       - gamma * ln(1 + harmful_count)
//!       + freshness_weight / (1 + months_since(last_used_at))   (0 if never used)
//! ```
//!
//! A month is 30 days. Bullets whose embedding length differs from the
//! query are skipped. Results sort by descending score, then ascending
//! bullet id, so equal scores always come back in the same order.

use serde::Serialize;
use tracing::debug;

use crate::bullet::Bullet;
use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::storage::StorageEngine;
use crate::types::{BulletId, Timestamp};
use crate::vector::cosine_similarity;

const DAYS_PER_MONTH: f64 = 30.0;

/// A bullet with the score it was ranked by.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredBullet {
    /// The bullet, with `score` set to the ranking score.
    pub bullet: Bullet,
    /// Combined ranking score.
    pub score: f64,
    /// Cosine similarity component alone.
    pub similarity: f64,
}

/// Ranked bullets for one query, most relevant first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContextSlice {
    /// Ranked entries.
    pub bullets: Vec<ScoredBullet>,
}

impl ContextSlice {
    /// Number of bullets in the slice.
    pub fn len(&self) -> usize {
        self.bullets.len()
    }

    /// True if nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.bullets.is_empty()
    }

    /// Bullet ids in rank order.
    pub fn ids(&self) -> Vec<BulletId> {
        self.bullets.iter().map(|s| s.bullet.id.clone()).collect()
    }

    /// Iterates the bullets in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &Bullet> {
        self.bullets.iter().map(|s| &s.bullet)
    }

    /// Renders one `- [KIND] title: body` line per bullet.
    ///
    /// ```
    /// use ace_playbook::bullet::{Bullet, BulletKind};
    /// use ace_playbook::retrieval::{ContextSlice, ScoredBullet};
    ///
    /// let bullet = Bullet::new(BulletKind::Rule, "Units", "Always state units.").unwrap();
    /// let slice = ContextSlice {
    ///     bullets: vec![ScoredBullet { bullet, score: 1.0, similarity: 1.0 }],
    /// };
    /// assert_eq!(slice.to_prompt_fragment(), "- [RULE] Units: Always state units.");
    /// ```
    pub fn to_prompt_fragment(&self) -> String {
        self.iter()
            .map(|b| {
                format!(
                    "- [{}] {}: {}",
                    b.kind.as_str().to_uppercase(),
                    b.title,
                    b.body
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Scores and orders bullets against a query vector.
///
/// Holds no state of its own; every call re-reads the store.
pub struct Retriever<'a> {
    storage: &'a dyn StorageEngine,
    config: &'a RetrievalConfig,
}

impl<'a> Retriever<'a> {
    /// Creates a retriever over `storage`.
    pub fn new(storage: &'a dyn StorageEngine, config: &'a RetrievalConfig) -> Self {
        Self { storage, config }
    }

    /// Returns at most `top_k` bullets, most relevant first.
    ///
    /// An empty store (or one with no embedded bullets) yields an empty
    /// slice.
    pub fn retrieve(&self, query: &[f32], top_k: usize) -> Result<ContextSlice> {
        let (bullets, _) = self.storage.fetch_embeddings()?;
        let ranked = rank(bullets, query, top_k, self.config, Timestamp::now());
        debug!(
            candidates = ranked.len(),
            top_k,
            dimension = query.len(),
            "Bullets ranked"
        );
        Ok(ContextSlice { bullets: ranked })
    }
}

/// Freshness bonus for a bullet last used at `last_used_at`.
pub fn freshness_bonus(weight: f64, last_used_at: Option<Timestamp>, now: Timestamp) -> f64 {
    match last_used_at {
        Some(at) => {
            let months = (at.days_until(now) / DAYS_PER_MONTH).max(0.0);
            weight / (1.0 + months)
        }
        None => 0.0,
    }
}

/// Scores one bullet against `query`. `None` if it has no usable
/// embedding of matching length or the score is not finite.
pub fn score_bullet(
    bullet: &Bullet,
    query: &[f32],
    config: &RetrievalConfig,
    now: Timestamp,
) -> Option<(f64, f64)> {
    let embedding = bullet.usable_embedding()?;
    if embedding.len() != query.len() {
        return None;
    }
    let similarity = cosine_similarity(query, embedding);
    let score = config.alpha * similarity
        + config.beta * (bullet.helpful_count as f64).ln_1p()
        - config.gamma * (bullet.harmful_count as f64).ln_1p()
        + freshness_bonus(config.freshness_weight, bullet.last_used_at, now);
    score.is_finite().then_some((score, similarity))
}

/// Ranks `bullets` for `query` at time `now` and keeps the first `top_k`.
pub fn rank(
    bullets: Vec<Bullet>,
    query: &[f32],
    top_k: usize,
    config: &RetrievalConfig,
    now: Timestamp,
) -> Vec<ScoredBullet> {
    let mut scored: Vec<ScoredBullet> = bullets
        .into_iter()
        .filter_map(|mut bullet| {
            let (score, similarity) = score_bullet(&bullet, query, config, now)?;
            bullet.score = score;
            Some(ScoredBullet {
                bullet,
                score,
                similarity,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.bullet.id.cmp(&b.bullet.id))
    });
    scored.truncate(top_k);
    scored
}
