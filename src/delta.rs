//! Deltas (proposed playbook changes) and merge reports.

use serde::{Deserialize, Serialize};

use crate::bullet::{Bullet, BulletPatch};
use crate::trace::Trace;

/// A proposed change to the playbook.
///
/// Deserializes from `{"bullets": [...], "patches": [...], "traces": [...]}`
/// with every list optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Candidate new (or replacement) bullets.
    #[serde(default)]
    pub bullets: Vec<Bullet>,

    /// Edits to existing bullets.
    #[serde(default)]
    pub patches: Vec<BulletPatch>,

    /// Traces to persist as a side effect of the merge.
    #[serde(default)]
    pub traces: Vec<Trace>,
}

impl Delta {
    /// Creates an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the delta carries nothing.
    pub fn is_empty(&self) -> bool {
        self.bullets.is_empty() && self.patches.is_empty() && self.traces.is_empty()
    }
}

/// Exact outcome counts of one merge call.
///
/// The four counters are disjoint: every submitted bullet ends up in exactly
/// one of `added`, `updated` (as a replacement), `skipped` or
/// `deduplicated`. Patched bullets add to `updated` once each.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Bullets inserted under a new id.
    pub added: usize,
    /// Bullets replaced by id plus distinct bullets mutated by patches.
    pub updated: usize,
    /// Bullets dropped by validation or in-batch `(kind, title)` collision.
    pub skipped: usize,
    /// Valid bullets dropped as embedding near-duplicates.
    pub deduplicated: usize,
}
