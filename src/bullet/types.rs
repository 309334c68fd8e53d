//! Bullet and patch type definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{BulletId, Embedding, Timestamp, TraceId};

use super::validation::{prepare_body, validate_bullet};

/// Classification of a bullet.
///
/// Serialized lowercase (`"strategy"`, `"rule"`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletKind {
    /// A general approach worth repeating.
    Strategy,
    /// A hard constraint.
    Rule,
    /// A known failure mode to avoid.
    Pitfall,
    /// A reusable output shape.
    Template,
    /// Guidance about a specific tool.
    Tool,
    /// Background knowledge.
    Concept,
}

impl BulletKind {
    /// Every kind, in declaration order.
    pub const ALL: [BulletKind; 6] = [
        BulletKind::Strategy,
        BulletKind::Rule,
        BulletKind::Pitfall,
        BulletKind::Template,
        BulletKind::Tool,
        BulletKind::Concept,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategy => "strategy",
            Self::Rule => "rule",
            Self::Pitfall => "pitfall",
            Self::Template => "template",
            Self::Tool => "tool",
            Self::Concept => "concept",
        }
    }
}

impl fmt::Display for BulletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulletKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::invalid_field("kind", format!("unknown kind '{s}'")))
    }
}

/// A unit of reusable guidance.
///
/// Construct through [`Bullet::new`], which sanitizes the body and enforces
/// the length and safety limits. The store re-runs the same checks on every
/// upsert, so a bullet mutated in memory cannot be persisted in an invalid
/// state.
///
/// Every field other than `kind`, `title` and `body` carries a serde default
/// so records written by older versions remain readable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    /// Stable unique identifier.
    #[serde(default)]
    pub id: BulletId,

    /// Classification.
    pub kind: BulletKind,

    /// Short title; `(kind, title)` identifies a bullet within one merge.
    pub title: String,

    /// Sanitized guidance text.
    pub body: String,

    /// Free-text labels.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// When the bullet was first constructed.
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,

    /// Last time usage was recorded against this bullet.
    #[serde(default)]
    pub last_used_at: Option<Timestamp>,

    /// Times this bullet helped.
    #[serde(default)]
    pub helpful_count: u64,

    /// Times this bullet misled.
    #[serde(default)]
    pub harmful_count: u64,

    /// Derived ranking score; not authoritative.
    #[serde(default)]
    pub score: f64,

    /// Body embedding, computed by the curator.
    #[serde(default)]
    pub embedding: Option<Embedding>,

    /// Traces that motivated this bullet.
    #[serde(default)]
    pub source_trace_ids: BTreeSet<TraceId>,

    /// Incremented on every body patch.
    #[serde(default)]
    pub version: u32,

    /// Dedup annotation pointing at the bullet this one duplicates.
    #[serde(default)]
    pub duplicate_of: Option<BulletId>,
}

impl Bullet {
    /// Creates a validated bullet with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the title is empty or too long, or if the
    /// sanitized body is too long or contains forbidden content.
    ///
    /// ```
    /// use ace_playbook::{Bullet, BulletKind};
    ///
    /// let bullet = Bullet::new(BulletKind::Rule, "Units", "Always state units.\r\n").unwrap();
    /// assert_eq!(bullet.body, "Always state units.\n");
    /// assert!(Bullet::new(BulletKind::Rule, "Bad", "rm -rf /").is_err());
    /// ```
    pub fn new(
        kind: BulletKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let bullet = Self {
            id: BulletId::new(),
            kind,
            title: title.into(),
            body: body.into(),
            tags: BTreeSet::new(),
            created_at: Timestamp::now(),
            last_used_at: None,
            helpful_count: 0,
            harmful_count: 0,
            score: 0.0,
            embedding: None,
            source_trace_ids: BTreeSet::new(),
            version: 0,
            duplicate_of: None,
        };
        bullet.revalidate()
    }

    /// Re-runs the construction checks on an existing value.
    ///
    /// The body is sanitized again; everything else is kept.
    pub fn revalidate(mut self) -> Result<Self, ValidationError> {
        self.body = prepare_body(&self.body)?;
        validate_bullet(&self)?;
        Ok(self)
    }

    /// Replaces the id.
    pub fn with_id(mut self, id: impl Into<BulletId>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Adds a source trace.
    pub fn with_source_trace(mut self, trace_id: TraceId) -> Self {
        self.source_trace_ids.insert(trace_id);
        self
    }

    /// Sets the helpful counter.
    pub fn with_helpful_count(mut self, count: u64) -> Self {
        self.helpful_count = count;
        self
    }

    /// Sets the embedding.
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Sets the creation time.
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// `helpful_count - harmful_count`, the pruning rank.
    pub fn net_helpfulness(&self) -> i64 {
        self.helpful_count as i64 - self.harmful_count as i64
    }

    /// Returns the embedding if present and non-empty.
    pub fn usable_embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|e| !e.is_empty())
    }

    /// Applies a body patch, keeping the bullet unchanged if the result
    /// would be invalid.
    ///
    /// Append joins with a newline and trims the result. Both modes bump
    /// `version`.
    pub fn apply_text(&mut self, text: &str, mode: PatchMode) -> Result<(), ValidationError> {
        let candidate = match mode {
            PatchMode::Append => format!("{}\n{}", self.body, text).trim().to_string(),
            PatchMode::Replace => text.to_string(),
        };
        self.body = prepare_body(&candidate)?;
        self.version += 1;
        Ok(())
    }

    /// Records one use: bumps the matching counter and `last_used_at`.
    pub fn record_use(&mut self, helpful: bool, at: Timestamp) {
        if helpful {
            self.helpful_count += 1;
        } else {
            self.harmful_count += 1;
        }
        self.last_used_at = Some(at);
    }
}

/// Patch operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    /// `helpful_count += 1`.
    IncHelpful,
    /// `harmful_count += 1`.
    IncHarmful,
    /// Body append or replace with `patch_text`.
    Patch,
}

/// How a `patch` op combines its text with the existing body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Newline-joined, trimmed.
    #[default]
    Append,
    /// Full replacement.
    Replace,
}

/// A proposed edit to an existing bullet.
///
/// Patches whose `bullet_id` does not resolve are dropped silently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulletPatch {
    /// Target bullet.
    pub bullet_id: BulletId,
    /// Operation.
    pub op: PatchOp,
    /// Text for `patch` ops.
    #[serde(default)]
    pub patch_text: Option<String>,
    /// Combination mode for `patch` ops.
    #[serde(default)]
    pub patch_mode: PatchMode,
}

impl BulletPatch {
    /// `inc_helpful` patch.
    pub fn inc_helpful(bullet_id: BulletId) -> Self {
        Self {
            bullet_id,
            op: PatchOp::IncHelpful,
            patch_text: None,
            patch_mode: PatchMode::Append,
        }
    }

    /// `inc_harmful` patch.
    pub fn inc_harmful(bullet_id: BulletId) -> Self {
        Self {
            bullet_id,
            op: PatchOp::IncHarmful,
            patch_text: None,
            patch_mode: PatchMode::Append,
        }
    }

    /// Body append patch.
    pub fn append(bullet_id: BulletId, text: impl Into<String>) -> Self {
        Self {
            bullet_id,
            op: PatchOp::Patch,
            patch_text: Some(text.into()),
            patch_mode: PatchMode::Append,
        }
    }

    /// Body replace patch.
    pub fn replace(bullet_id: BulletId, text: impl Into<String>) -> Self {
        Self {
            bullet_id,
            op: PatchOp::Patch,
            patch_text: Some(text.into()),
            patch_mode: PatchMode::Replace,
        }
    }
}
