//! Trace type definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BulletId, Timestamp, TraceId};

/// A record of one query/response exchange.
///
/// `used_bullet_ids` and `misleading_bullet_ids` should be subsets of
/// `selected_bullet_ids`; the engine tolerates violations and treats unknown
/// ids as no-ops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Unique identifier (upsert key).
    #[serde(default)]
    pub id: TraceId,

    /// The query text.
    pub query: String,

    /// Serialized prompt sent to the generator.
    #[serde(default)]
    pub prompt: String,

    /// Generator response.
    #[serde(default)]
    pub response: String,

    /// Whether the response was judged correct.
    #[serde(default)]
    pub success: bool,

    /// Bullets offered as context.
    #[serde(default)]
    pub selected_bullet_ids: Vec<BulletId>,

    /// Bullets the generator relied on.
    #[serde(default)]
    pub used_bullet_ids: Vec<BulletId>,

    /// Bullets the generator flagged as misleading.
    #[serde(default)]
    pub misleading_bullet_ids: Vec<BulletId>,

    /// Free-form notes keyed by bullet id.
    #[serde(default)]
    pub attribution_notes: BTreeMap<String, String>,

    /// Arbitrary string metadata (model, usage JSON, expected answer, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Creation time.
    #[serde(default = "Timestamp::now")]
    pub created_at: Timestamp,
}

impl Trace {
    /// Starts a failed, empty trace for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: TraceId::new(),
            query: query.into(),
            prompt: String::new(),
            response: String::new(),
            success: false,
            selected_bullet_ids: Vec::new(),
            used_bullet_ids: Vec::new(),
            misleading_bullet_ids: Vec::new(),
            attribution_notes: BTreeMap::new(),
            metadata: BTreeMap::new(),
            created_at: Timestamp::now(),
        }
    }

    /// Sets the prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the response.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    /// Sets the success flag.
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Sets the bullets offered as context.
    pub fn with_selected<I: IntoIterator<Item = BulletId>>(mut self, ids: I) -> Self {
        self.selected_bullet_ids = ids.into_iter().collect();
        self
    }

    /// Sets the bullets the generator relied on.
    pub fn with_used<I: IntoIterator<Item = BulletId>>(mut self, ids: I) -> Self {
        self.used_bullet_ids = ids.into_iter().collect();
        self
    }

    /// Sets the bullets flagged as misleading.
    pub fn with_misleading<I: IntoIterator<Item = BulletId>>(mut self, ids: I) -> Self {
        self.misleading_bullet_ids = ids.into_iter().collect();
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Sets the creation time.
    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// A failed exchange where the generator used nothing and flagged
    /// nothing.
    pub fn is_gap(&self) -> bool {
        !self.success && self.used_bullet_ids.is_empty() && self.misleading_bullet_ids.is_empty()
    }
}
