//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ace_playbook::completion::{ChatMessage, Completion, CompletionService, GenerationParams};
use ace_playbook::embedding::{EmbeddingBatch, EmbeddingService, HashingEmbedding};
use ace_playbook::{Config, Playbook, PlaybookError, Result};

/// Embedder with fixed vectors for known texts.
///
/// Unknown texts fall back to a 2-dimensional vector derived from a hashing
/// embedder, so every text still gets a deterministic vector of the same
/// length as the table entries.
pub struct TableEmbedding {
    table: HashMap<String, Vec<f32>>,
    fallback: HashingEmbedding,
    pub calls: AtomicUsize,
}

impl TableEmbedding {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        Self {
            table: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fallback: HashingEmbedding::new(2, 7),
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingService for TableEmbedding {
    fn embed_batch(&self, texts: &[&str]) -> Result<EmbeddingBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match self.table.get(*text) {
                Some(v) => vectors.push(v.clone()),
                None => vectors.push(self.fallback.embed(text)?),
            }
        }
        Ok(EmbeddingBatch {
            vectors,
            model: "table".into(),
        })
    }

    fn model(&self) -> &str {
        "table"
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedding;

impl EmbeddingService for FailingEmbedding {
    fn embed_batch(&self, _texts: &[&str]) -> Result<EmbeddingBatch> {
        Err(PlaybookError::embedding("provider unreachable"))
    }

    fn model(&self) -> &str {
        "failing"
    }
}

/// Embedder that returns the given vectors for every batch, whatever the
/// inputs are.
pub struct FixedBatchEmbedding(pub Vec<Vec<f32>>);

impl EmbeddingService for FixedBatchEmbedding {
    fn embed_batch(&self, _texts: &[&str]) -> Result<EmbeddingBatch> {
        Ok(EmbeddingBatch {
            vectors: self.0.clone(),
            model: "fixed".into(),
        })
    }

    fn model(&self) -> &str {
        "fixed"
    }
}

/// Completion service replaying canned replies in order.
///
/// Once the script is exhausted every call fails.
pub struct ScriptedCompletion {
    replies: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut replies: Vec<String> = replies.into_iter().map(Into::into).collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<Completion> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop() {
            Some(content) => Ok(Completion {
                content,
                model: "scripted".into(),
                ..Default::default()
            }),
            None => Err(PlaybookError::completion("script exhausted")),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Opens a playbook with the default hashing embedder.
pub fn open_default(path: &Path) -> Playbook {
    Playbook::open(path, Config::default()).unwrap()
}

/// Opens a playbook with a caller-supplied embedder and no completion.
pub fn open_with(path: &Path, config: Config, embedder: impl EmbeddingService + 'static) -> Playbook {
    Playbook::open_with_services(path, config, Box::new(embedder), None).unwrap()
}
