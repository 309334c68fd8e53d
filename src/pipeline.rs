//! Online and offline improvement loops.
//!
//! ```text
//! retrieve → generate → evaluate → reflect → merge
//! ```
//!
//! The online pipeline runs that loop once per episode. The offline
//! pipeline runs every task of an epoch first, then reflects on the whole
//! batch and merges once.
//!
//! Answer generation belongs to the caller: implement [`Generator`], or use
//! [`CompletionGenerator`] to ask a chat model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::{ChatMessage, CompletionService, GenerationParams};
use crate::delta::MergeReport;
use crate::error::Result;
use crate::evaluation::{compute_accuracy, Evaluator, USAGE_METADATA_KEY};
use crate::playbook::Playbook;
use crate::retrieval::ContextSlice;
use crate::trace::Trace;
use crate::types::BulletId;

/// Metadata key under which the offline pipeline stores the expected answer.
pub const EXPECTED_ANSWER_KEY: &str = "expected_answer";

/// Produces a trace for a query given the retrieved context.
///
/// `selected_bullet_ids` should list the context ids; `used_bullet_ids` and
/// `misleading_bullet_ids` carry the generator's own attribution.
pub trait Generator {
    /// Answers `query` using `context`.
    fn generate(&self, query: &str, context: &ContextSlice) -> Result<Trace>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, query: &str, context: &ContextSlice) -> Result<Trace> {
        (**self).generate(query, context)
    }
}

/// One query with an optional expected answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// The query text.
    pub query: String,
    /// Expected answer; without one the generator's success flag stands.
    #[serde(default)]
    pub answer: Option<String>,
    /// Copied onto the trace.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Episode {
    /// An episode without an expected answer.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Sets the expected answer.
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }
}

fn run_one<G: Generator>(
    playbook: &Playbook,
    generator: &G,
    evaluator: &Evaluator,
    episode: &Episode,
) -> Result<Trace> {
    let context = playbook.retrieve(&episode.query)?;
    let mut trace = generator.generate(&episode.query, &context)?;
    trace
        .metadata
        .extend(episode.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(answer) = &episode.answer {
        trace.success = evaluator.evaluate(&trace.response, answer);
    }
    debug!(trace = %trace.id, success = trace.success, context = context.len(), "Episode evaluated");
    Ok(trace)
}

/// Reflects and merges after every episode.
pub struct OnlinePipeline<'a, G> {
    playbook: &'a Playbook,
    generator: G,
    evaluator: Evaluator,
}

impl<'a, G: Generator> OnlinePipeline<'a, G> {
    /// Creates a pipeline over `playbook`.
    pub fn new(playbook: &'a Playbook, generator: G, evaluator: Evaluator) -> Self {
        Self {
            playbook,
            generator,
            evaluator,
        }
    }

    /// Runs one episode and merges what was learned from it.
    pub fn run_episode(&self, episode: &Episode) -> Result<Trace> {
        let trace = run_one(self.playbook, &self.generator, &self.evaluator, episode)?;
        let delta = self
            .playbook
            .reflect(std::slice::from_ref(&trace), episode.answer.as_deref());
        let report = self.playbook.merge(delta)?;
        debug!(trace = %trace.id, added = report.added, updated = report.updated, "Episode merged");
        Ok(trace)
    }

    /// Runs episodes in order, stopping at the first error.
    pub fn run(&self, episodes: &[Episode]) -> Result<Vec<Trace>> {
        episodes.iter().map(|e| self.run_episode(e)).collect()
    }
}

/// Reflects and merges once per epoch.
pub struct OfflinePipeline<'a, G> {
    playbook: &'a Playbook,
    generator: G,
    evaluator: Evaluator,
}

impl<'a, G: Generator> OfflinePipeline<'a, G> {
    /// Creates a pipeline over `playbook`.
    pub fn new(playbook: &'a Playbook, generator: G, evaluator: Evaluator) -> Self {
        Self {
            playbook,
            generator,
            evaluator,
        }
    }

    /// Trains for `epochs` passes over `tasks`. Returns one report per epoch.
    pub fn train(&self, tasks: &[Episode], epochs: usize) -> Result<Vec<MergeReport>> {
        let mut reports = Vec::with_capacity(epochs);
        for epoch in 1..=epochs {
            info!(epoch, epochs, tasks = tasks.len(), "Offline epoch");

            let mut traces = Vec::with_capacity(tasks.len());
            for task in tasks {
                let mut trace = run_one(self.playbook, &self.generator, &self.evaluator, task)?;
                trace.metadata.insert(
                    EXPECTED_ANSWER_KEY.to_string(),
                    task.answer.clone().unwrap_or_default(),
                );
                traces.push(trace);
            }

            let summary = compute_accuracy(&traces);
            let delta = self.playbook.reflect(&traces, None);
            let report = self.playbook.merge(delta)?;
            info!(
                epoch,
                accuracy = summary.accuracy,
                added = report.added,
                updated = report.updated,
                "Offline epoch merged"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

// ============================================================================
// Completion-backed generator
// ============================================================================

/// System prompt for [`CompletionGenerator`].
pub const GENERATOR_SYSTEM_PROMPT: &str = "\
You answer the user's query. You receive a JSON object with the `query` and a
list of playbook `bullets` (id, kind, title, body) that may help.

Reply with a single JSON object and nothing else:
{
  \"answer\": \"your final answer\",
  \"used_bullet_ids\": [\"ids of bullets you relied on\"],
  \"misleading_bullet_ids\": [\"ids of bullets that were wrong or unhelpful\"],
  \"attribution_notes\": {\"bullet id\": \"how it helped or misled\"}
}";

#[derive(Serialize)]
struct BulletView<'a> {
    id: &'a BulletId,
    kind: &'a str,
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    query: &'a str,
    bullets: Vec<BulletView<'a>>,
}

#[derive(Default, Deserialize)]
struct GenerationReply {
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    used_bullet_ids: Vec<BulletId>,
    #[serde(default)]
    misleading_bullet_ids: Vec<BulletId>,
    #[serde(default)]
    attribution_notes: BTreeMap<String, String>,
}

impl GenerationReply {
    /// Parses a model reply; text that is not a JSON object becomes the
    /// answer as-is.
    fn parse(raw: &str) -> Self {
        match serde_json::from_str::<GenerationReply>(raw.trim()) {
            Ok(reply) => reply,
            Err(_) => {
                warn!("Generator reply is not JSON, using it as plain answer");
                Self {
                    answer: serde_json::Value::String(raw.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    fn answer_text(&self) -> String {
        match &self.answer {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// A [`Generator`] that asks a chat model.
///
/// The trace records the full prompt, the parsed answer and attribution,
/// and metadata `model`, `usage` (JSON) and `raw_response`. Its success
/// flag starts false; pipelines set it from the evaluator.
pub struct CompletionGenerator<'a> {
    service: &'a dyn CompletionService,
    params: GenerationParams,
}

impl<'a> CompletionGenerator<'a> {
    /// Creates a generator over `service`.
    pub fn new(service: &'a dyn CompletionService, params: GenerationParams) -> Self {
        Self { service, params }
    }
}

impl Generator for CompletionGenerator<'_> {
    fn generate(&self, query: &str, context: &ContextSlice) -> Result<Trace> {
        let request = GenerationRequest {
            query,
            bullets: context
                .iter()
                .map(|b| BulletView {
                    id: &b.id,
                    kind: b.kind.as_str(),
                    title: &b.title,
                    body: &b.body,
                })
                .collect(),
        };
        let messages = vec![
            ChatMessage::system(GENERATOR_SYSTEM_PROMPT),
            ChatMessage::user(serde_json::to_string(&request)?),
        ];

        let completion = self.service.complete(&messages, &self.params)?;
        let reply = GenerationReply::parse(&completion.content);

        let mut trace = Trace::new(query)
            .with_prompt(serde_json::to_string(&messages)?)
            .with_response(reply.answer_text())
            .with_selected(context.ids())
            .with_used(reply.used_bullet_ids)
            .with_misleading(reply.misleading_bullet_ids)
            .with_metadata("model", completion.model)
            .with_metadata(USAGE_METADATA_KEY, serde_json::to_string(&completion.usage)?)
            .with_metadata("raw_response", completion.content);
        trace.attribution_notes = reply.attribution_notes;
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        let reply = GenerationReply::parse(
            r#"{"answer": "Paris", "used_bullet_ids": ["b1"], "attribution_notes": {"b1": "capital"}}"#,
        );
        assert_eq!(reply.answer_text(), "Paris");
        assert_eq!(reply.used_bullet_ids, vec![BulletId::from("b1")]);
        assert!(reply.misleading_bullet_ids.is_empty());
        assert_eq!(reply.attribution_notes["b1"], "capital");
    }

    #[test]
    fn test_plain_text_reply() {
        let reply = GenerationReply::parse("Just Paris.");
        assert_eq!(reply.answer_text(), "Just Paris.");
        assert!(reply.used_bullet_ids.is_empty());
    }

    #[test]
    fn test_non_string_answer() {
        assert_eq!(GenerationReply::parse(r#"{"answer": 42}"#).answer_text(), "42");
        assert_eq!(GenerationReply::parse("{}").answer_text(), "");
    }

    #[test]
    fn test_episode_from_json() {
        let episode: Episode = serde_json::from_str(r#"{"query": "2+2?", "answer": "4"}"#).unwrap();
        assert_eq!(episode, Episode::new("2+2?").with_answer("4"));
    }
}
