//! Reflection: turns traces into a proposed [`Delta`].
//!
//! With a completion service the reflector asks the model for bullets and
//! patches. Any failure on that path (provider error, unparsable reply) is
//! logged and replaced by [`heuristic_reflect`]; reflection never fails.

mod heuristic;
mod prompts;

pub use heuristic::{gap_title, heuristic_reflect, CLARIFICATION_TEXT};
pub use prompts::{REFLECTION_MAX_TOKENS, REFLECTOR_SYSTEM_PROMPT};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::bullet::{Bullet, BulletPatch};
use crate::completion::{CompletionService, GenerationParams};
use crate::delta::Delta;
use crate::error::{PlaybookError, Result};
use crate::trace::Trace;

/// Shape of a model reflection reply.
#[derive(Deserialize)]
struct ReflectionReply {
    #[serde(default)]
    bullets: Vec<Bullet>,
    #[serde(default)]
    patches: Vec<BulletPatch>,
}

/// Produces deltas from trace batches.
pub struct Reflector<'a> {
    completion: Option<&'a dyn CompletionService>,
    params: GenerationParams,
}

impl<'a> Reflector<'a> {
    /// A reflector that only uses the heuristic.
    pub fn heuristic() -> Self {
        Self {
            completion: None,
            params: GenerationParams::default(),
        }
    }

    /// A reflector that asks `completion` first.
    pub fn with_completion(completion: &'a dyn CompletionService, params: GenerationParams) -> Self {
        Self {
            completion: Some(completion),
            params: params.with_max_tokens(REFLECTION_MAX_TOKENS),
        }
    }

    /// Builds a reflector from an optional service.
    pub fn new(completion: Option<&'a dyn CompletionService>, params: GenerationParams) -> Self {
        match completion {
            Some(service) => Self::with_completion(service, params),
            None => Self::heuristic(),
        }
    }

    /// Reflects on `traces`. `label` is the expected answer, if known.
    ///
    /// An empty batch gives an empty delta. The result always carries the
    /// input traces.
    pub fn reflect(&self, traces: &[Trace], label: Option<&str>) -> Delta {
        if traces.is_empty() {
            return Delta::new();
        }

        let Some(service) = self.completion else {
            return heuristic_reflect(traces);
        };

        match self.reflect_via_model(service, traces, label) {
            Ok(delta) => delta,
            Err(err) => {
                warn!(error = %err, traces = traces.len(), "Model reflection failed, using heuristic");
                heuristic_reflect(traces)
            }
        }
    }

    fn reflect_via_model(
        &self,
        service: &dyn CompletionService,
        traces: &[Trace],
        label: Option<&str>,
    ) -> Result<Delta> {
        let messages = prompts::reflection_messages(traces, label)?;
        let completion = service.complete(&messages, &self.params)?;

        let reply: ReflectionReply = serde_json::from_str(prompts::extract_json(&completion.content))
            .map_err(|e| PlaybookError::completion(format!("unparsable reflection reply: {e}")))?;

        debug!(
            bullets = reply.bullets.len(),
            patches = reply.patches.len(),
            "Model reflection parsed"
        );
        Ok(Delta {
            bullets: reply.bullets,
            patches: reply.patches,
            traces: traces.to_vec(),
        })
    }
}
