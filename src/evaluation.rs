//! Answer checking and batch accuracy.
//!
//! [`Evaluator`] is a closed set of answer checks chosen when a pipeline is
//! configured. [`compute_accuracy`] summarizes a batch of traces.

use serde::{Deserialize, Serialize};

use crate::trace::Trace;

/// Metadata key holding the provider usage JSON on a trace.
pub const USAGE_METADATA_KEY: &str = "usage";

/// How a response is compared with an expected answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evaluator {
    /// Trimmed strings are equal.
    ExactMatch,

    /// The lower-cased, whitespace-collapsed expected answer occurs in the
    /// equally normalized response.
    #[default]
    NormalizedString,

    /// The first number in the response is within `tolerance` of the
    /// expected number.
    NumericTolerance {
        /// Maximum absolute difference.
        tolerance: f64,
    },

    /// The response is a JSON object holding every required key. If it has
    /// an `answer` field, that field must also match under
    /// [`Evaluator::NormalizedString`].
    SchemaValidated {
        /// Keys the object must contain.
        required_keys: Vec<String>,
    },
}

impl Evaluator {
    /// Returns true if `response` satisfies `expected`.
    ///
    /// ```
    /// use ace_playbook::evaluation::Evaluator;
    ///
    /// assert!(Evaluator::NormalizedString.evaluate("The answer is  PARIS.", "paris"));
    /// assert!(Evaluator::NumericTolerance { tolerance: 0.01 }.evaluate("about 3.141", "3.14"));
    /// ```
    pub fn evaluate(&self, response: &str, expected: &str) -> bool {
        match self {
            Self::ExactMatch => response.trim() == expected.trim(),
            Self::NormalizedString => normalize(response).contains(&normalize(expected)),
            Self::NumericTolerance { tolerance } => {
                match (first_number(response), first_number(expected)) {
                    (Some(actual), Some(wanted)) => (actual - wanted).abs() <= *tolerance,
                    _ => false,
                }
            }
            Self::SchemaValidated { required_keys } => {
                let Ok(serde_json::Value::Object(object)) =
                    serde_json::from_str::<serde_json::Value>(response.trim())
                else {
                    return false;
                };
                if !required_keys.iter().all(|key| object.contains_key(key)) {
                    return false;
                }
                match object.get("answer") {
                    Some(serde_json::Value::String(answer)) => {
                        Self::NormalizedString.evaluate(answer, expected)
                    }
                    Some(other) => Self::NormalizedString.evaluate(&other.to_string(), expected),
                    None => true,
                }
            }
        }
    }
}

/// Lower-cases and collapses runs of whitespace to one space.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parses the first decimal number in `text`.
fn first_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        let signed = (b == b'-' || b == b'+')
            && bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if b.is_ascii_digit() || signed {
            start = Some(i);
            break;
        }
    }
    let start = start?;

    let mut end = start + 1;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot && bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit()) => {
                seen_dot = true;
                end += 1;
            }
            b',' if bytes.get(end + 1).is_some_and(|n| n.is_ascii_digit()) => end += 1,
            _ => break,
        }
    }
    text[start..end].replace(',', "").parse().ok()
}

/// Summary of a batch of traces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EvaluationResult {
    /// Fraction of successful traces, 0 for an empty batch.
    pub accuracy: f64,
    /// Mean `total_tokens` from each trace's usage metadata (missing or
    /// unparsable usage counts as 0).
    pub average_tokens: f64,
    /// Number of traces.
    pub total_traces: usize,
}

/// Computes accuracy and mean token usage over `traces`.
pub fn compute_accuracy(traces: &[Trace]) -> EvaluationResult {
    if traces.is_empty() {
        return EvaluationResult::default();
    }

    let successes = traces.iter().filter(|t| t.success).count();
    let tokens: u64 = traces.iter().map(total_tokens).sum();
    let total = traces.len();

    EvaluationResult {
        accuracy: successes as f64 / total as f64,
        average_tokens: tokens as f64 / total as f64,
        total_traces: total,
    }
}

fn total_tokens(trace: &Trace) -> u64 {
    trace
        .metadata
        .get(USAGE_METADATA_KEY)
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|usage| usage.get("total_tokens").and_then(|v| v.as_u64()))
        .unwrap_or(0)
}
