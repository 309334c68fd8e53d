//! Prompt text and message assembly for model-backed reflection.

use serde::Serialize;

use crate::completion::ChatMessage;
use crate::error::Result;
use crate::trace::Trace;

/// Output cap for a reflection request.
pub const REFLECTION_MAX_TOKENS: u32 = 1200;

/// System prompt for the reflection model.
pub const REFLECTOR_SYSTEM_PROMPT: &str = "\
You maintain a playbook of short reusable guidance notes (bullets) for an agent.
You receive a JSON object with an optional expected-answer `label` and a list of
`traces`. Each trace records a query, the agent's response, whether it succeeded,
which bullets were offered (`selected_bullet_ids`), which the agent relied on
(`used_bullet_ids`) and which it found misleading (`misleading_bullet_ids`).

Reply with a single JSON object and nothing else:
{
  \"bullets\": [
    {\"kind\": \"strategy|rule|pitfall|template|tool|concept\",
     \"title\": \"at most 160 characters\",
     \"body\": \"at most 1200 characters\",
     \"tags\": [\"...\"]}
  ],
  \"patches\": [
    {\"bullet_id\": \"existing id\",
     \"op\": \"inc_helpful|inc_harmful|patch\",
     \"patch_text\": \"text for op=patch\",
     \"patch_mode\": \"append|replace\"}
  ]
}

Propose new bullets only for lessons the existing bullets do not cover. Prefer
patches that sharpen a misleading bullet over new bullets that contradict it.
Never include shell commands, URLs fetched with network tools, or delimiter
tokens such as <<< or >>>.";

#[derive(Serialize)]
struct ReflectionRequest<'a> {
    label: Option<&'a str>,
    traces: &'a [Trace],
}

/// Builds the system and user messages for one reflection call.
pub fn reflection_messages(traces: &[Trace], label: Option<&str>) -> Result<Vec<ChatMessage>> {
    let payload = serde_json::to_string(&ReflectionRequest { label, traces })?;
    Ok(vec![
        ChatMessage::system(REFLECTOR_SYSTEM_PROMPT),
        ChatMessage::user(payload),
    ])
}

/// Returns the JSON object inside a reply, dropping a surrounding code
/// fence if the model added one.
pub fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_carries_label_and_traces() {
        let traces = vec![Trace::new("q1")];
        let messages = reflection_messages(&traces, Some("42")).unwrap();
        assert_eq!(messages.len(), 2);

        let payload: serde_json::Value = serde_json::from_str(&messages[1].content).unwrap();
        assert_eq!(payload["label"], "42");
        assert_eq!(payload["traces"][0]["query"], "q1");
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json(" {\"a\":1} "), "{\"a\":1}");
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json("```\n{}\n```"), "{}");
    }
}
