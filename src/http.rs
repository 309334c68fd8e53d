//! Blocking HTTP plumbing shared by the remote embedding and completion
//! providers.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use ureq::Agent;

/// Builds an agent whose every request is bounded by `timeout`.
pub(crate) fn agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Joins a base URL and an endpoint path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Reads the API key from the named environment variable.
///
/// Returns a plain message on failure so each provider can wrap it in its
/// own error variant.
pub(crate) fn api_key(var: &str) -> Result<String, String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(format!("environment variable {var} is not set")),
    }
}

/// POSTs `body` as JSON with bearer auth and decodes a JSON reply.
///
/// Non-2xx statuses surface as errors.
pub(crate) fn post_json<B, R>(agent: &Agent, url: &str, key: &str, body: &B) -> Result<R, String>
where
    B: Serialize,
    R: DeserializeOwned,
{
    debug!(url, "POST");
    let mut response = agent
        .post(url)
        .header("Authorization", &format!("Bearer {key}"))
        .send_json(body)
        .map_err(|e| match e {
            ureq::Error::StatusCode(status) => format!("{url} returned HTTP {status}"),
            other => format!("request to {url} failed: {other}"),
        })?;

    response
        .body_mut()
        .read_json::<R>()
        .map_err(|e| format!("invalid response from {url}: {e}"))
}
