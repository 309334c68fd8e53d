//! Heuristic reflection: derives a delta from outcomes alone.
//!
//! - A *gap* is a failed trace that used no bullet and flagged none as
//!   misleading. Each gap yields one `strategy` bullet tagged `auto` and
//!   `gap`, sourced from that trace.
//! - A bullet flagged misleading in some trace gets one append patch,
//!   unless any trace in the batch used it.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::bullet::{Bullet, BulletKind, BulletPatch};
use crate::delta::Delta;
use crate::trace::Trace;
use crate::types::BulletId;

/// Characters of the query kept in a gap bullet title.
const GAP_TITLE_CHARS: usize = 80;

/// Characters of the query quoted in a gap bullet body.
const GAP_BODY_QUERY_CHARS: usize = 400;

const GENERIC_GAP_BODY: &str = "Add guidance for this kind of query.";

/// Text appended to a bullet that misled the agent.
pub const CLARIFICATION_TEXT: &str =
    "Clarify the conditions under which this guidance applies; it was reported as misleading.";

/// Builds a delta from `traces` without any model call.
///
/// The returned delta always carries the input traces.
pub fn heuristic_reflect(traces: &[Trace]) -> Delta {
    let bullets: Vec<Bullet> = traces.iter().filter(|t| t.is_gap()).filter_map(gap_bullet).collect();

    let used: BTreeSet<&BulletId> = traces.iter().flat_map(|t| &t.used_bullet_ids).collect();
    let patches: Vec<BulletPatch> = traces
        .iter()
        .flat_map(|t| &t.misleading_bullet_ids)
        .filter(|id| !used.contains(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|id| BulletPatch::append(id.clone(), CLARIFICATION_TEXT))
        .collect();

    debug!(
        traces = traces.len(),
        gaps = bullets.len(),
        patches = patches.len(),
        "Heuristic reflection"
    );

    Delta {
        bullets,
        patches,
        traces: traces.to_vec(),
    }
}

/// Title for a gap bullet: `Gap: ` plus the truncated query.
pub fn gap_title(query: &str) -> String {
    format!("Gap: {}", truncate_chars(query.trim(), GAP_TITLE_CHARS))
}

fn gap_bullet(trace: &Trace) -> Option<Bullet> {
    let query = trace.query.trim();
    let body = format!(
        "Add guidance for handling queries like: {}",
        truncate_chars(query, GAP_BODY_QUERY_CHARS)
    );

    // A query that trips the safety filter is not quoted back into the body.
    let bullet = Bullet::new(BulletKind::Strategy, gap_title(query), body)
        .or_else(|_| Bullet::new(BulletKind::Strategy, gap_title(query), GENERIC_GAP_BODY));

    match bullet {
        Ok(bullet) => Some(
            bullet
                .with_tags(["auto", "gap"])
                .with_source_trace(trace.id.clone()),
        ),
        Err(err) => {
            warn!(trace = %trace.id, error = %err, "Gap bullet rejected");
            None
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
