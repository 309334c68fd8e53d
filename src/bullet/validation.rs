//! Validation for bullets before they reach the storage layer.
//!
//! ```text
//! Bullet::new() / Bullet::revalidate()
//!     ├── prepare_body()     ← sanitize, length, safety predicate
//!     └── validate_bullet()  ← title and body limits
//! RedbStorage::upsert_bullets()
//!     └── validate_bullet()  ← re-checked for every bullet in the batch
//! ```

use crate::error::ValidationError;
use crate::storage::schema::{MAX_BODY_CHARS, MAX_TITLE_CHARS};

use super::sanitize::{contains_forbidden, sanitize_text};
use super::types::Bullet;

/// Sanitizes a body and checks it against the length and safety limits.
pub(crate) fn prepare_body(raw: &str) -> Result<String, ValidationError> {
    let body = sanitize_text(raw);
    check_body(&body)?;
    Ok(body)
}

fn check_body(body: &str) -> Result<(), ValidationError> {
    let len = body.chars().count();
    if len > MAX_BODY_CHARS {
        return Err(ValidationError::content_too_large("body", len, MAX_BODY_CHARS));
    }
    if contains_forbidden(body) {
        return Err(ValidationError::forbidden_content("body"));
    }
    Ok(())
}

/// Validates a bullet's title and body.
///
/// # Rules
///
/// | Field | Constraint |
/// |-------|------------|
/// | `title` | Non-blank, max 160 chars |
/// | `body` | Max 1200 chars, no forbidden tokens or patterns |
/// | `embedding` | Finite components only |
pub fn validate_bullet(bullet: &Bullet) -> Result<(), ValidationError> {
    if let Some(embedding) = &bullet.embedding {
        if !embedding.iter().all(|v| v.is_finite()) {
            return Err(ValidationError::invalid_field(
                "embedding",
                "must contain only finite values",
            ));
        }
    }
    if bullet.title.trim().is_empty() {
        return Err(ValidationError::required_field("title"));
    }
    let title_len = bullet.title.chars().count();
    if title_len > MAX_TITLE_CHARS {
        return Err(ValidationError::content_too_large(
            "title",
            title_len,
            MAX_TITLE_CHARS,
        ));
    }
    check_body(&bullet.body)
}
