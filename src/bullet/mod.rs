//! Bullets: the persisted units of guidance.
//!
//! A bullet is created by the curator from reflector proposals, mutated by
//! patches and usage recording, and destroyed only by pruning.

mod sanitize;
mod types;
pub(crate) mod validation;

pub use sanitize::{contains_forbidden, is_safe, sanitize_text};
pub use types::{Bullet, BulletKind, BulletPatch, PatchMode, PatchOp};
pub use validation::validate_bullet;
