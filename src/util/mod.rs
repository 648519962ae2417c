//! Embedded assets, on-disk drafts, build metadata and small helpers.

use std::sync::atomic::{AtomicU64, Ordering};

pub mod assets;
pub mod persistence;
pub mod version;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id such as `toast-7`. Only meaningful within one run.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed))
}
