use crate::error::{Result, TaskError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const TASKMASTER_DIR: &str = ".taskmaster";
pub const SETS_DIR: &str = ".taskmaster/sets";

pub const CONFIG_FILE: &str = ".taskmaster/config.yaml";
pub const INDEX_FILE: &str = ".taskmaster/index.json";
pub const INDEX_LOCK_FILE: &str = ".taskmaster/index.lock";

pub const STATE_FILE: &str = "state.json";
pub const LOOP_FILE: &str = "loop.json";
pub const LOCK_FILE: &str = ".lock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn taskmaster_dir(root: &Path) -> PathBuf {
    root.join(TASKMASTER_DIR)
}

pub fn sets_dir(root: &Path) -> PathBuf {
    root.join(SETS_DIR)
}

pub fn set_dir(root: &Path, slug: &str) -> PathBuf {
    sets_dir(root).join(slug)
}

pub fn state_path(root: &Path, slug: &str) -> PathBuf {
    set_dir(root, slug).join(STATE_FILE)
}

pub fn loop_path(root: &Path, slug: &str) -> PathBuf {
    set_dir(root, slug).join(LOOP_FILE)
}

pub fn lock_path(root: &Path, slug: &str) -> PathBuf {
    set_dir(root, slug).join(LOCK_FILE)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn index_path(root: &Path) -> PathBuf {
    root.join(INDEX_FILE)
}

pub fn index_lock_path(root: &Path) -> PathBuf {
    root.join(INDEX_LOCK_FILE)
}

/// `state.json` relative to the project root, as recorded in the index.
pub fn relative_state_path(slug: &str) -> String {
    format!("{SETS_DIR}/{slug}/{STATE_FILE}")
}

// ---------------------------------------------------------------------------
// Slug validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 || !slug_re().is_match(slug) {
        return Err(TaskError::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

/// Lowercase, hyphenated slug derived from a free-form title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(64).collect::<String>().trim_end_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
