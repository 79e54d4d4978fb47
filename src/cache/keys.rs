//! Cache key layout shared by the sync handler and by readers.
//!
//! Keys are `:`-separated so whole families can be invalidated with a glob.

use sha2::{Digest, Sha256};

/// Every cached leaderboard page, across colleges.
pub const LEADERBOARD_PATTERN: &str = "leaderboard:*";

pub fn user_info(handle: &str) -> String {
  format!("user:{}:info", normalize_handle(handle))
}

pub fn user_submissions(handle: &str) -> String {
  format!("user:{}:submissions", normalize_handle(handle))
}

/// Everything cached for one handle.
pub fn user_pattern(handle: &str) -> String {
  format!("user:{}:*", normalize_handle(handle))
}

pub fn contests(include_gym: bool) -> String {
  if include_gym {
    "contests:gym".to_string()
  } else {
    "contests:official".to_string()
  }
}

/// Problem set filtered by tags. Tag order and case do not matter.
pub fn problemset(tags: &[String]) -> String {
  if tags.is_empty() {
    return "problemset:all".to_string();
  }

  let mut normalized: Vec<String> = tags.iter().map(|t| t.trim().to_lowercase()).collect();
  normalized.sort();
  normalized.dedup();

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(normalized.join(";").as_bytes());
  format!("problemset:{}", hex::encode(hasher.finalize()))
}

pub fn leaderboard(college: &str) -> String {
  format!("leaderboard:{}", college.trim().to_lowercase())
}

/// Handles are case-insensitive on the judge.
pub fn normalize_handle(handle: &str) -> String {
  handle.trim().to_lowercase()
}
