//! Request DTOs for the admin API
//!
//! Defines the structure of incoming query strings.

use serde::Deserialize;

use crate::cache::is_valid_key;

/// Query string of the pattern removal endpoint (`DELETE /cache?pattern=...`)
///
/// # Fields
/// - `pattern`: Glob over logical keys, e.g. `product:*`
#[derive(Debug, Clone, Deserialize)]
pub struct PatternQuery {
    pub pattern: String,
}

impl PatternQuery {
    /// Validates the pattern
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if !is_valid_key(&self.pattern) {
            return Some("Pattern must be non-empty and free of control characters".to_string());
        }
        if self.pattern.chars().all(|c| c == '*') {
            return Some("Match-all pattern rejected, use POST /cache/clear".to_string());
        }
        None
    }
}
