//! Glob style name matching, used to select databases and collections.
//!
//! Only two wildcards are recognized: `*` matches any run of characters (including an empty one),
//! and `?` matches exactly one character.  Everything else matches literally.
//!
//! # Example
//! ```
//! use mongo_copy::wildcard;
//!
//! assert!(wildcard::is_match("user_*", "user_2024"));
//! assert!(!wildcard::is_match("user_??", "user_2024"));
//! assert!(wildcard::is_match("Orders", "orders"));
//! ```
use regex::RegexBuilder;

/// Returns true if `pattern` contains `*` or `?`.
pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Translate a wildcard `pattern` into an anchored regular expression.
pub fn to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    format!("^{}$", escaped)
}

/// Check if `name` matches `pattern`, ignoring case.
pub fn is_match(pattern: &str, name: &str) -> bool {
    is_match_with_case(pattern, name, true)
}

/// Check if `name` matches `pattern`.
///
/// Exact equality always matches.  A blank pattern or name never matches anything else, and a
/// pattern without wildcards falls back to plain string comparison.
pub fn is_match_with_case(pattern: &str, name: &str, ignore_case: bool) -> bool {
    if pattern == name {
        return true;
    }
    if pattern.trim().is_empty() || name.trim().is_empty() {
        return false;
    }
    if !has_wildcard(pattern) {
        return if ignore_case {
            pattern.to_lowercase() == name.to_lowercase()
        } else {
            false
        };
    }

    RegexBuilder::new(&to_regex(pattern))
        .case_insensitive(ignore_case)
        .build()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}
