//! Include-only transfer filter

use crate::error::{Result, StorageError};
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Selects an included path and everything below it
#[derive(Debug, Clone)]
pub struct IncludeFilter {
    pattern: Option<Pattern>,
}

impl IncludeFilter {
    /// Validate and compile `include`
    ///
    /// Absolute patterns and patterns escaping the source root are rejected.
    pub fn new(include: &str) -> Result<Self> {
        if include.starts_with('/') {
            return Err(StorageError::Validation(format!(
                "{include}: absolute paths are not allowed"
            )));
        }
        let cleaned = clean(include);
        if cleaned == ".." || cleaned.starts_with("../") {
            return Err(StorageError::Validation(format!(
                "{include}: paths outside the source directory are not allowed"
            )));
        }
        if cleaned == "." {
            return Ok(Self { pattern: None });
        }
        let pattern = Pattern::new(&cleaned)
            .map_err(|e| StorageError::Validation(format!("{include}: {e}")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Whether `relative` (a `/`-separated path below the source root) is
    /// included
    pub fn matches(&self, relative: &str) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };
        let mut prefix = String::new();
        relative.split('/').any(|part| {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            pattern.matches_with(&prefix, MATCH_OPTIONS)
        })
    }
}

/// Lexical path cleaning: drops empty and `.` components and resolves `..`
/// where possible
fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
