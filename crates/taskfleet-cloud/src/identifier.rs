//! Task identifiers
//!
//! A task is known by a short, user-facing name and a long form that prefixes
//! every cloud resource created on its behalf.

use crate::error::{CloudError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

const PREFIX: &str = "tfl";
const MAX_SHORT_LEN: usize = 32;
const DIGEST_LEN: usize = 8;

static LONG_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tfl-([a-z0-9](?:[a-z0-9-]*[a-z0-9])?)-([0-9a-f]{8})$")
        .expect("identifier pattern is valid")
});

/// Stable naming root for every resource of one task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    name: String,
    digest: String,
}

impl Identifier {
    /// Build an identifier from a user-given task name
    pub fn new(raw: &str) -> Self {
        let digest = hex::encode(Sha256::digest(raw.as_bytes()));
        Self {
            name: normalize(raw),
            digest: digest[..DIGEST_LEN].to_string(),
        }
    }

    /// Recover an identifier from its long form
    pub fn parse(long: &str) -> Result<Self> {
        let captures = LONG_FORM
            .captures(long)
            .ok_or_else(|| CloudError::Validation(format!("not a task identifier: {long}")))?;
        Ok(Self {
            name: captures[1].to_string(),
            digest: captures[2].to_string(),
        })
    }

    pub fn short(&self) -> &str {
        &self.name
    }

    /// `tfl-<name>-<digest>`, used as the cloud-side resource name
    pub fn long(&self) -> String {
        format!("{PREFIX}-{}-{}", self.name, self.digest)
    }

    /// Alphanumeric form for providers with strict naming rules
    /// (Azure storage accounts accept at most 24 lowercase alphanumerics).
    pub fn compact(&self, max: usize) -> String {
        let budget = max.saturating_sub(PREFIX.len() + DIGEST_LEN);
        let name: String = self
            .name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(budget)
            .collect();
        format!("{PREFIX}{name}{}", self.digest)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long())
    }
}

fn normalize(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    let name: String = name.trim_matches('-').chars().take(MAX_SHORT_LEN).collect();
    let name = name.trim_end_matches('-');
    if name.is_empty() {
        "task".to_string()
    } else {
        name.to_string()
    }
}
