//! Detection rule documents
//!
//! This module handles:
//! - Parsing raw Sigma rule text into a structured document
//! - Canonical serialization and content hashing for deduplication
//! - Severity levels and filesystem-safe slugs

mod model;
pub mod validator;

pub use model::{Rule, RuleContent, RuleDetails, RuleVersion};
pub use validator::{RuleValidator, ValidatedRule};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

/// Compute a stable hash for content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Severity level of a rule version
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Informational,
        Level::Low,
        Level::Medium,
        Level::High,
        Level::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Informational => "informational",
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
            Level::Critical => "critical",
        }
    }

    /// Parse an exact level name. Anything else is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == value)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed rule document with a mapping at its root.
///
/// The grammar below the top-level keys is opaque to this crate; only
/// `title`, `description`, `level`, `date`, `modified`, `logsource` and
/// `detection` are ever inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDocument {
    root: Mapping,
}

impl RuleDocument {
    /// Parse rule text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed YAML value
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::EmptyDocument),
            Value::Mapping(root) if root.is_empty() => Err(Error::EmptyDocument),
            Value::Mapping(root) => Ok(Self { root }),
            Value::Tagged(tagged) => Self::from_value(tagged.value),
            _ => Err(Error::Parse(
                "rule document must be a mapping of fields".to_string(),
            )),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(Value::as_str)
    }

    /// A field counts as set when present and not null
    pub fn is_set(&self, key: &str) -> bool {
        matches!(self.root.get(key), Some(v) if !v.is_null())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.root.insert(Value::String(key.to_string()), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.root.remove(key)
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    pub fn description(&self) -> Option<&str> {
        self.get_str("description")
    }

    /// Level declared in the document, or the default when absent/invalid
    pub fn level(&self) -> Level {
        self.get_str("level")
            .and_then(Level::parse)
            .unwrap_or_default()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    pub fn into_value(self) -> Value {
        Value::Mapping(self.root)
    }

    /// Serialize to the canonical text form: keys sorted recursively so
    /// formatting and key order in the input never affect the result.
    pub fn to_canonical_text(&self) -> Result<String> {
        let canonical = canonicalize(&Value::Mapping(self.root.clone()));
        serde_yaml::to_string(&canonical).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Content hash of the canonical text
    pub fn hash(&self) -> Result<String> {
        Ok(content_hash(&self.to_canonical_text()?))
    }
}

/// Recursively sort mapping keys.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut entries: Vec<(&Value, &Value)> = map.iter().collect();
            entries.sort_by_cached_key(|(k, _)| key_order(k));

            let mut sorted = Mapping::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Mapping(sorted)
        }
        Value::Sequence(items) => Value::Sequence(items.iter().map(canonicalize).collect()),
        Value::Tagged(tagged) => {
            let mut tagged = tagged.as_ref().clone();
            tagged.value = canonicalize(&tagged.value);
            Value::Tagged(Box::new(tagged))
        }
        other => other.clone(),
    }
}

fn key_order(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

/// Build a filesystem-safe slug: lowercase ASCII alphanumerics joined by
/// single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "rule".to_string()
    } else {
        slug
    }
}
