//! Persisted rule entities

use super::{Level, RuleDocument};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, versioned detection rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    /// Unique human title
    pub title: String,
    /// Unique filesystem-safe name
    pub slug: String,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One immutable, content-addressed snapshot of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVersion {
    pub id: i64,
    pub rule_id: i64,
    /// Canonical rule text
    pub content: String,
    /// SHA-256 of `content`, unique across all versions
    pub hash: String,
    pub level: Level,
    pub created_at: DateTime<Utc>,
}

/// A rule together with its versions, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDetails {
    #[serde(flatten)]
    pub rule: Rule,
    pub versions: Vec<RuleVersion>,
}

impl RuleDetails {
    pub fn latest_version(&self) -> Option<&RuleVersion> {
        self.versions.first()
    }
}

/// Normalized content ready to be stored as a new version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleContent {
    pub title: String,
    pub description: String,
    pub content: String,
    pub hash: String,
    pub level: Level,
}

impl RuleContent {
    /// Derive storable content from a normalized document
    pub fn from_document(document: &RuleDocument) -> Result<Self> {
        let title = document
            .title()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Validation {
                missing: vec!["title".to_string()],
            })?
            .to_string();

        let content = document.to_canonical_text()?;
        let hash = super::content_hash(&content);

        Ok(Self {
            title,
            description: document.description().unwrap_or_default().to_string(),
            content,
            hash,
            level: document.level(),
        })
    }
}
