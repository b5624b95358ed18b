//! Rule activation state machine
//!
//! Keeps the artifact directory consistent with the `active` flag: an
//! artifact exists exactly for the latest version of each active rule.
//! Compile failures never leave a rule marked active without an artifact.

use crate::compile::RuleCompiler;
use crate::error::{Error, Result};
use crate::rule::{RuleContent, RuleDetails, RuleDocument, RuleValidator, RuleVersion};
use crate::storage::Database;
use serde::Serialize;
use std::path::PathBuf;

/// What happened to the artifact after a new version was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArtifactState {
    /// Rule is inactive; nothing compiled
    Inactive,
    /// New version compiled and installed
    Installed { path: PathBuf },
    /// New version failed to compile and the rule was switched off
    Deactivated { error: String },
}

/// Outcome of appending a version to a rule
#[derive(Debug, Clone, Serialize)]
pub struct VersionOutcome {
    pub version: RuleVersion,
    pub artifact: ArtifactState,
}

/// Result of a fleet-wide resynchronization
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResyncReport {
    /// Rule titles with their installed artifact
    pub installed: Vec<(String, PathBuf)>,
    /// Rule titles that were deactivated, with the reason
    pub deactivated: Vec<(String, String)>,
}

/// Drives Inactive/Active transitions for rules
pub struct ActivationController<'a> {
    db: &'a Database,
    compiler: &'a RuleCompiler,
    validator: RuleValidator,
}

impl<'a> ActivationController<'a> {
    pub fn new(db: &'a Database, compiler: &'a RuleCompiler) -> Self {
        Self {
            db,
            compiler,
            validator: RuleValidator::new(),
        }
    }

    /// Validate raw text into storable content
    pub fn prepare(&self, text: &str) -> Result<RuleContent> {
        let document = self.validator.validate(text)?.into_complete()?;
        RuleContent::from_document(&document)
    }

    /// Validate an already-parsed document into storable content
    pub fn prepare_document(&self, document: RuleDocument) -> Result<RuleContent> {
        let document = self.validator.validate_document(document).into_complete()?;
        RuleContent::from_document(&document)
    }

    /// Store a new inactive rule from raw text
    pub fn create_rule(&self, text: &str) -> Result<RuleDetails> {
        let content = self.prepare(text)?;
        self.db.create_rule(&content, None)
    }

    /// Append a version to a rule.
    ///
    /// For an active rule the previous artifact is removed and the new
    /// version compiled. If that compile fails the rule is deactivated
    /// and the outcome carries the error; the version itself stays stored.
    pub async fn add_version(&self, rule_id: i64, text: &str) -> Result<VersionOutcome> {
        let content = self.prepare(text)?;
        let rule = self
            .db
            .find_rule(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("rule {}", rule_id)))?;
        let previous = self.db.find_latest_version(rule_id)?;

        let version = self.db.add_version(rule_id, &content)?;

        if !rule.active {
            return Ok(VersionOutcome {
                version,
                artifact: ArtifactState::Inactive,
            });
        }

        if let Some(ref previous) = previous {
            if let Err(e) = self.compiler.remove(previous) {
                tracing::warn!(
                    rule_id,
                    title = %rule.title,
                    error = %e,
                    "could not remove superseded artifact, deactivating rule"
                );
                self.db.set_active(rule_id, false)?;
                return Ok(VersionOutcome {
                    version,
                    artifact: ArtifactState::Deactivated {
                        error: e.to_string(),
                    },
                });
            }
        }

        let artifact = match self.compiler.compile(&version).await {
            Ok(path) => ArtifactState::Installed { path },
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    title = %rule.title,
                    error = %e,
                    "new version failed to compile, deactivating rule"
                );
                self.db.set_active(rule_id, false)?;
                ArtifactState::Deactivated {
                    error: e.to_string(),
                }
            }
        };

        Ok(VersionOutcome { version, artifact })
    }

    /// Compile the latest version and mark the rule active.
    ///
    /// On compile failure the rule is left inactive with no artifact and
    /// the error returned.
    pub async fn activate(&self, rule_id: i64) -> Result<PathBuf> {
        let rule = self
            .db
            .find_rule(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("rule {}", rule_id)))?;
        let version = self
            .db
            .find_latest_version(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("versions of rule {}", rule_id)))?;

        let path = match self.compiler.compile(&version).await {
            Ok(path) => path,
            Err(e) => {
                if rule.active {
                    tracing::warn!(
                        rule_id,
                        title = %rule.title,
                        error = %e,
                        "recompile failed, deactivating rule"
                    );
                    self.db.set_active(rule_id, false)?;
                    self.remove_artifacts(rule_id)?;
                }
                return Err(e);
            }
        };

        if let Err(e) = self.db.set_active(rule_id, true) {
            self.compiler.remove(&version)?;
            return Err(e);
        }

        tracing::info!(rule_id, title = %rule.title, path = %path.display(), "activated rule");
        Ok(path)
    }

    /// Mark the rule inactive and remove its artifacts. Safe to repeat.
    pub fn deactivate(&self, rule_id: i64) -> Result<()> {
        self.db.set_active(rule_id, false)?;
        let removed = self.remove_artifacts(rule_id)?;

        tracing::info!(rule_id, removed, "deactivated rule");
        Ok(())
    }

    /// Remove artifacts then delete the rule with its versions and alerts.
    /// Returns false if the rule did not exist.
    pub fn delete_rule(&self, rule_id: i64) -> Result<bool> {
        self.remove_artifacts(rule_id)?;
        let deleted = self.db.deactivate_and_delete(rule_id)?;

        if deleted {
            tracing::info!(rule_id, "deleted rule");
        }
        Ok(deleted)
    }

    /// Rebuild the artifact directory from the active rules.
    ///
    /// Rules whose latest version no longer compiles are switched off.
    /// Running it twice without rule changes yields the same state.
    pub async fn resync_all(&self) -> Result<ResyncReport> {
        self.compiler.artifacts().clear()?;

        let mut report = ResyncReport::default();
        for rule in self.db.active_rules()? {
            let compiled = match self.db.find_latest_version(rule.id)? {
                Some(version) => self.compiler.compile(&version).await,
                None => Err(Error::Compile("rule has no versions".to_string())),
            };

            match compiled {
                Ok(path) => {
                    tracing::info!(title = %rule.title, path = %path.display(), "installed artifact");
                    report.installed.push((rule.title, path));
                }
                Err(e) => {
                    tracing::warn!(title = %rule.title, error = %e, "deactivating rule");
                    self.db.set_active(rule.id, false)?;
                    report.deactivated.push((rule.title, e.to_string()));
                }
            }
        }

        tracing::info!(
            installed = report.installed.len(),
            deactivated = report.deactivated.len(),
            "resynchronized artifacts"
        );
        Ok(report)
    }

    /// Clear the artifact directory and delete every rule
    pub fn clear_all(&self) -> Result<usize> {
        self.compiler.artifacts().clear()?;
        let deleted = self.db.delete_all_rules()?;

        tracing::info!(deleted, "cleared all rules");
        Ok(deleted)
    }

    /// Remove every artifact belonging to any version of the rule
    fn remove_artifacts(&self, rule_id: i64) -> Result<usize> {
        let mut removed = 0;
        for version in self.db.versions(rule_id)? {
            if self.compiler.remove(&version)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
