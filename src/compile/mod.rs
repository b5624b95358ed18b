//! Compilation of rule versions into ElastAlert artifacts
//!
//! This module handles:
//! - Defensive enhancement of Sigma documents (log source defaults,
//!   field modifier rewriting)
//! - Staging and invoking the external translator under a timeout
//! - Post-processing the translated rule and installing it by content hash

mod artifact;
mod translator;

pub use artifact::ArtifactStore;
pub use translator::{MockTranslator, SigmaCliTranslator, Translation, Translator};

use crate::error::{Error, Result};
use crate::rule::{RuleDocument, RuleVersion};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on a single translator run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Field modifiers rewritten into wildcard patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    StartsWith,
    EndsWith,
    Contains,
    All,
    Any,
}

impl Modifier {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "startswith" => Some(Modifier::StartsWith),
            "endswith" => Some(Modifier::EndsWith),
            "contains" => Some(Modifier::Contains),
            "all" => Some(Modifier::All),
            "any" => Some(Modifier::Any),
            _ => None,
        }
    }

    fn wrap(&self, value: &str) -> Option<String> {
        match self {
            Modifier::StartsWith => Some(format!("{}*", value)),
            Modifier::EndsWith => Some(format!("*{}", value)),
            Modifier::Contains => Some(format!("*{}*", value)),
            Modifier::All | Modifier::Any => None,
        }
    }
}

/// Fill log source defaults and rewrite detection field modifiers.
pub fn enhance(mut document: RuleDocument) -> RuleDocument {
    let logsource = match document.get("logsource") {
        None | Some(Value::Null) => Some(Mapping::new()),
        Some(Value::Mapping(existing)) => Some(existing.clone()),
        Some(_) => None,
    };

    if let Some(mut logsource) = logsource {
        if !logsource.contains_key("category") {
            logsource.insert("category".into(), "logs".into());
        }
        if !logsource.contains_key("product") {
            logsource.insert("product".into(), "*".into());
        }
        document.set("logsource", Value::Mapping(logsource));
    }

    let detection = match document.get("detection") {
        Some(detection @ Value::Mapping(_)) => Some(rewrite_modifiers(detection)),
        _ => None,
    };
    if let Some(detection) = detection {
        document.set("detection", detection);
    }

    document
}

fn rewrite_modifiers(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, inner) in map {
                let inner = rewrite_modifiers(inner);
                let split = key.as_str().and_then(|k| k.split_once('|'));

                match split {
                    Some((field, chain)) => match apply_modifiers(chain, inner) {
                        Ok(rewritten) => {
                            out.insert(Value::String(field.to_string()), rewritten);
                        }
                        // Unknown modifiers are left for the translator
                        Err(unchanged) => {
                            out.insert(key.clone(), unchanged);
                        }
                    },
                    None => {
                        out.insert(key.clone(), inner);
                    }
                }
            }
            Value::Mapping(out)
        }
        Value::Sequence(items) => Value::Sequence(items.iter().map(rewrite_modifiers).collect()),
        other => other.clone(),
    }
}

/// Apply a `|`-separated modifier chain to a field value. Returns the
/// value untouched in `Err` when any modifier in the chain is unknown.
fn apply_modifiers(chain: &str, value: Value) -> std::result::Result<Value, Value> {
    let mut modifiers = Vec::new();
    for name in chain.split('|') {
        match Modifier::parse(name) {
            Some(m) => modifiers.push(m),
            None => return Err(value),
        }
    }

    let wildcard = modifiers
        .into_iter()
        .find(|m| !matches!(m, Modifier::All | Modifier::Any));

    Ok(match wildcard {
        Some(modifier) => wrap_value(modifier, value),
        None => value,
    })
}

fn wrap_value(modifier: Modifier, value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(modifier.wrap(&s).unwrap_or(s)),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| wrap_value(modifier, item))
                .collect(),
        ),
        other => other,
    }
}

/// Compiles rule versions into installed artifacts
pub struct RuleCompiler {
    translator: Box<dyn Translator>,
    artifacts: ArtifactStore,
    staging_dir: PathBuf,
    defaults_import: Option<String>,
    timeout: Duration,
}

impl RuleCompiler {
    pub fn new(
        translator: Box<dyn Translator>,
        artifacts: ArtifactStore,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            translator,
            artifacts,
            staging_dir: staging_dir.into(),
            defaults_import: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Shared defaults file merged into every artifact as `import:`
    pub fn with_defaults_import(mut self, import: Option<String>) -> Self {
        self.defaults_import = import;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Compile a version and install its artifact.
    ///
    /// Every failure comes back as `Error::Compile`.
    pub async fn compile(&self, version: &RuleVersion) -> Result<PathBuf> {
        match self.try_compile(version).await {
            Ok(path) => {
                tracing::info!(hash = %version.hash, path = %path.display(), "compiled rule version");
                Ok(path)
            }
            Err(e) => {
                tracing::warn!(hash = %version.hash, error = %e, "rule compilation failed");
                Err(match e {
                    Error::Compile(_) => e,
                    other => Error::Compile(other.to_string()),
                })
            }
        }
    }

    /// Delete the artifact of a version if present
    pub fn remove(&self, version: &RuleVersion) -> Result<bool> {
        self.artifacts.remove(&version.hash)
    }

    async fn try_compile(&self, version: &RuleVersion) -> Result<PathBuf> {
        let document = enhance(RuleDocument::parse(&version.content)?);
        let staged = serde_yaml::to_string(&document.into_value())
            .map_err(|e| Error::Compile(format!("Failed to serialize rule: {}", e)))?;

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let token = uuid::Uuid::new_v4().simple().to_string();
        let input = self
            .staging_dir
            .join(format!("{}-{}.yml", version.hash, token));
        let output = self
            .staging_dir
            .join(format!("{}-{}.out.yml", version.hash, token));
        let _cleanup = StagingFiles(vec![input.clone(), output.clone()]);

        tokio::fs::write(&input, staged)
            .await
            .map_err(|e| Error::Compile(format!("Failed to write rule file: {}", e)))?;

        let translation =
            match tokio::time::timeout(self.timeout, self.translator.translate(&input, &output))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Compile(format!(
                        "{} timed out after {:?}",
                        self.translator.name(),
                        self.timeout
                    )))
                }
            };

        if !translation.success {
            return Err(Error::Compile(format!(
                "Failed to convert rule to ElastAlert format: {}",
                translation.diagnostics
            )));
        }

        let produced = tokio::fs::read_to_string(&output)
            .await
            .map_err(|e| Error::Compile(format!("Translator produced no output: {}", e)))?;
        let finished = self.finish(&produced)?;

        self.artifacts.install(&version.hash, &finished)
    }

    /// Merge the defaults import into the translated rule
    fn finish(&self, produced: &str) -> Result<String> {
        let parsed: Value = serde_yaml::from_str(produced)
            .map_err(|e| Error::Compile(format!("Failed to enhance ElastAlert rule: {}", e)))?;
        let Value::Mapping(body) = parsed else {
            return Err(Error::Compile(
                "Failed to enhance ElastAlert rule: translator output is not a mapping".to_string(),
            ));
        };

        let mut merged = Mapping::with_capacity(body.len() + 1);
        if let Some(ref import) = self.defaults_import {
            merged.insert("import".into(), import.as_str().into());
        }
        for (key, value) in body {
            merged.insert(key, value);
        }

        serde_yaml::to_string(&Value::Mapping(merged))
            .map_err(|e| Error::Compile(format!("Failed to enhance ElastAlert rule: {}", e)))
    }
}

/// Removes staged files when dropped, whatever the outcome
struct StagingFiles(Vec<PathBuf>);

impl Drop for StagingFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            remove_quietly(path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}
