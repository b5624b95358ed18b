//! Configuration for Sigmaward

use crate::compile::SigmaCliTranslator;
use crate::error::{Error, Result};
use crate::reconcile::ElasticsearchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding local state, relative to the working root
pub const DATA_DIR: &str = ".sigmaward";
const CONFIG_FILE: &str = "config.toml";

/// Settings for one Sigmaward deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// SQLite database holding rules, versions and alerts
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory polled by ElastAlert for compiled rules
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Scratch directory for translator input and output
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Source directory for bulk `load`
    #[serde(default = "default_rules_dir")]
    pub rules_dir: PathBuf,

    #[serde(default)]
    pub translator: TranslatorSettings,

    #[serde(default)]
    pub elasticsearch: ElasticsearchSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

/// External rule translator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorSettings {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default = "default_translator_args")]
    pub args: Vec<String>,

    #[serde(default = "default_translator_timeout")]
    pub timeout_secs: u64,

    /// Shared ElastAlert defaults merged into every artifact
    #[serde(default = "default_defaults_import")]
    pub defaults_import: Option<String>,
}

/// Elasticsearch holding ElastAlert's status index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_index")]
    pub index: String,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Records fetched per reconciliation
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Reconciliation windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: i64,

    #[serde(default = "default_stats_window_hours")]
    pub stats_window_hours: i64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DATA_DIR).join("sigmaward.db")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("elastalert").join("rules")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(DATA_DIR).join("staging")
}

fn default_rules_dir() -> PathBuf {
    PathBuf::from("rules")
}

fn default_program() -> String {
    "sigma".to_string()
}

fn default_target() -> String {
    "elastalert".to_string()
}

fn default_translator_args() -> Vec<String> {
    vec!["--without-pipeline".to_string()]
}

fn default_translator_timeout() -> u64 {
    60
}

fn default_defaults_import() -> Option<String> {
    Some("/app/defaults.yml".to_string())
}

fn default_endpoint() -> String {
    "https://localhost:9200".to_string()
}

fn default_index() -> String {
    "elastalert_status".to_string()
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_page_size() -> usize {
    crate::reconcile::DEFAULT_PAGE_SIZE
}

fn default_request_timeout() -> u64 {
    30
}

fn default_lookback_minutes() -> i64 {
    crate::reconcile::DEFAULT_LOOKBACK_MINUTES
}

fn default_stats_window_hours() -> i64 {
    crate::reconcile::DEFAULT_STATS_WINDOW_HOURS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            artifacts_dir: default_artifacts_dir(),
            staging_dir: default_staging_dir(),
            rules_dir: default_rules_dir(),
            translator: TranslatorSettings::default(),
            elasticsearch: ElasticsearchSettings::default(),
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            target: default_target(),
            args: default_translator_args(),
            timeout_secs: default_translator_timeout(),
            defaults_import: default_defaults_import(),
        }
    }
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            index: default_index(),
            username: None,
            password: None,
            accept_invalid_certs: default_accept_invalid_certs(),
            page_size: default_page_size(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            lookback_minutes: default_lookback_minutes(),
            stats_window_hours: default_stats_window_hours(),
        }
    }
}

impl Settings {
    /// Default location of the config file under a root directory
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(DATA_DIR).join(CONFIG_FILE)
    }

    /// Load from an explicit file, which must exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load `<root>/.sigmaward/config.toml` or return defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = Self::default_path(root);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write as pretty TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Resolve a configured path: `~` expands to the home directory and
    /// relative paths are taken from `root`.
    pub fn resolve(root: &Path, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }

    pub fn translator(&self) -> SigmaCliTranslator {
        SigmaCliTranslator::new(
            &self.translator.program,
            &self.translator.target,
            self.translator.args.clone(),
        )
    }

    pub fn translator_timeout(&self) -> Duration {
        Duration::from_secs(self.translator.timeout_secs)
    }

    pub fn elasticsearch(&self) -> ElasticsearchConfig {
        let es = &self.elasticsearch;
        ElasticsearchConfig {
            endpoint: es.endpoint.clone(),
            index: es.index.clone(),
            username: es.username.clone(),
            password: es.password.clone(),
            accept_invalid_certs: es.accept_invalid_certs,
            timeout: Duration::from_secs(es.timeout_secs),
        }
    }
}
