//! Sigmaward - Sigma rule lifecycle and alert reconciliation
//!
//! This library validates and versions detection rules, compiles active
//! rules into ElastAlert artifacts, and reconciles fired alerts into a
//! local ledger.

pub mod activation;
pub mod cli;
pub mod compile;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod rule;
pub mod storage;

/// Re-export commonly used types
pub use activation::{ActivationController, ArtifactState, ResyncReport};
pub use compile::{ArtifactStore, RuleCompiler};
pub use config::Settings;
pub use error::{Error, Result};
pub use reconcile::{AlertReconciler, ReconcileStats};
pub use rule::{Level, Rule, RuleValidator, RuleVersion};
pub use storage::Database;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "sigmaward";
