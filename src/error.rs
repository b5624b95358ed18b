//! Error kinds shared by the rule lifecycle components

/// Errors raised by validation, storage, compilation and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed rule document syntax.
    #[error("YAML parsing error: {0}")]
    Parse(String),

    /// Valid syntax but no content.
    #[error("Empty or invalid YAML content")]
    EmptyDocument,

    /// Required fields are absent, reported by dotted path.
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("A rule titled \"{0}\" already exists")]
    DuplicateTitle(String),

    /// Content hash collides with an existing version.
    #[error("Rule content already exists (hash {0})")]
    DuplicateContent(String),

    /// Artifact production failed; carries the diagnostic text.
    #[error("Compile error: {0}")]
    Compile(String),

    /// An external alert references a rule unknown locally.
    #[error("No rule found for alert rule name \"{0}\"")]
    OrphanedAlert(String),

    /// The external result store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Structured rejections that are reported to the caller and never
    /// abort a larger batch.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::EmptyDocument
                | Error::Validation { .. }
                | Error::DuplicateTitle(_)
                | Error::DuplicateContent(_)
        )
    }

    /// Failures that end the current invocation and should be retried
    /// by whoever scheduled it.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Database(_))
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
