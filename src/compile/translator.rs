//! External rule translation
//!
//! The compiler hands a staged Sigma document to a [`Translator`] and
//! expects an ElastAlert rule at the output path. The production
//! implementation shells out to `sigma convert`.

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Outcome of one translator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Captured stdout and stderr
    pub diagnostics: String,
}

/// Converts a staged rule document into the target engine's format
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Translate the document at `input`, writing the result to `output`.
    ///
    /// A non-zero exit is reported through `Translation::success`; `Err`
    /// is reserved for failing to run the translator at all.
    async fn translate(&self, input: &Path, output: &Path) -> Result<Translation>;
}

/// `sigma convert` from pySigma's sigma-cli
#[derive(Debug, Clone)]
pub struct SigmaCliTranslator {
    program: String,
    target: String,
    args: Vec<String>,
}

impl SigmaCliTranslator {
    pub fn new(program: &str, target: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            target: target.to_string(),
            args,
        }
    }

    /// `sigma convert -t elastalert --without-pipeline`
    pub fn elastalert() -> Self {
        Self::new("sigma", "elastalert", vec!["--without-pipeline".to_string()])
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("convert")
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-t")
            .arg(&self.target)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Translator for SigmaCliTranslator {
    fn name(&self) -> &str {
        &self.program
    }

    async fn translate(&self, input: &Path, output: &Path) -> Result<Translation> {
        tracing::debug!(
            program = %self.program,
            target = %self.target,
            input = %input.display(),
            "invoking rule translator"
        );

        let result = self
            .command(input, output)
            .output()
            .await
            .map_err(|e| Error::Compile(format!("Failed to run {}: {}", self.program, e)))?;

        let mut diagnostics = String::from_utf8_lossy(&result.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&result.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                diagnostics.push('\n');
            }
            diagnostics.push_str(&stderr);
        }

        Ok(Translation {
            success: result.status.success(),
            exit_code: result.status.code(),
            diagnostics: diagnostics.trim_end().to_string(),
        })
    }
}

/// In-process translator for tests
///
/// Emits a minimal ElastAlert rule named after the document title.
/// Can be told to fail for every input, for specific titles, or to stall.
#[derive(Debug, Clone, Default)]
pub struct MockTranslator {
    fail_all: Option<String>,
    fail_titles: HashSet<String>,
    delay: Option<Duration>,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every translation with the given diagnostic
    pub fn failing(diagnostic: &str) -> Self {
        Self {
            fail_all: Some(diagnostic.to_string()),
            ..Self::default()
        }
    }

    /// Fail only rules with this title
    pub fn fail_title(mut self, title: &str) -> Self {
        self.fail_titles.insert(title.to_string());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(&self, input: &Path, output: &Path) -> Result<Translation> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = |diagnostics: String| Translation {
            success: false,
            exit_code: Some(1),
            diagnostics,
        };

        if let Some(ref diagnostic) = self.fail_all {
            return Ok(failed(diagnostic.clone()));
        }

        let staged = tokio::fs::read_to_string(input).await?;
        let document: Value = serde_yaml::from_str(&staged)
            .map_err(|e| Error::Compile(format!("mock translator: {}", e)))?;
        let title = document
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if self.fail_titles.contains(&title) {
            return Ok(failed(format!("Error: unsupported rule \"{}\"", title)));
        }

        let mut rule = Mapping::new();
        rule.insert("name".into(), title.into());
        rule.insert("type".into(), "any".into());
        rule.insert("index".into(), "*".into());
        rule.insert(
            "filter".into(),
            Value::Sequence(vec![document.get("detection").cloned().unwrap_or_default()]),
        );

        let text = serde_yaml::to_string(&Value::Mapping(rule))
            .map_err(|e| Error::Compile(e.to_string()))?;
        tokio::fs::write(output, text).await?;

        Ok(Translation {
            success: true,
            exit_code: Some(0),
            diagnostics: String::new(),
        })
    }
}
