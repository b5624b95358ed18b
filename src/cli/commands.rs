//! Command implementations

use super::OutputFormat;
use crate::activation::{ActivationController, ArtifactState};
use crate::compile::{ArtifactStore, RuleCompiler};
use crate::config::{Settings, DATA_DIR};
use crate::error::Error;
use crate::reconcile::{AlertReconciler, ElasticsearchClient};
use crate::rule::{Rule, RuleDocument};
use crate::storage::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Resolved settings for a working root
pub struct Workspace {
    root: PathBuf,
    config_path: PathBuf,
    settings: Settings,
}

impl Workspace {
    /// Load settings from `config` or from the default location under `root`
    pub fn open(root: &Path, config: Option<&Path>) -> Result<Self> {
        let config_path = match config {
            Some(path) => path.to_path_buf(),
            None => Settings::default_path(root),
        };

        let settings = match config {
            Some(path) if path.exists() => Settings::load(path)?,
            Some(_) => Settings::default(),
            None => Settings::load_or_default(root)?,
        };

        Ok(Self {
            root: root.to_path_buf(),
            config_path,
            settings,
        })
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        Settings::resolve(&self.root, &self.settings.database_path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        Settings::resolve(&self.root, &self.settings.artifacts_dir)
    }

    pub fn rules_dir(&self) -> PathBuf {
        Settings::resolve(&self.root, &self.settings.rules_dir)
    }

    /// Open the database, which `init` must have created
    pub fn database(&self) -> Result<Database> {
        let db_path = self.database_path();
        if !db_path.exists() {
            anyhow::bail!("Sigmaward not initialized. Run 'sigmaward init' first.");
        }

        Database::open(&db_path)
            .with_context(|| format!("Failed to open database: {:?}", db_path))
    }

    pub fn compiler(&self) -> RuleCompiler {
        RuleCompiler::new(
            Box::new(self.settings.translator()),
            ArtifactStore::new(self.artifacts_dir()),
            Settings::resolve(&self.root, &self.settings.staging_dir),
        )
        .with_defaults_import(self.settings.translator.defaults_import.clone())
        .with_timeout(self.settings.translator_timeout())
    }

    pub fn result_store(&self) -> Result<ElasticsearchClient> {
        Ok(ElasticsearchClient::new(self.settings.elasticsearch())?)
    }
}

/// Initialize the database, directories and configuration
pub fn init(ws: &Workspace, force: bool) -> Result<()> {
    let db_path = ws.database_path();
    if db_path.exists() && !force {
        anyhow::bail!("Sigmaward already initialized. Use --force to re-initialize.");
    }

    std::fs::create_dir_all(ws.data_dir())?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _db = Database::open(&db_path)?;

    let artifacts_dir = ws.artifacts_dir();
    std::fs::create_dir_all(&artifacts_dir)
        .with_context(|| format!("Failed to create artifact directory: {:?}", artifacts_dir))?;

    if force || !ws.config_path.exists() {
        ws.settings.save(&ws.config_path)?;
    }

    println!("✓ Initialized Sigmaward in {:?}", ws.root);
    println!("  Database: {:?}", db_path);
    println!("  Artifacts: {:?}", artifacts_dir);
    println!("  Config: {:?}", ws.config_path);

    Ok(())
}

/// Add a rule, optionally activating it
pub async fn add(ws: &Workspace, file: &Path, enable: bool, format: OutputFormat) -> Result<()> {
    let text = read_source(file)?;
    let db = ws.database()?;
    let compiler = ws.compiler();
    let controller = ActivationController::new(&db, &compiler);

    let mut details = controller.create_rule(&text)?;

    if enable {
        controller
            .activate(details.rule.id)
            .await
            .with_context(|| format!("Rule '{}' was added but not enabled", details.rule.title))?;
        details.rule.active = true;
    }

    match format {
        OutputFormat::Json => print_json(&details)?,
        OutputFormat::Text => {
            let level = details
                .latest_version()
                .map(|v| v.level.as_str())
                .unwrap_or_default();
            println!(
                "✓ Added rule '{}' (id {}, level {})",
                details.rule.title, details.rule.id, level
            );
            if details.rule.active {
                println!("  Enabled");
            }
        }
    }

    Ok(())
}

/// Store a new version of a rule
pub async fn update(ws: &Workspace, reference: &str, file: &Path, format: OutputFormat) -> Result<()> {
    let text = read_source(file)?;
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let compiler = ws.compiler();
    let controller = ActivationController::new(&db, &compiler);

    let outcome = controller.add_version(rule.id, &text).await?;

    match format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => {
            println!(
                "✓ Stored version {} of '{}'",
                short_hash(&outcome.version.hash),
                rule.title
            );
            match outcome.artifact {
                ArtifactState::Inactive => {}
                ArtifactState::Installed { ref path } => println!("  Artifact: {:?}", path),
                ArtifactState::Deactivated { ref error } => {
                    println!("⚠ Rule disabled: {}", error)
                }
            }
        }
    }

    if let ArtifactState::Deactivated { error } = outcome.artifact {
        anyhow::bail!("New version failed to compile: {}", error);
    }

    Ok(())
}

/// List rules ordered by title
pub fn list(ws: &Workspace, format: OutputFormat) -> Result<()> {
    let db = ws.database()?;
    let rules = db.list_rules()?;

    match format {
        OutputFormat::Json => print_json(&rules)?,
        OutputFormat::Text => {
            if rules.is_empty() {
                println!("No rules.");
                return Ok(());
            }

            for rule in &rules {
                let marker = if rule.active { "●" } else { "○" };
                println!("{} {:>4}  {}  ({})", marker, rule.id, rule.title, rule.slug);
            }
        }
    }

    Ok(())
}

/// Show a rule with all versions, newest first
pub fn show(ws: &Workspace, reference: &str, format: OutputFormat) -> Result<()> {
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let details = db
        .rule_details(rule.id)?
        .ok_or_else(|| anyhow::anyhow!("Rule not found: {}", reference))?;

    if format == OutputFormat::Json {
        return print_json(&details);
    }

    println!("{}", details.rule.title);
    println!("{}\n", "=".repeat(details.rule.title.chars().count()));
    println!("ID: {}", details.rule.id);
    println!("Slug: {}", details.rule.slug);
    println!("Active: {}", details.rule.active);
    println!("Created: {}", details.rule.created_at.to_rfc3339());
    if !details.rule.description.is_empty() {
        println!("Description: {}", details.rule.description);
    }

    println!("\nVersions:");
    for version in &details.versions {
        println!(
            "  {}  {:<13}  {}",
            short_hash(&version.hash),
            version.level.as_str(),
            version.created_at.to_rfc3339()
        );
    }

    if let Some(latest) = details.latest_version() {
        println!("\nLatest content:\n");
        print!("{}", latest.content);
    }

    Ok(())
}

/// Compile and activate a rule
pub async fn enable(ws: &Workspace, reference: &str) -> Result<()> {
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let compiler = ws.compiler();
    let controller = ActivationController::new(&db, &compiler);

    let path = controller
        .activate(rule.id)
        .await
        .with_context(|| format!("Failed to enable '{}'", rule.title))?;

    println!("✓ Enabled '{}'", rule.title);
    println!("  Artifact: {:?}", path);
    Ok(())
}

/// Deactivate a rule
pub fn disable(ws: &Workspace, reference: &str) -> Result<()> {
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let compiler = ws.compiler();

    ActivationController::new(&db, &compiler).deactivate(rule.id)?;

    println!("✓ Disabled '{}'", rule.title);
    Ok(())
}

/// Delete a rule
pub fn delete(ws: &Workspace, reference: &str) -> Result<()> {
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let compiler = ws.compiler();

    ActivationController::new(&db, &compiler).delete_rule(rule.id)?;

    println!("✓ Deleted '{}'", rule.title);
    Ok(())
}

/// Summary of a bulk import
#[derive(Debug, Default, serde::Serialize)]
pub struct LoadSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Import every `.yml`/`.yaml` file under a directory
pub async fn load(
    ws: &Workspace,
    dir: Option<&Path>,
    auto_enable: bool,
    format: OutputFormat,
) -> Result<LoadSummary> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| ws.rules_dir());
    if !dir.is_dir() {
        anyhow::bail!("Rules directory not found: {:?}", dir);
    }

    let db = ws.database()?;
    let compiler = ws.compiler();
    let controller = ActivationController::new(&db, &compiler);
    let mut summary = LoadSummary::default();

    for entry in WalkDir::new(&dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_rule_file(path) {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        match import_file(&db, &controller, path, &stem) {
            Ok(rule_id) => {
                summary.imported += 1;
                if auto_enable {
                    db.set_active(rule_id, true)?;
                }
            }
            Err(e @ (Error::DuplicateTitle(_) | Error::DuplicateContent(_))) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping duplicate rule");
                summary.skipped += 1;
            }
            Err(e) if e.is_rejection() => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid rule");
                summary.failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Activation through the flag is only honored once the artifacts exist
    if summary.imported > 0 {
        let report = controller.resync_all().await?;
        for (title, error) in &report.deactivated {
            tracing::warn!(title = %title, error = %error, "rule disabled during load");
        }
    }

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => println!(
            "✓ Imported {} rule(s), skipped {} duplicate(s), {} failed",
            summary.imported, summary.skipped, summary.failed
        ),
    }

    Ok(summary)
}

fn import_file(
    db: &Database,
    controller: &ActivationController<'_>,
    path: &Path,
    stem: &str,
) -> crate::error::Result<i64> {
    let text = std::fs::read_to_string(path)?;
    let mut document = RuleDocument::parse(&text)?;

    if !document.is_set("title") {
        document.set("title", stem);
    }
    if !document.is_set("description") {
        document.set("description", "");
    }

    let content = controller.prepare_document(document)?;
    let details = db.create_rule(&content, Some(stem))?;
    Ok(details.rule.id)
}

fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Write the latest version of every rule to `<dir>/<slug>.yml`
pub fn export(ws: &Workspace, dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        anyhow::bail!("Export directory does not exist: {:?}", dir);
    }
    if std::fs::read_dir(dir)?.next().is_some() {
        anyhow::bail!("Export directory is not empty: {:?}", dir);
    }

    let db = ws.database()?;
    let mut written = 0;

    for rule in db.list_rules()? {
        let Some(version) = db.find_latest_version(rule.id)? else {
            continue;
        };

        let path = dir.join(format!("{}.yml", rule.slug));
        std::fs::write(&path, &version.content)
            .with_context(|| format!("Failed to write {:?}", path))?;
        written += 1;
    }

    println!("✓ Exported {} rule(s) to {:?}", written, dir);
    Ok(written)
}

/// Delete every rule and artifact
pub fn clear(ws: &Workspace, force: bool) -> Result<()> {
    if !force {
        anyhow::bail!("Refusing to delete all rules without --force");
    }

    let db = ws.database()?;
    let compiler = ws.compiler();
    let deleted = ActivationController::new(&db, &compiler).clear_all()?;

    println!("✓ Deleted {} rule(s)", deleted);
    Ok(())
}

/// Delete every compiled artifact, leaving rules untouched
pub fn clear_artifacts(ws: &Workspace, force: bool) -> Result<()> {
    if !force {
        anyhow::bail!("Refusing to clear the artifact directory without --force");
    }

    let removed = ArtifactStore::new(ws.artifacts_dir()).clear()?;

    println!("✓ Removed {} artifact(s)", removed);
    println!("  Run 'sigmaward sync' to rebuild them from the active rules");
    Ok(())
}

/// Rebuild the artifact directory
pub async fn sync(ws: &Workspace, format: OutputFormat) -> Result<()> {
    let db = ws.database()?;
    let compiler = ws.compiler();
    let report = ActivationController::new(&db, &compiler).resync_all().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!("✓ Installed {} artifact(s)", report.installed.len());
            for (title, path) in &report.installed {
                println!("  {} -> {:?}", title, path);
            }
            if !report.deactivated.is_empty() {
                println!("\n⚠ Disabled {} rule(s):", report.deactivated.len());
                for (title, error) in &report.deactivated {
                    println!("  {}: {}", title, error);
                }
            }
        }
    }

    Ok(())
}

/// Reconcile fired alerts into the ledger
pub async fn sync_alerts(ws: &Workspace, since: Option<&str>, format: OutputFormat) -> Result<()> {
    let since = since.map(parse_since).transpose()?;
    let minutes = ws.settings.reconcile.lookback_minutes;
    let lookback = Duration::try_minutes(minutes)
        .ok_or_else(|| anyhow::anyhow!("Invalid lookback_minutes: {}", minutes))?;
    let db = ws.database()?;
    let store = ws.result_store()?;

    let reconciler = AlertReconciler::new(&db, &store)
        .with_page_size(ws.settings.elasticsearch.page_size)
        .with_lookback(lookback);
    let stats = reconciler.reconcile(since).await;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Processed: {}", stats.processed);
            println!("Created:   {}", stats.created);
            println!("Skipped:   {}", stats.skipped);
            println!("Errors:    {}", stats.errors);
        }
    }

    if let Some(reason) = stats.aborted {
        anyhow::bail!("Alert synchronization aborted: {}", reason);
    }
    if stats.errors > 0 {
        anyhow::bail!("{} alert record(s) could not be reconciled", stats.errors);
    }

    Ok(())
}

/// List the alerts recorded for a rule, newest first
pub fn alerts(
    ws: &Workspace,
    reference: &str,
    since: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let since = since.map(parse_since).transpose()?;
    let db = ws.database()?;
    let rule = resolve_rule(&db, reference)?;
    let alerts = db.alerts_for_rule(rule.id, since)?;

    if format == OutputFormat::Json {
        return print_json(&alerts);
    }

    if alerts.is_empty() {
        println!("No alerts for '{}'.", rule.title);
        return Ok(());
    }

    let hashes: HashMap<i64, String> = db
        .versions(rule.id)?
        .into_iter()
        .map(|version| (version.id, version.hash))
        .collect();

    println!("Alerts for '{}': {}", rule.title, alerts.len());
    for alert in &alerts {
        let version = hashes.get(&alert.version_id).map_or("?", |h| short_hash(h));
        let event = alert
            .event_created_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {}  version {}  event {}",
            alert.created_at.to_rfc3339(),
            alert.external_id,
            version,
            event
        );
    }

    Ok(())
}

/// Show alert counts per rule
pub fn alert_stats(ws: &Workspace, since: Option<&str>, format: OutputFormat) -> Result<()> {
    let since = match since {
        Some(text) => parse_since(text)?,
        None => {
            let hours = ws.settings.reconcile.stats_window_hours;
            Duration::try_hours(hours)
                .and_then(|window| Utc::now().checked_sub_signed(window))
                .ok_or_else(|| anyhow::anyhow!("Invalid stats_window_hours: {}", hours))?
        }
    };
    let db = ws.database()?;

    let stats = db.alert_stats(since)?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Text => {
            println!("Alerts since {}: {}", stats.since.to_rfc3339(), stats.total_alerts);
            for entry in &stats.alerts_by_rule {
                println!("  {:>6}  {}", entry.alert_count, entry.rule_title);
            }
        }
    }

    Ok(())
}

/// Show database and artifact status
pub fn status(ws: &Workspace, format: OutputFormat) -> Result<()> {
    let db = ws.database()?;
    let stats = db.get_stats()?;
    let store = ArtifactStore::new(ws.artifacts_dir());
    let artifacts = store.list()?;

    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "database": ws.database_path(),
            "artifacts_dir": store.dir(),
            "rules": stats.rules,
            "active_rules": stats.active_rules,
            "versions": stats.versions,
            "alerts": stats.alerts,
            "artifacts": artifacts.len(),
        });
        return print_json(&value);
    }

    println!("Sigmaward Status");
    println!("================\n");

    println!("Database: {:?}", ws.database_path());
    println!("Artifacts: {:?}", store.dir());
    println!("Rules: {} ({} active)", stats.rules, stats.active_rules);
    println!("Versions: {}", stats.versions);
    println!("Alerts: {}", stats.alerts);
    println!("Installed artifacts: {}", artifacts.len());

    if artifacts.len() != stats.active_rules {
        println!("\n⚠ Artifact count differs from active rules. Run 'sigmaward sync'.");
    }

    Ok(())
}

/// Show or reset configuration
pub fn config(ws: &Workspace, reset: bool) -> Result<()> {
    if reset {
        Settings::default().save(&ws.config_path)?;
        println!("✓ Configuration reset to defaults");
        return Ok(());
    }

    println!("# {}", ws.config_path.display());
    let text = toml::to_string_pretty(&ws.settings).context("Failed to serialize configuration")?;
    print!("{}", text);

    Ok(())
}

/// Find a rule by id, exact title or slug
fn resolve_rule(db: &Database, reference: &str) -> Result<Rule> {
    if let Ok(id) = reference.parse::<i64>() {
        if let Some(rule) = db.find_rule(id)? {
            return Ok(rule);
        }
    }
    if let Some(rule) = db.find_by_title(reference)? {
        return Ok(rule);
    }
    if let Some(rule) = db.find_by_slug(reference)? {
        return Ok(rule);
    }

    anyhow::bail!("Rule not found: {}", reference)
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read rule from stdin")?;
        return Ok(text);
    }

    std::fs::read_to_string(file).with_context(|| format!("Failed to read rule file: {:?}", file))
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

/// Parse an RFC 3339 timestamp or a relative window such as `90m`,
/// `2d` or `-1 hour`, which counts back from now.
pub fn parse_since(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }

    Utc::now()
        .checked_sub_signed(parse_since_offset(text)?)
        .ok_or_else(|| anyhow::anyhow!("Time out of range: {:?}", text))
}

fn parse_since_offset(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    let relative = trimmed.strip_prefix('-').unwrap_or(trimmed).trim_start();
    let split = relative
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(relative.len());
    let (amount, unit) = relative.split_at(split);

    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid time: {:?}", text))?;

    let duration = match unit.trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::try_seconds(amount),
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(amount),
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::try_hours(amount),
        "d" | "day" | "days" => Duration::try_days(amount),
        "w" | "week" | "weeks" => Duration::try_weeks(amount),
        other => anyhow::bail!("Unknown time unit {:?} in {:?}", other, text),
    };

    duration.ok_or_else(|| anyhow::anyhow!("Time out of range: {:?}", text))
}
