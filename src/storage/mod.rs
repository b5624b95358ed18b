//! SQLite storage layer for Sigmaward
//!
//! This module handles persistent storage of:
//! - Rules and their immutable, content-addressed versions
//! - The append-only alert ledger
//! - Aggregate statistics over both

mod schema;

pub use schema::SCHEMA;

use crate::error::{Error, Result};
use crate::reconcile::{Alert, AlertStats, NewAlert, RuleAlertCount};
use crate::rule::{slugify, Level, Rule, RuleContent, RuleDetails, RuleVersion};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;

const RULE_COLUMNS: &str = "id, title, slug, description, active, created_at";
const VERSION_COLUMNS: &str = "id, rule_id, content, hash, level, created_at";

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Start a write transaction. Every method called on `self` until the
    /// transaction is committed or dropped runs inside it.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // ==================== Rules ====================

    /// Create a new, inactive rule with exactly one version.
    ///
    /// Fails with `DuplicateTitle` if the title is taken and with
    /// `DuplicateContent` if any version anywhere has the same hash.
    pub fn create_rule(&self, content: &RuleContent, slug_hint: Option<&str>) -> Result<RuleDetails> {
        let tx = self.begin()?;

        if self.find_by_title(&content.title)?.is_some() {
            return Err(Error::DuplicateTitle(content.title.clone()));
        }
        if self.find_version_by_hash(&content.hash)?.is_some() {
            return Err(Error::DuplicateContent(content.hash.clone()));
        }

        let slug = self.unique_slug(&slugify(slug_hint.unwrap_or(&content.title)))?;
        let now = Utc::now();

        self.conn.execute(
            "INSERT INTO rules (title, slug, description, active, created_at) VALUES (?1, ?2, ?3, 0, ?4)",
            params![content.title, slug, content.description, format_timestamp(&now)],
        )?;
        let rule_id = self.conn.last_insert_rowid();

        let version = self.insert_version(rule_id, content, &now)?;
        tx.commit()?;

        tracing::info!(rule_id, title = %content.title, hash = %version.hash, "created rule");

        Ok(RuleDetails {
            rule: Rule {
                id: rule_id,
                title: content.title.clone(),
                slug,
                description: content.description.clone(),
                active: false,
                created_at: now,
            },
            versions: vec![version],
        })
    }

    /// Append a version to an existing rule and sync the rule's title and
    /// description to the new content.
    ///
    /// Resubmitting the rule's current content is a `DuplicateContent`
    /// error, not a no-op.
    pub fn add_version(&self, rule_id: i64, content: &RuleContent) -> Result<RuleVersion> {
        let tx = self.begin()?;

        if self.find_rule(rule_id)?.is_none() {
            return Err(Error::NotFound(format!("rule {}", rule_id)));
        }
        if self.find_version_by_hash(&content.hash)?.is_some() {
            return Err(Error::DuplicateContent(content.hash.clone()));
        }
        if let Some(other) = self.find_by_title(&content.title)? {
            if other.id != rule_id {
                return Err(Error::DuplicateTitle(content.title.clone()));
            }
        }

        self.conn.execute(
            "UPDATE rules SET title = ?1, description = ?2 WHERE id = ?3",
            params![content.title, content.description, rule_id],
        )?;
        let version = self.insert_version(rule_id, content, &Utc::now())?;
        tx.commit()?;

        tracing::info!(rule_id, hash = %version.hash, "added rule version");

        Ok(version)
    }

    fn insert_version(
        &self,
        rule_id: i64,
        content: &RuleContent,
        created_at: &DateTime<Utc>,
    ) -> Result<RuleVersion> {
        self.conn.execute(
            "INSERT INTO rule_versions (rule_id, content, hash, level, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule_id,
                content.content,
                content.hash,
                content.level.as_str(),
                format_timestamp(created_at),
            ],
        )?;

        Ok(RuleVersion {
            id: self.conn.last_insert_rowid(),
            rule_id,
            content: content.content.clone(),
            hash: content.hash.clone(),
            level: content.level,
            created_at: *created_at,
        })
    }

    fn unique_slug(&self, base: &str) -> Result<String> {
        let mut candidate = base.to_string();
        let mut suffix = 2;

        while self.find_by_slug(&candidate)?.is_some() {
            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        Ok(candidate)
    }

    /// Get a rule by ID
    pub fn find_rule(&self, id: i64) -> Result<Option<Rule>> {
        self.query_rule(&format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS), params![id])
    }

    /// Get a rule by exact title
    pub fn find_by_title(&self, title: &str) -> Result<Option<Rule>> {
        self.query_rule(
            &format!("SELECT {} FROM rules WHERE title = ?1", RULE_COLUMNS),
            params![title],
        )
    }

    /// Get a rule by slug
    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Rule>> {
        self.query_rule(
            &format!("SELECT {} FROM rules WHERE slug = ?1", RULE_COLUMNS),
            params![slug],
        )
    }

    fn query_rule(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Rule>> {
        let row = self
            .conn
            .query_row(sql, params, RuleRow::from_row)
            .optional()?;
        Ok(row.map(RuleRow::into_rule))
    }

    /// All rules ordered by title
    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        self.query_rules(&format!("SELECT {} FROM rules ORDER BY title ASC", RULE_COLUMNS))
    }

    /// Rules currently marked active, ordered by title
    pub fn active_rules(&self) -> Result<Vec<Rule>> {
        self.query_rules(&format!(
            "SELECT {} FROM rules WHERE active = 1 ORDER BY title ASC",
            RULE_COLUMNS
        ))
    }

    fn query_rules(&self, sql: &str) -> Result<Vec<Rule>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], RuleRow::from_row)?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?.into_rule());
        }

        Ok(rules)
    }

    /// A rule with all of its versions, newest first
    pub fn rule_details(&self, id: i64) -> Result<Option<RuleDetails>> {
        let Some(rule) = self.find_rule(id)? else {
            return Ok(None);
        };
        let versions = self.versions(id)?;
        Ok(Some(RuleDetails { rule, versions }))
    }

    /// Set the active flag of a rule
    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let count = self.conn.execute(
            "UPDATE rules SET active = ?1 WHERE id = ?2",
            params![active, id],
        )?;

        if count == 0 {
            return Err(Error::NotFound(format!("rule {}", id)));
        }

        Ok(())
    }

    /// Mark a rule inactive and delete it together with its versions and
    /// alerts. Returns false if the rule did not exist.
    pub fn deactivate_and_delete(&self, id: i64) -> Result<bool> {
        let tx = self.begin()?;

        self.conn
            .execute("UPDATE rules SET active = 0 WHERE id = ?1", params![id])?;
        let count = self
            .conn
            .execute("DELETE FROM rules WHERE id = ?1", params![id])?;

        tx.commit()?;

        Ok(count > 0)
    }

    /// Delete every rule. Versions and alerts cascade.
    pub fn delete_all_rules(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM rules", [])?)
    }

    // ==================== Versions ====================

    /// All versions of a rule, newest first
    pub fn versions(&self, rule_id: i64) -> Result<Vec<RuleVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM rule_versions WHERE rule_id = ?1 ORDER BY created_at DESC, id DESC",
            VERSION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![rule_id], VersionRow::from_row)?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?.into_version());
        }

        Ok(versions)
    }

    /// Most recent version of a rule by creation time
    pub fn find_latest_version(&self, rule_id: i64) -> Result<Option<RuleVersion>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM rule_versions WHERE rule_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
                    VERSION_COLUMNS
                ),
                params![rule_id],
                VersionRow::from_row,
            )
            .optional()?;

        Ok(row.map(VersionRow::into_version))
    }

    /// Get a version by content hash
    pub fn find_version_by_hash(&self, hash: &str) -> Result<Option<RuleVersion>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM rule_versions WHERE hash = ?1", VERSION_COLUMNS),
                params![hash],
                VersionRow::from_row,
            )
            .optional()?;

        Ok(row.map(VersionRow::into_version))
    }

    // ==================== Alerts ====================

    /// Check whether an alert already exists for an external document
    pub fn alert_exists(&self, external_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM alerts WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.is_some())
    }

    /// Insert an alert unless one already exists for the same external
    /// document. Returns whether a row was written.
    pub fn insert_alert(&self, alert: &NewAlert) -> Result<bool> {
        let count = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO alerts (rule_id, version_id, external_id, event_created_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                alert.rule_id,
                alert.version_id,
                alert.external_id,
                alert.event_created_at.as_ref().map(format_timestamp),
                format_timestamp(&Utc::now()),
            ],
        )?;

        Ok(count > 0)
    }

    /// Alerts for a rule, newest first, optionally only those created at
    /// or after `since`
    pub fn alerts_for_rule(
        &self,
        rule_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Alert>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, rule_id, version_id, external_id, event_created_at, created_at
            FROM alerts
            WHERE rule_id = ?1 AND (?2 IS NULL OR created_at >= ?2)
            ORDER BY created_at DESC, id DESC
            "#,
        )?;

        let since_text = since.as_ref().map(format_timestamp);
        let rows = stmt.query_map(params![rule_id, since_text], |row| {
            Ok(AlertRow {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                version_id: row.get(2)?,
                external_id: row.get(3)?,
                event_created_at: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?.into_alert());
        }

        Ok(alerts)
    }

    /// Total alert count
    pub fn count_alerts(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Alerts created at or after `since`, in total and per rule title
    pub fn alert_stats(&self, since: DateTime<Utc>) -> Result<AlertStats> {
        let since_text = format_timestamp(&since);

        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE created_at >= ?1",
            params![since_text],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT r.title, COUNT(a.id) AS alert_count
            FROM alerts a
            JOIN rules r ON r.id = a.rule_id
            WHERE a.created_at >= ?1
            GROUP BY r.title
            ORDER BY alert_count DESC, r.title ASC
            "#,
        )?;

        let rows = stmt.query_map(params![since_text], |row| {
            Ok(RuleAlertCount {
                rule_title: row.get(0)?,
                alert_count: row.get::<_, i64>(1)? as usize,
            })
        })?;

        let mut by_rule = Vec::new();
        for row in rows {
            by_rule.push(row?);
        }

        Ok(AlertStats {
            total_alerts: total as usize,
            alerts_by_rule: by_rule,
            since,
        })
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let rules: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;

        let active_rules: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rules WHERE active = 1",
            [],
            |row| row.get(0),
        )?;

        let versions: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM rule_versions", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            rules: rules as usize,
            active_rules: active_rules as usize,
            versions: versions as usize,
            alerts: self.count_alerts()?,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub rules: usize,
    pub active_rules: usize,
    pub versions: usize,
    pub alerts: usize,
}

/// Fixed-width UTC text so lexicographic order matches time order
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

// Internal row types for database mapping

struct RuleRow {
    id: i64,
    title: String,
    slug: String,
    description: String,
    active: bool,
    created_at: String,
}

impl RuleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            active: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_rule(self) -> Rule {
        Rule {
            id: self.id,
            title: self.title,
            slug: self.slug,
            description: self.description,
            active: self.active,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

struct VersionRow {
    id: i64,
    rule_id: i64,
    content: String,
    hash: String,
    level: String,
    created_at: String,
}

impl VersionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            rule_id: row.get(1)?,
            content: row.get(2)?,
            hash: row.get(3)?,
            level: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_version(self) -> RuleVersion {
        RuleVersion {
            id: self.id,
            rule_id: self.rule_id,
            content: self.content,
            hash: self.hash,
            level: Level::parse(&self.level).unwrap_or_default(),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

struct AlertRow {
    id: i64,
    rule_id: i64,
    version_id: i64,
    external_id: String,
    event_created_at: Option<String>,
    created_at: String,
}

impl AlertRow {
    fn into_alert(self) -> Alert {
        Alert {
            id: self.id,
            rule_id: self.rule_id,
            version_id: self.version_id,
            external_id: self.external_id,
            event_created_at: self.event_created_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleDocument, RuleValidator};

    fn content(text: &str) -> RuleContent {
        let document = RuleValidator::new()
            .validate(text)
            .unwrap()
            .into_complete()
            .unwrap();
        RuleContent::from_document(&document).unwrap()
    }

    fn rule_text(title: &str, field: &str) -> String {
        format!(
            "title: {}\ndescription: D1\ndetection:\n  sel:\n    {}: x\n  condition: sel\n",
            title, field
        )
    }

    #[test]
    fn test_database_creation() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.rules, 0);
        assert_eq!(stats.alerts, 0);
    }

    #[test]
    fn test_create_rule() {
        let db = Database::open_in_memory().unwrap();
        let details = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();

        assert!(!details.rule.active);
        assert_eq!(details.rule.slug, "t1");
        assert_eq!(details.versions.len(), 1);
        assert_eq!(details.latest_version().unwrap().level, Level::Informational);

        let found = db.find_by_title("T1").unwrap().unwrap();
        assert_eq!(found.id, details.rule.id);
    }

    #[test]
    fn test_duplicate_title_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();

        let err = db.create_rule(&content(&rule_text("T1", "b")), None).unwrap_err();
        assert!(matches!(err, Error::DuplicateTitle(ref t) if t == "T1"));
    }

    #[test]
    fn test_duplicate_content_rejected_across_rules() {
        let db = Database::open_in_memory().unwrap();
        let first = content(&rule_text("T1", "a"));
        db.create_rule(&first, None).unwrap();

        // Same hash under a different title
        let mut second = first.clone();
        second.title = "T2".to_string();
        let err = db.create_rule(&second, None).unwrap_err();
        assert!(matches!(err, Error::DuplicateContent(_)));
        assert_eq!(db.get_stats().unwrap().rules, 1);
    }

    #[test]
    fn test_reformatted_content_collides() {
        let db = Database::open_in_memory().unwrap();
        let details = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();

        let reordered = "detection: {condition: sel, sel: {a: x}}\ndescription: D1\ntitle: T1\n";
        let doc = RuleDocument::parse(reordered).unwrap();
        let doc = RuleValidator::new().validate_document(doc).document;
        let err = db
            .add_version(details.rule.id, &RuleContent::from_document(&doc).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateContent(_)));
    }

    #[test]
    fn test_add_version() {
        let db = Database::open_in_memory().unwrap();
        let details = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        let rule_id = details.rule.id;

        let v2 = db.add_version(rule_id, &content(&rule_text("T1 renamed", "b"))).unwrap();

        let latest = db.find_latest_version(rule_id).unwrap().unwrap();
        assert_eq!(latest.id, v2.id);
        assert_eq!(db.versions(rule_id).unwrap().len(), 2);
        assert_eq!(db.find_rule(rule_id).unwrap().unwrap().title, "T1 renamed");
    }

    #[test]
    fn test_add_version_rejects_resubmission() {
        let db = Database::open_in_memory().unwrap();
        let c = content(&rule_text("T1", "a"));
        let details = db.create_rule(&c, None).unwrap();

        let err = db.add_version(details.rule.id, &c).unwrap_err();
        assert!(matches!(err, Error::DuplicateContent(_)));
    }

    #[test]
    fn test_add_version_rejects_foreign_title() {
        let db = Database::open_in_memory().unwrap();
        let r1 = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        db.create_rule(&content(&rule_text("T2", "b")), None).unwrap();

        let err = db
            .add_version(r1.rule.id, &content(&rule_text("T2", "c")))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTitle(_)));
        assert_eq!(db.versions(r1.rule.id).unwrap().len(), 1);
    }

    #[test]
    fn test_slug_collision_gets_suffix() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_rule(&content(&rule_text("My Rule", "a")), None).unwrap();
        let b = db.create_rule(&content(&rule_text("my rule", "b")), None).unwrap();
        assert_eq!(a.rule.slug, "my-rule");
        assert_eq!(b.rule.slug, "my-rule-2");
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::open_in_memory().unwrap();
        let details = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        let version = details.latest_version().unwrap().clone();

        db.insert_alert(&NewAlert {
            rule_id: details.rule.id,
            version_id: version.id,
            external_id: "doc-1".to_string(),
            event_created_at: None,
        })
        .unwrap();

        assert!(db.deactivate_and_delete(details.rule.id).unwrap());
        assert!(!db.deactivate_and_delete(details.rule.id).unwrap());

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.rules, 0);
        assert_eq!(stats.versions, 0);
        assert_eq!(stats.alerts, 0);
    }

    #[test]
    fn test_insert_alert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let details = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        let alert = NewAlert {
            rule_id: details.rule.id,
            version_id: details.versions[0].id,
            external_id: "doc-1".to_string(),
            event_created_at: Some(Utc::now()),
        };

        assert!(db.insert_alert(&alert).unwrap());
        assert!(!db.insert_alert(&alert).unwrap());
        assert!(db.alert_exists("doc-1").unwrap());
        assert_eq!(db.count_alerts().unwrap(), 1);

        let stored = db.alerts_for_rule(details.rule.id, None).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].event_created_at.is_some());
    }

    #[test]
    fn test_alerts_for_rule_since() {
        let db = Database::open_in_memory().unwrap();
        let r1 = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        let r2 = db.create_rule(&content(&rule_text("T2", "b")), None).unwrap();

        for (external_id, details) in [("doc-1", &r1), ("doc-2", &r1), ("doc-3", &r2)] {
            db.insert_alert(&NewAlert {
                rule_id: details.rule.id,
                version_id: details.versions[0].id,
                external_id: external_id.to_string(),
                event_created_at: None,
            })
            .unwrap();
        }

        let all = db.alerts_for_rule(r1.rule.id, None).unwrap();
        let ids: Vec<_> = all.iter().map(|a| a.external_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-2", "doc-1"]);

        let hour = chrono::Duration::hours(1);
        assert_eq!(
            db.alerts_for_rule(r1.rule.id, Some(Utc::now() - hour)).unwrap(),
            all
        );
        assert!(db
            .alerts_for_rule(r1.rule.id, Some(Utc::now() + hour))
            .unwrap()
            .is_empty());
        assert_eq!(db.get_stats().unwrap().alerts, 3);
    }

    #[test]
    fn test_alert_stats() {
        let db = Database::open_in_memory().unwrap();
        let r1 = db.create_rule(&content(&rule_text("T1", "a")), None).unwrap();
        let r2 = db.create_rule(&content(&rule_text("T2", "b")), None).unwrap();

        for (i, details) in [&r1, &r2, &r2].iter().enumerate() {
            db.insert_alert(&NewAlert {
                rule_id: details.rule.id,
                version_id: details.versions[0].id,
                external_id: format!("doc-{}", i),
                event_created_at: None,
            })
            .unwrap();
        }

        let stats = db.alert_stats(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.alerts_by_rule[0].rule_title, "T2");
        assert_eq!(stats.alerts_by_rule[0].alert_count, 2);
        assert_eq!(stats.alerts_by_rule[1].alert_count, 1);

        let future = db.alert_stats(Utc::now() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(future.total_alerts, 0);
        assert!(future.alerts_by_rule.is_empty());
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let now = Utc::now();
        let text = format_timestamp(&now);
        assert_eq!(parse_timestamp(&text).timestamp_micros(), now.timestamp_micros());
    }
}
