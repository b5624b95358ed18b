//! Alert reconciliation
//!
//! Pulls fired alerts from the alerting engine's result store into the
//! local ledger, exactly once per external document.

pub mod client;

pub use client::{
    ElasticsearchClient, ElasticsearchConfig, FiredAlert, MockResultStore, ResultStore,
};

use crate::error::{Error, Result};
use crate::storage::Database;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Default look-back for reconciliation
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 60;
/// Default window for alert statistics
pub const DEFAULT_STATS_WINDOW_HOURS: i64 = 24;
/// Default number of records fetched per invocation
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A reconciled alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub rule_id: i64,
    pub version_id: i64,
    /// Document identifier in the result store
    pub external_id: String,
    pub event_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Alert to be written to the ledger
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub rule_id: i64,
    pub version_id: i64,
    pub external_id: String,
    pub event_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleAlertCount {
    pub rule_title: String,
    pub alert_count: usize,
}

/// Alert counts since a point in time
#[derive(Debug, Clone, Serialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    /// Ordered by count, highest first
    pub alerts_by_rule: Vec<RuleAlertCount>,
    pub since: DateTime<Utc>,
}

/// Counters for one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Set when the batch stopped early because a store was unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

/// Reconciles fired alerts into the local ledger
pub struct AlertReconciler<'a> {
    db: &'a Database,
    store: &'a dyn ResultStore,
    page_size: usize,
    lookback: Duration,
}

impl<'a> AlertReconciler<'a> {
    pub fn new(db: &'a Database, store: &'a dyn ResultStore) -> Self {
        Self {
            db,
            store,
            page_size: DEFAULT_PAGE_SIZE,
            lookback: Duration::minutes(DEFAULT_LOOKBACK_MINUTES),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Window used when no explicit `since` is given
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Pull fired alerts at or after `since` into the ledger.
    ///
    /// Per-record problems are counted and the batch continues. A store
    /// failure stops the batch, counts one error and is recorded in
    /// `aborted`; records already committed stay committed.
    pub async fn reconcile(&self, since: Option<DateTime<Utc>>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let since = match since.or_else(|| Utc::now().checked_sub_signed(self.lookback)) {
            Some(since) => since,
            None => {
                tracing::error!(lookback = %self.lookback, "look-back window out of range");
                stats.errors += 1;
                stats.aborted = Some(format!("Look-back window out of range: {}", self.lookback));
                return stats;
            }
        };

        let records = match self.store.fired_alerts(since, self.page_size).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch fired alerts");
                stats.errors += 1;
                stats.aborted = Some(e.to_string());
                return stats;
            }
        };

        tracing::debug!(count = records.len(), since = %since, "fetched fired alerts");

        if let Err(e) = self.apply(&records, &mut stats) {
            tracing::error!(error = %e, "alert batch aborted");
            stats.errors += 1;
            stats.aborted = Some(e.to_string());
            return stats;
        }

        tracing::info!(
            processed = stats.processed,
            created = stats.created,
            skipped = stats.skipped,
            errors = stats.errors,
            "reconciled alerts"
        );
        stats
    }

    /// Write a batch in one transaction. Only store-level failures escape.
    fn apply(&self, records: &[FiredAlert], stats: &mut ReconcileStats) -> Result<()> {
        let mut batch = ReconcileStats::default();
        let tx = self.db.begin()?;

        for record in records {
            batch.processed += 1;
            match self.reconcile_one(record) {
                Ok(true) => batch.created += 1,
                Ok(false) => batch.skipped += 1,
                Err(e) if e.is_store_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(external_id = %record.id, error = %e, "skipping alert record");
                    batch.errors += 1;
                }
            }
        }

        tx.commit()?;

        stats.processed += batch.processed;
        stats.created += batch.created;
        stats.skipped += batch.skipped;
        stats.errors += batch.errors;
        Ok(())
    }

    /// Returns true when a new alert was written, false when it already existed
    fn reconcile_one(&self, record: &FiredAlert) -> Result<bool> {
        if self.db.alert_exists(&record.id)? {
            return Ok(false);
        }

        let rule_name = record
            .rule_name
            .as_deref()
            .ok_or_else(|| Error::OrphanedAlert(String::new()))?;
        let rule = self
            .db
            .find_by_title(rule_name)?
            .ok_or_else(|| Error::OrphanedAlert(rule_name.to_string()))?;
        let version = self
            .db
            .find_latest_version(rule.id)?
            .ok_or_else(|| Error::NotFound(format!("versions of rule {}", rule.id)))?;

        self.db.insert_alert(&NewAlert {
            rule_id: rule.id,
            version_id: version.id,
            external_id: record.id.clone(),
            event_created_at: record.match_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleContent, RuleDetails, RuleValidator};

    fn add_rule(db: &Database, title: &str, field: &str) -> RuleDetails {
        let text = format!(
            "title: {}\ndescription: D1\ndetection:\n  sel:\n    {}: x\n  condition: sel\n",
            title, field
        );
        let document = RuleValidator::new()
            .validate(&text)
            .unwrap()
            .into_complete()
            .unwrap();
        db.create_rule(&RuleContent::from_document(&document).unwrap(), None)
            .unwrap()
    }

    fn fired(id: &str, rule: &str, minutes_ago: i64) -> FiredAlert {
        FiredAlert {
            id: id.to_string(),
            rule_name: Some(rule.to_string()),
            match_time: Some(Utc::now() - Duration::minutes(minutes_ago)),
        }
    }

    #[tokio::test]
    async fn test_reconcile_counts_existing_as_skipped() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        add_rule(&db, "T2", "b");

        let earlier = MockResultStore::new(vec![fired("e1", "T1", 50), fired("e2", "T2", 40)]);
        let first = AlertReconciler::new(&db, &earlier).reconcile(None).await;
        assert_eq!(first.created, 2);

        let store = MockResultStore::new(vec![
            fired("e1", "T1", 50),
            fired("e2", "T2", 40),
            fired("e3", "T1", 30),
            fired("e4", "T2", 20),
            fired("e5", "T1", 10),
        ]);
        let since = Utc::now() - Duration::hours(1);
        let stats = AlertReconciler::new(&db, &store).reconcile(Some(since)).await;

        assert_eq!(
            stats,
            ReconcileStats {
                processed: 5,
                created: 3,
                skipped: 2,
                errors: 0,
                aborted: None,
            }
        );
        assert_eq!(db.count_alerts().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        let store = MockResultStore::new(vec![fired("e1", "T1", 5), fired("e2", "T1", 3)]);
        let reconciler = AlertReconciler::new(&db, &store);

        reconciler.reconcile(None).await;
        let again = reconciler.reconcile(None).await;

        assert_eq!(again.created, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(db.count_alerts().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_orphaned_alert_does_not_abort_batch() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        let store = MockResultStore::new(vec![
            fired("e1", "Gone", 30),
            fired("e2", "T1", 20),
            FiredAlert {
                id: "e3".to_string(),
                rule_name: None,
                match_time: None,
            },
        ]);

        let stats = AlertReconciler::new(&db, &store).reconcile(None).await;
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.errors, 2);
        assert!(stats.aborted.is_none());
    }

    #[tokio::test]
    async fn test_alert_references_latest_version() {
        let db = Database::open_in_memory().unwrap();
        let details = add_rule(&db, "T1", "a");
        let text = "title: T1\ndescription: D1\ndetection:\n  sel:\n    b: x\n  condition: sel\n";
        let document = RuleValidator::new()
            .validate(text)
            .unwrap()
            .into_complete()
            .unwrap();
        let v2 = db
            .add_version(details.rule.id, &RuleContent::from_document(&document).unwrap())
            .unwrap();

        let event_time = Utc::now() - Duration::minutes(2);
        let store = MockResultStore::new(vec![FiredAlert {
            id: "e1".to_string(),
            rule_name: Some("T1".to_string()),
            match_time: Some(event_time),
        }]);
        AlertReconciler::new(&db, &store).reconcile(None).await;

        let alerts = db.alerts_for_rule(details.rule.id, None).unwrap();
        assert_eq!(alerts[0].version_id, v2.id);
        assert_eq!(
            alerts[0].event_created_at.unwrap().timestamp_micros(),
            event_time.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_counts_one_error() {
        let db = Database::open_in_memory().unwrap();
        let store = MockResultStore::unavailable();

        let stats = AlertReconciler::new(&db, &store).reconcile(None).await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.processed, 0);
        assert!(stats.aborted.is_some());
    }

    #[tokio::test]
    async fn test_page_size_bounds_batch() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        let store = MockResultStore::new(
            (0..5).map(|i| fired(&format!("e{}", i), "T1", 50 - i)).collect(),
        );

        let stats = AlertReconciler::new(&db, &store)
            .with_page_size(3)
            .reconcile(None)
            .await;
        assert_eq!(stats.processed, 3);
        assert_eq!(db.count_alerts().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stats_do_not_mutate() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        let store = MockResultStore::new(vec![fired("e1", "T1", 5)]);
        let reconciler = AlertReconciler::new(&db, &store);
        reconciler.reconcile(None).await;

        let since = Utc::now() - Duration::hours(DEFAULT_STATS_WINDOW_HOURS);
        let stats = db.alert_stats(since).unwrap();
        assert_eq!(stats.total_alerts, 1);
        assert_eq!(stats.alerts_by_rule[0].rule_title, "T1");
        assert_eq!(db.alert_stats(since).unwrap().total_alerts, 1);
        assert_eq!(db.count_alerts().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_lookback_aborts() {
        let db = Database::open_in_memory().unwrap();
        add_rule(&db, "T1", "a");
        let store = MockResultStore::new(vec![fired("e1", "T1", 5)]);

        let stats = AlertReconciler::new(&db, &store)
            .with_lookback(Duration::try_days(100_000_000).unwrap())
            .reconcile(None)
            .await;

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.processed, 0);
        assert!(stats.aborted.unwrap().contains("out of range"));
        assert_eq!(db.count_alerts().unwrap(), 0);
    }
}
