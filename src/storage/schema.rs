//! Database schema definition

/// SQL schema for the rule ledger
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Detection rules
CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    slug TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(active);

-- Immutable, content-addressed rule versions
CREATE TABLE IF NOT EXISTS rule_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    hash TEXT NOT NULL UNIQUE,
    level TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (rule_id) REFERENCES rules(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_rule_versions_rule ON rule_versions(rule_id, created_at);

-- Alerts reconciled from the external alerting engine
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    external_id TEXT NOT NULL UNIQUE,
    event_created_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (rule_id) REFERENCES rules(id) ON DELETE CASCADE,
    FOREIGN KEY (version_id) REFERENCES rule_versions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_alerts_rule ON alerts(rule_id);
CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at);
"#;
