//! Rule validation and normalization
//!
//! Turns raw rule text into a normalized [`RuleDocument`]:
//! - Reports every missing required field by dotted path
//! - Forces unknown or absent levels to `informational`
//! - Normalizes `date` / `modified` to `YYYY-MM-DD`

use super::{Level, RuleDocument};
use crate::error::{Error, Result};
use serde_yaml::Value;

/// Required top-level fields and, for sections, their required sub-fields
const REQUIRED_FIELDS: &[(&str, &[&str])] = &[
    ("title", &[]),
    ("description", &[]),
    ("detection", &["condition"]),
];

const DATE_FIELDS: &[&str] = &["date", "modified"];

/// Output of a successful parse: the normalized document plus any
/// required fields that were absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRule {
    pub document: RuleDocument,
    pub missing_fields: Vec<String>,
}

impl ValidatedRule {
    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }

    /// Turn missing fields into a validation error
    pub fn into_complete(self) -> Result<RuleDocument> {
        if self.is_complete() {
            Ok(self.document)
        } else {
            Err(Error::Validation {
                missing: self.missing_fields,
            })
        }
    }
}

/// Stateless validator for rule documents
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl RuleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Parse and normalize raw rule text
    pub fn validate(&self, text: &str) -> Result<ValidatedRule> {
        let document = RuleDocument::parse(text)?;
        Ok(self.validate_document(document))
    }

    /// Normalize an already-parsed document
    pub fn validate_document(&self, mut document: RuleDocument) -> ValidatedRule {
        let missing_fields = missing_fields(&document);

        if let Some(title) = document.title() {
            let trimmed = title.trim().to_string();
            document.set("title", trimmed);
        }

        let level = document.get_str("level").and_then(Level::parse);
        if level.is_none() {
            document.set("level", Level::Informational.as_str());
        }

        for field in DATE_FIELDS {
            normalize_date(&mut document, field);
        }

        ValidatedRule {
            document,
            missing_fields,
        }
    }
}

fn missing_fields(document: &RuleDocument) -> Vec<String> {
    let mut missing = Vec::new();

    for (field, sub_fields) in REQUIRED_FIELDS {
        if !document.is_set(field) {
            missing.push(field.to_string());
            continue;
        }

        let section = document.get(field).and_then(Value::as_mapping);
        for sub_field in sub_fields.iter() {
            let present = section
                .and_then(|s| s.get(*sub_field))
                .is_some_and(|v| !v.is_null());
            if !present {
                missing.push(format!("{}.{}", field, sub_field));
            }
        }
    }

    missing
}

fn normalize_date(document: &mut RuleDocument, field: &str) {
    let normalized = match document.get(field) {
        None => return,
        Some(Value::String(s)) if is_iso_date(s) => return,
        Some(Value::String(s)) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<i64>().ok().and_then(timestamp_to_date)
        }
        Some(Value::Number(n)) => n.as_i64().and_then(timestamp_to_date),
        Some(_) => None,
    };

    match normalized {
        Some(date) => document.set(field, date),
        None => {
            document.remove(field);
        }
    }
}

fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn timestamp_to_date(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}
