// 🏷️ Quality Rules - rules as data
// Each rule names a target table and a query returning one row per violation.
// The default catalog ships inside the binary; a JSON file can replace it.

use crate::db::timestamp_now;
use crate::error::{EtlError, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const EMBEDDED_RULES: &str = include_str!("../rules/quality_rules.json");

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCategory {
    Completeness,
    Accuracy,
    Consistency,
    Validity,
    Uniqueness,
    Timeliness,
    Integrity,
}

impl RuleCategory {
    /// Scorecard order
    pub const ALL: [RuleCategory; 7] = [
        RuleCategory::Completeness,
        RuleCategory::Accuracy,
        RuleCategory::Consistency,
        RuleCategory::Validity,
        RuleCategory::Uniqueness,
        RuleCategory::Timeliness,
        RuleCategory::Integrity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Completeness => "Completeness",
            RuleCategory::Accuracy => "Accuracy",
            RuleCategory::Consistency => "Consistency",
            RuleCategory::Validity => "Validity",
            RuleCategory::Uniqueness => "Uniqueness",
            RuleCategory::Timeliness => "Timeliness",
            RuleCategory::Integrity => "Integrity",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RuleCategory::Completeness => "Required values are present",
            RuleCategory::Accuracy => "Values fall in plausible ranges",
            RuleCategory::Consistency => "Derived values agree with their sources",
            RuleCategory::Validity => "Values match expected formats",
            RuleCategory::Uniqueness => "Keys are not duplicated",
            RuleCategory::Timeliness => "Data is recent enough",
            RuleCategory::Integrity => "Foreign keys resolve",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleCategory {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        RuleCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EtlError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    NotNull,
    Unique,
    Range,
    Regex,
    CustomSql,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::NotNull => "not_null",
            RuleKind::Unique => "unique",
            RuleKind::Range => "range",
            RuleKind::Regex => "regex",
            RuleKind::CustomSql => "custom_sql",
        }
    }
}

impl FromStr for RuleKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_null" => Ok(RuleKind::NotNull),
            "unique" => Ok(RuleKind::Unique),
            "range" => Ok(RuleKind::Range),
            "regex" => Ok(RuleKind::Regex),
            "custom_sql" => Ok(RuleKind::CustomSql),
            other => Err(EtlError::Config(format!("unknown rule kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

impl FromStr for Severity {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CRITICAL" => Ok(Severity::Critical),
            "WARNING" => Ok(Severity::Warning),
            "INFO" => Ok(Severity::Info),
            other => Err(EtlError::Config(format!("unknown severity: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    /// Unique across the catalog
    pub name: String,
    pub description: String,
    pub category: RuleCategory,
    pub target_table: String,
    pub target_column: Option<String>,
    pub rule_kind: RuleKind,

    /// Returns one row per violation: record_identifier, and optionally
    /// column_name, failed_value, expected_value. May use `:report_date`.
    pub violation_query: String,
    pub severity: Severity,

    /// Percent of failing records still classified as WARNING
    pub failure_threshold: f64,
}

// ============================================================================
// RULE CATALOG
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleCatalog {
    rules: Vec<QualityRule>,
}

impl RuleCatalog {
    /// Catalog compiled into the binary
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_RULES)
    }

    /// Load rules from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let rules: Vec<QualityRule> = serde_json::from_str(content)?;
        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<QualityRule>) -> Result<Self> {
        let mut names = HashSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(EtlError::Config(format!("duplicate rule name: {}", rule.name)));
            }
            if !(0.0..=100.0).contains(&rule.failure_threshold) {
                return Err(EtlError::Config(format!(
                    "rule {:?}: failure_threshold {} outside 0-100",
                    rule.name, rule.failure_threshold
                )));
            }
        }
        Ok(RuleCatalog { rules })
    }

    /// Configured file if any, else the embedded catalog
    pub fn load(rules_file: Option<&Path>) -> Result<Self> {
        match rules_file {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    pub fn rules(&self) -> &[QualityRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

/// A rule as stored in dq_rules
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRule {
    pub rule_id: i64,
    pub rule: QualityRule,
}

/// Upsert the categories and every catalog rule (keyed by name)
pub fn setup_rules(conn: &Connection, catalog: &RuleCatalog) -> Result<usize> {
    let now = timestamp_now();
    let tx = conn.unchecked_transaction()?;

    for category in RuleCategory::ALL {
        tx.execute(
            "INSERT OR IGNORE INTO dq_rule_categories (category_name, category_description)
             VALUES (?1, ?2)",
            params![category.as_str(), category.description()],
        )?;
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO dq_rules (
                rule_name, rule_description, category, target_table, target_column,
                rule_kind, violation_query, severity, failure_threshold, is_active,
                created_date, updated_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)
            ON CONFLICT (rule_name) DO UPDATE SET
                rule_description = excluded.rule_description,
                category = excluded.category,
                target_table = excluded.target_table,
                target_column = excluded.target_column,
                rule_kind = excluded.rule_kind,
                violation_query = excluded.violation_query,
                severity = excluded.severity,
                failure_threshold = excluded.failure_threshold,
                updated_date = excluded.updated_date",
        )?;
        for rule in catalog.rules() {
            stmt.execute(params![
                rule.name,
                rule.description,
                rule.category.as_str(),
                rule.target_table,
                rule.target_column,
                rule.rule_kind.as_str(),
                rule.violation_query,
                rule.severity.as_str(),
                rule.failure_threshold,
                now,
            ])?;
        }
    }

    tx.commit()?;
    info!(rules = catalog.rule_count(), "✓ quality rules loaded");
    Ok(catalog.rule_count())
}

/// Active rules in rule_id order
pub fn load_active_rules(conn: &Connection) -> Result<Vec<StoredRule>> {
    let mut stmt = conn.prepare(
        "SELECT rule_id, rule_name, rule_description, category, target_table, target_column,
                rule_kind, violation_query, severity, failure_threshold
         FROM dq_rules
         WHERE is_active = 1
         ORDER BY rule_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, f64>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(rule_id, name, description, category, target_table, target_column, kind, query, severity, threshold)|
             -> Result<StoredRule> {
                Ok(StoredRule {
                    rule_id,
                    rule: QualityRule {
                        name,
                        description,
                        category: category.parse()?,
                        target_table,
                        target_column,
                        rule_kind: kind.parse()?,
                        violation_query: query,
                        severity: severity.parse()?,
                        failure_threshold: threshold,
                    },
                })
            },
        )
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
