// ✅ Data Quality Engine - execute rules, classify, score
//
// A rule's query selects violating records. The failure percentage against
// the target table's row count decides the status; a rule that cannot run
// is recorded as ERROR and the run moves on.

use crate::db::{table_row_count, timestamp_now};
use crate::error::{EtlError, Result};
use crate::rules::{load_active_rules, QualityRule, RuleCategory, StoredRule};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{named_params, params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{error, info, warn};

/// Stored failed/expected values are cut to this many characters
const MAX_VALUE_CHARS: usize = 1000;

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Passed,
    Warning,
    Failed,
    Error,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Warning => "WARNING",
            TestStatus::Failed => "FAILED",
            TestStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PASSED" => Ok(TestStatus::Passed),
            "WARNING" => Ok(TestStatus::Warning),
            "FAILED" => Ok(TestStatus::Failed),
            "ERROR" => Ok(TestStatus::Error),
            other => Err(EtlError::UnknownStatus(other.to_string())),
        }
    }
}

/// `failed / total * 100`; zero when the table is empty
pub fn failure_percentage(failed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    failed as f64 * 100.0 / total as f64
}

/// Threshold is inclusive: exactly at threshold is still a WARNING
pub fn classify(failed: i64, total: i64, threshold: f64) -> TestStatus {
    if failed == 0 {
        TestStatus::Passed
    } else if failure_percentage(failed, total) <= threshold {
        TestStatus::Warning
    } else {
        TestStatus::Failed
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// RULE EXECUTION
// ============================================================================

/// One violating record as returned by a rule query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub record_identifier: String,
    pub column_name: Option<String>,
    pub failed_value: Option<String>,
    pub expected_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleExecution {
    pub rule_name: String,
    pub total_records: i64,
    pub failed_records: i64,
    pub passed_records: i64,
    /// Rounded to two decimals for storage; classification uses the exact value
    pub failure_percentage: f64,
    pub status: TestStatus,
    pub message: String,
    pub duration_ms: i64,
    pub violations: Vec<Violation>,
}

impl RuleExecution {
    fn errored(rule: &QualityRule, message: String) -> Self {
        RuleExecution {
            rule_name: rule.name.clone(),
            total_records: 0,
            failed_records: 0,
            passed_records: 0,
            failure_percentage: 0.0,
            status: TestStatus::Error,
            message,
            duration_ms: 0,
            violations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_rules: usize,
    pub passed: usize,
    pub warning: usize,
    pub failed: usize,
    pub error: usize,
}

impl RunSummary {
    fn record(&mut self, status: TestStatus) {
        self.total_rules += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Warning => self.warning += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Error => self.error += 1,
        }
    }
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Text(t) => Some(t),
        Value::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn truncate(value: Option<String>) -> Option<String> {
    value.map(|v| v.chars().take(MAX_VALUE_CHARS).collect())
}

/// Hex SHA-256 of `{rule_id}_{record}_{column}_{failed}`
pub fn exception_hash(rule_id: i64, violation: &Violation) -> String {
    let key = format!(
        "{}_{}_{}_{}",
        rule_id,
        violation.record_identifier,
        violation.column_name.as_deref().unwrap_or(""),
        violation.failed_value.as_deref().unwrap_or("")
    );
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// QUALITY ENGINE
// ============================================================================

pub struct QualityEngine {
    /// Date results are filed under; bound to `:report_date` in rule queries
    pub report_date: NaiveDate,
    pub max_exceptions: usize,
}

impl QualityEngine {
    pub fn new(report_date: NaiveDate, max_exceptions: usize) -> Self {
        QualityEngine {
            report_date,
            max_exceptions,
        }
    }

    /// Run one rule. Never fails: execution errors become an ERROR result.
    pub fn execute_rule(&self, conn: &Connection, rule: &QualityRule) -> RuleExecution {
        let started = Instant::now();
        match self.try_execute(conn, rule) {
            Ok(mut execution) => {
                execution.duration_ms = started.elapsed().as_millis() as i64;
                info!(
                    rule = %rule.name,
                    status = %execution.status,
                    failed = execution.failed_records,
                    total = execution.total_records,
                    "rule executed"
                );
                execution
            }
            Err(e) => {
                error!(rule = %rule.name, error = %e, "rule execution failed");
                RuleExecution::errored(rule, e.to_string())
            }
        }
    }

    fn try_execute(&self, conn: &Connection, rule: &QualityRule) -> Result<RuleExecution> {
        let total = table_row_count(conn, &rule.target_table)?;
        let violations = self.query_violations(conn, &rule.violation_query)?;

        let failed = violations.len() as i64;
        let pct = failure_percentage(failed, total);
        let status = classify(failed, total, rule.failure_threshold);
        let message = match status {
            TestStatus::Passed => "All records passed validation".to_string(),
            TestStatus::Warning => format!(
                "{} violations found but within threshold ({}%)",
                failed, rule.failure_threshold
            ),
            _ => format!(
                "{} violations exceed threshold ({}%)",
                failed, rule.failure_threshold
            ),
        };

        Ok(RuleExecution {
            rule_name: rule.name.clone(),
            total_records: total,
            failed_records: failed,
            passed_records: total - failed,
            failure_percentage: round2(pct),
            status,
            message,
            duration_ms: 0,
            violations,
        })
    }

    fn query_violations(&self, conn: &Connection, sql: &str) -> Result<Vec<Violation>> {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let index_of = |name: &str| columns.iter().position(|c| c == name);
        let record_idx = index_of("record_identifier").unwrap_or(0);
        let column_idx = index_of("column_name");
        let failed_idx = index_of("failed_value");
        let expected_idx = index_of("expected_value");

        let mut rows = if stmt.parameter_index(":report_date")?.is_some() {
            stmt.query(named_params! { ":report_date": self.report_date })?
        } else {
            stmt.query([])?
        };

        let optional = |row: &rusqlite::Row<'_>, idx: Option<usize>| -> rusqlite::Result<Option<String>> {
            match idx {
                Some(i) => Ok(value_text(row.get::<_, Value>(i)?)),
                None => Ok(None),
            }
        };

        let mut violations = Vec::new();
        while let Some(row) = rows.next()? {
            violations.push(Violation {
                record_identifier: value_text(row.get::<_, Value>(record_idx)?).unwrap_or_default(),
                column_name: optional(row, column_idx)?,
                failed_value: optional(row, failed_idx)?,
                expected_value: optional(row, expected_idx)?,
            });
        }
        Ok(violations)
    }

    /// Insert the dq_test_results row; returns its result_id
    pub fn save_result(&self, conn: &Connection, rule_id: i64, execution: &RuleExecution) -> Result<i64> {
        conn.execute(
            "INSERT INTO dq_test_results (
                rule_id, execution_date, executed_at, execution_duration_ms,
                total_records_checked, failed_records, passed_records,
                failure_percentage, test_status, test_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rule_id,
                self.report_date,
                timestamp_now(),
                execution.duration_ms,
                execution.total_records,
                execution.failed_records,
                execution.passed_records,
                execution.failure_percentage,
                execution.status.as_str(),
                execution.message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Store at most `max_exceptions` violations of one execution
    pub fn save_exceptions(
        &self,
        conn: &Connection,
        result_id: i64,
        stored: &StoredRule,
        execution: &RuleExecution,
    ) -> Result<usize> {
        if execution.violations.len() > self.max_exceptions {
            warn!(
                rule = %stored.rule.name,
                kept = self.max_exceptions,
                total = execution.violations.len(),
                "limiting stored exceptions"
            );
        }

        let now = timestamp_now();
        let tx = conn.unchecked_transaction()?;
        let mut saved = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO dq_exceptions (
                    result_id, rule_id, table_name, record_identifier, column_name,
                    failed_value, expected_value, exception_hash, created_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for violation in execution.violations.iter().take(self.max_exceptions) {
                stmt.execute(params![
                    result_id,
                    stored.rule_id,
                    stored.rule.target_table,
                    violation.record_identifier,
                    violation.column_name,
                    truncate(violation.failed_value.clone()),
                    truncate(violation.expected_value.clone()),
                    exception_hash(stored.rule_id, violation),
                    now,
                ])?;
                saved += 1;
            }
        }
        tx.commit()?;
        Ok(saved)
    }

    /// Execute every active stored rule and persist results and exceptions
    pub fn run_all_rules(&self, conn: &Connection) -> Result<RunSummary> {
        let rules = load_active_rules(conn)?;
        info!(rules = rules.len(), report_date = %self.report_date, "starting data quality validation");

        let mut summary = RunSummary::default();
        for stored in &rules {
            let execution = self.execute_rule(conn, &stored.rule);
            let result_id = self.save_result(conn, stored.rule_id, &execution)?;
            self.save_exceptions(conn, result_id, stored, &execution)?;
            summary.record(execution.status);
        }

        info!(
            total = summary.total_rules,
            passed = summary.passed,
            warning = summary.warning,
            failed = summary.failed,
            error = summary.error,
            "✓ data quality validation completed"
        );
        Ok(summary)
    }

    /// Score the report date's results and upsert the scorecard.
    /// Only the latest result of each rule on that date counts.
    pub fn generate_scorecard(&self, conn: &Connection, report_period: &str) -> Result<Option<Scorecard>> {
        let mut stmt = conn.prepare(
            "SELECT r.category, tr.test_status, tr.total_records_checked, tr.failed_records
             FROM dq_test_results tr
             JOIN dq_rules r ON tr.rule_id = r.rule_id
             WHERE tr.result_id IN (
                 SELECT MAX(result_id) FROM dq_test_results
                 WHERE execution_date = ?1
                 GROUP BY rule_id
             )",
        )?;
        let raw = stmt
            .query_map(params![self.report_date], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if raw.is_empty() {
            warn!(report_date = %self.report_date, "no quality results for report date");
            return Ok(None);
        }

        let results = raw
            .into_iter()
            .map(|(category, status, checked, failed)| -> Result<ScoredResult> {
                Ok(ScoredResult {
                    category: category.parse()?,
                    status: status.parse()?,
                    records_checked: checked,
                    records_failed: failed,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let scorecard = Scorecard::build(self.report_date, report_period, &results);
        scorecard.save(conn)?;
        info!(
            report_date = %self.report_date,
            period = report_period,
            overall = scorecard.overall_score,
            "✓ quality scorecard generated"
        );
        Ok(Some(scorecard))
    }
}

// ============================================================================
// SCORECARD
// ============================================================================

/// One rule result as the scorecard sees it
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub category: RuleCategory,
    pub status: TestStatus,
    pub records_checked: i64,
    pub records_failed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: RuleCategory,
    pub records_checked: i64,
    pub records_failed: i64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scorecard {
    pub report_date: NaiveDate,
    pub report_period: String,
    pub total_rules_executed: usize,
    pub rules_passed: usize,
    pub rules_failed: usize,
    pub rules_warning: usize,
    pub rules_error: usize,
    /// Unweighted mean of the seven category scores
    pub overall_score: f64,
    /// In `RuleCategory::ALL` order
    pub categories: Vec<CategoryScore>,
    pub total_records_checked: i64,
    pub total_failed_records: i64,
}

impl Scorecard {
    pub fn build(report_date: NaiveDate, report_period: &str, results: &[ScoredResult]) -> Self {
        let mut totals: HashMap<RuleCategory, (i64, i64)> = HashMap::new();
        let mut by_status: HashMap<TestStatus, usize> = HashMap::new();
        for result in results {
            let entry = totals.entry(result.category).or_default();
            entry.0 += result.records_checked;
            entry.1 += result.records_failed;
            *by_status.entry(result.status).or_default() += 1;
        }

        let categories: Vec<CategoryScore> = RuleCategory::ALL
            .into_iter()
            .map(|category| {
                let (checked, failed) = totals.get(&category).copied().unwrap_or((0, 0));
                let score = if checked > 0 {
                    round2((checked - failed) as f64 / checked as f64 * 100.0)
                } else {
                    100.0
                };
                CategoryScore {
                    category,
                    records_checked: checked,
                    records_failed: failed,
                    score,
                }
            })
            .collect();

        let overall = categories.iter().map(|c| c.score).sum::<f64>() / categories.len() as f64;
        let status_count = |s: TestStatus| by_status.get(&s).copied().unwrap_or(0);

        Scorecard {
            report_date,
            report_period: report_period.to_string(),
            total_rules_executed: results.len(),
            rules_passed: status_count(TestStatus::Passed),
            rules_failed: status_count(TestStatus::Failed),
            rules_warning: status_count(TestStatus::Warning),
            rules_error: status_count(TestStatus::Error),
            overall_score: round2(overall),
            total_records_checked: categories.iter().map(|c| c.records_checked).sum(),
            total_failed_records: categories.iter().map(|c| c.records_failed).sum(),
            categories,
        }
    }

    pub fn score(&self, category: RuleCategory) -> f64 {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.score)
            .unwrap_or(100.0)
    }

    /// Upsert keyed by (report_date, report_period)
    pub fn save(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO dq_scorecards (
                report_date, report_period, total_rules_executed, rules_passed, rules_failed,
                rules_warning, rules_error, overall_quality_score, completeness_score,
                accuracy_score, consistency_score, validity_score, uniqueness_score,
                timeliness_score, integrity_score, total_records_checked, total_failed_records,
                created_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT (report_date, report_period) DO UPDATE SET
                total_rules_executed = excluded.total_rules_executed,
                rules_passed = excluded.rules_passed,
                rules_failed = excluded.rules_failed,
                rules_warning = excluded.rules_warning,
                rules_error = excluded.rules_error,
                overall_quality_score = excluded.overall_quality_score,
                completeness_score = excluded.completeness_score,
                accuracy_score = excluded.accuracy_score,
                consistency_score = excluded.consistency_score,
                validity_score = excluded.validity_score,
                uniqueness_score = excluded.uniqueness_score,
                timeliness_score = excluded.timeliness_score,
                integrity_score = excluded.integrity_score,
                total_records_checked = excluded.total_records_checked,
                total_failed_records = excluded.total_failed_records",
            params![
                self.report_date,
                self.report_period,
                self.total_rules_executed as i64,
                self.rules_passed as i64,
                self.rules_failed as i64,
                self.rules_warning as i64,
                self.rules_error as i64,
                self.overall_score,
                self.score(RuleCategory::Completeness),
                self.score(RuleCategory::Accuracy),
                self.score(RuleCategory::Consistency),
                self.score(RuleCategory::Validity),
                self.score(RuleCategory::Uniqueness),
                self.score(RuleCategory::Timeliness),
                self.score(RuleCategory::Integrity),
                self.total_records_checked,
                self.total_failed_records,
                timestamp_now(),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, setup_database};
    use crate::rules::{setup_rules, RuleCatalog, RuleKind, Severity};

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn test_conn() -> Connection {
        let conn = open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn rule(name: &str, category: RuleCategory, table: &str, query: &str, threshold: f64) -> QualityRule {
        QualityRule {
            name: name.to_string(),
            description: format!("{name} check"),
            category,
            target_table: table.to_string(),
            target_column: None,
            rule_kind: RuleKind::CustomSql,
            violation_query: query.to_string(),
            severity: Severity::Warning,
            failure_threshold: threshold,
        }
    }

    fn insert_products(conn: &Connection, count: usize, without_category: usize) {
        for i in 0..count {
            let category = if i < without_category { None } else { Some("Home") };
            conn.execute(
                "INSERT INTO dim_product (product_id, product_name, product_category, unit_cost,
                    retail_price, is_active, created_date, updated_date, source_system)
                 VALUES (?1, 'Item', ?2, 1.0, 2.0, 1, 'x', 'x', 'E-COMMERCE')",
                params![format!("PROD{i:05}"), category],
            )
            .unwrap();
        }
    }

    const MISSING_CATEGORY: &str = "SELECT product_key AS record_identifier, 'product_category' AS column_name,
        NULL AS failed_value, 'NOT NULL' AS expected_value FROM dim_product WHERE product_category IS NULL";

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        assert_eq!(classify(0, 100, 5.0), TestStatus::Passed);
        assert_eq!(classify(5, 100, 5.0), TestStatus::Warning);
        assert_eq!(classify(501, 10_000, 5.0), TestStatus::Failed);
        assert_eq!(classify(1, 100, 0.0), TestStatus::Failed);
    }

    #[test]
    fn test_failure_percentage_of_empty_table_is_zero() {
        assert_eq!(failure_percentage(0, 0), 0.0);
        assert_eq!(classify(0, 0, 0.0), TestStatus::Passed);
    }

    #[test]
    fn test_execute_rule_counts_against_whole_table() {
        let conn = test_conn();
        insert_products(&conn, 20, 1);
        let engine = QualityEngine::new(d("2024-03-01"), 1000);

        let execution = engine.execute_rule(
            &conn,
            &rule("Category", RuleCategory::Completeness, "dim_product", MISSING_CATEGORY, 5.0),
        );

        assert_eq!(execution.total_records, 20);
        assert_eq!(execution.failed_records, 1);
        assert_eq!(execution.passed_records, 19);
        assert_eq!(execution.failure_percentage, 5.0);
        assert_eq!(execution.status, TestStatus::Warning);
        assert_eq!(execution.violations[0].column_name.as_deref(), Some("product_category"));
        assert_eq!(execution.violations[0].failed_value, None);
    }

    #[test]
    fn test_broken_rule_is_error_not_failure() {
        let conn = test_conn();
        let engine = QualityEngine::new(d("2024-03-01"), 1000);

        let missing_table = engine.execute_rule(
            &conn,
            &rule("Ghost", RuleCategory::Integrity, "no_such_table", "SELECT 1", 0.0),
        );
        let bad_sql = engine.execute_rule(
            &conn,
            &rule("Bad", RuleCategory::Integrity, "dim_product", "SELEC nonsense", 0.0),
        );

        for execution in [missing_table, bad_sql] {
            assert_eq!(execution.status, TestStatus::Error);
            assert_eq!(execution.total_records, 0);
            assert_eq!(execution.failed_records, 0);
            assert!(!execution.message.is_empty());
        }
    }

    #[test]
    fn test_report_date_parameter_is_bound() {
        let conn = test_conn();
        insert_products(&conn, 3, 0);
        let engine = QualityEngine::new(d("2024-03-01"), 1000);

        let execution = engine.execute_rule(
            &conn,
            &rule(
                "Dated",
                RuleCategory::Timeliness,
                "dim_product",
                "SELECT product_key AS record_identifier, :report_date AS expected_value
                 FROM dim_product WHERE :report_date = '2024-03-01'",
                100.0,
            ),
        );

        assert_eq!(execution.failed_records, 3);
        assert_eq!(execution.violations[0].expected_value.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_exceptions_are_capped_and_hashed() {
        let conn = test_conn();
        insert_products(&conn, 25, 25);
        let catalog = RuleCatalog::from_rules(vec![rule(
            "Category",
            RuleCategory::Completeness,
            "dim_product",
            MISSING_CATEGORY,
            0.0,
        )])
        .unwrap();
        setup_rules(&conn, &catalog).unwrap();
        let engine = QualityEngine::new(d("2024-03-01"), 10);

        let summary = engine.run_all_rules(&conn).unwrap();

        assert_eq!(summary.failed, 1);
        let (exceptions, distinct_hashes): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT exception_hash) FROM dq_exceptions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(exceptions, 10);
        assert_eq!(distinct_hashes, 10);
        let failed: i64 = conn
            .query_row("SELECT failed_records FROM dq_test_results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(failed, 25, "result counts every violation, not just stored ones");
    }

    #[test]
    fn test_exception_hash_is_stable() {
        let violation = Violation {
            record_identifier: "42".to_string(),
            column_name: Some("email".to_string()),
            failed_value: None,
            expected_value: None,
        };

        let first = exception_hash(7, &violation);

        assert_eq!(first, exception_hash(7, &violation));
        assert_ne!(first, exception_hash(8, &violation));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_run_continues_past_erroring_rule() {
        let conn = test_conn();
        insert_products(&conn, 4, 0);
        let catalog = RuleCatalog::from_rules(vec![
            rule("Broken", RuleCategory::Validity, "dim_product", "SELECT * FROM nowhere", 0.0),
            rule("Category", RuleCategory::Completeness, "dim_product", MISSING_CATEGORY, 0.0),
        ])
        .unwrap();
        setup_rules(&conn, &catalog).unwrap();

        let summary = QualityEngine::new(d("2024-03-01"), 1000).run_all_rules(&conn).unwrap();

        assert_eq!(
            summary,
            RunSummary {
                total_rules: 2,
                passed: 1,
                warning: 0,
                failed: 0,
                error: 1
            }
        );
    }

    #[test]
    fn test_scorecard_defaults_and_unweighted_mean() {
        let results = vec![
            ScoredResult {
                category: RuleCategory::Completeness,
                status: TestStatus::Warning,
                records_checked: 100,
                records_failed: 30,
            },
            ScoredResult {
                category: RuleCategory::Completeness,
                status: TestStatus::Passed,
                records_checked: 100,
                records_failed: 0,
            },
            ScoredResult {
                category: RuleCategory::Integrity,
                status: TestStatus::Failed,
                records_checked: 1_000_000,
                records_failed: 500_000,
            },
        ];

        let card = Scorecard::build(d("2024-03-01"), "DAILY", &results);

        assert_eq!(card.score(RuleCategory::Completeness), 85.0);
        assert_eq!(card.score(RuleCategory::Integrity), 50.0);
        assert_eq!(card.score(RuleCategory::Timeliness), 100.0);
        assert_eq!(card.overall_score, round2((85.0 + 50.0 + 500.0) / 7.0));
        assert_eq!(card.rules_warning, 1);
        assert_eq!(card.rules_failed, 1);
        assert_eq!(card.total_records_checked, 1_000_200);
    }

    #[test]
    fn test_scorecard_upsert_and_empty_day() {
        let conn = test_conn();
        insert_products(&conn, 10, 1);
        let catalog = RuleCatalog::from_rules(vec![rule(
            "Category",
            RuleCategory::Completeness,
            "dim_product",
            MISSING_CATEGORY,
            5.0,
        )])
        .unwrap();
        setup_rules(&conn, &catalog).unwrap();
        let engine = QualityEngine::new(d("2024-03-01"), 1000);

        assert_eq!(engine.generate_scorecard(&conn, "DAILY").unwrap(), None);

        engine.run_all_rules(&conn).unwrap();
        engine.run_all_rules(&conn).unwrap();
        let first = engine.generate_scorecard(&conn, "DAILY").unwrap().unwrap();
        let second = engine.generate_scorecard(&conn, "DAILY").unwrap().unwrap();

        assert_eq!(first.total_rules_executed, 1, "latest result per rule only");
        assert_eq!(first.score(RuleCategory::Completeness), 90.0);
        assert_eq!(first.overall_score, second.overall_score);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM dq_scorecards", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
