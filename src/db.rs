// 🗄️ Warehouse Store - SQLite schema, connection setup, audit trail
// Staging tables, star schema, quality tables: all created idempotently.

use crate::entities::calendar::{calendar_range, CalendarDay};
use crate::error::{EtlError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// CONNECTIONS
// ============================================================================

pub fn open_connection<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    register_regexp(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    register_regexp(&conn)?;
    Ok(conn)
}

/// `x REGEXP pattern` for validity rules; NULL input yields NULL
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |raw| -> Result<_, BoxError> {
                Ok(Regex::new(raw.as_str()?)?)
            })?;
            let text: Option<String> = ctx.get(1)?;
            Ok(text.map(|t| pattern.is_match(&t)))
        },
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 timestamp; sorts lexicographically
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// SCHEMA
// ============================================================================

const STAGING_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stg_crm_customers (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    phone_number TEXT,
    date_of_birth TEXT,
    gender TEXT,
    address TEXT,
    city TEXT,
    state TEXT,
    postal_code TEXT,
    country TEXT,
    registration_date TEXT,
    customer_segment TEXT,
    account_status TEXT,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_products (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id TEXT,
    product_name TEXT,
    product_category TEXT,
    product_subcategory TEXT,
    brand TEXT,
    unit_cost REAL,
    retail_price REAL,
    product_status TEXT,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_ecom_transactions (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_id TEXT,
    customer_id TEXT,
    transaction_date TEXT,
    order_number TEXT,
    payment_method TEXT,
    payment_status TEXT,
    total_amount REAL,
    tax_amount REAL,
    shipping_amount REAL,
    discount_amount REAL,
    currency_code TEXT,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_ecom_transaction_items (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_item_id TEXT,
    transaction_id TEXT,
    product_id TEXT,
    product_name TEXT,
    quantity INTEGER,
    unit_price REAL,
    line_total REAL,
    discount_amount REAL,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_marketing_campaigns (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id TEXT,
    campaign_name TEXT,
    campaign_type TEXT,
    channel TEXT,
    start_date TEXT,
    end_date TEXT,
    budget REAL,
    target_audience TEXT,
    campaign_status TEXT,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_campaign_responses (
    stg_id INTEGER PRIMARY KEY AUTOINCREMENT,
    response_id TEXT,
    campaign_id TEXT,
    customer_id TEXT,
    response_date TEXT,
    response_type TEXT,
    conversion_value REAL,
    source_file TEXT NOT NULL,
    load_timestamp TEXT NOT NULL,
    load_id INTEGER NOT NULL,
    row_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stg_audit_log (
    audit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    load_id INTEGER NOT NULL,
    table_name TEXT NOT NULL,
    load_type TEXT NOT NULL,
    source_file TEXT,
    rows_loaded INTEGER NOT NULL DEFAULT 0,
    rows_rejected INTEGER NOT NULL DEFAULT 0,
    load_start_time TEXT NOT NULL,
    load_end_time TEXT NOT NULL,
    load_status TEXT NOT NULL,
    error_message TEXT,
    loaded_by TEXT NOT NULL
);
";

const WAREHOUSE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dim_date (
    date_key INTEGER PRIMARY KEY,
    date_actual TEXT NOT NULL UNIQUE,
    day_of_week INTEGER NOT NULL,
    day_name TEXT NOT NULL,
    day_of_month INTEGER NOT NULL,
    day_of_year INTEGER NOT NULL,
    week_of_year INTEGER NOT NULL,
    week_start_date TEXT NOT NULL,
    month_number INTEGER NOT NULL,
    month_name TEXT NOT NULL,
    month_abbr TEXT NOT NULL,
    month_start_date TEXT NOT NULL,
    month_end_date TEXT NOT NULL,
    quarter_number INTEGER NOT NULL,
    quarter_name TEXT NOT NULL,
    year_number INTEGER NOT NULL,
    is_weekend INTEGER NOT NULL,
    is_business_day INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_customer (
    customer_key INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    full_name TEXT NOT NULL,
    email TEXT,
    phone_number TEXT,
    date_of_birth TEXT,
    age INTEGER,
    age_group TEXT,
    gender TEXT,
    address TEXT,
    city TEXT,
    state TEXT,
    postal_code TEXT,
    country TEXT,
    registration_date TEXT NOT NULL,
    customer_segment TEXT,
    account_status TEXT,
    lifetime_value REAL NOT NULL DEFAULT 0,
    total_orders INTEGER NOT NULL DEFAULT 0,
    total_spent REAL NOT NULL DEFAULT 0,
    valid_from TEXT NOT NULL,
    valid_to TEXT NOT NULL,
    is_current INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    updated_date TEXT NOT NULL,
    source_system TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_product (
    product_key INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id TEXT NOT NULL UNIQUE,
    product_name TEXT NOT NULL,
    product_category TEXT,
    product_subcategory TEXT,
    brand TEXT,
    unit_cost REAL NOT NULL,
    retail_price REAL NOT NULL,
    margin_percentage REAL,
    product_status TEXT,
    is_active INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    updated_date TEXT NOT NULL,
    source_system TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dim_campaign (
    campaign_key INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id TEXT NOT NULL UNIQUE,
    campaign_name TEXT NOT NULL,
    campaign_type TEXT,
    channel TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    duration_days INTEGER NOT NULL,
    budget REAL,
    target_audience TEXT,
    campaign_status TEXT,
    created_date TEXT NOT NULL,
    updated_date TEXT NOT NULL,
    source_system TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fact_transactions (
    transaction_key INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_key INTEGER NOT NULL,
    product_key INTEGER NOT NULL,
    transaction_date_key INTEGER NOT NULL,
    transaction_id TEXT NOT NULL,
    transaction_item_id TEXT NOT NULL UNIQUE,
    order_number TEXT,
    quantity INTEGER NOT NULL,
    unit_price REAL NOT NULL,
    line_total REAL NOT NULL,
    discount_amount REAL NOT NULL,
    tax_amount REAL NOT NULL,
    shipping_amount REAL NOT NULL,
    net_amount REAL NOT NULL,
    payment_method TEXT,
    payment_status TEXT,
    currency_code TEXT,
    created_date TEXT NOT NULL,
    source_system TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fact_campaign_responses (
    response_key INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_key INTEGER NOT NULL,
    campaign_key INTEGER NOT NULL,
    response_date_key INTEGER NOT NULL,
    response_id TEXT NOT NULL UNIQUE,
    response_type TEXT NOT NULL,
    conversion_value REAL NOT NULL DEFAULT 0,
    is_opened INTEGER NOT NULL,
    is_clicked INTEGER NOT NULL,
    is_converted INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    source_system TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agg_customer_monthly (
    customer_key INTEGER NOT NULL,
    year_month INTEGER NOT NULL,
    total_transactions INTEGER NOT NULL,
    total_quantity INTEGER NOT NULL,
    total_amount REAL NOT NULL,
    total_discount REAL NOT NULL,
    avg_transaction_value REAL NOT NULL,
    month_start_date TEXT NOT NULL,
    month_end_date TEXT NOT NULL,
    created_date TEXT NOT NULL,
    PRIMARY KEY (customer_key, year_month)
);

CREATE TABLE IF NOT EXISTS agg_product_daily (
    product_key INTEGER NOT NULL,
    date_key INTEGER NOT NULL,
    units_sold INTEGER NOT NULL,
    total_revenue REAL NOT NULL,
    total_cost REAL NOT NULL,
    total_profit REAL NOT NULL,
    unique_customers INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    PRIMARY KEY (product_key, date_key)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_dim_customer_current
    ON dim_customer(customer_id) WHERE is_current = 1;
CREATE INDEX IF NOT EXISTS idx_dim_customer_natural
    ON dim_customer(customer_id, valid_from, valid_to);
CREATE INDEX IF NOT EXISTS idx_fact_transactions_customer
    ON fact_transactions(customer_key);
CREATE INDEX IF NOT EXISTS idx_fact_transactions_date
    ON fact_transactions(transaction_date_key);
";

const QUALITY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dq_rule_categories (
    category_name TEXT PRIMARY KEY,
    category_description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dq_rules (
    rule_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_name TEXT NOT NULL UNIQUE,
    rule_description TEXT NOT NULL,
    category TEXT NOT NULL REFERENCES dq_rule_categories(category_name),
    target_table TEXT NOT NULL,
    target_column TEXT,
    rule_kind TEXT NOT NULL,
    violation_query TEXT NOT NULL,
    severity TEXT NOT NULL,
    failure_threshold REAL NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_date TEXT NOT NULL,
    updated_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dq_test_results (
    result_id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL,
    execution_date TEXT NOT NULL,
    executed_at TEXT NOT NULL,
    execution_duration_ms INTEGER NOT NULL,
    total_records_checked INTEGER NOT NULL,
    failed_records INTEGER NOT NULL,
    passed_records INTEGER NOT NULL,
    failure_percentage REAL NOT NULL,
    test_status TEXT NOT NULL,
    test_message TEXT
);

CREATE TABLE IF NOT EXISTS dq_exceptions (
    exception_id INTEGER PRIMARY KEY AUTOINCREMENT,
    result_id INTEGER NOT NULL,
    rule_id INTEGER NOT NULL,
    table_name TEXT NOT NULL,
    record_identifier TEXT,
    column_name TEXT,
    failed_value TEXT,
    expected_value TEXT,
    exception_hash TEXT NOT NULL,
    created_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dq_scorecards (
    scorecard_id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_date TEXT NOT NULL,
    report_period TEXT NOT NULL,
    total_rules_executed INTEGER NOT NULL,
    rules_passed INTEGER NOT NULL,
    rules_failed INTEGER NOT NULL,
    rules_warning INTEGER NOT NULL,
    rules_error INTEGER NOT NULL,
    overall_quality_score REAL NOT NULL,
    completeness_score REAL NOT NULL,
    accuracy_score REAL NOT NULL,
    consistency_score REAL NOT NULL,
    validity_score REAL NOT NULL,
    uniqueness_score REAL NOT NULL,
    timeliness_score REAL NOT NULL,
    integrity_score REAL NOT NULL,
    total_records_checked INTEGER NOT NULL,
    total_failed_records INTEGER NOT NULL,
    created_date TEXT NOT NULL,
    UNIQUE (report_date, report_period)
);

CREATE INDEX IF NOT EXISTS idx_dq_results_date ON dq_test_results(execution_date);
CREATE INDEX IF NOT EXISTS idx_dq_exceptions_hash ON dq_exceptions(exception_hash);
";

const AUDIT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS etl_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT UNIQUE NOT NULL,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data TEXT NOT NULL,
    actor TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON etl_events(entity_type, entity_id);
";

/// Create every table and index; safe to call on an existing warehouse
pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute_batch(STAGING_SCHEMA)?;
    conn.execute_batch(WAREHOUSE_SCHEMA)?;
    conn.execute_batch(QUALITY_SCHEMA)?;
    conn.execute_batch(AUDIT_SCHEMA)?;
    Ok(())
}

// ============================================================================
// DATE DIMENSION
// ============================================================================

/// Insert one row per calendar day; existing keys are left alone
pub fn populate_date_dimension(conn: &Connection, start_year: i32, end_year: i32) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;

    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO dim_date (
                date_key, date_actual, day_of_week, day_name, day_of_month,
                day_of_year, week_of_year, week_start_date, month_number, month_name,
                month_abbr, month_start_date, month_end_date, quarter_number, quarter_name,
                year_number, is_weekend, is_business_day
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )?;

        for date in calendar_range(start_year, end_year) {
            let day = CalendarDay::from_date(date);
            inserted += stmt.execute(params![
                day.date_key,
                day.date_actual,
                day.day_of_week,
                day.day_name,
                day.day_of_month,
                day.day_of_year,
                day.week_of_year,
                day.week_start_date,
                day.month_number,
                day.month_name,
                day.month_abbr,
                day.month_start_date,
                day.month_end_date,
                day.quarter_number,
                day.quarter_name,
                day.year_number,
                day.is_weekend,
                day.is_business_day,
            ])?;
        }
    }

    tx.commit()?;
    info!(start_year, end_year, inserted, "date dimension populated");
    Ok(inserted)
}

// ============================================================================
// HELPERS
// ============================================================================

/// Row count of a table named by the caller (identifier is checked, not bound)
pub fn table_row_count(conn: &Connection, table: &str) -> Result<i64> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EtlError::Config(format!("invalid table name: {table:?}")));
    }
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// One pipeline event (phase finished, phase failed, ...)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO etl_events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM etl_events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for (event_id, timestamp, event_type, entity_type, entity_id, data, actor) in rows {
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|_| EtlError::InvalidDate {
                field: "etl_events.timestamp",
                value: timestamp.clone(),
            })?
            .with_timezone(&Utc);

        events.push(Event {
            event_id,
            timestamp,
            event_type,
            entity_type,
            entity_id,
            data: serde_json::from_str(&data)?,
            actor,
        });
    }

    Ok(events)
}
