// 📥 Staging Loader - CSV extracts → append-only staging tables
// Each row carries audit columns: source_file, load_timestamp, load_id, row_hash.
// One transaction per table; a failed table never blocks the others.

use crate::db::timestamp_now;
use crate::deduplication::{latest_per_key, CollapseReport, LoadStamp, Staged};
use crate::entities::{
    StagedCampaign, StagedCustomer, StagedProduct, StagedResponse, StagedTransaction,
    StagedTransactionItem,
};
use crate::error::{EtlError, Result};
use chrono::{Local, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info};

// ============================================================================
// STAGING RECORD TRAIT
// ============================================================================

/// A CSV extract bound to its staging table
pub trait StagingRecord: DeserializeOwned + PartialEq + Sized {
    const TABLE: &'static str;
    /// File name prefix; the loader looks for `<prefix>*.csv`
    const FILE_PREFIX: &'static str;
    /// Business columns, in `values()` / `from_row()` order
    const COLUMNS: &'static [&'static str];
    const KEY_COLUMN: &'static str;

    fn natural_key(&self) -> String;
    fn values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: &Option<String>) -> Value {
    s.as_deref().map_or(Value::Null, text)
}

fn opt_real(v: Option<f64>) -> Value {
    v.map_or(Value::Null, Value::Real)
}

fn date(d: NaiveDate) -> Value {
    Value::Text(d.to_string())
}

impl StagingRecord for StagedCustomer {
    const TABLE: &'static str = "stg_crm_customers";
    const FILE_PREFIX: &'static str = "crm_customers_";
    const COLUMNS: &'static [&'static str] = &[
        "customer_id",
        "first_name",
        "last_name",
        "email",
        "phone_number",
        "date_of_birth",
        "gender",
        "address",
        "city",
        "state",
        "postal_code",
        "country",
        "registration_date",
        "customer_segment",
        "account_status",
    ];
    const KEY_COLUMN: &'static str = "customer_id";

    fn natural_key(&self) -> String {
        self.customer_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.customer_id),
            text(&self.first_name),
            text(&self.last_name),
            opt_text(&self.email),
            opt_text(&self.phone_number),
            self.date_of_birth.map_or(Value::Null, date),
            opt_text(&self.gender),
            opt_text(&self.address),
            opt_text(&self.city),
            opt_text(&self.state),
            opt_text(&self.postal_code),
            opt_text(&self.country),
            date(self.registration_date),
            opt_text(&self.customer_segment),
            opt_text(&self.account_status),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedCustomer {
            customer_id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            phone_number: row.get(4)?,
            date_of_birth: row.get(5)?,
            gender: row.get(6)?,
            address: row.get(7)?,
            city: row.get(8)?,
            state: row.get(9)?,
            postal_code: row.get(10)?,
            country: row.get(11)?,
            registration_date: row.get(12)?,
            customer_segment: row.get(13)?,
            account_status: row.get(14)?,
        })
    }
}

impl StagingRecord for StagedProduct {
    const TABLE: &'static str = "stg_products";
    const FILE_PREFIX: &'static str = "products_";
    const COLUMNS: &'static [&'static str] = &[
        "product_id",
        "product_name",
        "product_category",
        "product_subcategory",
        "brand",
        "unit_cost",
        "retail_price",
        "product_status",
    ];
    const KEY_COLUMN: &'static str = "product_id";

    fn natural_key(&self) -> String {
        self.product_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.product_id),
            text(&self.product_name),
            opt_text(&self.product_category),
            opt_text(&self.product_subcategory),
            opt_text(&self.brand),
            Value::Real(self.unit_cost),
            Value::Real(self.retail_price),
            opt_text(&self.product_status),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedProduct {
            product_id: row.get(0)?,
            product_name: row.get(1)?,
            product_category: row.get(2)?,
            product_subcategory: row.get(3)?,
            brand: row.get(4)?,
            unit_cost: row.get(5)?,
            retail_price: row.get(6)?,
            product_status: row.get(7)?,
        })
    }
}

impl StagingRecord for StagedTransaction {
    const TABLE: &'static str = "stg_ecom_transactions";
    const FILE_PREFIX: &'static str = "ecom_transactions_";
    const COLUMNS: &'static [&'static str] = &[
        "transaction_id",
        "customer_id",
        "transaction_date",
        "order_number",
        "payment_method",
        "payment_status",
        "total_amount",
        "tax_amount",
        "shipping_amount",
        "discount_amount",
        "currency_code",
    ];
    const KEY_COLUMN: &'static str = "transaction_id";

    fn natural_key(&self) -> String {
        self.transaction_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.transaction_id),
            text(&self.customer_id),
            text(&self.transaction_date),
            opt_text(&self.order_number),
            opt_text(&self.payment_method),
            opt_text(&self.payment_status),
            opt_real(self.total_amount),
            opt_real(self.tax_amount),
            opt_real(self.shipping_amount),
            opt_real(self.discount_amount),
            opt_text(&self.currency_code),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedTransaction {
            transaction_id: row.get(0)?,
            customer_id: row.get(1)?,
            transaction_date: row.get(2)?,
            order_number: row.get(3)?,
            payment_method: row.get(4)?,
            payment_status: row.get(5)?,
            total_amount: row.get(6)?,
            tax_amount: row.get(7)?,
            shipping_amount: row.get(8)?,
            discount_amount: row.get(9)?,
            currency_code: row.get(10)?,
        })
    }
}

impl StagingRecord for StagedTransactionItem {
    const TABLE: &'static str = "stg_ecom_transaction_items";
    const FILE_PREFIX: &'static str = "ecom_transaction_items_";
    const COLUMNS: &'static [&'static str] = &[
        "transaction_item_id",
        "transaction_id",
        "product_id",
        "product_name",
        "quantity",
        "unit_price",
        "line_total",
        "discount_amount",
    ];
    const KEY_COLUMN: &'static str = "transaction_item_id";

    fn natural_key(&self) -> String {
        self.transaction_item_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.transaction_item_id),
            text(&self.transaction_id),
            text(&self.product_id),
            opt_text(&self.product_name),
            Value::Integer(self.quantity),
            Value::Real(self.unit_price),
            Value::Real(self.line_total),
            opt_real(self.discount_amount),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedTransactionItem {
            transaction_item_id: row.get(0)?,
            transaction_id: row.get(1)?,
            product_id: row.get(2)?,
            product_name: row.get(3)?,
            quantity: row.get(4)?,
            unit_price: row.get(5)?,
            line_total: row.get(6)?,
            discount_amount: row.get(7)?,
        })
    }
}

impl StagingRecord for StagedCampaign {
    const TABLE: &'static str = "stg_marketing_campaigns";
    const FILE_PREFIX: &'static str = "marketing_campaigns_";
    const COLUMNS: &'static [&'static str] = &[
        "campaign_id",
        "campaign_name",
        "campaign_type",
        "channel",
        "start_date",
        "end_date",
        "budget",
        "target_audience",
        "campaign_status",
    ];
    const KEY_COLUMN: &'static str = "campaign_id";

    fn natural_key(&self) -> String {
        self.campaign_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.campaign_id),
            text(&self.campaign_name),
            opt_text(&self.campaign_type),
            opt_text(&self.channel),
            date(self.start_date),
            date(self.end_date),
            opt_real(self.budget),
            opt_text(&self.target_audience),
            opt_text(&self.campaign_status),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedCampaign {
            campaign_id: row.get(0)?,
            campaign_name: row.get(1)?,
            campaign_type: row.get(2)?,
            channel: row.get(3)?,
            start_date: row.get(4)?,
            end_date: row.get(5)?,
            budget: row.get(6)?,
            target_audience: row.get(7)?,
            campaign_status: row.get(8)?,
        })
    }
}

impl StagingRecord for StagedResponse {
    const TABLE: &'static str = "stg_campaign_responses";
    const FILE_PREFIX: &'static str = "campaign_responses_";
    const COLUMNS: &'static [&'static str] = &[
        "response_id",
        "campaign_id",
        "customer_id",
        "response_date",
        "response_type",
        "conversion_value",
    ];
    const KEY_COLUMN: &'static str = "response_id";

    fn natural_key(&self) -> String {
        self.response_id.clone()
    }

    fn values(&self) -> Vec<Value> {
        vec![
            text(&self.response_id),
            text(&self.campaign_id),
            text(&self.customer_id),
            text(&self.response_date),
            text(&self.response_type),
            opt_real(self.conversion_value),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StagedResponse {
            response_id: row.get(0)?,
            campaign_id: row.get(1)?,
            customer_id: row.get(2)?,
            response_date: row.get(3)?,
            response_type: row.get(4)?,
            conversion_value: row.get(5)?,
        })
    }
}

// ============================================================================
// SOURCE TABLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceTable {
    Customers,
    Products,
    Transactions,
    TransactionItems,
    Campaigns,
    CampaignResponses,
}

impl SourceTable {
    /// Load order used by `load_all`
    pub const ALL: [SourceTable; 6] = [
        SourceTable::Customers,
        SourceTable::Products,
        SourceTable::Transactions,
        SourceTable::TransactionItems,
        SourceTable::Campaigns,
        SourceTable::CampaignResponses,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceTable::Customers => "customers",
            SourceTable::Products => "products",
            SourceTable::Transactions => "transactions",
            SourceTable::TransactionItems => "items",
            SourceTable::Campaigns => "campaigns",
            SourceTable::CampaignResponses => "responses",
        }
    }

    pub fn staging_table(&self) -> &'static str {
        match self {
            SourceTable::Customers => StagedCustomer::TABLE,
            SourceTable::Products => StagedProduct::TABLE,
            SourceTable::Transactions => StagedTransaction::TABLE,
            SourceTable::TransactionItems => StagedTransactionItem::TABLE,
            SourceTable::Campaigns => StagedCampaign::TABLE,
            SourceTable::CampaignResponses => StagedResponse::TABLE,
        }
    }

    pub fn file_prefix(&self) -> &'static str {
        match self {
            SourceTable::Customers => StagedCustomer::FILE_PREFIX,
            SourceTable::Products => StagedProduct::FILE_PREFIX,
            SourceTable::Transactions => StagedTransaction::FILE_PREFIX,
            SourceTable::TransactionItems => StagedTransactionItem::FILE_PREFIX,
            SourceTable::Campaigns => StagedCampaign::FILE_PREFIX,
            SourceTable::CampaignResponses => StagedResponse::FILE_PREFIX,
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceTable {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        SourceTable::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| EtlError::Config(format!("unknown staging table: {s}")))
    }
}

// ============================================================================
// FILE DISCOVERY & HASHING
// ============================================================================

/// Most recently modified `<prefix>*.csv` in `dir`
pub fn find_latest_file(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let missing = || EtlError::MissingSourceFile {
        pattern: format!("{prefix}*.csv"),
        dir: dir.display().to_string(),
    };

    if !dir.is_dir() {
        return Err(missing());
    }

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(".csv") {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        let path = entry.path();
        let newer = match &latest {
            None => true,
            Some((best_time, best_path)) => (modified, &path) > (*best_time, best_path),
        };
        if newer {
            latest = Some((modified, path));
        }
    }

    latest.map(|(_, path)| path).ok_or_else(missing)
}

/// SHA-256 of the raw field values joined with `|`
pub fn row_hash<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = fields.into_iter().collect::<Vec<_>>().join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// LOADER
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TableLoad {
    pub table: SourceTable,
    pub source_file: String,
    pub rows_loaded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub load_id: i64,
    pub loaded: Vec<TableLoad>,
    pub failed: Vec<(SourceTable, String)>,
}

impl LoadSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total_rows(&self) -> usize {
        self.loaded.iter().map(|t| t.rows_loaded).sum()
    }
}

pub struct StagingLoader {
    raw_data_dir: PathBuf,
    load_id: i64,
    batch_size: usize,
    loaded_by: String,
}

impl StagingLoader {
    /// New loader with a run identifier `YYYYMMDDHHMMSS`, bumped past any
    /// load id already in the audit log
    pub fn new(conn: &Connection, raw_data_dir: &Path, batch_size: usize) -> Result<Self> {
        let stamp: i64 = Local::now()
            .format("%Y%m%d%H%M%S")
            .to_string()
            .parse()
            .unwrap_or_default();
        let previous: Option<i64> =
            conn.query_row("SELECT MAX(load_id) FROM stg_audit_log", [], |row| row.get(0))?;
        let load_id = match previous {
            Some(prev) if prev >= stamp => prev + 1,
            _ => stamp,
        };

        info!(load_id, dir = %raw_data_dir.display(), "staging loader initialized");

        Ok(StagingLoader {
            raw_data_dir: raw_data_dir.to_path_buf(),
            load_id,
            batch_size: batch_size.max(1),
            loaded_by: "staging_loader".to_string(),
        })
    }

    pub fn load_id(&self) -> i64 {
        self.load_id
    }

    /// Load every source table; failures are recorded, not raised
    pub fn load_all(&self, conn: &Connection) -> LoadSummary {
        let mut summary = LoadSummary {
            load_id: self.load_id,
            loaded: Vec::new(),
            failed: Vec::new(),
        };

        for table in SourceTable::ALL {
            match self.load_table(conn, table, None) {
                Ok(load) => summary.loaded.push(load),
                Err(e) => summary.failed.push((table, e.to_string())),
            }
        }

        info!(
            load_id = self.load_id,
            tables_loaded = summary.loaded.len(),
            tables_failed = summary.failed.len(),
            rows = summary.total_rows(),
            "staging load finished"
        );
        summary
    }

    /// Load one table from `file`, or from the latest matching extract
    pub fn load_table(
        &self,
        conn: &Connection,
        table: SourceTable,
        file: Option<&Path>,
    ) -> Result<TableLoad> {
        let started = timestamp_now();

        let path = match file {
            Some(p) => p.to_path_buf(),
            None => match find_latest_file(&self.raw_data_dir, table.file_prefix()) {
                Ok(p) => p,
                Err(e) => {
                    self.write_audit(conn, table, None, 0, &started, Err(&e))?;
                    error!(%table, error = %e, "staging load failed");
                    return Err(e);
                }
            },
        };
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let outcome = match table {
            SourceTable::Customers => self.load_file::<StagedCustomer>(conn, &path, &source_file),
            SourceTable::Products => self.load_file::<StagedProduct>(conn, &path, &source_file),
            SourceTable::Transactions => {
                self.load_file::<StagedTransaction>(conn, &path, &source_file)
            }
            SourceTable::TransactionItems => {
                self.load_file::<StagedTransactionItem>(conn, &path, &source_file)
            }
            SourceTable::Campaigns => self.load_file::<StagedCampaign>(conn, &path, &source_file),
            SourceTable::CampaignResponses => {
                self.load_file::<StagedResponse>(conn, &path, &source_file)
            }
        };

        match outcome {
            Ok(rows_loaded) => {
                self.write_audit(conn, table, Some(&source_file), rows_loaded, &started, Ok(()))?;
                info!(%table, %source_file, rows_loaded, "✓ staged");
                Ok(TableLoad {
                    table,
                    source_file,
                    rows_loaded,
                })
            }
            Err(e) => {
                self.write_audit(conn, table, Some(&source_file), 0, &started, Err(&e))?;
                error!(%table, %source_file, error = %e, "staging load failed");
                Err(e)
            }
        }
    }

    fn load_file<T: StagingRecord>(
        &self,
        conn: &Connection,
        path: &Path,
        source_file: &str,
    ) -> Result<usize> {
        let mut rdr = csv::Reader::from_path(path)?;
        let headers = rdr.headers()?.clone();
        let load_timestamp = timestamp_now();

        let tx = conn.unchecked_transaction()?;
        let mut rows = 0;
        {
            let mut stmt = tx.prepare(&insert_sql::<T>())?;
            for result in rdr.records() {
                let raw = result?;
                let record: T = raw.deserialize(Some(&headers))?;

                let mut values = record.values();
                values.push(text(source_file));
                values.push(text(&load_timestamp));
                values.push(Value::Integer(self.load_id));
                values.push(Value::Text(row_hash(raw.iter())));
                stmt.execute(params_from_iter(values))?;

                rows += 1;
                if rows % self.batch_size == 0 {
                    debug!(table = T::TABLE, rows, "staging progress");
                }
            }
        }
        tx.commit()?;

        Ok(rows)
    }

    fn write_audit(
        &self,
        conn: &Connection,
        table: SourceTable,
        source_file: Option<&str>,
        rows_loaded: usize,
        started: &str,
        outcome: std::result::Result<(), &EtlError>,
    ) -> Result<()> {
        let (status, message) = match outcome {
            Ok(()) => ("SUCCESS", None),
            Err(e) => ("FAILED", Some(e.to_string())),
        };

        conn.execute(
            "INSERT INTO stg_audit_log (
                load_id, table_name, load_type, source_file, rows_loaded, rows_rejected,
                load_start_time, load_end_time, load_status, error_message, loaded_by
            ) VALUES (?1, ?2, 'FULL', ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.load_id,
                table.staging_table(),
                source_file,
                rows_loaded as i64,
                started,
                timestamp_now(),
                status,
                message,
                self.loaded_by,
            ],
        )?;
        Ok(())
    }
}

fn insert_sql<T: StagingRecord>() -> String {
    let placeholders = (1..=T::COLUMNS.len() + 4)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}, source_file, load_timestamp, load_id, row_hash) VALUES ({placeholders})",
        T::TABLE,
        T::COLUMNS.join(", ")
    )
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

/// Append already-typed records to their staging table (no CSV involved)
pub fn stage_records<T: StagingRecord>(
    conn: &Connection,
    records: &[T],
    source_file: &str,
    load_id: i64,
) -> Result<usize> {
    let load_timestamp = timestamp_now();
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(&insert_sql::<T>())?;
        for record in records {
            let mut values = record.values();
            let fields: Vec<String> = values.iter().map(value_text).collect();
            let hash = row_hash(fields.iter().map(String::as_str));
            values.push(text(source_file));
            values.push(text(&load_timestamp));
            values.push(Value::Integer(load_id));
            values.push(Value::Text(hash));
            stmt.execute(params_from_iter(values))?;
        }
    }
    tx.commit()?;
    Ok(records.len())
}

// ============================================================================
// READING STAGED SNAPSHOTS
// ============================================================================

/// Every staged row of `T` with its load stamp
pub fn read_staged<T: StagingRecord>(conn: &Connection) -> Result<Vec<Staged<T>>> {
    let n = T::COLUMNS.len();
    let sql = format!(
        "SELECT {}, load_timestamp, load_id, stg_id FROM {} WHERE {} IS NOT NULL",
        T::COLUMNS.join(", "),
        T::TABLE,
        T::KEY_COLUMN
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Staged {
                record: T::from_row(row)?,
                stamp: LoadStamp {
                    load_timestamp: row.get(n)?,
                    load_id: row.get(n + 1)?,
                    stg_id: row.get(n + 2)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Current staging snapshot: one record per natural key, latest load wins
pub fn staged_snapshot<T: StagingRecord>(conn: &Connection) -> Result<(Vec<T>, CollapseReport)> {
    let rows = read_staged::<T>(conn)?;
    let (records, report) = latest_per_key(rows, |r: &T| r.natural_key());
    debug!(
        table = T::TABLE,
        staged = report.staged_rows,
        distinct = report.distinct_keys,
        "staging snapshot"
    );
    Ok((records, report))
}
