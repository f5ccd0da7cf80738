// ⚠️ Error taxonomy - one enum for every engine in the warehouse
// Binary edge wraps these in anyhow for context chains

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no file matching {pattern} in {dir}")]
    MissingSourceFile { pattern: String, dir: String },

    #[error("unparseable date in {field}: {value:?}")]
    InvalidDate { field: &'static str, value: String },

    /// An SCD2 expiry targeted a dimension row that is no longer current.
    #[error("expiry target customer_key={customer_key} ({customer_id}) is not a current row")]
    ExpiryTargetMissing { customer_key: i64, customer_id: String },

    #[error("unknown rule category: {0}")]
    UnknownCategory(String),

    #[error("unknown test status: {0}")]
    UnknownStatus(String),
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
