// ⚙️ Configuration - TOML settings and the per-run pipeline context
// Nothing here is global: the context is built once in main and passed down.

use crate::db;
use crate::error::{EtlError, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseSettings,
    pub paths: PathSettings,
    pub etl: EtlSettings,
    pub date_dimension: DateDimensionSettings,
    pub quality: QualitySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: PathBuf::from("warehouse.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Directory scanned for raw CSV extracts
    pub raw_data: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        PathSettings {
            raw_data: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlSettings {
    /// Rows between staging progress reports
    pub batch_size: usize,
}

impl Default for EtlSettings {
    fn default() -> Self {
        EtlSettings { batch_size: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateDimensionSettings {
    pub start_year: i32,
    pub end_year: i32,
}

impl Default for DateDimensionSettings {
    fn default() -> Self {
        DateDimensionSettings {
            start_year: 2020,
            end_year: 2030,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// JSON rule catalog replacing the embedded one
    pub rules_file: Option<PathBuf>,
    pub max_exceptions_per_rule: usize,
    pub report_period: String,
}

impl Default for QualitySettings {
    fn default() -> Self {
        QualitySettings {
            rules_file: None,
            max_exceptions_per_rule: 1000,
            report_period: "DAILY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(PipelineConfig::default());
        }

        let content = fs::read_to_string(path)?;
        let config = PipelineConfig::from_toml(&content)?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.date_dimension.end_year < self.date_dimension.start_year {
            return Err(EtlError::Config(format!(
                "date_dimension.end_year ({}) is before start_year ({})",
                self.date_dimension.end_year, self.date_dimension.start_year
            )));
        }
        if self.etl.batch_size == 0 {
            return Err(EtlError::Config("etl.batch_size must be positive".to_string()));
        }
        if self.quality.max_exceptions_per_rule == 0 {
            return Err(EtlError::Config(
                "quality.max_exceptions_per_rule must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// PIPELINE CONTEXT
// ============================================================================

/// Everything one run needs: the open warehouse, its settings, and the
/// business date that drives SCD2 expiry and quality reports.
pub struct PipelineContext {
    pub conn: Connection,
    pub config: PipelineConfig,
    pub processing_date: NaiveDate,
    pub run_id: String,
}

impl PipelineContext {
    /// Open (and if needed create) the configured warehouse file
    pub fn open(config: PipelineConfig, processing_date: NaiveDate) -> Result<Self> {
        let conn = db::open_connection(&config.database.path)?;
        Self::with_connection(conn, config, processing_date)
    }

    pub fn in_memory(config: PipelineConfig, processing_date: NaiveDate) -> Result<Self> {
        let conn = db::open_in_memory()?;
        Self::with_connection(conn, config, processing_date)
    }

    fn with_connection(
        conn: Connection,
        config: PipelineConfig,
        processing_date: NaiveDate,
    ) -> Result<Self> {
        config.validate()?;
        db::setup_database(&conn)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%run_id, %processing_date, "pipeline context ready");

        Ok(PipelineContext {
            conn,
            config,
            processing_date,
            run_id,
        })
    }
}
