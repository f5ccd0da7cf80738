// Enterprise Data Warehouse - Core Library
// Exposes the ETL and data quality engines for the CLI and tests

pub mod aggregates;     // Customer metrics + aggregate rebuilds
pub mod config;         // TOML settings and PipelineContext
pub mod data_quality;   // Rule execution, exceptions, scorecards
pub mod db;             // Schema, date dimension, event log
pub mod deduplication;  // Latest-load-wins collapse of staged rows
pub mod dimensions;     // SCD2 customer merge, product/campaign merges
pub mod entities;       // Staged and warehouse row models
pub mod error;
pub mod facts;          // Temporal join of events to dimension versions
pub mod pipeline;       // Phase orchestration
pub mod rules;          // Quality rule catalog
pub mod staging;        // CSV extracts → stg_* tables
pub mod temporal;       // Validity intervals and point-in-time lookup

// Re-export commonly used types
pub use aggregates::{run_post_load, AggregateSummary};
pub use config::{PipelineConfig, PipelineContext};
pub use data_quality::{QualityEngine, RunSummary, Scorecard, TestStatus};
pub use db::{
    open_connection, open_in_memory, populate_date_dimension, setup_database, table_row_count,
    Event,
};
pub use dimensions::{
    plan_customer_merge, CustomerMergeOutcome, CustomerMergePlan, DimensionMerger,
};
pub use entities::{
    CampaignDimension, CustomerDimension, ProductDimension, StagedCampaign, StagedCustomer,
    StagedProduct, StagedResponse,
};
pub use error::{EtlError, Result};
pub use facts::{DimensionIndex, DimensionLookup, FactResolver, OrphanCounts, ResolutionReport};
pub use pipeline::{EtlPipeline, PipelineSummary, ValidationReport};
pub use rules::{setup_rules, QualityRule, RuleCatalog, RuleCategory, Severity};
pub use staging::{LoadSummary, SourceTable, StagingLoader};
pub use temporal::{version_at, ValidityInterval};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
