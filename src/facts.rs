// 🔗 Fact Resolution Engine - staging events → facts with surrogate keys
//
// Customer keys come from a temporal join: the version whose validity
// interval contains the event date. Product, campaign and date keys are
// plain natural-key lookups. Unresolvable rows are orphans: counted, logged,
// and left out of the batch.

use crate::db::timestamp_now;
use crate::dimensions::{ECOMMERCE_SOURCE, MARKETING_SOURCE};
use crate::entities::{
    CampaignResponseFact, ResponseType, StagedResponse, StagedTransaction, StagedTransactionItem,
    TransactionFact, TransactionLine,
};
use crate::error::Result;
use crate::staging::staged_snapshot;
use crate::temporal::{date_key, parse_event_date, version_at, ValidityInterval};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

// ============================================================================
// DIMENSION LOOKUP
// ============================================================================

/// Surrogate-key resolution against the warehouse dimensions
pub trait DimensionLookup {
    /// Key of the customer version valid on `date`
    fn customer_key_at(&self, customer_id: &str, date: NaiveDate) -> Option<i64>;
    fn product_key(&self, product_id: &str) -> Option<i64>;
    fn campaign_key(&self, campaign_id: &str) -> Option<i64>;
    fn has_date_key(&self, date_key: i32) -> bool;
}

/// In-memory snapshot of every dimension key, taken once per resolution run
#[derive(Debug, Default)]
pub struct DimensionIndex {
    customers: HashMap<String, Vec<(i64, ValidityInterval)>>,
    products: HashMap<String, i64>,
    campaigns: HashMap<String, i64>,
    date_keys: HashSet<i32>,
}

impl DimensionIndex {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut index = DimensionIndex::default();

        let mut stmt =
            conn.prepare("SELECT customer_key, customer_id, valid_from, valid_to FROM dim_customer")?;
        let versions = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    ValidityInterval::closed(row.get(2)?, row.get(3)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (key, customer_id, validity) in versions {
            index.add_customer_version(&customer_id, key, validity);
        }

        index.products = key_map(conn, "SELECT product_id, product_key FROM dim_product")?;
        index.campaigns = key_map(conn, "SELECT campaign_id, campaign_key FROM dim_campaign")?;

        let mut stmt = conn.prepare("SELECT date_key FROM dim_date")?;
        index.date_keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<i32>, _>>()?;

        Ok(index)
    }

    pub fn add_customer_version(&mut self, customer_id: &str, key: i64, validity: ValidityInterval) {
        self.customers
            .entry(customer_id.to_string())
            .or_default()
            .push((key, validity));
    }

    pub fn add_product(&mut self, product_id: &str, key: i64) {
        self.products.insert(product_id.to_string(), key);
    }

    pub fn add_campaign(&mut self, campaign_id: &str, key: i64) {
        self.campaigns.insert(campaign_id.to_string(), key);
    }

    pub fn add_date(&mut self, date: NaiveDate) {
        self.date_keys.insert(date_key(date));
    }
}

fn key_map(conn: &Connection, sql: &str) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(pairs)
}

impl DimensionLookup for DimensionIndex {
    fn customer_key_at(&self, customer_id: &str, date: NaiveDate) -> Option<i64> {
        let versions = self.customers.get(customer_id)?;
        version_at(versions, date, |(_, validity)| *validity).map(|(key, _)| *key)
    }

    fn product_key(&self, product_id: &str) -> Option<i64> {
        self.products.get(product_id).copied()
    }

    fn campaign_key(&self, campaign_id: &str) -> Option<i64> {
        self.campaigns.get(campaign_id).copied()
    }

    fn has_date_key(&self, date_key: i32) -> bool {
        self.date_keys.contains(&date_key)
    }
}

// ============================================================================
// RESOLUTION REPORTS
// ============================================================================

/// Rows left out of a fact batch, by the first reason they failed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrphanCounts {
    /// No customer version valid on the event date
    pub customer: usize,
    pub product: usize,
    pub campaign: usize,
    /// Event date outside the date dimension
    pub date: usize,
    pub unknown_response_type: usize,
    /// Line item whose order header is not staged
    pub missing_header: usize,
    pub invalid_date: usize,
}

impl OrphanCounts {
    pub fn total(&self) -> usize {
        self.customer
            + self.product
            + self.campaign
            + self.date
            + self.unknown_response_type
            + self.missing_header
            + self.invalid_date
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolutionReport {
    pub staged: usize,
    pub inserted: usize,
    /// Natural key already present in the fact table or earlier in the batch
    pub duplicates: usize,
    pub orphans: OrphanCounts,
}

impl ResolutionReport {
    fn log(&self, fact_table: &str) {
        if self.orphans.total() > 0 {
            let o = &self.orphans;
            warn!(
                fact_table,
                customer = o.customer,
                product = o.product,
                campaign = o.campaign,
                date = o.date,
                unknown_response_type = o.unknown_response_type,
                missing_header = o.missing_header,
                invalid_date = o.invalid_date,
                "orphan rows dropped"
            );
        }
        info!(
            fact_table,
            staged = self.staged,
            inserted = self.inserted,
            duplicates = self.duplicates,
            orphans = self.orphans.total(),
            "✓ facts resolved"
        );
    }
}

// ============================================================================
// PURE RESOLUTION
// ============================================================================

/// Join order headers to their items at line-item grain
pub fn join_transaction_lines(
    headers: &[StagedTransaction],
    items: &[StagedTransactionItem],
    orphans: &mut OrphanCounts,
) -> Vec<TransactionLine> {
    let by_id: HashMap<&str, &StagedTransaction> = headers
        .iter()
        .map(|h| (h.transaction_id.as_str(), h))
        .collect();

    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let Some(header) = by_id.get(item.transaction_id.as_str()) else {
            orphans.missing_header += 1;
            continue;
        };
        let Ok(transaction_date) =
            parse_event_date("transaction_date", &header.transaction_date)
        else {
            orphans.invalid_date += 1;
            continue;
        };

        lines.push(TransactionLine {
            transaction_id: header.transaction_id.clone(),
            transaction_item_id: item.transaction_item_id.clone(),
            customer_id: header.customer_id.clone(),
            product_id: item.product_id.clone(),
            transaction_date,
            order_number: header.order_number.clone(),
            payment_method: header.payment_method.clone(),
            payment_status: header.payment_status.clone(),
            currency_code: header.currency_code.clone(),
            tax_amount: header.tax_amount.unwrap_or(0.0),
            shipping_amount: header.shipping_amount.unwrap_or(0.0),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
            discount_amount: item.discount_amount.unwrap_or(0.0),
        });
    }
    lines
}

/// Resolve line items to facts, skipping orphans and known item ids
pub fn resolve_transaction_lines<L: DimensionLookup>(
    lines: &[TransactionLine],
    lookup: &L,
    existing_ids: &HashSet<String>,
    report: &mut ResolutionReport,
) -> Vec<TransactionFact> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut facts = Vec::new();

    for line in lines {
        if existing_ids.contains(&line.transaction_item_id)
            || !seen.insert(line.transaction_item_id.as_str())
        {
            report.duplicates += 1;
            continue;
        }

        let Some(customer_key) = lookup.customer_key_at(&line.customer_id, line.transaction_date)
        else {
            report.orphans.customer += 1;
            continue;
        };
        let Some(product_key) = lookup.product_key(&line.product_id) else {
            report.orphans.product += 1;
            continue;
        };
        let day = date_key(line.transaction_date);
        if !lookup.has_date_key(day) {
            report.orphans.date += 1;
            continue;
        }

        facts.push(TransactionFact::from_line(line, customer_key, product_key, day));
    }
    facts
}

/// Resolve campaign responses to facts, skipping orphans and known ids
pub fn resolve_response_rows<L: DimensionLookup>(
    responses: &[StagedResponse],
    lookup: &L,
    existing_ids: &HashSet<String>,
    report: &mut ResolutionReport,
) -> Vec<CampaignResponseFact> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut facts = Vec::new();

    for response in responses {
        if existing_ids.contains(&response.response_id) || !seen.insert(response.response_id.as_str())
        {
            report.duplicates += 1;
            continue;
        }

        let Some(response_type) = ResponseType::parse(&response.response_type) else {
            report.orphans.unknown_response_type += 1;
            continue;
        };
        let Ok(response_date) = parse_event_date("response_date", &response.response_date) else {
            report.orphans.invalid_date += 1;
            continue;
        };
        let Some(customer_key) = lookup.customer_key_at(&response.customer_id, response_date) else {
            report.orphans.customer += 1;
            continue;
        };
        let Some(campaign_key) = lookup.campaign_key(&response.campaign_id) else {
            report.orphans.campaign += 1;
            continue;
        };
        let day = date_key(response_date);
        if !lookup.has_date_key(day) {
            report.orphans.date += 1;
            continue;
        }

        facts.push(CampaignResponseFact::new(
            &response.response_id,
            response_type,
            response.conversion_value,
            customer_key,
            campaign_key,
            day,
        ));
    }
    facts
}

// ============================================================================
// FACT RESOLVER
// ============================================================================

/// Runs resolution against the warehouse. Build it after the dimension
/// merge so the index sees the new versions.
pub struct FactResolver {
    index: DimensionIndex,
}

impl FactResolver {
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(FactResolver {
            index: DimensionIndex::load(conn)?,
        })
    }

    pub fn resolve_transactions(&self, conn: &Connection) -> Result<ResolutionReport> {
        let (headers, _) = staged_snapshot::<StagedTransaction>(conn)?;
        let (items, _) = staged_snapshot::<StagedTransactionItem>(conn)?;
        let existing = existing_ids(conn, "SELECT transaction_item_id FROM fact_transactions")?;

        let mut report = ResolutionReport {
            staged: items.len(),
            ..ResolutionReport::default()
        };
        let lines = join_transaction_lines(&headers, &items, &mut report.orphans);
        let facts = resolve_transaction_lines(&lines, &self.index, &existing, &mut report);

        let now = timestamp_now();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fact_transactions (
                    customer_key, product_key, transaction_date_key, transaction_id,
                    transaction_item_id, order_number, quantity, unit_price, line_total,
                    discount_amount, tax_amount, shipping_amount, net_amount,
                    payment_method, payment_status, currency_code, created_date, source_system
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            )?;
            for fact in &facts {
                stmt.execute(params![
                    fact.customer_key,
                    fact.product_key,
                    fact.transaction_date_key,
                    fact.transaction_id,
                    fact.transaction_item_id,
                    fact.order_number,
                    fact.quantity,
                    fact.unit_price,
                    fact.line_total,
                    fact.discount_amount,
                    fact.tax_amount,
                    fact.shipping_amount,
                    fact.net_amount,
                    fact.payment_method,
                    fact.payment_status,
                    fact.currency_code,
                    now,
                    ECOMMERCE_SOURCE,
                ])?;
            }
        }
        tx.commit()?;

        report.inserted = facts.len();
        report.log("fact_transactions");
        Ok(report)
    }

    pub fn resolve_campaign_responses(&self, conn: &Connection) -> Result<ResolutionReport> {
        let (responses, _) = staged_snapshot::<StagedResponse>(conn)?;
        let existing = existing_ids(conn, "SELECT response_id FROM fact_campaign_responses")?;

        let mut report = ResolutionReport {
            staged: responses.len(),
            ..ResolutionReport::default()
        };
        let facts = resolve_response_rows(&responses, &self.index, &existing, &mut report);

        let now = timestamp_now();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fact_campaign_responses (
                    customer_key, campaign_key, response_date_key, response_id, response_type,
                    conversion_value, is_opened, is_clicked, is_converted, created_date, source_system
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for fact in &facts {
                stmt.execute(params![
                    fact.customer_key,
                    fact.campaign_key,
                    fact.response_date_key,
                    fact.response_id,
                    fact.response_type.as_str(),
                    fact.conversion_value,
                    fact.is_opened,
                    fact.is_clicked,
                    fact.is_converted,
                    now,
                    MARKETING_SOURCE,
                ])?;
            }
        }
        tx.commit()?;

        report.inserted = facts.len();
        report.log("fact_campaign_responses");
        Ok(report)
    }
}

fn existing_ids(conn: &Connection, sql: &str) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<String>, _>>()?;
    Ok(ids)
}

// ============================================================================
// TESTS
// ============================================================================
