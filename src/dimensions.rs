// ⏳ Dimension Merge Engine - staging snapshots → versioned dimension rows
// Customers: SCD Type 2 on tracked attributes, Type 1 on contact attributes.
// Products: Type 1 overwrite. Campaigns: insert-only.
//
// Every merge runs inside one transaction: a failing row rolls back the table.

use crate::db::timestamp_now;
use crate::entities::{
    CampaignDimension, ContactAttributes, CustomerDimension, ProductDimension, StagedCampaign,
    StagedCustomer, StagedProduct, TrackedAttributes,
};
use crate::error::{EtlError, Result};
use crate::staging::staged_snapshot;
use crate::temporal::{check_timeline, TimelineViolation, ValidityInterval};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

pub const CRM_SOURCE: &str = "CRM";
pub const ECOMMERCE_SOURCE: &str = "E-COMMERCE";
pub const MARKETING_SOURCE: &str = "MARKETING";

// ============================================================================
// CUSTOMER MERGE PLAN
// ============================================================================

/// Close a current version at `valid_to`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionExpiry {
    pub customer_key: i64,
    pub customer_id: String,
    pub valid_to: NaiveDate,
}

/// Overwrite contact attributes on an existing row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactPatch {
    pub customer_key: i64,
    pub customer_id: String,
    pub contact: ContactAttributes,
}

/// Writes needed to bring the customer dimension in line with staging.
/// `new_versions[i]` pairs with the expiry of the same customer_id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerMergePlan {
    pub new_customers: Vec<CustomerDimension>,
    pub new_versions: Vec<CustomerDimension>,
    pub expiries: Vec<VersionExpiry>,
    pub contact_patches: Vec<ContactPatch>,
    /// Customers without a new version (contact patches included)
    pub unchanged: usize,
}

/// Current dimension rows by natural key, with their surrogate keys
pub type CurrentCustomers = HashMap<String, (i64, CustomerDimension)>;

/// Decide the writes for one staged snapshot. Pure: touches no database.
///
/// `staged` must already hold one record per customer_id.
pub fn plan_customer_merge(
    staged: &[StagedCustomer],
    current: &CurrentCustomers,
    processing_date: NaiveDate,
) -> CustomerMergePlan {
    let mut plan = CustomerMergePlan::default();

    for record in staged {
        match current.get(&record.customer_id) {
            None => {
                let validity = ValidityInterval::open(record.registration_date);
                plan.new_customers
                    .push(CustomerDimension::from_staged(record, validity, processing_date));
            }
            Some((customer_key, existing)) => {
                if existing.tracked != record.tracked() {
                    // A version opened after the processing date is closed on its own start day
                    let change_date = processing_date.max(existing.validity.valid_from);
                    plan.expiries.push(VersionExpiry {
                        customer_key: *customer_key,
                        customer_id: record.customer_id.clone(),
                        valid_to: change_date,
                    });
                    plan.new_versions.push(CustomerDimension::from_staged(
                        record,
                        ValidityInterval::open(change_date),
                        processing_date,
                    ));
                } else {
                    if existing.contact != record.contact() {
                        plan.contact_patches.push(ContactPatch {
                            customer_key: *customer_key,
                            customer_id: record.customer_id.clone(),
                            contact: record.contact(),
                        });
                    }
                    plan.unchanged += 1;
                }
            }
        }
    }

    plan
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomerMergeOutcome {
    pub new_customers: usize,
    /// Customers that received a new version
    pub updated: usize,
    pub unchanged: usize,
    pub contact_patches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductMergeOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampaignMergeOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

// ============================================================================
// DIMENSION MERGER
// ============================================================================

pub struct DimensionMerger {
    /// Business date of this run; expiry and new-version dates use it
    pub processing_date: NaiveDate,
}

impl DimensionMerger {
    pub fn new(processing_date: NaiveDate) -> Self {
        DimensionMerger { processing_date }
    }

    /// SCD2 merge of the customer staging snapshot.
    ///
    /// Lifetime metrics of new versions start at zero; the metrics step
    /// must run before anything reads them.
    pub fn merge_customers(&self, conn: &Connection) -> Result<CustomerMergeOutcome> {
        let (staged, collapse) = staged_snapshot::<StagedCustomer>(conn)?;
        let current = load_current_customers(conn)?;

        let plan = plan_customer_merge(&staged, &current, self.processing_date);
        self.apply_customer_plan(conn, &plan)?;

        let outcome = CustomerMergeOutcome {
            new_customers: plan.new_customers.len(),
            updated: plan.new_versions.len(),
            unchanged: plan.unchanged,
            contact_patches: plan.contact_patches.len(),
        };
        info!(
            staged = collapse.distinct_keys,
            new = outcome.new_customers,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            patched = outcome.contact_patches,
            "✓ customer dimension merged"
        );
        Ok(outcome)
    }

    /// Apply a plan atomically: expiries, then patches, then inserts
    pub fn apply_customer_plan(&self, conn: &Connection, plan: &CustomerMergePlan) -> Result<()> {
        let now = timestamp_now();
        let tx = conn.unchecked_transaction()?;

        // One update per expired row, each with its own expiry date
        for expiry in &plan.expiries {
            let affected = tx.execute(
                "UPDATE dim_customer
                 SET valid_to = ?1, is_current = 0, updated_date = ?2
                 WHERE customer_key = ?3 AND is_current = 1",
                params![expiry.valid_to, now, expiry.customer_key],
            )?;
            if affected != 1 {
                return Err(EtlError::ExpiryTargetMissing {
                    customer_key: expiry.customer_key,
                    customer_id: expiry.customer_id.clone(),
                });
            }
        }

        for patch in &plan.contact_patches {
            tx.execute(
                "UPDATE dim_customer
                 SET email = ?1, phone_number = ?2, updated_date = ?3
                 WHERE customer_key = ?4",
                params![patch.contact.email, patch.contact.phone_number, now, patch.customer_key],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO dim_customer (
                    customer_id, first_name, last_name, full_name, email, phone_number,
                    date_of_birth, age, age_group, gender, address, city, state, postal_code,
                    country, registration_date, customer_segment, account_status,
                    lifetime_value, total_orders, total_spent,
                    valid_from, valid_to, is_current, created_date, updated_date, source_system
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                          ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?25, ?26)",
            )?;

            for row in plan.new_customers.iter().chain(plan.new_versions.iter()) {
                stmt.execute(params![
                    row.customer_id,
                    row.first_name,
                    row.last_name,
                    row.full_name,
                    row.contact.email,
                    row.contact.phone_number,
                    row.date_of_birth,
                    row.age,
                    row.age_group,
                    row.gender,
                    row.tracked.address,
                    row.tracked.city,
                    row.tracked.state,
                    row.tracked.postal_code,
                    row.country,
                    row.registration_date,
                    row.tracked.customer_segment,
                    row.account_status,
                    row.lifetime_value,
                    row.total_orders,
                    row.total_spent,
                    row.validity.valid_from,
                    row.validity.valid_to,
                    row.is_current(),
                    now,
                    CRM_SOURCE,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Type-1 merge: insert new products, overwrite changed ones
    pub fn merge_products(&self, conn: &Connection) -> Result<ProductMergeOutcome> {
        let (staged, _) = staged_snapshot::<StagedProduct>(conn)?;
        let existing = load_products(conn)?;
        let now = timestamp_now();
        let mut outcome = ProductMergeOutcome::default();

        let tx = conn.unchecked_transaction()?;
        for record in &staged {
            let row = ProductDimension::from_staged(record);
            match existing.get(&row.product_id) {
                Some(current) if current.same_attributes(&row) => outcome.unchanged += 1,
                Some(_) => {
                    tx.execute(
                        "UPDATE dim_product
                         SET product_name = ?1, product_category = ?2, product_subcategory = ?3,
                             brand = ?4, unit_cost = ?5, retail_price = ?6, margin_percentage = ?7,
                             product_status = ?8, is_active = ?9, updated_date = ?10
                         WHERE product_id = ?11",
                        params![
                            row.product_name,
                            row.product_category,
                            row.product_subcategory,
                            row.brand,
                            row.unit_cost,
                            row.retail_price,
                            row.margin_percentage,
                            row.product_status,
                            row.is_active,
                            now,
                            row.product_id,
                        ],
                    )?;
                    outcome.updated += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO dim_product (
                            product_id, product_name, product_category, product_subcategory,
                            brand, unit_cost, retail_price, margin_percentage, product_status,
                            is_active, created_date, updated_date, source_system
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12)",
                        params![
                            row.product_id,
                            row.product_name,
                            row.product_category,
                            row.product_subcategory,
                            row.brand,
                            row.unit_cost,
                            row.retail_price,
                            row.margin_percentage,
                            row.product_status,
                            row.is_active,
                            now,
                            ECOMMERCE_SOURCE,
                        ],
                    )?;
                    outcome.inserted += 1;
                }
            }
        }
        tx.commit()?;

        info!(
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "✓ product dimension merged"
        );
        Ok(outcome)
    }

    /// Insert-only: campaigns already in the dimension are skipped
    pub fn merge_campaigns(&self, conn: &Connection) -> Result<CampaignMergeOutcome> {
        let (staged, _) = staged_snapshot::<StagedCampaign>(conn)?;
        let existing: HashSet<String> = {
            let mut stmt = conn.prepare("SELECT campaign_id FROM dim_campaign")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            ids
        };
        let now = timestamp_now();
        let mut outcome = CampaignMergeOutcome::default();

        let tx = conn.unchecked_transaction()?;
        for record in &staged {
            if existing.contains(&record.campaign_id) {
                outcome.skipped += 1;
                continue;
            }

            let row = CampaignDimension::from_staged(record);
            tx.execute(
                "INSERT INTO dim_campaign (
                    campaign_id, campaign_name, campaign_type, channel, start_date, end_date,
                    duration_days, budget, target_audience, campaign_status,
                    created_date, updated_date, source_system
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12)",
                params![
                    row.campaign_id,
                    row.campaign_name,
                    row.campaign_type,
                    row.channel,
                    row.start_date,
                    row.end_date,
                    row.duration_days,
                    row.budget,
                    row.target_audience,
                    row.campaign_status,
                    now,
                    MARKETING_SOURCE,
                ],
            )?;
            outcome.inserted += 1;
        }
        tx.commit()?;

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            "✓ campaign dimension merged"
        );
        Ok(outcome)
    }
}

// ============================================================================
// DIMENSION READS
// ============================================================================

const CUSTOMER_COLUMNS: &str = "customer_key, customer_id, first_name, last_name, full_name,
    email, phone_number, date_of_birth, age, age_group, gender, address, city, state,
    postal_code, country, registration_date, customer_segment, account_status,
    lifetime_value, total_orders, total_spent, valid_from, valid_to";

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, CustomerDimension)> {
    let customer_key: i64 = row.get("customer_key")?;
    Ok((
        customer_key,
        CustomerDimension {
            customer_key: Some(customer_key),
            customer_id: row.get("customer_id")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            full_name: row.get("full_name")?,
            contact: ContactAttributes {
                email: row.get("email")?,
                phone_number: row.get("phone_number")?,
            },
            date_of_birth: row.get("date_of_birth")?,
            age: row.get("age")?,
            age_group: row.get("age_group")?,
            gender: row.get("gender")?,
            tracked: TrackedAttributes {
                address: row.get("address")?,
                city: row.get("city")?,
                state: row.get("state")?,
                postal_code: row.get("postal_code")?,
                customer_segment: row.get("customer_segment")?,
            },
            country: row.get("country")?,
            registration_date: row.get("registration_date")?,
            account_status: row.get("account_status")?,
            lifetime_value: row.get("lifetime_value")?,
            total_orders: row.get("total_orders")?,
            total_spent: row.get("total_spent")?,
            validity: ValidityInterval::closed(row.get("valid_from")?, row.get("valid_to")?),
        },
    ))
}

pub fn load_current_customers(conn: &Connection) -> Result<CurrentCustomers> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM dim_customer WHERE is_current = 1"
    ))?;
    let rows = stmt
        .query_map([], customer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(key, row)| (row.customer_id.clone(), (key, row)))
        .collect())
}

/// Every version of one customer, oldest first
pub fn load_customer_versions(conn: &Connection, customer_id: &str) -> Result<Vec<CustomerDimension>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CUSTOMER_COLUMNS} FROM dim_customer
         WHERE customer_id = ?1
         ORDER BY valid_from, customer_key"
    ))?;
    let rows = stmt
        .query_map([customer_id], customer_from_row)?
        .map(|r| r.map(|(_, row)| row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Timeline violations across the whole customer dimension
pub fn customer_timeline_violations(
    conn: &Connection,
) -> Result<Vec<(String, TimelineViolation)>> {
    let mut stmt = conn.prepare(
        "SELECT customer_id, valid_from, valid_to FROM dim_customer ORDER BY customer_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                ValidityInterval::closed(row.get(1)?, row.get(2)?),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_customer: HashMap<String, Vec<ValidityInterval>> = HashMap::new();
    for (customer_id, interval) in rows {
        by_customer.entry(customer_id).or_default().push(interval);
    }

    let mut violations: Vec<(String, TimelineViolation)> = by_customer
        .into_iter()
        .flat_map(|(id, intervals)| {
            check_timeline(&intervals)
                .into_iter()
                .map(move |v| (id.clone(), v))
        })
        .collect();
    violations.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(violations)
}

fn load_products(conn: &Connection) -> Result<HashMap<String, ProductDimension>> {
    let mut stmt = conn.prepare(
        "SELECT product_key, product_id, product_name, product_category, product_subcategory,
                brand, unit_cost, retail_price, margin_percentage, product_status, is_active
         FROM dim_product",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ProductDimension {
                product_key: row.get(0)?,
                product_id: row.get(1)?,
                product_name: row.get(2)?,
                product_category: row.get(3)?,
                product_subcategory: row.get(4)?,
                brand: row.get(5)?,
                unit_cost: row.get(6)?,
                retail_price: row.get(7)?,
                margin_percentage: row.get(8)?,
                product_status: row.get(9)?,
                is_active: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|p| (p.product_id.clone(), p)).collect())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, setup_database, table_row_count};
    use crate::staging::stage_records;
    use crate::temporal::open_end;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn test_conn() -> Connection {
        let conn = open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn customer(id: &str, city: &str, state: &str, email: &str) -> StagedCustomer {
        StagedCustomer {
            customer_id: id.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: Some(email.to_string()),
            phone_number: Some("555-0100".to_string()),
            date_of_birth: Some(d("1985-07-20")),
            gender: Some("F".to_string()),
            address: Some("1 Main St".to_string()),
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            postal_code: Some("73301".to_string()),
            country: Some("USA".to_string()),
            registration_date: d("2022-01-01"),
            customer_segment: Some("Gold".to_string()),
            account_status: Some("Active".to_string()),
        }
    }

    fn merge(conn: &Connection, date: &str, records: &[StagedCustomer], load_id: i64) -> CustomerMergeOutcome {
        stage_records(conn, records, "crm_customers_test.csv", load_id).unwrap();
        DimensionMerger::new(d(date)).merge_customers(conn).unwrap()
    }

    #[test]
    fn test_new_customer_starts_at_registration_date() {
        let conn = test_conn();

        let outcome = merge(&conn, "2024-01-15", &[customer("CUST000001", "Austin", "TX", "a@x.com")], 1);

        assert_eq!(outcome.new_customers, 1);
        let versions = load_customer_versions(&conn, "CUST000001").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].validity.valid_from, d("2022-01-01"));
        assert_eq!(versions[0].validity.valid_to, open_end());
        assert!(versions[0].is_current());
        assert_eq!(versions[0].age, Some(38));
    }

    #[test]
    fn test_state_change_expires_and_versions() {
        let conn = test_conn();
        merge(&conn, "2024-01-15", &[customer("CUST000001", "Austin", "TX", "a@x.com")], 1);

        let outcome = merge(&conn, "2024-03-01", &[customer("CUST000001", "Austin", "CA", "a@x.com")], 2);

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.new_customers, 0);
        let versions = load_customer_versions(&conn, "CUST000001").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].validity, ValidityInterval::closed(d("2022-01-01"), d("2024-03-01")));
        assert!(!versions[0].is_current());
        assert_eq!(versions[1].validity, ValidityInterval::open(d("2024-03-01")));
        assert_eq!(versions[1].tracked.state.as_deref(), Some("CA"));
        assert!(customer_timeline_violations(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_city_change_is_one_expiry_and_one_insert() {
        let mut current = CurrentCustomers::new();
        let existing = CustomerDimension::from_staged(
            &customer("CUST000001", "Austin", "TX", "a@x.com"),
            ValidityInterval::open(d("2022-01-01")),
            d("2024-01-01"),
        );
        current.insert("CUST000001".to_string(), (7, existing));

        let plan = plan_customer_merge(
            &[customer("CUST000001", "Dallas", "TX", "a@x.com")],
            &current,
            d("2024-03-01"),
        );

        assert_eq!(plan.expiries.len(), 1);
        assert_eq!(plan.expiries[0].customer_key, 7);
        assert_eq!(plan.expiries[0].valid_to, d("2024-03-01"));
        assert_eq!(plan.new_versions.len(), 1);
        assert_eq!(plan.new_versions[0].validity.valid_from, d("2024-03-01"));
        assert!(plan.new_versions[0].is_current());
        assert!(plan.new_customers.is_empty());
        assert!(plan.contact_patches.is_empty());
    }

    #[test]
    fn test_email_only_change_patches_in_place() {
        let conn = test_conn();
        merge(&conn, "2024-01-15", &[customer("CUST000001", "Austin", "TX", "a@x.com")], 1);

        let outcome = merge(&conn, "2024-03-01", &[customer("CUST000001", "Austin", "TX", "new@x.com")], 2);

        assert_eq!(outcome.new_customers + outcome.updated, 0, "no new rows");
        assert_eq!(outcome.contact_patches, 1);
        assert_eq!(outcome.unchanged, 1);
        let versions = load_customer_versions(&conn, "CUST000001").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].contact.email.as_deref(), Some("new@x.com"));
    }

    #[test]
    fn test_combined_change_carries_latest_contact() {
        let conn = test_conn();
        merge(&conn, "2024-01-15", &[customer("CUST000001", "Austin", "TX", "a@x.com")], 1);

        merge(&conn, "2024-03-01", &[customer("CUST000001", "Dallas", "TX", "new@x.com")], 2);

        let versions = load_customer_versions(&conn, "CUST000001").unwrap();
        assert_eq!(versions[0].contact.email.as_deref(), Some("a@x.com"), "history keeps old contact");
        assert_eq!(versions[1].contact.email.as_deref(), Some("new@x.com"));
    }

    #[test]
    fn test_rerun_is_a_no_op() {
        let conn = test_conn();
        let records = [
            customer("CUST000001", "Austin", "TX", "a@x.com"),
            customer("CUST000002", "Boston", "MA", "b@x.com"),
        ];
        merge(&conn, "2024-01-15", &records, 1);

        let outcome = DimensionMerger::new(d("2024-01-16")).merge_customers(&conn).unwrap();

        assert_eq!(outcome.unchanged, 2);
        assert_eq!(outcome.contact_patches, 0);
        assert_eq!(table_row_count(&conn, "dim_customer").unwrap(), 2);
    }

    #[test]
    fn test_latest_staged_load_decides() {
        let conn = test_conn();
        stage_records(&conn, &[customer("CUST000001", "Austin", "TX", "a@x.com")], "a.csv", 1).unwrap();
        stage_records(&conn, &[customer("CUST000001", "Dallas", "TX", "a@x.com")], "b.csv", 2).unwrap();

        DimensionMerger::new(d("2024-01-15")).merge_customers(&conn).unwrap();

        let versions = load_customer_versions(&conn, "CUST000001").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].tracked.city.as_deref(), Some("Dallas"));
    }

    #[test]
    fn test_failed_expiry_rolls_back_whole_plan() {
        let conn = test_conn();
        let merger = DimensionMerger::new(d("2024-03-01"));
        let plan = CustomerMergePlan {
            new_customers: vec![CustomerDimension::from_staged(
                &customer("CUST000009", "Austin", "TX", "z@x.com"),
                ValidityInterval::open(d("2022-01-01")),
                d("2024-03-01"),
            )],
            expiries: vec![VersionExpiry {
                customer_key: 424242,
                customer_id: "CUST000404".to_string(),
                valid_to: d("2024-03-01"),
            }],
            ..CustomerMergePlan::default()
        };

        let result = merger.apply_customer_plan(&conn, &plan);

        assert!(matches!(result, Err(EtlError::ExpiryTargetMissing { .. })));
        assert_eq!(table_row_count(&conn, "dim_customer").unwrap(), 0);
    }

    #[test]
    fn test_at_most_one_current_row_after_repeated_changes() {
        let conn = test_conn();
        merge(&conn, "2024-01-01", &[customer("CUST000001", "Austin", "TX", "a@x.com")], 1);
        merge(&conn, "2024-02-01", &[customer("CUST000001", "Dallas", "TX", "a@x.com")], 2);
        merge(&conn, "2024-03-01", &[customer("CUST000001", "Houston", "TX", "a@x.com")], 3);

        let current: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM dim_customer WHERE customer_id = 'CUST000001' AND is_current = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(current, 1);
        assert_eq!(load_customer_versions(&conn, "CUST000001").unwrap().len(), 3);
        assert!(customer_timeline_violations(&conn).unwrap().is_empty());
    }

    fn product(id: &str, cost: f64, price: f64) -> StagedProduct {
        StagedProduct {
            product_id: id.to_string(),
            product_name: "Desk Lamp".to_string(),
            product_category: Some("Home".to_string()),
            product_subcategory: None,
            brand: Some("Lumen".to_string()),
            unit_cost: cost,
            retail_price: price,
            product_status: Some("Active".to_string()),
        }
    }

    #[test]
    fn test_product_type1_overwrite() {
        let conn = test_conn();
        let merger = DimensionMerger::new(d("2024-03-01"));
        stage_records(&conn, &[product("PROD00001", 60.0, 100.0), product("PROD00002", 5.0, 10.0)], "p.csv", 1).unwrap();
        let first = merger.merge_products(&conn).unwrap();

        stage_records(&conn, &[product("PROD00001", 70.0, 100.0)], "p.csv", 2).unwrap();
        let second = merger.merge_products(&conn).unwrap();

        assert_eq!(first, ProductMergeOutcome { inserted: 2, updated: 0, unchanged: 0 });
        assert_eq!(second, ProductMergeOutcome { inserted: 0, updated: 1, unchanged: 1 });
        let (margin, rows): (f64, i64) = conn
            .query_row(
                "SELECT margin_percentage, (SELECT COUNT(*) FROM dim_product)
                 FROM dim_product WHERE product_id = 'PROD00001'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(margin, 30.0);
        assert_eq!(rows, 2, "type 1 keeps one row per product");
    }

    #[test]
    fn test_campaigns_are_insert_only() {
        let conn = test_conn();
        let merger = DimensionMerger::new(d("2024-03-01"));
        let mut campaign = StagedCampaign {
            campaign_id: "CAMP0001".to_string(),
            campaign_name: "Spring Sale".to_string(),
            campaign_type: Some("Email".to_string()),
            channel: Some("Email".to_string()),
            start_date: d("2024-03-01"),
            end_date: d("2024-03-31"),
            budget: Some(5000.0),
            target_audience: None,
            campaign_status: Some("Active".to_string()),
        };
        stage_records(&conn, &[campaign.clone()], "c.csv", 1).unwrap();
        merger.merge_campaigns(&conn).unwrap();

        campaign.campaign_name = "Renamed".to_string();
        stage_records(&conn, &[campaign], "c.csv", 2).unwrap();
        let outcome = merger.merge_campaigns(&conn).unwrap();

        assert_eq!(outcome, CampaignMergeOutcome { inserted: 0, skipped: 1 });
        let (name, duration): (String, i64) = conn
            .query_row("SELECT campaign_name, duration_days FROM dim_campaign", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Spring Sale");
        assert_eq!(duration, 30);
    }
}
