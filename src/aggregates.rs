// 📊 Post-load steps - customer lifetime metrics and aggregate rebuilds
//
// Lifetime metrics on the current customer row cover every version of the
// customer. New versions start at zero, so this must run after fact
// resolution and before anything reads lifetime fields.

use crate::db::timestamp_now;
use crate::error::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub customers_updated: usize,
    pub customer_monthly_rows: usize,
    pub product_daily_rows: usize,
}

/// Recompute lifetime_value, total_spent and total_orders on current rows
pub fn update_customer_metrics(conn: &Connection) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE dim_customer AS c
         SET lifetime_value = m.revenue,
             total_spent = m.revenue,
             total_orders = m.orders,
             updated_date = ?1
         FROM (
             SELECT v.customer_id AS customer_id,
                    COUNT(DISTINCT f.transaction_id) AS orders,
                    COALESCE(SUM(f.net_amount), 0) AS revenue
             FROM fact_transactions f
             JOIN dim_customer v ON v.customer_key = f.customer_key
             GROUP BY v.customer_id
         ) AS m
         WHERE c.customer_id = m.customer_id
           AND c.is_current = 1",
        params![timestamp_now()],
    )?;

    info!(customers = updated, "✓ customer metrics updated");
    Ok(updated)
}

/// Truncate and reload agg_customer_monthly from fact_transactions
pub fn rebuild_customer_monthly(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM agg_customer_monthly", [])?;
    let inserted = tx.execute(
        "INSERT INTO agg_customer_monthly (
            customer_key, year_month, total_transactions, total_quantity, total_amount,
            total_discount, avg_transaction_value, month_start_date, month_end_date, created_date
         )
         SELECT f.customer_key,
                d.year_number * 100 + d.month_number,
                COUNT(DISTINCT f.transaction_id),
                SUM(f.quantity),
                SUM(f.net_amount),
                SUM(f.discount_amount),
                AVG(f.net_amount),
                d.month_start_date,
                d.month_end_date,
                ?1
         FROM fact_transactions f
         JOIN dim_date d ON f.transaction_date_key = d.date_key
         GROUP BY f.customer_key, d.year_number, d.month_number,
                  d.month_start_date, d.month_end_date",
        params![timestamp_now()],
    )?;
    tx.commit()?;

    info!(rows = inserted, "✓ customer monthly aggregates built");
    Ok(inserted)
}

/// Truncate and reload agg_product_daily from fact_transactions
pub fn rebuild_product_daily(conn: &Connection) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM agg_product_daily", [])?;
    let inserted = tx.execute(
        "INSERT INTO agg_product_daily (
            product_key, date_key, units_sold, total_revenue, total_cost, total_profit,
            unique_customers, created_date
         )
         SELECT f.product_key,
                f.transaction_date_key,
                SUM(f.quantity),
                SUM(f.net_amount),
                SUM(f.quantity * p.unit_cost),
                SUM(f.net_amount - f.quantity * p.unit_cost),
                COUNT(DISTINCT f.customer_key),
                ?1
         FROM fact_transactions f
         JOIN dim_product p ON f.product_key = p.product_key
         GROUP BY f.product_key, f.transaction_date_key",
        params![timestamp_now()],
    )?;
    tx.commit()?;

    info!(rows = inserted, "✓ product daily aggregates built");
    Ok(inserted)
}

/// Metrics first, then both aggregate tables
pub fn run_post_load(conn: &Connection) -> Result<AggregateSummary> {
    Ok(AggregateSummary {
        customers_updated: update_customer_metrics(conn)?,
        customer_monthly_rows: rebuild_customer_monthly(conn)?,
        product_daily_rows: rebuild_product_daily(conn)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, populate_date_dimension, setup_database};

    fn warehouse() -> Connection {
        let conn = open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        populate_date_dimension(&conn, 2024, 2024).unwrap();

        conn.execute_batch(
            "INSERT INTO dim_customer (customer_key, customer_id, first_name, last_name, full_name,
                registration_date, valid_from, valid_to, is_current, created_date, updated_date, source_system)
             VALUES
                (1, 'CUST000001', 'Ada', 'L', 'Ada L', '2022-01-01', '2022-01-01', '2024-03-01', 0, 'x', 'x', 'CRM'),
                (2, 'CUST000001', 'Ada', 'L', 'Ada L', '2022-01-01', '2024-03-01', '9999-12-31', 1, 'x', 'x', 'CRM'),
                (3, 'CUST000002', 'Bob', 'M', 'Bob M', '2023-01-01', '2023-01-01', '9999-12-31', 1, 'x', 'x', 'CRM');

             INSERT INTO dim_product (product_key, product_id, product_name, unit_cost, retail_price,
                is_active, created_date, updated_date, source_system)
             VALUES (10, 'PROD00001', 'Lamp', 20.0, 50.0, 1, 'x', 'x', 'E-COMMERCE');

             INSERT INTO fact_transactions (customer_key, product_key, transaction_date_key,
                transaction_id, transaction_item_id, quantity, unit_price, line_total,
                discount_amount, tax_amount, shipping_amount, net_amount, created_date, source_system)
             VALUES
                (1, 10, 20240210, 'TXN1', 'ITEM1', 1, 50.0, 50.0, 0.0, 0.0, 0.0, 50.0, 'x', 'E-COMMERCE'),
                (2, 10, 20240305, 'TXN2', 'ITEM2', 2, 50.0, 100.0, 10.0, 0.0, 0.0, 90.0, 'x', 'E-COMMERCE'),
                (2, 10, 20240305, 'TXN2', 'ITEM3', 1, 50.0, 50.0, 0.0, 0.0, 0.0, 50.0, 'x', 'E-COMMERCE');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_metrics_span_all_versions_of_a_customer() {
        let conn = warehouse();

        let updated = update_customer_metrics(&conn).unwrap();

        assert_eq!(updated, 1, "only the current row of a customer with facts");
        let (ltv, orders): (f64, i64) = conn
            .query_row(
                "SELECT lifetime_value, total_orders FROM dim_customer WHERE customer_key = 2",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(ltv, 190.0);
        assert_eq!(orders, 2);

        let historical: f64 = conn
            .query_row("SELECT lifetime_value FROM dim_customer WHERE customer_key = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(historical, 0.0);
    }

    #[test]
    fn test_customer_monthly_rebuild() {
        let conn = warehouse();

        let first = rebuild_customer_monthly(&conn).unwrap();
        let second = rebuild_customer_monthly(&conn).unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 2, "rebuild replaces, never accumulates");
        let (txns, amount, start, end): (i64, f64, String, String) = conn
            .query_row(
                "SELECT total_transactions, total_amount, month_start_date, month_end_date
                 FROM agg_customer_monthly WHERE customer_key = 2 AND year_month = 202403",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(txns, 1);
        assert_eq!(amount, 140.0);
        assert_eq!(start, "2024-03-01");
        assert_eq!(end, "2024-03-31");
    }

    #[test]
    fn test_product_daily_rebuild() {
        let conn = warehouse();

        let summary = run_post_load(&conn).unwrap();

        assert_eq!(summary.product_daily_rows, 2);
        let (units, cost, profit): (i64, f64, f64) = conn
            .query_row(
                "SELECT units_sold, total_cost, total_profit
                 FROM agg_product_daily WHERE date_key = 20240305",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(units, 3);
        assert_eq!(cost, 60.0);
        assert_eq!(profit, 80.0);
    }
}
