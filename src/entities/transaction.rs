// 🧾 Transaction Entity - order headers, line items, and the two fact rows

use crate::entities::campaign::ResponseType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of `ecom_transactions_*.csv` (order header)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTransaction {
    pub transaction_id: String,
    pub customer_id: String,
    pub transaction_date: String,
    pub order_number: Option<String>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub shipping_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub currency_code: Option<String>,
}

/// One row of `ecom_transaction_items_*.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTransactionItem {
    pub transaction_item_id: String,
    pub transaction_id: String,
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
    pub discount_amount: Option<f64>,
}

/// Header joined to one of its items: the fact grain before key resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionLine {
    pub transaction_id: String,
    pub transaction_item_id: String,
    pub customer_id: String,
    pub product_id: String,
    pub transaction_date: NaiveDate,
    pub order_number: Option<String>,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub currency_code: Option<String>,
    pub tax_amount: f64,
    pub shipping_amount: f64,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
    pub discount_amount: f64,
}

// ============================================================================
// FACT ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFact {
    pub customer_key: i64,
    pub product_key: i64,
    pub transaction_date_key: i32,
    pub transaction_id: String,
    pub transaction_item_id: String,
    pub order_number: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub line_total: f64,
    pub discount_amount: f64,
    pub tax_amount: f64,
    pub shipping_amount: f64,
    pub net_amount: f64,
    pub payment_method: Option<String>,
    pub payment_status: Option<String>,
    pub currency_code: Option<String>,
}

impl TransactionFact {
    /// Build the fact for a resolved line; `net_amount` is always recomputed
    pub fn from_line(
        line: &TransactionLine,
        customer_key: i64,
        product_key: i64,
        transaction_date_key: i32,
    ) -> Self {
        TransactionFact {
            customer_key,
            product_key,
            transaction_date_key,
            transaction_id: line.transaction_id.clone(),
            transaction_item_id: line.transaction_item_id.clone(),
            order_number: line.order_number.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
            discount_amount: line.discount_amount,
            tax_amount: line.tax_amount,
            shipping_amount: line.shipping_amount,
            net_amount: line.line_total - line.discount_amount,
            payment_method: line.payment_method.clone(),
            payment_status: line.payment_status.clone(),
            currency_code: line.currency_code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignResponseFact {
    pub customer_key: i64,
    pub campaign_key: i64,
    pub response_date_key: i32,
    pub response_id: String,
    pub response_type: ResponseType,
    pub conversion_value: f64,
    pub is_opened: bool,
    pub is_clicked: bool,
    pub is_converted: bool,
}

impl CampaignResponseFact {
    pub fn new(
        response_id: &str,
        response_type: ResponseType,
        conversion_value: Option<f64>,
        customer_key: i64,
        campaign_key: i64,
        response_date_key: i32,
    ) -> Self {
        let (is_opened, is_clicked, is_converted) = response_type.flags();
        CampaignResponseFact {
            customer_key,
            campaign_key,
            response_date_key,
            response_id: response_id.to_string(),
            response_type,
            conversion_value: conversion_value.unwrap_or(0.0),
            is_opened,
            is_clicked,
            is_converted,
        }
    }
}
