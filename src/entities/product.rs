// 📦 Product Entity - catalog extract row and the Type-1 dimension row

use serde::{Deserialize, Serialize};

/// One row of `products_*.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedProduct {
    pub product_id: String,
    pub product_name: String,
    pub product_category: Option<String>,
    pub product_subcategory: Option<String>,
    pub brand: Option<String>,
    pub unit_cost: f64,
    pub retail_price: f64,
    pub product_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDimension {
    pub product_key: Option<i64>,
    pub product_id: String,
    pub product_name: String,
    pub product_category: Option<String>,
    pub product_subcategory: Option<String>,
    pub brand: Option<String>,
    pub unit_cost: f64,
    pub retail_price: f64,
    pub margin_percentage: Option<f64>,
    pub product_status: Option<String>,
    pub is_active: bool,
}

impl ProductDimension {
    pub fn from_staged(staged: &StagedProduct) -> Self {
        ProductDimension {
            product_key: None,
            product_id: staged.product_id.clone(),
            product_name: staged.product_name.clone(),
            product_category: staged.product_category.clone(),
            product_subcategory: staged.product_subcategory.clone(),
            brand: staged.brand.clone(),
            unit_cost: staged.unit_cost,
            retail_price: staged.retail_price,
            margin_percentage: margin_percentage(staged.unit_cost, staged.retail_price),
            product_status: staged.product_status.clone(),
            is_active: staged.product_status.as_deref() == Some("Active"),
        }
    }

    /// Attribute equality ignoring the surrogate key
    pub fn same_attributes(&self, other: &ProductDimension) -> bool {
        ProductDimension {
            product_key: None,
            ..self.clone()
        } == ProductDimension {
            product_key: None,
            ..other.clone()
        }
    }
}

/// `(retail - cost) / retail * 100`, two decimals; None for a zero price
pub fn margin_percentage(unit_cost: f64, retail_price: f64) -> Option<f64> {
    if retail_price == 0.0 {
        return None;
    }
    let margin = (retail_price - unit_cost) / retail_price * 100.0;
    Some((margin * 100.0).round() / 100.0)
}
