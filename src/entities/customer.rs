// 👤 Customer Entity - CRM extract row and the SCD2 dimension row
//
// Attribute policy:
// - Tracked (Type 2): address, city, state, postal_code, segment → new version
// - Contact (Type 1): email, phone → overwritten in place

use crate::temporal::ValidityInterval;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// STAGED RECORD
// ============================================================================

/// One row of `crm_customers_*.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCustomer {
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub registration_date: NaiveDate,
    pub customer_segment: Option<String>,
    pub account_status: Option<String>,
}

impl StagedCustomer {
    pub fn tracked(&self) -> TrackedAttributes {
        TrackedAttributes {
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            postal_code: self.postal_code.clone(),
            customer_segment: self.customer_segment.clone(),
        }
    }

    pub fn contact(&self) -> ContactAttributes {
        ContactAttributes {
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
        }
    }
}

// ============================================================================
// ATTRIBUTE GROUPS
// ============================================================================

/// Type-2 attributes: any difference opens a new version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAttributes {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub customer_segment: Option<String>,
}

/// Type-1 attributes: overwritten on the existing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactAttributes {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

// ============================================================================
// DIMENSION ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerDimension {
    /// None until the row is inserted
    pub customer_key: Option<i64>,
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub contact: ContactAttributes,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<i32>,
    pub age_group: Option<String>,
    pub gender: Option<String>,
    pub tracked: TrackedAttributes,
    pub country: Option<String>,
    pub registration_date: NaiveDate,
    pub account_status: Option<String>,
    pub lifetime_value: f64,
    pub total_orders: i64,
    pub total_spent: f64,
    pub validity: ValidityInterval,
}

impl CustomerDimension {
    /// Fresh version built from a staged record; lifetime metrics start at zero
    pub fn from_staged(staged: &StagedCustomer, validity: ValidityInterval, as_of: NaiveDate) -> Self {
        let age = staged.date_of_birth.map(|dob| age_on(dob, as_of));

        CustomerDimension {
            customer_key: None,
            customer_id: staged.customer_id.clone(),
            first_name: staged.first_name.clone(),
            last_name: staged.last_name.clone(),
            full_name: format!("{} {}", staged.first_name, staged.last_name),
            contact: staged.contact(),
            date_of_birth: staged.date_of_birth,
            age,
            age_group: age.map(|a| age_group(a).to_string()),
            gender: staged.gender.clone(),
            tracked: staged.tracked(),
            country: staged.country.clone(),
            registration_date: staged.registration_date,
            account_status: staged.account_status.clone(),
            lifetime_value: 0.0,
            total_orders: 0,
            total_spent: 0.0,
            validity,
        }
    }

    pub fn is_current(&self) -> bool {
        self.validity.is_current()
    }
}

/// Whole years between `dob` and `as_of`
pub fn age_on(dob: NaiveDate, as_of: NaiveDate) -> i32 {
    let mut years = as_of.year() - dob.year();
    if (as_of.month(), as_of.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    years
}

pub fn age_group(age: i32) -> &'static str {
    match age {
        a if a < 25 => "18-25",
        a if a < 35 => "26-35",
        a if a < 45 => "36-45",
        a if a < 55 => "46-55",
        a if a < 65 => "56-65",
        _ => "65+",
    }
}
