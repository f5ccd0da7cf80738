// Entity Models - typed rows for staging extracts and warehouse tables
//
// Each entity has:
// - A staged record (one CSV row, source business columns only)
// - A warehouse row (surrogate key + derived attributes)

pub mod calendar;
pub mod campaign;
pub mod customer;
pub mod product;
pub mod transaction;

pub use calendar::CalendarDay;
pub use campaign::{CampaignDimension, ResponseType, StagedCampaign, StagedResponse};
pub use customer::{
    age_group, age_on, ContactAttributes, CustomerDimension, StagedCustomer, TrackedAttributes,
};
pub use product::{margin_percentage, ProductDimension, StagedProduct};
pub use transaction::{
    CampaignResponseFact, StagedTransaction, StagedTransactionItem, TransactionFact,
    TransactionLine,
};
