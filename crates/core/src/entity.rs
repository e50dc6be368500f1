//! Reconciliation entity model.
//!
//! The structured record a later stage populates from persisted offer
//! artifacts. The pipeline itself never touches these; they define the sink
//! schema the artifacts must remain consumable by.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type CustomerId = u64;
pub type InvoiceId = u64;

/// A customer record. Deduplicated on read by `(company_name, address_street)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub company_name: String,
    pub address_street: String,
    pub address_house_number: String,
    pub post_code: String,
    pub city: String,
    pub phone: String,
    pub mail: String,
}

/// Composite key of an offer line item. Unique and immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferItemId {
    pub offer_number: String,
    pub pos_number: u32,
}

/// A priced proposal sent to a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_number: String,
    pub offer_date: NaiveDate,
    pub offer_valid_till: NaiveDate,
    pub offer_value: Decimal,
    pub customer_id: CustomerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferItem {
    pub id: OfferItemId,
    pub description: String,
    pub amount: u32,
    pub price: Decimal,
}

/// Composite key of an invoice line item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceItemId {
    pub invoice_id: InvoiceId,
    pub pos_number: u32,
}

/// A billing document, optionally linked to its originating offer.
///
/// `is_checked == None` marks the invoice as pending reconciliation;
/// `is_valid` becomes true only after a successful match against the offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub invoice_total_sum: Decimal,
    pub is_checked: Option<NaiveDate>,
    pub is_valid: bool,
    pub customer_id: CustomerId,
    pub offer_number: Option<String>,
}

impl Invoice {
    /// A freshly constructed invoice is always pending reconciliation.
    pub fn new(
        id: InvoiceId,
        invoice_number: impl Into<String>,
        invoice_date: NaiveDate,
        invoice_total_sum: Decimal,
        customer_id: CustomerId,
        offer_number: Option<String>,
    ) -> Self {
        Self {
            id,
            invoice_number: invoice_number.into(),
            invoice_date,
            invoice_total_sum,
            is_checked: None,
            is_valid: false,
            customer_id,
            offer_number,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.is_checked.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: InvoiceItemId,
    pub description: String,
    pub amount: u32,
    pub price: Decimal,
}
