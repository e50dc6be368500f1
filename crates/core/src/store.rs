//! In-memory reconciliation store.
//!
//! The storage layer owns referential integrity: cascade deletes and orphan
//! removal are enforced here, not by the entity types. The reconciliation
//! pass mirrors the periodic matching job that consumes persisted offers.

use std::collections::HashMap;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info};

use crate::entity::{
    Customer, CustomerId, Invoice, InvoiceId, InvoiceItem, InvoiceItemId, Offer, OfferItem,
    OfferItemId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown customer id {0}")]
    UnknownCustomer(CustomerId),

    #[error("unknown offer '{0}'")]
    UnknownOffer(String),

    #[error("unknown invoice id {0}")]
    UnknownInvoice(InvoiceId),

    #[error("duplicate item position {pos} for {parent}")]
    DuplicateItem { parent: String, pos: u32 },
}

/// Map-backed store for the customer/offer/invoice graph.
#[derive(Debug, Default)]
pub struct ReconciliationStore {
    customers: HashMap<CustomerId, Customer>,
    offers: HashMap<String, Offer>,
    offer_items: HashMap<OfferItemId, OfferItem>,
    invoices: HashMap<InvoiceId, Invoice>,
    invoice_items: HashMap<InvoiceItemId, InvoiceItem>,
    next_customer_id: CustomerId,
    next_invoice_id: InvoiceId,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Customers ─────────────────────────────────────────────

    /// Insert a customer, reusing an existing record when one matches on
    /// `(company_name, address_street)`.
    pub fn upsert_customer(&mut self, mut customer: Customer) -> CustomerId {
        if let Some(existing) =
            self.find_customer(&customer.company_name, &customer.address_street)
        {
            return existing.id;
        }
        self.next_customer_id += 1;
        customer.id = self.next_customer_id;
        let id = customer.id;
        self.customers.insert(id, customer);
        id
    }

    /// Deduplicating lookup by `(company_name, address_street)`.
    pub fn find_customer(&self, company_name: &str, address_street: &str) -> Option<&Customer> {
        self.customers
            .values()
            .find(|c| c.company_name == company_name && c.address_street == address_street)
    }

    pub fn customer(&self, id: CustomerId) -> Option<&Customer> {
        self.customers.get(&id)
    }

    /// Delete a customer and everything hanging off it: offers, invoices,
    /// and their items.
    pub fn delete_customer(&mut self, id: CustomerId) -> Result<(), StoreError> {
        if self.customers.remove(&id).is_none() {
            return Err(StoreError::UnknownCustomer(id));
        }
        let offer_numbers: Vec<String> = self
            .offers
            .values()
            .filter(|o| o.customer_id == id)
            .map(|o| o.offer_number.clone())
            .collect();
        for number in offer_numbers {
            let _ = self.delete_offer(&number);
        }
        let invoice_ids: Vec<InvoiceId> = self
            .invoices
            .values()
            .filter(|i| i.customer_id == id)
            .map(|i| i.id)
            .collect();
        for invoice_id in invoice_ids {
            let _ = self.delete_invoice(invoice_id);
        }
        Ok(())
    }

    // ── Offers ────────────────────────────────────────────────

    pub fn insert_offer(&mut self, offer: Offer) -> Result<(), StoreError> {
        if !self.customers.contains_key(&offer.customer_id) {
            return Err(StoreError::UnknownCustomer(offer.customer_id));
        }
        self.offers.insert(offer.offer_number.clone(), offer);
        Ok(())
    }

    pub fn offer(&self, offer_number: &str) -> Option<&Offer> {
        self.offers.get(offer_number)
    }

    pub fn add_offer_item(&mut self, item: OfferItem) -> Result<(), StoreError> {
        if !self.offers.contains_key(&item.id.offer_number) {
            return Err(StoreError::UnknownOffer(item.id.offer_number.clone()));
        }
        if self.offer_items.contains_key(&item.id) {
            return Err(StoreError::DuplicateItem {
                parent: item.id.offer_number.clone(),
                pos: item.id.pos_number,
            });
        }
        self.offer_items.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn offer_items(&self, offer_number: &str) -> Vec<&OfferItem> {
        self.offer_items
            .values()
            .filter(|i| i.id.offer_number == offer_number)
            .collect()
    }

    /// Delete an offer and its items; invoices that referenced it keep
    /// existing with the reference cleared.
    pub fn delete_offer(&mut self, offer_number: &str) -> Result<(), StoreError> {
        if self.offers.remove(offer_number).is_none() {
            return Err(StoreError::UnknownOffer(offer_number.to_string()));
        }
        self.offer_items
            .retain(|id, _| id.offer_number != offer_number);
        for invoice in self.invoices.values_mut() {
            if invoice.offer_number.as_deref() == Some(offer_number) {
                invoice.offer_number = None;
            }
        }
        Ok(())
    }

    // ── Invoices ──────────────────────────────────────────────

    /// Insert an invoice; the store assigns the id and the invoice starts
    /// pending reconciliation.
    pub fn insert_invoice(&mut self, mut invoice: Invoice) -> Result<InvoiceId, StoreError> {
        if !self.customers.contains_key(&invoice.customer_id) {
            return Err(StoreError::UnknownCustomer(invoice.customer_id));
        }
        self.next_invoice_id += 1;
        invoice.id = self.next_invoice_id;
        invoice.is_checked = None;
        invoice.is_valid = false;
        let id = invoice.id;
        self.invoices.insert(id, invoice);
        Ok(id)
    }

    pub fn invoice(&self, id: InvoiceId) -> Option<&Invoice> {
        self.invoices.get(&id)
    }

    pub fn add_invoice_item(&mut self, item: InvoiceItem) -> Result<(), StoreError> {
        if !self.invoices.contains_key(&item.id.invoice_id) {
            return Err(StoreError::UnknownInvoice(item.id.invoice_id));
        }
        if self.invoice_items.contains_key(&item.id) {
            return Err(StoreError::DuplicateItem {
                parent: format!("invoice {}", item.id.invoice_id),
                pos: item.id.pos_number,
            });
        }
        self.invoice_items.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn invoice_items(&self, invoice_id: InvoiceId) -> Vec<&InvoiceItem> {
        self.invoice_items
            .values()
            .filter(|i| i.id.invoice_id == invoice_id)
            .collect()
    }

    pub fn delete_invoice(&mut self, id: InvoiceId) -> Result<(), StoreError> {
        if self.invoices.remove(&id).is_none() {
            return Err(StoreError::UnknownInvoice(id));
        }
        self.invoice_items.retain(|item_id, _| item_id.invoice_id != id);
        Ok(())
    }

    /// Invoices still awaiting reconciliation.
    pub fn pending_invoices(&self) -> Vec<&Invoice> {
        self.invoices.values().filter(|i| i.is_pending()).collect()
    }

    // ── Reconciliation ────────────────────────────────────────

    /// Match pending invoices against their offers.
    ///
    /// Every invoice examined is stamped with `today`; `is_valid` is set
    /// only when the invoice total equals the offer value exactly. Invoices
    /// without an offer reference, or whose offer is missing, are skipped
    /// and stay pending. Returns the number of invoices examined.
    pub fn reconcile(&mut self, today: NaiveDate) -> usize {
        let mut examined = 0;
        let pending: Vec<InvoiceId> = self
            .invoices
            .values()
            .filter(|i| i.is_pending())
            .map(|i| i.id)
            .collect();

        for id in pending {
            let Some(offer_number) = self
                .invoices
                .get(&id)
                .and_then(|i| i.offer_number.clone())
            else {
                continue;
            };
            let Some(offer_value) = self.offers.get(&offer_number).map(|o| o.offer_value) else {
                info!(invoice = id, offer = %offer_number, "no offer found for invoice");
                continue;
            };

            if let Some(invoice) = self.invoices.get_mut(&id) {
                invoice.is_checked = Some(today);
                invoice.is_valid = invoice.invoice_total_sum == offer_value;
                debug!(
                    invoice = id,
                    offer = %offer_number,
                    valid = invoice.is_valid,
                    "invoice reconciled"
                );
                examined += 1;
            }
        }
        examined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn customer(name: &str, street: &str) -> Customer {
        Customer {
            id: 0,
            company_name: name.into(),
            address_street: street.into(),
            address_house_number: "12".into(),
            post_code: "83024".into(),
            city: "Rosenheim".into(),
            phone: "+49 8031 0".into(),
            mail: "info@example.com".into(),
        }
    }

    fn offer(number: &str, customer_id: CustomerId, value: Decimal) -> Offer {
        Offer {
            offer_number: number.into(),
            offer_date: date(2024, 1, 10),
            offer_valid_till: date(2024, 2, 10),
            offer_value: value,
            customer_id,
        }
    }

    fn invoice(number: &str, customer_id: CustomerId, total: Decimal, offer: Option<&str>) -> Invoice {
        Invoice::new(
            0,
            number,
            date(2024, 1, 20),
            total,
            customer_id,
            offer.map(String::from),
        )
    }

    #[test]
    fn customer_dedup_by_name_and_street() {
        let mut store = ReconciliationStore::new();
        let a = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        let b = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        let c = store.upsert_customer(customer("Muster GmbH", "Nebenstr."));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn reconcile_stamps_every_examined_invoice() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        store
            .insert_offer(offer("AN-1", cid, Decimal::new(10000, 2)))
            .unwrap();

        let matching = store
            .insert_invoice(invoice("RE-1", cid, Decimal::new(10000, 2), Some("AN-1")))
            .unwrap();
        let mismatching = store
            .insert_invoice(invoice("RE-2", cid, Decimal::new(9999, 2), Some("AN-1")))
            .unwrap();

        let today = date(2024, 3, 1);
        assert_eq!(store.reconcile(today), 2);

        let ok = store.invoice(matching).unwrap();
        assert_eq!(ok.is_checked, Some(today));
        assert!(ok.is_valid);

        let bad = store.invoice(mismatching).unwrap();
        assert_eq!(bad.is_checked, Some(today), "mismatches are stamped too");
        assert!(!bad.is_valid);
    }

    #[test]
    fn reconcile_skips_invoices_without_offer() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        let orphan = store
            .insert_invoice(invoice("RE-3", cid, Decimal::new(500, 0), None))
            .unwrap();
        let dangling = store
            .insert_invoice(invoice("RE-4", cid, Decimal::new(500, 0), Some("AN-404")))
            .unwrap();

        assert_eq!(store.reconcile(date(2024, 3, 1)), 0);
        assert!(store.invoice(orphan).unwrap().is_pending());
        assert!(store.invoice(dangling).unwrap().is_pending());
    }

    #[test]
    fn delete_offer_cascades_items_and_clears_references() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        store
            .insert_offer(offer("AN-1", cid, Decimal::new(100, 0)))
            .unwrap();
        store
            .add_offer_item(OfferItem {
                id: OfferItemId {
                    offer_number: "AN-1".into(),
                    pos_number: 1,
                },
                description: "Consulting".into(),
                amount: 2,
                price: Decimal::new(50, 0),
            })
            .unwrap();
        let iid = store
            .insert_invoice(invoice("RE-1", cid, Decimal::new(100, 0), Some("AN-1")))
            .unwrap();

        store.delete_offer("AN-1").unwrap();

        assert!(store.offer("AN-1").is_none());
        assert!(store.offer_items("AN-1").is_empty());
        assert_eq!(store.invoice(iid).unwrap().offer_number, None);
    }

    #[test]
    fn delete_customer_cascades_whole_graph() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        store
            .insert_offer(offer("AN-1", cid, Decimal::new(100, 0)))
            .unwrap();
        store
            .add_offer_item(OfferItem {
                id: OfferItemId {
                    offer_number: "AN-1".into(),
                    pos_number: 1,
                },
                description: "Consulting".into(),
                amount: 1,
                price: Decimal::new(100, 0),
            })
            .unwrap();
        let iid = store
            .insert_invoice(invoice("RE-1", cid, Decimal::new(100, 0), Some("AN-1")))
            .unwrap();
        store
            .add_invoice_item(InvoiceItem {
                id: InvoiceItemId {
                    invoice_id: iid,
                    pos_number: 1,
                },
                description: "Consulting".into(),
                amount: 1,
                price: Decimal::new(100, 0),
            })
            .unwrap();

        store.delete_customer(cid).unwrap();

        assert!(store.customer(cid).is_none());
        assert!(store.offer("AN-1").is_none());
        assert!(store.offer_items("AN-1").is_empty());
        assert!(store.invoice(iid).is_none());
        assert!(store.invoice_items(iid).is_empty());
    }

    #[test]
    fn duplicate_item_positions_rejected() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        store
            .insert_offer(offer("AN-1", cid, Decimal::new(100, 0)))
            .unwrap();

        let item = OfferItem {
            id: OfferItemId {
                offer_number: "AN-1".into(),
                pos_number: 1,
            },
            description: "Consulting".into(),
            amount: 1,
            price: Decimal::new(100, 0),
        };
        store.add_offer_item(item.clone()).unwrap();
        assert!(matches!(
            store.add_offer_item(item),
            Err(StoreError::DuplicateItem { .. })
        ));
    }

    #[test]
    fn orphaned_invoice_survives_offer_delete_but_not_customer_delete() {
        let mut store = ReconciliationStore::new();
        let cid = store.upsert_customer(customer("Muster GmbH", "Hauptstr."));
        let iid = store
            .insert_invoice(invoice("RE-1", cid, Decimal::new(100, 0), None))
            .unwrap();

        assert!(store.invoice(iid).is_some());
        store.delete_customer(cid).unwrap();
        assert!(store.invoice(iid).is_none());
    }
}
