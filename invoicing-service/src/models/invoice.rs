//! Invoice model for invoicing-service.

use super::status::{InvoiceLifecycle, PaymentStatus};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Invoice document with its stored totals.
///
/// `total_ht`, `total_tva` and `total_ttc` are persisted, never derived on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub name: String,
    pub issuer_name: String,
    pub issuer_address: String,
    pub client_name: String,
    pub client_address: String,
    pub client_email: String,
    pub client_phone: String,
    pub notes: Option<String>,
    pub category_id: Option<Uuid>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub sent_at: Option<DateTime<Utc>>,
    pub vat_active: bool,
    pub vat_rate: Decimal,
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
    pub lifecycle: InvoiceLifecycle,
    pub payment_status: PaymentStatus,
    pub user_id: String,
    pub last_notice_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Whitespace-only addresses count as missing.
    pub fn has_client_email(&self) -> bool {
        !self.client_email.trim().is_empty()
    }
}

/// Invoice line item. Ordered by `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub position: i32,
}

impl InvoiceLine {
    pub fn amount(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Invoice row ready to be inserted. The number is allocated by the store.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: Uuid,
    pub name: String,
    pub issuer_name: String,
    pub issuer_address: String,
    pub client_name: String,
    pub client_address: String,
    pub client_email: String,
    pub client_phone: String,
    pub notes: Option<String>,
    pub category_id: Option<Uuid>,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub vat_active: bool,
    pub vat_rate: Decimal,
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
    pub lifecycle: InvoiceLifecycle,
    pub payment_status: PaymentStatus,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl NewInvoice {
    /// Materialise the stored row once a number has been allocated.
    pub fn into_invoice(self, invoice_number: String) -> Invoice {
        Invoice {
            id: self.id,
            invoice_number,
            name: self.name,
            issuer_name: self.issuer_name,
            issuer_address: self.issuer_address,
            client_name: self.client_name,
            client_address: self.client_address,
            client_email: self.client_email,
            client_phone: self.client_phone,
            notes: self.notes,
            category_id: self.category_id,
            invoice_date: self.invoice_date,
            due_date: self.due_date,
            sent_at: None,
            vat_active: self.vat_active,
            vat_rate: self.vat_rate,
            total_ht: self.total_ht,
            total_tva: self.total_tva,
            total_ttc: self.total_ttc,
            lifecycle: self.lifecycle,
            payment_status: self.payment_status,
            user_id: self.user_id,
            last_notice_on: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Line as submitted by an editor; ids and positions are assigned on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, validator::Validate)]
pub struct LineInput {
    #[validate(custom(function = "crate::lifecycle::totals::not_blank"))]
    pub description: String,
    #[validate(custom(function = "crate::lifecycle::totals::non_negative"))]
    pub quantity: Decimal,
    #[validate(custom(function = "crate::lifecycle::totals::non_negative"))]
    pub unit_price: Decimal,
}

impl LineInput {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    pub(crate) fn into_line(self, invoice_id: Uuid, position: i32) -> InvoiceLine {
        InvoiceLine {
            id: Uuid::new_v4(),
            invoice_id,
            description: self.description.trim().to_string(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            position,
        }
    }
}

/// Partial update of the commercial fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoicePatch {
    pub name: Option<String>,
    pub issuer_name: Option<String>,
    pub issuer_address: Option<String>,
    pub client_name: Option<String>,
    pub client_address: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub notes: Option<String>,
    pub category_id: Option<Uuid>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vat_active: Option<bool>,
    pub vat_rate: Option<Decimal>,
}

impl InvoicePatch {
    pub fn apply(&self, invoice: &mut Invoice) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut invoice.name, &self.name);
        set(&mut invoice.issuer_name, &self.issuer_name);
        set(&mut invoice.issuer_address, &self.issuer_address);
        set(&mut invoice.client_name, &self.client_name);
        set(&mut invoice.client_address, &self.client_address);
        set(&mut invoice.client_email, &self.client_email);
        set(&mut invoice.client_phone, &self.client_phone);
        set(&mut invoice.invoice_date, &self.invoice_date);
        set(&mut invoice.due_date, &self.due_date);
        set(&mut invoice.vat_active, &self.vat_active);
        set(&mut invoice.vat_rate, &self.vat_rate);
        if self.notes.is_some() {
            invoice.notes = self.notes.clone().filter(|n| !n.trim().is_empty());
        }
        if self.category_id.is_some() {
            invoice.category_id = self.category_id;
        }
    }
}

/// Invoice together with its lines and category name.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub category_name: Option<String>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub user_id: Option<String>,
    pub lifecycle: Option<InvoiceLifecycle>,
    pub payment_status: Option<PaymentStatus>,
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
}

impl InvoiceFilter {
    /// In-process predicate mirroring the SQL `WHERE` clause.
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if let Some(user_id) = &self.user_id {
            if &invoice.user_id != user_id {
                return false;
            }
        }
        if self.lifecycle.is_some_and(|l| l != invoice.lifecycle) {
            return false;
        }
        if self.payment_status.is_some_and(|p| p != invoice.payment_status) {
            return false;
        }
        if self.category_id.is_some() && self.category_id != invoice.category_id {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                [
                    &invoice.invoice_number,
                    &invoice.name,
                    &invoice.client_name,
                    &invoice.client_email,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
            }
        }
    }
}

/// Dashboard figures, scoped to one client or to everyone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceStats {
    pub total_invoices: i64,
    pub paid_invoices: i64,
    pub pending_invoices: i64,
    pub overdue_invoices: i64,
    pub total_revenue: Decimal,
    pub outstanding_amount: Decimal,
    pub invoices_this_month: i64,
    pub invoices_last_month: i64,
}

impl InvoiceStats {
    /// Fold invoices into stats. `month_start` is the first day of the current month.
    pub fn collect<'a>(
        invoices: impl IntoIterator<Item = &'a Invoice>,
        month_start: NaiveDate,
        last_month_start: NaiveDate,
    ) -> Self {
        let mut stats = InvoiceStats::default();
        for invoice in invoices {
            stats.total_invoices += 1;
            match invoice.payment_status {
                PaymentStatus::Paid => {
                    stats.paid_invoices += 1;
                    stats.total_revenue += invoice.total_ttc;
                }
                PaymentStatus::Overdue => stats.overdue_invoices += 1,
                _ => {}
            }
            if invoice.lifecycle == InvoiceLifecycle::Sent
                && invoice.payment_status.is_outstanding()
            {
                stats.pending_invoices += 1;
                stats.outstanding_amount += invoice.total_ttc;
            }
            let created = invoice.created_at.date_naive();
            if created >= month_start {
                stats.invoices_this_month += 1;
            } else if created >= last_month_start {
                stats.invoices_last_month += 1;
            }
        }
        stats
    }
}
