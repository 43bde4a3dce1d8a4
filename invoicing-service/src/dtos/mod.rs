//! Request and response bodies of the HTTP API.

use crate::lifecycle::{DisplayStatus, TransitionEffect};
use crate::models::{
    Invoice, InvoiceDetail, InvoiceLifecycle, InvoicePatch, LegacyInvoiceStatus, LineInput,
    PaymentStatus, Role,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Empty invoice for an existing client, identified by id or email.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuickInvoiceRequest {
    pub client_id: Option<String>,
    pub client_email: Option<String>,
    #[validate(custom(function = "crate::lifecycle::totals::not_blank"))]
    pub name: String,
}

/// Complete invoice with lines, as filled in the "new invoice" form.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FullInvoiceRequest {
    /// Owning client. Defaults to the caller.
    pub user_id: Option<String>,
    #[validate(custom(function = "crate::lifecycle::totals::not_blank"))]
    pub name: String,
    #[serde(default)]
    pub issuer_name: String,
    #[serde(default)]
    pub issuer_address: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_address: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub client_phone: String,
    pub notes: Option<String>,
    pub category_id: Option<Uuid>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub vat_active: bool,
    pub vat_rate: Option<Decimal>,
    pub lifecycle: Option<InvoiceLifecycle>,
    pub payment_status: Option<PaymentStatus>,
    /// Single-field status from imported records. Each axis given explicitly
    /// above takes precedence.
    pub status: Option<LegacyInvoiceStatus>,
    #[serde(default)]
    pub lines: Vec<LineInput>,
}

/// Edit of commercial fields, lines and optionally statuses, saved together.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateInvoiceRequest {
    #[serde(flatten)]
    pub patch: InvoicePatch,
    /// Full replacement list. Absent keeps the stored lines.
    pub lines: Option<Vec<LineInput>>,
    pub lifecycle: Option<InvoiceLifecycle>,
    pub payment_status: Option<PaymentStatus>,
    pub status: Option<LegacyInvoiceStatus>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusChangeRequest {
    pub lifecycle: Option<InvoiceLifecycle>,
    pub payment_status: Option<PaymentStatus>,
    /// Single-field status, split onto the axes left out.
    pub status: Option<LegacyInvoiceStatus>,
    /// Bypass the strict transition table.
    #[serde(default)]
    pub force: bool,
}

/// Invoice with lines and its derived display status.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub detail: InvoiceDetail,
    pub display_status: DisplayStatus,
}

impl From<InvoiceDetail> for InvoiceView {
    fn from(detail: InvoiceDetail) -> Self {
        let display_status =
            crate::lifecycle::display_status(detail.invoice.lifecycle, detail.invoice.payment_status);
        Self {
            detail,
            display_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceListItem {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub display_status: DisplayStatus,
}

impl From<Invoice> for InvoiceListItem {
    fn from(invoice: Invoice) -> Self {
        let display_status =
            crate::lifecycle::display_status(invoice.lifecycle, invoice.payment_status);
        Self {
            invoice,
            display_status,
        }
    }
}

/// Result of a save that may have changed statuses.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceOutcome {
    pub invoice: InvoiceView,
    /// Notifications queued by the change.
    pub scheduled: Vec<TransitionEffect>,
}

/// One invoice handled by a scheduled scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_overdue: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub success: bool,
    pub message: String,
    pub date: NaiveDate,
    /// Invoices matching the selection, before the notice-day filter.
    pub candidates: usize,
    pub results: Vec<ScanResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationRequest {
    /// Required for admins opening a thread with a client; ignored for clients.
    pub client_id: Option<String>,
    pub invoice_id: Option<Uuid>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}
