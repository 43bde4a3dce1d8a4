//! PDF export.
//!
//! Rendering is delegated to an external service; this module only builds the
//! data projection of an invoice and ships it there.

use super::providers::ProviderError;
use crate::lifecycle::{display_status, DisplayStatus};
use crate::models::{Invoice, InvoiceLine};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Everything the renderer prints. Plain data, no behaviour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePdfData {
    pub invoice_number: String,
    pub name: String,
    pub issuer_name: String,
    pub issuer_address: String,
    pub client_name: String,
    pub client_address: String,
    pub client_email: String,
    pub client_phone: String,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub notes: Option<String>,
    pub category_name: Option<String>,
    pub lines: Vec<PdfLine>,
    pub vat_active: bool,
    pub vat_rate: Decimal,
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
    pub status: DisplayStatus,
}

impl InvoicePdfData {
    pub fn new(invoice: &Invoice, lines: &[InvoiceLine], category_name: Option<String>) -> Self {
        Self {
            invoice_number: invoice.invoice_number.clone(),
            name: invoice.name.clone(),
            issuer_name: invoice.issuer_name.clone(),
            issuer_address: invoice.issuer_address.clone(),
            client_name: invoice.client_name.clone(),
            client_address: invoice.client_address.clone(),
            client_email: invoice.client_email.clone(),
            client_phone: invoice.client_phone.clone(),
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
            notes: invoice.notes.clone(),
            category_name,
            lines: lines
                .iter()
                .map(|line| PdfLine {
                    description: line.description.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    amount: line.amount(),
                })
                .collect(),
            vat_active: invoice.vat_active,
            vat_rate: invoice.vat_rate,
            total_ht: invoice.total_ht,
            total_tva: invoice.total_tva,
            total_ttc: invoice.total_ttc,
            status: display_status(invoice.lifecycle, invoice.payment_status),
        }
    }

    /// `inline; filename="INV-2025-00001.pdf"`
    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"{}.pdf\"", self.invoice_number)
    }
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, data: &InvoicePdfData) -> Result<Vec<u8>, ProviderError>;
}

/// POSTs the projection as JSON and returns the response body.
pub struct HttpPdfRenderer {
    client: Client,
    url: String,
}

impl HttpPdfRenderer {
    pub fn new(url: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl PdfRenderer for HttpPdfRenderer {
    async fn render(&self, data: &InvoicePdfData) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .post(&self.url)
            .header("accept", "application/pdf")
            .json(data)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("PDF renderer unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::SendFailed(format!(
                "PDF renderer returned {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::SendFailed(format!("PDF body unreadable: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

/// Used when `PDF_RENDERER_URL` is not set.
#[derive(Debug, Default)]
pub struct DisabledPdfRenderer;

#[async_trait]
impl PdfRenderer for DisabledPdfRenderer {
    async fn render(&self, _data: &InvoicePdfData) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::NotEnabled(
            "PDF renderer is not configured".to_string(),
        ))
    }
}

/// Returns a minimal document naming the invoice and keeps the projections it saw.
#[derive(Debug, Default)]
pub struct StaticPdfRenderer {
    rendered: Mutex<Vec<InvoicePdfData>>,
}

impl StaticPdfRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<InvoicePdfData> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PdfRenderer for StaticPdfRenderer {
    async fn render(&self, data: &InvoicePdfData) -> Result<Vec<u8>, ProviderError> {
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(data.clone());
        }
        Ok(format!("%PDF-1.4\n% {}\n%%EOF\n", data.invoice_number).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::transitions::tests::invoice;
    use crate::lifecycle::Tone;
    use crate::models::{InvoiceLifecycle, PaymentStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn projection_carries_lines_and_display_status() {
        let mut inv = invoice(InvoiceLifecycle::Sent, PaymentStatus::Paid);
        inv.invoice_number = "INV-2025-00042".into();
        let lines = vec![InvoiceLine {
            id: Uuid::new_v4(),
            invoice_id: inv.id,
            description: "Audit".into(),
            quantity: dec!(2),
            unit_price: dec!(50),
            position: 0,
        }];

        let data = InvoicePdfData::new(&inv, &lines, Some("Conseil".into()));

        assert_eq!(data.lines[0].amount, dec!(100));
        assert_eq!(data.status.tone, Tone::Green);
        assert_eq!(data.category_name.as_deref(), Some("Conseil"));
        assert_eq!(
            data.content_disposition(),
            "inline; filename=\"INV-2025-00042.pdf\""
        );
    }
}
