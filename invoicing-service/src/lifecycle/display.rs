//! Single user-facing status derived from both axes. Never persisted.

use crate::models::{InvoiceLifecycle, PaymentStatus};
use serde::Serialize;

/// Semantic color token; the UI maps it onto its palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Slate,
    Cyan,
    Blue,
    Gray,
    Yellow,
    Orange,
    Green,
    Red,
    Purple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayStatus {
    pub label: &'static str,
    pub tone: Tone,
}

pub fn lifecycle_display(lifecycle: InvoiceLifecycle) -> DisplayStatus {
    let (label, tone) = match lifecycle {
        InvoiceLifecycle::Draft => ("Brouillon", Tone::Slate),
        InvoiceLifecycle::Approved => ("Approuvée", Tone::Cyan),
        InvoiceLifecycle::Sent => ("Envoyée", Tone::Blue),
        InvoiceLifecycle::Closed => ("Clôturée", Tone::Gray),
    };
    DisplayStatus { label, tone }
}

pub fn payment_display(status: PaymentStatus) -> DisplayStatus {
    let (label, tone) = match status {
        PaymentStatus::Pending => ("En attente", Tone::Yellow),
        PaymentStatus::Partial => ("Paiement partiel", Tone::Orange),
        PaymentStatus::Processing => ("En traitement", Tone::Blue),
        PaymentStatus::Paid => ("Payée", Tone::Green),
        PaymentStatus::Overdue => ("En retard", Tone::Red),
        PaymentStatus::Cancelled => ("Annulée", Tone::Gray),
        PaymentStatus::Refunded => ("Remboursée", Tone::Purple),
        PaymentStatus::Rejected => ("Contestée", Tone::Red),
    };
    DisplayStatus { label, tone }
}

/// Payment state once the invoice is issued, document state before.
pub fn display_status(lifecycle: InvoiceLifecycle, payment: PaymentStatus) -> DisplayStatus {
    if lifecycle.is_issued() {
        payment_display(payment)
    } else {
        lifecycle_display(lifecycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsent_invoices_show_lifecycle() {
        let shown = display_status(InvoiceLifecycle::Draft, PaymentStatus::Paid);
        assert_eq!(shown.label, "Brouillon");
        assert_eq!(
            display_status(InvoiceLifecycle::Approved, PaymentStatus::Overdue).tone,
            Tone::Cyan
        );
    }

    #[test]
    fn issued_invoices_show_payment() {
        assert_eq!(
            display_status(InvoiceLifecycle::Sent, PaymentStatus::Overdue),
            DisplayStatus {
                label: "En retard",
                tone: Tone::Red
            }
        );
        assert_eq!(
            display_status(InvoiceLifecycle::Closed, PaymentStatus::Paid).label,
            "Payée"
        );
    }

    #[test]
    fn every_payment_status_has_a_label() {
        for status in PaymentStatus::ALL {
            assert!(!payment_display(status).label.is_empty());
        }
    }
}
