//! Invoice status axes.
//!
//! An invoice carries two independent statuses: the document lifecycle
//! (who can see it, whether it has been handed to the client) and the payment
//! status (where the money is). Both are stored as upper-case text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Document custody state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceLifecycle {
    Draft,
    Approved,
    Sent,
    Closed,
}

impl InvoiceLifecycle {
    pub const ALL: [InvoiceLifecycle; 4] = [
        InvoiceLifecycle::Draft,
        InvoiceLifecycle::Approved,
        InvoiceLifecycle::Sent,
        InvoiceLifecycle::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceLifecycle::Draft => "DRAFT",
            InvoiceLifecycle::Approved => "APPROVED",
            InvoiceLifecycle::Sent => "SENT",
            InvoiceLifecycle::Closed => "CLOSED",
        }
    }

    /// True once the invoice has been handed to the client.
    pub fn is_issued(&self) -> bool {
        matches!(self, InvoiceLifecycle::Sent | InvoiceLifecycle::Closed)
    }
}

/// Money settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Processing,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
    Rejected,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 8] = [
        PaymentStatus::Pending,
        PaymentStatus::Partial,
        PaymentStatus::Processing,
        PaymentStatus::Paid,
        PaymentStatus::Overdue,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
        PaymentStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Overdue => "OVERDUE",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Rejected => "REJECTED",
        }
    }

    /// Terminal by convention only; nothing stops a later transition.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
                | PaymentStatus::Rejected
        )
    }

    /// Money is still expected from the client.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Partial)
    }
}

/// Single-axis status used before lifecycle and payment were split.
///
/// Kept so that records written against the old model can be mapped onto
/// the two-axis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyInvoiceStatus {
    Draft,
    Approved,
    Sent,
    Partial,
    Paid,
    Overdue,
    Cancelled,
    Refunded,
    Rejected,
    Processing,
}

impl LegacyInvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyInvoiceStatus::Draft => "DRAFT",
            LegacyInvoiceStatus::Approved => "APPROVED",
            LegacyInvoiceStatus::Sent => "SENT",
            LegacyInvoiceStatus::Partial => "PARTIAL",
            LegacyInvoiceStatus::Paid => "PAID",
            LegacyInvoiceStatus::Overdue => "OVERDUE",
            LegacyInvoiceStatus::Cancelled => "CANCELLED",
            LegacyInvoiceStatus::Refunded => "REFUNDED",
            LegacyInvoiceStatus::Rejected => "REJECTED",
            LegacyInvoiceStatus::Processing => "PROCESSING",
        }
    }

    /// Split into `(lifecycle, payment_status)`.
    ///
    /// Every money state implies the document was sent.
    pub fn split(self) -> (InvoiceLifecycle, PaymentStatus) {
        use InvoiceLifecycle as L;
        use PaymentStatus as P;

        match self {
            LegacyInvoiceStatus::Draft => (L::Draft, P::Pending),
            LegacyInvoiceStatus::Approved => (L::Approved, P::Pending),
            LegacyInvoiceStatus::Sent => (L::Sent, P::Pending),
            LegacyInvoiceStatus::Partial => (L::Sent, P::Partial),
            LegacyInvoiceStatus::Processing => (L::Sent, P::Processing),
            LegacyInvoiceStatus::Paid => (L::Sent, P::Paid),
            LegacyInvoiceStatus::Overdue => (L::Sent, P::Overdue),
            LegacyInvoiceStatus::Cancelled => (L::Sent, P::Cancelled),
            LegacyInvoiceStatus::Refunded => (L::Sent, P::Refunded),
            LegacyInvoiceStatus::Rejected => (L::Sent, P::Rejected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($ty:ty, $kind:literal, $all:expr) => {
        impl FromStr for $ty {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                $all.into_iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| UnknownStatus {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(InvoiceLifecycle, "lifecycle", InvoiceLifecycle::ALL);
text_enum!(PaymentStatus, "payment status", PaymentStatus::ALL);
text_enum!(
    LegacyInvoiceStatus,
    "invoice status",
    [
        LegacyInvoiceStatus::Draft,
        LegacyInvoiceStatus::Approved,
        LegacyInvoiceStatus::Sent,
        LegacyInvoiceStatus::Partial,
        LegacyInvoiceStatus::Paid,
        LegacyInvoiceStatus::Overdue,
        LegacyInvoiceStatus::Cancelled,
        LegacyInvoiceStatus::Refunded,
        LegacyInvoiceStatus::Rejected,
        LegacyInvoiceStatus::Processing,
    ]
);
