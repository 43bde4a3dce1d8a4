//! Status transitions on both axes.
//!
//! A transition is planned as a pure function of the current invoice and the
//! requested change. The plan carries the new statuses, the `sent_at` stamp and
//! the notifications the change implies; the engine persists it and only then
//! schedules the effects.

use crate::models::{Invoice, InvoiceLifecycle, LegacyInvoiceStatus, PaymentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which status changes are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Any status may follow any other.
    #[default]
    Permissive,
    /// Only the moves in the allowed table; admins may still `force`.
    Strict,
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(format!("unknown transition policy '{}'", other)),
        }
    }
}

impl TransitionPolicy {
    pub fn allows_lifecycle(&self, from: InvoiceLifecycle, to: InvoiceLifecycle) -> bool {
        use InvoiceLifecycle::*;

        if from == to || *self == TransitionPolicy::Permissive {
            return true;
        }
        matches!(
            (from, to),
            (Draft, Approved) | (Approved, Draft) | (Approved, Sent) | (Sent, Closed)
        )
    }

    pub fn allows_payment(&self, from: PaymentStatus, to: PaymentStatus) -> bool {
        use PaymentStatus::*;

        if from == to || *self == TransitionPolicy::Permissive {
            return true;
        }
        match from {
            Pending => matches!(to, Partial | Processing | Paid | Overdue | Cancelled),
            Partial => matches!(to, Processing | Paid | Overdue | Cancelled),
            Processing => matches!(to, Pending | Partial | Paid | Rejected),
            Overdue => matches!(to, Partial | Processing | Paid | Cancelled),
            Paid => matches!(to, Refunded),
            Rejected => matches!(to, Pending),
            Cancelled | Refunded => false,
        }
    }
}

/// Requested change. Absent axes are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub lifecycle: Option<InvoiceLifecycle>,
    pub payment_status: Option<PaymentStatus>,
}

impl StatusChange {
    pub fn lifecycle(to: InvoiceLifecycle) -> Self {
        Self {
            lifecycle: Some(to),
            payment_status: None,
        }
    }

    pub fn payment(to: PaymentStatus) -> Self {
        Self {
            lifecycle: None,
            payment_status: Some(to),
        }
    }

    /// Build a change from explicit axes, falling back to a single legacy
    /// status for the axes left out.
    pub fn requested(
        lifecycle: Option<InvoiceLifecycle>,
        payment_status: Option<PaymentStatus>,
        legacy: Option<LegacyInvoiceStatus>,
    ) -> Self {
        let split = legacy.map(LegacyInvoiceStatus::split);
        Self {
            lifecycle: lifecycle.or(split.map(|(lifecycle, _)| lifecycle)),
            payment_status: payment_status.or(split.map(|(_, payment)| payment)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lifecycle.is_none() && self.payment_status.is_none()
    }
}

/// Notification implied by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionEffect {
    InvoiceSent,
    PaymentConfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub lifecycle: InvoiceLifecycle,
    pub payment_status: PaymentStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub effects: Vec<TransitionEffect>,
}

impl TransitionPlan {
    pub fn apply(&self, invoice: &mut Invoice) {
        invoice.lifecycle = self.lifecycle;
        invoice.payment_status = self.payment_status;
        invoice.sent_at = self.sent_at;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("lifecycle transition {from} -> {to} is not allowed")]
    Lifecycle {
        from: InvoiceLifecycle,
        to: InvoiceLifecycle,
    },
    #[error("payment transition {from} -> {to} is not allowed")]
    Payment {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

/// Plan `change` against `invoice`. `force` skips the policy check.
pub fn plan_transition(
    invoice: &Invoice,
    change: StatusChange,
    policy: TransitionPolicy,
    force: bool,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, TransitionError> {
    let from_lifecycle = invoice.lifecycle;
    let from_payment = invoice.payment_status;
    let to_lifecycle = change.lifecycle.unwrap_or(from_lifecycle);
    let to_payment = change.payment_status.unwrap_or(from_payment);

    if !force {
        if !policy.allows_lifecycle(from_lifecycle, to_lifecycle) {
            return Err(TransitionError::Lifecycle {
                from: from_lifecycle,
                to: to_lifecycle,
            });
        }
        if !policy.allows_payment(from_payment, to_payment) {
            return Err(TransitionError::Payment {
                from: from_payment,
                to: to_payment,
            });
        }
    }

    // Only the first entry into SENT stamps sent_at and emails the client.
    let first_send = to_lifecycle == InvoiceLifecycle::Sent
        && from_lifecycle != InvoiceLifecycle::Sent
        && invoice.sent_at.is_none();
    let entering_paid = to_payment == PaymentStatus::Paid && from_payment != PaymentStatus::Paid;

    let sent_at = if first_send { Some(now) } else { invoice.sent_at };

    let mut effects = Vec::new();
    if first_send {
        effects.push(TransitionEffect::InvoiceSent);
    }
    if entering_paid {
        effects.push(TransitionEffect::PaymentConfirmed);
    }

    Ok(TransitionPlan {
        lifecycle: to_lifecycle,
        payment_status: to_payment,
        sent_at,
        effects,
    })
}
