//! Time-driven notice predicates.
//!
//! All comparisons are on calendar dates (UTC); the time of day never matters.

use crate::models::{Invoice, InvoiceLifecycle, PaymentStatus};
use chrono::NaiveDate;

/// Days past due on which an overdue notice goes out.
pub const OVERDUE_REMINDER_DAYS: [i64; 4] = [1, 7, 14, 30];

/// Days before due on which the upcoming reminder goes out.
pub const UPCOMING_REMINDER_DAYS: i64 = 3;

/// Payment states the overdue scan looks at.
pub const OVERDUE_SCAN_STATUSES: [PaymentStatus; 3] = [
    PaymentStatus::Pending,
    PaymentStatus::Partial,
    PaymentStatus::Overdue,
];

/// Payment states the upcoming scan looks at.
pub const UPCOMING_SCAN_STATUSES: [PaymentStatus; 2] =
    [PaymentStatus::Pending, PaymentStatus::Partial];

pub fn days_overdue(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - due_date).num_days().max(0)
}

pub fn days_remaining(due_date: NaiveDate, today: NaiveDate) -> i64 {
    (due_date - today).num_days()
}

/// Sent, unpaid, past due and reachable by email.
pub fn is_overdue_candidate(invoice: &Invoice, today: NaiveDate) -> bool {
    invoice.lifecycle == InvoiceLifecycle::Sent
        && OVERDUE_SCAN_STATUSES.contains(&invoice.payment_status)
        && invoice.due_date < today
        && invoice.has_client_email()
}

pub fn is_overdue_notice_day(days_overdue: i64) -> bool {
    OVERDUE_REMINDER_DAYS.contains(&days_overdue)
}

/// Sent, unpaid, due in exactly [`UPCOMING_REMINDER_DAYS`] and reachable by email.
pub fn is_upcoming_candidate(invoice: &Invoice, today: NaiveDate) -> bool {
    invoice.lifecycle == InvoiceLifecycle::Sent
        && UPCOMING_SCAN_STATUSES.contains(&invoice.payment_status)
        && days_remaining(invoice.due_date, today) == UPCOMING_REMINDER_DAYS
        && invoice.has_client_email()
}

/// A scheduled notice already went out today.
pub fn noticed_today(invoice: &Invoice, today: NaiveDate) -> bool {
    invoice.last_notice_on == Some(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::transitions::tests::invoice;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn sent_due(due: NaiveDate, payment: PaymentStatus) -> Invoice {
        let mut inv = invoice(InvoiceLifecycle::Sent, payment);
        inv.due_date = due;
        inv
    }

    #[test]
    fn day_counts() {
        assert_eq!(days_overdue(date(3, 1), date(3, 8)), 7);
        assert_eq!(days_overdue(date(3, 8), date(3, 1)), 0);
        assert_eq!(days_remaining(date(3, 4), date(3, 1)), 3);
    }

    #[test]
    fn seven_days_late_fires_eight_does_not() {
        let today = date(4, 10);
        let seven = sent_due(date(4, 3), PaymentStatus::Pending);
        let eight = sent_due(date(4, 2), PaymentStatus::Pending);

        assert!(is_overdue_candidate(&seven, today));
        assert!(is_overdue_notice_day(days_overdue(seven.due_date, today)));
        assert!(is_overdue_candidate(&eight, today));
        assert!(!is_overdue_notice_day(days_overdue(eight.due_date, today)));
    }

    #[test]
    fn due_today_is_not_overdue() {
        let today = date(4, 10);
        assert!(!is_overdue_candidate(&sent_due(today, PaymentStatus::Pending), today));
    }

    #[test]
    fn overdue_scan_skips_paid_drafts_and_blank_emails() {
        let today = date(4, 10);
        let paid = sent_due(date(4, 3), PaymentStatus::Paid);
        assert!(!is_overdue_candidate(&paid, today));

        let mut draft = sent_due(date(4, 3), PaymentStatus::Pending);
        draft.lifecycle = InvoiceLifecycle::Draft;
        assert!(!is_overdue_candidate(&draft, today));

        let mut blank = sent_due(date(4, 3), PaymentStatus::Overdue);
        blank.client_email = "  ".into();
        assert!(!is_overdue_candidate(&blank, today));
    }

    #[test]
    fn upcoming_selects_plus_three_only() {
        let today = date(4, 10);
        assert!(is_upcoming_candidate(
            &sent_due(date(4, 13), PaymentStatus::Partial),
            today
        ));
        assert!(!is_upcoming_candidate(
            &sent_due(date(4, 14), PaymentStatus::Pending),
            today
        ));
        assert!(!is_upcoming_candidate(
            &sent_due(date(4, 13), PaymentStatus::Overdue),
            today
        ));
    }

    #[test]
    fn same_day_notice_is_remembered() {
        let today = date(4, 10);
        let mut inv = sent_due(date(4, 3), PaymentStatus::Overdue);
        assert!(!noticed_today(&inv, today));
        inv.last_notice_on = Some(today);
        assert!(noticed_today(&inv, today));
    }
}
