//! Invoice numbers: `INV-<yyyy>-<nnnnn>`.
//!
//! The sequence restarts every calendar year. Numbers are persisted and shown to
//! clients, so the format must never change for existing rows.

pub const PREFIX: &str = "INV";
const SEQUENCE_WIDTH: usize = 5;

pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("{PREFIX}-{year}-{sequence:0width$}", width = SEQUENCE_WIDTH)
}

/// Split a number back into `(year, sequence)`.
pub fn parse_invoice_number(number: &str) -> Option<(i32, i64)> {
    let mut parts = number.splitn(3, '-');
    if parts.next()? != PREFIX {
        return None;
    }
    let year = parts.next()?.parse().ok()?;
    let sequence = parts.next()?.parse().ok()?;
    Some((year, sequence))
}

/// Prefix matching every number issued in `year`, for `LIKE` queries.
pub fn year_prefix(year: i32) -> String {
    format!("{PREFIX}-{year}-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_sequence_to_five_digits() {
        assert_eq!(format_invoice_number(2025, 1), "INV-2025-00001");
        assert_eq!(format_invoice_number(2025, 42), "INV-2025-00042");
    }

    #[test]
    fn wide_sequences_are_not_truncated() {
        assert_eq!(format_invoice_number(2025, 123_456), "INV-2025-123456");
    }

    #[test]
    fn parses_back() {
        assert_eq!(parse_invoice_number("INV-2024-00310"), Some((2024, 310)));
        assert_eq!(parse_invoice_number("FAC-2024-00310"), None);
        assert_eq!(parse_invoice_number("INV-2024"), None);
    }

    #[test]
    fn numbers_sort_with_sequence_within_a_year() {
        let a = format_invoice_number(2025, 9);
        let b = format_invoice_number(2025, 10);
        assert!(a < b);
        assert!(a.starts_with(&year_prefix(2025)));
    }
}
