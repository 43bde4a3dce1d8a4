//! HT / TVA / TTC computation.
//!
//! `total_ht` is the exact sum of `quantity * unit_price`. `total_tva` is rounded
//! to cents (half away from zero) so that `total_ttc = total_ht + total_tva`
//! holds on the stored values.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::borrow::Cow;
use validator::{ValidationError, ValidationErrors};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Totals {
    pub total_ht: Decimal,
    pub total_tva: Decimal,
    pub total_ttc: Decimal,
}

/// Compute totals from `(quantity, unit_price)` pairs.
pub fn compute_totals<I>(lines: I, vat_active: bool, vat_rate: Decimal) -> Totals
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let total_ht: Decimal = lines.into_iter().map(|(qty, price)| qty * price).sum();
    let total_tva = if vat_active {
        (total_ht * vat_rate / HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    };

    Totals {
        total_ht,
        total_tva,
        total_ttc: total_ht + total_tva,
    }
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(Cow::from("must not be empty"));
        return Err(err);
    }
    Ok(())
}

pub fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("negative");
        err.message = Some(Cow::from("must not be negative"));
        return Err(err);
    }
    Ok(())
}

/// VAT rate is a percentage in `0..=100`.
pub fn validate_vat_rate(rate: Decimal) -> Result<(), ValidationErrors> {
    if rate < Decimal::ZERO || rate > HUNDRED {
        let mut err = ValidationError::new("range");
        err.message = Some(Cow::from("vat_rate must be between 0 and 100"));
        err.add_param(Cow::from("value"), &rate.to_string());
        let mut errors = ValidationErrors::new();
        errors.add("vat_rate", err);
        return Err(errors);
    }
    Ok(())
}
