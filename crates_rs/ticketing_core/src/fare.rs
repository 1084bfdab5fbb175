use crate::error::DomainError;

/// Total fare for `seats` seats at `unit_fare_cents` each, in integer cents.
///
/// Exact integer arithmetic; rejects non-positive seat counts, negative unit
/// fares, and totals that do not fit in an `i64`.
pub fn compute_fare(unit_fare_cents: i64, seats: i32) -> Result<i64, DomainError> {
    if seats < 1 {
        return Err(DomainError::invalid("seats must be >= 1"));
    }
    if unit_fare_cents < 0 {
        return Err(DomainError::invalid("unit fare must be >= 0"));
    }
    unit_fare_cents
        .checked_mul(seats as i64)
        .ok_or_else(|| DomainError::invalid("fare total out of range"))
}

/// [`compute_fare`] with a chain of multiplicative modifiers (surge, group
/// discount). Modifiers apply to the exact product; rounding happens once,
/// half-up to the cent, after the whole chain.
pub fn compute_fare_with_modifiers(
    unit_fare_cents: i64,
    seats: i32,
    modifiers: &[f64],
) -> Result<i64, DomainError> {
    let base = compute_fare(unit_fare_cents, seats)?;
    if modifiers.is_empty() {
        return Ok(base);
    }
    let mut scaled = base as f64;
    for m in modifiers {
        if !m.is_finite() || *m < 0.0 {
            return Err(DomainError::invalid("fare modifier must be finite and >= 0"));
        }
        scaled *= m;
    }
    // f64::round is half-away-from-zero; amounts here are non-negative, so
    // this is half-up.
    let total = scaled.round();
    if total > i64::MAX as f64 {
        return Err(DomainError::invalid("fare total out of range"));
    }
    Ok(total as i64)
}
