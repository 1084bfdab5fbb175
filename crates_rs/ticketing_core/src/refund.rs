use chrono::{DateTime, Utc};

/// Refund fraction paid when the traveler cancels strictly before the
/// organization's deadline.
const EARLY_CANCEL_FRACTION: f64 = 0.9;
/// Refund fraction at or inside the deadline, including after departure.
const LATE_CANCEL_FRACTION: f64 = 0.5;

/// Refund owed for a cancellation, in integer cents.
///
/// Strictly more than `deadline_hours` before departure pays 90%; everything
/// else, including cancellations after departure, pays 50%. Half-up to the
/// cent, clamped to `0..=total_cents`. Pure: `hours_until_departure` comes
/// from the caller, never from a clock read here.
pub fn compute_refund(total_cents: i64, hours_until_departure: f64, deadline_hours: f64) -> i64 {
    if total_cents <= 0 {
        return 0;
    }
    let fraction = if hours_until_departure > deadline_hours {
        EARLY_CANCEL_FRACTION
    } else {
        LATE_CANCEL_FRACTION
    };
    let refund = ((total_cents as f64) * fraction).round() as i64;
    refund.clamp(0, total_cents)
}

/// [`compute_refund`] against concrete instants.
pub fn refund_for_departure(
    total_cents: i64,
    now: DateTime<Utc>,
    depart_at: DateTime<Utc>,
    deadline_hours: f64,
) -> i64 {
    let hours_until = (depart_at - now).num_seconds() as f64 / 3600.0;
    compute_refund(total_cents, hours_until, deadline_hours)
}
