use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ticketing_core::{Booking, StopSnapshot};

#[derive(Debug, Deserialize)]
pub struct CreateBookingIn {
    pub route_id: String,
    /// YYYY-MM-DD
    pub travel_date: String,
    /// HH:MM, one of the route's scheduled departures
    pub departs_at: String,
    pub pickup_stop: String,
    pub dropoff_stop: String,
    #[serde(default = "default_seats")]
    pub seats: i32,
}

fn default_seats() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct CancelIn {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct BookingOut {
    pub id: String,
    pub traveler_id: String,
    pub route_id: String,
    pub college_id: String,
    pub travel_date: NaiveDate,
    pub depart_at: DateTime<Utc>,
    pub pickup: StopSnapshot,
    pub dropoff: StopSnapshot,
    pub seats: i32,
    pub unit_fare_cents: i64,
    pub total_cents: i64,
    pub payment_status: String,
    pub status: String,
    pub pass_payload: String,
    pub cancel_reason: Option<String>,
    pub refund_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Booking> for BookingOut {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            traveler_id: b.traveler_id,
            route_id: b.route_id,
            college_id: b.college_id,
            travel_date: b.travel_date,
            depart_at: b.depart_at,
            pickup: b.pickup,
            dropoff: b.dropoff,
            seats: b.seats,
            unit_fare_cents: b.unit_fare_cents,
            total_cents: b.total_cents,
            payment_status: b.payment_status.as_str().to_string(),
            status: b.status.as_str().to_string(),
            pass_payload: b.pass_payload,
            cancel_reason: b.cancel_reason,
            refund_cents: b.refund_cents,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvailabilityOut {
    pub route_id: String,
    pub travel_date: NaiveDate,
    pub capacity: i32,
    pub committed: i32,
    pub available: i32,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPassIn {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPassOut {
    pub ok: bool,
    pub booking_id: String,
    pub route_id: String,
    pub travel_date: NaiveDate,
    pub seats: i32,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}
