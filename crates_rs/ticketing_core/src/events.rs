use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Domain events emitted after each successful booking state change.
/// Delivery mechanics live with the sink; emission is best-effort and never
/// fails the operation that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    BookingCreated {
        booking_id: String,
        route_id: String,
        college_id: String,
        travel_date: NaiveDate,
        seats: i32,
        total_cents: i64,
        at: DateTime<Utc>,
    },
    BookingCancelled {
        booking_id: String,
        route_id: String,
        college_id: String,
        travel_date: NaiveDate,
        seats: i32,
        refund_cents: i64,
        at: DateTime<Utc>,
    },
    BookingCompleted {
        booking_id: String,
        route_id: String,
        at: DateTime<Utc>,
    },
    BookingNoShow {
        booking_id: String,
        route_id: String,
        at: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> &str {
        match self {
            Self::BookingCreated { booking_id, .. }
            | Self::BookingCancelled { booking_id, .. }
            | Self::BookingCompleted { booking_id, .. }
            | Self::BookingNoShow { booking_id, .. } => booking_id,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &BookingEvent);
}

/// Sink that drops everything. Useful as a test default.
#[derive(Default)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: &BookingEvent) {}
}
