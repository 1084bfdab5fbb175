use crate::error::DomainError;
use crate::ledger::SeatHold;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a booking. `Confirmed` is the only non-terminal state;
/// transitions are one-directional and terminal states absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::NoShow => "no_show",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim() {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "no_show" => Ok(Self::NoShow),
            other => Err(DomainError::StorageUnavailable(format!(
                "unknown booking status {other:?}"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Confirmed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Confirmed,
                Self::Cancelled | Self::Completed | Self::NoShow
            )
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(DomainError::StorageUnavailable(format!(
                "unknown payment status {other:?}"
            ))),
        }
    }
}

/// A stop as copied onto a booking at creation time. Immutable snapshot;
/// later route edits never move a sold ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSnapshot {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub seq: i32,
}

impl From<&RouteStop> for StopSnapshot {
    fn from(stop: &RouteStop) -> Self {
        Self {
            name: stop.name.clone(),
            lat: stop.lat,
            lng: stop.lng,
            seq: stop.seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Active,
    Inactive,
    Maintenance,
}

impl RouteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Maintenance => "maintenance",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(DomainError::StorageUnavailable(format!(
                "unknown route status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub seq: i32,
}

/// One departure slot: a wall-clock time plus the weekdays it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// "HH:MM", interpreted as UTC wall-clock.
    pub departs_at: String,
    /// Lowercase three-letter day tokens: "mon".."sun". Empty means daily.
    #[serde(default)]
    pub days: Vec<String>,
}

pub fn day_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

impl ScheduleEntry {
    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(self.departs_at.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(self.departs_at.trim(), "%H:%M:%S"))
            .ok()
    }

    pub fn serves(&self, weekday: Weekday) -> bool {
        if self.days.is_empty() {
            return true;
        }
        let token = day_token(weekday);
        self.days.iter().any(|d| d.trim().eq_ignore_ascii_case(token))
    }
}

/// Route data as supplied by the directory collaborator. This core only
/// reads routes; the admin surface that writes them lives elsewhere.
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub id: String,
    pub college_id: String,
    pub status: RouteStatus,
    pub capacity: i32,
    pub base_fare_cents: i64,
    pub stops: Vec<RouteStop>,
    pub schedules: Vec<ScheduleEntry>,
}

impl RouteInfo {
    pub fn stop_named(&self, name: &str) -> Option<&RouteStop> {
        let name = name.trim();
        self.stops
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// True when some schedule entry departs at `time` on `date`'s weekday.
    pub fn departs_at(&self, date: NaiveDate, time: NaiveTime) -> bool {
        use chrono::Datelike;
        let weekday = date.weekday();
        self.schedules
            .iter()
            .any(|s| s.time() == Some(time) && s.serves(weekday))
    }
}

/// Per-organization booking policy, with service-level defaults applied by
/// the directory when a college has no explicit row.
#[derive(Debug, Clone, Copy)]
pub struct OrgPolicy {
    pub advance_booking_days: i64,
    pub cancellation_deadline_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterRole {
    Traveler,
    Operator,
    Admin,
}

impl RequesterRole {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "traveler" => Ok(Self::Traveler),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            _ => Err(DomainError::invalid("unknown requester role")),
        }
    }
}

/// Pre-validated identity from the gateway. This core trusts it as-is.
#[derive(Debug, Clone)]
pub struct Requester {
    pub id: String,
    pub role: RequesterRole,
    pub college_id: Option<String>,
}

impl Requester {
    /// Operator/admin authority over an organization's bookings.
    pub fn manages_college(&self, college_id: &str) -> bool {
        matches!(self.role, RequesterRole::Operator | RequesterRole::Admin)
            && self.college_id.as_deref() == Some(college_id)
    }

    pub fn may_cancel(&self, booking: &Booking) -> bool {
        self.id == booking.traveler_id || self.manages_college(&booking.college_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
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
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub pass_payload: String,
    pub cancel_reason: Option<String>,
    pub refund_cents: i64,
    pub hold_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The ledger hold this booking consumed, for release on cancellation.
    pub fn hold(&self) -> SeatHold {
        SeatHold {
            id: self.hold_id.clone(),
            route_id: self.route_id.clone(),
            travel_date: self.travel_date,
            seats: self.seats,
        }
    }
}
