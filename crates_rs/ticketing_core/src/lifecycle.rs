use crate::booking::{
    Booking, BookingStatus, OrgPolicy, PaymentStatus, Requester, RouteInfo, RouteStatus,
    StopSnapshot,
};
use crate::error::DomainError;
use crate::events::{BookingEvent, EventSink};
use crate::fare;
use crate::ledger::{AvailabilityLedger, SeatHold};
use crate::refund;
use crate::ticket::PassSigner;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 120;
const MAX_CANCEL_REASON_LEN: usize = 256;

/// Read access to route and organization data maintained by the excluded
/// admin surface.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn route(&self, route_id: &str) -> Result<Option<RouteInfo>, DomainError>;

    /// Policy for a college, with service defaults applied when the college
    /// has no explicit configuration.
    async fn org_policy(&self, college_id: &str) -> Result<OrgPolicy, DomainError>;
}

/// Durable booking persistence. Implementations decide the storage
/// technology; the lifecycle only relies on these semantics:
/// single-row writes, and idempotency lookups that ignore records older
/// than the retention window.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: &Booking) -> Result<(), DomainError>;

    async fn get(&self, booking_id: &str) -> Result<Option<Booking>, DomainError>;

    async fn mark_cancelled(
        &self,
        booking_id: &str,
        reason: Option<&str>,
        refund_cents: i64,
        payment_status: PaymentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    async fn mark_terminal(
        &self,
        booking_id: &str,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    async fn idempotency_get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError>;

    async fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<(), DomainError>;
}

/// Durable record tying a client retry key to the booking it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: String,
    pub booking_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub traveler_id: String,
    pub traveler_college_id: String,
    pub route_id: String,
    pub travel_date: NaiveDate,
    pub departs_at: NaiveTime,
    pub pickup_stop: String,
    pub dropoff_stop: String,
    pub seats: i32,
    pub idempotency_key: Option<String>,
}

impl CreateBookingRequest {
    /// Stable digest of the request payload, used to detect an idempotency
    /// key reused with different parameters.
    pub fn fingerprint(&self) -> String {
        let normalized = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.traveler_id.trim(),
            self.route_id.trim(),
            self.travel_date,
            self.departs_at.format("%H:%M"),
            self.pickup_stop.trim().to_ascii_lowercase(),
            self.dropoff_stop.trim().to_ascii_lowercase(),
            self.seats,
        );
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub capacity: i32,
    pub committed: i32,
    pub available: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    /// Upper bound on seats in one booking; capacity stays the only
    /// per-trip invariant.
    pub max_seats_per_booking: i32,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_seats_per_booking: 10,
        }
    }
}

/// Orchestrates the booking state machine over the trait seams.
///
/// Every operation takes `now` from the caller so the whole manager stays
/// deterministic under test.
pub struct BookingLifecycle {
    directory: Arc<dyn Directory>,
    ledger: Arc<dyn AvailabilityLedger>,
    store: Arc<dyn BookingStore>,
    events: Arc<dyn EventSink>,
    signer: PassSigner,
    opts: LifecycleOptions,
}

impl BookingLifecycle {
    pub fn new(
        directory: Arc<dyn Directory>,
        ledger: Arc<dyn AvailabilityLedger>,
        store: Arc<dyn BookingStore>,
        events: Arc<dyn EventSink>,
        signer: PassSigner,
        opts: LifecycleOptions,
    ) -> Self {
        Self {
            directory,
            ledger,
            store,
            events,
            signer,
            opts,
        }
    }

    pub async fn create_booking(
        &self,
        req: CreateBookingRequest,
        now: DateTime<Utc>,
    ) -> Result<Booking, DomainError> {
        let traveler_id = req.traveler_id.trim().to_string();
        if traveler_id.is_empty() {
            return Err(DomainError::invalid("traveler id required"));
        }
        if req.seats < 1 {
            return Err(DomainError::invalid("seats must be >= 1"));
        }
        if req.seats > self.opts.max_seats_per_booking {
            return Err(DomainError::invalid(format!(
                "seats must be <= {}",
                self.opts.max_seats_per_booking
            )));
        }
        let idempotency_key = match req.idempotency_key.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(k) if k.len() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(DomainError::invalid("idempotency key too long"));
            }
            Some(k) => Some(k.to_string()),
        };

        let route = self
            .directory
            .route(req.route_id.trim())
            .await?
            .ok_or_else(|| DomainError::not_eligible("unknown route"))?;
        if route.status != RouteStatus::Active {
            return Err(DomainError::not_eligible("route is not active"));
        }
        if req.traveler_college_id.trim() != route.college_id {
            return Err(DomainError::not_eligible(
                "route belongs to a different college",
            ));
        }

        let policy = self.directory.org_policy(&route.college_id).await?;
        let depart_at = depart_instant(req.travel_date, req.departs_at);
        if depart_at <= now {
            return Err(DomainError::invalid("departure is in the past"));
        }
        let latest = now.date_naive() + Duration::days(policy.advance_booking_days);
        if req.travel_date > latest {
            return Err(DomainError::invalid(
                "travel date is beyond the advance booking window",
            ));
        }
        if !route.departs_at(req.travel_date, req.departs_at) {
            return Err(DomainError::invalid(
                "route has no departure at the requested time",
            ));
        }

        let pickup = route
            .stop_named(&req.pickup_stop)
            .ok_or_else(|| DomainError::invalid("unknown pickup stop"))?;
        let dropoff = route
            .stop_named(&req.dropoff_stop)
            .ok_or_else(|| DomainError::invalid("unknown dropoff stop"))?;
        if dropoff.seq <= pickup.seq {
            return Err(DomainError::invalid(
                "dropoff stop must come after the pickup stop",
            ));
        }
        let pickup = StopSnapshot::from(pickup);
        let dropoff = StopSnapshot::from(dropoff);

        let fingerprint = req.fingerprint();
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(record) = self.store.idempotency_get(key, now).await? {
                if record.fingerprint != fingerprint {
                    return Err(DomainError::DuplicateRequest);
                }
                match record.booking_id.as_deref() {
                    Some(bid) => {
                        if let Some(existing) = self.store.get(bid).await? {
                            return Ok(existing);
                        }
                        // Record points at a booking that never landed;
                        // fall through and process as a fresh request.
                        tracing::warn!(key, booking_id = bid, "idempotency record is dangling");
                    }
                    // A concurrent request with this key is still in
                    // flight.
                    None => return Err(DomainError::DuplicateRequest),
                }
            }
        }

        let hold = match self
            .ledger
            .reserve(&route.id, req.travel_date, req.seats, route.capacity)
            .await
        {
            Ok(hold) => hold,
            Err(DomainError::CapacityExceeded) => return Err(DomainError::SoldOut),
            Err(e) => return Err(e),
        };

        // From here on every failure must hand the reservation back.
        let total_cents = match fare::compute_fare(route.base_fare_cents, req.seats) {
            Ok(total) => total,
            Err(e) => {
                self.release_quietly(&hold).await;
                return Err(e);
            }
        };

        let booking_id = Uuid::new_v4().to_string();
        let booking = Booking {
            id: booking_id.clone(),
            traveler_id,
            route_id: route.id.clone(),
            college_id: route.college_id.clone(),
            travel_date: req.travel_date,
            depart_at,
            pickup,
            dropoff,
            seats: req.seats,
            unit_fare_cents: route.base_fare_cents,
            total_cents,
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Confirmed,
            pass_payload: self.signer.issue(&booking_id),
            cancel_reason: None,
            refund_cents: 0,
            hold_id: hold.id.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert(&booking).await {
            self.release_quietly(&hold).await;
            return Err(e);
        }

        if let Some(key) = idempotency_key {
            let record = IdempotencyRecord {
                key: key.clone(),
                fingerprint,
                booking_id: Some(booking_id.clone()),
                created_at: now,
            };
            // Best-effort: the booking is already durable; a lost record
            // only widens the retry window for this key.
            if let Err(e) = self.store.idempotency_put(&record).await {
                tracing::warn!(error = %e, key, "idempotency record write failed");
            }
        }

        self.events
            .emit(&BookingEvent::BookingCreated {
                booking_id,
                route_id: booking.route_id.clone(),
                college_id: booking.college_id.clone(),
                travel_date: booking.travel_date,
                seats: booking.seats,
                total_cents: booking.total_cents,
                at: now,
            })
            .await;

        Ok(booking)
    }

    pub async fn cancel_booking(
        &self,
        booking_id: &str,
        requester: &Requester,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Booking, DomainError> {
        let reason = match reason.map(str::trim) {
            Some("") | None => None,
            Some(r) if r.len() > MAX_CANCEL_REASON_LEN => {
                return Err(DomainError::invalid("cancellation reason too long"));
            }
            Some(r) => Some(r.to_string()),
        };

        let booking = self
            .store
            .get(booking_id.trim())
            .await?
            .ok_or(DomainError::NotFound)?;
        if !requester.may_cancel(&booking) {
            return Err(DomainError::Forbidden);
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(DomainError::InvalidTransition(
                booking.status.as_str().to_string(),
            ));
        }

        let policy = self.directory.org_policy(&booking.college_id).await?;
        let refund_cents = refund::refund_for_departure(
            booking.total_cents,
            now,
            booking.depart_at,
            policy.cancellation_deadline_hours,
        );

        match self.ledger.release(&booking.hold()).await {
            Ok(()) => {}
            Err(DomainError::AlreadyReleased) => {
                // The hold is gone but the booking was still confirmed;
                // finish the cancellation rather than strand the record.
                tracing::warn!(booking_id = %booking.id, "hold was already released");
            }
            Err(e) => return Err(e),
        }

        let payment_status = if refund_cents > 0 {
            PaymentStatus::Refunded
        } else {
            booking.payment_status
        };
        self.store
            .mark_cancelled(
                &booking.id,
                reason.as_deref(),
                refund_cents,
                payment_status,
                now,
            )
            .await?;

        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            cancel_reason: reason,
            refund_cents,
            payment_status,
            updated_at: now,
            ..booking
        };

        self.events
            .emit(&BookingEvent::BookingCancelled {
                booking_id: cancelled.id.clone(),
                route_id: cancelled.route_id.clone(),
                college_id: cancelled.college_id.clone(),
                travel_date: cancelled.travel_date,
                seats: cancelled.seats,
                refund_cents,
                at: now,
            })
            .await;

        Ok(cancelled)
    }

    pub async fn complete_booking(
        &self,
        booking_id: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Booking, DomainError> {
        self.finish(booking_id, requester, BookingStatus::Completed, now)
            .await
    }

    pub async fn mark_no_show(
        &self,
        booking_id: &str,
        requester: &Requester,
        now: DateTime<Utc>,
    ) -> Result<Booking, DomainError> {
        self.finish(booking_id, requester, BookingStatus::NoShow, now)
            .await
    }

    /// Operator-triggered terminal transitions. Seats were consumed, so the
    /// ledger is untouched.
    async fn finish(
        &self,
        booking_id: &str,
        requester: &Requester,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, DomainError> {
        let booking = self
            .store
            .get(booking_id.trim())
            .await?
            .ok_or(DomainError::NotFound)?;
        if !requester.manages_college(&booking.college_id) {
            return Err(DomainError::Forbidden);
        }
        if !booking.status.can_transition_to(status) {
            return Err(DomainError::InvalidTransition(
                booking.status.as_str().to_string(),
            ));
        }

        self.store.mark_terminal(&booking.id, status, now).await?;

        let finished = Booking {
            status,
            updated_at: now,
            ..booking
        };
        let event = match status {
            BookingStatus::Completed => BookingEvent::BookingCompleted {
                booking_id: finished.id.clone(),
                route_id: finished.route_id.clone(),
                at: now,
            },
            _ => BookingEvent::BookingNoShow {
                booking_id: finished.id.clone(),
                route_id: finished.route_id.clone(),
                at: now,
            },
        };
        self.events.emit(&event).await;

        Ok(finished)
    }

    pub async fn get_booking(&self, booking_id: &str) -> Result<Booking, DomainError> {
        self.store
            .get(booking_id.trim())
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn availability(
        &self,
        route_id: &str,
        travel_date: NaiveDate,
    ) -> Result<Availability, DomainError> {
        let route = self
            .directory
            .route(route_id.trim())
            .await?
            .ok_or(DomainError::NotFound)?;
        let committed = self.ledger.committed(&route.id, travel_date).await?;
        Ok(Availability {
            capacity: route.capacity,
            committed,
            available: (route.capacity - committed).max(0),
        })
    }

    async fn release_quietly(&self, hold: &SeatHold) {
        if let Err(e) = self.ledger.release(hold).await {
            tracing::warn!(error = %e, hold_id = %hold.id, "compensating release failed");
        }
    }
}

/// Travel date + schedule time as a UTC instant. Schedule times are UTC
/// wall-clock by contract.
pub fn depart_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_time(time), Utc)
}
