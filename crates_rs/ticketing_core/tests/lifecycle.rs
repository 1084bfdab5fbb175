use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use ticketing_core::{
    Availability, AvailabilityLedger, Booking, BookingEvent, BookingLifecycle, BookingStatus,
    BookingStore, CreateBookingRequest, Directory, DomainError, EventSink, IdempotencyRecord,
    LifecycleOptions, MemoryLedger, OrgPolicy, PassSigner, PaymentStatus, Requester,
    RequesterRole, RouteInfo, RouteStatus, RouteStop, ScheduleEntry,
};

struct FakeDirectory {
    routes: Mutex<HashMap<String, RouteInfo>>,
    policy: OrgPolicy,
}

impl FakeDirectory {
    fn with_route(route: RouteInfo) -> Self {
        let mut routes = HashMap::new();
        routes.insert(route.id.clone(), route);
        Self {
            routes: Mutex::new(routes),
            policy: OrgPolicy {
                advance_booking_days: 30,
                cancellation_deadline_hours: 2.0,
            },
        }
    }
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn route(&self, route_id: &str) -> Result<Option<RouteInfo>, DomainError> {
        Ok(self.routes.lock().unwrap().get(route_id).cloned())
    }

    async fn org_policy(&self, _college_id: &str) -> Result<OrgPolicy, DomainError> {
        Ok(self.policy)
    }
}

#[derive(Default)]
struct MemStore {
    bookings: Mutex<HashMap<String, Booking>>,
    idempotency: Mutex<HashMap<String, IdempotencyRecord>>,
    fail_insert: AtomicBool,
}

#[async_trait]
impl BookingStore for MemStore {
    async fn insert(&self, booking: &Booking) -> Result<(), DomainError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(DomainError::StorageUnavailable("insert refused".into()));
        }
        self.bookings
            .lock()
            .unwrap()
            .insert(booking.id.clone(), booking.clone());
        Ok(())
    }

    async fn get(&self, booking_id: &str) -> Result<Option<Booking>, DomainError> {
        Ok(self.bookings.lock().unwrap().get(booking_id).cloned())
    }

    async fn mark_cancelled(
        &self,
        booking_id: &str,
        reason: Option<&str>,
        refund_cents: i64,
        payment_status: PaymentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut bookings = self.bookings.lock().unwrap();
        let booking = bookings.get_mut(booking_id).ok_or(DomainError::NotFound)?;
        booking.status = BookingStatus::Cancelled;
        booking.cancel_reason = reason.map(ToString::to_string);
        booking.refund_cents = refund_cents;
        booking.payment_status = payment_status;
        booking.updated_at = updated_at;
        Ok(())
    }

    async fn mark_terminal(
        &self,
        booking_id: &str,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut bookings = self.bookings.lock().unwrap();
        let booking = bookings.get_mut(booking_id).ok_or(DomainError::NotFound)?;
        booking.status = status;
        booking.updated_at = updated_at;
        Ok(())
    }

    async fn idempotency_get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        let records = self.idempotency.lock().unwrap();
        Ok(records
            .get(key)
            .filter(|r| now - r.created_at < Duration::hours(24))
            .cloned())
    }

    async fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<(), DomainError> {
        self.idempotency
            .lock()
            .unwrap()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<BookingEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: &BookingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    lifecycle: BookingLifecycle,
    ledger: Arc<MemoryLedger>,
    store: Arc<MemStore>,
    sink: Arc<RecordingSink>,
}

fn campus_route(capacity: i32, base_fare_cents: i64) -> RouteInfo {
    RouteInfo {
        id: "route-1".into(),
        college_id: "college-1".into(),
        status: RouteStatus::Active,
        capacity,
        base_fare_cents,
        stops: vec![
            RouteStop {
                name: "Main Gate".into(),
                lat: 9.030,
                lng: 38.740,
                seq: 1,
            },
            RouteStop {
                name: "Science Hall".into(),
                lat: 9.035,
                lng: 38.745,
                seq: 2,
            },
            RouteStop {
                name: "Dormitories".into(),
                lat: 9.040,
                lng: 38.750,
                seq: 3,
            },
        ],
        schedules: vec![ScheduleEntry {
            departs_at: "08:00".into(),
            days: vec![],
        }],
    }
}

fn harness(route: RouteInfo) -> Harness {
    let directory = Arc::new(FakeDirectory::with_route(route));
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemStore::default());
    let sink = Arc::new(RecordingSink::default());
    let lifecycle = BookingLifecycle::new(
        directory,
        Arc::clone(&ledger) as Arc<dyn AvailabilityLedger>,
        Arc::clone(&store) as Arc<dyn BookingStore>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        PassSigner::new("pass-secret-test"),
        LifecycleOptions::default(),
    );
    Harness {
        lifecycle,
        ledger,
        store,
        sink,
    }
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-08-03T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn travel_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 10).unwrap()
}

fn request(seats: i32) -> CreateBookingRequest {
    CreateBookingRequest {
        traveler_id: "trav-1".into(),
        traveler_college_id: "college-1".into(),
        route_id: "route-1".into(),
        travel_date: travel_date(),
        departs_at: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        pickup_stop: "Main Gate".into(),
        dropoff_stop: "Dormitories".into(),
        seats,
        idempotency_key: None,
    }
}

fn traveler() -> Requester {
    Requester {
        id: "trav-1".into(),
        role: RequesterRole::Traveler,
        college_id: Some("college-1".into()),
    }
}

fn operator() -> Requester {
    Requester {
        id: "op-1".into(),
        role: RequesterRole::Operator,
        college_id: Some("college-1".into()),
    }
}

#[tokio::test]
async fn happy_path_confirms_and_commits_seats() {
    let h = harness(campus_route(40, 2500));

    let booking = h.lifecycle.create_booking(request(2), now()).await.unwrap();

    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.total_cents, 5000);
    assert_eq!(booking.unit_fare_cents, 2500);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.pickup.seq, 1);
    assert_eq!(booking.dropoff.seq, 3);
    assert!(booking.pass_payload.starts_with("PASS|"));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        2
    );

    let stored = h.store.get(&booking.id).await.unwrap().unwrap();
    assert_eq!(stored, booking);

    let events = h.sink.events.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [BookingEvent::BookingCreated { seats: 2, total_cents: 5000, .. }]
    ));
}

#[tokio::test]
async fn sold_out_leaves_ledger_untouched() {
    let h = harness(campus_route(2, 2500));
    h.lifecycle.create_booking(request(2), now()).await.unwrap();

    let err = h
        .lifecycle
        .create_booking(
            CreateBookingRequest {
                traveler_id: "trav-2".into(),
                ..request(1)
            },
            now(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::SoldOut));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn idempotent_replay_returns_same_booking_without_double_reserve() {
    let h = harness(campus_route(40, 2500));
    let mut req = request(2);
    req.idempotency_key = Some("retry-key-1".into());

    let first = h
        .lifecycle
        .create_booking(req.clone(), now())
        .await
        .unwrap();
    let second = h.lifecycle.create_booking(req, now()).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.pass_payload, second.pass_payload);
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn same_key_different_payload_is_a_duplicate_request() {
    let h = harness(campus_route(40, 2500));
    let mut req = request(2);
    req.idempotency_key = Some("retry-key-1".into());
    h.lifecycle
        .create_booking(req.clone(), now())
        .await
        .unwrap();

    req.seats = 3;
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::DuplicateRequest));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn early_cancel_refunds_ninety_percent_and_releases_seats() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(2), now()).await.unwrap();

    // 08:00 departure on the 10th, cancelled three hours before.
    let cancel_at = DateTime::parse_from_rfc3339("2026-08-10T05:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let cancelled = h
        .lifecycle
        .cancel_booking(&booking.id, &traveler(), Some("exam moved"), cancel_at)
        .await
        .unwrap();

    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.refund_cents, 4500);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("exam moved"));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        0
    );

    let events = h.sink.events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(BookingEvent::BookingCancelled { refund_cents: 4500, .. })
    ));
}

#[tokio::test]
async fn late_cancel_refunds_fifty_percent() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(2), now()).await.unwrap();

    // One hour before departure, inside the 2-hour deadline.
    let cancel_at = DateTime::parse_from_rfc3339("2026-08-10T07:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let cancelled = h
        .lifecycle
        .cancel_booking(&booking.id, &traveler(), None, cancel_at)
        .await
        .unwrap();

    assert_eq!(cancelled.refund_cents, 2500);
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn cancel_of_cancelled_is_invalid_transition_with_no_ledger_mutation() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(2), now()).await.unwrap();
    h.lifecycle
        .cancel_booking(&booking.id, &traveler(), None, now())
        .await
        .unwrap();
    let committed_after_first = h.ledger.committed("route-1", travel_date()).await.unwrap();

    let err = h
        .lifecycle
        .cancel_booking(&booking.id, &traveler(), None, now())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::InvalidTransition(_)));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        committed_after_first
    );
}

#[tokio::test]
async fn cancel_of_completed_is_invalid_transition() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(1), now()).await.unwrap();
    h.lifecycle
        .complete_booking(&booking.id, &operator(), now())
        .await
        .unwrap();

    let err = h
        .lifecycle
        .cancel_booking(&booking.id, &traveler(), None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition(_)));
    // Completed bookings consumed their seats; nothing returns to the pool.
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn strangers_cannot_cancel() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(1), now()).await.unwrap();

    let stranger = Requester {
        id: "trav-999".into(),
        role: RequesterRole::Traveler,
        college_id: Some("college-1".into()),
    };
    let err = h
        .lifecycle
        .cancel_booking(&booking.id, &stranger, None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));

    let foreign_operator = Requester {
        id: "op-9".into(),
        role: RequesterRole::Operator,
        college_id: Some("college-9".into()),
    };
    let err = h
        .lifecycle
        .cancel_booking(&booking.id, &foreign_operator, None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));
}

#[tokio::test]
async fn travelers_cannot_complete_or_no_show() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(1), now()).await.unwrap();

    let err = h
        .lifecycle
        .complete_booking(&booking.id, &traveler(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));

    let err = h
        .lifecycle
        .mark_no_show(&booking.id, &traveler(), now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden));

    let done = h
        .lifecycle
        .mark_no_show(&booking.id, &operator(), now())
        .await
        .unwrap();
    assert_eq!(done.status, BookingStatus::NoShow);
}

#[tokio::test]
async fn inactive_route_and_wrong_college_are_not_eligible() {
    let mut route = campus_route(40, 2500);
    route.status = RouteStatus::Maintenance;
    let h = harness(route);
    let err = h.lifecycle.create_booking(request(1), now()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotEligible(_)));

    let h = harness(campus_route(40, 2500));
    let mut req = request(1);
    req.traveler_college_id = "college-9".into();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotEligible(_)));

    let mut req = request(1);
    req.route_id = "route-404".into();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::NotEligible(_)));
}

#[tokio::test]
async fn input_validation_rejects_bad_requests() {
    let h = harness(campus_route(40, 2500));

    let err = h
        .lifecycle
        .create_booking(request(0), now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    let err = h
        .lifecycle
        .create_booking(request(11), now())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    let mut req = request(1);
    req.pickup_stop = "Nowhere".into();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    // Riding backwards along the stop order.
    let mut req = request(1);
    req.pickup_stop = "Dormitories".into();
    req.dropoff_stop = "Main Gate".into();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    // No departure at the requested time.
    let mut req = request(1);
    req.departs_at = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    // Beyond the 30-day advance window.
    let mut req = request(1);
    req.travel_date = NaiveDate::from_ymd_opt(2026, 10, 5).unwrap();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    // Departure already passed.
    let mut req = request(1);
    req.travel_date = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
    let err = h.lifecycle.create_booking(req, now()).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    // Nothing above touched the ledger.
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn failed_persistence_releases_the_reservation() {
    let h = harness(campus_route(40, 2500));
    h.store.fail_insert.store(true, Ordering::SeqCst);

    let err = h
        .lifecycle
        .create_booking(request(2), now())
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::StorageUnavailable(_)));
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        0
    );
    assert!(h.sink.events.lock().unwrap().is_empty());

    // The slot is still sellable afterwards.
    h.store.fail_insert.store(false, Ordering::SeqCst);
    let booking = h.lifecycle.create_booking(request(2), now()).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn get_booking_and_availability() {
    let h = harness(campus_route(40, 2500));
    let booking = h.lifecycle.create_booking(request(3), now()).await.unwrap();

    let fetched = h.lifecycle.get_booking(&booking.id).await.unwrap();
    assert_eq!(fetched.id, booking.id);
    assert!(matches!(
        h.lifecycle.get_booking("missing").await.unwrap_err(),
        DomainError::NotFound
    ));

    let Availability {
        capacity,
        committed,
        available,
    } = h
        .lifecycle
        .availability("route-1", travel_date())
        .await
        .unwrap();
    assert_eq!((capacity, committed, available), (40, 3, 37));

    assert!(matches!(
        h.lifecycle
            .availability("route-404", travel_date())
            .await
            .unwrap_err(),
        DomainError::NotFound
    ));
}

#[tokio::test]
async fn capacity_invariant_holds_under_concurrent_bookings() {
    let h = harness(campus_route(5, 1000));
    let lifecycle = Arc::new(h.lifecycle);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let lifecycle = Arc::clone(&lifecycle);
        tasks.push(tokio::spawn(async move {
            let req = CreateBookingRequest {
                traveler_id: format!("trav-{i}"),
                ..request(1)
            };
            lifecycle.create_booking(req, now()).await.is_ok()
        }));
    }
    let mut confirmed = 0;
    for t in tasks {
        if t.await.unwrap() {
            confirmed += 1;
        }
    }

    assert_eq!(confirmed, 5);
    assert_eq!(
        h.ledger.committed("route-1", travel_date()).await.unwrap(),
        5
    );
}
