//! Booking domain core for the campus shuttle network.
//!
//! Everything that decides whether a seat may be sold lives here: fare and
//! refund arithmetic, the seats-committed ledger contract, the booking state
//! machine, and boarding-pass credentials. The crate owns no I/O; storage,
//! route data, and event delivery arrive through the traits in [`ledger`],
//! [`lifecycle`], and [`events`], and every operation takes its `now` from
//! the caller.

pub mod booking;
pub mod error;
pub mod events;
pub mod fare;
pub mod ledger;
pub mod lifecycle;
pub mod refund;
pub mod ticket;

pub use booking::{
    Booking, BookingStatus, OrgPolicy, PaymentStatus, Requester, RequesterRole, RouteInfo,
    RouteStatus, RouteStop, ScheduleEntry, StopSnapshot,
};
pub use error::DomainError;
pub use events::{BookingEvent, EventSink};
pub use ledger::{AvailabilityLedger, MemoryLedger, SeatHold};
pub use lifecycle::{
    Availability, BookingLifecycle, BookingStore, CreateBookingRequest, Directory,
    IdempotencyRecord, LifecycleOptions,
};
pub use ticket::{PassClaims, PassSigner};
