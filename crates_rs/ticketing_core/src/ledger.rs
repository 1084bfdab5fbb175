use crate::error::DomainError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A successful reservation. Carries everything `release` needs, so a
/// booking can hand its hold back without another directory read.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatHold {
    pub id: String,
    pub route_id: String,
    pub travel_date: NaiveDate,
    pub seats: i32,
}

/// Authoritative seats-committed counter per (route, travel date).
///
/// `reserve` is the one mutual-exclusion point in the whole core: the
/// capacity check and the increment must be a single atomic step, however
/// the implementation serializes it. `release` is idempotent per hold —
/// a second release of the same hold fails `AlreadyReleased` and leaves
/// the counter untouched.
#[async_trait]
pub trait AvailabilityLedger: Send + Sync {
    async fn reserve(
        &self,
        route_id: &str,
        travel_date: NaiveDate,
        seats: i32,
        capacity: i32,
    ) -> Result<SeatHold, DomainError>;

    async fn release(&self, hold: &SeatHold) -> Result<(), DomainError>;

    async fn committed(&self, route_id: &str, travel_date: NaiveDate) -> Result<i32, DomainError>;
}

#[derive(Default)]
struct MemoryLedgerState {
    committed: HashMap<(String, NaiveDate), i32>,
    released: HashMap<String, bool>,
}

/// Mutex-serialized in-process ledger. Honors the exact trait contract and
/// backs the core test suite; durable deployments use a storage-layer
/// implementation instead.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryLedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityLedger for MemoryLedger {
    async fn reserve(
        &self,
        route_id: &str,
        travel_date: NaiveDate,
        seats: i32,
        capacity: i32,
    ) -> Result<SeatHold, DomainError> {
        if seats < 1 {
            return Err(DomainError::invalid("seats must be >= 1"));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("ledger poisoned".into()))?;
        let key = (route_id.to_string(), travel_date);
        let committed = state.committed.get(&key).copied().unwrap_or(0);
        if committed + seats > capacity {
            return Err(DomainError::CapacityExceeded);
        }
        state.committed.insert(key, committed + seats);
        let hold = SeatHold {
            id: Uuid::new_v4().to_string(),
            route_id: route_id.to_string(),
            travel_date,
            seats,
        };
        state.released.insert(hold.id.clone(), false);
        Ok(hold)
    }

    async fn release(&self, hold: &SeatHold) -> Result<(), DomainError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("ledger poisoned".into()))?;
        match state.released.get(&hold.id) {
            None | Some(true) => return Err(DomainError::AlreadyReleased),
            Some(false) => {}
        }
        state.released.insert(hold.id.clone(), true);
        let key = (hold.route_id.clone(), hold.travel_date);
        let committed = state.committed.get(&key).copied().unwrap_or(0);
        state.committed.insert(key, (committed - hold.seats).max(0));
        Ok(())
    }

    async fn committed(&self, route_id: &str, travel_date: NaiveDate) -> Result<i32, DomainError> {
        let state = self
            .state
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("ledger poisoned".into()))?;
        Ok(state
            .committed
            .get(&(route_id.to_string(), travel_date))
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 1).unwrap()
    }

    #[tokio::test]
    async fn reserve_within_capacity() {
        let ledger = MemoryLedger::new();
        let hold = ledger.reserve("r1", date(), 2, 40).await.unwrap();
        assert_eq!(hold.seats, 2);
        assert_eq!(ledger.committed("r1", date()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reserve_beyond_capacity_fails_and_leaves_counter() {
        let ledger = MemoryLedger::new();
        ledger.reserve("r1", date(), 2, 2).await.unwrap();
        let err = ledger.reserve("r1", date(), 1, 2).await.unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded));
        assert_eq!(ledger.committed("r1", date()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn keys_are_per_route_and_date() {
        let ledger = MemoryLedger::new();
        ledger.reserve("r1", date(), 2, 2).await.unwrap();
        // A different date or route has its own counter.
        let other = NaiveDate::from_ymd_opt(2026, 9, 2).unwrap();
        assert!(ledger.reserve("r1", other, 2, 2).await.is_ok());
        assert!(ledger.reserve("r2", date(), 2, 2).await.is_ok());
    }

    #[tokio::test]
    async fn release_returns_seats_once() {
        let ledger = MemoryLedger::new();
        let hold = ledger.reserve("r1", date(), 3, 40).await.unwrap();
        ledger.release(&hold).await.unwrap();
        assert_eq!(ledger.committed("r1", date()).await.unwrap(), 0);

        let err = ledger.release(&hold).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyReleased));
        assert_eq!(ledger.committed("r1", date()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_of_unknown_hold_is_rejected() {
        let ledger = MemoryLedger::new();
        let bogus = SeatHold {
            id: "nope".into(),
            route_id: "r1".into(),
            travel_date: date(),
            seats: 5,
        };
        assert!(matches!(
            ledger.release(&bogus).await.unwrap_err(),
            DomainError::AlreadyReleased
        ));
    }

    #[tokio::test]
    async fn rejects_non_positive_seat_counts() {
        let ledger = MemoryLedger::new();
        assert!(ledger.reserve("r1", date(), 0, 40).await.is_err());
        assert!(ledger.reserve("r1", date(), -3, 40).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_reserves_never_exceed_capacity() {
        let ledger = Arc::new(MemoryLedger::new());
        let capacity = 5;
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                ledger.reserve("r1", date(), 1, capacity).await.is_ok()
            }));
        }
        let mut won = 0;
        for t in tasks {
            if t.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, capacity);
        assert_eq!(ledger.committed("r1", date()).await.unwrap(), capacity);
    }
}
