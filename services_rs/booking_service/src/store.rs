use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use ticketing_core::{
    AvailabilityLedger, Booking, BookingStatus, BookingStore, Directory, DomainError,
    IdempotencyRecord, OrgPolicy, PaymentStatus, RouteInfo, RouteStatus, RouteStop, ScheduleEntry,
    SeatHold, StopSnapshot,
};

const DATE_FMT: &str = "%Y-%m-%d";

/// Postgres implementation of the core's directory, ledger, and booking
/// store seams. The seats-committed counter lives in `seat_ledger` and is
/// only ever moved by the conditional update in `reserve` and the floored
/// decrement in `release`, so it survives restarts and serializes racing
/// reservations at the storage layer.
pub struct PgStore {
    pool: PgPool,
    db_schema: Option<String>,
    timeout: std::time::Duration,
    retention: Duration,
    default_policy: OrgPolicy,
}

impl PgStore {
    pub fn new(
        pool: PgPool,
        db_schema: Option<String>,
        db_timeout_ms: u64,
        idempotency_retention_hours: i64,
        default_policy: OrgPolicy,
    ) -> Self {
        Self {
            pool,
            db_schema,
            timeout: std::time::Duration::from_millis(db_timeout_ms),
            retention: Duration::hours(idempotency_retention_hours),
            default_policy,
        }
    }

    fn table(&self, name: &str) -> String {
        match &self.db_schema {
            Some(s) => format!("{s}.{name}"),
            None => name.to_string(),
        }
    }

    /// Every storage call runs under the configured timeout and surfaces a
    /// retryable error instead of hanging.
    async fn timed<T, F>(&self, what: &'static str, fut: F) -> Result<T, DomainError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => {
                tracing::error!(error = %e, what, "db query failed");
                Err(DomainError::StorageUnavailable(format!("{what} failed")))
            }
            Err(_) => {
                tracing::error!(what, "db query timed out");
                Err(DomainError::StorageTimeout)
            }
        }
    }
}

fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn parse_date(raw: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FMT)
        .map_err(|_| DomainError::StorageUnavailable("bad date in storage".into()))
}

fn row_dt(row: &PgRow, col: &str) -> Result<DateTime<Utc>, DomainError> {
    let raw: String = row
        .try_get(col)
        .map_err(|_| DomainError::StorageUnavailable(format!("missing column {col}")))?;
    let s = raw.trim().replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::StorageUnavailable(format!("bad timestamp in column {col}")))
}

fn parse_stops(raw: &str) -> Result<Vec<RouteStop>, DomainError> {
    serde_json::from_str(raw)
        .map_err(|_| DomainError::StorageUnavailable("bad stops payload in storage".into()))
}

fn parse_schedules(raw: &str) -> Result<Vec<ScheduleEntry>, DomainError> {
    serde_json::from_str(raw)
        .map_err(|_| DomainError::StorageUnavailable("bad schedules payload in storage".into()))
}

fn parse_snapshot(raw: &str) -> Result<StopSnapshot, DomainError> {
    serde_json::from_str(raw)
        .map_err(|_| DomainError::StorageUnavailable("bad stop snapshot in storage".into()))
}

fn row_to_booking(row: &PgRow) -> Result<Booking, DomainError> {
    let travel_date: String = row
        .try_get("travel_date")
        .map_err(|_| DomainError::StorageUnavailable("missing travel_date".into()))?;
    let pickup: String = row
        .try_get("pickup")
        .map_err(|_| DomainError::StorageUnavailable("missing pickup".into()))?;
    let dropoff: String = row
        .try_get("dropoff")
        .map_err(|_| DomainError::StorageUnavailable("missing dropoff".into()))?;
    let status: String = row
        .try_get("status")
        .map_err(|_| DomainError::StorageUnavailable("missing status".into()))?;
    let payment_status: String = row
        .try_get("payment_status")
        .map_err(|_| DomainError::StorageUnavailable("missing payment_status".into()))?;

    Ok(Booking {
        id: row.try_get("id").unwrap_or_default(),
        traveler_id: row.try_get("traveler_id").unwrap_or_default(),
        route_id: row.try_get("route_id").unwrap_or_default(),
        college_id: row.try_get("college_id").unwrap_or_default(),
        travel_date: parse_date(&travel_date)?,
        depart_at: row_dt(row, "depart_at")?,
        pickup: parse_snapshot(&pickup)?,
        dropoff: parse_snapshot(&dropoff)?,
        seats: row.try_get("seats").unwrap_or(0),
        unit_fare_cents: row.try_get("unit_fare_cents").unwrap_or(0),
        total_cents: row.try_get("total_cents").unwrap_or(0),
        payment_status: PaymentStatus::parse(&payment_status)?,
        status: BookingStatus::parse(&status)?,
        pass_payload: row.try_get("pass_payload").unwrap_or_default(),
        cancel_reason: row.try_get("cancel_reason").unwrap_or(None),
        refund_cents: row.try_get("refund_cents").unwrap_or(0),
        hold_id: row.try_get("hold_id").unwrap_or_default(),
        created_at: row_dt(row, "created_at")?,
        updated_at: row_dt(row, "updated_at")?,
    })
}

#[async_trait]
impl Directory for PgStore {
    async fn route(&self, route_id: &str) -> Result<Option<RouteInfo>, DomainError> {
        let routes = self.table("routes");
        let sql = format!(
            "SELECT id,college_id,capacity,base_fare_cents,status,stops,schedules FROM {routes} WHERE id=$1"
        );
        let row = self
            .timed("route lookup", async {
                sqlx::query(&sql)
                    .bind(route_id.trim())
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row
            .try_get("status")
            .unwrap_or_else(|_| "inactive".to_string());
        let stops: String = row.try_get("stops").unwrap_or_else(|_| "[]".to_string());
        let schedules: String = row
            .try_get("schedules")
            .unwrap_or_else(|_| "[]".to_string());

        Ok(Some(RouteInfo {
            id: row.try_get("id").unwrap_or_default(),
            college_id: row.try_get("college_id").unwrap_or_default(),
            status: RouteStatus::parse(&status)?,
            capacity: row.try_get("capacity").unwrap_or(0),
            base_fare_cents: row.try_get("base_fare_cents").unwrap_or(0),
            stops: parse_stops(&stops)?,
            schedules: parse_schedules(&schedules)?,
        }))
    }

    async fn org_policy(&self, college_id: &str) -> Result<OrgPolicy, DomainError> {
        let colleges = self.table("colleges");
        let sql = format!(
            "SELECT advance_booking_days,cancellation_deadline_hours FROM {colleges} WHERE id=$1"
        );
        let row = self
            .timed("college policy lookup", async {
                sqlx::query(&sql)
                    .bind(college_id.trim())
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
        Ok(match row {
            Some(row) => {
                let advance: i32 = row
                    .try_get("advance_booking_days")
                    .unwrap_or(self.default_policy.advance_booking_days as i32);
                let deadline: i32 = row
                    .try_get("cancellation_deadline_hours")
                    .unwrap_or(self.default_policy.cancellation_deadline_hours as i32);
                OrgPolicy {
                    advance_booking_days: advance as i64,
                    cancellation_deadline_hours: deadline as f64,
                }
            }
            None => self.default_policy,
        })
    }
}

#[async_trait]
impl AvailabilityLedger for PgStore {
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
        let ledger = self.table("seat_ledger");
        let holds = self.table("seat_holds");
        let date = date_str(travel_date);

        let mut tx = self
            .timed("begin tx", self.pool.begin())
            .await?;

        let seed = format!(
            "INSERT INTO {ledger} (route_id,travel_date,committed) VALUES ($1,$2,0) \
             ON CONFLICT (route_id,travel_date) DO NOTHING"
        );
        self.timed("ledger seed", async {
            sqlx::query(&seed)
                .bind(route_id)
                .bind(&date)
                .execute(&mut *tx)
                .await
        })
        .await?;

        // The capacity check and the increment are one statement; racing
        // reservations serialize on this row and the loser sees zero rows
        // affected.
        let take = format!(
            "UPDATE {ledger} SET committed = committed + $3 \
             WHERE route_id=$1 AND travel_date=$2 AND committed + $3 <= $4"
        );
        let res = self
            .timed("ledger reserve", async {
                sqlx::query(&take)
                    .bind(route_id)
                    .bind(&date)
                    .bind(seats)
                    .bind(capacity)
                    .execute(&mut *tx)
                    .await
            })
            .await?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(DomainError::CapacityExceeded);
        }

        let hold = SeatHold {
            id: uuid::Uuid::new_v4().to_string(),
            route_id: route_id.to_string(),
            travel_date,
            seats,
        };
        let insert_hold = format!(
            "INSERT INTO {holds} (id,route_id,travel_date,seats,released,created_at) \
             VALUES ($1,$2,$3,$4,0,$5)"
        );
        self.timed("hold insert", async {
            sqlx::query(&insert_hold)
                .bind(&hold.id)
                .bind(route_id)
                .bind(&date)
                .bind(seats)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await
        })
        .await?;

        self.timed("commit tx", tx.commit()).await?;
        Ok(hold)
    }

    async fn release(&self, hold: &SeatHold) -> Result<(), DomainError> {
        let ledger = self.table("seat_ledger");
        let holds = self.table("seat_holds");
        let date = date_str(hold.travel_date);

        let mut tx = self
            .timed("begin tx", self.pool.begin())
            .await?;

        // Flipping the released flag first makes release idempotent per
        // hold: the second caller sees zero rows and stops here.
        let flip = format!("UPDATE {holds} SET released=1 WHERE id=$1 AND released=0");
        let res = self
            .timed("hold release", async {
                sqlx::query(&flip).bind(&hold.id).execute(&mut *tx).await
            })
            .await?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(DomainError::AlreadyReleased);
        }

        let give_back = format!(
            "UPDATE {ledger} SET committed = GREATEST(committed - $3, 0) \
             WHERE route_id=$1 AND travel_date=$2"
        );
        self.timed("ledger release", async {
            sqlx::query(&give_back)
                .bind(&hold.route_id)
                .bind(&date)
                .bind(hold.seats)
                .execute(&mut *tx)
                .await
        })
        .await?;

        self.timed("commit tx", tx.commit()).await?;
        Ok(())
    }

    async fn committed(&self, route_id: &str, travel_date: NaiveDate) -> Result<i32, DomainError> {
        let ledger = self.table("seat_ledger");
        let sql = format!("SELECT committed FROM {ledger} WHERE route_id=$1 AND travel_date=$2");
        let row = self
            .timed("ledger read", async {
                sqlx::query(&sql)
                    .bind(route_id.trim())
                    .bind(date_str(travel_date))
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
        Ok(row
            .map(|r| r.try_get("committed").unwrap_or(0))
            .unwrap_or(0))
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert(&self, booking: &Booking) -> Result<(), DomainError> {
        let bookings = self.table("bookings");
        let pickup = serde_json::to_string(&booking.pickup)
            .map_err(|_| DomainError::StorageUnavailable("stop snapshot encode failed".into()))?;
        let dropoff = serde_json::to_string(&booking.dropoff)
            .map_err(|_| DomainError::StorageUnavailable("stop snapshot encode failed".into()))?;
        let sql = format!(
            "INSERT INTO {bookings} (id,traveler_id,route_id,college_id,travel_date,depart_at,\
             pickup,dropoff,seats,unit_fare_cents,total_cents,payment_status,status,pass_payload,\
             cancel_reason,refund_cents,hold_id,created_at,updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)"
        );
        self.timed("booking insert", async {
            sqlx::query(&sql)
                .bind(&booking.id)
                .bind(&booking.traveler_id)
                .bind(&booking.route_id)
                .bind(&booking.college_id)
                .bind(date_str(booking.travel_date))
                .bind(booking.depart_at.to_rfc3339())
                .bind(&pickup)
                .bind(&dropoff)
                .bind(booking.seats)
                .bind(booking.unit_fare_cents)
                .bind(booking.total_cents)
                .bind(booking.payment_status.as_str())
                .bind(booking.status.as_str())
                .bind(&booking.pass_payload)
                .bind(&booking.cancel_reason)
                .bind(booking.refund_cents)
                .bind(&booking.hold_id)
                .bind(booking.created_at.to_rfc3339())
                .bind(booking.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }

    async fn get(&self, booking_id: &str) -> Result<Option<Booking>, DomainError> {
        let bookings = self.table("bookings");
        let sql = format!(
            "SELECT id,traveler_id,route_id,college_id,travel_date,depart_at,pickup,dropoff,\
             seats,unit_fare_cents,total_cents,payment_status,status,pass_payload,cancel_reason,\
             refund_cents,hold_id,created_at,updated_at FROM {bookings} WHERE id=$1"
        );
        let row = self
            .timed("booking lookup", async {
                sqlx::query(&sql)
                    .bind(booking_id.trim())
                    .fetch_optional(&self.pool)
                    .await
            })
            .await?;
        row.map(|r| row_to_booking(&r)).transpose()
    }

    async fn mark_cancelled(
        &self,
        booking_id: &str,
        reason: Option<&str>,
        refund_cents: i64,
        payment_status: PaymentStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let bookings = self.table("bookings");
        let sql = format!(
            "UPDATE {bookings} SET status=$2, cancel_reason=$3, refund_cents=$4, \
             payment_status=$5, updated_at=$6 WHERE id=$1"
        );
        let res = self
            .timed("booking cancel update", async {
                sqlx::query(&sql)
                    .bind(booking_id)
                    .bind(BookingStatus::Cancelled.as_str())
                    .bind(reason)
                    .bind(refund_cents)
                    .bind(payment_status.as_str())
                    .bind(updated_at.to_rfc3339())
                    .execute(&self.pool)
                    .await
            })
            .await?;
        if res.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    async fn mark_terminal(
        &self,
        booking_id: &str,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let bookings = self.table("bookings");
        let sql = format!("UPDATE {bookings} SET status=$2, updated_at=$3 WHERE id=$1");
        let res = self
            .timed("booking terminal update", async {
                sqlx::query(&sql)
                    .bind(booking_id)
                    .bind(status.as_str())
                    .bind(updated_at.to_rfc3339())
                    .execute(&self.pool)
                    .await
            })
            .await?;
        if res.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    async fn idempotency_get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DomainError> {
        let idempotency = self.table("idempotency");
        let sql = format!(
            "SELECT key,fingerprint,booking_id,created_at FROM {idempotency} WHERE key=$1"
        );
        let row = self
            .timed("idempotency lookup", async {
                sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await
            })
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let created_at = row_dt(&row, "created_at")?;
        if now - created_at >= self.retention {
            // Stale record: the key may be reused. Clear it out of the way.
            let purge = format!("DELETE FROM {idempotency} WHERE key=$1 AND created_at=$2");
            let _ = sqlx::query(&purge)
                .bind(key)
                .bind(created_at.to_rfc3339())
                .execute(&self.pool)
                .await;
            return Ok(None);
        }

        Ok(Some(IdempotencyRecord {
            key: row.try_get("key").unwrap_or_default(),
            fingerprint: row.try_get("fingerprint").unwrap_or_default(),
            booking_id: row.try_get("booking_id").unwrap_or(None),
            created_at,
        }))
    }

    async fn idempotency_put(&self, record: &IdempotencyRecord) -> Result<(), DomainError> {
        let idempotency = self.table("idempotency");
        let sql = format!(
            "INSERT INTO {idempotency} (key,fingerprint,booking_id,created_at) \
             VALUES ($1,$2,$3,$4) \
             ON CONFLICT (key) DO UPDATE SET fingerprint=EXCLUDED.fingerprint, \
             booking_id=EXCLUDED.booking_id, created_at=EXCLUDED.created_at"
        );
        self.timed("idempotency write", async {
            sqlx::query(&sql)
                .bind(&record.key)
                .bind(&record.fingerprint)
                .bind(&record.booking_id)
                .bind(record.created_at.to_rfc3339())
                .execute(&self.pool)
                .await
        })
        .await?;
        Ok(())
    }
}
