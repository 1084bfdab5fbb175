use sqlx::postgres::{PgPool, PgPoolOptions};

fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let colleges = table_name(db_schema, "colleges");
    let routes = table_name(db_schema, "routes");
    let bookings = table_name(db_schema, "bookings");
    let seat_ledger = table_name(db_schema, "seat_ledger");
    let seat_holds = table_name(db_schema, "seat_holds");
    let idempotency = table_name(db_schema, "idempotency");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {colleges} (\
             id VARCHAR(36) PRIMARY KEY,\
             name VARCHAR(120) NOT NULL,\
             advance_booking_days INTEGER NOT NULL DEFAULT 30,\
             cancellation_deadline_hours INTEGER NOT NULL DEFAULT 2\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {routes} (\
             id VARCHAR(36) PRIMARY KEY,\
             college_id VARCHAR(36) NOT NULL,\
             name VARCHAR(120),\
             capacity INTEGER NOT NULL DEFAULT 40,\
             base_fare_cents BIGINT NOT NULL DEFAULT 0,\
             status VARCHAR(16) NOT NULL DEFAULT 'active',\
             stops TEXT NOT NULL DEFAULT '[]',\
             schedules TEXT NOT NULL DEFAULT '[]'\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             traveler_id VARCHAR(64) NOT NULL,\
             route_id VARCHAR(36) NOT NULL,\
             college_id VARCHAR(36) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             depart_at TEXT NOT NULL,\
             pickup TEXT NOT NULL,\
             dropoff TEXT NOT NULL,\
             seats INTEGER NOT NULL DEFAULT 1,\
             unit_fare_cents BIGINT NOT NULL DEFAULT 0,\
             total_cents BIGINT NOT NULL DEFAULT 0,\
             payment_status VARCHAR(16) NOT NULL DEFAULT 'pending',\
             status VARCHAR(16) NOT NULL DEFAULT 'confirmed',\
             pass_payload VARCHAR(256) NOT NULL UNIQUE,\
             cancel_reason VARCHAR(256),\
             refund_cents BIGINT NOT NULL DEFAULT 0,\
             hold_id VARCHAR(36) NOT NULL,\
             created_at TEXT,\
             updated_at TEXT\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {seat_ledger} (\
             route_id VARCHAR(36) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             committed INTEGER NOT NULL DEFAULT 0,\
             PRIMARY KEY (route_id, travel_date)\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {seat_holds} (\
             id VARCHAR(36) PRIMARY KEY,\
             route_id VARCHAR(36) NOT NULL,\
             travel_date VARCHAR(10) NOT NULL,\
             seats INTEGER NOT NULL,\
             released INTEGER NOT NULL DEFAULT 0,\
             created_at TEXT\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {idempotency} (\
             key VARCHAR(120) PRIMARY KEY,\
             fingerprint VARCHAR(128) NOT NULL,\
             booking_id VARCHAR(36),\
             created_at TEXT\
             )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_routes_college ON {routes}(college_id)"),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_traveler ON {bookings}(traveler_id)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_bookings_route_date ON {bookings}(route_id, travel_date)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_holds_route_date ON {seat_holds}(route_id, travel_date)"),
        format!("CREATE INDEX IF NOT EXISTS idx_idempotency_created ON {idempotency}(created_at)"),
    ];

    for ddl in ddls {
        let _ = sqlx::query(&ddl).execute(pool).await;
    }

    let _ = sqlx::query(&format!(
        "ALTER TABLE {routes} ADD COLUMN IF NOT EXISTS schedules TEXT DEFAULT '[]'"
    ))
    .execute(pool)
    .await;
    let _ = sqlx::query(&format!(
        "ALTER TABLE {bookings} ADD COLUMN IF NOT EXISTS refund_cents BIGINT DEFAULT 0"
    ))
    .execute(pool)
    .await;
    let _ = sqlx::query(&format!(
        "ALTER TABLE {bookings} ADD COLUMN IF NOT EXISTS cancel_reason VARCHAR(256)"
    ))
    .execute(pool)
    .await;
    let _ = sqlx::query(&format!(
        "ALTER TABLE {colleges} ADD COLUMN IF NOT EXISTS cancellation_deadline_hours INTEGER DEFAULT 2"
    ))
    .execute(pool)
    .await;

    Ok(())
}
