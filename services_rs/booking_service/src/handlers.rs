use crate::error::{ApiError, ApiResult};
use crate::models::{
    AvailabilityOut, BookingOut, CancelIn, CreateBookingIn, HealthOut, VerifyPassIn, VerifyPassOut,
};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{NaiveDate, NaiveTime, Utc};
use ticketing_core::{
    BookingStatus, CreateBookingRequest, PassSigner, Requester, RequesterRole,
};

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Booking API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Identity is pre-validated by the gateway and arrives as plain headers;
/// this service trusts them as-is.
fn requester(headers: &HeaderMap) -> Result<Requester, ApiError> {
    let id = header_str(headers, "x-requester-id")
        .ok_or_else(|| ApiError::bad_request("x-requester-id header required"))?;
    let role = header_str(headers, "x-requester-role")
        .ok_or_else(|| ApiError::bad_request("x-requester-role header required"))?;
    let role = RequesterRole::parse(role)
        .map_err(|_| ApiError::bad_request("invalid x-requester-role header"))?;
    let college_id = header_str(headers, "x-requester-college").map(ToString::to_string);
    Ok(Requester {
        id: id.to_string(),
        role,
        college_id,
    })
}

fn parse_travel_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("invalid travel_date (YYYY-MM-DD)"))
}

fn parse_departs_at(raw: &str) -> Result<NaiveTime, ApiError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ApiError::bad_request("invalid departs_at (HH:MM)"))
}

pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<CreateBookingIn>,
) -> ApiResult<axum::Json<BookingOut>> {
    let requester = requester(&headers)?;
    let traveler_college_id = requester
        .college_id
        .clone()
        .ok_or_else(|| ApiError::bad_request("x-requester-college header required"))?;

    let travel_date = parse_travel_date(&body.travel_date)?;
    let departs_at = parse_departs_at(&body.departs_at)?;
    let idempotency_key = header_str(&headers, "idempotency-key").map(ToString::to_string);

    let request = CreateBookingRequest {
        traveler_id: requester.id,
        traveler_college_id,
        route_id: body.route_id,
        travel_date,
        departs_at,
        pickup_stop: body.pickup_stop,
        dropoff_stop: body.dropoff_stop,
        seats: body.seats,
        idempotency_key,
    };

    let booking = state
        .lifecycle
        .create_booking(request, Utc::now())
        .await?;
    Ok(axum::Json(booking.into()))
}

pub async fn get_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<BookingOut>> {
    let booking = state.lifecycle.get_booking(booking_id.trim()).await?;
    Ok(axum::Json(booking.into()))
}

pub async fn cancel_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<CancelIn>,
) -> ApiResult<axum::Json<BookingOut>> {
    let requester = requester(&headers)?;
    let booking = state
        .lifecycle
        .cancel_booking(
            booking_id.trim(),
            &requester,
            body.reason.as_deref(),
            Utc::now(),
        )
        .await?;
    Ok(axum::Json(booking.into()))
}

pub async fn complete_booking(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<axum::Json<BookingOut>> {
    let requester = requester(&headers)?;
    let booking = state
        .lifecycle
        .complete_booking(booking_id.trim(), &requester, Utc::now())
        .await?;
    Ok(axum::Json(booking.into()))
}

pub async fn mark_no_show(
    Path(booking_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<axum::Json<BookingOut>> {
    let requester = requester(&headers)?;
    let booking = state
        .lifecycle
        .mark_no_show(booking_id.trim(), &requester, Utc::now())
        .await?;
    Ok(axum::Json(booking.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct AvailabilityParams {
    pub date: String,
}

pub async fn availability(
    Path(route_id): Path<String>,
    State(state): State<AppState>,
    Query(params): Query<AvailabilityParams>,
) -> ApiResult<axum::Json<AvailabilityOut>> {
    let travel_date = parse_travel_date(&params.date)?;
    let availability = state
        .lifecycle
        .availability(route_id.trim(), travel_date)
        .await?;
    Ok(axum::Json(AvailabilityOut {
        route_id: route_id.trim().to_string(),
        travel_date,
        capacity: availability.capacity,
        committed: availability.committed,
        available: availability.available,
    }))
}

pub async fn verify_pass(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<VerifyPassIn>,
) -> ApiResult<axum::Json<VerifyPassOut>> {
    let claims = state.signer.verify(&body.payload)?;
    let booking = state
        .lifecycle
        .get_booking(&claims.booking_id)
        .await
        .map_err(|_| ApiError::not_found("pass not recognized"))?;

    // The stored payload is the credential of record; a stale or
    // reissued-looking payload with a valid signature still fails here.
    if !PassSigner::payloads_match(&booking.pass_payload, body.payload.trim()) {
        return Err(ApiError::forbidden("pass does not match booking"));
    }
    if booking.status != BookingStatus::Confirmed {
        return Err(ApiError::new(
            axum::http::StatusCode::CONFLICT,
            "pass_not_active",
            format!("booking is {}", booking.status.as_str()),
        ));
    }

    Ok(axum::Json(VerifyPassOut {
        ok: true,
        booking_id: booking.id,
        route_id: booking.route_id,
        travel_date: booking.travel_date,
        seats: booking.seats,
        status: booking.status.as_str().to_string(),
    }))
}
