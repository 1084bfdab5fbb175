use async_trait::async_trait;
use ticketing_core::{BookingEvent, EventSink};

/// Logs every booking event and, when an events endpoint is configured,
/// forwards it there as JSON. Delivery is best-effort: a failed POST is
/// logged and never fails the booking operation that produced the event.
pub struct WebhookEventSink {
    http: reqwest::Client,
    base_url: Option<String>,
    secret: Option<String>,
    service_id: String,
}

impl WebhookEventSink {
    pub fn new(
        http: reqwest::Client,
        base_url: Option<String>,
        secret: Option<String>,
        service_id: String,
    ) -> Self {
        Self {
            http,
            base_url,
            secret,
            service_id,
        }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn emit(&self, event: &BookingEvent) {
        tracing::info!(booking_id = event.booking_id(), "booking event");

        let Some(base) = self.base_url.as_deref() else {
            return;
        };
        let url = format!("{}/internal/bookings/events", base.trim_end_matches('/'));

        let mut req = self
            .http
            .post(url)
            .json(event)
            .header("Content-Type", "application/json")
            .header("X-Internal-Service-Id", &self.service_id);
        if let Some(secret) = self.secret.as_deref() {
            req = req.header("X-Booking-Events-Secret", secret);
        }

        match req.send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(
                    status = %resp.status(),
                    booking_id = event.booking_id(),
                    "event delivery rejected"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    booking_id = event.booking_id(),
                    "event delivery failed"
                );
            }
        }
    }
}
