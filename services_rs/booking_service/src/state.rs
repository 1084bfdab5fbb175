use std::sync::Arc;
use ticketing_core::{BookingLifecycle, PassSigner};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<BookingLifecycle>,
    pub signer: PassSigner,
    pub env_name: String,
}
