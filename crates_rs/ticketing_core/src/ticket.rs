use crate::error::DomainError;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const PASS_PREFIX: &str = "PASS";
/// 128-bit nonce; makes payloads unique and unguessable independent of the
/// booking id.
const NONCE_BYTES: usize = 16;

/// Fields recovered from a presented pass payload after signature
/// verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassClaims {
    pub booking_id: String,
    pub nonce: String,
}

/// Issues and verifies boarding-pass payloads.
///
/// Payload shape: `PASS|b=<booking_id>|n=<hex nonce>|sig=<hex hmac>`, with
/// the HMAC-SHA256 computed over `booking_id:nonce`. The payload is the sole
/// boarding credential, so verification is constant-time end to end.
#[derive(Clone)]
pub struct PassSigner {
    secret: String,
}

impl PassSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// A fresh payload for `booking_id`. Generated once at booking creation
    /// and never regenerated.
    pub fn issue(&self, booking_id: &str) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let sig = self.sign(booking_id, &nonce);
        format!("{PASS_PREFIX}|b={booking_id}|n={nonce}|sig={sig}")
    }

    /// Parses and authenticates a presented payload.
    pub fn verify(&self, payload: &str) -> Result<PassClaims, DomainError> {
        let (booking_id, nonce, sig) = parse_payload(payload)?;
        let expect = self.sign(&booking_id, &nonce);
        if expect.as_bytes().ct_eq(sig.as_bytes()).unwrap_u8() != 1 {
            return Err(DomainError::Forbidden);
        }
        Ok(PassClaims { booking_id, nonce })
    }

    /// Constant-time equality for stored-vs-presented payload comparison.
    pub fn payloads_match(stored: &str, presented: &str) -> bool {
        stored.as_bytes().ct_eq(presented.as_bytes()).unwrap_u8() == 1
    }

    fn sign(&self, booking_id: &str, nonce: &str) -> String {
        let msg = format!("{booking_id}:{nonce}");
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("hmac key");
        mac.update(msg.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn parse_payload(raw: &str) -> Result<(String, String, String), DomainError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DomainError::invalid("empty pass payload"));
    }
    let mut parts = raw.split('|');
    if parts.next() != Some(PASS_PREFIX) {
        return Err(DomainError::invalid("malformed pass payload"));
    }
    let mut booking_id = String::new();
    let mut nonce = String::new();
    let mut sig = String::new();
    for kv in parts {
        let Some((k, v)) = kv.split_once('=') else {
            continue;
        };
        match k {
            "b" => booking_id = v.to_string(),
            "n" => nonce = v.to_string(),
            "sig" => sig = v.to_string(),
            _ => {}
        }
    }
    if booking_id.is_empty() || nonce.is_empty() || sig.is_empty() {
        return Err(DomainError::invalid("malformed pass payload"));
    }
    Ok((booking_id, nonce, sig))
}
