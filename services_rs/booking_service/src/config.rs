use regex::Regex;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,
    pub env_lower: String,

    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    pub db_url: String,
    pub db_schema: Option<String>,
    pub db_timeout_ms: u64,

    pub pass_secret: String,

    pub max_seats_per_booking: i32,
    pub idempotency_retention_hours: i64,
    pub default_advance_days: i64,
    pub default_cancel_deadline_hours: f64,

    pub allowed_origins: Vec<String>,

    pub events_base_url: Option<String>,
    pub events_secret: Option<String>,
    pub internal_service_id: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn normalize_db_url(raw: &str) -> String {
    // Accept SQLAlchemy-style URLs like "postgresql+psycopg://..." by
    // dropping the "+driver" portion.
    if let Some(colon) = raw.find(':') {
        let (scheme, rest) = raw.split_at(colon);
        if let Some(plus) = scheme.find('+') {
            return format!("{}{}", &scheme[..plus], rest);
        }
    }
    raw.to_string()
}

fn validate_postgres_url(url: &str) -> Result<(), String> {
    let scheme = url
        .split_once(':')
        .map(|(s, _)| s.trim().to_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(()),
        _ => Err("BOOKING_DB_URL (or DB_URL) must be a postgres URL".to_string()),
    }
}

fn is_production_like(env_lower: &str) -> bool {
    matches!(env_lower, "prod" | "production" | "staging")
}

/// Secrets in prod/staging must be long enough and not look like a shipped
/// placeholder. Dev and test skip the check.
fn enforce_secret_policy(
    env_lower: &str,
    key: &str,
    value: Option<&str>,
    required_in_prod: bool,
) -> Result<(), String> {
    if !is_production_like(env_lower) {
        return Ok(());
    }
    let secret = value.map(str::trim).unwrap_or("");
    if secret.is_empty() {
        if required_in_prod {
            return Err(format!("{key} must be set in prod/staging"));
        }
        return Ok(());
    }
    if secret.len() < 16 {
        return Err(format!(
            "{key} must be at least 16 characters in prod/staging"
        ));
    }
    let lowered = secret.to_ascii_lowercase();
    let placeholders = [
        "change-me",
        "change_me",
        "changeme",
        "replace-me",
        "replace_me",
        "your-secret",
        "your_secret",
        "dev-secret",
        "dev_secret",
        "example",
        "default",
    ];
    if placeholders.iter().any(|p| lowered.contains(p)) {
        return Err(format!(
            "{key} looks like a placeholder value; use a strong random secret"
        ));
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("ENV", "dev");
        let env_lower = env_name.trim().to_lowercase();
        let prod_like = is_production_like(&env_lower);

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "8086")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let db_raw = env_opt("BOOKING_DB_URL")
            .or_else(|| env_opt("DB_URL"))
            .unwrap_or_else(|| "postgresql://campus:campus@db:5432/campus_booking".to_string());
        let db_url = normalize_db_url(&db_raw);
        validate_postgres_url(&db_url)?;

        let db_schema = env_opt("DB_SCHEMA");
        if let Some(s) = &db_schema {
            let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(|e| e.to_string())?;
            if !re.is_match(s) {
                return Err("DB_SCHEMA must match ^[A-Za-z_][A-Za-z0-9_]*$".to_string());
            }
        }

        let db_timeout_ms: u64 = env_or("BOOKING_DB_TIMEOUT_MS", "5000")
            .parse()
            .map_err(|_| "BOOKING_DB_TIMEOUT_MS must be an integer".to_string())?;
        let db_timeout_ms = db_timeout_ms.clamp(100, 30_000);

        let pass_secret = env_or("BOOKING_PASS_SECRET", "change-me-booking-pass");
        enforce_secret_policy(
            &env_lower,
            "BOOKING_PASS_SECRET",
            Some(pass_secret.as_str()),
            true,
        )?;

        let max_seats_per_booking: i32 = env_or("BOOKING_MAX_SEATS", "10")
            .parse()
            .map_err(|_| "BOOKING_MAX_SEATS must be an integer".to_string())?;
        let max_seats_per_booking = max_seats_per_booking.clamp(1, 40);

        let idempotency_retention_hours: i64 = env_or("BOOKING_IDEMPOTENCY_RETENTION_HOURS", "24")
            .parse()
            .map_err(|_| "BOOKING_IDEMPOTENCY_RETENTION_HOURS must be an integer".to_string())?;
        let idempotency_retention_hours = idempotency_retention_hours.clamp(1, 168);

        let default_advance_days: i64 = env_or("BOOKING_DEFAULT_ADVANCE_DAYS", "30")
            .parse()
            .map_err(|_| "BOOKING_DEFAULT_ADVANCE_DAYS must be an integer".to_string())?;
        let default_advance_days = default_advance_days.clamp(1, 365);

        let default_cancel_deadline_hours: f64 =
            env_or("BOOKING_DEFAULT_CANCEL_DEADLINE_HOURS", "2")
                .parse()
                .map_err(|_| {
                    "BOOKING_DEFAULT_CANCEL_DEADLINE_HOURS must be a number".to_string()
                })?;
        if !(0.0..=168.0).contains(&default_cancel_deadline_hours) {
            return Err(
                "BOOKING_DEFAULT_CANCEL_DEADLINE_HOURS must be between 0 and 168".to_string(),
            );
        }

        let mut allowed_origins = parse_csv(&env_or("ALLOWED_ORIGINS", ""));
        if allowed_origins.is_empty() {
            // Safe local default for development.
            allowed_origins = vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ];
        }
        if prod_like && allowed_origins.iter().any(|o| o.trim() == "*") {
            return Err("ALLOWED_ORIGINS must not contain '*' in prod/staging".to_string());
        }
        if prod_like
            && allowed_origins
                .iter()
                .any(|o| !o.trim().starts_with("https://"))
        {
            return Err("ALLOWED_ORIGINS must use https:// origins in prod/staging".to_string());
        }

        let max_body_bytes: usize = env_or("BOOKING_MAX_BODY_BYTES", "1048576")
            .parse()
            .map_err(|_| "BOOKING_MAX_BODY_BYTES must be an integer".to_string())?;
        let max_body_bytes = max_body_bytes.clamp(16 * 1024, 10 * 1024 * 1024);

        let events_base_url = env_opt("EVENTS_BASE_URL");
        let events_secret = env_opt("BOOKING_EVENTS_SECRET");
        if events_base_url.is_some() && prod_like && events_secret.is_none() {
            return Err(
                "BOOKING_EVENTS_SECRET must be set when EVENTS_BASE_URL is configured".to_string(),
            );
        }
        enforce_secret_policy(
            &env_lower,
            "BOOKING_EVENTS_SECRET",
            events_secret.as_deref(),
            false,
        )?;

        let internal_service_id = env_or("BOOKING_INTERNAL_SERVICE_ID", "booking")
            .trim()
            .to_ascii_lowercase();
        if internal_service_id.is_empty()
            || internal_service_id.len() > 64
            || !internal_service_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err("BOOKING_INTERNAL_SERVICE_ID must be 1..64 [A-Za-z0-9-_.]".to_string());
        }

        Ok(Self {
            env_name,
            env_lower,
            host,
            port,
            max_body_bytes,
            db_url,
            db_schema,
            db_timeout_ms,
            pass_secret,
            max_seats_per_booking,
            idempotency_retention_hours,
            default_advance_days,
            default_cancel_deadline_hours,
            allowed_origins,
            events_base_url,
            events_secret,
            internal_service_id,
        })
    }
}
