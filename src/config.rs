use std::env;
use std::time::Duration;

use crate::tickets::TicketSigner;

/// Default cap on a single contribution, in minor units.
pub const DEFAULT_MAX_CONTRIBUTION_CENTS: i64 = 10_000_000;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub database_path: String,
    pub audit_database_path: String,
    pub dev_mode: bool,

    /// Payment processor REST API base (Stripe-compatible)
    pub processor_api_base: String,
    pub processor_secret_key: String,
    pub processor_webhook_secret: String,
    /// Maximum age of a signed webhook timestamp
    pub webhook_tolerance_secs: i64,
    /// Upper bound on a checkout session request to the processor
    pub checkout_timeout: Duration,
    pub max_contribution_cents: i64,

    pub ticket_signer: TicketSigner,
    pub ticket_validity_days: u64,

    pub follow_up_poll_interval: Duration,
    pub follow_up_batch_size: i64,
    pub reconcile_interval: Duration,

    pub activity_log_enabled: bool,
    /// Days to keep activity log entries (0 = forever)
    pub activity_log_retention_days: i64,

    /// Key required on /admin routes. Admin routes are disabled when unset.
    pub internal_api_key: Option<String>,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Floor for worker and reconcile intervals; zero would spin the loops.
pub const MIN_INTERVAL_SECS: u64 = 1;

fn interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_INTERVAL_SECS))
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("FUNDLEDGER_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let ticket_signer = match env::var("TICKET_SIGNING_KEY") {
            Ok(encoded) => TicketSigner::from_base64(&encoded)
                .expect("TICKET_SIGNING_KEY must be a base64-encoded 32-byte Ed25519 seed"),
            Err(_) if dev_mode => {
                tracing::warn!("TICKET_SIGNING_KEY not set, using an ephemeral dev key");
                TicketSigner::generate()
            }
            Err(_) => panic!(
                "TICKET_SIGNING_KEY is required outside dev mode (generate one with --generate-ticket-key)"
            ),
        };

        let processor_webhook_secret = env::var("PROCESSOR_WEBHOOK_SECRET").unwrap_or_default();
        if processor_webhook_secret.is_empty() {
            tracing::warn!("PROCESSOR_WEBHOOK_SECRET not set, every webhook will be rejected");
        }

        Self {
            host,
            port,
            base_url,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "fundledger.db".to_string()),
            audit_database_path: env::var("AUDIT_DATABASE_PATH")
                .unwrap_or_else(|_| "fundledger_audit.db".to_string()),
            dev_mode,
            processor_api_base: env::var("PROCESSOR_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            processor_secret_key: env::var("PROCESSOR_SECRET_KEY").unwrap_or_default(),
            processor_webhook_secret,
            webhook_tolerance_secs: env_parse("WEBHOOK_TOLERANCE_SECS", 300),
            checkout_timeout: Duration::from_secs(env_parse("CHECKOUT_TIMEOUT_SECS", 10)),
            max_contribution_cents: env_parse(
                "MAX_CONTRIBUTION_CENTS",
                DEFAULT_MAX_CONTRIBUTION_CENTS,
            ),
            ticket_signer,
            ticket_validity_days: env_parse("TICKET_VALIDITY_DAYS", 365),
            follow_up_poll_interval: interval_secs(env_parse("FOLLOW_UP_POLL_SECS", 5)),
            follow_up_batch_size: env_parse("FOLLOW_UP_BATCH_SIZE", 50),
            reconcile_interval: interval_secs(env_parse("RECONCILE_INTERVAL_SECS", 15 * 60)),
            activity_log_enabled: env_parse("ACTIVITY_LOG_ENABLED", true),
            activity_log_retention_days: env_parse("ACTIVITY_LOG_RETENTION_DAYS", 0),
            internal_api_key: env::var("INTERNAL_API_KEY").ok().filter(|k| !k.is_empty()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
