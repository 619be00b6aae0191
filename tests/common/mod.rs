//! Test utilities and fixtures for Fundledger integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::Request;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::Notify;

pub use fundledger::config::Config;
pub use fundledger::db::{AppState, DbPool, create_pool, init_audit_db, init_db, queries};
pub use fundledger::error::{AppError, Result};
pub use fundledger::handlers;
pub use fundledger::models::*;
pub use fundledger::payments::{
    CheckoutSession, CheckoutSessionRequest, PaymentProcessor, ProcessorEvent,
    STRIPE_SIGNATURE_HEADER, compute_stripe_signature, parse_stripe_event,
    verify_stripe_signature,
};
pub use fundledger::tickets::TicketSigner;

pub const WEBHOOK_SECRET: &str = "whsec_test_fundledger";
pub const INTERNAL_KEY: &str = "internal-test-key";

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Processor Double ============

/// How the fake processor answers checkout session requests.
#[derive(Debug, Clone)]
pub enum CheckoutBehavior {
    Succeed,
    Fail,
    /// Sleep before answering, to trip the checkout timeout
    Hang(Duration),
}

/// In-process stand-in for the hosted checkout provider.
///
/// Webhook verification and decoding use the real Stripe-scheme functions with
/// the test secret, so signed test payloads exercise the production path.
pub struct MockProcessor {
    pub behavior: CheckoutBehavior,
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
}

impl MockProcessor {
    pub fn new(behavior: CheckoutBehavior) -> Self {
        Self {
            behavior,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    fn provider_name(&self) -> &'static str {
        "stripe"
    }

    fn signature_header(&self) -> &'static str {
        STRIPE_SIGNATURE_HEADER
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.behavior {
            CheckoutBehavior::Succeed => Ok(CheckoutSession {
                id: "cs_test_123".to_string(),
                url: "https://checkout.example.com/c/pay/cs_test_123".to_string(),
            }),
            CheckoutBehavior::Fail => Err(AppError::UpstreamUnavailable(
                "processor returned 500".to_string(),
            )),
            CheckoutBehavior::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(CheckoutSession {
                    id: "cs_test_late".to_string(),
                    url: "https://checkout.example.com/c/pay/cs_test_late".to_string(),
                })
            }
        }
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        verify_stripe_signature(WEBHOOK_SECRET, 300, payload, signature)
    }

    fn parse_event(&self, payload: &[u8]) -> Result<ProcessorEvent> {
        parse_stripe_event(payload)
    }
}

// ============ App State ============

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        base_url: "http://localhost:3000".to_string(),
        database_path: ":memory:".to_string(),
        audit_database_path: ":memory:".to_string(),
        dev_mode: true,
        processor_api_base: "http://127.0.0.1:9".to_string(),
        processor_secret_key: "sk_test_xxx".to_string(),
        processor_webhook_secret: WEBHOOK_SECRET.to_string(),
        webhook_tolerance_secs: 300,
        checkout_timeout: Duration::from_millis(200),
        max_contribution_cents: fundledger::config::DEFAULT_MAX_CONTRIBUTION_CENTS,
        ticket_signer: TicketSigner::generate(),
        ticket_validity_days: 30,
        follow_up_poll_interval: Duration::from_secs(5),
        follow_up_batch_size: 50,
        reconcile_interval: Duration::from_secs(900),
        activity_log_enabled: true,
        activity_log_retention_days: 0,
        internal_api_key: Some(INTERNAL_KEY.to_string()),
    }
}

/// Single-connection in-memory pool. Every checkout sees the same database.
fn memory_pool() -> DbPool {
    Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())
        .unwrap()
}

fn build_state(db: DbPool, audit: DbPool, config: Config, processor: MockProcessor) -> AppState {
    {
        let conn = db.get().unwrap();
        init_db(&conn).unwrap();
    }
    {
        let conn = audit.get().unwrap();
        init_audit_db(&conn).unwrap();
    }
    AppState {
        db,
        audit,
        config: Arc::new(config),
        processor: Arc::new(processor),
        follow_up_notify: Arc::new(Notify::new()),
    }
}

/// Create an AppState for testing with in-memory databases
pub fn create_test_app_state() -> AppState {
    create_test_app_state_with(test_config(), CheckoutBehavior::Succeed)
}

pub fn create_test_app_state_with(config: Config, behavior: CheckoutBehavior) -> AppState {
    build_state(
        memory_pool(),
        memory_pool(),
        config,
        MockProcessor::new(behavior),
    )
}

/// Database files removed when the test finishes.
pub struct TempDb {
    paths: Vec<String>,
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
    }
}

/// File-backed state with a real multi-connection pool, for concurrency tests.
pub fn create_file_backed_app_state() -> (AppState, TempDb) {
    let dir = std::env::temp_dir();
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let db_path = dir.join(format!("fundledger_test_{}.db", tag));
    let audit_path = dir.join(format!("fundledger_test_{}_audit.db", tag));
    let db_path = db_path.to_string_lossy().into_owned();
    let audit_path = audit_path.to_string_lossy().into_owned();

    let state = build_state(
        create_pool(&db_path).unwrap(),
        create_pool(&audit_path).unwrap(),
        test_config(),
        MockProcessor::new(CheckoutBehavior::Succeed),
    );
    (
        state,
        TempDb {
            paths: vec![db_path, audit_path],
        },
    )
}

/// Full router without tracing, as served in production.
pub fn app(state: AppState) -> Router {
    handlers::router(state.clone()).with_state(state)
}

// ============ Fixtures ============

pub fn create_test_team(conn: &Connection, name: &str) -> Team {
    queries::create_team(
        conn,
        &CreateTeam {
            name: name.to_string(),
        },
    )
    .expect("Failed to create test team")
}

pub fn create_test_fundraiser(conn: &Connection, team_id: &str, name: &str) -> Fundraiser {
    queries::create_fundraiser(
        conn,
        &CreateFundraiser {
            team_id: team_id.to_string(),
            name: name.to_string(),
            currency: "usd".to_string(),
            status: None,
        },
    )
    .expect("Failed to create test fundraiser")
}

pub fn create_closed_fundraiser(conn: &Connection, team_id: &str, name: &str) -> Fundraiser {
    queries::create_fundraiser(
        conn,
        &CreateFundraiser {
            team_id: team_id.to_string(),
            name: name.to_string(),
            currency: "usd".to_string(),
            status: Some(FundraiserStatus::Closed),
        },
    )
    .expect("Failed to create closed fundraiser")
}

pub fn create_test_event(
    conn: &Connection,
    team_id: &str,
    name: &str,
    ticket_price: Option<i64>,
) -> Event {
    queries::create_event(
        conn,
        &CreateEvent {
            team_id: team_id.to_string(),
            name: name.to_string(),
            currency: "usd".to_string(),
            ticket_price,
            status: None,
        },
    )
    .expect("Failed to create test event")
}

/// Team plus an active usd fundraiser.
pub fn setup_fundraiser(state: &AppState) -> Fundraiser {
    let conn = state.db.get().unwrap();
    let team = create_test_team(&conn, "Riverside Tigers");
    create_test_fundraiser(&conn, &team.id, "Spring Drive")
}

/// Team plus an on-sale usd event.
pub fn setup_event(state: &AppState, ticket_price: Option<i64>) -> Event {
    let conn = state.db.get().unwrap();
    let team = create_test_team(&conn, "Riverside Tigers");
    create_test_event(&conn, &team.id, "Season Opener", ticket_price)
}

// ============ Webhooks ============

/// A paid `checkout.session.completed` body in the shape the processor sends.
pub fn checkout_completed_payload(
    event_id: &str,
    target_type: &str,
    target_id: &str,
    amount: i64,
) -> String {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": format!("cs_{}", event_id),
                "payment_status": "paid",
                "amount_total": amount,
                "currency": "usd",
                "customer_email": "supporter@example.com",
                "payment_intent": format!("pi_{}", event_id),
                "payment_method_types": ["card"],
                "metadata": {
                    "target_type": target_type,
                    "target_id": target_id,
                    "amount": amount.to_string(),
                    "payer_id": "supporter-1"
                }
            }
        }
    })
    .to_string()
}

/// `t=..,v1=..` header for the payload, signed now with the test secret.
pub fn sign_payload(payload: &str) -> String {
    sign_payload_at(payload, now())
}

pub fn sign_payload_at(payload: &str, timestamp: i64) -> String {
    let t = timestamp.to_string();
    let v1 = compute_stripe_signature(WEBHOOK_SECRET, &t, payload.as_bytes()).unwrap();
    format!("t={},v1={}", t, v1)
}

pub fn webhook_request(payload: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments/webhook")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(STRIPE_SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

/// Correctly signed webhook request.
pub fn signed_webhook_request(payload: &str) -> Request<Body> {
    let signature = sign_payload(payload);
    webhook_request(payload, Some(&signature))
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

// ============ Ledger Inspection ============

pub fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}

pub fn collected_amount(conn: &Connection, fundraiser_id: &str) -> i64 {
    queries::get_fundraiser_by_id(conn, fundraiser_id)
        .unwrap()
        .expect("fundraiser should exist")
        .collected_amount
}
