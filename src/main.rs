use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundledger::config::Config;
use fundledger::db::{AppState, create_pool, init_audit_db, init_db, queries};
use fundledger::follow_up::spawn_follow_up_worker;
use fundledger::handlers;
use fundledger::models::{CreateEvent, CreateFundraiser, CreateTeam};
use fundledger::payments::StripeClient;
use fundledger::reconcile::{self, spawn_reconcile_task};
use fundledger::tickets::{TicketSigner, verify_ticket};

#[derive(Parser, Debug)]
#[command(name = "fundledger")]
#[command(about = "Payment reconciliation and fundraising ledger engine")]
struct Cli {
    /// Seed the database with a dev team, fundraiser and event (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Delete databases on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,

    /// Run one reconciliation pass and exit
    #[arg(long)]
    reconcile: bool,

    /// Print a fresh ticket signing key (base64 seed) and its public key, then exit
    #[arg(long)]
    generate_ticket_key: bool,

    /// Verify a ticket payload and print its claims, then exit
    #[arg(long, value_name = "TOKEN")]
    verify_ticket: Option<String>,

    /// Public key for --verify-ticket (defaults to the configured signing key)
    #[arg(long, requires = "verify_ticket")]
    public_key: Option<String>,
}

fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let team = queries::create_team(
        &conn,
        &CreateTeam {
            name: "Riverside Tigers".to_string(),
        },
    )
    .expect("Failed to create dev team");

    let fundraiser = queries::create_fundraiser(
        &conn,
        &CreateFundraiser {
            team_id: team.id.clone(),
            name: "Spring Uniform Drive".to_string(),
            currency: "usd".to_string(),
            status: None,
        },
    )
    .expect("Failed to create dev fundraiser");

    let event = queries::create_event(
        &conn,
        &CreateEvent {
            team_id: team.id.clone(),
            name: "Season Opener".to_string(),
            currency: "usd".to_string(),
            ticket_price: Some(1500),
            status: None,
        },
    )
    .expect("Failed to create dev event");

    println!();
    println!("============================================================");
    println!("DEV DATA SEEDED");
    println!("============================================================");
    println!("Team:        {} ({})", team.name, team.id);
    println!("Fundraiser:  {} ({})", fundraiser.name, fundraiser.id);
    println!("Event:       {} ({}), ticket price 1500", event.name, event.id);
    println!("Ticket public key: {}", state.config.ticket_signer.public_key_b64());
    println!("============================================================");
    println!();
}

fn print_ticket_claims(token: &str, public_key: &str) {
    match verify_ticket(token, public_key) {
        Ok(claims) => {
            println!("Ticket is VALID");
            println!(
                "{}",
                serde_json::to_string_pretty(&claims.custom).unwrap_or_default()
            );
            if let Some(exp) = claims.expires_at {
                println!("expires_at: {}", exp.as_secs());
            }
        }
        Err(e) => {
            eprintln!("Ticket is INVALID: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fundledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Key tooling runs without the rest of the configuration
    if cli.generate_ticket_key {
        let signer = TicketSigner::generate();
        println!("TICKET_SIGNING_KEY={}", signer.seed_b64());
        println!("public key: {}", signer.public_key_b64());
        return;
    }
    if let (Some(token), Some(public_key)) = (&cli.verify_ticket, &cli.public_key) {
        print_ticket_claims(token, public_key);
        return;
    }

    let config = Config::from_env();

    if let Some(ref token) = cli.verify_ticket {
        print_ticket_claims(token, &config.ticket_signer.public_key_b64());
        return;
    }

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    let audit_pool =
        create_pool(&config.audit_database_path).expect("Failed to create audit database pool");

    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }
    {
        let conn = audit_pool.get().expect("Failed to get audit connection");
        init_audit_db(&conn).expect("Failed to initialize audit database");
    }

    if cli.reconcile {
        let conn = db_pool.get().expect("Failed to get connection");
        match reconcile::run_reconciliation(&conn) {
            Ok(report) => println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_default()
            ),
            Err(e) => {
                eprintln!("Reconciliation failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let processor = StripeClient::new(
        &config.processor_api_base,
        &config.processor_secret_key,
        &config.processor_webhook_secret,
        config.webhook_tolerance_secs,
        config.checkout_timeout,
    )
    .expect("Failed to create payment processor client");

    let state = AppState {
        db: db_pool,
        audit: audit_pool,
        config: Arc::new(config.clone()),
        processor: Arc::new(processor),
        follow_up_notify: Arc::new(Notify::new()),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set FUNDLEDGER_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if let Err(e) = reconcile::purge_expired(&state) {
        tracing::warn!("Startup retention purge failed: {}", e);
    }

    spawn_follow_up_worker(state.clone());
    spawn_reconcile_task(state.clone());

    if config.internal_api_key.is_none() {
        tracing::warn!("INTERNAL_API_KEY not set, /admin endpoints will reject every request");
    }

    let app = Router::new()
        .merge(handlers::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    let audit_path = config.audit_database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: databases will be deleted on exit");
    }

    tracing::info!("Fundledger listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral databases...");
        for path in [&db_path, &audit_path] {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {}: {}", path, e);
            }
            let _ = std::fs::remove_file(format!("{}-wal", path));
            let _ = std::fs::remove_file(format!("{}-shm", path));
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
