//! Follow-up outbox worker.
//!
//! Webhook handling commits follow-up tasks next to the payment and returns.
//! This worker claims due tasks under a lease, runs them, and reschedules
//! failures with capped exponential backoff. Every task is idempotent, so a
//! lease expiring mid-run only costs a repeat.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::ledger;
use crate::models::{
    ActivityCategory, ActorType, FollowUpKind, FollowUpTask, Payment, TargetType,
};
use crate::tickets;
use crate::util::{ActivityLogBuilder, format_amount};

/// How long a claimed task stays invisible to other workers.
pub const LEASE_SECS: i64 = 60;
pub const MAX_BACKOFF_SECS: i64 = 300;

/// Delay before the next attempt after `attempts` failures: 2^attempts seconds, capped.
pub fn backoff_secs(attempts: i64) -> i64 {
    let exp = attempts.clamp(0, 16) as u32;
    2i64.pow(exp).min(MAX_BACKOFF_SECS)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerRunReport {
    pub claimed: usize,
    pub done: usize,
    pub retried: usize,
    pub abandoned: usize,
}

/// Run every task due now.
pub fn run_due_tasks(state: &AppState) -> Result<WorkerRunReport> {
    run_due_tasks_at(state, queries::now())
}

/// Run every task due at `now`. Split out so callers can step the clock.
pub fn run_due_tasks_at(state: &AppState, now: i64) -> Result<WorkerRunReport> {
    let conn = state.db.get()?;
    let tasks =
        queries::claim_due_follow_ups(&conn, now, LEASE_SECS, state.config.follow_up_batch_size)?;
    drop(conn);

    let mut report = WorkerRunReport {
        claimed: tasks.len(),
        ..Default::default()
    };

    for task in tasks {
        let outcome = execute_task(state, &task);
        let conn = state.db.get()?;
        match outcome {
            Ok(()) => {
                queries::complete_follow_up(&conn, &task.id)?;
                report.done += 1;
            }
            Err(e) => {
                let attempts = task.attempts + 1;
                let error = e.to_string();
                // A vanished row never comes back; persistence errors retry without limit
                let gone = matches!(e, AppError::NotFound(_));
                let exhausted = task.kind.max_attempts().is_some_and(|max| attempts >= max);
                if gone || exhausted {
                    tracing::warn!(
                        "Abandoning {} for payment {} after {} attempts: {}",
                        task.kind.as_ref(),
                        task.payment_id,
                        attempts,
                        error
                    );
                    queries::abandon_follow_up(&conn, &task.id, attempts, &error)?;
                    report.abandoned += 1;
                } else {
                    let delay = backoff_secs(attempts);
                    tracing::warn!(
                        "{} for payment {} failed (attempt {}), retrying in {}s: {}",
                        task.kind.as_ref(),
                        task.payment_id,
                        attempts,
                        delay,
                        error
                    );
                    queries::reschedule_follow_up(&conn, &task.id, attempts, now + delay, &error)?;
                    report.retried += 1;
                }
            }
        }
    }

    if report.claimed == 0 {
        tracing::debug!("No follow-up tasks due");
    }

    Ok(report)
}

fn execute_task(state: &AppState, task: &FollowUpTask) -> Result<()> {
    let conn = state.db.get()?;
    let payment = queries::get_payment_by_id(&conn, &task.payment_id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {}", task.payment_id)))?;

    match task.kind {
        FollowUpKind::RecomputeAggregate => {
            ledger::recompute_aggregate(&conn, &payment.target_id)?;
        }
        FollowUpKind::IssueTicket => {
            tickets::issue_ticket_for_payment(
                &conn,
                &state.config.ticket_signer,
                state.config.ticket_validity_days,
                &payment,
            )?;
        }
        FollowUpKind::LogActivity => {
            let target_name = target_name(&conn, &payment)?;
            drop(conn);
            log_payment_activity(state, &payment, &target_name)?;
        }
    }
    Ok(())
}

fn target_name(conn: &rusqlite::Connection, payment: &Payment) -> Result<String> {
    let name = match payment.target_type {
        TargetType::Fundraiser => queries::get_fundraiser_by_id(conn, &payment.target_id)?.map(|f| f.name),
        TargetType::EventTicket => queries::get_event_by_id(conn, &payment.target_id)?.map(|e| e.name),
    };
    Ok(name.unwrap_or_else(|| payment.target_id.clone()))
}

fn log_payment_activity(state: &AppState, payment: &Payment, target_name: &str) -> Result<()> {
    let audit_conn = state.audit.get()?;
    let amount = format_amount(payment.amount, &payment.currency);
    let (category, message) = match payment.target_type {
        TargetType::Fundraiser => (
            ActivityCategory::Contribution,
            format!("Contributed {} to \"{}\"", amount, target_name),
        ),
        TargetType::EventTicket => (
            ActivityCategory::Ticket,
            format!("Bought a ticket to \"{}\" for {}", target_name, amount),
        ),
    };

    ActivityLogBuilder::new(&audit_conn, state.config.activity_log_enabled, &payment.team_id)
        .actor(ActorType::Public, payment.payer_ref())
        .category(category)
        .message(message)
        .resource("payment", &payment.id)
        .details(serde_json::json!({
            "amount": payment.amount,
            "currency": payment.currency,
            "target_type": payment.target_type,
            "target_id": payment.target_id,
        }))
        .save()?;
    Ok(())
}

/// One guarded worker pass. Returns true when a full batch was claimed and more may be waiting.
async fn run_once(state: &AppState) -> bool {
    let batch = state.config.follow_up_batch_size.max(1) as usize;
    let pass = AssertUnwindSafe(async { run_due_tasks(state) })
        .catch_unwind()
        .await;
    match pass {
        Ok(Ok(report)) => report.claimed >= batch,
        Ok(Err(e)) => {
            tracing::error!("Follow-up run failed: {}", e);
            false
        }
        Err(panic) => {
            let panic_msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Follow-up run panicked: {}", panic_msg);
            false
        }
    }
}

/// Spawn the background worker.
///
/// Wakes on the webhook notifier or every poll interval, whichever comes first.
/// A panic inside one run is logged and the loop keeps going.
pub fn spawn_follow_up_worker(state: AppState) {
    let poll = state.config.follow_up_poll_interval;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.follow_up_notify.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }

            while run_once(&state).await {
                tokio::task::yield_now().await;
            }
        }
    });

    tracing::info!("Follow-up worker started (polls every {}s)", poll.as_secs());
}
