//! Periodic safety net that repairs derived state from the ledger.

use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::models::FollowUpKind;

/// Finished follow-up tasks are kept this long for inspection.
const FOLLOW_UP_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub fundraisers_recomputed: usize,
    /// Fundraisers whose stored total disagreed with the ledger
    pub aggregates_corrected: Vec<String>,
    /// Event payments that had no ticket and got an issuance task
    pub tickets_enqueued: usize,
}

/// Recompute every fundraiser total and re-enqueue missing tickets.
///
/// Safe to run at any time, concurrently with webhook traffic.
pub fn run_reconciliation(conn: &Connection) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for fundraiser in queries::list_fundraisers(conn)? {
        let Some(total) = queries::recompute_fundraiser_aggregate(conn, &fundraiser.id)? else {
            continue;
        };
        report.fundraisers_recomputed += 1;
        if total != fundraiser.collected_amount {
            tracing::warn!(
                "Fundraiser {} collected_amount was {}, ledger says {}",
                fundraiser.id,
                fundraiser.collected_amount,
                total
            );
            report.aggregates_corrected.push(fundraiser.id);
        }
    }

    for payment in queries::list_event_payments_without_ticket(conn)? {
        // A pending task is left alone; a finished one without a ticket is re-armed
        conn.execute(
            "DELETE FROM follow_up_tasks
             WHERE payment_id = ?1 AND kind = ?2 AND status IN ('done', 'abandoned')",
            rusqlite::params![&payment.id, FollowUpKind::IssueTicket.as_ref()],
        )?;
        if queries::enqueue_follow_up(conn, &payment.id, FollowUpKind::IssueTicket)? {
            report.tickets_enqueued += 1;
        }
    }

    tracing::info!(
        "Reconciliation: {} fundraisers recomputed, {} corrected, {} tickets enqueued",
        report.fundraisers_recomputed,
        report.aggregates_corrected.len(),
        report.tickets_enqueued
    );

    Ok(report)
}

/// Retention purges for the activity log and finished follow-up tasks.
pub fn purge_expired(state: &AppState) -> Result<()> {
    let conn = state.db.get()?;
    let purged = queries::purge_finished_follow_ups(&conn, FOLLOW_UP_RETENTION_DAYS)?;
    if purged > 0 {
        tracing::debug!("Purged {} finished follow-up tasks", purged);
    }

    let retention = state.config.activity_log_retention_days;
    if retention > 0 {
        let audit_conn = state.audit.get()?;
        let purged = queries::purge_old_activity_logs(&audit_conn, retention)?;
        if purged > 0 {
            tracing::info!("Purged {} activity log entries older than {} days", purged, retention);
        }
    }
    Ok(())
}

/// Spawn the periodic reconciliation task.
pub fn spawn_reconcile_task(state: AppState) {
    let interval: Duration = state.config.reconcile_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match run_reconciliation(&conn) {
                    Ok(report) if report.tickets_enqueued > 0 => {
                        state.follow_up_notify.notify_one();
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Reconciliation failed: {}", e),
                },
                Err(e) => tracing::warn!("Failed to get db connection for reconciliation: {}", e),
            }

            if let Err(e) = purge_expired(&state) {
                tracing::warn!("Retention purge failed: {}", e);
            }
        }
    });

    tracing::info!(
        "Reconciliation task started (runs every {}s)",
        interval.as_secs()
    );
}
