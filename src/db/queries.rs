use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    ACTIVITY_LOG_COLS, EVENT_COLS, FOLLOW_UP_COLS, FUNDRAISER_COLS, INBOUND_EVENT_COLS,
    PAYMENT_COLS, TICKET_COLS, query_all, query_one,
};

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

const SECONDS_PER_DAY: i64 = 86400;

// ============ Teams / Fundraisers / Events ============

pub fn create_team(conn: &Connection, input: &CreateTeam) -> Result<Team> {
    let id = EntityType::Team.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO teams (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![&id, &input.name, now],
    )?;
    Ok(Team {
        id,
        name: input.name.clone(),
        created_at: now,
    })
}

pub fn create_fundraiser(conn: &Connection, input: &CreateFundraiser) -> Result<Fundraiser> {
    let id = EntityType::Fundraiser.gen_id();
    let now = now();
    let status = input.status.unwrap_or(FundraiserStatus::Active);
    let currency = input.currency.to_lowercase();
    conn.execute(
        "INSERT INTO fundraisers (id, team_id, name, currency, status, collected_amount, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![&id, &input.team_id, &input.name, &currency, status.as_ref(), now],
    )?;
    Ok(Fundraiser {
        id,
        team_id: input.team_id.clone(),
        name: input.name.clone(),
        currency,
        status,
        collected_amount: 0,
        collected_updated_at: None,
        created_at: now,
    })
}

pub fn get_fundraiser_by_id(conn: &Connection, id: &str) -> Result<Option<Fundraiser>> {
    query_one(
        conn,
        &format!("SELECT {} FROM fundraisers WHERE id = ?1", FUNDRAISER_COLS),
        &[&id],
    )
}

pub fn list_fundraisers(conn: &Connection) -> Result<Vec<Fundraiser>> {
    query_all(
        conn,
        &format!("SELECT {} FROM fundraisers ORDER BY created_at", FUNDRAISER_COLS),
        &[],
    )
}

pub fn create_event(conn: &Connection, input: &CreateEvent) -> Result<Event> {
    if input.ticket_price.is_some_and(|p| p <= 0) {
        return Err(AppError::BadRequest("ticket_price must be positive".into()));
    }
    let id = EntityType::Event.gen_id();
    let now = now();
    let status = input.status.unwrap_or(EventStatus::OnSale);
    let currency = input.currency.to_lowercase();
    conn.execute(
        "INSERT INTO events (id, team_id, name, currency, ticket_price, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![&id, &input.team_id, &input.name, &currency, input.ticket_price, status.as_ref(), now],
    )?;
    Ok(Event {
        id,
        team_id: input.team_id.clone(),
        name: input.name.clone(),
        currency,
        ticket_price: input.ticket_price,
        status,
        created_at: now,
    })
}

pub fn get_event_by_id(conn: &Connection, id: &str) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

// ============ Fundraiser Aggregate ============

/// Sum of completed payment amounts for a fundraiser, straight from the ledger.
pub fn sum_completed_payments(conn: &Connection, fundraiser_id: &str) -> Result<i64> {
    let sum = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE target_type = 'fundraiser' AND target_id = ?1 AND status = 'completed'",
        params![fundraiser_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// Recompute `collected_amount` from the ledger in a single statement.
///
/// Never increments in place, so concurrent or repeated runs converge on the same value.
/// Returns the new total, or None if the fundraiser does not exist.
pub fn recompute_fundraiser_aggregate(conn: &Connection, fundraiser_id: &str) -> Result<Option<i64>> {
    let updated = conn.execute(
        "UPDATE fundraisers
         SET collected_amount = (
                 SELECT COALESCE(SUM(amount), 0) FROM payments
                 WHERE target_type = 'fundraiser' AND target_id = ?1 AND status = 'completed'
             ),
             collected_updated_at = ?2
         WHERE id = ?1",
        params![fundraiser_id, now()],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    let total = conn.query_row(
        "SELECT collected_amount FROM fundraisers WHERE id = ?1",
        params![fundraiser_id],
        |row| row.get(0),
    )?;
    Ok(Some(total))
}

// ============ Inbound Events ============

/// Record a delivery keyed by its processor event id.
///
/// Returns the new row id, or None if the event id was already recorded.
pub fn try_record_inbound_event(
    conn: &Connection,
    input: &CreateInboundEvent,
) -> Result<Option<String>> {
    let id = EntityType::InboundEvent.gen_id();
    let affected = conn.execute(
        "INSERT INTO inbound_events (id, provider, provider_event_id, event_type, payload, signature, status, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'received', ?7)
         ON CONFLICT(provider_event_id) DO NOTHING",
        params![
            &id,
            &input.provider,
            &input.provider_event_id,
            &input.event_type,
            &input.payload,
            &input.signature,
            now()
        ],
    )?;
    Ok((affected > 0).then_some(id))
}

/// Count a redelivery against the stored row without touching its status.
pub fn record_redelivery(conn: &Connection, provider_event_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE inbound_events
         SET redelivery_count = redelivery_count + 1, last_redelivered_at = ?2
         WHERE provider_event_id = ?1",
        params![provider_event_id, now()],
    )?;
    Ok(())
}

/// Advance an inbound event's status. Terminal states stamp `processed_at`.
pub fn set_inbound_event_status(
    conn: &Connection,
    id: &str,
    status: InboundEventStatus,
    rejection_reason: Option<&str>,
) -> Result<()> {
    if status == InboundEventStatus::Duplicate {
        return Err(AppError::Internal(
            "duplicate is a delivery disposition, not a stored status".into(),
        ));
    }
    let processed_at = status.is_terminal().then(now);
    conn.execute(
        "UPDATE inbound_events
         SET status = ?2, rejection_reason = ?3, processed_at = COALESCE(?4, processed_at)
         WHERE id = ?1",
        params![id, status.as_ref(), rejection_reason, processed_at],
    )?;
    Ok(())
}

pub fn get_inbound_event_by_provider_id(
    conn: &Connection,
    provider_event_id: &str,
) -> Result<Option<InboundEvent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM inbound_events WHERE provider_event_id = ?1",
            INBOUND_EVENT_COLS
        ),
        &[&provider_event_id],
    )
}

/// Page through inbound events, newest first, optionally filtered by status.
pub fn list_inbound_events(
    conn: &Connection,
    query: &InboundEventQuery,
) -> Result<(Vec<InboundEvent>, i64)> {
    let (where_clause, status) = match query.status {
        Some(s) => ("WHERE status = ?1", Some(s.as_ref().to_string())),
        None => ("", None),
    };

    let mut filter: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(ref s) = status {
        filter.push(s);
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM inbound_events {}", where_clause),
        filter.as_slice(),
        |row| row.get(0),
    )?;

    let limit = query.limit();
    let offset = query.offset();
    let mut page_params = filter.clone();
    page_params.push(&limit);
    page_params.push(&offset);
    let n = filter.len();

    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM inbound_events {} ORDER BY received_at DESC, id LIMIT ?{} OFFSET ?{}",
            INBOUND_EVENT_COLS,
            where_clause,
            n + 1,
            n + 2
        ),
        page_params.as_slice(),
    )?;

    Ok((items, total))
}

// ============ Payments ============

pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO payments (id, amount, currency, payer_id, payer_email, target_type, target_id, team_id, status, method, inbound_event_id, provider_payment_ref, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'completed', ?9, ?10, ?11, ?12)",
        params![
            &id,
            input.amount,
            &input.currency,
            &input.payer_id,
            &input.payer_email,
            input.target_type.as_ref(),
            &input.target_id,
            &input.team_id,
            &input.method,
            &input.inbound_event_id,
            &input.provider_payment_ref,
            now
        ],
    )?;
    Ok(Payment {
        id,
        amount: input.amount,
        currency: input.currency.clone(),
        payer_id: input.payer_id.clone(),
        payer_email: input.payer_email.clone(),
        target_type: input.target_type,
        target_id: input.target_id.clone(),
        team_id: input.team_id.clone(),
        status: PaymentStatus::Completed,
        method: input.method.clone(),
        inbound_event_id: input.inbound_event_id.clone(),
        provider_payment_ref: input.provider_payment_ref.clone(),
        created_at: now,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn get_payment_by_inbound_event(
    conn: &Connection,
    inbound_event_id: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE inbound_event_id = ?1",
            PAYMENT_COLS
        ),
        &[&inbound_event_id],
    )
}

pub fn list_payments_for_target(
    conn: &Connection,
    target_type: TargetType,
    target_id: &str,
) -> Result<Vec<Payment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE target_type = ?1 AND target_id = ?2 ORDER BY created_at",
            PAYMENT_COLS
        ),
        &[&target_type.as_ref(), &target_id],
    )
}

/// Event-ticket payments that have no ticket yet.
pub fn list_event_payments_without_ticket(conn: &Connection) -> Result<Vec<Payment>> {
    let cols = PAYMENT_COLS
        .split(", ")
        .map(|c| format!("p.{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments p
             LEFT JOIN tickets t ON t.payment_id = p.id
             WHERE p.target_type = 'event_ticket' AND p.status = 'completed' AND t.id IS NULL
             ORDER BY p.created_at",
            cols
        ),
        &[],
    )
}

// ============ Tickets ============

pub fn get_ticket_by_payment(conn: &Connection, payment_id: &str) -> Result<Option<Ticket>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tickets WHERE payment_id = ?1", TICKET_COLS),
        &[&payment_id],
    )
}

/// Insert a ticket unless one already references the same payment.
/// Returns true if this call created the row.
pub fn insert_ticket_if_absent(conn: &Connection, ticket: &Ticket) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO tickets (id, payer_ref, event_id, verification_payload, payment_id, issued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(payment_id) DO NOTHING",
        params![
            &ticket.id,
            &ticket.payer_ref,
            &ticket.event_id,
            &ticket.verification_payload,
            &ticket.payment_id,
            ticket.issued_at
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_tickets_for_event(conn: &Connection, event_id: &str) -> Result<Vec<Ticket>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM tickets WHERE event_id = ?1 ORDER BY issued_at",
            TICKET_COLS
        ),
        &[&event_id],
    )
}

// ============ Follow-up Tasks ============

/// Enqueue a follow-up task. At most one task exists per (payment, kind).
/// Returns true if a new task was created.
pub fn enqueue_follow_up(conn: &Connection, payment_id: &str, kind: FollowUpKind) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT INTO follow_up_tasks (id, payment_id, kind, status, attempts, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4, ?4)
         ON CONFLICT(payment_id, kind) DO NOTHING",
        params![EntityType::FollowUpTask.gen_id(), payment_id, kind.as_ref(), now],
    )?;
    Ok(affected > 0)
}

/// Claim due pending tasks by stamping a lease on them.
///
/// The claim is a single UPDATE, so two workers never receive the same task
/// while its lease is live.
pub fn claim_due_follow_ups(
    conn: &Connection,
    now: i64,
    lease_secs: i64,
    limit: i64,
) -> Result<Vec<FollowUpTask>> {
    query_all(
        conn,
        &format!(
            "UPDATE follow_up_tasks
             SET lease_expires_at = ?2, updated_at = ?1
             WHERE id IN (
                 SELECT id FROM follow_up_tasks
                 WHERE status = 'pending'
                   AND next_attempt_at <= ?1
                   AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
                 ORDER BY next_attempt_at
                 LIMIT ?3
             )
             RETURNING {}",
            FOLLOW_UP_COLS
        ),
        &[&now, &(now + lease_secs), &limit],
    )
}

pub fn complete_follow_up(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE follow_up_tasks
         SET status = 'done', attempts = attempts + 1, lease_expires_at = NULL, last_error = NULL, updated_at = ?2
         WHERE id = ?1",
        params![id, now()],
    )?;
    Ok(())
}

/// Record a failed attempt and schedule the next one.
pub fn reschedule_follow_up(
    conn: &Connection,
    id: &str,
    attempts: i64,
    next_attempt_at: i64,
    error: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE follow_up_tasks
         SET attempts = ?2, next_attempt_at = ?3, last_error = ?4, lease_expires_at = NULL, updated_at = ?5
         WHERE id = ?1",
        params![id, attempts, next_attempt_at, error, now()],
    )?;
    Ok(())
}

pub fn abandon_follow_up(conn: &Connection, id: &str, attempts: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE follow_up_tasks
         SET status = 'abandoned', attempts = ?2, last_error = ?3, lease_expires_at = NULL, updated_at = ?4
         WHERE id = ?1",
        params![id, attempts, error, now()],
    )?;
    Ok(())
}

pub fn list_follow_ups_for_payment(conn: &Connection, payment_id: &str) -> Result<Vec<FollowUpTask>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM follow_up_tasks WHERE payment_id = ?1 ORDER BY kind",
            FOLLOW_UP_COLS
        ),
        &[&payment_id],
    )
}

/// Purge finished tasks older than the retention period.
/// Returns the number of deleted records.
pub fn purge_finished_follow_ups(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * SECONDS_PER_DAY);
    let deleted = conn.execute(
        "DELETE FROM follow_up_tasks WHERE status IN ('done', 'abandoned') AND updated_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Activity Logs ============

#[allow(clippy::too_many_arguments)]
pub fn create_activity_log(
    conn: &Connection,
    enabled: bool,
    team_id: &str,
    actor_type: ActorType,
    actor_ref: Option<&str>,
    category: ActivityCategory,
    message: &str,
    resource_type: &str,
    resource_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<ActivityLog> {
    let entry = ActivityLog {
        id: EntityType::ActivityLog.gen_id(),
        created_at: now(),
        team_id: team_id.to_string(),
        actor_type,
        actor_ref: actor_ref.map(String::from),
        category,
        message: message.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        details: details.cloned(),
    };

    // Built but not stored when activity logging is disabled
    if !enabled {
        return Ok(entry);
    }

    conn.execute(
        "INSERT INTO activity_logs (id, created_at, team_id, actor_type, actor_ref, category, message, resource_type, resource_id, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &entry.id,
            entry.created_at,
            &entry.team_id,
            entry.actor_type.as_ref(),
            &entry.actor_ref,
            entry.category.as_ref(),
            &entry.message,
            &entry.resource_type,
            &entry.resource_id,
            details.map(|d| d.to_string())
        ],
    )?;

    Ok(entry)
}

pub fn list_activity_logs_for_resource(
    conn: &Connection,
    resource_type: &str,
    resource_id: &str,
) -> Result<Vec<ActivityLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM activity_logs WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY created_at",
            ACTIVITY_LOG_COLS
        ),
        &[&resource_type, &resource_id],
    )
}

/// Purge activity entries beyond the retention period.
/// Returns the number of deleted records.
pub fn purge_old_activity_logs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * SECONDS_PER_DAY);
    let deleted = conn.execute(
        "DELETE FROM activity_logs WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}
