//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const FUNDRAISER_COLS: &str =
    "id, team_id, name, currency, status, collected_amount, collected_updated_at, created_at";

pub const EVENT_COLS: &str = "id, team_id, name, currency, ticket_price, status, created_at";

pub const INBOUND_EVENT_COLS: &str = "id, provider, provider_event_id, event_type, payload, signature, status, rejection_reason, redelivery_count, last_redelivered_at, received_at, processed_at";

pub const PAYMENT_COLS: &str = "id, amount, currency, payer_id, payer_email, target_type, target_id, team_id, status, method, inbound_event_id, provider_payment_ref, created_at";

pub const TICKET_COLS: &str =
    "id, payer_ref, event_id, verification_payload, payment_id, issued_at";

pub const FOLLOW_UP_COLS: &str = "id, payment_id, kind, status, attempts, next_attempt_at, lease_expires_at, last_error, created_at, updated_at";

pub const ACTIVITY_LOG_COLS: &str = "id, created_at, team_id, actor_type, actor_ref, category, message, resource_type, resource_id, details";

// ============ FromRow Implementations ============

impl FromRow for Fundraiser {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Fundraiser {
            id: row.get(0)?,
            team_id: row.get(1)?,
            name: row.get(2)?,
            currency: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            collected_amount: row.get(5)?,
            collected_updated_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for Event {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            team_id: row.get(1)?,
            name: row.get(2)?,
            currency: row.get(3)?,
            ticket_price: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for InboundEvent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(InboundEvent {
            id: row.get(0)?,
            provider: row.get(1)?,
            provider_event_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            signature: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            rejection_reason: row.get(7)?,
            redelivery_count: row.get(8)?,
            last_redelivered_at: row.get(9)?,
            received_at: row.get(10)?,
            processed_at: row.get(11)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            amount: row.get(1)?,
            currency: row.get(2)?,
            payer_id: row.get(3)?,
            payer_email: row.get(4)?,
            target_type: parse_enum(row, 5, "target_type")?,
            target_id: row.get(6)?,
            team_id: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            method: row.get(9)?,
            inbound_event_id: row.get(10)?,
            provider_payment_ref: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for Ticket {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Ticket {
            id: row.get(0)?,
            payer_ref: row.get(1)?,
            event_id: row.get(2)?,
            verification_payload: row.get(3)?,
            payment_id: row.get(4)?,
            issued_at: row.get(5)?,
        })
    }
}

impl FromRow for FollowUpTask {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FollowUpTask {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            kind: parse_enum(row, 2, "kind")?,
            status: parse_enum(row, 3, "status")?,
            attempts: row.get(4)?,
            next_attempt_at: row.get(5)?,
            lease_expires_at: row.get(6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for ActivityLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let details: Option<String> = row.get(9)?;
        Ok(ActivityLog {
            id: row.get(0)?,
            created_at: row.get(1)?,
            team_id: row.get(2)?,
            actor_type: parse_enum(row, 3, "actor_type")?,
            actor_ref: row.get(4)?,
            category: parse_enum(row, 5, "category")?,
            message: row.get(6)?,
            resource_type: row.get(7)?,
            resource_id: row.get(8)?,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
        })
    }
}
