//! Shared helpers for activity logging and display.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{ActivityCategory, ActivityLog, ActorType};

/// Render a minor-unit amount for humans, e.g. `2500, "usd"` -> `25.00 USD`.
///
/// Assumes a two-decimal currency.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency.to_uppercase())
}

/// Builder for activity log entries.
///
/// # Example
/// ```ignore
/// ActivityLogBuilder::new(&audit_conn, config.activity_log_enabled, &payment.team_id)
///     .actor(ActorType::Public, payment.payer_ref())
///     .category(ActivityCategory::Contribution)
///     .message(format!("Contributed {}", format_amount(payment.amount, &payment.currency)))
///     .resource("payment", &payment.id)
///     .save()?;
/// ```
pub struct ActivityLogBuilder<'a> {
    conn: &'a Connection,
    enabled: bool,
    team_id: &'a str,
    actor_type: ActorType,
    actor_ref: Option<&'a str>,
    category: ActivityCategory,
    message: String,
    resource_type: &'a str,
    resource_id: &'a str,
    details: Option<serde_json::Value>,
}

impl<'a> ActivityLogBuilder<'a> {
    pub fn new(conn: &'a Connection, enabled: bool, team_id: &'a str) -> Self {
        Self {
            conn,
            enabled,
            team_id,
            actor_type: ActorType::System,
            actor_ref: None,
            category: ActivityCategory::Contribution,
            message: String::new(),
            resource_type: "",
            resource_id: "",
            details: None,
        }
    }

    pub fn actor(mut self, actor_type: ActorType, actor_ref: Option<&'a str>) -> Self {
        self.actor_type = actor_type;
        self.actor_ref = actor_ref;
        self
    }

    pub fn category(mut self, category: ActivityCategory) -> Self {
        self.category = category;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn resource(mut self, resource_type: &'a str, resource_id: &'a str) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn save(self) -> Result<ActivityLog> {
        queries::create_activity_log(
            self.conn,
            self.enabled,
            self.team_id,
            self.actor_type,
            self.actor_ref,
            self.category,
            &self.message,
            self.resource_type,
            self.resource_id,
            self.details.as_ref(),
        )
    }
}
