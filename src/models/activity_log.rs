use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorType {
    /// A supporter paying through the hosted checkout
    Public,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityCategory {
    Contribution,
    Ticket,
}

/// Human-readable activity feed entry. Lives in the audit database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: String,
    pub created_at: i64,
    pub team_id: String,
    pub actor_type: ActorType,
    pub actor_ref: Option<String>,
    pub category: ActivityCategory,
    pub message: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Option<serde_json::Value>,
}

impl ActivityLog {
    /// Format as a single display line.
    ///
    /// `[2024-01-15 14:32:05] [Public] (payer) contribution: "message"`
    pub fn formatted(&self) -> String {
        use chrono::{TimeZone, Utc};

        let timestamp = Utc
            .timestamp_opt(self.created_at, 0)
            .single()
            .map(|dt| format!("[{}]", dt.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_else(|| format!("[{}]", self.created_at));

        let actor_type = match self.actor_type {
            ActorType::Public => "[Public]",
            ActorType::System => "[System]",
        };

        let actor = self
            .actor_ref
            .as_ref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_else(|| " (anonymous)".to_string());

        format!(
            "{} {}{} {}: \"{}\"",
            timestamp,
            actor_type,
            actor,
            self.category.as_ref(),
            self.message
        )
    }
}
