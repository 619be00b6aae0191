use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FollowUpKind {
    RecomputeAggregate,
    IssueTicket,
    LogActivity,
}

impl FollowUpKind {
    /// Attempts before the task is abandoned. None = retry until it succeeds.
    pub fn max_attempts(&self) -> Option<i64> {
        match self {
            Self::RecomputeAggregate | Self::IssueTicket => None,
            Self::LogActivity => Some(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FollowUpStatus {
    Pending,
    Done,
    Abandoned,
}

/// Durable post-commit work item, written in the same transaction as its payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTask {
    pub id: String,
    pub payment_id: String,
    pub kind: FollowUpKind,
    pub status: FollowUpStatus,
    pub attempts: i64,
    pub next_attempt_at: i64,
    pub lease_expires_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
