use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Processing status of a received processor notification.
///
/// `received -> verified -> applied | rejected | ignored`. `Duplicate` is never
/// stored: it is the disposition reported for a redelivery of a known event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InboundEventStatus {
    Received,
    Verified,
    Applied,
    Rejected,
    Ignored,
    Duplicate,
}

impl InboundEventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Applied | Self::Rejected | Self::Ignored | Self::Duplicate
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub provider: String,
    /// Processor-issued event id. Idempotency key for the whole pipeline.
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: String,
    #[serde(skip_serializing)]
    pub signature: String,
    pub status: InboundEventStatus,
    pub rejection_reason: Option<String>,
    pub redelivery_count: i64,
    pub last_redelivered_at: Option<i64>,
    pub received_at: i64,
    pub processed_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct InboundEventQuery {
    pub status: Option<InboundEventStatus>,
    /// Maximum number of items to return (default: 50, max: 100)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl InboundEventQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// A signature-verified delivery about to be recorded.
#[derive(Debug, Clone)]
pub struct CreateInboundEvent {
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: String,
    pub payload: String,
    pub signature: String,
}
