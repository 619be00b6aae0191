use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetType {
    Fundraiser,
    EventTicket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
}

/// Immutable ledger entry. Never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    /// Positive amount in minor units
    pub amount: i64,
    pub currency: String,
    pub payer_id: Option<String>,
    pub payer_email: Option<String>,
    pub target_type: TargetType,
    pub target_id: String,
    pub team_id: String,
    pub status: PaymentStatus,
    pub method: String,
    /// Originating inbound event (1:1)
    pub inbound_event_id: String,
    pub provider_payment_ref: Option<String>,
    pub created_at: i64,
}

impl Payment {
    /// Payer reference carried into tickets and activity entries.
    pub fn payer_ref(&self) -> Option<&str> {
        self.payer_id.as_deref().or(self.payer_email.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub amount: i64,
    pub currency: String,
    pub payer_id: Option<String>,
    pub payer_email: Option<String>,
    pub target_type: TargetType,
    pub target_id: String,
    pub team_id: String,
    pub method: String,
    pub inbound_event_id: String,
    pub provider_payment_ref: Option<String>,
}
