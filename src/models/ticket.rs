use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub payer_ref: Option<String>,
    pub event_id: String,
    /// Signed verification payload (EdDSA JWT) presented at the gate
    pub verification_payload: String,
    pub payment_id: String,
    pub issued_at: i64,
}
