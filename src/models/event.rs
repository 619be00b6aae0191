use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventStatus {
    OnSale,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub currency: String,
    /// Fixed ticket price in minor units. None = pay what you want.
    pub ticket_price: Option<i64>,
    pub status: EventStatus,
    pub created_at: i64,
}

impl Event {
    pub fn is_on_sale(&self) -> bool {
        self.status == EventStatus::OnSale
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEvent {
    pub team_id: String,
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub ticket_price: Option<i64>,
    #[serde(default)]
    pub status: Option<EventStatus>,
}
