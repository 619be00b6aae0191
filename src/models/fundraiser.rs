use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FundraiserStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fundraiser {
    pub id: String,
    pub team_id: String,
    pub name: String,
    /// ISO currency code, lowercase (e.g. "usd")
    pub currency: String,
    pub status: FundraiserStatus,
    /// Derived from the payment ledger. Only written by full recomputation.
    pub collected_amount: i64,
    pub collected_updated_at: Option<i64>,
    pub created_at: i64,
}

impl Fundraiser {
    pub fn accepts_contributions(&self) -> bool {
        self.status == FundraiserStatus::Active
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFundraiser {
    pub team_id: String,
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub status: Option<FundraiserStatus>,
}
