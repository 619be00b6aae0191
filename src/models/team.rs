use serde::{Deserialize, Serialize};

/// Organization that owns fundraisers and events. Managed outside the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTeam {
    pub name: String,
}
