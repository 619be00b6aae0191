//! Prefixed ID generation for ledger entities.
//!
//! All IDs use an `fl_` brand prefix so they never collide with processor ids
//! (`evt_`, `cs_`, `pi_`, ...) that are stored alongside them.
//!
//! Format: `fl_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &[
    "fl_team_", "fl_fr_", "fl_evt_", "fl_in_", "fl_pay_", "fl_tkt_", "fl_act_", "fl_task_",
];

/// Validate that a string is a well-formed prefixed ID.
///
/// Rejects garbage before it reaches the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Team,
    Fundraiser,
    Event,
    InboundEvent,
    Payment,
    Ticket,
    ActivityLog,
    FollowUpTask,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Team => "fl_team",
            Self::Fundraiser => "fl_fr",
            Self::Event => "fl_evt",
            Self::InboundEvent => "fl_in",
            Self::Payment => "fl_pay",
            Self::Ticket => "fl_tkt",
            Self::ActivityLog => "fl_act",
            Self::FollowUpTask => "fl_task",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
