mod activity_log;
mod event;
mod follow_up;
mod fundraiser;
mod inbound_event;
mod payment;
mod team;
mod ticket;

pub use activity_log::*;
pub use event::*;
pub use follow_up::*;
pub use fundraiser::*;
pub use inbound_event::*;
pub use payment::*;
pub use team::*;
pub use ticket::*;
