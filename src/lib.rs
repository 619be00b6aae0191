//! Fundledger - payment reconciliation and fundraising ledger engine
//!
//! Turns signed, at-least-once payment processor notifications into an immutable
//! payment ledger, derived fundraiser totals, and signed event tickets.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod follow_up;
pub mod handlers;
pub mod id;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod payments;
pub mod reconcile;
pub mod tickets;
pub mod util;
