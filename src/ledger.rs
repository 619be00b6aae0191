//! Webhook-to-ledger pipeline: deduplicate, validate, append, enqueue.
//!
//! Everything a delivery writes happens in one immediate-mode transaction, so
//! concurrent redeliveries of the same event id serialize on the unique
//! constraint and a crash before commit leaves nothing behind.

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{
    CreateInboundEvent, CreatePayment, FollowUpKind, InboundEventStatus, Payment, TargetType,
};
use crate::payments::{CompletedPayment, ProcessorEvent, ProcessorEventKind};

/// What happened to a single delivery.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// New payment written and follow-ups enqueued
    Applied(Payment),
    /// Event id already recorded; nothing re-applied
    Duplicate,
    /// Verified but failed validation; kept for manual review
    Rejected(String),
    /// Event type the ledger does not act on
    Ignored,
}

impl ApplyOutcome {
    pub fn disposition(&self) -> InboundEventStatus {
        match self {
            Self::Applied(_) => InboundEventStatus::Applied,
            Self::Duplicate => InboundEventStatus::Duplicate,
            Self::Rejected(_) => InboundEventStatus::Rejected,
            Self::Ignored => InboundEventStatus::Ignored,
        }
    }
}

/// Raw delivery data stored alongside the decoded event.
pub struct Delivery<'a> {
    pub provider: &'a str,
    pub payload: &'a [u8],
    pub signature: &'a str,
}

/// Record a verified delivery and, for a completed payment, append it to the ledger.
pub fn apply_event(
    conn: &mut Connection,
    delivery: &Delivery<'_>,
    event: &ProcessorEvent,
) -> Result<ApplyOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let inbound = CreateInboundEvent {
        provider: delivery.provider.to_string(),
        provider_event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        payload: String::from_utf8_lossy(delivery.payload).into_owned(),
        signature: delivery.signature.to_string(),
    };

    let Some(inbound_id) = queries::try_record_inbound_event(&tx, &inbound)? else {
        queries::record_redelivery(&tx, &event.id)?;
        tx.commit()?;
        tracing::info!(
            "{} event {} redelivered, already recorded",
            delivery.provider,
            event.id
        );
        return Ok(ApplyOutcome::Duplicate);
    };

    queries::set_inbound_event_status(&tx, &inbound_id, InboundEventStatus::Verified, None)?;

    let reported = match &event.kind {
        ProcessorEventKind::PaymentCompleted(p) => p,
        ProcessorEventKind::Malformed(reason) => {
            return reject(tx, delivery, event, &inbound_id, reason.clone());
        }
        ProcessorEventKind::Other => {
            queries::set_inbound_event_status(&tx, &inbound_id, InboundEventStatus::Ignored, None)?;
            tx.commit()?;
            tracing::debug!("Ignoring {} event {}", event.event_type, event.id);
            return Ok(ApplyOutcome::Ignored);
        }
    };

    let input = match validate_payment(&tx, reported, &inbound_id)? {
        Ok(input) => input,
        Err(reason) => return reject(tx, delivery, event, &inbound_id, reason),
    };

    let payment = queries::create_payment(&tx, &input)?;
    queries::set_inbound_event_status(&tx, &inbound_id, InboundEventStatus::Applied, None)?;

    for kind in follow_ups_for(payment.target_type) {
        queries::enqueue_follow_up(&tx, &payment.id, *kind)?;
    }

    tx.commit()?;

    tracing::info!(
        "Payment {} recorded: {} {} for {} {} (event {})",
        payment.id,
        payment.amount,
        payment.currency,
        payment.target_type.as_ref(),
        payment.target_id,
        event.id
    );

    Ok(ApplyOutcome::Applied(payment))
}

fn reject(
    tx: Transaction<'_>,
    delivery: &Delivery<'_>,
    event: &ProcessorEvent,
    inbound_id: &str,
    reason: String,
) -> Result<ApplyOutcome> {
    queries::set_inbound_event_status(&tx, inbound_id, InboundEventStatus::Rejected, Some(&reason))?;
    tx.commit()?;
    tracing::warn!("Rejected {} event {}: {}", delivery.provider, event.id, reason);
    Ok(ApplyOutcome::Rejected(reason))
}

/// Follow-up work owed to a freshly written payment.
pub fn follow_ups_for(target_type: TargetType) -> &'static [FollowUpKind] {
    match target_type {
        TargetType::Fundraiser => &[FollowUpKind::RecomputeAggregate, FollowUpKind::LogActivity],
        TargetType::EventTicket => &[FollowUpKind::IssueTicket, FollowUpKind::LogActivity],
    }
}

/// Check reported payment facts against ledger reference data.
///
/// The outer Result carries persistence failures; the inner one a rejection reason.
/// Target status is deliberately not re-checked: the processor already moved the money.
fn validate_payment(
    conn: &Connection,
    reported: &CompletedPayment,
    inbound_event_id: &str,
) -> Result<std::result::Result<CreatePayment, String>> {
    let amount = match reported.amount {
        Some(a) if a > 0 => a,
        Some(a) => return Ok(Err(format!("non-positive amount {}", a))),
        None => return Ok(Err("missing amount".into())),
    };

    let Some(raw_type) = reported.target_type.as_deref() else {
        return Ok(Err("missing target_type".into()));
    };
    let Ok(target_type) = raw_type.parse::<TargetType>() else {
        return Ok(Err(format!("unknown target_type '{}'", raw_type)));
    };
    let Some(target_id) = reported.target_id.as_deref() else {
        return Ok(Err("missing target_id".into()));
    };

    let (team_id, target_currency) = match target_type {
        TargetType::Fundraiser => match queries::get_fundraiser_by_id(conn, target_id)? {
            Some(f) => (f.team_id, f.currency),
            None => return Ok(Err(format!("fundraiser {} not found", target_id))),
        },
        TargetType::EventTicket => match queries::get_event_by_id(conn, target_id)? {
            Some(e) => (e.team_id, e.currency),
            None => return Ok(Err(format!("event {} not found", target_id))),
        },
    };

    if let Some(reported_team) = reported.team_id.as_deref() {
        if reported_team != team_id {
            return Ok(Err(format!(
                "team {} does not own {} {}",
                reported_team, raw_type, target_id
            )));
        }
    }

    let currency = match reported.currency.as_deref() {
        Some(c) => c.to_lowercase(),
        None => target_currency.clone(),
    };
    if currency != target_currency {
        return Ok(Err(format!(
            "currency {} does not match target currency {}",
            currency, target_currency
        )));
    }

    Ok(Ok(CreatePayment {
        amount,
        currency,
        payer_id: reported.payer_id.clone(),
        payer_email: reported.payer_email.clone(),
        target_type,
        target_id: target_id.to_string(),
        team_id,
        method: reported.method.clone(),
        inbound_event_id: inbound_event_id.to_string(),
        provider_payment_ref: reported.provider_payment_ref.clone(),
    }))
}

/// Recompute a fundraiser's collected amount from the ledger.
pub fn recompute_aggregate(conn: &Connection, fundraiser_id: &str) -> Result<i64> {
    let total = queries::recompute_fundraiser_aggregate(conn, fundraiser_id)?
        .ok_or_else(|| AppError::NotFound(format!("fundraiser {}", fundraiser_id)))?;
    tracing::debug!("Fundraiser {} collected_amount = {}", fundraiser_id, total);
    Ok(total)
}
