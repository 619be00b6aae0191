//! Webhook ingestion: authentication, idempotency and validation

mod common;

use std::sync::{Arc, Barrier};

use axum::http::StatusCode;
use common::*;
use fundledger::follow_up::run_due_tasks;
use fundledger::ledger::{self, ApplyOutcome, Delivery};
use tower::ServiceExt;

#[tokio::test]
async fn test_completed_contribution_is_recorded_once() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_1", "fundraiser", &fundraiser.id, 2500);

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "OK");

    let report = run_due_tasks(&state).unwrap();
    assert_eq!(report.done, 2, "recompute and activity log should both run");

    {
        let conn = state.db.get().unwrap();
        assert_eq!(collected_amount(&conn, &fundraiser.id), 2500);

        let payments =
            queries::list_payments_for_target(&conn, TargetType::Fundraiser, &fundraiser.id)
                .unwrap();
        assert_eq!(payments.len(), 1);
        let payment = &payments[0];
        assert_eq!(payment.amount, 2500);
        assert_eq!(payment.currency, "usd");
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.method, "card");
        assert_eq!(payment.payer_id.as_deref(), Some("supporter-1"));
        assert_eq!(payment.team_id, fundraiser.team_id);
        assert_eq!(payment.provider_payment_ref.as_deref(), Some("pi_evt_1"));
    }

    // Redelivery of the same event
    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Already processed");

    let report = run_due_tasks(&state).unwrap();
    assert_eq!(report.claimed, 0, "a duplicate must not enqueue new work");

    let conn = state.db.get().unwrap();
    assert_eq!(collected_amount(&conn, &fundraiser.id), 2500);
    assert_eq!(count_rows(&conn, "payments"), 1);

    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_1")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.status, InboundEventStatus::Applied);
    assert_eq!(inbound.redelivery_count, 1);
    assert!(inbound.last_redelivered_at.is_some());

    let linked = queries::get_payment_by_inbound_event(&conn, &inbound.id)
        .unwrap()
        .expect("payment should link to evt_1");
    assert_eq!(linked.amount, 2500);
}

#[tokio::test]
async fn test_contribution_writes_activity_entry() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_activity", "fundraiser", &fundraiser.id, 2500);

    app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    run_due_tasks(&state).unwrap();

    let payment_id = {
        let conn = state.db.get().unwrap();
        queries::list_payments_for_target(&conn, TargetType::Fundraiser, &fundraiser.id)
            .unwrap()[0]
            .id
            .clone()
    };

    let audit = state.audit.get().unwrap();
    let entries = queries::list_activity_logs_for_resource(&audit, "payment", &payment_id).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.category, ActivityCategory::Contribution);
    assert_eq!(entry.actor_type, ActorType::Public);
    assert_eq!(entry.actor_ref.as_deref(), Some("supporter-1"));
    assert_eq!(entry.team_id, fundraiser.team_id);
    assert_eq!(entry.message, "Contributed 25.00 USD to \"Spring Drive\"");
}

#[tokio::test]
async fn test_missing_signature_header_returns_400() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_nosig", "fundraiser", &fundraiser.id, 2500);

    let response = app(state.clone())
        .oneshot(webhook_request(&payload, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "inbound_events"), 0);
}

#[tokio::test]
async fn test_invalid_signature_persists_nothing() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_forged", "fundraiser", &fundraiser.id, 2500);

    let t = now().to_string();
    let forged = compute_stripe_signature("whsec_wrong", &t, payload.as_bytes()).unwrap();
    let header = format!("t={},v1={}", t, forged);

    let response = app(state.clone())
        .oneshot(webhook_request(&payload, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "inbound_events"), 0);
    assert_eq!(count_rows(&conn, "payments"), 0);
    assert_eq!(collected_amount(&conn, &fundraiser.id), 0);
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let original = checkout_completed_payload("evt_tamper", "fundraiser", &fundraiser.id, 100);
    let tampered = checkout_completed_payload("evt_tamper", "fundraiser", &fundraiser.id, 100_000);

    let header = sign_payload(&original);
    let response = app(state.clone())
        .oneshot(webhook_request(&tampered, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "inbound_events"), 0);
}

#[tokio::test]
async fn test_stale_signature_is_rejected() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_stale", "fundraiser", &fundraiser.id, 2500);

    let header = sign_payload_at(&payload, now() - 600);
    let response = app(state.clone())
        .oneshot(webhook_request(&payload, Some(&header)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "inbound_events"), 0);
}

#[tokio::test]
async fn test_malformed_signature_header_returns_400() {
    let state = create_test_app_state();
    let response = app(state)
        .oneshot(webhook_request("{}", Some("garbage")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_target_is_rejected_but_acknowledged() {
    let state = create_test_app_state();
    setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_unknown", "fundraiser", "fl_fr_doesnotexist", 2500);

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Rejected");

    let conn = state.db.get().unwrap();
    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_unknown")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.status, InboundEventStatus::Rejected);
    assert!(
        inbound
            .rejection_reason
            .as_deref()
            .is_some_and(|r| r.contains("not found"))
    );
    assert_eq!(count_rows(&conn, "payments"), 0);
    assert_eq!(count_rows(&conn, "follow_up_tasks"), 0);
}

#[tokio::test]
async fn test_unknown_target_type_is_rejected() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_badtype", "donation", &fundraiser.id, 2500);

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_badtype")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.status, InboundEventStatus::Rejected);
    assert_eq!(count_rows(&conn, "payments"), 0);
}

#[tokio::test]
async fn test_unpaid_session_is_ignored() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_unpaid", "fundraiser", &fundraiser.id, 2500)
        .replace("\"paid\"", "\"unpaid\"");

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Event ignored");

    let conn = state.db.get().unwrap();
    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_unpaid")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.status, InboundEventStatus::Ignored);
    assert_eq!(count_rows(&conn, "payments"), 0);
}

#[tokio::test]
async fn test_unrelated_event_type_is_ignored() {
    let state = create_test_app_state();
    let payload = serde_json::json!({
        "id": "evt_customer",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    })
    .to_string();

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Event ignored");
}

#[tokio::test]
async fn test_signed_but_undecodable_body_returns_400() {
    let state = create_test_app_state();
    let payload = "not json at all";

    let response = app(state.clone())
        .oneshot(signed_webhook_request(payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "inbound_events"), 0);
}

#[tokio::test]
async fn test_signed_event_with_undecodable_session_is_rejected_for_review() {
    let state = create_test_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = serde_json::json!({
        "id": "evt_bad_amount",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_bad_amount",
            "payment_status": "paid",
            "amount_total": "2500",
            "currency": "usd",
            "metadata": { "target_type": "fundraiser", "target_id": fundraiser.id }
        }}
    })
    .to_string();

    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Rejected");

    // Redelivery is acknowledged without a second rejection
    let response = app(state.clone())
        .oneshot(signed_webhook_request(&payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Already processed");

    let conn = state.db.get().unwrap();
    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_bad_amount")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.status, InboundEventStatus::Rejected);
    assert!(
        inbound
            .rejection_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("undecodable checkout session"))
    );
    assert_eq!(count_rows(&conn, "payments"), 0);
    assert_eq!(collected_amount(&conn, &fundraiser.id), 0);
}

#[tokio::test]
async fn test_event_ticket_redelivery_issues_one_ticket() {
    let state = create_test_app_state();
    let event = setup_event(&state, Some(1500));
    let payload = checkout_completed_payload("evt_gate", "event_ticket", &event.id, 1500);

    for expected in ["OK", "Already processed", "Already processed"] {
        let response = app(state.clone())
            .oneshot(signed_webhook_request(&payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, expected);
    }

    let report = run_due_tasks(&state).unwrap();
    assert_eq!(report.done, 2, "ticket issuance and activity log");
    assert_eq!(run_due_tasks(&state).unwrap().claimed, 0);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "payments"), 1);
    assert_eq!(count_rows(&conn, "tickets"), 1);

    let tickets = queries::list_tickets_for_event(&conn, &event.id).unwrap();
    let payment = queries::list_payments_for_target(&conn, TargetType::EventTicket, &event.id)
        .unwrap()
        .remove(0);
    assert_eq!(tickets[0].payment_id, payment.id);
}

#[test]
fn test_concurrent_redeliveries_apply_once() {
    let (state, _tmp) = create_file_backed_app_state();
    let fundraiser = setup_fundraiser(&state);
    let payload = checkout_completed_payload("evt_race", "fundraiser", &fundraiser.id, 2500);
    let event = parse_stripe_event(payload.as_bytes()).unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let state = state.clone();
            let barrier = barrier.clone();
            let payload = payload.clone();
            let event = event.clone();
            std::thread::spawn(move || {
                let mut conn = state.db.get().unwrap();
                let delivery = Delivery {
                    provider: "stripe",
                    payload: payload.as_bytes(),
                    signature: "t=0,v1=00",
                };
                barrier.wait();
                ledger::apply_event(&mut conn, &delivery, &event).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ApplyOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ApplyOutcome::Applied(_)))
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|o| matches!(o, ApplyOutcome::Duplicate))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(duplicates, threads - 1);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "payments"), 1);
    assert_eq!(count_rows(&conn, "inbound_events"), 1);
    assert_eq!(count_rows(&conn, "follow_up_tasks"), 2);

    let inbound = queries::get_inbound_event_by_provider_id(&conn, "evt_race")
        .unwrap()
        .unwrap();
    assert_eq!(inbound.redelivery_count, (threads - 1) as i64);
}

#[test]
fn test_concurrent_distinct_payments_sum_exactly() {
    let (state, _tmp) = create_file_backed_app_state();
    let fundraiser = setup_fundraiser(&state);

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let state = state.clone();
            let barrier = barrier.clone();
            let fundraiser_id = fundraiser.id.clone();
            std::thread::spawn(move || {
                let payload = checkout_completed_payload(
                    &format!("evt_par_{}", i),
                    "fundraiser",
                    &fundraiser_id,
                    1000 + i as i64,
                );
                let event = parse_stripe_event(payload.as_bytes()).unwrap();
                let mut conn = state.db.get().unwrap();
                let delivery = Delivery {
                    provider: "stripe",
                    payload: payload.as_bytes(),
                    signature: "t=0,v1=00",
                };
                barrier.wait();
                let outcome = ledger::apply_event(&mut conn, &delivery, &event).unwrap();
                assert!(matches!(outcome, ApplyOutcome::Applied(_)));
                // Recompute races against the other writers
                ledger::recompute_aggregate(&conn, &fundraiser_id).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Drain the enqueued recomputes as the worker would
    run_due_tasks(&state).unwrap();

    let expected: i64 = (0..threads as i64).map(|i| 1000 + i).sum();
    let conn = state.db.get().unwrap();
    assert_eq!(collected_amount(&conn, &fundraiser.id), expected);
    assert_eq!(
        queries::sum_completed_payments(&conn, &fundraiser.id).unwrap(),
        expected
    );
}
