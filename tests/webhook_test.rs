mod common;

use anyhow::Result;
use common::{FakeGateway, Harness, RATE, harness, new_user};
use tutorledger::application::{ErrorKind, WebhookAck, WebhookRejected};
use tutorledger::domain::{AuditAction, BookingStatus, EarningStatus, OrphanReason};
use tutorledger::storage::AuditFilter;

#[tokio::test]
async fn test_captured_payment_opens_escrow() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(2, "10:00", "11:00")).await?;

    assert_eq!(booking.status, BookingStatus::Paid);
    assert_eq!(
        booking.payment_ref,
        Some(format!("pay_{}", booking.id.simple()))
    );

    let entry = h.engine.wallet.entry(booking.id).await?.unwrap();
    assert_eq!(entry.status, EarningStatus::PendingRelease);
    assert_eq!(entry.amount, 300_000);
    assert_eq!(entry.commission_rate, 1000);
    assert_eq!(entry.commission_amount, 30_000);
    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::EarningsCreated, booking.id)
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(2, "10:00", "11:00")).await?;
    let order_ref = booking.order_ref.clone().unwrap();
    let payment_ref = booking.payment_ref.clone().unwrap();

    for _ in 0..3 {
        let ack = h.deliver("payment.captured", &order_ref, &payment_ref).await;
        assert_eq!(ack, WebhookAck::Processed);
    }

    assert_eq!(h.repo.count_ledger_entries_for_booking(booking.id).await?, 1);
    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::EarningsCreated, booking.id)
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(2, "10:00", "11:00"), None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;

    let (a, b) = tokio::join!(
        h.deliver("payment.captured", &order.order_ref, "pay_1"),
        h.deliver("payment.captured", &order.order_ref, "pay_1"),
    );
    assert_eq!(a, WebhookAck::Processed);
    assert_eq!(b, WebhookAck::Processed);

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Paid);
    assert_eq!(h.repo.count_ledger_entries_for_booking(booking.id).await?, 1);
    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::EarningsCreated, booking.id)
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_order_is_acknowledged() -> Result<()> {
    let h = harness().await?;
    let ack = h.deliver("payment.captured", "order_missing", "pay_1").await;
    assert_eq!(ack, WebhookAck::NoMatch);
    assert_eq!(ack.http_status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_bad_signature_is_rejected() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(2, "10:00", "11:00"), None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;

    let body = Harness::webhook_body("payment.captured", &order.order_ref, "pay_1");
    let result = h.engine.webhooks.handle(&body, "sig-forged").await;
    assert_eq!(result, Err(WebhookRejected::InvalidSignature));

    // Signature over a different body
    let other = Harness::webhook_body("payment.captured", &order.order_ref, "pay_2");
    let result = h
        .engine
        .webhooks
        .handle(&body, &FakeGateway::sign(&other))
        .await;
    assert!(result.is_err());

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(h.engine.wallet.entry(booking.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unhandled_or_malformed_payloads_are_ignored() -> Result<()> {
    let h = harness().await?;

    let ack = h.deliver("order.paid", "order_1", "pay_1").await;
    assert_eq!(ack, WebhookAck::Ignored);

    let body = b"{not json".to_vec();
    let ack = h
        .engine
        .webhooks
        .handle(&body, &FakeGateway::sign(&body))
        .await;
    assert_eq!(ack, Ok(WebhookAck::Ignored));
    Ok(())
}

#[tokio::test]
async fn test_failed_then_captured() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(2, "10:00", "11:00"), None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;

    let ack = h.deliver("payment.failed", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Processed);
    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Failed);
    assert!(h.engine.wallet.entry(booking.id).await?.is_none());

    // A second failure does nothing more
    let ack = h.deliver("payment.failed", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Ignored);

    // The learner retried and the gateway captured
    let ack = h.deliver("payment.captured", &order.order_ref, "pay_2").await;
    assert_eq!(ack, WebhookAck::Processed);
    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Paid);
    assert_eq!(stored.payment_ref.as_deref(), Some("pay_2"));
    assert!(h.engine.wallet.entry(booking.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_capture_for_cancelled_booking_is_refunded() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(2, "10:00", "11:00"), None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;
    h.engine.bookings.cancel_booking(booking.id, learner).await?;

    let ack = h.deliver("payment.captured", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Refunded);

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Cancelled);
    assert!(h.engine.wallet.entry(booking.id).await?.is_none());

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_ref, "pay_1");
    assert_eq!(refunds[0].amount, None);

    // Redelivery does not refund a second time
    let ack = h.deliver("payment.captured", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Ignored);
    assert_eq!(h.gateway.refunds().len(), 1);

    let captures = h.engine.bookings.orphan_captures(false).await?;
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].reason, OrphanReason::BookingCancelled);
    assert_eq!(captures[0].refund_ref.as_deref(), Some("rfnd_1"));
    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::RefundFull, booking.id)
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_late_capture_after_slot_rebooked() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let slot = h.slot(2, "10:00", "11:00");
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, slot, None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;
    let ack = h.deliver("payment.failed", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Processed);

    // Another learner takes the freed slot and pays
    let rebooked = h.paid_booking(tutor, new_user(), slot).await?;

    let ack = h.deliver("payment.captured", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Refunded);

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Failed);
    assert!(h.engine.wallet.entry(booking.id).await?.is_none());
    assert_eq!(
        h.engine.bookings.get_booking(rebooked.id).await?.status,
        BookingStatus::Paid
    );

    let refunds = h.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_ref, "pay_1");

    let refunded = h
        .engine
        .audit
        .entries(&AuditFilter {
            booking_id: Some(booking.id),
            action: Some(AuditAction::RefundFull),
            ..Default::default()
        })
        .await?;
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].amount, 300_000);
    assert_eq!(refunded[0].metadata["reason"], "slot_rebooked");
    Ok(())
}

#[tokio::test]
async fn test_orphan_refund_failure_is_kept_for_reconciliation() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let booking = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(2, "10:00", "11:00"), None)
        .await?;
    let order = h
        .engine
        .bookings
        .create_payment_order_for_booking(booking.id, learner)
        .await?;
    h.engine.bookings.cancel_booking(booking.id, learner).await?;

    h.gateway.set_refunds_down(true);
    let ack = h.deliver("payment.captured", &order.order_ref, "pay_1").await;
    assert_eq!(ack, WebhookAck::Swallowed(ErrorKind::Internal));

    let pending = h.engine.bookings.orphan_captures(true).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].booking_id, booking.id);
    assert_eq!(pending[0].amount, 300_000);
    assert!(!pending[0].is_refunded());
    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::RefundFull, booking.id)
            .await?,
        0
    );
    Ok(())
}
