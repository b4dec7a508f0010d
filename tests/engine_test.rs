mod common;

use anyhow::Result;
use common::{Harness, RATE, harness, new_user};
use tutorledger::application::{AppError, Collaborators, Engine, ErrorKind, WebhookRejected};
use tutorledger::domain::{DisputeAuditAction, Resolution, SessionSlot, WithdrawalStatus};

/// Operator wiring over the harness database, as the command line builds it.
fn operator_engine(h: &Harness) -> Engine {
    Engine::new(
        h.repo.clone(),
        Collaborators::offline(h.repo.clone()),
        h.policy,
        "INR".to_string(),
    )
}

#[tokio::test]
async fn test_operator_engine_refuses_gateway_work() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let operator = operator_engine(&h);

    let slot = SessionSlot::parse("2099-01-10", "10:00", "11:00")?;
    let err = operator
        .bookings
        .create_booking_for_slot(new_user(), tutor, slot, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SlotUnavailable));

    let body = Harness::webhook_body("payment.captured", "order_1", "pay_1");
    let result = operator.webhooks.handle(&body, "sig-anything").await;
    assert_eq!(result, Err(WebhookRejected::InvalidSignature));
    Ok(())
}

#[tokio::test]
async fn test_operator_engine_runs_payouts_and_disputes() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    h.add_bank_account(tutor).await?;
    h.released_booking(tutor, new_user(), h.slot(2, "10:00", "11:00"))
        .await?;
    h.rewind();
    let learner = new_user();
    let disputed = h
        .completed_booking(tutor, learner, h.slot(3, "10:00", "11:00"))
        .await?;
    let dispute = h
        .engine
        .disputes
        .initiate_dispute(disputed.id, learner, None)
        .await?;

    let operator = operator_engine(&h);
    let summary = operator.wallet.summary(tutor).await?;
    assert_eq!(summary.available, 300_000);
    assert_eq!(summary.pending, 300_000);

    assert_eq!(operator.disputes.list_open().await?.len(), 1);
    let trail = operator.disputes.audit_trail(dispute.id).await?;
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, DisputeAuditAction::DisputeCreated);

    // Refunds need the gateway; the dispute stays open
    let err = operator
        .disputes
        .resolve_dispute(dispute.id, new_user(), Resolution::FullRefund)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(operator.disputes.get(dispute.id).await?.is_open());

    operator
        .disputes
        .resolve_dispute(dispute.id, new_user(), Resolution::ReleasePaymentToTutor)
        .await?;
    assert!(operator.disputes.list_open().await?.is_empty());
    assert_eq!(operator.disputes.list_all().await?.len(), 1);

    let request = operator
        .withdrawals
        .create_withdrawal_request(tutor, 600_000)
        .await?;
    let approved = operator.withdrawals.approve(request.id, new_user()).await?;
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(operator.withdrawals.available_earnings(tutor).await?, 0);
    Ok(())
}
