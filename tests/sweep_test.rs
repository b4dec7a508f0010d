mod common;

use anyhow::Result;
use chrono::Duration;
use common::{RATE, harness, harness_with, new_user};
use tutorledger::config::Policy;
use tutorledger::domain::{AuditAction, BookingStatus, EarningStatus, Performer};
use tutorledger::storage::AuditFilter;

#[tokio::test]
async fn test_sweep_leaves_unfinished_sessions() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(1, "10:00", "11:00")).await?;

    // Session over but still inside the completion buffer
    h.clock.set(booking.slot.ends_at() + Duration::minutes(10));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.examined, 0);

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Paid);
    Ok(())
}

#[tokio::test]
async fn test_sweep_completes_then_releases() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(1, "10:00", "11:00")).await?;

    h.clock.set(booking.slot.ends_at() + Duration::minutes(16));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.completed, 1);
    assert_eq!(report.released, 0);

    let stored = h.engine.bookings.get_booking(booking.id).await?;
    assert_eq!(stored.status, BookingStatus::Completed);
    let entry = h.engine.wallet.entry(booking.id).await?.unwrap();
    assert_eq!(entry.status, EarningStatus::PendingRelease);

    // Escrow stays held through the dispute window
    h.clock.set(booking.slot.ends_at() + Duration::hours(23));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.released, 0);

    h.clock.set(booking.slot.ends_at() + Duration::hours(24) + Duration::minutes(1));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.completed, 0);
    assert_eq!(report.released, 1);

    let entry = h.engine.wallet.entry(booking.id).await?.unwrap();
    assert_eq!(entry.status, EarningStatus::Available);

    let released = h
        .engine
        .audit
        .entries(&AuditFilter {
            booking_id: Some(booking.id),
            action: Some(AuditAction::EarningsReleased),
            ..Default::default()
        })
        .await?;
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].performed_by, Performer::System);
    assert_eq!(released[0].amount, 300_000);
    assert_eq!(released[0].metadata["commission_amount"], 30_000);
    Ok(())
}

#[tokio::test]
async fn test_release_at_completion_when_not_holding() -> Result<()> {
    let h = harness_with(Policy {
        hold_escrow_for_dispute_window: false,
        ..Policy::default()
    })
    .await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(1, "10:00", "11:00")).await?;

    h.clock.set(booking.slot.ends_at() + Duration::minutes(16));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.completed, 1);
    assert_eq!(report.released, 1);

    let summary = h.engine.wallet.summary(tutor).await?;
    assert_eq!(summary.available, 300_000);
    assert_eq!(summary.pending, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweep_is_idempotent() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.released_booking(tutor, new_user(), h.slot(1, "10:00", "11:00")).await?;

    h.clock.advance(Duration::days(2));
    for _ in 0..3 {
        let report = h.engine.sweep.run_once().await?;
        assert_eq!(report.completed, 0);
        assert_eq!(report.released, 0);
        assert_eq!(report.failed, 0);
    }

    assert_eq!(
        h.repo
            .count_audit_entries(AuditAction::EarningsReleased, booking.id)
            .await?,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_sweep_skips_pending_and_cancelled() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let learner = new_user();
    let pending = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(1, "10:00", "11:00"), None)
        .await?;
    let cancelled = h
        .engine
        .bookings
        .create_booking_for_slot(learner, tutor, h.slot(1, "12:00", "13:00"), None)
        .await?;
    h.engine.bookings.cancel_booking(cancelled.id, learner).await?;

    h.clock.advance(Duration::days(3));
    let report = h.engine.sweep.run_once().await?;
    assert_eq!(report.examined, 0);
    assert_eq!(
        h.engine.bookings.get_booking(pending.id).await?.status,
        BookingStatus::Pending
    );
    Ok(())
}
