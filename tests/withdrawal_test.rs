mod common;

use anyhow::Result;
use common::{Harness, RATE, harness, new_user};
use tutorledger::application::{AppError, ErrorKind};
use tutorledger::domain::{AuditAction, UserId, WithdrawalStatus};
use tutorledger::storage::AuditFilter;

/// A tutor with bank details and one released 300.000 session.
async fn funded_tutor(h: &Harness) -> Result<UserId> {
    let tutor = h.add_tutor(RATE).await?;
    h.add_bank_account(tutor).await?;
    h.released_booking(tutor, new_user(), h.slot(2, "10:00", "11:00"))
        .await?;
    Ok(tutor)
}

#[tokio::test]
async fn test_withdraw_full_balance() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;
    let admin = new_user();
    assert_eq!(h.engine.withdrawals.available_earnings(tutor).await?, 300_000);

    let request = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 300_000)
        .await?;
    assert_eq!(request.status, WithdrawalStatus::Pending);
    assert_eq!(request.bank_snapshot.masked_account_number, "XXXXXXXX7890");

    // Requesting does not deduct; a second request is blocked instead
    assert_eq!(h.engine.withdrawals.available_earnings(tutor).await?, 300_000);
    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PendingWithdrawalExists));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let approved = h.engine.withdrawals.approve(request.id, admin).await?;
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(approved.processed_by, Some(admin));
    assert_eq!(h.engine.withdrawals.available_earnings(tutor).await?, 0);

    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 50_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientFunds {
            available: 0,
            requested: 50_000
        }
    ));

    let paid = h
        .engine
        .withdrawals
        .mark_paid(request.id, admin, Some("UTR0001"))
        .await?;
    assert_eq!(paid.status, WithdrawalStatus::Paid);
    assert_eq!(paid.transaction_ref.as_deref(), Some("UTR0001"));

    let actions: Vec<_> = h
        .engine
        .audit
        .entries(&AuditFilter {
            withdrawal_id: Some(request.id),
            ..Default::default()
        })
        .await?
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::WithdrawalRequested,
            AuditAction::WithdrawalApproved,
            AuditAction::WithdrawalPaid,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_approvals() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;
    let request = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 100_000)
        .await?;

    let (a, b) = tokio::join!(
        h.engine.withdrawals.approve(request.id, new_user()),
        h.engine.withdrawals.approve(request.id, new_user()),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(err, AppError::InvalidWithdrawalState { .. }));

    assert_eq!(h.repo.sum_deductions(tutor).await?, 100_000);
    assert_eq!(h.engine.withdrawals.available_earnings(tutor).await?, 200_000);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_leave_one_pending() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;

    let (a, b) = tokio::join!(
        h.engine.withdrawals.create_withdrawal_request(tutor, 100_000),
        h.engine.withdrawals.create_withdrawal_request(tutor, 150_000),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(err, AppError::PendingWithdrawalExists));

    let pending = h
        .engine
        .withdrawals
        .list(Some(tutor), Some(WithdrawalStatus::Pending))
        .await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(
        h.repo
            .list_audit_entries(&AuditFilter {
                tutor_id: Some(tutor),
                action: Some(AuditAction::WithdrawalRequested),
                ..Default::default()
            })
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_request_validations() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;

    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 10_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::BelowMinimumWithdrawal {
            requested: 10_000,
            minimum: 50_000
        }
    ));

    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 300_001)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, -5)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let no_bank = h.add_tutor(RATE).await?;
    let err = h
        .engine
        .withdrawals
        .create_withdrawal_request(no_bank, 50_000)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoBankDetails));
    Ok(())
}

#[tokio::test]
async fn test_minimum_follows_platform_settings() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;

    let mut settings = h.repo.get_platform_settings().await?.unwrap();
    settings.min_withdrawal_amount = 5_000;
    h.repo.update_platform_settings(settings).await?;

    h.engine
        .withdrawals
        .create_withdrawal_request(tutor, 10_000)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_reject_keeps_balance() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;
    let request = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 200_000)
        .await?;

    let rejected = h
        .engine
        .withdrawals
        .reject(request.id, new_user(), Some("account name mismatch"))
        .await?;
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.note.as_deref(), Some("account name mismatch"));
    assert_eq!(h.engine.withdrawals.available_earnings(tutor).await?, 300_000);

    // Rejected requests can be neither approved nor paid
    let err = h
        .engine
        .withdrawals
        .approve(request.id, new_user())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidWithdrawalState { .. }));

    // And the tutor may ask again
    h.engine
        .withdrawals
        .create_withdrawal_request(tutor, 300_000)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_mark_paid_requires_approval() -> Result<()> {
    let h = harness().await?;
    let tutor = funded_tutor(&h).await?;
    let request = h
        .engine
        .withdrawals
        .create_withdrawal_request(tutor, 100_000)
        .await?;

    let err = h
        .engine
        .withdrawals
        .mark_paid(request.id, new_user(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidWithdrawalState {
            expected: "approved",
            ..
        }
    ));

    let err = h
        .engine
        .withdrawals
        .approve(uuid::Uuid::new_v4(), new_user())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .engine
        .withdrawals
        .approve(request.id, uuid::Uuid::nil())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Audit(_)));
    assert_eq!(
        h.engine.withdrawals.get(request.id).await?.status,
        WithdrawalStatus::Pending
    );
    Ok(())
}
