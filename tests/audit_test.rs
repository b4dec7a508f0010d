mod common;

use anyhow::Result;
use chrono::Utc;
use common::{RATE, harness, new_user};
use serde_json::json;
use sqlx::SqlitePool;
use tutorledger::application::AppError;
use tutorledger::domain::{AuditAction, AuditEntry, AuditError, Performer};
use tutorledger::io::Exporter;
use tutorledger::storage::AuditFilter;
use uuid::Uuid;

#[tokio::test]
async fn test_admin_entries_need_an_actor() -> Result<()> {
    let h = harness().await?;

    let err = AuditEntry::new(
        AuditAction::WithdrawalApproved,
        1_000,
        Performer::Admin(Uuid::nil()),
        Utc::now(),
    )
    .unwrap_err();
    assert_eq!(err, AuditError::MissingActor);

    // Built by hand, bypassing the constructor
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        action: AuditAction::WithdrawalApproved,
        tutor_id: None,
        booking_id: None,
        withdrawal_id: None,
        amount: 1_000,
        performed_by: Performer::Admin(Uuid::nil()),
        metadata: json!({}),
        created_at: Utc::now(),
    };
    let err = h.engine.audit.record(entry).await.unwrap_err();
    assert!(matches!(err, AppError::Audit(AuditError::MissingActor)));

    let err = AuditEntry::new(AuditAction::RefundFull, -1, Performer::System, Utc::now())
        .unwrap_err();
    assert_eq!(err, AuditError::NegativeAmount(-1));

    assert!(
        h.engine
            .audit
            .entries(&AuditFilter::default())
            .await?
            .is_empty()
    );
    Ok(())
}

#[tokio::test]
async fn test_record_standalone_entry() -> Result<()> {
    let h = harness().await?;
    let admin = new_user();
    let tutor = new_user();

    let entry = AuditEntry::new(
        AuditAction::WithdrawalPaid,
        75_000,
        Performer::Admin(admin),
        Utc::now(),
    )?
    .with_tutor(tutor)
    .with_metadata(json!({ "transaction_ref": "manual" }));
    h.engine.audit.record(entry).await?;

    let stored = h
        .engine
        .audit
        .entries(&AuditFilter {
            tutor_id: Some(tutor),
            ..Default::default()
        })
        .await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].performed_by, Performer::Admin(admin));
    assert_eq!(stored[0].metadata["transaction_ref"], "manual");
    Ok(())
}

#[tokio::test]
async fn test_money_tables_reject_rewrites() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let booking = h.paid_booking(tutor, new_user(), h.slot(2, "10:00", "11:00")).await?;
    h.engine.bookings.mark_no_show(booking.id, new_user()).await?;

    let pool = SqlitePool::connect(&h.db_url).await?;

    assert!(
        sqlx::query("UPDATE financial_audit_log SET amount = 0")
            .execute(&pool)
            .await
            .is_err()
    );
    assert!(
        sqlx::query("DELETE FROM financial_audit_log")
            .execute(&pool)
            .await
            .is_err()
    );
    assert!(
        sqlx::query("DELETE FROM wallet_ledger")
            .execute(&pool)
            .await
            .is_err()
    );
    // Refunded entries never change again
    assert!(
        sqlx::query("UPDATE wallet_ledger SET status = 'available'")
            .execute(&pool)
            .await
            .is_err()
    );
    pool.close().await;

    let entry = h.engine.wallet.entry(booking.id).await?.unwrap();
    assert_eq!(entry.amount, 300_000);
    assert_eq!(
        h.engine
            .audit
            .entries(&AuditFilter::default())
            .await?
            .len(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn test_filters_and_limit() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    let other = h.add_tutor(RATE).await?;
    let first = h.paid_booking(tutor, new_user(), h.slot(2, "10:00", "11:00")).await?;
    h.paid_booking(tutor, new_user(), h.slot(2, "12:00", "13:00")).await?;
    h.paid_booking(other, new_user(), h.slot(2, "10:00", "11:00")).await?;

    let all = h.engine.audit.entries(&AuditFilter::default()).await?;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|e| e.action == AuditAction::EarningsCreated));

    let for_tutor = h
        .engine
        .audit
        .entries(&AuditFilter {
            tutor_id: Some(tutor),
            ..Default::default()
        })
        .await?;
    assert_eq!(for_tutor.len(), 2);
    assert_eq!(for_tutor[0].booking_id, Some(first.id));

    let limited = h
        .engine
        .audit
        .entries(&AuditFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, all[0].id);

    let none = h
        .engine
        .audit
        .entries(&AuditFilter {
            action: Some(AuditAction::WithdrawalPaid),
            ..Default::default()
        })
        .await?;
    assert!(none.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_export_audit_and_ledger_csv() -> Result<()> {
    let h = harness().await?;
    let tutor = h.add_tutor(RATE).await?;
    h.paid_booking(tutor, new_user(), h.slot(2, "10:00", "11:00")).await?;
    h.paid_booking(tutor, new_user(), h.slot(3, "10:00", "11:00")).await?;

    let exporter = Exporter::new(&h.repo);

    let mut audit_csv = Vec::new();
    let count = exporter
        .export_audit_csv(&AuditFilter::default(), &mut audit_csv)
        .await?;
    assert_eq!(count, 2);
    let text = String::from_utf8(audit_csv)?;
    assert_eq!(text.lines().count(), 3);
    assert!(text.starts_with("id,created_at,action,amount"));
    assert!(text.contains("EARNINGS_CREATED"));

    let mut ledger_csv = Vec::new();
    let count = exporter.export_ledger_csv(&mut ledger_csv).await?;
    assert_eq!(count, 2);
    assert!(String::from_utf8(ledger_csv)?.contains("pending_release"));

    let mut json = Vec::new();
    let snapshot = exporter.export_full_json(&mut json).await?;
    assert_eq!(snapshot.ledger.len(), 2);
    assert_eq!(snapshot.audit_log.len(), 2);
    let parsed: serde_json::Value = serde_json::from_slice(&json)?;
    assert_eq!(parsed["audit_log"].as_array().map(Vec::len), Some(2));
    Ok(())
}
