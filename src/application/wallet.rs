use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::{
    AuditAction, AuditEntry, BookingId, Cents, EarningStatus, EarningsSummary, LedgerEntry,
    Performer, UserId,
};
use crate::storage::{LedgerTransition, Repository, Tx};

use super::{AppError, Clock};

/// Escrow ledger: one entry per paid booking, moved between
/// pending release, available and refunded.
pub struct WalletLedger {
    repo: Arc<Repository>,
    clock: Arc<dyn Clock>,
}

impl WalletLedger {
    pub fn new(repo: Arc<Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    // ========================
    // Transitions
    // ========================

    /// Release escrow to the tutor. No-op (false) when the entry is not
    /// pending or an open dispute exists for the booking.
    pub async fn release(&self, booking_id: BookingId) -> Result<bool, AppError> {
        self.release_with(booking_id, true, Performer::System).await
    }

    /// Release escrow without the open-dispute guard. Used once an admin has
    /// decided in the tutor's favour.
    pub async fn release_internal(
        &self,
        booking_id: BookingId,
        performed_by: Performer,
    ) -> Result<bool, AppError> {
        self.release_with(booking_id, false, performed_by).await
    }

    /// Pending -> refunded. The refund audit entry belongs to the caller.
    pub async fn mark_refunded(&self, booking_id: BookingId) -> Result<bool, AppError> {
        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        let refunded = Self::refund_in(&mut tx, booking_id, now).await?;
        tx.commit().await?;
        Ok(refunded.is_some())
    }

    /// Release the remainder of a partially refunded booking.
    pub async fn release_partial(
        &self,
        booking_id: BookingId,
        net_amount: Cents,
        performed_by: Performer,
    ) -> Result<bool, AppError> {
        if net_amount < 0 {
            return Err(AppError::InvalidAmount(format!(
                "released amount must not be negative: {}",
                net_amount
            )));
        }
        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        let Some(entry) = Self::release_partial_in(&mut tx, booking_id, net_amount, now).await? else {
            return Ok(false);
        };
        tx.append_audit(&released_audit(&entry, performed_by, now)?)
            .await?;
        tx.commit().await?;

        tracing::info!(%booking_id, net_amount, "escrow partially released");
        Ok(true)
    }

    async fn release_with(
        &self,
        booking_id: BookingId,
        respect_open_dispute: bool,
        performed_by: Performer,
    ) -> Result<bool, AppError> {
        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        let Some(entry) = Self::release_in(&mut tx, booking_id, respect_open_dispute, now).await? else {
            return Ok(false);
        };
        tx.append_audit(&released_audit(&entry, performed_by, now)?)
            .await?;
        tx.commit().await?;

        tracing::info!(%booking_id, amount = entry.amount, "escrow released");
        Ok(true)
    }

    // ========================
    // In-transaction building blocks
    // ========================

    pub(crate) async fn release_in(
        tx: &mut Tx,
        booking_id: BookingId,
        respect_open_dispute: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, AppError> {
        Ok(tx
            .transition_ledger_entry(
                LedgerTransition {
                    booking_id,
                    from: EarningStatus::PendingRelease,
                    to: EarningStatus::Available,
                    new_amount: None,
                    respect_open_dispute,
                },
                now,
            )
            .await?)
    }

    pub(crate) async fn refund_in(
        tx: &mut Tx,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, AppError> {
        Ok(tx
            .transition_ledger_entry(
                LedgerTransition {
                    booking_id,
                    from: EarningStatus::PendingRelease,
                    to: EarningStatus::Refunded,
                    new_amount: None,
                    respect_open_dispute: false,
                },
                now,
            )
            .await?)
    }

    pub(crate) async fn release_partial_in(
        tx: &mut Tx,
        booking_id: BookingId,
        net_amount: Cents,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>, AppError> {
        Ok(tx
            .transition_ledger_entry(
                LedgerTransition {
                    booking_id,
                    from: EarningStatus::PendingRelease,
                    to: EarningStatus::Available,
                    new_amount: Some(net_amount),
                    respect_open_dispute: false,
                },
                now,
            )
            .await?)
    }

    // ========================
    // Queries
    // ========================

    pub async fn entry(&self, booking_id: BookingId) -> Result<Option<LedgerEntry>, AppError> {
        Ok(self.repo.get_ledger_entry(booking_id).await?)
    }

    pub async fn entries_for_tutor(&self, tutor_id: UserId) -> Result<Vec<LedgerEntry>, AppError> {
        Ok(self.repo.list_ledger_entries_for_tutor(tutor_id).await?)
    }

    pub async fn summary(&self, tutor_id: UserId) -> Result<EarningsSummary, AppError> {
        let entries = self.repo.list_ledger_entries_for_tutor(tutor_id).await?;
        let withdrawn = self.repo.sum_deductions(tutor_id).await?;
        Ok(EarningsSummary::from_entries(&entries, withdrawn))
    }
}

/// EARNINGS_RELEASED for an entry that has just become available.
pub(crate) fn released_audit(
    entry: &LedgerEntry,
    performed_by: Performer,
    now: DateTime<Utc>,
) -> Result<AuditEntry, AppError> {
    Ok(AuditEntry::new(AuditAction::EarningsReleased, entry.amount, performed_by, now)?
        .with_tutor(entry.tutor_id)
        .with_booking(entry.booking_id)
        .with_metadata(json!({
            "commission_rate": entry.commission_rate,
            "commission_amount": entry.commission_amount,
        })))
}
