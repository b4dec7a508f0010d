use std::sync::Arc;

use serde_json::json;

use crate::domain::{
    AuditAction, AuditEntry, AuditError, Cents, EarningStatus, Performer, UserId,
    WithdrawalDeduction, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use crate::storage::{Repository, WithdrawalTransition, WriteOutcome};

use super::{AppError, BankDetailsStore, Clock, PlatformSettings};

/// Tutor payouts: request, admin approval or rejection, and settlement.
pub struct WithdrawalProcessor {
    repo: Arc<Repository>,
    bank_details: Arc<dyn BankDetailsStore>,
    platform: Arc<dyn PlatformSettings>,
    clock: Arc<dyn Clock>,
}

impl WithdrawalProcessor {
    pub fn new(
        repo: Arc<Repository>,
        bank_details: Arc<dyn BankDetailsStore>,
        platform: Arc<dyn PlatformSettings>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            bank_details,
            platform,
            clock,
        }
    }

    /// Released earnings minus approved withdrawals.
    pub async fn available_earnings(&self, tutor_id: UserId) -> Result<Cents, AppError> {
        let available = self
            .repo
            .sum_ledger_amounts(tutor_id, EarningStatus::Available)
            .await?;
        let deducted = self.repo.sum_deductions(tutor_id).await?;
        let balance = available - deducted;
        if balance < 0 {
            tracing::warn!(%tutor_id, available, deducted, "deductions exceed released earnings");
        }
        Ok(balance.max(0))
    }

    pub async fn create_withdrawal_request(
        &self,
        tutor_id: UserId,
        amount: Cents,
    ) -> Result<WithdrawalRequest, AppError> {
        if amount < 0 {
            return Err(AppError::InvalidAmount(format!(
                "withdrawal amount must not be negative: {}",
                amount
            )));
        }
        if self.repo.has_open_dispute_for_tutor(tutor_id).await? {
            return Err(AppError::OpenDisputeExists);
        }
        if self.repo.find_pending_withdrawal(tutor_id).await?.is_some() {
            return Err(AppError::PendingWithdrawalExists);
        }
        if !self.bank_details.has_bank_details(tutor_id).await? {
            return Err(AppError::NoBankDetails);
        }

        let available = self.available_earnings(tutor_id).await?;
        if amount > available {
            return Err(AppError::InsufficientFunds {
                available,
                requested: amount,
            });
        }
        let minimum = self.platform.min_withdrawal_amount().await?;
        if amount < minimum {
            return Err(AppError::BelowMinimumWithdrawal {
                requested: amount,
                minimum,
            });
        }

        let snapshot = self
            .bank_details
            .masked_bank_details(tutor_id)
            .await?
            .ok_or(AppError::NoBankDetails)?;

        let now = self.clock.now();
        let request = WithdrawalRequest::new(tutor_id, amount, snapshot, now);

        let mut tx = self.repo.begin().await?;
        if tx.insert_withdrawal(&request).await? != WriteOutcome::Applied {
            return Err(AppError::PendingWithdrawalExists);
        }
        let audit = AuditEntry::new(AuditAction::WithdrawalRequested, amount, Performer::System, now)?
            .with_tutor(tutor_id)
            .with_withdrawal(request.id)
            .with_metadata(json!({
                "account": request.bank_snapshot.masked_account_number,
                "available": available,
            }));
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(withdrawal_id = %request.id, %tutor_id, amount, "withdrawal requested");
        Ok(request)
    }

    /// Pending -> approved. Writes the deduction that takes the amount out of
    /// the tutor's available balance.
    pub async fn approve(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
    ) -> Result<WithdrawalRequest, AppError> {
        let now = self.clock.now();
        let performer = admin(admin_id)?;

        let mut tx = self.repo.begin().await?;
        let Some(request) = tx
            .transition_withdrawal(
                WithdrawalTransition {
                    id: withdrawal_id,
                    from: WithdrawalStatus::Pending,
                    to: WithdrawalStatus::Approved,
                    admin_id,
                    transaction_ref: None,
                    note: None,
                },
                now,
            )
            .await?
        else {
            drop(tx);
            return Err(self.transition_error(withdrawal_id, "pending").await);
        };

        tx.insert_deduction(&WithdrawalDeduction::for_request(&request, now))
            .await?;
        let audit = AuditEntry::new(AuditAction::WithdrawalApproved, request.amount, performer, now)?
            .with_tutor(request.tutor_id)
            .with_withdrawal(request.id);
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(%withdrawal_id, %admin_id, amount = request.amount, "withdrawal approved");
        Ok(request)
    }

    /// Pending -> rejected. Nothing was deducted, so the balance is untouched.
    pub async fn reject(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
        note: Option<&str>,
    ) -> Result<WithdrawalRequest, AppError> {
        let now = self.clock.now();
        let performer = admin(admin_id)?;

        let mut tx = self.repo.begin().await?;
        let Some(request) = tx
            .transition_withdrawal(
                WithdrawalTransition {
                    id: withdrawal_id,
                    from: WithdrawalStatus::Pending,
                    to: WithdrawalStatus::Rejected,
                    admin_id,
                    transaction_ref: None,
                    note,
                },
                now,
            )
            .await?
        else {
            drop(tx);
            return Err(self.transition_error(withdrawal_id, "pending").await);
        };

        let audit = AuditEntry::new(AuditAction::WithdrawalRejected, request.amount, performer, now)?
            .with_tutor(request.tutor_id)
            .with_withdrawal(request.id)
            .with_metadata(json!({ "note": note }));
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(%withdrawal_id, %admin_id, "withdrawal rejected");
        Ok(request)
    }

    /// Approved -> paid, once the bank transfer has gone out.
    pub async fn mark_paid(
        &self,
        withdrawal_id: WithdrawalId,
        admin_id: UserId,
        transaction_ref: Option<&str>,
    ) -> Result<WithdrawalRequest, AppError> {
        let now = self.clock.now();
        let performer = admin(admin_id)?;

        let mut tx = self.repo.begin().await?;
        let Some(request) = tx
            .transition_withdrawal(
                WithdrawalTransition {
                    id: withdrawal_id,
                    from: WithdrawalStatus::Approved,
                    to: WithdrawalStatus::Paid,
                    admin_id,
                    transaction_ref,
                    note: None,
                },
                now,
            )
            .await?
        else {
            drop(tx);
            return Err(self.transition_error(withdrawal_id, "approved").await);
        };

        let audit = AuditEntry::new(AuditAction::WithdrawalPaid, request.amount, performer, now)?
            .with_tutor(request.tutor_id)
            .with_withdrawal(request.id)
            .with_metadata(json!({ "transaction_ref": transaction_ref }));
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(%withdrawal_id, %admin_id, amount = request.amount, "withdrawal paid");
        Ok(request)
    }

    /// Explain why a conditional transition matched nothing.
    async fn transition_error(&self, withdrawal_id: WithdrawalId, expected: &'static str) -> AppError {
        match self.repo.get_withdrawal(withdrawal_id).await {
            Ok(Some(current)) => AppError::InvalidWithdrawalState {
                id: withdrawal_id.to_string(),
                actual: current.status.to_string(),
                expected,
            },
            Ok(None) => AppError::WithdrawalNotFound(withdrawal_id.to_string()),
            Err(err) => AppError::Database(err),
        }
    }

    // ========================
    // Queries
    // ========================

    pub async fn get(&self, withdrawal_id: WithdrawalId) -> Result<WithdrawalRequest, AppError> {
        self.repo
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| AppError::WithdrawalNotFound(withdrawal_id.to_string()))
    }

    pub async fn list(
        &self,
        tutor_id: Option<UserId>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<WithdrawalRequest>, AppError> {
        Ok(self.repo.list_withdrawals(tutor_id, status).await?)
    }
}

fn admin(admin_id: UserId) -> Result<Performer, AppError> {
    if admin_id.is_nil() {
        return Err(AuditError::MissingActor.into());
    }
    Ok(Performer::Admin(admin_id))
}
