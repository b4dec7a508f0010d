use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::Policy;
use crate::domain::{
    AuditAction, AuditEntry, AuditError, BookingId, BookingStatus, Cents, Dispute,
    DisputeAuditAction, DisputeAuditEntry, DisputeId, DisputeStatus, EarningStatus, Party,
    Performer, Resolution, UserId, partial_refund_split, within_dispute_window,
};
use crate::storage::{Repository, Tx, WriteOutcome};

use super::wallet::{WalletLedger, released_audit};
use super::{AppError, Clock, PaymentGateway};

/// Learner disputes over completed sessions, from opening to admin resolution.
pub struct DisputeService {
    repo: Arc<Repository>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    policy: Policy,
}

impl DisputeService {
    pub fn new(
        repo: Arc<Repository>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        policy: Policy,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
            policy,
        }
    }

    /// Open a dispute on a completed booking. Freezes its escrow until resolved.
    pub async fn initiate_dispute(
        &self,
        booking_id: BookingId,
        learner_id: UserId,
        reason: Option<String>,
    ) -> Result<Dispute, AppError> {
        let booking = self
            .repo
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))?;

        if booking.learner_id != learner_id {
            return Err(AppError::NotBookingOwner(booking_id.to_string()));
        }
        if booking.status != BookingStatus::Completed {
            return Err(AppError::InvalidBookingState {
                actual: booking.status,
                expected: "completed",
            });
        }

        let now = self.clock.now();
        if !within_dispute_window(booking.slot.ends_at(), now, self.policy.dispute_window()) {
            return Err(AppError::WindowExpired(
                "disputes must be opened within the dispute window after the session",
            ));
        }

        if self.repo.get_dispute_for_booking(booking_id).await?.is_some() {
            return Err(AppError::DisputeAlreadyExists(booking_id.to_string()));
        }
        let entry = self
            .repo
            .get_ledger_entry(booking_id)
            .await?
            .ok_or_else(|| AppError::LedgerEntryNotFound(booking_id.to_string()))?;
        if entry.status != EarningStatus::PendingRelease {
            return Err(AppError::EscrowNotPending(booking_id.to_string()));
        }

        let mut dispute = Dispute::open(booking_id, learner_id, booking.tutor_id, now);
        if let Some(reason) = reason {
            dispute = dispute.with_reason(reason);
        }

        let mut tx = self.repo.begin().await?;
        match tx.insert_dispute(&dispute).await? {
            WriteOutcome::Applied => {}
            WriteOutcome::Duplicate => {
                return Err(AppError::DisputeAlreadyExists(booking_id.to_string()));
            }
            // Released or refunded by the sweep since the read above
            WriteOutcome::Unchanged => {
                return Err(AppError::EscrowNotPending(booking_id.to_string()));
            }
        }
        tx.append_dispute_audit(&DisputeAuditEntry::new(
            dispute.id,
            DisputeAuditAction::DisputeCreated,
            learner_id,
            json!({ "booking_id": booking_id, "reason": dispute.reason }),
            now,
        ))
        .await?;
        tx.commit().await?;

        tracing::info!(dispute_id = %dispute.id, %booking_id, "dispute opened");
        Ok(dispute)
    }

    /// Store a party's evidence. Each side may only write its own field.
    pub async fn submit_evidence(
        &self,
        dispute_id: DisputeId,
        actor_id: UserId,
        party: Party,
        evidence: &str,
    ) -> Result<Dispute, AppError> {
        let dispute = self.get(dispute_id).await?;
        if dispute.party_of(actor_id) != Some(party) {
            return Err(AppError::NotDisputeParty(dispute_id.to_string()));
        }
        if !dispute.is_open() {
            return Err(AppError::DisputeAlreadyResolved(dispute_id.to_string()));
        }

        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        if !tx.set_dispute_evidence(dispute_id, party, evidence, now).await? {
            return Err(AppError::DisputeAlreadyResolved(dispute_id.to_string()));
        }
        tx.append_dispute_audit(&DisputeAuditEntry::new(
            dispute_id,
            DisputeAuditAction::EvidenceSubmitted,
            actor_id,
            json!({ "party": party.as_str(), "length": evidence.len() }),
            now,
        ))
        .await?;
        tx.commit().await?;

        tracing::info!(%dispute_id, party = party.as_str(), "dispute evidence submitted");
        self.get(dispute_id).await
    }

    /// Settle an open dispute. Any refund is issued at the gateway first;
    /// the dispute, escrow and audit rows then change in one transaction.
    pub async fn resolve_dispute(
        &self,
        dispute_id: DisputeId,
        admin_id: UserId,
        resolution: Resolution,
    ) -> Result<Dispute, AppError> {
        if admin_id.is_nil() {
            return Err(AuditError::MissingActor.into());
        }
        let dispute = self.get(dispute_id).await?;
        if !dispute.is_open() {
            return Err(AppError::DisputeAlreadyResolved(dispute_id.to_string()));
        }
        let booking = self
            .repo
            .get_booking(dispute.booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(dispute.booking_id.to_string()))?;
        let entry = self
            .repo
            .get_ledger_entry(dispute.booking_id)
            .await?
            .ok_or_else(|| AppError::LedgerEntryNotFound(dispute.booking_id.to_string()))?;
        if entry.status != EarningStatus::PendingRelease {
            return Err(AppError::EscrowNotPending(dispute.booking_id.to_string()));
        }

        // Validate before money leaves through the gateway.
        let net_amount = match resolution {
            Resolution::PartialRefund { refund_amount } => {
                partial_refund_split(refund_amount, entry.amount).ok_or_else(|| {
                    AppError::InvalidAmount(format!(
                        "partial refund must be greater than 0 and less than {}, got {}",
                        entry.amount, refund_amount
                    ))
                })?
            }
            _ => entry.amount,
        };

        let refund = match resolution {
            Resolution::ReleasePaymentToTutor => None,
            Resolution::FullRefund | Resolution::PartialRefund { .. } => {
                let payment_ref = booking.payment_ref.as_deref().ok_or_else(|| {
                    AppError::MissingPaymentReference(dispute.booking_id.to_string())
                })?;
                Some(
                    self.gateway
                        .create_refund(payment_ref, resolution.refund_amount())
                        .await
                        .map_err(AppError::Gateway)?,
                )
            }
        };
        let refund_ref = refund.as_ref().map(|r| r.refund_ref.clone());

        let now = self.clock.now();
        let performer = Performer::Admin(admin_id);
        let mut tx = self.repo.begin().await?;

        if !tx
            .resolve_dispute(
                dispute_id,
                resolution.outcome(),
                resolution.refund_amount(),
                admin_id,
                now,
            )
            .await?
        {
            if let Some(ref_id) = &refund_ref {
                tracing::error!(%dispute_id, refund_ref = %ref_id, "refund issued for a dispute resolved concurrently");
            }
            return Err(AppError::DisputeAlreadyResolved(dispute_id.to_string()));
        }

        let base_audit = |action: AuditAction, amount: Cents| -> Result<AuditEntry, AppError> {
            Ok(AuditEntry::new(action, amount, performer, now)?
                .with_tutor(entry.tutor_id)
                .with_booking(entry.booking_id)
                .with_metadata(json!({
                    "dispute_id": dispute_id,
                    "refund_ref": refund_ref,
                })))
        };

        match resolution {
            Resolution::FullRefund => {
                require_transition(
                    WalletLedger::refund_in(&mut tx, entry.booking_id, now).await?,
                    &refund_ref,
                )?;
                tx.append_audit(&base_audit(AuditAction::RefundFull, entry.amount)?)
                    .await?;
            }
            Resolution::PartialRefund { refund_amount } => {
                let released = require_transition(
                    WalletLedger::release_partial_in(&mut tx, entry.booking_id, net_amount, now)
                        .await?,
                    &refund_ref,
                )?;
                tx.append_audit(&base_audit(AuditAction::RefundPartial, refund_amount)?)
                    .await?;
                tx.append_audit(&released_audit(&released, performer, now)?)
                    .await?;
            }
            Resolution::ReleasePaymentToTutor => {
                let released = require_transition(
                    WalletLedger::release_in(&mut tx, entry.booking_id, false, now).await?,
                    &refund_ref,
                )?;
                tx.append_audit(&released_audit(&released, performer, now)?)
                    .await?;
                tx.complete_booking(entry.booking_id, now).await?;
            }
        }

        Self::append_resolution_trail(&mut tx, dispute_id, admin_id, &resolution, &refund_ref, now)
            .await?;
        tx.commit().await?;

        tracing::info!(
            %dispute_id,
            booking_id = %entry.booking_id,
            outcome = %resolution.outcome(),
            refund_amount = ?resolution.refund_amount(),
            "dispute resolved"
        );
        self.get(dispute_id).await
    }

    async fn append_resolution_trail(
        tx: &mut Tx,
        dispute_id: DisputeId,
        admin_id: UserId,
        resolution: &Resolution,
        refund_ref: &Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        tx.append_dispute_audit(&DisputeAuditEntry::new(
            dispute_id,
            DisputeAuditAction::DisputeResolved,
            admin_id,
            json!({
                "outcome": resolution.outcome().as_str(),
                "refund_amount": resolution.refund_amount(),
                "refund_ref": refund_ref,
            }),
            now,
        ))
        .await?;
        Ok(())
    }

    // ========================
    // Queries
    // ========================

    pub async fn get(&self, dispute_id: DisputeId) -> Result<Dispute, AppError> {
        self.repo
            .get_dispute(dispute_id)
            .await?
            .ok_or_else(|| AppError::DisputeNotFound(dispute_id.to_string()))
    }

    pub async fn list_open(&self) -> Result<Vec<Dispute>, AppError> {
        Ok(self.repo.list_disputes(Some(DisputeStatus::Open)).await?)
    }

    pub async fn list_all(&self) -> Result<Vec<Dispute>, AppError> {
        Ok(self.repo.list_disputes(None).await?)
    }

    pub async fn audit_trail(&self, dispute_id: DisputeId) -> Result<Vec<DisputeAuditEntry>, AppError> {
        Ok(self.repo.list_dispute_audit(dispute_id).await?)
    }
}

/// The escrow entry was checked as pending before the gateway call; a failed
/// transition here means something moved it in between.
fn require_transition<T>(moved: Option<T>, refund_ref: &Option<String>) -> Result<T, AppError> {
    moved.ok_or_else(|| {
        tracing::error!(refund_ref = ?refund_ref, "escrow left pending release during dispute resolution");
        AppError::ConcurrentModification
    })
}
