use std::sync::Arc;

use serde_json::json;

use crate::config::Policy;
use crate::domain::{
    AuditAction, AuditEntry, AuditError, Booking, BookingId, BookingStatus, Cents, EarningStatus,
    LedgerEntry, OrphanCapture, OrphanReason, Performer, PricingRequestId, SessionSlot, UserId,
};
use crate::storage::{Repository, WriteOutcome};

use super::wallet::WalletLedger;
use super::{
    AppError, AvailabilityService, Clock, GatewayOrder, Notification, NotificationSink,
    PaymentGateway, PlatformSettings,
};

/// What a payment confirmation did to the booking and its escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The booking moved to paid by this call
    Settled { entry_created: bool },
    /// The booking was already paid or completed
    Redelivered { entry_created: bool },
    /// The booking can no longer take a payment
    Ignored(BookingStatus),
    /// The booking could not take the payment; it was refunded in full
    Refunded(OrphanReason),
}

enum Settlement {
    Written { entry_created: bool },
    /// The booking was no longer pending or failed
    Moved,
    /// A failed booking's slot is held by another booking
    SlotTaken,
}

impl PaymentOutcome {
    pub fn entry_created(&self) -> bool {
        matches!(
            self,
            PaymentOutcome::Settled { entry_created: true }
                | PaymentOutcome::Redelivered { entry_created: true }
        )
    }
}

/// Booking lifecycle from slot reservation to payment and rescheduling.
pub struct BookingService {
    repo: Arc<Repository>,
    gateway: Arc<dyn PaymentGateway>,
    availability: Arc<dyn AvailabilityService>,
    platform: Arc<dyn PlatformSettings>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    currency: String,
}

impl BookingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        gateway: Arc<dyn PaymentGateway>,
        availability: Arc<dyn AvailabilityService>,
        platform: Arc<dyn PlatformSettings>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        policy: Policy,
        currency: String,
    ) -> Self {
        Self {
            repo,
            gateway,
            availability,
            platform,
            notifier,
            clock,
            policy,
            currency,
        }
    }

    // ========================
    // Creation and payment
    // ========================

    /// Reserve a tutor slot for a learner. The booking starts out pending
    /// and holds the slot until it is cancelled or fails.
    pub async fn create_booking_for_slot(
        &self,
        learner_id: UserId,
        tutor_id: UserId,
        slot: SessionSlot,
        pricing_request_id: Option<PricingRequestId>,
    ) -> Result<Booking, AppError> {
        let tutor = self
            .repo
            .get_tutor(tutor_id)
            .await?
            .ok_or_else(|| AppError::TutorNotFound(tutor_id.to_string()))?;

        if slot.starts_at() <= self.clock.now() {
            return Err(AppError::SessionInPast);
        }

        let agreed_rate = match pricing_request_id {
            Some(request_id) => {
                self.check_pricing_request(request_id, learner_id, tutor_id)
                    .await?
            }
            None => tutor.hourly_rate,
        };

        if !self
            .availability
            .is_slot_within_availability(tutor_id, &slot)
            .await?
        {
            return Err(AppError::SlotUnavailable);
        }

        if self
            .repo
            .find_active_booking_for_slot(tutor_id, &slot)
            .await?
            .is_some()
        {
            return Err(AppError::SlotAlreadyBooked);
        }

        let mut booking = Booking::new(learner_id, tutor_id, slot, agreed_rate);
        if let Some(request_id) = pricing_request_id {
            booking = booking.with_pricing_request(request_id);
        }
        if booking.amount_due().is_none() {
            return Err(AppError::InvalidAmount(format!(
                "session at {} per hour for {} minutes has no positive price",
                agreed_rate,
                booking.slot.duration_minutes()
            )));
        }

        match self.repo.insert_booking(&booking).await? {
            WriteOutcome::Applied => {}
            WriteOutcome::Duplicate | WriteOutcome::Unchanged => {
                return Err(AppError::SlotAlreadyBooked);
            }
        }

        tracing::info!(booking_id = %booking.id, %tutor_id, slot = %booking.slot, "booking created");
        Ok(booking)
    }

    /// Validate a negotiated request and return its hourly budget.
    async fn check_pricing_request(
        &self,
        request_id: PricingRequestId,
        learner_id: UserId,
        tutor_id: UserId,
    ) -> Result<Cents, AppError> {
        let request = self
            .repo
            .get_pricing_request(request_id)
            .await?
            .ok_or_else(|| AppError::PricingRequestNotFound(request_id.to_string()))?;

        if request.learner_id != learner_id {
            return Err(AppError::NotRequestOwner(request_id.to_string()));
        }
        if !request.is_active() {
            return Err(AppError::PricingRequestUnusable(
                request_id.to_string(),
                "request is closed",
            ));
        }
        if !self.repo.has_pricing_interest(request_id, tutor_id).await? {
            return Err(AppError::PricingRequestUnusable(
                request_id.to_string(),
                "tutor has not expressed interest",
            ));
        }
        Ok(request.budget)
    }

    /// Create a gateway order for a pending booking and remember its reference.
    pub async fn create_payment_order_for_booking(
        &self,
        booking_id: BookingId,
        learner_id: UserId,
    ) -> Result<GatewayOrder, AppError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.learner_id != learner_id {
            return Err(AppError::NotBookingOwner(booking_id.to_string()));
        }
        if booking.status != BookingStatus::Pending {
            return Err(AppError::InvalidBookingState {
                actual: booking.status,
                expected: "pending",
            });
        }
        let amount = booking.amount_due().ok_or_else(|| {
            AppError::InvalidAmount(format!("booking {} has no positive amount", booking_id))
        })?;

        let order = self
            .gateway
            .create_order(amount, &self.currency, &booking_id.to_string())
            .await
            .map_err(AppError::Gateway)?;

        if !self.repo.set_order_ref(booking_id, &order.order_ref).await? {
            tracing::warn!(%booking_id, order_ref = %order.order_ref, "booking left pending before order was stored");
            return Err(AppError::ConcurrentModification);
        }

        tracing::info!(%booking_id, order_ref = %order.order_ref, amount, "payment order created");
        Ok(order)
    }

    /// Record a captured payment. Safe to call any number of times for the
    /// same booking: at most one ledger entry and one EARNINGS_CREATED are
    /// ever written. A capture the booking can no longer take is recorded
    /// and refunded in full.
    pub async fn handle_booking_paid(
        &self,
        booking: &Booking,
        payment_ref: Option<&str>,
    ) -> Result<PaymentOutcome, AppError> {
        match booking.status {
            BookingStatus::Cancelled => {
                return self
                    .refund_orphan_capture(booking, payment_ref, OrphanReason::BookingCancelled)
                    .await;
            }
            BookingStatus::NoShow => {
                tracing::warn!(
                    booking_id = %booking.id,
                    payment_ref = ?payment_ref,
                    "payment captured for a no-show booking"
                );
                return Ok(PaymentOutcome::Ignored(booking.status));
            }
            BookingStatus::Paid | BookingStatus::Completed => {
                return match self.settle(booking, None, false).await? {
                    Settlement::Written { entry_created } => {
                        Ok(PaymentOutcome::Redelivered { entry_created })
                    }
                    Settlement::Moved | Settlement::SlotTaken => {
                        Err(AppError::ConcurrentModification)
                    }
                };
            }
            BookingStatus::Pending | BookingStatus::Failed => {}
        }

        match self.settle(booking, payment_ref, true).await? {
            Settlement::Written { entry_created } => {
                tracing::info!(booking_id = %booking.id, entry_created, "booking paid");
                return Ok(PaymentOutcome::Settled { entry_created });
            }
            Settlement::SlotTaken => {
                return self
                    .refund_orphan_capture(booking, payment_ref, OrphanReason::SlotRebooked)
                    .await;
            }
            Settlement::Moved => {}
        }

        // Lost the race for the status change; look at where the booking went.
        let current = self.get_booking(booking.id).await?;
        if current.status.is_settled() {
            match self.settle(&current, None, false).await? {
                Settlement::Written { entry_created } => {
                    Ok(PaymentOutcome::Redelivered { entry_created })
                }
                Settlement::Moved | Settlement::SlotTaken => Err(AppError::ConcurrentModification),
            }
        } else if current.status == BookingStatus::Cancelled {
            self.refund_orphan_capture(&current, payment_ref, OrphanReason::BookingCancelled)
                .await
        } else {
            tracing::warn!(booking_id = %booking.id, status = %current.status, "payment ignored after concurrent change");
            Ok(PaymentOutcome::Ignored(current.status))
        }
    }

    /// One transaction: optional status change, insert-if-absent of the
    /// escrow entry, its EARNINGS_CREATED line and closing the pricing request.
    async fn settle(
        &self,
        booking: &Booking,
        payment_ref: Option<&str>,
        mark_paid: bool,
    ) -> Result<Settlement, AppError> {
        let amount = booking.amount_due().ok_or_else(|| {
            AppError::InvalidAmount(format!("booking {} has no positive amount", booking.id))
        })?;
        let commission_rate = self.platform.commission_rate().await?;
        let entry = LedgerEntry::pending(booking.id, booking.tutor_id, amount, commission_rate)
            .ok_or_else(|| {
                AppError::InvalidAmount(format!("commission rate out of range: {}", commission_rate))
            })?;
        let now = self.clock.now();

        let mut tx = self.repo.begin().await?;
        if mark_paid {
            match tx.mark_booking_paid(booking.id, payment_ref, now).await? {
                WriteOutcome::Applied => {}
                WriteOutcome::Unchanged => return Ok(Settlement::Moved),
                WriteOutcome::Duplicate => return Ok(Settlement::SlotTaken),
            }
        }

        let created = tx.insert_ledger_entry_if_absent(&entry).await?;
        if created {
            let audit = AuditEntry::new(AuditAction::EarningsCreated, amount, Performer::System, now)?
                .with_tutor(booking.tutor_id)
                .with_booking(booking.id)
                .with_metadata(json!({
                    "commission_rate": entry.commission_rate,
                    "commission_amount": entry.commission_amount,
                    "payment_ref": payment_ref.or(booking.payment_ref.as_deref()),
                }));
            tx.append_audit(&audit).await?;
        }

        if let Some(request_id) = booking.pricing_request_id {
            tx.close_pricing_request(request_id, now).await?;
        }
        tx.commit().await?;

        Ok(Settlement::Written {
            entry_created: created,
        })
    }

    /// Record a capture the booking cannot take, then hand the money back.
    /// The record is claimed before the gateway call, so a redelivered
    /// capture never refunds twice. A refund that fails at the gateway stays
    /// listed as unrefunded for an operator to settle.
    async fn refund_orphan_capture(
        &self,
        booking: &Booking,
        payment_ref: Option<&str>,
        reason: OrphanReason,
    ) -> Result<PaymentOutcome, AppError> {
        let Some(payment_ref) = payment_ref else {
            tracing::error!(booking_id = %booking.id, %reason, "captured payment has no reference to refund");
            return Ok(PaymentOutcome::Ignored(booking.status));
        };

        let now = self.clock.now();
        let capture = OrphanCapture::new(booking, payment_ref, reason, now);
        if !self.repo.insert_orphan_capture(&capture).await? {
            tracing::debug!(booking_id = %booking.id, payment_ref, "orphan capture already recorded");
            return Ok(PaymentOutcome::Ignored(booking.status));
        }
        tracing::warn!(
            booking_id = %booking.id,
            status = %booking.status,
            payment_ref,
            %reason,
            "payment captured for a booking that cannot take it, refunding"
        );

        let refund = self
            .gateway
            .create_refund(payment_ref, None)
            .await
            .map_err(AppError::Gateway)?;

        let audit = AuditEntry::new(AuditAction::RefundFull, capture.amount, Performer::System, now)?
            .with_booking(booking.id)
            .with_metadata(json!({
                "payment_ref": payment_ref,
                "refund_ref": refund.refund_ref,
                "reason": reason.as_str(),
            }));
        let mut tx = self.repo.begin().await?;
        tx.mark_orphan_refunded(payment_ref, &refund.refund_ref, now)
            .await?;
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(booking_id = %booking.id, refund_ref = %refund.refund_ref, "orphan capture refunded");
        Ok(PaymentOutcome::Refunded(reason))
    }

    /// Captured payments that no booking could take, oldest first.
    pub async fn orphan_captures(&self, unrefunded_only: bool) -> Result<Vec<OrphanCapture>, AppError> {
        Ok(self.repo.list_orphan_captures(unrefunded_only).await?)
    }

    /// Record a failed payment attempt. Only a pending booking is affected.
    pub async fn handle_booking_failed(
        &self,
        booking: &Booking,
        payment_ref: Option<&str>,
    ) -> Result<bool, AppError> {
        let failed = self.repo.mark_booking_failed(booking.id, payment_ref).await?;
        if failed {
            tracing::info!(booking_id = %booking.id, "booking payment failed");
        } else {
            tracing::debug!(booking_id = %booking.id, status = %booking.status, "payment failure ignored");
        }
        Ok(failed)
    }

    // ========================
    // Changes after creation
    // ========================

    /// Cancel a booking that has not been paid. Frees the slot.
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        learner_id: UserId,
    ) -> Result<Booking, AppError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.learner_id != learner_id {
            return Err(AppError::NotBookingOwner(booking_id.to_string()));
        }
        if !self.repo.cancel_pending_booking(booking_id).await? {
            let current = self.get_booking(booking_id).await?;
            return Err(AppError::InvalidBookingState {
                actual: current.status,
                expected: "pending",
            });
        }

        tracing::info!(%booking_id, "booking cancelled");
        self.get_booking(booking_id).await
    }

    /// Move a paid session to a new slot. Must be requested more than the
    /// reschedule window ahead of the current start.
    pub async fn reschedule(
        &self,
        booking_id: BookingId,
        learner_id: UserId,
        new_slot: SessionSlot,
    ) -> Result<Booking, AppError> {
        let booking = self.get_booking(booking_id).await?;
        if booking.learner_id != learner_id {
            return Err(AppError::NotBookingOwner(booking_id.to_string()));
        }
        if booking.status != BookingStatus::Paid {
            return Err(AppError::InvalidBookingState {
                actual: booking.status,
                expected: "paid",
            });
        }
        if self.repo.has_open_dispute_for_booking(booking_id).await? {
            return Err(AppError::OpenDisputeExists);
        }

        let now = self.clock.now();
        if booking.slot.starts_at() - now <= self.policy.reschedule_window() {
            return Err(AppError::WindowExpired(
                "rescheduling is closed this close to the session",
            ));
        }
        if new_slot.starts_at() <= now {
            return Err(AppError::SessionInPast);
        }
        if new_slot.duration_minutes() != booking.slot.duration_minutes() {
            return Err(AppError::InvalidAmount(format!(
                "new slot must keep the paid duration of {} minutes",
                booking.slot.duration_minutes()
            )));
        }

        if !self
            .availability
            .is_slot_within_availability(booking.tutor_id, &new_slot)
            .await?
        {
            return Err(AppError::SlotUnavailable);
        }

        let same_day = self
            .repo
            .list_active_bookings_for_tutor_on(booking.tutor_id, new_slot.date)
            .await?;
        if same_day
            .iter()
            .any(|other| other.id != booking_id && other.slot.overlaps(&new_slot))
        {
            return Err(AppError::SlotOverlaps);
        }

        match self
            .repo
            .reschedule_booking(booking_id, &booking.slot, &new_slot)
            .await?
        {
            WriteOutcome::Applied => {}
            WriteOutcome::Duplicate => return Err(AppError::SlotAlreadyBooked),
            WriteOutcome::Unchanged => return Err(AppError::ConcurrentModification),
        }

        tracing::info!(%booking_id, from = %booking.slot, to = %new_slot, "booking rescheduled");
        self.notifier.emit(Notification::BookingRescheduled {
            booking_id,
            learner_id: booking.learner_id,
            tutor_id: booking.tutor_id,
            previous: booking.slot,
            current: new_slot,
        });

        self.get_booking(booking_id).await
    }

    /// Admin marks a paid session as a tutor no-show: the learner is refunded
    /// in full and the escrow entry becomes refunded.
    pub async fn mark_no_show(
        &self,
        booking_id: BookingId,
        admin_id: UserId,
    ) -> Result<Booking, AppError> {
        if admin_id.is_nil() {
            return Err(AuditError::MissingActor.into());
        }
        let performer = Performer::Admin(admin_id);
        let booking = self.get_booking(booking_id).await?;
        if booking.status != BookingStatus::Paid {
            return Err(AppError::InvalidBookingState {
                actual: booking.status,
                expected: "paid",
            });
        }
        if self.repo.has_open_dispute_for_booking(booking_id).await? {
            return Err(AppError::OpenDisputeExists);
        }
        let entry = self
            .repo
            .get_ledger_entry(booking_id)
            .await?
            .ok_or_else(|| AppError::LedgerEntryNotFound(booking_id.to_string()))?;
        if entry.status != EarningStatus::PendingRelease {
            return Err(AppError::EscrowNotPending(booking_id.to_string()));
        }
        let payment_ref = booking
            .payment_ref
            .as_deref()
            .ok_or_else(|| AppError::MissingPaymentReference(booking_id.to_string()))?;

        let refund = self
            .gateway
            .create_refund(payment_ref, None)
            .await
            .map_err(AppError::Gateway)?;

        let now = self.clock.now();
        let mut tx = self.repo.begin().await?;
        if !tx.mark_booking_no_show(booking_id, now).await? {
            tracing::error!(%booking_id, refund_ref = %refund.refund_ref, "refund issued but booking changed before no-show was recorded");
            return Err(AppError::ConcurrentModification);
        }
        if WalletLedger::refund_in(&mut tx, booking_id, now).await?.is_none() {
            tracing::error!(%booking_id, refund_ref = %refund.refund_ref, "refund issued but escrow was no longer pending");
            return Err(AppError::EscrowNotPending(booking_id.to_string()));
        }
        let audit = AuditEntry::new(AuditAction::RefundFull, entry.amount, performer, now)?
            .with_tutor(booking.tutor_id)
            .with_booking(booking_id)
            .with_metadata(json!({
                "reason": "tutor_no_show",
                "refund_ref": refund.refund_ref,
                "payment_ref": payment_ref,
            }));
        tx.append_audit(&audit).await?;
        tx.commit().await?;

        tracing::info!(%booking_id, %admin_id, amount = entry.amount, "booking marked as no-show and refunded");
        self.get_booking(booking_id).await
    }

    // ========================
    // Queries
    // ========================

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, AppError> {
        self.repo
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::BookingNotFound(booking_id.to_string()))
    }

    pub async fn find_by_order_ref(&self, order_ref: &str) -> Result<Option<Booking>, AppError> {
        Ok(self.repo.find_booking_by_order_ref(order_ref).await?)
    }
}
