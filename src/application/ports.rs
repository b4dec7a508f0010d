//! Collaborators the engine depends on but does not own.
//!
//! Production code wires real implementations; the repository provides the
//! SQLite-backed `PlatformSettings` and `BankDetailsStore`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{BankSnapshot, BasisPoints, BookingId, Cents, SessionSlot, UserId};

/// An order created at the payment gateway for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub order_ref: String,
    pub amount: Cents,
    pub currency: String,
}

/// A refund accepted by the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRecord {
    pub refund_ref: String,
    pub payment_ref: String,
    /// `None` for a full refund
    pub amount: Option<Cents>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: Cents, currency: &str, receipt: &str) -> Result<GatewayOrder>;

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;

    /// Refund a captured payment, fully when `amount` is `None`.
    async fn create_refund(&self, payment_ref: &str, amount: Option<Cents>) -> Result<RefundRecord>;
}

#[async_trait]
pub trait AvailabilityService: Send + Sync {
    async fn is_slot_within_availability(&self, tutor_id: UserId, slot: &SessionSlot) -> Result<bool>;
}

#[async_trait]
pub trait BankDetailsStore: Send + Sync {
    async fn masked_bank_details(&self, tutor_id: UserId) -> Result<Option<BankSnapshot>>;

    async fn has_bank_details(&self, tutor_id: UserId) -> Result<bool>;
}

/// Platform money settings, read at the point of use.
#[async_trait]
pub trait PlatformSettings: Send + Sync {
    async fn commission_rate(&self) -> Result<BasisPoints>;

    async fn min_withdrawal_amount(&self) -> Result<Cents>;
}

/// Gateway for operator tooling that runs without gateway credentials.
/// Every call fails and no webhook signature verifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_order(&self, _amount: Cents, _currency: &str, receipt: &str) -> Result<GatewayOrder> {
        anyhow::bail!("No payment gateway configured; cannot create order for {}", receipt)
    }

    fn verify_webhook_signature(&self, _raw_body: &[u8], _signature: &str) -> bool {
        false
    }

    async fn create_refund(&self, payment_ref: &str, _amount: Option<Cents>) -> Result<RefundRecord> {
        anyhow::bail!("No payment gateway configured; cannot refund {}", payment_ref)
    }
}

/// Availability for tooling that never books: every slot is closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAvailability;

#[async_trait]
impl AvailabilityService for NoAvailability {
    async fn is_slot_within_availability(&self, _tutor_id: UserId, _slot: &SessionSlot) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    BookingRescheduled {
        booking_id: BookingId,
        learner_id: UserId,
        tutor_id: UserId,
        previous: SessionSlot,
        current: SessionSlot,
    },
}

/// Fire-and-forget delivery; failures stay inside the sink.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: Notification);
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn emit(&self, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(payload) => tracing::info!(%payload, "notification"),
            Err(err) => tracing::warn!(error = %err, "failed to encode notification"),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
