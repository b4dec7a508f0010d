use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BasisPoints, BookingId, Cents, UserId, apply_basis_points};

pub type LedgerEntryId = Uuid;

/// Escrow state of one booking's payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningStatus {
    /// Held until the session matures or a dispute is resolved
    PendingRelease,
    /// Counted towards the tutor's withdrawable balance
    Available,
    /// Returned to the learner. Terminal.
    Refunded,
}

impl EarningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningStatus::PendingRelease => "pending_release",
            EarningStatus::Available => "available",
            EarningStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending_release" => Some(EarningStatus::PendingRelease),
            "available" => Some(EarningStatus::Available),
            "refunded" => Some(EarningStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for EarningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row per paid booking. Never deleted; the amount is rewritten at most
/// once, when a partial refund settles a dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub booking_id: BookingId,
    pub tutor_id: UserId,
    /// Gross session amount in minor units
    pub amount: Cents,
    pub status: EarningStatus,
    /// Platform commission rate at the moment of payment
    pub commission_rate: BasisPoints,
    /// Commission on the original amount, frozen at creation
    pub commission_amount: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build a pending entry for a paid booking, snapshotting the commission.
    /// Returns `None` if the amount is negative or the rate is out of range.
    pub fn pending(
        booking_id: BookingId,
        tutor_id: UserId,
        amount: Cents,
        commission_rate: BasisPoints,
    ) -> Option<Self> {
        let commission_amount = apply_basis_points(amount, commission_rate)?;
        let now = Utc::now();
        Some(Self {
            id: Uuid::new_v4(),
            booking_id,
            tutor_id,
            amount,
            status: EarningStatus::PendingRelease,
            commission_rate,
            commission_amount,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Per-tutor view of escrow and withdrawable funds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub pending: Cents,
    pub available: Cents,
    pub refunded: Cents,
    /// Total of approved withdrawal deductions
    pub withdrawn: Cents,
}

impl EarningsSummary {
    /// Aggregate ledger entries and the tutor's total deductions.
    pub fn from_entries(entries: &[LedgerEntry], withdrawn: Cents) -> Self {
        entries.iter().fold(
            Self {
                withdrawn,
                ..Self::default()
            },
            |mut acc, entry| {
                match entry.status {
                    EarningStatus::PendingRelease => acc.pending += entry.amount,
                    EarningStatus::Available => acc.available += entry.amount,
                    EarningStatus::Refunded => acc.refunded += entry.amount,
                }
                acc
            },
        )
    }

    /// Available earnings minus approved withdrawals, never below zero.
    pub fn withdrawable(&self) -> Cents {
        (self.available - self.withdrawn).max(0)
    }
}
