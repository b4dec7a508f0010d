use thiserror::Error;

use crate::domain::{AuditError, BookingStatus, Cents, SlotError};

/// Coarse classification of an error, used by boundary layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Booking not found: {0}")]
    BookingNotFound(String),

    #[error("Tutor not found: {0}")]
    TutorNotFound(String),

    #[error("Pricing request not found: {0}")]
    PricingRequestNotFound(String),

    #[error("Dispute not found: {0}")]
    DisputeNotFound(String),

    #[error("Withdrawal request not found: {0}")]
    WithdrawalNotFound(String),

    #[error("Ledger entry not found for booking {0}")]
    LedgerEntryNotFound(String),

    #[error("Booking {0} does not belong to this learner")]
    NotBookingOwner(String),

    #[error("Not a party to dispute {0}")]
    NotDisputeParty(String),

    #[error("Pricing request {0} belongs to another learner")]
    NotRequestOwner(String),

    #[error("Pricing request {0} cannot be used for this booking: {1}")]
    PricingRequestUnusable(String, &'static str),

    #[error("Booking is {actual}, expected {expected}")]
    InvalidBookingState {
        actual: BookingStatus,
        expected: &'static str,
    },

    #[error("Invalid session time: {0}")]
    InvalidTimeRange(#[from] SlotError),

    #[error("Session time must be in the future")]
    SessionInPast,

    #[error("Window expired: {0}")]
    WindowExpired(&'static str),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Escrow for booking {0} is not pending release")]
    EscrowNotPending(String),

    #[error("Slot is already booked")]
    SlotAlreadyBooked,

    #[error("Slot is outside the tutor's availability")]
    SlotUnavailable,

    #[error("Slot overlaps another booking of this tutor")]
    SlotOverlaps,

    #[error("Booking changed concurrently, retry")]
    ConcurrentModification,

    #[error("A dispute already exists for booking {0}")]
    DisputeAlreadyExists(String),

    #[error("Dispute {0} is already resolved")]
    DisputeAlreadyResolved(String),

    #[error("An open dispute blocks this operation")]
    OpenDisputeExists,

    #[error("Booking {0} has no stored payment reference")]
    MissingPaymentReference(String),

    #[error("A pending withdrawal request already exists")]
    PendingWithdrawalExists,

    #[error("Withdrawal request {id} is {actual}, expected {expected}")]
    InvalidWithdrawalState {
        id: String,
        actual: String,
        expected: &'static str,
    },

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Cents, requested: Cents },

    #[error("Amount {requested} is below the minimum withdrawal of {minimum}")]
    BelowMinimumWithdrawal { requested: Cents, minimum: Cents },

    #[error("No bank details on file")]
    NoBankDetails,

    #[error("Audit entry rejected: {0}")]
    Audit(#[from] AuditError),

    #[error("Payment gateway error: {0}")]
    Gateway(anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        use AppError::*;
        match self {
            BookingNotFound(_)
            | TutorNotFound(_)
            | PricingRequestNotFound(_)
            | DisputeNotFound(_)
            | WithdrawalNotFound(_)
            | LedgerEntryNotFound(_) => ErrorKind::NotFound,

            NotBookingOwner(_) | NotDisputeParty(_) | NotRequestOwner(_) => ErrorKind::Forbidden,

            PricingRequestUnusable(..)
            | InvalidBookingState { .. }
            | InvalidTimeRange(_)
            | SessionInPast
            | WindowExpired(_)
            | InvalidAmount(_)
            | EscrowNotPending(_)
            | SlotUnavailable
            | DisputeAlreadyResolved(_)
            | OpenDisputeExists
            | MissingPaymentReference(_)
            | InvalidWithdrawalState { .. }
            | InsufficientFunds { .. }
            | BelowMinimumWithdrawal { .. }
            | NoBankDetails
            | Audit(_) => ErrorKind::InvalidState,

            SlotAlreadyBooked
            | SlotOverlaps
            | ConcurrentModification
            | DisputeAlreadyExists(_)
            | PendingWithdrawalExists => ErrorKind::Conflict,

            Gateway(_) | Database(_) => ErrorKind::Internal,
        }
    }
}
