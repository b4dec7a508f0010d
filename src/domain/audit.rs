use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{BookingId, Cents, UserId, WithdrawalId};

pub type AuditEntryId = Uuid;

/// Closed set of money-impacting events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    EarningsCreated,
    EarningsReleased,
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalPaid,
    WithdrawalRejected,
    RefundFull,
    RefundPartial,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EarningsCreated => "EARNINGS_CREATED",
            AuditAction::EarningsReleased => "EARNINGS_RELEASED",
            AuditAction::WithdrawalRequested => "WITHDRAWAL_REQUESTED",
            AuditAction::WithdrawalApproved => "WITHDRAWAL_APPROVED",
            AuditAction::WithdrawalPaid => "WITHDRAWAL_PAID",
            AuditAction::WithdrawalRejected => "WITHDRAWAL_REJECTED",
            AuditAction::RefundFull => "REFUND_FULL",
            AuditAction::RefundPartial => "REFUND_PARTIAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EARNINGS_CREATED" => Some(AuditAction::EarningsCreated),
            "EARNINGS_RELEASED" => Some(AuditAction::EarningsReleased),
            "WITHDRAWAL_REQUESTED" => Some(AuditAction::WithdrawalRequested),
            "WITHDRAWAL_APPROVED" => Some(AuditAction::WithdrawalApproved),
            "WITHDRAWAL_PAID" => Some(AuditAction::WithdrawalPaid),
            "WITHDRAWAL_REJECTED" => Some(AuditAction::WithdrawalRejected),
            "REFUND_FULL" => Some(AuditAction::RefundFull),
            "REFUND_PARTIAL" => Some(AuditAction::RefundPartial),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who caused an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "actor_id", rename_all = "UPPERCASE")]
pub enum Performer {
    System,
    Admin(UserId),
}

impl Performer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Performer::System => "SYSTEM",
            Performer::Admin(_) => "ADMIN",
        }
    }

    pub fn actor_id(&self) -> Option<UserId> {
        match self {
            Performer::System => None,
            Performer::Admin(id) => Some(*id),
        }
    }

    /// Rebuild a performer from its stored kind and actor columns.
    pub fn from_parts(kind: &str, actor_id: Option<UserId>) -> Result<Self, AuditError> {
        match (kind, actor_id) {
            ("SYSTEM", _) => Ok(Performer::System),
            ("ADMIN", Some(id)) if !id.is_nil() => Ok(Performer::Admin(id)),
            ("ADMIN", _) => Err(AuditError::MissingActor),
            (other, _) => Err(AuditError::UnknownPerformer(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("admin audit entries require an actor id")]
    MissingActor,
    #[error("unknown performer kind: {0}")]
    UnknownPerformer(String),
    #[error("audit amount must not be negative: {0}")]
    NegativeAmount(Cents),
}

/// One immutable line of the financial audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub action: AuditAction,
    pub tutor_id: Option<UserId>,
    pub booking_id: Option<BookingId>,
    pub withdrawal_id: Option<WithdrawalId>,
    pub amount: Cents,
    pub performed_by: Performer,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        amount: Cents,
        performed_by: Performer,
        now: DateTime<Utc>,
    ) -> Result<Self, AuditError> {
        let entry = Self {
            id: Uuid::new_v4(),
            action,
            tutor_id: None,
            booking_id: None,
            withdrawal_id: None,
            amount,
            performed_by,
            metadata: serde_json::Value::Null,
            created_at: now,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check the invariants every stored entry must satisfy.
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.amount < 0 {
            return Err(AuditError::NegativeAmount(self.amount));
        }
        if let Performer::Admin(id) = self.performed_by {
            if id.is_nil() {
                return Err(AuditError::MissingActor);
            }
        }
        Ok(())
    }

    pub fn with_tutor(mut self, tutor_id: UserId) -> Self {
        self.tutor_id = Some(tutor_id);
        self
    }

    pub fn with_booking(mut self, booking_id: BookingId) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn with_withdrawal(mut self, withdrawal_id: WithdrawalId) -> Self {
        self.withdrawal_id = Some(withdrawal_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
