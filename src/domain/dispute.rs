use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingId, Cents, UserId};

pub type DisputeId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Open,
    /// Terminal
    Resolved,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::Open => "open",
            DisputeStatus::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(DisputeStatus::Open),
            "resolved" => Some(DisputeStatus::Resolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    FullRefund,
    PartialRefund,
    ReleasePaymentToTutor,
}

impl DisputeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeOutcome::FullRefund => "full_refund",
            DisputeOutcome::PartialRefund => "partial_refund",
            DisputeOutcome::ReleasePaymentToTutor => "release_payment_to_tutor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "full_refund" => Some(DisputeOutcome::FullRefund),
            "partial_refund" => Some(DisputeOutcome::PartialRefund),
            "release_payment_to_tutor" => Some(DisputeOutcome::ReleasePaymentToTutor),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An admin's decision on a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    FullRefund,
    PartialRefund { refund_amount: Cents },
    ReleasePaymentToTutor,
}

impl Resolution {
    pub fn outcome(&self) -> DisputeOutcome {
        match self {
            Resolution::FullRefund => DisputeOutcome::FullRefund,
            Resolution::PartialRefund { .. } => DisputeOutcome::PartialRefund,
            Resolution::ReleasePaymentToTutor => DisputeOutcome::ReleasePaymentToTutor,
        }
    }

    pub fn refund_amount(&self) -> Option<Cents> {
        match self {
            Resolution::PartialRefund { refund_amount } => Some(*refund_amount),
            _ => None,
        }
    }
}

/// Which side of a booking an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Learner,
    Tutor,
}

impl Party {
    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Learner => "learner",
            Party::Tutor => "tutor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub booking_id: BookingId,
    pub learner_id: UserId,
    pub tutor_id: UserId,
    pub status: DisputeStatus,
    pub reason: Option<String>,
    pub learner_evidence: Option<String>,
    pub tutor_evidence: Option<String>,
    pub outcome: Option<DisputeOutcome>,
    /// Only set for partial refunds
    pub refund_amount: Option<Cents>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispute {
    pub fn open(
        booking_id: BookingId,
        learner_id: UserId,
        tutor_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            learner_id,
            tutor_id,
            status: DisputeStatus::Open,
            reason: None,
            learner_evidence: None,
            tutor_evidence: None,
            outcome: None,
            refund_amount: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == DisputeStatus::Open
    }

    /// The side `user` is on, if any.
    pub fn party_of(&self, user: UserId) -> Option<Party> {
        if user == self.learner_id {
            Some(Party::Learner)
        } else if user == self.tutor_id {
            Some(Party::Tutor)
        } else {
            None
        }
    }
}

/// A dispute may be opened from the end of the session until `window` has elapsed.
pub fn within_dispute_window(session_end: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now >= session_end && now - session_end <= window
}

/// Validate a partial refund against the escrowed amount and return the
/// amount released to the tutor.
pub fn partial_refund_split(refund_amount: Cents, original_amount: Cents) -> Option<Cents> {
    if refund_amount <= 0 || refund_amount >= original_amount {
        return None;
    }
    Some(original_amount - refund_amount)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeAuditAction {
    DisputeCreated,
    EvidenceSubmitted,
    DisputeResolved,
}

impl DisputeAuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeAuditAction::DisputeCreated => "DISPUTE_CREATED",
            DisputeAuditAction::EvidenceSubmitted => "EVIDENCE_SUBMITTED",
            DisputeAuditAction::DisputeResolved => "DISPUTE_RESOLVED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DISPUTE_CREATED" => Some(DisputeAuditAction::DisputeCreated),
            "EVIDENCE_SUBMITTED" => Some(DisputeAuditAction::EvidenceSubmitted),
            "DISPUTE_RESOLVED" => Some(DisputeAuditAction::DisputeResolved),
            _ => None,
        }
    }
}

/// Append-only trail of everything that happened to a dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeAuditEntry {
    pub id: Uuid,
    pub dispute_id: DisputeId,
    pub action: DisputeAuditAction,
    pub actor_id: UserId,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DisputeAuditEntry {
    pub fn new(
        dispute_id: DisputeId,
        action: DisputeAuditAction,
        actor_id: UserId,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispute_id,
            action,
            actor_id,
            details,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_window_boundaries() {
        let end = at(10, 0);
        let window = Duration::hours(24);
        assert!(within_dispute_window(end, end, window));
        assert!(within_dispute_window(end, end + Duration::minutes(23 * 60 + 59), window));
        assert!(within_dispute_window(end, end + window, window));
        assert!(!within_dispute_window(end, end + Duration::minutes(24 * 60 + 1), window));
        assert!(!within_dispute_window(end, at(9, 59), window));
    }

    #[test]
    fn test_partial_refund_split() {
        assert_eq!(partial_refund_split(1000, 3000), Some(2000));
        assert_eq!(partial_refund_split(2999, 3000), Some(1));
        assert_eq!(partial_refund_split(0, 3000), None);
        assert_eq!(partial_refund_split(3000, 3000), None);
        assert_eq!(partial_refund_split(-5, 3000), None);
    }

    #[test]
    fn test_party_of() {
        let learner = Uuid::new_v4();
        let tutor = Uuid::new_v4();
        let dispute = Dispute::open(Uuid::new_v4(), learner, tutor, at(12, 0));
        assert_eq!(dispute.party_of(learner), Some(Party::Learner));
        assert_eq!(dispute.party_of(tutor), Some(Party::Tutor));
        assert_eq!(dispute.party_of(Uuid::new_v4()), None);
    }

    #[test]
    fn test_resolution_outcome() {
        let r = Resolution::PartialRefund { refund_amount: 500 };
        assert_eq!(r.outcome(), DisputeOutcome::PartialRefund);
        assert_eq!(r.refund_amount(), Some(500));
        assert_eq!(Resolution::FullRefund.refund_amount(), None);
    }
}
