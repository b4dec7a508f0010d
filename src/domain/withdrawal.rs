use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type WithdrawalId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Paid => "paid",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(WithdrawalStatus::Pending),
            "approved" => Some(WithdrawalStatus::Approved),
            "rejected" => Some(WithdrawalStatus::Rejected),
            "paid" => Some(WithdrawalStatus::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bank details as they looked when the withdrawal was requested.
/// Only the masked account number is ever stored with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub account_holder: String,
    pub masked_account_number: String,
    pub bank_name: Option<String>,
    pub ifsc: Option<String>,
}

/// Mask all but the last four characters of an account number.
/// Example: "123456789012" -> "XXXXXXXX9012"
pub fn mask_account_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().filter(|c| !c.is_whitespace()).collect();
    let visible = chars.len().min(4);
    let hidden = chars.len() - visible;
    let mut masked = "X".repeat(hidden);
    masked.extend(&chars[hidden..]);
    masked
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub tutor_id: UserId,
    pub amount: Cents,
    pub status: WithdrawalStatus,
    pub bank_snapshot: BankSnapshot,
    pub requested_at: DateTime<Utc>,
    /// Admin who approved or rejected the request
    pub processed_by: Option<UserId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<String>,
    pub note: Option<String>,
}

impl WithdrawalRequest {
    pub fn new(
        tutor_id: UserId,
        amount: Cents,
        bank_snapshot: BankSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tutor_id,
            amount,
            status: WithdrawalStatus::Pending,
            bank_snapshot,
            requested_at: now,
            processed_by: None,
            processed_at: None,
            paid_at: None,
            transaction_ref: None,
            note: None,
        }
    }
}

/// Immutable offset against a tutor's available balance, written on approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalDeduction {
    pub id: Uuid,
    pub withdrawal_id: WithdrawalId,
    pub tutor_id: UserId,
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

impl WithdrawalDeduction {
    pub fn for_request(request: &WithdrawalRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            withdrawal_id: request.id,
            tutor_id: request.tutor_id,
            amount: request.amount,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_status_roundtrip() {
        for status in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Approved,
            WithdrawalStatus::Rejected,
            WithdrawalStatus::Paid,
        ] {
            assert_eq!(WithdrawalStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_mask_account_number() {
        assert_eq!(mask_account_number("123456789012"), "XXXXXXXX9012");
        assert_eq!(mask_account_number("1234 5678"), "XXXX5678");
        assert_eq!(mask_account_number("123"), "123");
        assert_eq!(mask_account_number(""), "");
    }

    #[test]
    fn test_deduction_mirrors_request() {
        let snapshot = BankSnapshot {
            account_holder: "A. Tutor".into(),
            masked_account_number: "XXXX1234".into(),
            bank_name: None,
            ifsc: None,
        };
        let request = WithdrawalRequest::new(Uuid::new_v4(), 5000, snapshot, Utc::now());
        let deduction = WithdrawalDeduction::for_request(&request, Utc::now());
        assert_eq!(deduction.withdrawal_id, request.id);
        assert_eq!(deduction.tutor_id, request.tutor_id);
        assert_eq!(deduction.amount, 5000);
    }
}
