use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

pub type PricingRequestId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tutor {
    pub id: UserId,
    pub display_name: String,
    /// Default hourly rate in minor units
    pub hourly_rate: Cents,
}

impl Tutor {
    pub fn new(display_name: impl Into<String>, hourly_rate: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            hourly_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingRequestStatus {
    Active,
    Closed,
}

impl PricingRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingRequestStatus::Active => "active",
            PricingRequestStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(PricingRequestStatus::Active),
            "closed" => Some(PricingRequestStatus::Closed),
            _ => None,
        }
    }
}

/// A learner's counter-offer. Once a tutor has expressed interest, a booking
/// with that tutor is priced at `budget` instead of the tutor's default rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRequest {
    pub id: PricingRequestId,
    pub learner_id: UserId,
    /// Offered hourly rate in minor units
    pub budget: Cents,
    pub status: PricingRequestStatus,
    pub created_at: DateTime<Utc>,
}

impl PricingRequest {
    pub fn new(learner_id: UserId, budget: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            learner_id,
            budget,
            status: PricingRequestStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PricingRequestStatus::Active
    }
}
