use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Cents, PricingRequestId, prorate_hourly};

pub type BookingId = Uuid;

/// Learners, tutors and admins share one identifier space.
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Slot reserved, waiting for payment
    Pending,
    /// Payment captured, funds held in escrow
    Paid,
    Failed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Paid => "paid",
            BookingStatus::Failed => "failed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "paid" => Some(BookingStatus::Paid),
            "failed" => Some(BookingStatus::Failed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// Active bookings hold the reservation lock on their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Paid)
    }

    /// Payment has been captured for this booking at some point.
    pub fn is_settled(&self) -> bool {
        matches!(self, BookingStatus::Paid | BookingStatus::Completed)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("malformed date '{0}', expected YYYY-MM-DD")]
    MalformedDate(String),
    #[error("malformed time '{0}', expected HH:MM")]
    MalformedTime(String),
    #[error("session start {start} must be before end {end}")]
    NotOrdered { start: NaiveTime, end: NaiveTime },
}

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// A session time range on a single day. Times are interpreted in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionSlot {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Result<Self, SlotError> {
        if start >= end {
            return Err(SlotError::NotOrdered { start, end });
        }
        Ok(Self { date, start, end })
    }

    /// Parse a slot from `YYYY-MM-DD` and two `HH:MM` strings.
    pub fn parse(date: &str, start: &str, end: &str) -> Result<Self, SlotError> {
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|_| SlotError::MalformedDate(date.to_string()))?;
        let start_time = NaiveTime::parse_from_str(start.trim(), TIME_FORMAT)
            .map_err(|_| SlotError::MalformedTime(start.to_string()))?;
        let end_time = NaiveTime::parse_from_str(end.trim(), TIME_FORMAT)
            .map_err(|_| SlotError::MalformedTime(end.to_string()))?;
        Self::new(date, start_time, end_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.end).and_utc()
    }

    /// Two slots overlap when they share a date and their ranges intersect.
    /// Touching ranges (one ends when the other starts) do not overlap.
    pub fn overlaps(&self, other: &SessionSlot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }

    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn start_str(&self) -> String {
        self.start.format(TIME_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(TIME_FORMAT).to_string()
    }
}

impl std::fmt::Display for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}-{}", self.date_str(), self.start_str(), self.end_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub learner_id: UserId,
    pub tutor_id: UserId,
    pub slot: SessionSlot,
    pub status: BookingStatus,
    /// Hourly rate in minor units, frozen when the booking is created
    pub agreed_hourly_rate: Cents,
    /// Negotiated pricing request this booking was priced from
    pub pricing_request_id: Option<PricingRequestId>,
    /// Gateway order reference, used to match webhooks
    pub order_ref: Option<String>,
    /// Gateway payment reference, required for refunds
    pub payment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        learner_id: UserId,
        tutor_id: UserId,
        slot: SessionSlot,
        agreed_hourly_rate: Cents,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            learner_id,
            tutor_id,
            slot,
            status: BookingStatus::Pending,
            agreed_hourly_rate,
            pricing_request_id: None,
            order_ref: None,
            payment_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_pricing_request(mut self, request_id: PricingRequestId) -> Self {
        self.pricing_request_id = Some(request_id);
        self
    }

    /// Amount to charge for the session in minor units.
    /// `None` when the amount would not be a positive integer.
    pub fn amount_due(&self) -> Option<Cents> {
        prorate_hourly(self.agreed_hourly_rate, self.slot.duration_minutes()).filter(|a| *a > 0)
    }

    /// Moment after which the sweep may consider the session finished.
    pub fn matures_at(&self, buffer: Duration) -> DateTime<Utc> {
        self.slot.ends_at() + buffer
    }
}

/// Why a captured payment could not be applied to its booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// The learner cancelled before the capture arrived
    BookingCancelled,
    /// The payment failed, the slot was booked again, then the capture arrived
    SlotRebooked,
}

impl OrphanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanReason::BookingCancelled => "booking_cancelled",
            OrphanReason::SlotRebooked => "slot_rebooked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booking_cancelled" => Some(OrphanReason::BookingCancelled),
            "slot_rebooked" => Some(OrphanReason::SlotRebooked),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A captured payment that matched a booking unable to take it.
/// Recorded once per payment reference, then refunded in full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanCapture {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub payment_ref: String,
    pub amount: Cents,
    pub reason: OrphanReason,
    /// Gateway refund reference, `None` until the refund went through
    pub refund_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl OrphanCapture {
    pub fn new(
        booking: &Booking,
        payment_ref: &str,
        reason: OrphanReason,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            payment_ref: payment_ref.to_string(),
            amount: booking.amount_due().unwrap_or(0),
            reason,
            refund_ref: None,
            created_at: now,
            refunded_at: None,
        }
    }

    pub fn is_refunded(&self) -> bool {
        self.refund_ref.is_some()
    }
}
