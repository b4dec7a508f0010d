use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::Row;

use crate::domain::{
    Booking, BookingId, BookingStatus, DATE_FORMAT, OrphanCapture, OrphanReason, SessionSlot,
    TIME_FORMAT, UserId,
};

use super::repository::{
    WriteOutcome, is_unique_violation, parse_opt_timestamp, parse_opt_uuid, parse_timestamp,
    parse_uuid,
};
use super::{Repository, Tx};

const ORPHAN_CAPTURE_COLUMNS: &str =
    "id, booking_id, payment_ref, amount, reason, refund_ref, created_at, refunded_at";

const BOOKING_COLUMNS: &str = "id, learner_id, tutor_id, session_date, start_time, end_time, status, agreed_hourly_rate, pricing_request_id, order_ref, payment_ref, created_at, updated_at";

impl Repository {
    // ========================
    // Booking operations
    // ========================

    /// Insert a new booking. Returns `Duplicate` when another active booking
    /// already holds the same tutor slot.
    pub async fn insert_booking(&self, booking: &Booking) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (id, learner_id, tutor_id, session_date, start_time, end_time, status, agreed_hourly_rate, pricing_request_id, order_ref, payment_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(booking.id.to_string())
        .bind(booking.learner_id.to_string())
        .bind(booking.tutor_id.to_string())
        .bind(booking.slot.date_str())
        .bind(booking.slot.start_str())
        .bind(booking.slot.end_str())
        .bind(booking.status.as_str())
        .bind(booking.agreed_hourly_rate)
        .bind(booking.pricing_request_id.map(|id| id.to_string()))
        .bind(&booking.order_ref)
        .bind(&booking.payment_ref)
        .bind(booking.created_at.to_rfc3339())
        .bind(booking.updated_at.to_rfc3339())
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Duplicate),
            Err(err) => Err(err).context("Failed to save booking"),
        }
    }

    pub async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch booking")?;

        row.as_ref().map(row_to_booking).transpose()
    }

    /// Find the booking a gateway order was created for.
    pub async fn find_booking_by_order_ref(&self, order_ref: &str) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE order_ref = ?",
            BOOKING_COLUMNS
        ))
        .bind(order_ref)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch booking by order reference")?;

        row.as_ref().map(row_to_booking).transpose()
    }

    /// Find the active (pending or paid) booking holding an exact tutor slot.
    pub async fn find_active_booking_for_slot(
        &self,
        tutor_id: UserId,
        slot: &SessionSlot,
    ) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM bookings
            WHERE tutor_id = ? AND session_date = ? AND start_time = ? AND end_time = ?
              AND status IN ('pending', 'paid')
            "#,
            BOOKING_COLUMNS
        ))
        .bind(tutor_id.to_string())
        .bind(slot.date_str())
        .bind(slot.start_str())
        .bind(slot.end_str())
        .fetch_optional(self.pool())
        .await
        .context("Failed to look up active booking for slot")?;

        row.as_ref().map(row_to_booking).transpose()
    }

    /// List a tutor's active bookings on a given date.
    pub async fn list_active_bookings_for_tutor_on(
        &self,
        tutor_id: UserId,
        date: NaiveDate,
    ) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM bookings
            WHERE tutor_id = ? AND session_date = ? AND status IN ('pending', 'paid')
            ORDER BY start_time
            "#,
            BOOKING_COLUMNS
        ))
        .bind(tutor_id.to_string())
        .bind(date.format(DATE_FORMAT).to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list active bookings")?;

        rows.iter().map(row_to_booking).collect()
    }

    pub async fn list_bookings_with_status(&self, status: BookingStatus) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE status = ? ORDER BY session_date, end_time",
            BOOKING_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await
        .context("Failed to list bookings by status")?;

        rows.iter().map(row_to_booking).collect()
    }

    /// Completed bookings whose escrow entry is still held.
    pub async fn list_completed_bookings_pending_release(&self) -> Result<Vec<Booking>> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.learner_id, b.tutor_id, b.session_date, b.start_time, b.end_time, b.status,
                   b.agreed_hourly_rate, b.pricing_request_id, b.order_ref, b.payment_ref,
                   b.created_at, b.updated_at
            FROM bookings b
            JOIN wallet_ledger w ON w.booking_id = b.id
            WHERE b.status = 'completed' AND w.status = 'pending_release'
            ORDER BY b.session_date, b.end_time
            "#,
        )
        .fetch_all(self.pool())
        .await
        .context("Failed to list bookings pending release")?;

        rows.iter().map(row_to_booking).collect()
    }

    /// Attach a gateway order to a pending booking.
    pub async fn set_order_ref(&self, id: BookingId, order_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET order_ref = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(order_ref)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to store order reference")?;
        Ok(result.rows_affected() == 1)
    }

    /// Pending -> failed. Keeps any payment reference already stored.
    pub async fn mark_booking_failed(
        &self,
        id: BookingId,
        payment_ref: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'failed', payment_ref = COALESCE(?, payment_ref), updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(payment_ref)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to mark booking failed")?;
        Ok(result.rows_affected() == 1)
    }

    /// Pending -> cancelled, releasing the slot lock.
    pub async fn cancel_pending_booking(&self, id: BookingId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'cancelled', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(self.pool())
        .await
        .context("Failed to cancel booking")?;
        Ok(result.rows_affected() == 1)
    }

    /// Move a paid booking from `from` to `to` in a single conditional update.
    /// `Unchanged` if the booking moved on concurrently, `Duplicate` if the new
    /// slot was taken in the meantime.
    pub async fn reschedule_booking(
        &self,
        id: BookingId,
        from: &SessionSlot,
        to: &SessionSlot,
    ) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET session_date = ?, start_time = ?, end_time = ?, updated_at = ?
            WHERE id = ? AND status = 'paid'
              AND session_date = ? AND start_time = ? AND end_time = ?
              AND NOT EXISTS (SELECT 1 FROM disputes d WHERE d.booking_id = bookings.id AND d.status = 'open')
            "#,
        )
        .bind(to.date_str())
        .bind(to.start_str())
        .bind(to.end_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(from.date_str())
        .bind(from.start_str())
        .bind(from.end_str())
        .execute(self.pool())
        .await;

        match result {
            Ok(r) if r.rows_affected() == 1 => Ok(WriteOutcome::Applied),
            Ok(_) => Ok(WriteOutcome::Unchanged),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Duplicate),
            Err(err) => Err(err).context("Failed to reschedule booking"),
        }
    }

    // ========================
    // Orphan captures
    // ========================

    /// Record a capture that could not be applied. Returns false if the
    /// payment reference was already recorded.
    pub async fn insert_orphan_capture(&self, capture: &OrphanCapture) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO orphan_captures (id, booking_id, payment_ref, amount, reason, refund_ref, created_at, refunded_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, NULL)
            ON CONFLICT(payment_ref) DO NOTHING
            "#,
        )
        .bind(capture.id.to_string())
        .bind(capture.booking_id.to_string())
        .bind(&capture.payment_ref)
        .bind(capture.amount)
        .bind(capture.reason.as_str())
        .bind(capture.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .context("Failed to save orphan capture")?;
        Ok(result.rows_affected() == 1)
    }

    /// List orphan captures, optionally only those still awaiting a refund.
    pub async fn list_orphan_captures(&self, unrefunded_only: bool) -> Result<Vec<OrphanCapture>> {
        let filter = if unrefunded_only {
            "WHERE refund_ref IS NULL"
        } else {
            ""
        };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orphan_captures {} ORDER BY created_at",
            ORPHAN_CAPTURE_COLUMNS, filter
        ))
        .fetch_all(self.pool())
        .await
        .context("Failed to list orphan captures")?;

        rows.iter().map(row_to_orphan_capture).collect()
    }
}

impl Tx {
    /// Pending or failed -> paid, storing the payment reference.
    /// `Unchanged` if the booking was already past that point, `Duplicate`
    /// if a failed booking's slot has since been taken by another booking.
    pub async fn mark_booking_paid(
        &mut self,
        id: BookingId,
        payment_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'paid', payment_ref = COALESCE(?, payment_ref), updated_at = ?
            WHERE id = ? AND status IN ('pending', 'failed')
            "#,
        )
        .bind(payment_ref)
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *self.inner)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 1 => Ok(WriteOutcome::Applied),
            Ok(_) => Ok(WriteOutcome::Unchanged),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Duplicate),
            Err(err) => Err(err).context("Failed to mark booking paid"),
        }
    }

    /// Paid -> completed, unless an open dispute exists for the booking.
    pub async fn complete_booking(&mut self, id: BookingId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'completed', updated_at = ?
            WHERE id = ? AND status = 'paid'
              AND NOT EXISTS (SELECT 1 FROM disputes d WHERE d.booking_id = bookings.id AND d.status = 'open')
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *self.inner)
        .await
        .context("Failed to complete booking")?;
        Ok(result.rows_affected() == 1)
    }

    /// Paid -> no_show, unless an open dispute exists for the booking.
    pub async fn mark_booking_no_show(&mut self, id: BookingId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'no_show', updated_at = ?
            WHERE id = ? AND status = 'paid'
              AND NOT EXISTS (SELECT 1 FROM disputes d WHERE d.booking_id = bookings.id AND d.status = 'open')
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *self.inner)
        .await
        .context("Failed to mark booking as no-show")?;
        Ok(result.rows_affected() == 1)
    }

    /// Store the refund reference of an orphan capture. Only the first call
    /// for a payment reference has any effect.
    pub async fn mark_orphan_refunded(
        &mut self,
        payment_ref: &str,
        refund_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orphan_captures
            SET refund_ref = ?, refunded_at = ?
            WHERE payment_ref = ? AND refund_ref IS NULL
            "#,
        )
        .bind(refund_ref)
        .bind(now.to_rfc3339())
        .bind(payment_ref)
        .execute(&mut *self.inner)
        .await
        .context("Failed to mark orphan capture refunded")?;
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_booking(row: &sqlx::sqlite::SqliteRow) -> Result<Booking> {
    let id_str: String = row.get("id");
    let learner_str: String = row.get("learner_id");
    let tutor_str: String = row.get("tutor_id");
    let date_str: String = row.get("session_date");
    let start_str: String = row.get("start_time");
    let end_str: String = row.get("end_time");
    let status_str: String = row.get("status");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).context("Invalid session date")?;
    let start = NaiveTime::parse_from_str(&start_str, TIME_FORMAT).context("Invalid start time")?;
    let end = NaiveTime::parse_from_str(&end_str, TIME_FORMAT).context("Invalid end time")?;

    Ok(Booking {
        id: parse_uuid(&id_str, "booking id")?,
        learner_id: parse_uuid(&learner_str, "learner id")?,
        tutor_id: parse_uuid(&tutor_str, "tutor id")?,
        slot: SessionSlot::new(date, start, end).context("Invalid stored slot")?,
        status: BookingStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid booking status: {}", status_str))?,
        agreed_hourly_rate: row.get("agreed_hourly_rate"),
        pricing_request_id: parse_opt_uuid(row.get("pricing_request_id"), "pricing request id")?,
        order_ref: row.get("order_ref"),
        payment_ref: row.get("payment_ref"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_orphan_capture(row: &sqlx::sqlite::SqliteRow) -> Result<OrphanCapture> {
    let id_str: String = row.get("id");
    let booking_str: String = row.get("booking_id");
    let reason_str: String = row.get("reason");
    let created_at_str: String = row.get("created_at");

    Ok(OrphanCapture {
        id: parse_uuid(&id_str, "orphan capture id")?,
        booking_id: parse_uuid(&booking_str, "booking id")?,
        payment_ref: row.get("payment_ref"),
        amount: row.get("amount"),
        reason: OrphanReason::parse(&reason_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid orphan capture reason: {}", reason_str))?,
        refund_ref: row.get("refund_ref"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        refunded_at: parse_opt_timestamp(row.get("refunded_at"), "refunded_at")?,
    })
}
