use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::{BookingId, Cents, EarningStatus, LedgerEntry, UserId};

use super::repository::{parse_timestamp, parse_uuid};
use super::{Repository, Tx};

const LEDGER_COLUMNS: &str = "id, booking_id, tutor_id, amount, status, commission_rate, commission_amount, created_at, updated_at";

/// A conditional status change on one ledger entry.
#[derive(Debug, Clone, Copy)]
pub struct LedgerTransition {
    pub booking_id: BookingId,
    pub from: EarningStatus,
    pub to: EarningStatus,
    /// Rewrite the amount as part of the transition
    pub new_amount: Option<Cents>,
    /// Refuse the transition while the booking has an open dispute
    pub respect_open_dispute: bool,
}

impl Repository {
    // ========================
    // Wallet ledger reads
    // ========================

    pub async fn get_ledger_entry(&self, booking_id: BookingId) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM wallet_ledger WHERE booking_id = ?",
            LEDGER_COLUMNS
        ))
        .bind(booking_id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch ledger entry")?;

        row.as_ref().map(row_to_entry).transpose()
    }

    pub async fn count_ledger_entries_for_booking(&self, booking_id: BookingId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM wallet_ledger WHERE booking_id = ?")
            .bind(booking_id.to_string())
            .fetch_one(self.pool())
            .await
            .context("Failed to count ledger entries")?;
        Ok(row.get("count"))
    }

    pub async fn list_ledger_entries_for_tutor(&self, tutor_id: UserId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallet_ledger WHERE tutor_id = ? ORDER BY created_at",
            LEDGER_COLUMNS
        ))
        .bind(tutor_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list ledger entries")?;

        rows.iter().map(row_to_entry).collect()
    }

    pub async fn list_all_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallet_ledger ORDER BY created_at",
            LEDGER_COLUMNS
        ))
        .fetch_all(self.pool())
        .await
        .context("Failed to list ledger entries")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Sum of a tutor's ledger entries in the given status, computed in SQL.
    pub async fn sum_ledger_amounts(&self, tutor_id: UserId, status: EarningStatus) -> Result<Cents> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0) AS total
            FROM wallet_ledger
            WHERE tutor_id = ? AND status = ?
            "#,
        )
        .bind(tutor_id.to_string())
        .bind(status.as_str())
        .fetch_one(self.pool())
        .await
        .context("Failed to sum ledger amounts")?;

        Ok(row.get("total"))
    }
}

impl Tx {
    /// Insert a ledger entry unless one already exists for the booking.
    /// Returns true if this call created it.
    pub async fn insert_ledger_entry_if_absent(&mut self, entry: &LedgerEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO wallet_ledger (id, booking_id, tutor_id, amount, status, commission_rate, commission_amount, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(booking_id) DO NOTHING
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.booking_id.to_string())
        .bind(entry.tutor_id.to_string())
        .bind(entry.amount)
        .bind(entry.status.as_str())
        .bind(entry.commission_rate)
        .bind(entry.commission_amount)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&mut *self.inner)
        .await
        .context("Failed to insert ledger entry")?;

        Ok(result.rows_affected() == 1)
    }

    /// Apply a transition keyed on the entry's current status.
    /// Returns the updated entry, or `None` if the predicate matched nothing.
    pub async fn transition_ledger_entry(
        &mut self,
        transition: LedgerTransition,
        now: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let dispute_guard = if transition.respect_open_dispute {
            "AND NOT EXISTS (SELECT 1 FROM disputes d WHERE d.booking_id = wallet_ledger.booking_id AND d.status = 'open')"
        } else {
            ""
        };

        let sql = format!(
            r#"
            UPDATE wallet_ledger
            SET status = ?, amount = COALESCE(?, amount), updated_at = ?
            WHERE booking_id = ? AND status = ? {}
            RETURNING {}
            "#,
            dispute_guard, LEDGER_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(transition.to.as_str())
            .bind(transition.new_amount)
            .bind(now.to_rfc3339())
            .bind(transition.booking_id.to_string())
            .bind(transition.from.as_str())
            .fetch_optional(&mut *self.inner)
            .await
            .context("Failed to update ledger entry")?;

        row.as_ref().map(row_to_entry).transpose()
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<LedgerEntry> {
    let id_str: String = row.get("id");
    let booking_str: String = row.get("booking_id");
    let tutor_str: String = row.get("tutor_id");
    let status_str: String = row.get("status");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(LedgerEntry {
        id: parse_uuid(&id_str, "ledger entry id")?,
        booking_id: parse_uuid(&booking_str, "booking id")?,
        tutor_id: parse_uuid(&tutor_str, "tutor id")?,
        amount: row.get("amount"),
        status: EarningStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid earning status: {}", status_str))?,
        commission_rate: row.get("commission_rate"),
        commission_amount: row.get("commission_amount"),
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}
