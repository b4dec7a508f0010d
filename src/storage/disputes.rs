use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::{
    BookingId, Cents, Dispute, DisputeAuditAction, DisputeAuditEntry, DisputeId, DisputeOutcome,
    DisputeStatus, Party, UserId,
};

use super::repository::{
    WriteOutcome, is_unique_violation, parse_opt_timestamp, parse_opt_uuid, parse_timestamp,
    parse_uuid,
};
use super::{Repository, Tx};

const DISPUTE_COLUMNS: &str = "id, booking_id, learner_id, tutor_id, status, reason, learner_evidence, tutor_evidence, outcome, refund_amount, resolved_by, resolved_at, created_at, updated_at";

impl Repository {
    // ========================
    // Dispute reads
    // ========================

    pub async fn get_dispute(&self, id: DisputeId) -> Result<Option<Dispute>> {
        let row = sqlx::query(&format!("SELECT {} FROM disputes WHERE id = ?", DISPUTE_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch dispute")?;

        row.as_ref().map(row_to_dispute).transpose()
    }

    pub async fn get_dispute_for_booking(&self, booking_id: BookingId) -> Result<Option<Dispute>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disputes WHERE booking_id = ?",
            DISPUTE_COLUMNS
        ))
        .bind(booking_id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch dispute for booking")?;

        row.as_ref().map(row_to_dispute).transpose()
    }

    pub async fn has_open_dispute_for_booking(&self, booking_id: BookingId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM disputes WHERE booking_id = ? AND status = 'open') AS present",
        )
        .bind(booking_id.to_string())
        .fetch_one(self.pool())
        .await
        .context("Failed to check open dispute for booking")?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    pub async fn has_open_dispute_for_tutor(&self, tutor_id: UserId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM disputes WHERE tutor_id = ? AND status = 'open') AS present",
        )
        .bind(tutor_id.to_string())
        .fetch_one(self.pool())
        .await
        .context("Failed to check open disputes for tutor")?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    /// List disputes, optionally only those in one status.
    pub async fn list_disputes(&self, status: Option<DisputeStatus>) -> Result<Vec<Dispute>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {} FROM disputes WHERE status = ? ORDER BY created_at",
                    DISPUTE_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM disputes ORDER BY created_at",
                    DISPUTE_COLUMNS
                ))
                .fetch_all(self.pool())
                .await
            }
        }
        .context("Failed to list disputes")?;

        rows.iter().map(row_to_dispute).collect()
    }

    pub async fn list_dispute_audit(&self, dispute_id: DisputeId) -> Result<Vec<DisputeAuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, dispute_id, action, actor_id, details, created_at
            FROM dispute_audit_log
            WHERE dispute_id = ?
            ORDER BY sequence
            "#,
        )
        .bind(dispute_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list dispute audit log")?;

        rows.iter().map(row_to_dispute_audit).collect()
    }
}

impl Tx {
    /// Insert a new open dispute while the booking's escrow is still pending
    /// release. `Duplicate` if the booking already has a dispute, `Unchanged`
    /// if the escrow has been released or refunded.
    pub async fn insert_dispute(&mut self, dispute: &Dispute) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO disputes (id, booking_id, learner_id, tutor_id, status, reason, learner_evidence, tutor_evidence, outcome, refund_amount, resolved_by, resolved_at, created_at, updated_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM wallet_ledger
                WHERE booking_id = ? AND status = 'pending_release'
            )
            "#,
        )
        .bind(dispute.id.to_string())
        .bind(dispute.booking_id.to_string())
        .bind(dispute.learner_id.to_string())
        .bind(dispute.tutor_id.to_string())
        .bind(dispute.status.as_str())
        .bind(&dispute.reason)
        .bind(&dispute.learner_evidence)
        .bind(&dispute.tutor_evidence)
        .bind(dispute.created_at.to_rfc3339())
        .bind(dispute.updated_at.to_rfc3339())
        .bind(dispute.booking_id.to_string())
        .execute(&mut *self.inner)
        .await;

        match result {
            Ok(r) if r.rows_affected() == 1 => Ok(WriteOutcome::Applied),
            Ok(_) => Ok(WriteOutcome::Unchanged),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Duplicate),
            Err(err) => Err(err).context("Failed to save dispute"),
        }
    }

    /// Write one party's evidence while the dispute is still open.
    pub async fn set_dispute_evidence(
        &mut self,
        id: DisputeId,
        party: Party,
        evidence: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let column = match party {
            Party::Learner => "learner_evidence",
            Party::Tutor => "tutor_evidence",
        };
        let sql = format!(
            "UPDATE disputes SET {} = ?, updated_at = ? WHERE id = ? AND status = 'open'",
            column
        );

        let result = sqlx::query(&sql)
            .bind(evidence)
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *self.inner)
            .await
            .context("Failed to store dispute evidence")?;
        Ok(result.rows_affected() == 1)
    }

    /// Open -> resolved. Returns false if the dispute was not open.
    pub async fn resolve_dispute(
        &mut self,
        id: DisputeId,
        outcome: DisputeOutcome,
        refund_amount: Option<Cents>,
        admin_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE disputes
            SET status = 'resolved', outcome = ?, refund_amount = ?, resolved_by = ?, resolved_at = ?, updated_at = ?
            WHERE id = ? AND status = 'open'
            "#,
        )
        .bind(outcome.as_str())
        .bind(refund_amount)
        .bind(admin_id.to_string())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *self.inner)
        .await
        .context("Failed to resolve dispute")?;
        Ok(result.rows_affected() == 1)
    }

    /// Append to the dispute audit trail. There is no update or delete path.
    pub async fn append_dispute_audit(&mut self, entry: &DisputeAuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dispute_audit_log (id, dispute_id, action, actor_id, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.dispute_id.to_string())
        .bind(entry.action.as_str())
        .bind(entry.actor_id.to_string())
        .bind(serde_json::to_string(&entry.details)?)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *self.inner)
        .await
        .context("Failed to append dispute audit entry")?;
        Ok(())
    }
}

fn row_to_dispute(row: &sqlx::sqlite::SqliteRow) -> Result<Dispute> {
    let id_str: String = row.get("id");
    let booking_str: String = row.get("booking_id");
    let learner_str: String = row.get("learner_id");
    let tutor_str: String = row.get("tutor_id");
    let status_str: String = row.get("status");
    let outcome_str: Option<String> = row.get("outcome");
    let created_at_str: String = row.get("created_at");
    let updated_at_str: String = row.get("updated_at");

    Ok(Dispute {
        id: parse_uuid(&id_str, "dispute id")?,
        booking_id: parse_uuid(&booking_str, "booking id")?,
        learner_id: parse_uuid(&learner_str, "learner id")?,
        tutor_id: parse_uuid(&tutor_str, "tutor id")?,
        status: DisputeStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid dispute status: {}", status_str))?,
        reason: row.get("reason"),
        learner_evidence: row.get("learner_evidence"),
        tutor_evidence: row.get("tutor_evidence"),
        outcome: outcome_str
            .map(|s| {
                DisputeOutcome::from_str(&s)
                    .ok_or_else(|| anyhow::anyhow!("Invalid dispute outcome: {}", s))
            })
            .transpose()?,
        refund_amount: row.get("refund_amount"),
        resolved_by: parse_opt_uuid(row.get("resolved_by"), "resolved_by")?,
        resolved_at: parse_opt_timestamp(row.get("resolved_at"), "resolved_at")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn row_to_dispute_audit(row: &sqlx::sqlite::SqliteRow) -> Result<DisputeAuditEntry> {
    let id_str: String = row.get("id");
    let dispute_str: String = row.get("dispute_id");
    let action_str: String = row.get("action");
    let actor_str: String = row.get("actor_id");
    let details_json: String = row.get("details");
    let created_at_str: String = row.get("created_at");

    Ok(DisputeAuditEntry {
        id: parse_uuid(&id_str, "dispute audit id")?,
        dispute_id: parse_uuid(&dispute_str, "dispute id")?,
        action: DisputeAuditAction::from_str(&action_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid dispute audit action: {}", action_str))?,
        actor_id: parse_uuid(&actor_str, "actor id")?,
        details: serde_json::from_str(&details_json).context("Invalid dispute audit details")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
