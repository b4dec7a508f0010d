use anyhow::{Context, Result};
use sqlx::Row;

use crate::domain::{AuditAction, AuditEntry, BookingId, Performer, UserId, WithdrawalId};

use super::repository::{parse_opt_uuid, parse_timestamp, parse_uuid};
use super::{Repository, Tx};

/// Filter for querying the financial audit log.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub tutor_id: Option<UserId>,
    pub booking_id: Option<BookingId>,
    pub withdrawal_id: Option<WithdrawalId>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl Repository {
    /// List audit entries in insertion order, with optional filters.
    pub async fn list_audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut query = String::from(
            "SELECT id, action, tutor_id, booking_id, withdrawal_id, amount, performed_by, actor_id, metadata, created_at FROM financial_audit_log WHERE 1=1",
        );

        // Collect all string bindings first so they live long enough
        let tutor_str = filter.tutor_id.map(|id| id.to_string());
        let booking_str = filter.booking_id.map(|id| id.to_string());
        let withdrawal_str = filter.withdrawal_id.map(|id| id.to_string());

        if tutor_str.is_some() {
            query.push_str(" AND tutor_id = ?");
        }
        if booking_str.is_some() {
            query.push_str(" AND booking_id = ?");
        }
        if withdrawal_str.is_some() {
            query.push_str(" AND withdrawal_id = ?");
        }
        if filter.action.is_some() {
            query.push_str(" AND action = ?");
        }

        query.push_str(" ORDER BY sequence");

        if let Some(lim) = filter.limit {
            query.push_str(&format!(" LIMIT {}", lim));
        }

        let mut sql_query = sqlx::query(&query);
        if let Some(ref s) = tutor_str {
            sql_query = sql_query.bind(s);
        }
        if let Some(ref s) = booking_str {
            sql_query = sql_query.bind(s);
        }
        if let Some(ref s) = withdrawal_str {
            sql_query = sql_query.bind(s);
        }
        if let Some(action) = filter.action {
            sql_query = sql_query.bind(action.as_str());
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to list audit entries")?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    pub async fn count_audit_entries(&self, action: AuditAction, booking_id: BookingId) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM financial_audit_log WHERE action = ? AND booking_id = ?",
        )
        .bind(action.as_str())
        .bind(booking_id.to_string())
        .fetch_one(self.pool())
        .await
        .context("Failed to count audit entries")?;
        Ok(row.get("count"))
    }
}

impl Tx {
    /// Append to the financial audit log. There is no update or delete path.
    pub async fn append_audit(&mut self, entry: &AuditEntry) -> Result<()> {
        entry.validate()?;
        sqlx::query(
            r#"
            INSERT INTO financial_audit_log (id, action, tutor_id, booking_id, withdrawal_id, amount, performed_by, actor_id, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.action.as_str())
        .bind(entry.tutor_id.map(|id| id.to_string()))
        .bind(entry.booking_id.map(|id| id.to_string()))
        .bind(entry.withdrawal_id.map(|id| id.to_string()))
        .bind(entry.amount)
        .bind(entry.performed_by.as_str())
        .bind(entry.performed_by.actor_id().map(|id| id.to_string()))
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *self.inner)
        .await
        .context("Failed to append audit entry")?;
        Ok(())
    }
}

fn row_to_audit_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
    let id_str: String = row.get("id");
    let action_str: String = row.get("action");
    let performed_by_str: String = row.get("performed_by");
    let metadata_json: String = row.get("metadata");
    let created_at_str: String = row.get("created_at");

    Ok(AuditEntry {
        id: parse_uuid(&id_str, "audit entry id")?,
        action: AuditAction::from_str(&action_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid audit action: {}", action_str))?,
        tutor_id: parse_opt_uuid(row.get("tutor_id"), "tutor id")?,
        booking_id: parse_opt_uuid(row.get("booking_id"), "booking id")?,
        withdrawal_id: parse_opt_uuid(row.get("withdrawal_id"), "withdrawal id")?,
        amount: row.get("amount"),
        performed_by: Performer::from_parts(
            &performed_by_str,
            parse_opt_uuid(row.get("actor_id"), "actor id")?,
        )?,
        metadata: serde_json::from_str(&metadata_json).context("Invalid audit metadata")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
