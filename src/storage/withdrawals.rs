use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::{
    BankSnapshot, Cents, UserId, WithdrawalDeduction, WithdrawalId, WithdrawalRequest,
    WithdrawalStatus,
};

use super::repository::{
    WriteOutcome, is_unique_violation, parse_opt_timestamp, parse_opt_uuid, parse_timestamp,
    parse_uuid,
};
use super::{Repository, Tx};

const WITHDRAWAL_COLUMNS: &str = "id, tutor_id, amount, status, account_holder, masked_account_number, bank_name, ifsc, requested_at, processed_by, processed_at, paid_at, transaction_ref, note";

/// A conditional status change on one withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawalTransition<'a> {
    pub id: WithdrawalId,
    pub from: WithdrawalStatus,
    pub to: WithdrawalStatus,
    pub admin_id: UserId,
    pub transaction_ref: Option<&'a str>,
    pub note: Option<&'a str>,
}

impl Repository {
    // ========================
    // Withdrawal reads
    // ========================

    pub async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawal_requests WHERE id = ?",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch withdrawal request")?;

        row.as_ref().map(row_to_withdrawal).transpose()
    }

    pub async fn find_pending_withdrawal(&self, tutor_id: UserId) -> Result<Option<WithdrawalRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM withdrawal_requests WHERE tutor_id = ? AND status = 'pending'",
            WITHDRAWAL_COLUMNS
        ))
        .bind(tutor_id.to_string())
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch pending withdrawal")?;

        row.as_ref().map(row_to_withdrawal).transpose()
    }

    /// List withdrawal requests with optional filters, oldest first.
    pub async fn list_withdrawals(
        &self,
        tutor_id: Option<UserId>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<WithdrawalRequest>> {
        let mut query = format!("SELECT {} FROM withdrawal_requests WHERE 1=1", WITHDRAWAL_COLUMNS);

        let tutor_str = tutor_id.map(|id| id.to_string());

        if tutor_id.is_some() {
            query.push_str(" AND tutor_id = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY requested_at");

        let mut sql_query = sqlx::query(&query);
        if let Some(ref tid) = tutor_str {
            sql_query = sql_query.bind(tid);
        }
        if let Some(status) = status {
            sql_query = sql_query.bind(status.as_str());
        }

        let rows = sql_query
            .fetch_all(self.pool())
            .await
            .context("Failed to list withdrawal requests")?;

        rows.iter().map(row_to_withdrawal).collect()
    }

    /// Total of all approved withdrawal deductions for a tutor.
    pub async fn sum_deductions(&self, tutor_id: UserId) -> Result<Cents> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total FROM withdrawal_deductions WHERE tutor_id = ?",
        )
        .bind(tutor_id.to_string())
        .fetch_one(self.pool())
        .await
        .context("Failed to sum withdrawal deductions")?;

        Ok(row.get("total"))
    }

    pub async fn list_deductions_for_tutor(&self, tutor_id: UserId) -> Result<Vec<WithdrawalDeduction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, withdrawal_id, tutor_id, amount, created_at
            FROM withdrawal_deductions
            WHERE tutor_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(tutor_id.to_string())
        .fetch_all(self.pool())
        .await
        .context("Failed to list withdrawal deductions")?;

        rows.iter()
            .map(|row| {
                let id_str: String = row.get("id");
                let withdrawal_str: String = row.get("withdrawal_id");
                let tutor_str: String = row.get("tutor_id");
                let created_at_str: String = row.get("created_at");
                Ok(WithdrawalDeduction {
                    id: parse_uuid(&id_str, "deduction id")?,
                    withdrawal_id: parse_uuid(&withdrawal_str, "withdrawal id")?,
                    tutor_id: parse_uuid(&tutor_str, "tutor id")?,
                    amount: row.get("amount"),
                    created_at: parse_timestamp(&created_at_str, "created_at")?,
                })
            })
            .collect()
    }
}

impl Tx {
    /// Insert a pending request. `Duplicate` if the tutor already has one pending.
    pub async fn insert_withdrawal(&mut self, request: &WithdrawalRequest) -> Result<WriteOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO withdrawal_requests (id, tutor_id, amount, status, account_holder, masked_account_number, bank_name, ifsc, requested_at, processed_by, processed_at, paid_at, transaction_ref, note)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.tutor_id.to_string())
        .bind(request.amount)
        .bind(request.status.as_str())
        .bind(&request.bank_snapshot.account_holder)
        .bind(&request.bank_snapshot.masked_account_number)
        .bind(&request.bank_snapshot.bank_name)
        .bind(&request.bank_snapshot.ifsc)
        .bind(request.requested_at.to_rfc3339())
        .bind(&request.note)
        .execute(&mut *self.inner)
        .await;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Duplicate),
            Err(err) => Err(err).context("Failed to save withdrawal request"),
        }
    }

    /// Apply a transition keyed on the request's current status.
    /// Returns the updated request, or `None` if it was not in `from`.
    pub async fn transition_withdrawal(
        &mut self,
        transition: WithdrawalTransition<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<WithdrawalRequest>> {
        let now_str = now.to_rfc3339();
        let (processed_at, paid_at) = match transition.to {
            WithdrawalStatus::Paid => (None, Some(now_str.as_str())),
            _ => (Some(now_str.as_str()), None),
        };

        let sql = format!(
            r#"
            UPDATE withdrawal_requests
            SET status = ?,
                processed_by = CASE WHEN ? IS NOT NULL THEN ? ELSE processed_by END,
                processed_at = COALESCE(?, processed_at),
                paid_at = COALESCE(?, paid_at),
                transaction_ref = COALESCE(?, transaction_ref),
                note = COALESCE(?, note)
            WHERE id = ? AND status = ?
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        );

        let admin_str = transition.admin_id.to_string();
        let row = sqlx::query(&sql)
            .bind(transition.to.as_str())
            .bind(processed_at)
            .bind(&admin_str)
            .bind(processed_at)
            .bind(paid_at)
            .bind(transition.transaction_ref)
            .bind(transition.note)
            .bind(transition.id.to_string())
            .bind(transition.from.as_str())
            .fetch_optional(&mut *self.inner)
            .await
            .context("Failed to update withdrawal request")?;

        row.as_ref().map(row_to_withdrawal).transpose()
    }

    /// Record an immutable deduction. There is no update or delete path.
    pub async fn insert_deduction(&mut self, deduction: &WithdrawalDeduction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawal_deductions (id, withdrawal_id, tutor_id, amount, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(deduction.id.to_string())
        .bind(deduction.withdrawal_id.to_string())
        .bind(deduction.tutor_id.to_string())
        .bind(deduction.amount)
        .bind(deduction.created_at.to_rfc3339())
        .execute(&mut *self.inner)
        .await
        .context("Failed to insert withdrawal deduction")?;
        Ok(())
    }
}

fn row_to_withdrawal(row: &sqlx::sqlite::SqliteRow) -> Result<WithdrawalRequest> {
    let id_str: String = row.get("id");
    let tutor_str: String = row.get("tutor_id");
    let status_str: String = row.get("status");
    let requested_at_str: String = row.get("requested_at");

    Ok(WithdrawalRequest {
        id: parse_uuid(&id_str, "withdrawal id")?,
        tutor_id: parse_uuid(&tutor_str, "tutor id")?,
        amount: row.get("amount"),
        status: WithdrawalStatus::from_str(&status_str)
            .ok_or_else(|| anyhow::anyhow!("Invalid withdrawal status: {}", status_str))?,
        bank_snapshot: BankSnapshot {
            account_holder: row.get("account_holder"),
            masked_account_number: row.get("masked_account_number"),
            bank_name: row.get("bank_name"),
            ifsc: row.get("ifsc"),
        },
        requested_at: parse_timestamp(&requested_at_str, "requested_at")?,
        processed_by: parse_opt_uuid(row.get("processed_by"), "processed_by")?,
        processed_at: parse_opt_timestamp(row.get("processed_at"), "processed_at")?,
        paid_at: parse_opt_timestamp(row.get("paid_at"), "paid_at")?,
        transaction_ref: row.get("transaction_ref"),
        note: row.get("note"),
    })
}
