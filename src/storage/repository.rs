use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::{
    BasisPoints, Cents, PricingRequest, PricingRequestId, PricingRequestStatus, Tutor, UserId,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_ORPHAN_CAPTURES};

/// Result of a write that may be rejected by a uniqueness constraint or a
/// status predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row was inserted or updated
    Applied,
    /// The conditional predicate matched no row
    Unchanged,
    /// A uniqueness constraint rejected the write
    Duplicate,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Platform-wide money settings, stored as a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSettingsRow {
    pub commission_rate: BasisPoints,
    pub min_withdrawal_amount: Cents,
}

/// Full payout account as stored; only ever leaves storage masked.
#[derive(Debug, Clone)]
pub struct BankAccount {
    pub tutor_id: UserId,
    pub account_holder: String,
    pub account_number: String,
    pub bank_name: Option<String>,
    pub ifsc: Option<String>,
}

/// Repository for persisting and querying bookings, escrow and payouts.
pub struct Repository {
    pool: SqlitePool,
}

/// A write transaction. Every money mutation and its audit entries are
/// committed together through one of these; dropping it rolls back.
pub struct Tx {
    pub(super) inner: Transaction<'static, Sqlite>,
}

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.inner
            .commit()
            .await
            .context("Failed to commit transaction")
    }
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        sqlx::query(MIGRATION_002_ORPHAN_CAPTURES)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start a write transaction.
    pub async fn begin(&self) -> Result<Tx> {
        let inner = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Tx { inner })
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================
    // Tutor operations
    // ========================

    /// Insert or update a tutor profile.
    pub async fn save_tutor(&self, tutor: &Tutor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tutors (id, display_name, hourly_rate)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, hourly_rate = excluded.hourly_rate
            "#,
        )
        .bind(tutor.id.to_string())
        .bind(&tutor.display_name)
        .bind(tutor.hourly_rate)
        .execute(&self.pool)
        .await
        .context("Failed to save tutor")?;
        Ok(())
    }

    pub async fn get_tutor(&self, id: UserId) -> Result<Option<Tutor>> {
        let row = sqlx::query("SELECT id, display_name, hourly_rate FROM tutors WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tutor")?;

        match row {
            Some(row) => {
                let id_str: String = row.get("id");
                Ok(Some(Tutor {
                    id: parse_uuid(&id_str, "tutor id")?,
                    display_name: row.get("display_name"),
                    hourly_rate: row.get("hourly_rate"),
                }))
            }
            None => Ok(None),
        }
    }

    // ========================
    // Pricing request operations
    // ========================

    pub async fn save_pricing_request(&self, request: &PricingRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pricing_requests (id, learner_id, budget, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.learner_id.to_string())
        .bind(request.budget)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save pricing request")?;
        Ok(())
    }

    pub async fn get_pricing_request(&self, id: PricingRequestId) -> Result<Option<PricingRequest>> {
        let row = sqlx::query(
            "SELECT id, learner_id, budget, status, created_at FROM pricing_requests WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch pricing request")?;

        match row {
            Some(row) => {
                let id_str: String = row.get("id");
                let learner_str: String = row.get("learner_id");
                let status_str: String = row.get("status");
                let created_at_str: String = row.get("created_at");
                Ok(Some(PricingRequest {
                    id: parse_uuid(&id_str, "pricing request id")?,
                    learner_id: parse_uuid(&learner_str, "learner id")?,
                    budget: row.get("budget"),
                    status: PricingRequestStatus::from_str(&status_str).ok_or_else(|| {
                        anyhow::anyhow!("Invalid pricing request status: {}", status_str)
                    })?,
                    created_at: parse_timestamp(&created_at_str, "created_at")?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Record that a tutor is interested in a learner's pricing request.
    pub async fn record_pricing_interest(
        &self,
        request_id: PricingRequestId,
        tutor_id: UserId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pricing_request_interests (request_id, tutor_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(request_id, tutor_id) DO NOTHING
            "#,
        )
        .bind(request_id.to_string())
        .bind(tutor_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record pricing interest")?;
        Ok(())
    }

    pub async fn has_pricing_interest(
        &self,
        request_id: PricingRequestId,
        tutor_id: UserId,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM pricing_request_interests WHERE request_id = ? AND tutor_id = ?
            ) AS present
            "#,
        )
        .bind(request_id.to_string())
        .bind(tutor_id.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to check pricing interest")?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    // ========================
    // Platform settings
    // ========================

    /// Insert the settings row if none exists yet. Existing values win.
    pub async fn seed_platform_settings(&self, defaults: PlatformSettingsRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_settings (id, commission_rate, min_withdrawal_amount, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(defaults.commission_rate)
        .bind(defaults.min_withdrawal_amount)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to seed platform settings")?;
        Ok(())
    }

    pub async fn get_platform_settings(&self) -> Result<Option<PlatformSettingsRow>> {
        let row = sqlx::query(
            "SELECT commission_rate, min_withdrawal_amount FROM platform_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch platform settings")?;

        Ok(row.map(|row| PlatformSettingsRow {
            commission_rate: row.get("commission_rate"),
            min_withdrawal_amount: row.get("min_withdrawal_amount"),
        }))
    }

    pub async fn update_platform_settings(&self, settings: PlatformSettingsRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_settings (id, commission_rate, min_withdrawal_amount, updated_at)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                commission_rate = excluded.commission_rate,
                min_withdrawal_amount = excluded.min_withdrawal_amount,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(settings.commission_rate)
        .bind(settings.min_withdrawal_amount)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to update platform settings")?;
        Ok(())
    }

    // ========================
    // Bank accounts
    // ========================

    pub async fn save_bank_account(&self, account: &BankAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tutor_bank_accounts (tutor_id, account_holder, account_number, bank_name, ifsc, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tutor_id) DO UPDATE SET
                account_holder = excluded.account_holder,
                account_number = excluded.account_number,
                bank_name = excluded.bank_name,
                ifsc = excluded.ifsc,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account.tutor_id.to_string())
        .bind(&account.account_holder)
        .bind(&account.account_number)
        .bind(&account.bank_name)
        .bind(&account.ifsc)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save bank account")?;
        Ok(())
    }

    pub async fn get_bank_account(&self, tutor_id: UserId) -> Result<Option<BankAccount>> {
        let row = sqlx::query(
            r#"
            SELECT tutor_id, account_holder, account_number, bank_name, ifsc
            FROM tutor_bank_accounts
            WHERE tutor_id = ?
            "#,
        )
        .bind(tutor_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch bank account")?;

        match row {
            Some(row) => {
                let tutor_str: String = row.get("tutor_id");
                Ok(Some(BankAccount {
                    tutor_id: parse_uuid(&tutor_str, "tutor id")?,
                    account_holder: row.get("account_holder"),
                    account_number: row.get("account_number"),
                    bank_name: row.get("bank_name"),
                    ifsc: row.get("ifsc"),
                }))
            }
            None => Ok(None),
        }
    }
}

impl Tx {
    /// Close an active pricing request. Closing twice is a no-op.
    pub async fn close_pricing_request(
        &mut self,
        id: PricingRequestId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE pricing_requests SET status = 'closed', closed_at = ? WHERE id = ? AND status = 'active'",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&mut *self.inner)
        .await
        .context("Failed to close pricing request")?;
        Ok(result.rows_affected() == 1)
    }
}

// ========================
// Row helpers
// ========================

pub(super) fn parse_uuid(value: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {}", what))
}

pub(super) fn parse_opt_uuid(value: Option<String>, what: &str) -> Result<Option<Uuid>> {
    value.map(|s| parse_uuid(&s, what)).transpose()
}

pub(super) fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {} timestamp", what))?
        .with_timezone(&Utc))
}

pub(super) fn parse_opt_timestamp(value: Option<String>, what: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, what)).transpose()
}

/// True if the error is a uniqueness constraint violation.
pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
