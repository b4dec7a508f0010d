use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::domain::{AuditEntry, Dispute, LedgerEntry, WithdrawalRequest};
use crate::storage::{AuditFilter, Repository};

/// Read-only snapshot of the money tables for offline review
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub ledger: Vec<LedgerEntry>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub disputes: Vec<Dispute>,
    pub audit_log: Vec<AuditEntry>,
}

/// Exporter for the escrow ledger and the financial audit log
pub struct Exporter<'a> {
    repo: &'a Repository,
}

impl<'a> Exporter<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Export the financial audit log to CSV, in insertion order
    pub async fn export_audit_csv<W: Write>(&self, filter: &AuditFilter, writer: W) -> Result<usize> {
        let entries = self.repo.list_audit_entries(filter).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "created_at",
            "action",
            "amount",
            "tutor_id",
            "booking_id",
            "withdrawal_id",
            "performed_by",
            "actor_id",
            "metadata",
        ])?;

        let mut count = 0;
        for entry in &entries {
            csv_writer.write_record(&[
                entry.id.to_string(),
                entry.created_at.to_rfc3339(),
                entry.action.as_str().to_string(),
                entry.amount.to_string(),
                opt_to_string(entry.tutor_id),
                opt_to_string(entry.booking_id),
                opt_to_string(entry.withdrawal_id),
                entry.performed_by.as_str().to_string(),
                opt_to_string(entry.performed_by.actor_id()),
                serde_json::to_string(&entry.metadata)?,
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export escrow ledger entries to CSV
    pub async fn export_ledger_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let entries = self.repo.list_all_ledger_entries().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "booking_id",
            "tutor_id",
            "amount",
            "status",
            "commission_rate_bps",
            "commission_amount",
            "created_at",
            "updated_at",
        ])?;

        let mut count = 0;
        for entry in &entries {
            csv_writer.write_record(&[
                entry.booking_id.to_string(),
                entry.tutor_id.to_string(),
                entry.amount.to_string(),
                entry.status.as_str().to_string(),
                entry.commission_rate.to_string(),
                entry.commission_amount.to_string(),
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export everything as one JSON document
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            ledger: self.repo.list_all_ledger_entries().await?,
            withdrawals: self.repo.list_withdrawals(None, None).await?,
            disputes: self.repo.list_disputes(None).await?,
            audit_log: self.repo.list_audit_entries(&AuditFilter::default()).await?,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}

fn opt_to_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
