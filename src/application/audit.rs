use std::sync::Arc;

use crate::domain::AuditEntry;
use crate::storage::{AuditFilter, Repository};

use super::AppError;

/// Read and append access to the financial audit log.
///
/// Services write their audit entries inside the transaction that moves the
/// money; `record` is for entries that stand on their own.
pub struct AuditLog {
    repo: Arc<Repository>,
}

impl AuditLog {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn record(&self, entry: AuditEntry) -> Result<AuditEntry, AppError> {
        entry.validate()?;
        let mut tx = self.repo.begin().await?;
        tx.append_audit(&entry).await?;
        tx.commit().await?;

        tracing::debug!(action = %entry.action, amount = entry.amount, "audit entry recorded");
        Ok(entry)
    }

    pub async fn entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self.repo.list_audit_entries(filter).await?)
    }
}
