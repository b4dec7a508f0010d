use anyhow::Result;
use async_trait::async_trait;

use crate::application::{BankDetailsStore, PlatformSettings};
use crate::domain::{BankSnapshot, BasisPoints, Cents, UserId, mask_account_number};

use super::Repository;

#[async_trait]
impl PlatformSettings for Repository {
    async fn commission_rate(&self) -> Result<BasisPoints> {
        self.get_platform_settings()
            .await?
            .map(|s| s.commission_rate)
            .ok_or_else(|| anyhow::anyhow!("Platform settings have not been initialised"))
    }

    async fn min_withdrawal_amount(&self) -> Result<Cents> {
        self.get_platform_settings()
            .await?
            .map(|s| s.min_withdrawal_amount)
            .ok_or_else(|| anyhow::anyhow!("Platform settings have not been initialised"))
    }
}

#[async_trait]
impl BankDetailsStore for Repository {
    async fn masked_bank_details(&self, tutor_id: UserId) -> Result<Option<BankSnapshot>> {
        Ok(self
            .get_bank_account(tutor_id)
            .await?
            .map(|account| BankSnapshot {
                account_holder: account.account_holder,
                masked_account_number: mask_account_number(&account.account_number),
                bank_name: account.bank_name,
                ifsc: account.ifsc,
            }))
    }

    async fn has_bank_details(&self, tutor_id: UserId) -> Result<bool> {
        Ok(self.get_bank_account(tutor_id).await?.is_some())
    }
}
