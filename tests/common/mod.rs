// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bankbook::application::BankService;
use bankbook::domain::{AccountId, BranchId, CustomerId, HolderRole};
use bankbook::storage::StoreOptions;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(BankService, TempDir)> {
    test_service_with(StoreOptions::default()).await
}

pub async fn test_service_with(options: StoreOptions) -> Result<(BankService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = BankService::init(db_path.to_str().unwrap(), options).await?;
    Ok((service, temp_dir))
}

/// Test fixture: one bank, one branch, one customer with one empty account
pub struct Household {
    pub branch_id: BranchId,
    pub customer_id: CustomerId,
    pub account_id: AccountId,
}

impl Household {
    pub async fn create(service: &BankService) -> Result<Self> {
        Self::create_named(service, "Ada Lovelace", "ada@example.com").await
    }

    pub async fn create_named(service: &BankService, name: &str, email: &str) -> Result<Self> {
        let bank = service.create_bank("First Bank".into()).await?;
        let branch = service
            .create_branch(bank.id, "Main Street".into(), Some("1 Main St".into()))
            .await?;
        let customer = service
            .register_customer(branch.id, name.into(), email.into(), None)
            .await?;
        let opened = service
            .open_account(customer.id, HolderRole::PrimaryHolder)
            .await?;

        Ok(Self {
            branch_id: branch.id,
            customer_id: customer.id,
            account_id: opened.account.id,
        })
    }

    /// Same as `create`, with `balance` cents already deposited
    pub async fn funded(service: &BankService, balance: i64) -> Result<Self> {
        let household = Self::create(service).await?;
        service.deposit(household.account_id, balance).await?;
        Ok(household)
    }
}
