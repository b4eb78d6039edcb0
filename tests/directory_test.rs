mod common;

use std::sync::Arc;

use anyhow::Result;
use bankbook::application::{ErrorClass, LedgerError};
use bankbook::domain::HolderRole;
use common::{Household, test_service};
use uuid::Uuid;

#[tokio::test]
async fn test_bank_with_branches() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let bank = service.create_bank("First Bank".into()).await?;
    service
        .create_branch(bank.id, "Downtown".into(), Some("5 Market St".into()))
        .await?;
    service.create_branch(bank.id, "Airport".into(), None).await?;

    let info = service.get_bank(bank.id).await?;
    assert_eq!(info.bank.name, "First Bank");
    assert_eq!(info.branches.len(), 2);

    let banks = service.list_banks().await?;
    assert_eq!(banks.len(), 1);

    let missing = service
        .create_branch(Uuid::new_v4(), "Nowhere".into(), None)
        .await;
    assert!(matches!(missing, Err(LedgerError::BankNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_customer_email_is_unique() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;

    let duplicate = service
        .register_customer(
            household.branch_id,
            "Someone Else".into(),
            "ada@example.com".into(),
            None,
        )
        .await;
    let err = duplicate.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(_)));
    assert_eq!(err.class(), ErrorClass::Rejected);

    let customers = service.list_customers(household.branch_id).await?;
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].email, "ada@example.com");
    Ok(())
}

#[tokio::test]
async fn test_register_at_unknown_branch() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let result = service
        .register_customer(Uuid::new_v4(), "Ada".into(), "ada@example.com".into(), None)
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, LedgerError::BranchNotFound(_)));
    assert_eq!(err.class(), ErrorClass::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_open_account_links_holder() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;

    let info = service.get_account_info(household.account_id).await?;
    assert_eq!(info.account.balance, 0);
    assert_eq!(info.holders.len(), 1);
    assert_eq!(info.holders[0].customer_id, household.customer_id);
    assert_eq!(info.holders[0].role, HolderRole::PrimaryHolder);

    let missing = service
        .open_account(Uuid::new_v4(), HolderRole::PrimaryHolder)
        .await;
    assert!(matches!(missing, Err(LedgerError::CustomerNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_add_account_holder() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;
    let partner = service
        .register_customer(
            household.branch_id,
            "Grace Hopper".into(),
            "grace@example.com".into(),
            Some("555-0100".into()),
        )
        .await?;

    let holder = service
        .add_account_holder(household.account_id, partner.id, HolderRole::JointHolder)
        .await?;
    assert_eq!(holder.role, HolderRole::JointHolder);

    let holders = service.account_holders(household.account_id).await?;
    assert_eq!(holders.len(), 2);

    let duplicate = service
        .add_account_holder(household.account_id, partner.id, HolderRole::JointHolder)
        .await;
    assert!(matches!(duplicate, Err(LedgerError::AlreadyExists(_))));

    let unknown_account = service
        .add_account_holder(Uuid::new_v4(), partner.id, HolderRole::JointHolder)
        .await;
    assert!(matches!(unknown_account, Err(LedgerError::AccountNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_loans_are_listed_per_customer() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;

    service
        .take_loan(household.customer_id, "home".into(), 100_000)
        .await?;
    service
        .take_loan(household.customer_id, "car".into(), 20_000)
        .await?;

    let loans = service.customer_loans(household.customer_id).await?;
    assert_eq!(loans.len(), 2);
    assert!(loans.iter().all(|l| l.customer_id == household.customer_id));

    let info = service.get_loan_info(loans[0].id).await?;
    assert!(info.payments.is_empty());

    let zero = service
        .take_loan(household.customer_id, "home".into(), 0)
        .await;
    assert!(matches!(zero, Err(LedgerError::InvalidAmount(_))));

    let stranger = service
        .take_loan(Uuid::new_v4(), "home".into(), 1_000)
        .await;
    assert!(matches!(stranger, Err(LedgerError::CustomerNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_history_is_newest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;

    service.deposit(household.account_id, 1_000).await?;
    service.withdraw(household.account_id, 400).await?;
    service.deposit(household.account_id, 50).await?;

    let history = service.transaction_history(household.account_id).await?;
    let sequences: Vec<i64> = history.iter().map(|t| t.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(sequences, sorted);
    assert_eq!(history[0].balance, 650);
    Ok(())
}

#[tokio::test]
async fn test_reopening_an_existing_database() -> Result<()> {
    let temp = tempfile::TempDir::new()?;
    let path = temp.path().join("bank.db");
    let path = path.to_str().unwrap();

    let account_id = {
        let service =
            bankbook::BankService::init(path, bankbook::storage::StoreOptions::default()).await?;
        let household = Household::funded(&service, 7_500).await?;
        household.account_id
    };

    let service =
        bankbook::BankService::connect(path, bankbook::storage::StoreOptions::default()).await?;
    assert_eq!(service.get_balance(account_id).await?, 7_500);
    Ok(())
}

#[tokio::test]
async fn test_branch_shows_bank_and_customers() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;
    service
        .register_customer(
            household.branch_id,
            "Grace Hopper".into(),
            "grace@example.com".into(),
            None,
        )
        .await?;

    let info = service.get_branch(household.branch_id).await?;
    assert_eq!(info.branch.id, household.branch_id);
    assert_eq!(info.branch.name, "Main Street");
    assert_eq!(info.bank.id, info.branch.bank_id);
    assert_eq!(info.bank.name, "First Bank");
    // Customers are listed by name
    let names: Vec<&str> = info.customers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Ada Lovelace", "Grace Hopper"]);

    let missing = service.get_branch(Uuid::new_v4()).await;
    assert!(matches!(missing, Err(LedgerError::BranchNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_customer_info_lists_accounts_and_loans() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::funded(&service, 2_500).await?;
    let partner = Household::create_named(&service, "Grace Hopper", "grace@example.com").await?;
    service
        .add_account_holder(
            partner.account_id,
            household.customer_id,
            HolderRole::JointHolder,
        )
        .await?;
    let loan = service
        .take_loan(household.customer_id, "home".into(), 100_000)
        .await?;

    let info = service.get_customer_info(household.customer_id).await?;
    assert_eq!(info.customer.email, "ada@example.com");
    assert_eq!(info.accounts.len(), 2);
    let (own, own_role) = &info.accounts[0];
    assert_eq!(own.id, household.account_id);
    assert_eq!(own.balance, 2_500);
    assert_eq!(*own_role, HolderRole::PrimaryHolder);
    let (shared, shared_role) = &info.accounts[1];
    assert_eq!(shared.id, partner.account_id);
    assert_eq!(*shared_role, HolderRole::JointHolder);
    assert_eq!(info.loans.len(), 1);
    assert_eq!(info.loans[0].id, loan.id);

    // The partner only holds their own account and has no loans
    let partner_info = service.get_customer_info(partner.customer_id).await?;
    assert_eq!(partner_info.accounts.len(), 1);
    assert!(partner_info.loans.is_empty());

    let missing = service.get_customer_info(Uuid::new_v4()).await;
    assert!(matches!(missing, Err(LedgerError::CustomerNotFound(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_with_one_email() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&service);
        let branch_id = household.branch_id;
        handles.push(tokio::spawn(async move {
            service
                .register_customer(
                    branch_id,
                    format!("Twin {}", i),
                    "twin@example.com".into(),
                    None,
                )
                .await
        }));
    }

    let mut registered = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => registered += 1,
            Err(err) => {
                assert!(matches!(err, LedgerError::AlreadyExists(_)), "{:?}", err);
                assert_eq!(err.class(), ErrorClass::Rejected);
            }
        }
    }
    assert_eq!(registered, 1);
    assert_eq!(service.list_customers(household.branch_id).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_holder_links_for_one_pair() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let household = Household::create(&service).await?;
    let partner = Household::create_named(&service, "Grace Hopper", "grace@example.com").await?;
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let account_id = household.account_id;
        let customer_id = partner.customer_id;
        handles.push(tokio::spawn(async move {
            service
                .add_account_holder(account_id, customer_id, HolderRole::JointHolder)
                .await
        }));
    }

    let mut linked = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => linked += 1,
            Err(err) => assert!(matches!(err, LedgerError::AlreadyExists(_)), "{:?}", err),
        }
    }
    assert_eq!(linked, 1);
    assert_eq!(service.account_holders(household.account_id).await?.len(), 2);
    Ok(())
}
