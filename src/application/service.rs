use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    Account, AccountHolder, AccountId, Bank, BankId, BasisPoints, Branch, BranchId, Cents,
    Customer, CustomerId, DEFAULT_INTEREST_RATE, HolderRole, Loan, LoanId, LoanPayment,
    Reconciliation, Transaction, reconcile,
};
use crate::storage::{Inserted, Repository, StoreOptions};

use super::{AccountMovement, Ledger, LedgerError, Repayment};

/// Application service providing high-level operations for the bank.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct BankService {
    repo: Repository,
    ledger: Ledger<Repository>,
}

/// A bank together with its branches
#[derive(Debug, Clone, Serialize)]
pub struct BankInfo {
    pub bank: Bank,
    pub branches: Vec<Branch>,
}

/// A branch with its bank and registered customers
#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub branch: Branch,
    pub bank: Bank,
    pub customers: Vec<Customer>,
}

/// A customer with the accounts they hold and their loans (newest first)
#[derive(Debug, Clone, Serialize)]
pub struct CustomerInfo {
    pub customer: Customer,
    pub accounts: Vec<(Account, HolderRole)>,
    pub loans: Vec<Loan>,
}

/// Result of opening a savings account
#[derive(Debug, Clone, Serialize)]
pub struct OpenedAccount {
    pub account: Account,
    pub holder: AccountHolder,
}

/// Detailed account information
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub account: Account,
    pub holders: Vec<AccountHolder>,
}

/// A loan with its repayment history (newest first)
#[derive(Debug, Clone, Serialize)]
pub struct LoanInfo {
    pub loan: Loan,
    pub payments: Vec<LoanPayment>,
}

/// Interest due over one year on a loan's pending amount
#[derive(Debug, Clone, Serialize)]
pub struct InterestQuote {
    pub loan_id: LoanId,
    pub interest_rate: BasisPoints,
    pub pending_amount: Cents,
    pub yearly_interest: Cents,
    pub calculated_at: DateTime<Utc>,
}

impl BankService {
    /// Create a new bank service over the given repository.
    pub fn new(repo: Repository) -> Self {
        let ledger = Ledger::new(repo.clone());
        Self { repo, ledger }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, options: StoreOptions) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url, options).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, options: StoreOptions) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url, options).await?;
        Ok(Self::new(repo))
    }

    pub fn ledger(&self) -> &Ledger<Repository> {
        &self.ledger
    }

    // ========================
    // Banks and branches
    // ========================

    pub async fn create_bank(&self, name: String) -> Result<Bank, LedgerError> {
        let bank = Bank::new(name);
        self.repo.save_bank(&bank).await?;
        tracing::info!(bank = %bank.id, name = %bank.name, "bank created");
        Ok(bank)
    }

    pub async fn get_bank(&self, id: BankId) -> Result<BankInfo, LedgerError> {
        let bank = self
            .repo
            .get_bank(id)
            .await?
            .ok_or(LedgerError::BankNotFound(id))?;
        let branches = self.repo.list_branches(id).await?;
        Ok(BankInfo { bank, branches })
    }

    pub async fn list_banks(&self) -> Result<Vec<Bank>, LedgerError> {
        Ok(self.repo.list_banks().await?)
    }

    pub async fn create_branch(
        &self,
        bank_id: BankId,
        name: String,
        address: Option<String>,
    ) -> Result<Branch, LedgerError> {
        if self.repo.get_bank(bank_id).await?.is_none() {
            return Err(LedgerError::BankNotFound(bank_id));
        }

        let mut branch = Branch::new(bank_id, name);
        if let Some(address) = address {
            branch = branch.with_address(address);
        }

        self.repo.save_branch(&branch).await?;
        Ok(branch)
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<BranchInfo, LedgerError> {
        let branch = self
            .repo
            .get_branch(id)
            .await?
            .ok_or(LedgerError::BranchNotFound(id))?;
        let bank = self
            .repo
            .get_bank(branch.bank_id)
            .await?
            .ok_or(LedgerError::BankNotFound(branch.bank_id))?;
        let customers = self.repo.list_customers(id).await?;
        Ok(BranchInfo {
            branch,
            bank,
            customers,
        })
    }

    // ========================
    // Customers
    // ========================

    /// Register a customer at a branch. Emails are unique across the bank.
    pub async fn register_customer(
        &self,
        branch_id: BranchId,
        name: String,
        email: String,
        phone: Option<String>,
    ) -> Result<Customer, LedgerError> {
        if self.repo.get_branch(branch_id).await?.is_none() {
            return Err(LedgerError::BranchNotFound(branch_id));
        }
        let taken = || LedgerError::AlreadyExists(format!("Customer with email {}", email));
        if self.repo.get_customer_by_email(&email).await?.is_some() {
            return Err(taken());
        }

        let mut customer = Customer::new(branch_id, name, email.clone());
        if let Some(phone) = phone {
            customer = customer.with_phone(phone);
        }

        // A concurrent registration can still win the race past the check above
        if self.repo.save_customer(&customer).await? == Inserted::Duplicate {
            return Err(taken());
        }
        tracing::info!(customer = %customer.id, branch = %branch_id, "customer registered");
        Ok(customer)
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Customer, LedgerError> {
        self.repo
            .get_customer(id)
            .await?
            .ok_or(LedgerError::CustomerNotFound(id))
    }

    /// A customer with every account they hold and every loan they took.
    pub async fn get_customer_info(&self, id: CustomerId) -> Result<CustomerInfo, LedgerError> {
        let customer = self.get_customer(id).await?;
        let accounts = self.repo.list_accounts_for_customer(id).await?;
        let loans = self.repo.list_loans_for_customer(id).await?;
        Ok(CustomerInfo {
            customer,
            accounts,
            loans,
        })
    }

    pub async fn list_customers(&self, branch_id: BranchId) -> Result<Vec<Customer>, LedgerError> {
        if self.repo.get_branch(branch_id).await?.is_none() {
            return Err(LedgerError::BranchNotFound(branch_id));
        }
        Ok(self.repo.list_customers(branch_id).await?)
    }

    // ========================
    // Savings accounts
    // ========================

    /// Open an empty savings account held by `customer_id`.
    pub async fn open_account(
        &self,
        customer_id: CustomerId,
        role: HolderRole,
    ) -> Result<OpenedAccount, LedgerError> {
        self.get_customer(customer_id).await?;

        let account = Account::open();
        let holder = AccountHolder::new(customer_id, account.id, role);
        self.repo.open_account(&account, &holder).await?;

        tracing::info!(account = %account.id, customer = %customer_id, role = %role, "account opened");
        Ok(OpenedAccount { account, holder })
    }

    /// Link another customer to an existing account.
    pub async fn add_account_holder(
        &self,
        account_id: AccountId,
        customer_id: CustomerId,
        role: HolderRole,
    ) -> Result<AccountHolder, LedgerError> {
        self.get_account(account_id).await?;
        self.get_customer(customer_id).await?;

        let linked = || {
            LedgerError::AlreadyExists(format!(
                "Holder link between customer {} and account {}",
                customer_id, account_id
            ))
        };
        if self.repo.get_holder(customer_id, account_id).await?.is_some() {
            return Err(linked());
        }

        let holder = AccountHolder::new(customer_id, account_id, role);
        if self.repo.save_holder(&holder).await? == Inserted::Duplicate {
            return Err(linked());
        }
        Ok(holder)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub async fn get_account_info(&self, id: AccountId) -> Result<AccountInfo, LedgerError> {
        let account = self.get_account(id).await?;
        let holders = self.repo.list_holders(id).await?;
        Ok(AccountInfo { account, holders })
    }

    pub async fn account_holders(&self, id: AccountId) -> Result<Vec<AccountHolder>, LedgerError> {
        self.get_account(id).await?;
        Ok(self.repo.list_holders(id).await?)
    }

    pub async fn get_balance(&self, id: AccountId) -> Result<Cents, LedgerError> {
        Ok(self.get_account(id).await?.balance)
    }

    /// All transactions on an account, newest first.
    pub async fn transaction_history(
        &self,
        id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.get_account(id).await?;
        Ok(self.repo.list_transactions(id).await?)
    }

    /// Replay the transaction log and compare it with the stored balance.
    pub async fn verify_account(&self, id: AccountId) -> Result<Reconciliation, LedgerError> {
        let account = self.get_account(id).await?;
        let transactions = self.repo.list_transactions(id).await?;
        let report = reconcile(&account, &transactions);

        if !report.is_consistent() {
            tracing::warn!(
                account = %id,
                recorded = report.recorded_balance,
                computed = report.computed_balance,
                "account does not reconcile"
            );
        }
        Ok(report)
    }

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<AccountMovement, LedgerError> {
        self.ledger.deposit(account_id, amount).await
    }

    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<AccountMovement, LedgerError> {
        self.ledger.withdraw(account_id, amount).await
    }

    // ========================
    // Loans
    // ========================

    /// Originate a loan at the standard rate.
    pub async fn take_loan(
        &self,
        customer_id: CustomerId,
        loan_type: String,
        principal: Cents,
    ) -> Result<Loan, LedgerError> {
        let loan = Loan::originate(customer_id, loan_type, principal, DEFAULT_INTEREST_RATE)
            .map_err(|err| LedgerError::InvalidAmount(err.to_string()))?;
        self.get_customer(customer_id).await?;

        self.repo.insert_loan(&loan).await?;

        tracing::info!(
            loan = %loan.id,
            customer = %customer_id,
            principal,
            total_payable = loan.total_payable,
            "loan originated"
        );
        Ok(loan)
    }

    pub async fn get_loan(&self, id: LoanId) -> Result<Loan, LedgerError> {
        self.repo
            .get_loan(id)
            .await?
            .ok_or(LedgerError::LoanNotFound(id))
    }

    pub async fn get_loan_info(&self, id: LoanId) -> Result<LoanInfo, LedgerError> {
        let loan = self.get_loan(id).await?;
        let payments = self.repo.list_payments(id).await?;
        Ok(LoanInfo { loan, payments })
    }

    /// Loans taken by a customer, newest first.
    pub async fn customer_loans(&self, customer_id: CustomerId) -> Result<Vec<Loan>, LedgerError> {
        self.get_customer(customer_id).await?;
        Ok(self.repo.list_loans_for_customer(customer_id).await?)
    }

    /// Payments made on a loan, newest first.
    pub async fn loan_payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>, LedgerError> {
        self.get_loan(loan_id).await?;
        Ok(self.repo.list_payments(loan_id).await?)
    }

    pub async fn yearly_interest(&self, loan_id: LoanId) -> Result<InterestQuote, LedgerError> {
        let loan = self.get_loan(loan_id).await?;
        let yearly_interest = loan.yearly_interest().ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "interest on {} overflows",
                loan.pending_amount
            ))
        })?;
        Ok(InterestQuote {
            loan_id,
            interest_rate: loan.interest_rate,
            pending_amount: loan.pending_amount,
            yearly_interest,
            calculated_at: Utc::now(),
        })
    }

    pub async fn repay_loan(
        &self,
        loan_id: LoanId,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Repayment, LedgerError> {
        self.ledger.repay_loan(loan_id, account_id, amount).await
    }
}
