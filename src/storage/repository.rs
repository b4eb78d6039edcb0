use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountHolder, AccountId, Bank, BankId, Branch, BranchId, Customer, CustomerId,
    HolderRole, Loan, LoanId, LoanPayment, LoanStatus, Transaction, TransactionKind,
};

use super::{MIGRATION_001_INITIAL, StoreOptions};

pub(super) const SELECT_ACCOUNT_SQL: &str =
    "SELECT id, balance_cents, created_at FROM accounts WHERE id = ?";

pub(super) const SELECT_LOAN_SQL: &str = r#"
    SELECT id, customer_id, loan_type, principal_cents, interest_rate_bp, total_payable_cents,
           pending_cents, status, start_date, end_date, created_at
    FROM loans
    WHERE id = ?
"#;

/// Outcome of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    Created,
    /// A row with the same unique key already exists
    Duplicate,
}

/// SQLite-backed storage for the directory and the ledger.
///
/// Plain reads and directory inserts go straight to the pool. Ledger
/// mutations go through [`LedgerStore::begin`](super::LedgerStore::begin).
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    options: StoreOptions,
}

impl Repository {
    pub fn new(pool: SqlitePool, options: StoreOptions) -> Self {
        Self { pool, options }
    }

    /// Connect to a SQLite database URL such as `sqlite:bank.db?mode=rwc`.
    ///
    /// Waiting for the database write lock and for a pooled connection are
    /// both bounded by the configured lock timeout.
    pub async fn connect(database_url: &str, options: StoreOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .foreign_keys(true)
            .busy_timeout(options.lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.lock_timeout)
            .connect_with(connect_options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool, options))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, options: StoreOptions) -> Result<Self> {
        let repo = Self::connect(database_url, options).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================
    // Banks and branches
    // ========================

    pub async fn save_bank(&self, bank: &Bank) -> Result<()> {
        sqlx::query("INSERT INTO banks (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bank.id.to_string())
            .bind(&bank.name)
            .bind(bank.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to save bank")?;
        Ok(())
    }

    pub async fn get_bank(&self, id: BankId) -> Result<Option<Bank>> {
        let row = sqlx::query("SELECT id, name, created_at FROM banks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch bank")?;

        row.as_ref().map(Self::row_to_bank).transpose()
    }

    pub async fn list_banks(&self) -> Result<Vec<Bank>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM banks ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list banks")?;

        rows.iter().map(Self::row_to_bank).collect()
    }

    pub async fn save_branch(&self, branch: &Branch) -> Result<()> {
        sqlx::query(
            "INSERT INTO branches (id, bank_id, name, address, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(branch.id.to_string())
        .bind(branch.bank_id.to_string())
        .bind(&branch.name)
        .bind(&branch.address)
        .bind(branch.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save branch")?;
        Ok(())
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<Option<Branch>> {
        let row = sqlx::query(
            "SELECT id, bank_id, name, address, created_at FROM branches WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch branch")?;

        row.as_ref().map(Self::row_to_branch).transpose()
    }

    pub async fn list_branches(&self, bank_id: BankId) -> Result<Vec<Branch>> {
        let rows = sqlx::query(
            "SELECT id, bank_id, name, address, created_at FROM branches WHERE bank_id = ? ORDER BY name",
        )
        .bind(bank_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list branches")?;

        rows.iter().map(Self::row_to_branch).collect()
    }

    // ========================
    // Customers and holders
    // ========================

    /// Insert a customer. A taken email comes back as [`Inserted::Duplicate`].
    pub async fn save_customer(&self, customer: &Customer) -> Result<Inserted> {
        let result = sqlx::query(
            r#"
            INSERT INTO customers (id, branch_id, name, email, phone, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(customer.id.to_string())
        .bind(customer.branch_id.to_string())
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(customer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        unique_insert(result).context("Failed to save customer")
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, branch_id, name, email, phone, created_at FROM customers WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch customer")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    pub async fn get_customer_by_email(&self, email: &str) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, branch_id, name, email, phone, created_at FROM customers WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch customer by email")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    pub async fn list_customers(&self, branch_id: BranchId) -> Result<Vec<Customer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, branch_id, name, email, phone, created_at
            FROM customers
            WHERE branch_id = ?
            ORDER BY name
            "#,
        )
        .bind(branch_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list customers")?;

        rows.iter().map(Self::row_to_customer).collect()
    }

    /// Insert a fresh account together with its first holder, atomically.
    pub async fn open_account(&self, account: &Account, holder: &AccountHolder) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to start transaction")?;

        sqlx::query("INSERT INTO accounts (id, balance_cents, created_at) VALUES (?, ?, ?)")
            .bind(account.id.to_string())
            .bind(account.balance)
            .bind(account.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .context("Failed to save account")?;

        sqlx::query(
            "INSERT INTO account_holders (customer_id, account_id, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(holder.customer_id.to_string())
        .bind(holder.account_id.to_string())
        .bind(holder.role.as_str())
        .bind(holder.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to save account holder")?;

        tx.commit().await.context("Failed to commit account")?;
        Ok(())
    }

    /// Link a customer to an account. An existing link comes back as
    /// [`Inserted::Duplicate`].
    pub async fn save_holder(&self, holder: &AccountHolder) -> Result<Inserted> {
        let result = sqlx::query(
            "INSERT INTO account_holders (customer_id, account_id, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(holder.customer_id.to_string())
        .bind(holder.account_id.to_string())
        .bind(holder.role.as_str())
        .bind(holder.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        unique_insert(result).context("Failed to save account holder")
    }

    pub async fn get_holder(
        &self,
        customer_id: CustomerId,
        account_id: AccountId,
    ) -> Result<Option<AccountHolder>> {
        let row = sqlx::query(
            r#"
            SELECT customer_id, account_id, role, created_at
            FROM account_holders
            WHERE customer_id = ? AND account_id = ?
            "#,
        )
        .bind(customer_id.to_string())
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account holder")?;

        row.as_ref().map(Self::row_to_holder).transpose()
    }

    pub async fn list_holders(&self, account_id: AccountId) -> Result<Vec<AccountHolder>> {
        let rows = sqlx::query(
            r#"
            SELECT customer_id, account_id, role, created_at
            FROM account_holders
            WHERE account_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list account holders")?;

        rows.iter().map(Self::row_to_holder).collect()
    }

    /// Accounts a customer holds, with the role they hold each one in.
    pub async fn list_accounts_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<(Account, HolderRole)>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.balance_cents, a.created_at, h.role
            FROM accounts a
            JOIN account_holders h ON h.account_id = a.id
            WHERE h.customer_id = ?
            ORDER BY h.created_at, a.id
            "#,
        )
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list customer accounts")?;

        rows.iter()
            .map(|row| -> Result<(Account, HolderRole)> {
                let role_str: String = row.get("role");
                let role = HolderRole::parse(&role_str)
                    .ok_or_else(|| anyhow::anyhow!("Invalid holder role: {}", role_str))?;
                Ok((Self::row_to_account(row)?, role))
            })
            .collect()
    }

    // ========================
    // Ledger reads
    // ========================

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(SELECT_ACCOUNT_SQL)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Transactions for an account, newest first.
    pub async fn list_transactions(&self, account_id: AccountId) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, account_id, kind, amount_cents, balance_cents, created_at
            FROM transactions
            WHERE account_id = ?
            ORDER BY sequence DESC
            "#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Insert a newly originated loan.
    pub async fn insert_loan(&self, loan: &Loan) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (id, customer_id, loan_type, principal_cents, interest_rate_bp,
                               total_payable_cents, pending_cents, status, start_date, end_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(loan.id.to_string())
        .bind(loan.customer_id.to_string())
        .bind(&loan.loan_type)
        .bind(loan.principal)
        .bind(loan.interest_rate)
        .bind(loan.total_payable)
        .bind(loan.pending_amount)
        .bind(loan.status.as_str())
        .bind(loan.start_date.to_rfc3339())
        .bind(loan.end_date.map(|dt| dt.to_rfc3339()))
        .bind(loan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save loan")?;
        Ok(())
    }

    pub async fn get_loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let row = sqlx::query(SELECT_LOAN_SQL)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch loan")?;

        row.as_ref().map(Self::row_to_loan).transpose()
    }

    /// Loans taken by a customer, newest first.
    pub async fn list_loans_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Loan>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, loan_type, principal_cents, interest_rate_bp, total_payable_cents,
                   pending_cents, status, start_date, end_date, created_at
            FROM loans
            WHERE customer_id = ?
            ORDER BY start_date DESC, rowid DESC
            "#,
        )
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loans")?;

        rows.iter().map(Self::row_to_loan).collect()
    }

    /// Payments made against a loan, newest first.
    pub async fn list_payments(&self, loan_id: LoanId) -> Result<Vec<LoanPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, loan_id, amount_cents, payment_date
            FROM loan_payments
            WHERE loan_id = ?
            ORDER BY payment_date DESC, rowid DESC
            "#,
        )
        .bind(loan_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loan payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    // ========================
    // Row mapping
    // ========================

    fn row_to_bank(row: &SqliteRow) -> Result<Bank> {
        Ok(Bank {
            id: parse_id(row, "id")?,
            name: row.get("name"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    fn row_to_branch(row: &SqliteRow) -> Result<Branch> {
        Ok(Branch {
            id: parse_id(row, "id")?,
            bank_id: parse_id(row, "bank_id")?,
            name: row.get("name"),
            address: row.get("address"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    fn row_to_customer(row: &SqliteRow) -> Result<Customer> {
        Ok(Customer {
            id: parse_id(row, "id")?,
            branch_id: parse_id(row, "branch_id")?,
            name: row.get("name"),
            email: row.get("email"),
            phone: row.get("phone"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    fn row_to_holder(row: &SqliteRow) -> Result<AccountHolder> {
        let role_str: String = row.get("role");
        Ok(AccountHolder {
            customer_id: parse_id(row, "customer_id")?,
            account_id: parse_id(row, "account_id")?,
            role: HolderRole::parse(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid holder role: {}", role_str))?,
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    pub(super) fn row_to_account(row: &SqliteRow) -> Result<Account> {
        Ok(Account {
            id: parse_id(row, "id")?,
            balance: row.get("balance_cents"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let kind_str: String = row.get("kind");
        Ok(Transaction {
            id: parse_id(row, "id")?,
            sequence: row.get("sequence"),
            account_id: parse_id(row, "account_id")?,
            kind: TransactionKind::parse(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount: row.get("amount_cents"),
            balance: row.get("balance_cents"),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    pub(super) fn row_to_loan(row: &SqliteRow) -> Result<Loan> {
        let status_str: String = row.get("status");
        let end_date_str: Option<String> = row.get("end_date");

        Ok(Loan {
            id: parse_id(row, "id")?,
            customer_id: parse_id(row, "customer_id")?,
            loan_type: row.get("loan_type"),
            principal: row.get("principal_cents"),
            interest_rate: row.get("interest_rate_bp"),
            total_payable: row.get("total_payable_cents"),
            pending_amount: row.get("pending_cents"),
            status: LoanStatus::parse(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid loan status: {}", status_str))?,
            start_date: parse_timestamp(row, "start_date")?,
            end_date: end_date_str
                .map(|s| DateTime::parse_from_rfc3339(&s))
                .transpose()
                .context("Invalid end_date timestamp")?
                .map(|dt| dt.with_timezone(&Utc)),
            created_at: parse_timestamp(row, "created_at")?,
        })
    }

    fn row_to_payment(row: &SqliteRow) -> Result<LoanPayment> {
        Ok(LoanPayment {
            id: parse_id(row, "id")?,
            loan_id: parse_id(row, "loan_id")?,
            amount: row.get("amount_cents"),
            payment_date: parse_timestamp(row, "payment_date")?,
        })
    }
}

fn unique_insert(
    result: std::result::Result<SqliteQueryResult, sqlx::Error>,
) -> std::result::Result<Inserted, sqlx::Error> {
    match result {
        Ok(_) => Ok(Inserted::Created),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(Inserted::Duplicate),
        Err(err) => Err(err),
    }
}

fn parse_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid {} value: {}", column, value))
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid {} timestamp: {}", column, value))?
        .with_timezone(&Utc))
}
