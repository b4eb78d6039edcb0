use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection};

use crate::domain::{Account, AccountId, CustomerId, Loan, LoanId, LoanPayment, Transaction};

use super::repository::{SELECT_ACCOUNT_SQL, SELECT_LOAN_SQL};
use super::{LedgerStore, Repository, StoreError, StoreResult, UnitOfWork};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[async_trait]
impl LedgerStore for Repository {
    type Unit = SqliteUnit;

    /// Start an immediate transaction on a dedicated connection.
    ///
    /// SQLite reserves the database for writing at `BEGIN IMMEDIATE`, so every
    /// row read afterwards is held exclusively until commit or rollback.
    async fn begin(&self) -> StoreResult<SqliteUnit> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .map_err(|e| classify(e, "acquire a database connection"))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify(e, "begin a write transaction"))?;

        tracing::trace!("sqlite unit of work started");
        Ok(SqliteUnit {
            conn: Some(conn),
            finished: false,
        })
    }
}

/// A `BEGIN IMMEDIATE` transaction on one pooled connection.
pub struct SqliteUnit {
    conn: Option<PoolConnection<Sqlite>>,
    finished: bool,
}

impl SqliteUnit {
    fn conn(&mut self) -> StoreResult<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("unit of work already finished")))
    }

    async fn end(mut self, statement: &'static str) -> StoreResult<()> {
        sqlx::query(statement)
            .execute(self.conn()?)
            .await
            .map_err(|e| classify(e, statement))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteUnit {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.finished {
                // Closing the connection discards the open transaction instead of
                // handing it back to the pool mid-flight.
                tracing::debug!("sqlite unit of work dropped without commit, discarding");
                drop(conn.detach());
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn lock_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(SELECT_ACCOUNT_SQL)
            .bind(id.to_string())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| classify(e, "lock account"))?;

        Ok(row.as_ref().map(Repository::row_to_account).transpose()?)
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        let result = sqlx::query("UPDATE accounts SET balance_cents = ? WHERE id = ?")
            .bind(account.balance)
            .bind(account.id.to_string())
            .execute(self.conn()?)
            .await
            .map_err(|e| classify(e, "save account"))?;

        if result.rows_affected() != 1 {
            return Err(anyhow::anyhow!("Account {} vanished during update", account.id).into());
        }
        Ok(())
    }

    async fn append_transaction(&mut self, transaction: &mut Transaction) -> StoreResult<()> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| classify(e, "get next transaction sequence"))?;
        transaction.sequence = row.get("value");

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, account_id, kind, amount_cents, balance_cents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.sequence)
        .bind(transaction.account_id.to_string())
        .bind(transaction.kind.as_str())
        .bind(transaction.amount)
        .bind(transaction.balance)
        .bind(transaction.created_at.to_rfc3339())
        .execute(self.conn()?)
        .await
        .map_err(|e| classify(e, "append transaction"))?;
        Ok(())
    }

    async fn lock_loan(&mut self, id: LoanId) -> StoreResult<Option<Loan>> {
        let row = sqlx::query(SELECT_LOAN_SQL)
            .bind(id.to_string())
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| classify(e, "lock loan"))?;

        Ok(row.as_ref().map(Repository::row_to_loan).transpose()?)
    }

    async fn save_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE loans SET pending_cents = ?, status = ?, end_date = ? WHERE id = ?",
        )
        .bind(loan.pending_amount)
        .bind(loan.status.as_str())
        .bind(loan.end_date.map(|dt| dt.to_rfc3339()))
        .bind(loan.id.to_string())
        .execute(self.conn()?)
        .await
        .map_err(|e| classify(e, "save loan"))?;

        if result.rows_affected() != 1 {
            return Err(anyhow::anyhow!("Loan {} vanished during update", loan.id).into());
        }
        Ok(())
    }

    async fn append_payment(&mut self, payment: &LoanPayment) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO loan_payments (id, loan_id, amount_cents, payment_date) VALUES (?, ?, ?, ?)",
        )
        .bind(payment.id.to_string())
        .bind(payment.loan_id.to_string())
        .bind(payment.amount)
        .bind(payment.payment_date.to_rfc3339())
        .execute(self.conn()?)
        .await
        .map_err(|e| classify(e, "append loan payment"))?;
        Ok(())
    }

    async fn is_account_holder(
        &mut self,
        customer_id: CustomerId,
        account_id: AccountId,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM account_holders WHERE customer_id = ? AND account_id = ?",
        )
        .bind(customer_id.to_string())
        .bind(account_id.to_string())
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| classify(e, "check account holder"))?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    async fn commit(self) -> StoreResult<()> {
        self.end("COMMIT").await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.end("ROLLBACK").await
    }
}

/// Busy/locked database errors and pool timeouts mean another writer held
/// the database for longer than the lock timeout.
fn classify(err: sqlx::Error, action: &str) -> StoreError {
    let contended = match &err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    };

    if contended {
        StoreError::LockTimeout(format!("database ({})", action))
    } else {
        StoreError::Backend(
            anyhow::Error::new(err).context(format!("Failed to {}", action)),
        )
    }
}

