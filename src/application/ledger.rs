//! The ledger coordinator: the only code that moves money.
//!
//! Each operation runs inside one unit of work: lock, re-read, validate,
//! mutate, record, then commit. Any failure rolls the whole unit back, so a
//! rejected or failed operation leaves no trace.
//!
//! When an operation needs both a loan and an account, the loan is always
//! locked first.

use chrono::Utc;
use serde::Serialize;

use crate::domain::{
    Account, AccountId, Cents, Loan, LoanId, LoanPayment, Transaction, TransactionKind,
    invariants,
};
use crate::storage::{LedgerStore, UnitOfWork};

use super::LedgerError;

/// Result of a deposit or withdrawal.
#[derive(Debug, Clone, Serialize)]
pub struct AccountMovement {
    pub account: Account,
    pub transaction: Transaction,
}

/// Result of a loan repayment.
#[derive(Debug, Clone, Serialize)]
pub struct Repayment {
    pub loan: Loan,
    pub payment: LoanPayment,
    pub transaction: Transaction,
    pub account: Account,
}

pub struct Ledger<S> {
    store: S,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Credit `amount` to an account.
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<AccountMovement, LedgerError> {
        ensure_positive(amount)?;

        let mut unit = self.store.begin().await?;
        let outcome = credit(&mut unit, account_id, amount).await;
        let movement = finish(unit, outcome).await?;

        tracing::info!(
            account = %account_id,
            amount,
            balance = movement.account.balance,
            sequence = movement.transaction.sequence,
            "deposit committed"
        );
        Ok(movement)
    }

    /// Debit `amount` from an account if the balance covers it.
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<AccountMovement, LedgerError> {
        ensure_positive(amount)?;

        let mut unit = self.store.begin().await?;
        let outcome = debit(&mut unit, account_id, amount).await;
        let movement = finish(unit, outcome).await?;

        tracing::info!(
            account = %account_id,
            amount,
            balance = movement.account.balance,
            sequence = movement.transaction.sequence,
            "withdrawal committed"
        );
        Ok(movement)
    }

    /// Pay `amount` off a loan from one of the borrower's accounts.
    ///
    /// The account debit, its transaction, the loan update and the payment
    /// record are committed together.
    pub async fn repay_loan(
        &self,
        loan_id: LoanId,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Repayment, LedgerError> {
        ensure_positive(amount)?;

        let mut unit = self.store.begin().await?;
        let outcome = repay(&mut unit, loan_id, account_id, amount).await;
        let repayment = finish(unit, outcome).await?;

        tracing::info!(
            loan = %loan_id,
            account = %account_id,
            amount,
            pending = repayment.loan.pending_amount,
            status = %repayment.loan.status,
            "loan repayment committed"
        );
        Ok(repayment)
    }
}

fn ensure_positive(amount: Cents) -> Result<(), LedgerError> {
    if !invariants::is_positive_amount(amount) {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Commit on success, roll back on failure. The unit is consumed either way.
async fn finish<U: UnitOfWork, T>(
    unit: U,
    outcome: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match outcome {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::debug!(error = %err, "ledger operation rejected, rolling back");
            if let Err(rollback_err) = unit.rollback().await {
                // The unit discards its work on drop regardless
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn lock_account<U: UnitOfWork>(
    unit: &mut U,
    account_id: AccountId,
) -> Result<Account, LedgerError> {
    unit.lock_account(account_id)
        .await?
        .ok_or(LedgerError::AccountNotFound(account_id))
}

async fn credit<U: UnitOfWork>(
    unit: &mut U,
    account_id: AccountId,
    amount: Cents,
) -> Result<AccountMovement, LedgerError> {
    let mut account = lock_account(unit, account_id).await?;

    account.balance = account.balance.checked_add(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("deposit of {} would overflow the balance", amount))
    })?;
    unit.save_account(&account).await?;

    let mut transaction =
        Transaction::new(account.id, TransactionKind::Deposit, amount, account.balance);
    unit.append_transaction(&mut transaction).await?;

    Ok(AccountMovement {
        account,
        transaction,
    })
}

async fn debit<U: UnitOfWork>(
    unit: &mut U,
    account_id: AccountId,
    amount: Cents,
) -> Result<AccountMovement, LedgerError> {
    let account = lock_account(unit, account_id).await?;
    debit_locked(unit, account, amount).await
}

/// Debit an account the unit already holds.
async fn debit_locked<U: UnitOfWork>(
    unit: &mut U,
    mut account: Account,
    amount: Cents,
) -> Result<AccountMovement, LedgerError> {
    if !invariants::has_sufficient_balance(account.balance, amount) {
        return Err(LedgerError::InsufficientBalance {
            account_id: account.id,
            balance: account.balance,
            requested: amount,
        });
    }

    account.balance -= amount;
    unit.save_account(&account).await?;

    let mut transaction =
        Transaction::new(account.id, TransactionKind::Withdraw, amount, account.balance);
    unit.append_transaction(&mut transaction).await?;

    Ok(AccountMovement {
        account,
        transaction,
    })
}

async fn repay<U: UnitOfWork>(
    unit: &mut U,
    loan_id: LoanId,
    account_id: AccountId,
    amount: Cents,
) -> Result<Repayment, LedgerError> {
    // Loan before account, always
    let mut loan = unit
        .lock_loan(loan_id)
        .await?
        .ok_or(LedgerError::LoanNotFound(loan_id))?;

    loan.check_payment(amount)
        .map_err(|err| LedgerError::from_loan(loan_id, err))?;

    let account = lock_account(unit, account_id).await?;
    if !unit.is_account_holder(loan.customer_id, account_id).await? {
        return Err(LedgerError::AccountNotLinkedToCustomer {
            account_id,
            customer_id: loan.customer_id,
        });
    }

    let AccountMovement {
        account,
        transaction,
    } = debit_locked(unit, account, amount).await?;

    let paid_at = Utc::now();
    loan.apply_payment(amount, paid_at)
        .map_err(|err| LedgerError::from_loan(loan_id, err))?;
    unit.save_loan(&loan).await?;

    let payment = LoanPayment::new(loan.id, amount, paid_at);
    unit.append_payment(&payment).await?;

    Ok(Repayment {
        loan,
        payment,
        transaction,
        account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountHolder, DEFAULT_INTEREST_RATE, HolderRole, LoanStatus};
    use crate::storage::{Fault, MemoryStore};
    use uuid::Uuid;

    fn ledger_with_account(balance: Cents) -> (Ledger<MemoryStore>, AccountId) {
        let store = MemoryStore::new();
        let mut account = Account::open();
        account.balance = balance;
        let id = account.id;
        store.insert_account(account);
        (Ledger::new(store), id)
    }

    /// A loan of `principal` at 12% owned by a customer who holds `account_id`.
    fn add_loan(ledger: &Ledger<MemoryStore>, account_id: AccountId, principal: Cents) -> LoanId {
        let customer_id = Uuid::new_v4();
        let loan = Loan::originate(customer_id, "home", principal, DEFAULT_INTEREST_RATE).unwrap();
        let id = loan.id;
        ledger.store().insert_loan(loan);
        ledger.store().link_holder(&AccountHolder::new(
            customer_id,
            account_id,
            HolderRole::PrimaryHolder,
        ));
        id
    }

    #[tokio::test]
    async fn test_deposit_records_snapshot() {
        let (ledger, id) = ledger_with_account(0);

        let movement = ledger.deposit(id, 10_000).await.unwrap();

        assert_eq!(movement.account.balance, 10_000);
        assert_eq!(movement.transaction.kind, TransactionKind::Deposit);
        assert_eq!(movement.transaction.amount, 10_000);
        assert_eq!(movement.transaction.balance, 10_000);
        assert_eq!(ledger.store().account(id).await.unwrap().balance, 10_000);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let (ledger, id) = ledger_with_account(100);

        for amount in [0, -5] {
            assert!(matches!(
                ledger.deposit(id, amount).await,
                Err(LedgerError::InvalidAmount(_))
            ));
            assert!(matches!(
                ledger.withdraw(id, amount).await,
                Err(LedgerError::InvalidAmount(_))
            ));
        }
        assert!(ledger.store().transactions(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_deposit_overflow_is_rejected() {
        let (ledger, id) = ledger_with_account(i64::MAX - 1);

        let result = ledger.deposit(id, 2).await;
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
        assert_eq!(ledger.store().account(id).await.unwrap().balance, i64::MAX - 1);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (ledger, _) = ledger_with_account(0);
        let missing = Uuid::new_v4();

        assert!(matches!(
            ledger.deposit(missing, 1).await,
            Err(LedgerError::AccountNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_withdraw_exact_balance() {
        let (ledger, id) = ledger_with_account(500);

        let movement = ledger.withdraw(id, 500).await.unwrap();
        assert_eq!(movement.account.balance, 0);
        assert_eq!(movement.transaction.kind, TransactionKind::Withdraw);
    }

    #[tokio::test]
    async fn test_failed_transaction_insert_rolls_back_balance() {
        let (ledger, id) = ledger_with_account(1_000);
        ledger.store().inject_fault(Fault::AppendTransaction);

        let result = ledger.withdraw(id, 400).await;
        assert!(matches!(result, Err(LedgerError::Persistence(_))));
        assert_eq!(ledger.store().account(id).await.unwrap().balance, 1_000);
        assert!(ledger.store().transactions(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_repayment_validation_order() {
        let (ledger, account_id) = ledger_with_account(0);
        let loan_id = add_loan(&ledger, account_id, 100_000);

        // Exceeding pending is reported before the balance is looked at
        let result = ledger.repay_loan(loan_id, account_id, 112_001).await;
        assert!(matches!(
            result,
            Err(LedgerError::AmountExceedsPending { pending: 112_000, requested: 112_001, .. })
        ));

        let result = ledger.repay_loan(loan_id, account_id, 1).await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
    }

    #[tokio::test]
    async fn test_repayment_from_unlinked_account() {
        let (ledger, holder_account) = ledger_with_account(0);
        let loan_id = add_loan(&ledger, holder_account, 100_000);

        let stranger = Account {
            balance: 500_000,
            ..Account::open()
        };
        let stranger_id = stranger.id;
        ledger.store().insert_account(stranger);

        let result = ledger.repay_loan(loan_id, stranger_id, 1_000).await;
        assert!(matches!(
            result,
            Err(LedgerError::AccountNotLinkedToCustomer { account_id, .. }) if account_id == stranger_id
        ));
        assert_eq!(ledger.store().account(stranger_id).await.unwrap().balance, 500_000);
    }

    #[tokio::test]
    async fn test_failed_payment_insert_undoes_debit() {
        let (ledger, account_id) = ledger_with_account(200_000);
        let loan_id = add_loan(&ledger, account_id, 100_000);
        ledger.store().inject_fault(Fault::AppendPayment);

        let result = ledger.repay_loan(loan_id, account_id, 50_000).await;
        assert!(matches!(result, Err(LedgerError::Persistence(_))));

        let account = ledger.store().account(account_id).await.unwrap();
        let loan = ledger.store().loan(loan_id).await.unwrap();
        assert_eq!(account.balance, 200_000);
        assert_eq!(loan.pending_amount, 112_000);
        assert_eq!(loan.status, LoanStatus::Active);
        assert!(ledger.store().transactions(account_id).await.is_empty());
        assert!(ledger.store().payments(loan_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_writes_during_repayment_leave_no_trace() {
        for fault in [Fault::SaveAccount, Fault::SaveLoan] {
            let (ledger, account_id) = ledger_with_account(200_000);
            let loan_id = add_loan(&ledger, account_id, 100_000);
            ledger.store().inject_fault(fault);

            let result = ledger.repay_loan(loan_id, account_id, 50_000).await;
            assert!(
                matches!(result, Err(LedgerError::Persistence(_))),
                "{:?} should fail the repayment",
                fault
            );

            let store = ledger.store();
            let loan = store.loan(loan_id).await.unwrap();
            assert_eq!(store.account(account_id).await.unwrap().balance, 200_000);
            assert_eq!(loan.pending_amount, 112_000);
            assert_eq!(loan.status, LoanStatus::Active);
            assert!(store.transactions(account_id).await.is_empty());
            assert!(store.payments(loan_id).await.is_empty());

            // The fault fires once; the same repayment then goes through
            let repayment = ledger.repay_loan(loan_id, account_id, 50_000).await.unwrap();
            assert_eq!(repayment.loan.pending_amount, 62_000);
        }
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_trace() {
        let (ledger, account_id) = ledger_with_account(200_000);
        let loan_id = add_loan(&ledger, account_id, 100_000);
        ledger.store().inject_fault(Fault::Commit);

        let result = ledger.repay_loan(loan_id, account_id, 112_000).await;
        assert!(matches!(result, Err(LedgerError::Persistence(_))));
        assert_eq!(
            ledger.store().loan(loan_id).await.unwrap().status,
            LoanStatus::Active
        );
        assert_eq!(ledger.store().account(account_id).await.unwrap().balance, 200_000);
    }

    #[tokio::test]
    async fn test_full_repayment_closes_loan() {
        let (ledger, account_id) = ledger_with_account(200_000);
        let loan_id = add_loan(&ledger, account_id, 100_000);

        let repayment = ledger.repay_loan(loan_id, account_id, 112_000).await.unwrap();

        assert_eq!(repayment.loan.pending_amount, 0);
        assert_eq!(repayment.loan.status, LoanStatus::Closed);
        assert!(repayment.loan.end_date.is_some());
        assert_eq!(repayment.payment.amount, 112_000);
        assert_eq!(repayment.transaction.kind, TransactionKind::Withdraw);
        assert_eq!(repayment.transaction.balance, 88_000);
        assert_eq!(repayment.account.balance, 88_000);

        let again = ledger.repay_loan(loan_id, account_id, 1).await;
        assert!(matches!(again, Err(LedgerError::LoanAlreadyClosed(id)) if id == loan_id));
    }
}
