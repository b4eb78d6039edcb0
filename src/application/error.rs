use thiserror::Error;

use crate::domain::{
    AccountId, BankId, BranchId, Cents, CustomerId, LoanError, LoanId, format_cents,
};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Bank not found: {0}")]
    BankNotFound(BankId),

    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error(
        "Insufficient balance in account {account_id}: balance {}, requested {}",
        format_cents(*balance),
        format_cents(*requested)
    )]
    InsufficientBalance {
        account_id: AccountId,
        balance: Cents,
        requested: Cents,
    },

    #[error("Loan {0} is already closed")]
    LoanAlreadyClosed(LoanId),

    #[error(
        "Repayment of {} exceeds the pending amount {} on loan {loan_id}",
        format_cents(*requested),
        format_cents(*pending)
    )]
    AmountExceedsPending {
        loan_id: LoanId,
        pending: Cents,
        requested: Cents,
    },

    #[error("Account {account_id} is not held by customer {customer_id}")]
    AccountNotLinkedToCustomer {
        account_id: AccountId,
        customer_id: CustomerId,
    },

    #[error("Timed out waiting for a lock on {0}; the operation can be retried")]
    LockTimeout(String),

    #[error("Storage failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

/// How a failure should be reported to whoever made the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A referenced record does not exist
    NotFound,
    /// The request broke a business rule; repeating it unchanged will fail again
    Rejected,
    /// The system could not complete the request
    Transient,
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::AccountNotFound(_)
            | LedgerError::LoanNotFound(_)
            | LedgerError::BankNotFound(_)
            | LedgerError::BranchNotFound(_)
            | LedgerError::CustomerNotFound(_) => ErrorClass::NotFound,
            LedgerError::AlreadyExists(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::LoanAlreadyClosed(_)
            | LedgerError::AmountExceedsPending { .. }
            | LedgerError::AccountNotLinkedToCustomer { .. } => ErrorClass::Rejected,
            LedgerError::LockTimeout(_) | LedgerError::Persistence(_) => ErrorClass::Transient,
        }
    }

    /// Translate a refused loan transition into the ledger taxonomy.
    pub fn from_loan(loan_id: LoanId, err: LoanError) -> Self {
        match err {
            LoanError::AlreadyClosed => LedgerError::LoanAlreadyClosed(loan_id),
            LoanError::ExceedsPending { pending, requested } => LedgerError::AmountExceedsPending {
                loan_id,
                pending,
                requested,
            },
            other => LedgerError::InvalidAmount(other.to_string()),
        }
    }

    /// Only lock contention is worth retrying from a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockTimeout(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout(what) => LedgerError::LockTimeout(what),
            StoreError::Backend(source) => LedgerError::Persistence(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            LedgerError::AccountNotFound(Uuid::new_v4()).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            LedgerError::LoanAlreadyClosed(Uuid::new_v4()).class(),
            ErrorClass::Rejected
        );
        assert_eq!(
            LedgerError::LockTimeout("account".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            LedgerError::Persistence(anyhow::anyhow!("disk full")).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_only_lock_timeouts_are_retryable() {
        assert!(LedgerError::LockTimeout("loan".into()).is_retryable());
        assert!(!LedgerError::Persistence(anyhow::anyhow!("disk full")).is_retryable());
        assert!(!LedgerError::InvalidAmount("zero".into()).is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: LedgerError = StoreError::LockTimeout("account 1".into()).into();
        assert!(matches!(err, LedgerError::LockTimeout(ref what) if what == "account 1"));
    }

    #[test]
    fn test_loan_refusals_keep_their_kind() {
        let loan_id = Uuid::new_v4();

        let closed = LedgerError::from_loan(loan_id, LoanError::AlreadyClosed);
        assert!(matches!(closed, LedgerError::LoanAlreadyClosed(id) if id == loan_id));

        let over = LedgerError::from_loan(
            loan_id,
            LoanError::ExceedsPending {
                pending: 10,
                requested: 11,
            },
        );
        assert!(matches!(
            over,
            LedgerError::AmountExceedsPending { pending: 10, requested: 11, .. }
        ));

        let overflow = LedgerError::from_loan(
            loan_id,
            LoanError::PayableOverflow {
                principal: i64::MAX,
                interest_rate: 1200,
            },
        );
        assert_eq!(overflow.class(), ErrorClass::Rejected);
        assert!(matches!(overflow, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_messages_show_formatted_amounts() {
        let err = LedgerError::InsufficientBalance {
            account_id: Uuid::nil(),
            balance: 800_000,
            requested: 2_000_000,
        };
        assert_eq!(
            err.to_string(),
            format!(
                "Insufficient balance in account {}: balance 8000.00, requested 20000.00",
                Uuid::nil()
            )
        );
    }
}
