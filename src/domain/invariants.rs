//! Pure checks shared by every ledger operation. Nothing here touches storage.

use super::{Cents, LoanStatus};

/// Amounts moved by the ledger are strictly positive.
pub fn is_positive_amount(amount: Cents) -> bool {
    amount > 0
}

pub fn has_sufficient_balance(balance: Cents, amount: Cents) -> bool {
    balance >= amount
}

pub fn is_loan_active(status: LoanStatus) -> bool {
    status == LoanStatus::Active
}

pub fn is_within_pending(amount: Cents, pending_amount: Cents) -> bool {
    amount <= pending_amount
}

/// A loan is settled when nothing is pending. Amounts are whole cents, so
/// this is an exact comparison.
pub fn is_settled(pending_amount: Cents) -> bool {
    pending_amount == 0
}
