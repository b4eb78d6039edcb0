use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;
pub type TransactionId = Uuid;

/// A savings account. `balance` is only ever changed by the ledger coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open a new account with a zero balance.
    pub fn open() -> Self {
        Self {
            id: Uuid::new_v4(),
            balance: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdraw => "WITHDRAW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(TransactionKind::Deposit),
            "WITHDRAW" => Some(TransactionKind::Withdraw),
            _ => None,
        }
    }

    /// The amount as it affects the account balance.
    pub fn signed(&self, amount: Cents) -> Cents {
        match self {
            TransactionKind::Deposit => amount,
            TransactionKind::Withdraw => -amount,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger entry against one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Assigned by the store when appended; strictly increasing in creation order
    pub sequence: i64,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Always positive; the direction comes from `kind`
    pub amount: Cents,
    /// Account balance right after this entry was applied
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(account_id: AccountId, kind: TransactionKind, amount: Cents, balance: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            account_id,
            kind,
            amount,
            balance,
            created_at: Utc::now(),
        }
    }

    pub fn signed_amount(&self) -> Cents {
        self.kind.signed(self.amount)
    }
}

/// Result of replaying an account's transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub account_id: AccountId,
    pub recorded_balance: Cents,
    pub computed_balance: Cents,
    pub transaction_count: usize,
    /// Sequence numbers whose balance snapshot disagrees with the running sum
    pub inconsistent_snapshots: Vec<i64>,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.recorded_balance == self.computed_balance && self.inconsistent_snapshots.is_empty()
    }
}

/// Replay `transactions` (any order) and compare with the account's stored balance.
pub fn reconcile(account: &Account, transactions: &[Transaction]) -> Reconciliation {
    let mut ordered: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.account_id == account.id)
        .collect();
    ordered.sort_by_key(|t| t.sequence);

    let mut running: Cents = 0;
    let mut inconsistent_snapshots = Vec::new();
    for tx in &ordered {
        running += tx.signed_amount();
        if tx.balance != running {
            inconsistent_snapshots.push(tx.sequence);
        }
    }

    Reconciliation {
        account_id: account.id,
        recorded_balance: account.balance,
        computed_balance: running,
        transaction_count: ordered.len(),
        inconsistent_snapshots,
    }
}
