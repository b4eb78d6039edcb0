use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BasisPoints, Cents, CustomerId, invariants, percent_of};

pub type LoanId = Uuid;
pub type LoanPaymentId = Uuid;

/// Every loan is originated at a fixed 12% rate.
pub const DEFAULT_INTEREST_RATE: BasisPoints = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoanStatus {
    Active,
    /// Terminal: a closed loan never accepts another payment
    Closed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(LoanStatus::Active),
            "CLOSED" => Some(LoanStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub customer_id: CustomerId,
    /// Free-form product name, e.g. "home" or "car"
    pub loan_type: String,
    pub principal: Cents,
    pub interest_rate: BasisPoints,
    /// Fixed at origination: principal plus one period of interest
    pub total_payable: Cents,
    /// Outstanding amount; never increases and never drops below zero
    pub pending_amount: Cents,
    pub status: LoanStatus,
    pub start_date: DateTime<Utc>,
    /// Set exactly when the loan is closed
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    /// Originate an active loan. The whole payable amount starts out pending.
    pub fn originate(
        customer_id: CustomerId,
        loan_type: impl Into<String>,
        principal: Cents,
        interest_rate: BasisPoints,
    ) -> Result<Self, LoanError> {
        if !invariants::is_positive_amount(principal) {
            return Err(LoanError::NonPositiveAmount(principal));
        }
        let total_payable = percent_of(principal, interest_rate)
            .and_then(|interest| principal.checked_add(interest))
            .ok_or(LoanError::PayableOverflow {
                principal,
                interest_rate,
            })?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            customer_id,
            loan_type: loan_type.into(),
            principal,
            interest_rate,
            total_payable,
            pending_amount: total_payable,
            status: LoanStatus::Active,
            start_date: now,
            end_date: None,
            created_at: now,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.status == LoanStatus::Closed
    }

    /// Whether `amount` may be paid off this loan right now.
    pub fn check_payment(&self, amount: Cents) -> Result<(), LoanError> {
        if !invariants::is_positive_amount(amount) {
            return Err(LoanError::NonPositiveAmount(amount));
        }
        if !invariants::is_loan_active(self.status) {
            return Err(LoanError::AlreadyClosed);
        }
        if !invariants::is_within_pending(amount, self.pending_amount) {
            return Err(LoanError::ExceedsPending {
                pending: self.pending_amount,
                requested: amount,
            });
        }
        Ok(())
    }

    /// Reduce the pending amount and close the loan once it is settled.
    pub fn apply_payment(&mut self, amount: Cents, at: DateTime<Utc>) -> Result<(), LoanError> {
        self.check_payment(amount)?;

        self.pending_amount -= amount;
        if invariants::is_settled(self.pending_amount) {
            self.status = LoanStatus::Closed;
            self.end_date = Some(at);
        }
        Ok(())
    }

    /// Interest due over one year on what is still pending.
    pub fn yearly_interest(&self) -> Option<Cents> {
        percent_of(self.pending_amount, self.interest_rate)
    }

    pub fn amount_repaid(&self) -> Cents {
        self.total_payable - self.pending_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanError {
    NonPositiveAmount(Cents),
    PayableOverflow {
        principal: Cents,
        interest_rate: BasisPoints,
    },
    AlreadyClosed,
    ExceedsPending {
        pending: Cents,
        requested: Cents,
    },
}

impl std::fmt::Display for LoanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoanError::NonPositiveAmount(amount) => {
                write!(f, "amount must be positive, got {}", amount)
            }
            LoanError::PayableOverflow {
                principal,
                interest_rate,
            } => write!(
                f,
                "principal of {} cents at {} basis points is too large to repay",
                principal, interest_rate
            ),
            LoanError::AlreadyClosed => write!(f, "loan is already closed"),
            LoanError::ExceedsPending { pending, requested } => write!(
                f,
                "payment of {} cents exceeds the {} cents pending",
                requested, pending
            ),
        }
    }
}

impl std::error::Error for LoanError {}

/// An immutable record of one repayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: LoanPaymentId,
    pub loan_id: LoanId,
    pub amount: Cents,
    pub payment_date: DateTime<Utc>,
}

impl LoanPayment {
    pub fn new(loan_id: LoanId, amount: Cents, payment_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            amount,
            payment_date,
        }
    }
}
