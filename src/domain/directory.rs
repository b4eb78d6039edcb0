use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

pub type BankId = Uuid;
pub type BranchId = Uuid;
pub type CustomerId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Bank {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub bank_id: BankId,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(bank_id: BankId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bank_id,
            name: name.into(),
            address: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub branch_id: BranchId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(branch_id: BranchId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_id,
            name: name.into(),
            email: email.into(),
            phone: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderRole {
    #[default]
    PrimaryHolder,
    JointHolder,
}

impl HolderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderRole::PrimaryHolder => "primary_holder",
            HolderRole::JointHolder => "joint_holder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "primary_holder" | "primary" => Some(HolderRole::PrimaryHolder),
            "joint_holder" | "joint" => Some(HolderRole::JointHolder),
            _ => None,
        }
    }
}

impl std::fmt::Display for HolderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Links a customer to a savings account they may operate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountHolder {
    pub customer_id: CustomerId,
    pub account_id: AccountId,
    pub role: HolderRole,
    pub created_at: DateTime<Utc>,
}

impl AccountHolder {
    pub fn new(customer_id: CustomerId, account_id: AccountId, role: HolderRole) -> Self {
        Self {
            customer_id,
            account_id,
            role,
            created_at: Utc::now(),
        }
    }
}
