// Application layer: the ledger coordinator and the bank service facade.

pub mod error;
pub mod ledger;
pub mod service;

pub use error::*;
pub use ledger::*;
pub use service::*;
