mod account;
mod directory;
pub mod invariants;
mod loan;
mod money;

pub use account::*;
pub use directory::*;
pub use loan::*;
pub use money::*;
