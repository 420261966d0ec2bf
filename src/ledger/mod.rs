//! Balance ledger and fund reservations

pub mod balance_ledger;
pub mod reservation;

pub use balance_ledger::*;
pub use reservation::*;
