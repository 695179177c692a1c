//! Inventory core services.
//!
//! Writers append to the ledger; readers derive balances, buildability, and
//! forecasts from it.

pub mod balance;
pub mod bom;
pub mod buildability;
pub mod forecast;
pub mod ledger;
pub mod lots;
