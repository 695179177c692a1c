//! SeaORM entities for the inventory core.
//!
//! `ledger_transactions` and `ledger_lines` are the sole source of truth for
//! stock; `balances` is a rebuildable index over them.

pub mod balance;
pub mod bom_line;
pub mod bom_version;
pub mod component;
pub mod ledger_line;
pub mod ledger_transaction;
pub mod location;
pub mod lot;
pub mod product;
