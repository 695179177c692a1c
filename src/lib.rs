//! Stockledger
//!
//! Inventory core for a manufacturing/fulfillment business: an append-only
//! ledger of stock movements, balance derivation, BOM-driven buildability,
//! consumption forecasting, and FEFO lot selection.
//!
//! The ledger (`ledger_transactions` + `ledger_lines`) is the sole source of
//! truth. Balances are derived sums; the `balances` table is a rebuildable
//! index maintained inside the same DB transaction as the lines it mirrors.
//! Web UI, authentication, marketplace sync, and notification delivery are
//! external collaborators that call into these services.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

/// Bundles the core services over one connection pool, the way callers
/// (API handlers, jobs, tests) consume this crate.
#[derive(Clone)]
pub struct InventoryCore {
    pub ledger: services::ledger::LedgerService,
    pub balances: services::balance::BalanceService,
    pub boms: services::bom::BomService,
    pub buildability: services::buildability::BuildabilityService,
    pub forecasts: services::forecast::ForecastService,
}

impl InventoryCore {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: events::EventSender) -> Self {
        Self {
            ledger: services::ledger::LedgerService::new(db.clone(), event_sender.clone()),
            balances: services::balance::BalanceService::new(db.clone(), event_sender.clone()),
            boms: services::bom::BomService::new(db.clone(), event_sender),
            buildability: services::buildability::BuildabilityService::new(db.clone()),
            forecasts: services::forecast::ForecastService::new(db),
        }
    }
}

/// Installs a global tracing subscriber honoring `RUST_LOG`. Call once from a
/// binary or test harness; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
