use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement,
};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Type alias for a database connection pool.
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool from application configuration.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, DbErr> {
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    debug!("Connecting to database");
    let pool = Database::connect(opt).await?;
    info!("Database connection established");
    Ok(pool)
}

/// Convenience connector for tests and tooling.
pub async fn connect(database_url: &str) -> Result<DbPool, anyhow::Error> {
    establish_connection(&AppConfig::new(database_url))
        .await
        .map_err(Into::into)
}

/// Creates the inventory schema if it does not already exist.
///
/// Supports Postgres (production) and SQLite (tests). The ledger tables are
/// append-only by convention; nothing in this crate issues UPDATE or DELETE
/// against `ledger_transactions` or `ledger_lines`.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let (uuid, ts, date, qty, boolean) = match backend {
        DbBackend::Postgres => ("UUID", "TIMESTAMPTZ", "DATE", "NUMERIC(19,4)", "BOOLEAN"),
        DbBackend::Sqlite => ("TEXT", "TEXT", "TEXT", "REAL", "BOOLEAN"),
        other => {
            return Err(DbErr::Custom(format!(
                "unsupported database backend: {:?}",
                other
            )))
        }
    };

    let ddl = [
        format!(
            "CREATE TABLE IF NOT EXISTS components (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                name TEXT NOT NULL,
                reorder_point {qty} NOT NULL,
                lead_time_days INTEGER,
                unit_cost {qty},
                lot_tracked {boolean} NOT NULL,
                active {boolean} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS products (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                sku TEXT NOT NULL,
                name TEXT NOT NULL,
                active {boolean} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS locations (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                name TEXT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS bom_versions (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                product_id {uuid} NOT NULL,
                version INTEGER NOT NULL,
                is_active {boolean} NOT NULL,
                created_at {ts} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS bom_lines (
                id {uuid} PRIMARY KEY,
                bom_version_id {uuid} NOT NULL,
                component_id {uuid} NOT NULL,
                quantity_per_unit {qty} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS lots (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                component_id {uuid} NOT NULL,
                location_id {uuid} NOT NULL,
                lot_code TEXT NOT NULL,
                expiry_date {date},
                received_date {date} NOT NULL,
                remaining {qty} NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS ledger_transactions (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                tx_type TEXT NOT NULL,
                occurred_at {ts} NOT NULL,
                created_by {uuid} NOT NULL,
                source TEXT,
                reason TEXT,
                notes TEXT,
                location_id {uuid},
                from_location_id {uuid},
                to_location_id {uuid}
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS ledger_lines (
                id {uuid} PRIMARY KEY,
                transaction_id {uuid} NOT NULL,
                entity_id {uuid} NOT NULL,
                delta {qty} NOT NULL,
                location_id {uuid} NOT NULL,
                unit_cost {qty},
                lot_id {uuid}
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS balances (
                id {uuid} PRIMARY KEY,
                tenant_id {uuid} NOT NULL,
                entity_id {uuid} NOT NULL,
                location_id {uuid} NOT NULL,
                quantity {qty} NOT NULL,
                updated_at {ts} NOT NULL
            )"
        ),
        "CREATE INDEX IF NOT EXISTS idx_ledger_lines_entity ON ledger_lines (entity_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_ledger_lines_transaction ON ledger_lines (transaction_id)"
            .to_string(),
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_balances_scope \
         ON balances (tenant_id, entity_id, location_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_lots_component ON lots (component_id, location_id)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_bom_versions_product ON bom_versions (product_id)"
            .to_string(),
    ];

    for sql in ddl {
        db.execute(Statement::from_string(backend, sql)).await?;
    }

    info!("Inventory schema ready");
    Ok(())
}
