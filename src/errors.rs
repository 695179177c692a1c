use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the inventory core services.
///
/// Validation failures are raised before any write; storage failures inside a
/// multi-line write surface as a single `Database` error with no partial state.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// A build, outbound, or transfer would drive a balance negative.
    /// Carries the shortfall so callers can offer an explicit override.
    #[error("Insufficient inventory for entity {entity_id}: short by {shortfall}")]
    InsufficientInventory { entity_id: Uuid, shortfall: Decimal },

    #[error("Event error: {0}")]
    Event(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::Database(error)
    }

    /// True for errors a caller can act on by overriding or fixing input.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation(_) | ServiceError::InsufficientInventory { .. }
        )
    }
}
