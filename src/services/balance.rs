use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        balance::{self, Entity as BalanceEntity},
        component::{self, Entity as ComponentEntity},
        ledger_line::{self, Entity as LedgerLineEntity},
        ledger_transaction::{self, Entity as LedgerTransactionEntity, TransactionType},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Catalog entity a ledger line may reference.
#[derive(Debug, Clone)]
pub enum LedgerEntity {
    Component(component::Model),
    Product(product::Model),
}

impl LedgerEntity {
    pub fn id(&self) -> Uuid {
        match self {
            LedgerEntity::Component(c) => c.id,
            LedgerEntity::Product(p) => p.id,
        }
    }
}

/// Looks up a component or product and enforces the tenant boundary.
/// An entity owned by another tenant fails with `AccessDenied`, never a
/// silent zero.
pub(crate) async fn resolve_entity<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    entity_id: Uuid,
) -> Result<LedgerEntity, ServiceError> {
    if let Some(c) = ComponentEntity::find_by_id(entity_id).one(db).await? {
        if c.tenant_id != tenant_id {
            return Err(ServiceError::AccessDenied(format!(
                "entity {} belongs to another tenant",
                entity_id
            )));
        }
        return Ok(LedgerEntity::Component(c));
    }
    if let Some(p) = ProductEntity::find_by_id(entity_id).one(db).await? {
        if p.tenant_id != tenant_id {
            return Err(ServiceError::AccessDenied(format!(
                "entity {} belongs to another tenant",
                entity_id
            )));
        }
        return Ok(LedgerEntity::Product(p));
    }
    Err(ServiceError::NotFound(format!(
        "entity {} not found",
        entity_id
    )))
}

/// Rejects any id in the batch that exists under another tenant. Ids unknown
/// to the catalog are tolerated; they simply have no ledger history.
pub(crate) async fn guard_entities<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    entity_ids: &[Uuid],
) -> Result<(), ServiceError> {
    let foreign_component = ComponentEntity::find()
        .filter(component::Column::Id.is_in(entity_ids.to_vec()))
        .filter(component::Column::TenantId.ne(tenant_id))
        .one(db)
        .await?;
    if let Some(c) = foreign_component {
        return Err(ServiceError::AccessDenied(format!(
            "entity {} belongs to another tenant",
            c.id
        )));
    }
    let foreign_product = ProductEntity::find()
        .filter(product::Column::Id.is_in(entity_ids.to_vec()))
        .filter(product::Column::TenantId.ne(tenant_id))
        .one(db)
        .await?;
    if let Some(p) = foreign_product {
        return Err(ServiceError::AccessDenied(format!(
            "entity {} belongs to another tenant",
            p.id
        )));
    }
    Ok(())
}

/// Whether a line counts toward the given location scope.
///
/// A transfer transaction's own header location differs from the location of
/// each of its lines, so scoped sums split three ways: non-transfer lines at
/// the location, transfer lines that left it, transfer lines that arrived.
fn line_in_scope(
    tx: &ledger_transaction::Model,
    line: &ledger_line::Model,
    location_id: Option<Uuid>,
) -> bool {
    let Some(location_id) = location_id else {
        // Global scope: transfers net to zero by the zero-sum invariant.
        return true;
    };
    match tx.tx_type() {
        Some(TransactionType::Transfer) => {
            if line.delta < Decimal::ZERO {
                tx.from_location_id == Some(location_id)
            } else {
                tx.to_location_id == Some(location_id)
            }
        }
        Some(
            TransactionType::Receipt
            | TransactionType::Build
            | TransactionType::Adjustment
            | TransactionType::Outbound,
        )
        | None => line.location_id == location_id,
    }
}

/// Location a line's quantity effectively sits at, used for grouping.
pub(crate) fn effective_location(
    tx: &ledger_transaction::Model,
    line: &ledger_line::Model,
) -> Uuid {
    match tx.tx_type() {
        Some(TransactionType::Transfer) => {
            if line.delta < Decimal::ZERO {
                tx.from_location_id.unwrap_or(line.location_id)
            } else {
                tx.to_location_id.unwrap_or(line.location_id)
            }
        }
        _ => line.location_id,
    }
}

fn scope_condition(location_id: Option<Uuid>) -> Condition {
    match location_id {
        None => Condition::all(),
        Some(loc) => Condition::any()
            .add(
                Condition::all()
                    .add(ledger_transaction::Column::TxType.ne(TransactionType::Transfer.as_str()))
                    .add(ledger_line::Column::LocationId.eq(loc)),
            )
            .add(
                Condition::all()
                    .add(ledger_transaction::Column::TxType.eq(TransactionType::Transfer.as_str()))
                    .add(
                        Condition::any()
                            .add(ledger_transaction::Column::FromLocationId.eq(loc))
                            .add(ledger_transaction::Column::ToLocationId.eq(loc)),
                    ),
            ),
    }
}

/// Sums line deltas for a batch of entities in one query. Every requested id
/// appears in the result, defaulting to zero.
pub(crate) async fn sum_deltas<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    entity_ids: &[Uuid],
    location_id: Option<Uuid>,
) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
    let mut totals: HashMap<Uuid, Decimal> =
        entity_ids.iter().map(|id| (*id, Decimal::ZERO)).collect();
    if entity_ids.is_empty() {
        return Ok(totals);
    }

    let rows = LedgerLineEntity::find()
        .find_also_related(LedgerTransactionEntity)
        .filter(ledger_transaction::Column::TenantId.eq(tenant_id))
        .filter(ledger_line::Column::EntityId.is_in(entity_ids.to_vec()))
        .filter(scope_condition(location_id))
        .all(db)
        .await?;

    for (line, tx) in rows {
        let Some(tx) = tx else { continue };
        if line_in_scope(&tx, &line, location_id) {
            if let Some(total) = totals.get_mut(&line.entity_id) {
                *total += line.delta;
            }
        }
    }
    Ok(totals)
}

/// Net quantity at one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuantity {
    pub location_id: Uuid,
    pub quantity: Decimal,
}

/// (entity, location) pair where the balance cache disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDrift {
    pub entity_id: Uuid,
    pub location_id: Uuid,
    pub ledger: Decimal,
    pub cached: Decimal,
}

/// Derives net quantities from the ledger. The ledger, never the balance
/// cache, is authoritative; every read here goes back to the lines.
#[derive(Clone)]
pub struct BalanceService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl BalanceService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Net quantity for an entity, globally or scoped to one location.
    #[instrument(skip(self))]
    pub async fn get_quantity(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Decimal, ServiceError> {
        let db = &*self.db;
        resolve_entity(db, tenant_id, entity_id).await?;
        let totals = sum_deltas(db, tenant_id, &[entity_id], location_id).await?;
        Ok(totals.get(&entity_id).copied().unwrap_or(Decimal::ZERO))
    }

    /// Batched form of [`get_quantity`](Self::get_quantity): one query for the
    /// whole id set. Empty input returns an empty map without touching the
    /// database.
    #[instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
    pub async fn get_quantities(
        &self,
        tenant_id: Uuid,
        entity_ids: &[Uuid],
        location_id: Option<Uuid>,
    ) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db = &*self.db;
        guard_entities(db, tenant_id, entity_ids).await?;
        sum_deltas(db, tenant_id, entity_ids, location_id).await
    }

    /// Per-location breakdown of an entity's net quantity, sorted by location
    /// id for stable output. Locations that net to zero are included so
    /// callers can see where stock has passed through.
    #[instrument(skip(self))]
    pub async fn summary_by_location(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
    ) -> Result<Vec<LocationQuantity>, ServiceError> {
        let db = &*self.db;
        resolve_entity(db, tenant_id, entity_id).await?;

        let rows = LedgerLineEntity::find()
            .find_also_related(LedgerTransactionEntity)
            .filter(ledger_transaction::Column::TenantId.eq(tenant_id))
            .filter(ledger_line::Column::EntityId.eq(entity_id))
            .all(db)
            .await?;

        let mut by_location: HashMap<Uuid, Decimal> = HashMap::new();
        for (line, tx) in rows {
            let Some(tx) = tx else { continue };
            *by_location
                .entry(effective_location(&tx, &line))
                .or_default() += line.delta;
        }

        let mut summary: Vec<LocationQuantity> = by_location
            .into_iter()
            .map(|(location_id, quantity)| LocationQuantity {
                location_id,
                quantity,
            })
            .collect();
        summary.sort_by_key(|entry| entry.location_id);
        Ok(summary)
    }

    /// Regenerates the balance cache from the ledger. Recovery routine: the
    /// cache is an index, so dropping and rebuilding it is always safe.
    #[instrument(skip(self))]
    pub async fn rebuild_balances(&self, tenant_id: Uuid) -> Result<usize, ServiceError> {
        let db = &*self.db;
        let folded = self.fold_ledger(tenant_id).await?;

        let txn = db.begin().await?;
        BalanceEntity::delete_many()
            .filter(balance::Column::TenantId.eq(tenant_id))
            .exec(&txn)
            .await?;
        let rows = folded.len();
        for ((entity_id, location_id), quantity) in folded {
            balance::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                entity_id: Set(entity_id),
                location_id: Set(location_id),
                quantity: Set(quantity),
                updated_at: Set(Utc::now()),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        info!(rows, "balance cache rebuilt from ledger");
        self.event_sender
            .send_or_log(Event::BalanceRebuilt { tenant_id, rows })
            .await;
        Ok(rows)
    }

    /// Compares the balance cache with the ledger and reports drift. Empty
    /// output means the incremental maintenance has kept up.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, tenant_id: Uuid) -> Result<Vec<BalanceDrift>, ServiceError> {
        let db = &*self.db;
        let folded = self.fold_ledger(tenant_id).await?;
        let cached = BalanceEntity::find()
            .filter(balance::Column::TenantId.eq(tenant_id))
            .all(db)
            .await?;

        let mut cache_map: HashMap<(Uuid, Uuid), Decimal> = cached
            .into_iter()
            .map(|b| ((b.entity_id, b.location_id), b.quantity))
            .collect();

        let mut drift = Vec::new();
        for ((entity_id, location_id), ledger) in &folded {
            let cached = cache_map
                .remove(&(*entity_id, *location_id))
                .unwrap_or(Decimal::ZERO);
            if cached != *ledger {
                drift.push(BalanceDrift {
                    entity_id: *entity_id,
                    location_id: *location_id,
                    ledger: *ledger,
                    cached,
                });
            }
        }
        // Cache rows with no ledger counterpart are drift too.
        for ((entity_id, location_id), cached) in cache_map {
            if cached != Decimal::ZERO {
                drift.push(BalanceDrift {
                    entity_id,
                    location_id,
                    ledger: Decimal::ZERO,
                    cached,
                });
            }
        }
        drift.sort_by_key(|d| (d.entity_id, d.location_id));
        Ok(drift)
    }

    async fn fold_ledger(
        &self,
        tenant_id: Uuid,
    ) -> Result<HashMap<(Uuid, Uuid), Decimal>, ServiceError> {
        let rows = LedgerLineEntity::find()
            .find_also_related(LedgerTransactionEntity)
            .filter(ledger_transaction::Column::TenantId.eq(tenant_id))
            .all(&*self.db)
            .await?;

        let mut folded: HashMap<(Uuid, Uuid), Decimal> = HashMap::new();
        for (line, tx) in rows {
            let Some(tx) = tx else { continue };
            *folded
                .entry((line.entity_id, effective_location(&tx, &line)))
                .or_default() += line.delta;
        }
        Ok(folded)
    }
}

/// Applies a delta to the balance cache inside the caller's DB transaction,
/// keeping the index in step with the lines it mirrors.
pub(crate) async fn apply_balance_delta<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    entity_id: Uuid,
    location_id: Uuid,
    delta: Decimal,
) -> Result<(), ServiceError> {
    let existing = BalanceEntity::find()
        .filter(balance::Column::TenantId.eq(tenant_id))
        .filter(balance::Column::EntityId.eq(entity_id))
        .filter(balance::Column::LocationId.eq(location_id))
        .one(db)
        .await?;

    match existing {
        Some(row) => {
            let quantity = row.quantity + delta;
            let mut active: balance::ActiveModel = row.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(Utc::now());
            active.update(db).await?;
        }
        None => {
            balance::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                entity_id: Set(entity_id),
                location_id: Set(location_id),
                quantity: Set(delta),
                updated_at: Set(Utc::now()),
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}
