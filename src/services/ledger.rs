use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    TransactionTrait,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        component,
        ledger_line,
        ledger_transaction::{self, TransactionType},
        lot,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        balance::{apply_balance_delta, resolve_entity, sum_deltas, LedgerEntity},
        bom::{active_version, version_lines},
        lots::{draw_lots, LotDraw},
    },
};

/// Lot metadata supplied with a receipt of a lot-tracked component.
#[derive(Debug, Clone)]
pub struct NewLot {
    pub lot_code: String,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct ReceiptInput {
    pub component_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub source: Option<String>,
    pub lot: Option<NewLot>,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct BuildInput {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    /// Permits component balances to go negative. Set by a caller that has
    /// already surfaced the shortfall to a user and been overridden.
    pub allow_negative: bool,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct AdjustmentInput {
    pub entity_id: Uuid,
    pub location_id: Uuid,
    /// Signed; positive adds stock, negative removes it. Must be non-zero.
    pub quantity: Decimal,
    pub reason: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct TransferInput {
    pub entity_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub quantity: Decimal,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct OutboundInput {
    pub entity_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    /// Sales channel the units left through, recorded as the header source.
    pub channel: Option<String>,
    pub created_by: Uuid,
}

/// Append-only writer over the inventory ledger.
///
/// Every operation validates first, then writes its header, lines, balance
/// cache updates, and lot decrements as one DB transaction; a failure at any
/// point leaves nothing applied. Events go out after commit.
#[derive(Clone)]
pub struct LedgerService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl LedgerService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Records stock arriving from a supplier.
    #[instrument(skip(self, input), fields(component_id = %input.component_id))]
    pub async fn record_receipt(
        &self,
        tenant_id: Uuid,
        input: ReceiptInput,
    ) -> Result<Uuid, ServiceError> {
        require_positive(input.quantity)?;
        let db = &*self.db;
        let component = self.require_component(db, tenant_id, input.component_id).await?;
        if input.lot.is_some() && !component.lot_tracked {
            return Err(ServiceError::Validation(format!(
                "component {} is not lot tracked",
                component.id
            )));
        }

        let txn = db.begin().await?;
        let tx_id = insert_header(
            &txn,
            tenant_id,
            TransactionType::Receipt,
            input.created_by,
            HeaderFields {
                location_id: Some(input.location_id),
                source: input.source,
                ..Default::default()
            },
        )
        .await?;

        let lot_id = match (component.lot_tracked, input.lot) {
            (true, Some(new_lot)) => {
                let lot_id = Uuid::new_v4();
                lot::ActiveModel {
                    id: Set(lot_id),
                    tenant_id: Set(tenant_id),
                    component_id: Set(component.id),
                    location_id: Set(input.location_id),
                    lot_code: Set(new_lot.lot_code),
                    expiry_date: Set(new_lot.expiry_date),
                    received_date: Set(new_lot
                        .received_date
                        .unwrap_or_else(|| Utc::now().date_naive())),
                    remaining: Set(input.quantity),
                }
                .insert(&txn)
                .await?;
                Some(lot_id)
            }
            _ => None,
        };

        insert_line(
            &txn,
            tx_id,
            component.id,
            input.quantity,
            input.location_id,
            input.unit_cost,
            lot_id,
        )
        .await?;
        apply_balance_delta(&txn, tenant_id, component.id, input.location_id, input.quantity)
            .await?;
        txn.commit().await?;

        info!(%tx_id, quantity = %input.quantity, "receipt recorded");
        self.emit(tx_id, tenant_id, TransactionType::Receipt).await;
        Ok(tx_id)
    }

    /// Builds finished goods: consumes BOM components and produces the SKU,
    /// all inside one transaction.
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn record_build(
        &self,
        tenant_id: Uuid,
        input: BuildInput,
    ) -> Result<Uuid, ServiceError> {
        require_positive(input.quantity)?;
        let db = &*self.db;
        let product = match resolve_entity(db, tenant_id, input.product_id).await? {
            LedgerEntity::Product(p) => p,
            LedgerEntity::Component(_) => {
                return Err(ServiceError::Validation(format!(
                    "entity {} is a component, not a buildable product",
                    input.product_id
                )))
            }
        };

        let version = active_version(db, tenant_id, product.id)
            .await?
            .ok_or_else(|| {
                ServiceError::Validation(format!("product {} has no active BOM", product.id))
            })?;
        let bom = version_lines(db, version.id).await?;
        if bom.is_empty() {
            return Err(ServiceError::Validation(format!(
                "active BOM for product {} has no lines",
                product.id
            )));
        }

        let component_ids: Vec<Uuid> = bom.iter().map(|l| l.component_id).collect();
        let components = self.load_components(db, tenant_id, &component_ids).await?;

        let txn = db.begin().await?;

        // Validate availability across the whole BOM before posting anything;
        // when several components are short, report the worst shortfall.
        let needs: Vec<(Uuid, Decimal)> = bom
            .iter()
            .map(|l| (l.component_id, l.quantity_per_unit * input.quantity))
            .collect();
        if !input.allow_negative {
            let on_hand =
                sum_deltas(&txn, tenant_id, &component_ids, Some(input.location_id)).await?;
            let mut worst: Option<(Uuid, Decimal)> = None;
            for (component_id, need) in &needs {
                let available = on_hand.get(component_id).copied().unwrap_or_default();
                if available < *need {
                    let shortfall = *need - available;
                    if worst.map(|(_, s)| shortfall > s).unwrap_or(true) {
                        worst = Some((*component_id, shortfall));
                    }
                }
            }
            if let Some((entity_id, shortfall)) = worst {
                return Err(ServiceError::InsufficientInventory {
                    entity_id,
                    shortfall,
                });
            }
        }

        let tx_id = insert_header(
            &txn,
            tenant_id,
            TransactionType::Build,
            input.created_by,
            HeaderFields {
                location_id: Some(input.location_id),
                ..Default::default()
            },
        )
        .await?;

        let mut depleted_lots: Vec<(Uuid, LotDraw)> = Vec::new();
        for (component_id, need) in needs {
            let component = components.get(&component_id).ok_or_else(|| {
                ServiceError::Internal(format!("component {} vanished during build", component_id))
            })?;
            let draws = self
                .post_consumption(&txn, tenant_id, tx_id, component, input.location_id, need)
                .await?;
            depleted_lots.extend(
                draws
                    .into_iter()
                    .filter(|d| d.depleted)
                    .map(|d| (component_id, d)),
            );
        }

        // Production line for the finished SKU.
        insert_line(
            &txn,
            tx_id,
            product.id,
            input.quantity,
            input.location_id,
            None,
            None,
        )
        .await?;
        apply_balance_delta(&txn, tenant_id, product.id, input.location_id, input.quantity)
            .await?;
        txn.commit().await?;

        info!(%tx_id, quantity = %input.quantity, "build recorded");
        self.emit(tx_id, tenant_id, TransactionType::Build).await;
        for (component_id, draw) in depleted_lots {
            self.event_sender
                .send_or_log(Event::LotDepleted {
                    lot_id: draw.lot_id,
                    component_id,
                })
                .await;
        }
        Ok(tx_id)
    }

    /// Records a manual stock correction. The ledger is append-only, so a
    /// correction is a new transaction rather than an edit.
    #[instrument(skip(self, input), fields(entity_id = %input.entity_id))]
    pub async fn record_adjustment(
        &self,
        tenant_id: Uuid,
        input: AdjustmentInput,
    ) -> Result<Uuid, ServiceError> {
        if input.quantity.is_zero() {
            return Err(ServiceError::Validation(
                "adjustment quantity must be non-zero".into(),
            ));
        }
        if input.reason.trim().is_empty() {
            return Err(ServiceError::Validation(
                "adjustment requires a reason".into(),
            ));
        }
        let db = &*self.db;
        let entity = resolve_entity(db, tenant_id, input.entity_id).await?;

        let txn = db.begin().await?;
        let tx_id = insert_header(
            &txn,
            tenant_id,
            TransactionType::Adjustment,
            input.created_by,
            HeaderFields {
                location_id: Some(input.location_id),
                reason: Some(input.reason),
                ..Default::default()
            },
        )
        .await?;
        insert_line(
            &txn,
            tx_id,
            entity.id(),
            input.quantity,
            input.location_id,
            None,
            None,
        )
        .await?;
        apply_balance_delta(&txn, tenant_id, entity.id(), input.location_id, input.quantity)
            .await?;
        txn.commit().await?;

        info!(%tx_id, quantity = %input.quantity, "adjustment recorded");
        self.emit(tx_id, tenant_id, TransactionType::Adjustment).await;
        Ok(tx_id)
    }

    /// Moves stock between locations. The two lines sum to exactly zero; the
    /// header carries both endpoints since neither line location describes
    /// the transfer as a whole.
    #[instrument(skip(self, input), fields(entity_id = %input.entity_id))]
    pub async fn record_transfer(
        &self,
        tenant_id: Uuid,
        input: TransferInput,
    ) -> Result<Uuid, ServiceError> {
        require_positive(input.quantity)?;
        if input.from_location_id == input.to_location_id {
            return Err(ServiceError::Validation(
                "transfer requires two distinct locations".into(),
            ));
        }
        let db = &*self.db;
        let entity = resolve_entity(db, tenant_id, input.entity_id).await?;

        let txn = db.begin().await?;
        let available = sum_deltas(
            &txn,
            tenant_id,
            &[entity.id()],
            Some(input.from_location_id),
        )
        .await?
        .get(&entity.id())
        .copied()
        .unwrap_or_default();
        if available < input.quantity {
            return Err(ServiceError::InsufficientInventory {
                entity_id: entity.id(),
                shortfall: input.quantity - available,
            });
        }

        let tx_id = insert_header(
            &txn,
            tenant_id,
            TransactionType::Transfer,
            input.created_by,
            HeaderFields {
                from_location_id: Some(input.from_location_id),
                to_location_id: Some(input.to_location_id),
                ..Default::default()
            },
        )
        .await?;
        insert_line(
            &txn,
            tx_id,
            entity.id(),
            -input.quantity,
            input.from_location_id,
            None,
            None,
        )
        .await?;
        insert_line(
            &txn,
            tx_id,
            entity.id(),
            input.quantity,
            input.to_location_id,
            None,
            None,
        )
        .await?;
        apply_balance_delta(
            &txn,
            tenant_id,
            entity.id(),
            input.from_location_id,
            -input.quantity,
        )
        .await?;
        apply_balance_delta(
            &txn,
            tenant_id,
            entity.id(),
            input.to_location_id,
            input.quantity,
        )
        .await?;
        txn.commit().await?;

        info!(%tx_id, quantity = %input.quantity, "transfer recorded");
        self.emit(tx_id, tenant_id, TransactionType::Transfer).await;
        Ok(tx_id)
    }

    /// Records stock leaving through a sales channel.
    #[instrument(skip(self, input), fields(entity_id = %input.entity_id))]
    pub async fn record_outbound(
        &self,
        tenant_id: Uuid,
        input: OutboundInput,
    ) -> Result<Uuid, ServiceError> {
        require_positive(input.quantity)?;
        let db = &*self.db;
        let entity = resolve_entity(db, tenant_id, input.entity_id).await?;

        let txn = db.begin().await?;
        let available = sum_deltas(&txn, tenant_id, &[entity.id()], Some(input.location_id))
            .await?
            .get(&entity.id())
            .copied()
            .unwrap_or_default();
        if available < input.quantity {
            return Err(ServiceError::InsufficientInventory {
                entity_id: entity.id(),
                shortfall: input.quantity - available,
            });
        }

        let tx_id = insert_header(
            &txn,
            tenant_id,
            TransactionType::Outbound,
            input.created_by,
            HeaderFields {
                location_id: Some(input.location_id),
                source: input.channel,
                ..Default::default()
            },
        )
        .await?;

        let mut depleted: Vec<LotDraw> = Vec::new();
        match entity {
            LedgerEntity::Component(ref component) if component.lot_tracked => {
                let draws = self
                    .post_consumption(
                        &txn,
                        tenant_id,
                        tx_id,
                        component,
                        input.location_id,
                        input.quantity,
                    )
                    .await?;
                depleted.extend(draws.into_iter().filter(|d| d.depleted));
            }
            _ => {
                insert_line(
                    &txn,
                    tx_id,
                    entity.id(),
                    -input.quantity,
                    input.location_id,
                    None,
                    None,
                )
                .await?;
                apply_balance_delta(
                    &txn,
                    tenant_id,
                    entity.id(),
                    input.location_id,
                    -input.quantity,
                )
                .await?;
            }
        }
        txn.commit().await?;

        info!(%tx_id, quantity = %input.quantity, "outbound recorded");
        self.emit(tx_id, tenant_id, TransactionType::Outbound).await;
        for draw in depleted {
            self.event_sender
                .send_or_log(Event::LotDepleted {
                    lot_id: draw.lot_id,
                    component_id: entity.id(),
                })
                .await;
        }
        Ok(tx_id)
    }

    /// Posts the negative lines for one component's consumption: FEFO per-lot
    /// lines when the component is lot tracked, a single line otherwise.
    /// Stock not covered by lot rows (unlotted receipts, transferred-in
    /// balance, override builds) posts as a lot-less remainder line.
    async fn post_consumption(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: Uuid,
        tx_id: Uuid,
        component: &component::Model,
        location_id: Uuid,
        need: Decimal,
    ) -> Result<Vec<LotDraw>, ServiceError> {
        let mut applied: Vec<LotDraw> = Vec::new();
        if component.lot_tracked {
            let (draws, remainder) =
                draw_lots(txn, tenant_id, component.id, location_id, need).await?;
            for draw in &draws {
                insert_line(
                    txn,
                    tx_id,
                    component.id,
                    -draw.quantity,
                    location_id,
                    None,
                    Some(draw.lot_id),
                )
                .await?;
            }
            if remainder > Decimal::ZERO {
                debug!(component_id = %component.id, %remainder, "lot rows cover part of the consumption, posting unlotted remainder");
                insert_line(txn, tx_id, component.id, -remainder, location_id, None, None).await?;
            }
            applied = draws;
        } else {
            insert_line(txn, tx_id, component.id, -need, location_id, None, None).await?;
        }
        apply_balance_delta(txn, tenant_id, component.id, location_id, -need).await?;
        Ok(applied)
    }

    async fn require_component(
        &self,
        db: &DatabaseConnection,
        tenant_id: Uuid,
        component_id: Uuid,
    ) -> Result<component::Model, ServiceError> {
        match resolve_entity(db, tenant_id, component_id).await? {
            LedgerEntity::Component(c) => Ok(c),
            LedgerEntity::Product(_) => Err(ServiceError::Validation(format!(
                "entity {} is a product; receipts take components",
                component_id
            ))),
        }
    }

    async fn load_components(
        &self,
        db: &DatabaseConnection,
        tenant_id: Uuid,
        component_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, component::Model>, ServiceError> {
        let mut map = HashMap::new();
        for component_id in component_ids {
            match resolve_entity(db, tenant_id, *component_id).await? {
                LedgerEntity::Component(c) => {
                    map.insert(c.id, c);
                }
                LedgerEntity::Product(_) => {
                    return Err(ServiceError::Validation(format!(
                        "BOM line references product {} as a component",
                        component_id
                    )))
                }
            }
        }
        Ok(map)
    }

    async fn emit(&self, transaction_id: Uuid, tenant_id: Uuid, tx_type: TransactionType) {
        self.event_sender
            .send_or_log(Event::TransactionRecorded {
                transaction_id,
                tenant_id,
                tx_type,
            })
            .await;
    }
}

fn require_positive(quantity: Decimal) -> Result<(), ServiceError> {
    if quantity <= Decimal::ZERO {
        return Err(ServiceError::Validation(
            "quantity must be positive".into(),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct HeaderFields {
    location_id: Option<Uuid>,
    from_location_id: Option<Uuid>,
    to_location_id: Option<Uuid>,
    source: Option<String>,
    reason: Option<String>,
}

async fn insert_header<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    tx_type: TransactionType,
    created_by: Uuid,
    fields: HeaderFields,
) -> Result<Uuid, ServiceError> {
    let tx_id = Uuid::new_v4();
    ledger_transaction::ActiveModel {
        id: Set(tx_id),
        tenant_id: Set(tenant_id),
        tx_type: Set(tx_type.as_str().to_string()),
        occurred_at: Set(Utc::now()),
        created_by: Set(created_by),
        source: Set(fields.source),
        reason: Set(fields.reason),
        notes: Set(None),
        location_id: Set(fields.location_id),
        from_location_id: Set(fields.from_location_id),
        to_location_id: Set(fields.to_location_id),
    }
    .insert(db)
    .await?;
    Ok(tx_id)
}

async fn insert_line<C: ConnectionTrait>(
    db: &C,
    transaction_id: Uuid,
    entity_id: Uuid,
    delta: Decimal,
    location_id: Uuid,
    unit_cost: Option<Decimal>,
    lot_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    ledger_line::ActiveModel {
        id: Set(Uuid::new_v4()),
        transaction_id: Set(transaction_id),
        entity_id: Set(entity_id),
        delta: Set(delta),
        location_id: Set(location_id),
        unit_cost: Set(unit_cost),
        lot_id: Set(lot_id),
    }
    .insert(db)
    .await?;
    Ok(())
}
