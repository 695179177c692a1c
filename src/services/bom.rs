use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    entities::{
        bom_line::{self, Entity as BomLineEntity},
        bom_version::{self, Entity as BomVersionEntity},
        component::{self, Entity as ComponentEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Component requirement supplied when creating a BOM version.
#[derive(Debug, Clone)]
pub struct NewBomLine {
    pub component_id: Uuid,
    pub quantity_per_unit: Decimal,
}

/// Resolves the single active BOM version for a product. `None` is a normal
/// steady state (buildability is undefined), not an error.
pub(crate) async fn active_version<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<Option<bom_version::Model>, ServiceError> {
    let version = BomVersionEntity::find()
        .filter(bom_version::Column::TenantId.eq(tenant_id))
        .filter(bom_version::Column::ProductId.eq(product_id))
        .filter(bom_version::Column::IsActive.eq(true))
        .one(db)
        .await?;
    Ok(version)
}

/// Lines of a BOM version, ordered by component id for deterministic output.
pub(crate) async fn version_lines<C: ConnectionTrait>(
    db: &C,
    version_id: Uuid,
) -> Result<Vec<bom_line::Model>, ServiceError> {
    let lines = BomLineEntity::find()
        .filter(bom_line::Column::BomVersionId.eq(version_id))
        .order_by_asc(bom_line::Column::ComponentId)
        .all(db)
        .await?;
    Ok(lines)
}

/// Bill-of-materials administration and resolution.
///
/// The buildability calculator and the build writer only read; versions are
/// created and activated by an administrative workflow going through here.
#[derive(Clone)]
pub struct BomService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl BomService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// The active BOM version for a product, if any.
    #[instrument(skip(self))]
    pub async fn active_version(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<bom_version::Model>, ServiceError> {
        let db = &*self.db;
        self.guard_product(db, tenant_id, product_id).await?;
        active_version(db, tenant_id, product_id).await
    }

    /// Component lines of a version.
    #[instrument(skip(self))]
    pub async fn lines(
        &self,
        tenant_id: Uuid,
        version_id: Uuid,
    ) -> Result<Vec<bom_line::Model>, ServiceError> {
        let db = &*self.db;
        self.guard_version(db, tenant_id, version_id).await?;
        version_lines(db, version_id).await
    }

    /// Creates an inactive version with the next version number. Activation
    /// is a separate step so a draft can be reviewed before it takes effect.
    #[instrument(skip(self, lines))]
    pub async fn create_version(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        lines: Vec<NewBomLine>,
    ) -> Result<Uuid, ServiceError> {
        for line in &lines {
            if line.quantity_per_unit <= Decimal::ZERO {
                return Err(ServiceError::Validation(format!(
                    "quantity per unit must be positive for component {}",
                    line.component_id
                )));
            }
        }

        let db = &*self.db;
        self.guard_product(db, tenant_id, product_id).await?;

        let component_ids: Vec<Uuid> = lines.iter().map(|l| l.component_id).collect();
        // One line per component: the build-availability check compares each
        // line's need against the full on-hand independently, so duplicate
        // lines would under-detect shortfall.
        let mut seen = HashSet::with_capacity(component_ids.len());
        for component_id in &component_ids {
            if !seen.insert(*component_id) {
                return Err(ServiceError::Validation(format!(
                    "component {} appears on more than one BOM line",
                    component_id
                )));
            }
        }
        let owned = ComponentEntity::find()
            .filter(component::Column::Id.is_in(component_ids.clone()))
            .filter(component::Column::TenantId.eq(tenant_id))
            .all(db)
            .await?;
        if owned.len() != component_ids.len() {
            return Err(ServiceError::Validation(
                "BOM references unknown or foreign components".into(),
            ));
        }

        let latest = BomVersionEntity::find()
            .filter(bom_version::Column::ProductId.eq(product_id))
            .order_by_desc(bom_version::Column::Version)
            .one(db)
            .await?;
        let next_version = latest.map(|v| v.version + 1).unwrap_or(1);

        let txn = db.begin().await?;
        let version_id = Uuid::new_v4();
        bom_version::ActiveModel {
            id: Set(version_id),
            tenant_id: Set(tenant_id),
            product_id: Set(product_id),
            version: Set(next_version),
            is_active: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        for line in lines {
            bom_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                bom_version_id: Set(version_id),
                component_id: Set(line.component_id),
                quantity_per_unit: Set(line.quantity_per_unit),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        info!(%product_id, version = next_version, "BOM version created");
        Ok(version_id)
    }

    /// Activates a version, deactivating the product's other versions in the
    /// same DB transaction so at most one version is ever active.
    #[instrument(skip(self))]
    pub async fn activate(&self, tenant_id: Uuid, version_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let version = self.guard_version(db, tenant_id, version_id).await?;

        let txn = db.begin().await?;
        let siblings = BomVersionEntity::find()
            .filter(bom_version::Column::ProductId.eq(version.product_id))
            .filter(bom_version::Column::IsActive.eq(true))
            .all(&txn)
            .await?;
        for sibling in siblings {
            let mut active: bom_version::ActiveModel = sibling.into();
            active.is_active = Set(false);
            active.update(&txn).await?;
        }
        let product_id = version.product_id;
        let mut active: bom_version::ActiveModel = version.into();
        active.is_active = Set(true);
        active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BomVersionActivated {
                product_id,
                version_id,
            })
            .await;
        Ok(())
    }

    async fn guard_product(
        &self,
        db: &DatabaseConnection,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> Result<product::Model, ServiceError> {
        let product = ProductEntity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {} not found", product_id)))?;
        if product.tenant_id != tenant_id {
            return Err(ServiceError::AccessDenied(format!(
                "product {} belongs to another tenant",
                product_id
            )));
        }
        Ok(product)
    }

    async fn guard_version(
        &self,
        db: &DatabaseConnection,
        tenant_id: Uuid,
        version_id: Uuid,
    ) -> Result<bom_version::Model, ServiceError> {
        let version = BomVersionEntity::find_by_id(version_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("BOM version {} not found", version_id))
            })?;
        if version.tenant_id != tenant_id {
            return Err(ServiceError::AccessDenied(format!(
                "BOM version {} belongs to another tenant",
                version_id
            )));
        }
        Ok(version)
    }
}
