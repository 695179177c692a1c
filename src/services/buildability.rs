use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    entities::{
        bom_line::{self, Entity as BomLineEntity},
        bom_version::{self, Entity as BomVersionEntity},
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
    services::balance::{guard_entities, sum_deltas},
};

/// Per-component contribution to a SKU's buildability.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentBuildability {
    pub component_id: Uuid,
    pub quantity_per_unit: Decimal,
    pub on_hand: Decimal,
    pub component_max_buildable: i64,
    /// True when this component's maximum equals the SKU's maximum.
    pub is_binding: bool,
}

/// Buildability of one SKU from current component inventory.
///
/// `max_buildable` is `None` when the product has no active BOM (or an active
/// version with no lines); `limiting_components` then stays empty.
#[derive(Debug, Clone, Serialize)]
pub struct SkuBuildability {
    pub product_id: Uuid,
    pub max_buildable: Option<i64>,
    /// Every component whose own maximum equals the SKU maximum. Multiple
    /// components can be equally bottlenecking, so this is the full set,
    /// never an arbitrary single pick.
    pub limiting_components: Vec<Uuid>,
    pub components: Vec<ComponentBuildability>,
}

/// Bottleneck computation over BOM and balances.
#[derive(Clone)]
pub struct BuildabilityService {
    db: Arc<DatabaseConnection>,
}

impl BuildabilityService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Buildability for one SKU, per-location or global.
    #[instrument(skip(self))]
    pub async fn compute(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<SkuBuildability, ServiceError> {
        let mut results = self
            .compute_many(tenant_id, &[product_id], location_id)
            .await?;
        results
            .pop()
            .ok_or_else(|| ServiceError::Internal("buildability result missing".into()))
    }

    /// Buildability for many SKUs in one pass.
    ///
    /// Collects the union of referenced components across all requested SKUs
    /// and issues a single batched balance fetch, then computes each SKU from
    /// the shared map: one balance query per call, not per SKU.
    #[instrument(skip(self, product_ids), fields(count = product_ids.len()))]
    pub async fn compute_many(
        &self,
        tenant_id: Uuid,
        product_ids: &[Uuid],
        location_id: Option<Uuid>,
    ) -> Result<Vec<SkuBuildability>, ServiceError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;

        let products = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids.to_vec()))
            .all(db)
            .await?;
        guard_entities(db, tenant_id, product_ids).await?;
        let known: HashSet<Uuid> = products.iter().map(|p| p.id).collect();
        if let Some(missing) = product_ids.iter().find(|id| !known.contains(id)) {
            return Err(ServiceError::NotFound(format!(
                "product {} not found",
                missing
            )));
        }

        let versions = BomVersionEntity::find()
            .filter(bom_version::Column::TenantId.eq(tenant_id))
            .filter(bom_version::Column::ProductId.is_in(product_ids.to_vec()))
            .filter(bom_version::Column::IsActive.eq(true))
            .all(db)
            .await?;
        let version_by_product: HashMap<Uuid, Uuid> =
            versions.iter().map(|v| (v.product_id, v.id)).collect();

        let version_ids: Vec<Uuid> = versions.iter().map(|v| v.id).collect();
        let lines = if version_ids.is_empty() {
            Vec::new()
        } else {
            BomLineEntity::find()
                .filter(bom_line::Column::BomVersionId.is_in(version_ids))
                .order_by_asc(bom_line::Column::ComponentId)
                .all(db)
                .await?
        };
        let mut lines_by_version: HashMap<Uuid, Vec<&bom_line::Model>> = HashMap::new();
        for line in &lines {
            lines_by_version
                .entry(line.bom_version_id)
                .or_default()
                .push(line);
        }

        let component_union: Vec<Uuid> = {
            let set: HashSet<Uuid> = lines.iter().map(|l| l.component_id).collect();
            set.into_iter().collect()
        };
        let balances = sum_deltas(db, tenant_id, &component_union, location_id).await?;

        let results = product_ids
            .iter()
            .map(|product_id| {
                let version_lines = version_by_product
                    .get(product_id)
                    .and_then(|vid| lines_by_version.get(vid));
                match version_lines {
                    Some(version_lines) if !version_lines.is_empty() => {
                        compute_sku(*product_id, version_lines, &balances)
                    }
                    _ => SkuBuildability {
                        product_id: *product_id,
                        max_buildable: None,
                        limiting_components: Vec::new(),
                        components: Vec::new(),
                    },
                }
            })
            .collect();
        Ok(results)
    }
}

/// `floor(on_hand / quantity_per_unit)` per component, `min` across the BOM.
/// Not clamped at zero: a negative on-hand (possible after an override build)
/// yields a negative maximum and propagates through the minimum.
fn compute_sku(
    product_id: Uuid,
    lines: &[&bom_line::Model],
    balances: &HashMap<Uuid, Decimal>,
) -> SkuBuildability {
    let mut components: Vec<ComponentBuildability> = lines
        .iter()
        .map(|line| {
            let on_hand = balances
                .get(&line.component_id)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let component_max_buildable = (on_hand / line.quantity_per_unit)
                .floor()
                .to_i64()
                .unwrap_or(i64::MAX);
            ComponentBuildability {
                component_id: line.component_id,
                quantity_per_unit: line.quantity_per_unit,
                on_hand,
                component_max_buildable,
                is_binding: false,
            }
        })
        .collect();

    let max_buildable = components
        .iter()
        .map(|c| c.component_max_buildable)
        .min()
        .unwrap_or(0);
    for component in &mut components {
        component.is_binding = component.component_max_buildable == max_buildable;
    }
    let limiting_components = components
        .iter()
        .filter(|c| c.is_binding)
        .map(|c| c.component_id)
        .collect();

    SkuBuildability {
        product_id,
        max_buildable: Some(max_buildable),
        limiting_components,
        components,
    }
}
