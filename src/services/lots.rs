use std::cmp::Ordering;

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    entities::lot::{self, Entity as LotEntity},
    errors::ServiceError,
};

/// One draw against a lot, produced by FEFO planning. Each draw becomes its
/// own ledger line so the audit trail records exactly which lots were
/// depleted and by how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub lot_code: String,
    pub quantity: Decimal,
    /// True when this draw empties the lot.
    pub depleted: bool,
}

/// Outcome of planning a consumption of `needed` units against a lot list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FefoPlan {
    Satisfied(Vec<LotDraw>),
    Short {
        available: Decimal,
        shortfall: Decimal,
    },
}

/// First-Expiry-First-Out ordering: earliest expiry first, undated lots after
/// all dated lots, ties broken by received date then lot code so planning is
/// reproducible.
pub fn fefo_cmp(a: &lot::Model, b: &lot::Model) -> Ordering {
    a.expiry_date
        .is_none()
        .cmp(&b.expiry_date.is_none())
        .then(a.expiry_date.cmp(&b.expiry_date))
        .then(a.received_date.cmp(&b.received_date))
        .then(a.lot_code.cmp(&b.lot_code))
}

/// Walks lots in FEFO order, drawing `min(remaining, still_needed)` from each
/// until the requirement is met or lots run out. Pure; touches no storage.
pub fn plan_consumption(lots: &[lot::Model], needed: Decimal) -> FefoPlan {
    let mut ordered: Vec<&lot::Model> = lots.iter().filter(|l| l.remaining > Decimal::ZERO).collect();
    ordered.sort_by(|a, b| fefo_cmp(a, b));

    let mut draws = Vec::new();
    let mut still_needed = needed;
    for lot in &ordered {
        if still_needed <= Decimal::ZERO {
            break;
        }
        let take = lot.remaining.min(still_needed);
        still_needed -= take;
        draws.push(LotDraw {
            lot_id: lot.id,
            lot_code: lot.lot_code.clone(),
            quantity: take,
            depleted: take == lot.remaining,
        });
    }

    if still_needed > Decimal::ZERO {
        let available = needed - still_needed;
        FefoPlan::Short {
            available,
            shortfall: still_needed,
        }
    } else {
        FefoPlan::Satisfied(draws)
    }
}

/// Plans and applies a FEFO consumption inside the caller's DB transaction.
///
/// Returns the applied draws plus any remainder lot rows could not cover;
/// the caller posts the remainder as a lot-less line. Lot rows only account
/// for stock received with lot metadata, so availability is the caller's
/// ledger-balance check, not a property of the lot list. `remaining` never
/// goes below zero here.
pub(crate) async fn draw_lots<C: ConnectionTrait>(
    db: &C,
    tenant_id: Uuid,
    component_id: Uuid,
    location_id: Uuid,
    needed: Decimal,
) -> Result<(Vec<LotDraw>, Decimal), ServiceError> {
    let lots = LotEntity::find()
        .filter(lot::Column::TenantId.eq(tenant_id))
        .filter(lot::Column::ComponentId.eq(component_id))
        .filter(lot::Column::LocationId.eq(location_id))
        .filter(lot::Column::Remaining.gt(Decimal::ZERO))
        .all(db)
        .await?;

    let (draws, remainder) = match plan_consumption(&lots, needed) {
        FefoPlan::Satisfied(draws) => (draws, Decimal::ZERO),
        FefoPlan::Short {
            available,
            shortfall,
        } => {
            // Drain every lot; the uncovered rest posts without a lot.
            match plan_consumption(&lots, available) {
                FefoPlan::Satisfied(draws) => (draws, shortfall),
                FefoPlan::Short { .. } => (Vec::new(), needed),
            }
        }
    };

    for draw in &draws {
        let lot = lots
            .iter()
            .find(|l| l.id == draw.lot_id)
            .ok_or_else(|| ServiceError::Internal("planned draw references unknown lot".into()))?;
        let mut active: lot::ActiveModel = lot.clone().into();
        active.remaining = Set(lot.remaining - draw.quantity);
        active.update(db).await?;
        debug!(lot_code = %draw.lot_code, quantity = %draw.quantity, "lot drawn");
    }

    Ok((draws, remainder))
}
