use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::ForecastSettings,
    entities::{
        component::{self, Entity as ComponentEntity},
        ledger_line::{self, Entity as LedgerLineEntity},
        ledger_transaction::{self, Entity as LedgerTransactionEntity, TransactionType},
    },
    errors::ServiceError,
    services::balance::sum_deltas,
};

/// Projected consumption and reorder recommendation for one component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentForecast {
    pub component_id: Uuid,
    pub name: String,
    pub on_hand: Decimal,
    /// Magnitude of qualifying consumption over the lookback window.
    pub total_consumed: Decimal,
    pub avg_daily_consumption: Decimal,
    /// `None` when the component saw no qualifying consumption: a component
    /// with zero recent usage never needs reorder, whatever its on-hand.
    pub days_until_runout: Option<i64>,
    pub runout_date: Option<NaiveDate>,
    /// Surfaced whenever consumption is non-zero, including dates in the
    /// past. A past date means the reorder is already overdue; it is not
    /// clamped to today.
    pub recommended_reorder_date: Option<NaiveDate>,
    pub recommended_reorder_qty: Decimal,
    /// On hand at or below the component's reorder point (scaled by the
    /// tenant's warning multiplier). Consumed by alerting jobs.
    pub below_reorder_point: bool,
}

/// Sort keys for the forecast listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSort {
    /// Runout date ascending; rows that never run out sort last.
    #[default]
    RunoutAsc,
    ConsumptionDesc,
    NameAsc,
    ReorderQtyDesc,
}

/// One page of forecast rows, with the total row count after filtering.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastPage {
    pub rows: Vec<ComponentForecast>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Historical consumption analysis and runout/reorder projection.
#[derive(Clone)]
pub struct ForecastService {
    db: Arc<DatabaseConnection>,
}

impl ForecastService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Forecast for a single component. Unknown ids are a `NotFound`, not a
    /// computation full of nulls.
    #[instrument(skip(self, settings))]
    pub async fn forecast_component(
        &self,
        tenant_id: Uuid,
        component_id: Uuid,
        location_id: Option<Uuid>,
        settings: &ForecastSettings,
        today: NaiveDate,
    ) -> Result<ComponentForecast, ServiceError> {
        validate_settings(settings)?;
        let db = &*self.db;

        let component = ComponentEntity::find_by_id(component_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("component {} not found", component_id))
            })?;
        if component.tenant_id != tenant_id {
            return Err(ServiceError::AccessDenied(format!(
                "component {} belongs to another tenant",
                component_id
            )));
        }

        let consumed = self
            .consumption_by_component(tenant_id, &[component_id], location_id, settings, today)
            .await?;
        let balances = sum_deltas(db, tenant_id, &[component_id], location_id).await?;

        Ok(project(
            &component,
            balances.get(&component_id).copied().unwrap_or_default(),
            consumed.get(&component_id).copied().unwrap_or_default(),
            settings,
            today,
        ))
    }

    /// Forecasts every active component of the tenant.
    ///
    /// Computes all rows from one grouped consumption pass and one batched
    /// balance fetch, sorts the full set, optionally filters to at-risk rows,
    /// and only then paginates, so page boundaries are stable for any page
    /// size.
    #[instrument(skip(self, settings))]
    #[allow(clippy::too_many_arguments)]
    pub async fn list(
        &self,
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        settings: &ForecastSettings,
        today: NaiveDate,
        sort: ForecastSort,
        at_risk_only: bool,
        page: u64,
        per_page: u64,
    ) -> Result<ForecastPage, ServiceError> {
        validate_settings(settings)?;
        let db = &*self.db;

        let components = ComponentEntity::find()
            .filter(component::Column::TenantId.eq(tenant_id))
            .filter(component::Column::Active.eq(true))
            .all(db)
            .await?;
        let component_ids: Vec<Uuid> = components.iter().map(|c| c.id).collect();

        let consumed = self
            .consumption_by_component(tenant_id, &component_ids, location_id, settings, today)
            .await?;
        let balances = sum_deltas(db, tenant_id, &component_ids, location_id).await?;

        let mut rows: Vec<ComponentForecast> = components
            .iter()
            .map(|c| {
                project(
                    c,
                    balances.get(&c.id).copied().unwrap_or_default(),
                    consumed.get(&c.id).copied().unwrap_or_default(),
                    settings,
                    today,
                )
            })
            .collect();

        sort_rows(&mut rows, sort);
        if at_risk_only {
            rows.retain(|r| r.recommended_reorder_date.is_some());
        }

        let total = rows.len() as u64;
        let per_page = per_page.max(1);
        let page = page.max(1);
        let start = (page - 1).saturating_mul(per_page);
        let rows = if start >= rows.len() as u64 {
            Vec::new()
        } else {
            let start = start as usize;
            let end = start.saturating_add(per_page as usize).min(rows.len());
            rows[start..end].to_vec()
        };

        Ok(ForecastPage {
            rows,
            total,
            page,
            per_page,
        })
    }

    /// Sums the magnitude of qualifying negative deltas per component over
    /// the lookback window, in one query.
    async fn consumption_by_component(
        &self,
        tenant_id: Uuid,
        component_ids: &[Uuid],
        location_id: Option<Uuid>,
        settings: &ForecastSettings,
        today: NaiveDate,
    ) -> Result<HashMap<Uuid, Decimal>, ServiceError> {
        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        if component_ids.is_empty() {
            return Ok(totals);
        }

        let window_start = (today - Duration::days(settings.lookback_days))
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let window_end = (today + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();

        let rows = LedgerLineEntity::find()
            .find_also_related(LedgerTransactionEntity)
            .filter(ledger_transaction::Column::TenantId.eq(tenant_id))
            .filter(ledger_line::Column::EntityId.is_in(component_ids.to_vec()))
            .filter(ledger_line::Column::Delta.lt(Decimal::ZERO))
            .filter(ledger_transaction::Column::OccurredAt.gte(window_start))
            .filter(ledger_transaction::Column::OccurredAt.lt(window_end))
            .all(&*self.db)
            .await?;

        for (line, tx) in rows {
            let Some(tx) = tx else { continue };
            let Some(tx_type) = tx.tx_type() else {
                continue;
            };
            // Exhaustive on purpose: adding a transaction type forces a
            // decision about whether it counts as consumption.
            let excluded = match tx_type {
                TransactionType::Receipt
                | TransactionType::Build
                | TransactionType::Adjustment
                | TransactionType::Transfer
                | TransactionType::Outbound => settings.excluded_types.contains(&tx_type),
            };
            if excluded {
                continue;
            }
            if let Some(loc) = location_id {
                let effective = crate::services::balance::effective_location(&tx, &line);
                if effective != loc {
                    continue;
                }
            }
            *totals.entry(line.entity_id).or_default() += -line.delta;
        }
        Ok(totals)
    }
}

fn validate_settings(settings: &ForecastSettings) -> Result<(), ServiceError> {
    if settings.lookback_days <= 0 {
        return Err(ServiceError::Validation(
            "lookback_days must be positive".into(),
        ));
    }
    if settings.safety_days < 0 {
        return Err(ServiceError::Validation(
            "safety_days must not be negative".into(),
        ));
    }
    Ok(())
}

/// Projects runout and reorder figures for one component. Pure.
fn project(
    component: &component::Model,
    on_hand: Decimal,
    total_consumed: Decimal,
    settings: &ForecastSettings,
    today: NaiveDate,
) -> ComponentForecast {
    let lookback = Decimal::from(settings.lookback_days);
    let avg_daily_consumption = total_consumed / lookback;
    let lead_time_days = i64::from(
        component
            .lead_time_days
            .unwrap_or(settings.default_lead_time_days),
    );

    let (days_until_runout, runout_date, recommended_reorder_date, recommended_reorder_qty) =
        if avg_daily_consumption.is_zero() {
            (None, None, None, Decimal::ZERO)
        } else {
            let days = (on_hand / avg_daily_consumption)
                .floor()
                .to_i64()
                .unwrap_or(0);
            let runout = today + Duration::days(days);
            let reorder = runout - Duration::days(lead_time_days + settings.safety_days);
            let horizon =
                Decimal::from(settings.lookback_days + lead_time_days + settings.safety_days);
            let qty = ((avg_daily_consumption * horizon).ceil() - on_hand).max(Decimal::ZERO);
            (Some(days), Some(runout), Some(reorder), qty)
        };

    let below_reorder_point = component.reorder_point > Decimal::ZERO
        && on_hand <= component.reorder_point * settings.reorder_warning_multiplier;

    ComponentForecast {
        component_id: component.id,
        name: component.name.clone(),
        on_hand,
        total_consumed,
        avg_daily_consumption,
        days_until_runout,
        runout_date,
        recommended_reorder_date,
        recommended_reorder_qty,
        below_reorder_point,
    }
}

fn sort_rows(rows: &mut [ComponentForecast], sort: ForecastSort) {
    match sort {
        ForecastSort::RunoutAsc => rows.sort_by(|a, b| {
            a.runout_date
                .is_none()
                .cmp(&b.runout_date.is_none())
                .then(a.runout_date.cmp(&b.runout_date))
                .then_with(|| a.name.cmp(&b.name))
        }),
        ForecastSort::ConsumptionDesc => rows.sort_by(|a, b| {
            b.avg_daily_consumption
                .cmp(&a.avg_daily_consumption)
                .then_with(|| a.name.cmp(&b.name))
        }),
        ForecastSort::NameAsc => rows.sort_by(|a, b| a.name.cmp(&b.name)),
        ForecastSort::ReorderQtyDesc => rows.sort_by(|a, b| {
            b.recommended_reorder_qty
                .cmp(&a.recommended_reorder_qty)
                .then_with(|| a.name.cmp(&b.name))
        }),
    }
}
