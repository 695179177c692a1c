//! Shared harness: inventory core backed by an in-memory SQLite database.
// Each test binary uses a different subset of the helpers.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use stockledger::{
    config::AppConfig,
    db,
    entities::{component, location, product},
    events::{process_events, EventSender},
    InventoryCore,
};
use uuid::Uuid;

pub struct TestCore {
    pub core: InventoryCore,
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub tenant: Uuid,
    pub user: Uuid,
}

pub async fn setup() -> TestCore {
    // A single pooled connection so every handle sees the same in-memory DB.
    let mut cfg = AppConfig::new("sqlite::memory:");
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    let pool = db::establish_connection(&cfg).await.expect("db connect");
    db::init_schema(&pool).await.expect("schema");

    let (sender, rx) = EventSender::channel(64);
    tokio::spawn(process_events(rx));

    let db = Arc::new(pool);
    TestCore {
        core: InventoryCore::new(db.clone(), sender),
        db,
        tenant: Uuid::new_v4(),
        user: Uuid::new_v4(),
    }
}

pub async fn seed_location(ctx: &TestCore, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    location::ActiveModel {
        id: Set(id),
        tenant_id: Set(ctx.tenant),
        name: Set(name.to_string()),
    }
    .insert(&*ctx.db)
    .await
    .expect("seed location");
    id
}

pub async fn seed_component(ctx: &TestCore, name: &str, lot_tracked: bool) -> Uuid {
    seed_component_for(ctx, ctx.tenant, name, lot_tracked, None).await
}

pub async fn seed_component_for(
    ctx: &TestCore,
    tenant: Uuid,
    name: &str,
    lot_tracked: bool,
    lead_time_days: Option<i32>,
) -> Uuid {
    let id = Uuid::new_v4();
    component::ActiveModel {
        id: Set(id),
        tenant_id: Set(tenant),
        name: Set(name.to_string()),
        reorder_point: Set(Decimal::ZERO),
        lead_time_days: Set(lead_time_days),
        unit_cost: Set(None),
        lot_tracked: Set(lot_tracked),
        active: Set(true),
    }
    .insert(&*ctx.db)
    .await
    .expect("seed component");
    id
}

pub async fn seed_product(ctx: &TestCore, sku: &str) -> Uuid {
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        tenant_id: Set(ctx.tenant),
        sku: Set(sku.to_string()),
        name: Set(sku.to_string()),
        active: Set(true),
    }
    .insert(&*ctx.db)
    .await
    .expect("seed product");
    id
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
