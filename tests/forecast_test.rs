//! Consumption forecast integration tests.
//!
//! Transactions are recorded "now", so every test passes `Utc::now()`'s date
//! as `today` and the lookback window always covers what it just wrote.

mod common;

use chrono::Utc;
use common::{seed_component, seed_component_for, seed_location, setup};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stockledger::{
    config::ForecastSettings,
    errors::ServiceError,
    services::{
        forecast::ForecastSort,
        ledger::{AdjustmentInput, OutboundInput, ReceiptInput},
    },
};
use uuid::Uuid;

async fn receive(ctx: &common::TestCore, component_id: Uuid, location_id: Uuid, qty: Decimal) {
    ctx.core
        .ledger
        .record_receipt(
            ctx.tenant,
            ReceiptInput {
                component_id,
                location_id,
                quantity: qty,
                unit_cost: None,
                source: None,
                lot: None,
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();
}

async fn ship(ctx: &common::TestCore, entity_id: Uuid, location_id: Uuid, qty: Decimal) {
    ctx.core
        .ledger
        .record_outbound(
            ctx.tenant,
            OutboundInput {
                entity_id,
                location_id,
                quantity: qty,
                channel: None,
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();
}

fn settings() -> ForecastSettings {
    ForecastSettings {
        lookback_days: 30,
        safety_days: 2,
        ..ForecastSettings::default()
    }
}

#[tokio::test]
async fn outbound_history_drives_runout_and_reorder_qty() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component_for(&ctx, ctx.tenant, "resistor", false, Some(7)).await;
    let today = Utc::now().date_naive();

    receive(&ctx, comp, loc, dec!(350)).await;
    ship(&ctx, comp, loc, dec!(300)).await;

    let row = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &settings(), today)
        .await
        .unwrap();

    assert_eq!(row.on_hand, dec!(50));
    assert_eq!(row.total_consumed, dec!(300));
    assert_eq!(row.avg_daily_consumption, dec!(10));
    assert_eq!(row.days_until_runout, Some(5));
    assert_eq!(row.runout_date, Some(today + chrono::Duration::days(5)));
    // ceil(10 * (30 + 7 + 2)) - 50
    assert_eq!(row.recommended_reorder_qty, dec!(340));
}

#[tokio::test]
async fn adjustments_are_excluded_from_consumption_by_default() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component(&ctx, "capacitor", false).await;
    let today = Utc::now().date_naive();

    receive(&ctx, comp, loc, dec!(100)).await;
    ctx.core
        .ledger
        .record_adjustment(
            ctx.tenant,
            AdjustmentInput {
                entity_id: comp,
                location_id: loc,
                quantity: dec!(-40),
                reason: "cycle count".into(),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();
    ship(&ctx, comp, loc, dec!(30)).await;

    let row = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &settings(), today)
        .await
        .unwrap();
    // The write-off moved the balance but not the consumption history.
    assert_eq!(row.on_hand, dec!(30));
    assert_eq!(row.total_consumed, dec!(30));

    let mut include_all = settings();
    include_all.excluded_types.clear();
    let row = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &include_all, today)
        .await
        .unwrap();
    assert_eq!(row.total_consumed, dec!(70));
}

#[tokio::test]
async fn zero_history_forecasts_no_runout() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component(&ctx, "idle", false).await;
    let today = Utc::now().date_naive();

    receive(&ctx, comp, loc, dec!(500)).await;

    let row = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &settings(), today)
        .await
        .unwrap();
    assert_eq!(row.on_hand, dec!(500));
    assert_eq!(row.days_until_runout, None);
    assert_eq!(row.runout_date, None);
    assert_eq!(row.recommended_reorder_date, None);
    assert_eq!(row.recommended_reorder_qty, Decimal::ZERO);
}

#[tokio::test]
async fn location_scope_restricts_history_and_on_hand() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "split", false).await;
    let today = Utc::now().date_naive();

    receive(&ctx, comp, loc_a, dec!(100)).await;
    receive(&ctx, comp, loc_b, dec!(100)).await;
    ship(&ctx, comp, loc_a, dec!(60)).await;
    ship(&ctx, comp, loc_b, dec!(15)).await;

    let scoped = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, Some(loc_b), &settings(), today)
        .await
        .unwrap();
    assert_eq!(scoped.on_hand, dec!(85));
    assert_eq!(scoped.total_consumed, dec!(15));

    let global = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &settings(), today)
        .await
        .unwrap();
    assert_eq!(global.on_hand, dec!(125));
    assert_eq!(global.total_consumed, dec!(75));
}

#[tokio::test]
async fn unknown_component_is_not_found_and_foreign_tenant_is_denied() {
    let ctx = setup().await;
    let today = Utc::now().date_naive();

    let missing = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, Uuid::new_v4(), None, &settings(), today)
        .await;
    assert!(matches!(missing, Err(ServiceError::NotFound(_))));

    let other_tenant = Uuid::new_v4();
    let foreign = seed_component_for(&ctx, other_tenant, "foreign", false, None).await;
    let denied = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, foreign, None, &settings(), today)
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied(_))));
}

#[tokio::test]
async fn listing_sorts_filters_then_paginates() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let today = Utc::now().date_naive();

    // Three consumers with distinct runout horizons plus one idle component.
    let soon = seed_component(&ctx, "soon", false).await;
    receive(&ctx, soon, loc, dec!(60)).await;
    ship(&ctx, soon, loc, dec!(30)).await; // 1/day, 30 days left

    let later = seed_component(&ctx, "later", false).await;
    receive(&ctx, later, loc, dec!(330)).await;
    ship(&ctx, later, loc, dec!(30)).await; // 1/day, 300 days left

    let latest = seed_component(&ctx, "latest", false).await;
    receive(&ctx, latest, loc, dec!(630)).await;
    ship(&ctx, latest, loc, dec!(30)).await; // 1/day, 600 days left

    let idle = seed_component(&ctx, "idle", false).await;
    receive(&ctx, idle, loc, dec!(10)).await;

    let page = ctx
        .core
        .forecasts
        .list(
            ctx.tenant,
            None,
            &settings(),
            today,
            ForecastSort::RunoutAsc,
            false,
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    let names: Vec<&str> = page.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["soon", "later", "latest", "idle"]);

    // At-risk filtering drops the idle row; it happens before pagination, so
    // a one-row page walks the same order.
    for (n, expected) in [(1, "soon"), (2, "later"), (3, "latest")] {
        let page = ctx
            .core
            .forecasts
            .list(
                ctx.tenant,
                None,
                &settings(),
                today,
                ForecastSort::RunoutAsc,
                true,
                n,
                1,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].name, expected);
    }

    // Past the last page: empty rows, same total.
    let page = ctx
        .core
        .forecasts
        .list(
            ctx.tenant,
            None,
            &settings(),
            today,
            ForecastSort::RunoutAsc,
            true,
            4,
            1,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert!(page.rows.is_empty());
}

#[tokio::test]
async fn huge_page_numbers_return_empty_pages_not_panics() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component(&ctx, "only", false).await;
    let today = Utc::now().date_naive();
    receive(&ctx, comp, loc, dec!(10)).await;

    let page = ctx
        .core
        .forecasts
        .list(
            ctx.tenant,
            None,
            &settings(),
            today,
            ForecastSort::NameAsc,
            false,
            u64::MAX,
            u64::MAX,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(page.rows.is_empty());
}

#[tokio::test]
async fn invalid_settings_are_rejected() {
    let ctx = setup().await;
    let comp = seed_component(&ctx, "x", false).await;
    let today = Utc::now().date_naive();

    let mut bad = settings();
    bad.lookback_days = 0;
    let result = ctx
        .core
        .forecasts
        .forecast_component(ctx.tenant, comp, None, &bad, today)
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}
