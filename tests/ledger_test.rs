//! Ledger writer and balance aggregator integration tests.

mod common;

use common::{seed_component, seed_component_for, seed_location, seed_product, setup};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use stockledger::{
    entities::ledger_line,
    errors::ServiceError,
    services::ledger::{AdjustmentInput, OutboundInput, ReceiptInput, TransferInput},
};
use uuid::Uuid;

fn receipt(component_id: Uuid, location_id: Uuid, quantity: Decimal, user: Uuid) -> ReceiptInput {
    ReceiptInput {
        component_id,
        location_id,
        quantity,
        unit_cost: None,
        source: None,
        lot: None,
        created_by: user,
    }
}

#[tokio::test]
async fn receipt_then_inverse_adjustment_restores_balance() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component(&ctx, "widget-frame", false).await;

    let before = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, None)
        .await
        .unwrap();
    assert_eq!(before, Decimal::ZERO);

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc, dec!(100), ctx.user))
        .await
        .unwrap();
    ctx.core
        .ledger
        .record_adjustment(
            ctx.tenant,
            AdjustmentInput {
                entity_id: comp,
                location_id: loc,
                quantity: dec!(-100),
                reason: "cycle count".into(),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    let after = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, None)
        .await
        .unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn global_quantity_equals_sum_of_all_deltas() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "bolt", false).await;

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_a, dec!(40), ctx.user))
        .await
        .unwrap();
    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_b, dec!(10), ctx.user))
        .await
        .unwrap();
    ctx.core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_b,
                quantity: dec!(15),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    // Transfers net to zero globally.
    let global = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, None)
        .await
        .unwrap();
    assert_eq!(global, dec!(50));

    let lines = ledger_line::Entity::find().all(&*ctx.db).await.unwrap();
    let manual: Decimal = lines
        .iter()
        .filter(|l| l.entity_id == comp)
        .map(|l| l.delta)
        .sum();
    assert_eq!(manual, global);
}

#[tokio::test]
async fn transfer_lines_sum_to_zero_and_scope_correctly() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "panel", false).await;

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_a, dec!(30), ctx.user))
        .await
        .unwrap();
    let tx_id = ctx
        .core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_b,
                quantity: dec!(12),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    let lines = ledger_line::Entity::find().all(&*ctx.db).await.unwrap();
    let transfer_sum: Decimal = lines
        .iter()
        .filter(|l| l.transaction_id == tx_id)
        .map(|l| l.delta)
        .sum();
    assert_eq!(transfer_sum, Decimal::ZERO);

    let at_a = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, Some(loc_a))
        .await
        .unwrap();
    let at_b = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, Some(loc_b))
        .await
        .unwrap();
    assert_eq!(at_a, dec!(18));
    assert_eq!(at_b, dec!(12));
}

#[tokio::test]
async fn transfer_rejects_same_location_and_shortfall() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "gear", false).await;

    let same = ctx
        .core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_a,
                quantity: dec!(1),
                created_by: ctx.user,
            },
        )
        .await;
    assert!(matches!(same, Err(ServiceError::Validation(_))));

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_a, dec!(5), ctx.user))
        .await
        .unwrap();
    let short = ctx
        .core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_b,
                quantity: dec!(8),
                created_by: ctx.user,
            },
        )
        .await;
    match short {
        Err(ServiceError::InsufficientInventory { shortfall, .. }) => {
            assert_eq!(shortfall, dec!(3));
        }
        other => panic!("expected InsufficientInventory, got {:?}", other),
    }

    // Failed transfer wrote nothing.
    let at_a = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, comp, Some(loc_a))
        .await
        .unwrap();
    assert_eq!(at_a, dec!(5));
}

#[tokio::test]
async fn outbound_shortfall_carries_missing_quantity() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let sku = seed_product(&ctx, "FG-1").await;

    ctx.core
        .ledger
        .record_adjustment(
            ctx.tenant,
            AdjustmentInput {
                entity_id: sku,
                location_id: loc,
                quantity: dec!(4),
                reason: "seed".into(),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    let result = ctx
        .core
        .ledger
        .record_outbound(
            ctx.tenant,
            OutboundInput {
                entity_id: sku,
                location_id: loc,
                quantity: dec!(10),
                channel: Some("amazon".into()),
                created_by: ctx.user,
            },
        )
        .await;
    match result {
        Err(ServiceError::InsufficientInventory {
            entity_id,
            shortfall,
        }) => {
            assert_eq!(entity_id, sku);
            assert_eq!(shortfall, dec!(6));
        }
        other => panic!("expected InsufficientInventory, got {:?}", other),
    }
}

#[tokio::test]
async fn validation_rejects_bad_quantities_before_any_write() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let comp = seed_component(&ctx, "screw", false).await;

    let zero_receipt = ctx
        .core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc, dec!(0), ctx.user))
        .await;
    assert!(matches!(zero_receipt, Err(ServiceError::Validation(_))));

    let zero_adjust = ctx
        .core
        .ledger
        .record_adjustment(
            ctx.tenant,
            AdjustmentInput {
                entity_id: comp,
                location_id: loc,
                quantity: Decimal::ZERO,
                reason: "noop".into(),
                created_by: ctx.user,
            },
        )
        .await;
    assert!(matches!(zero_adjust, Err(ServiceError::Validation(_))));

    let lines = ledger_line::Entity::find().all(&*ctx.db).await.unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
async fn cross_tenant_entity_reference_is_denied() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let foreign_tenant = Uuid::new_v4();
    let foreign_comp = seed_component_for(&ctx, foreign_tenant, "theirs", false, None).await;

    let read = ctx
        .core
        .balances
        .get_quantity(ctx.tenant, foreign_comp, None)
        .await;
    assert!(matches!(read, Err(ServiceError::AccessDenied(_))));

    let batch = ctx
        .core
        .balances
        .get_quantities(ctx.tenant, &[foreign_comp], None)
        .await;
    assert!(matches!(batch, Err(ServiceError::AccessDenied(_))));

    let write = ctx
        .core
        .ledger
        .record_receipt(ctx.tenant, receipt(foreign_comp, loc, dec!(1), ctx.user))
        .await;
    assert!(matches!(write, Err(ServiceError::AccessDenied(_))));
}

#[tokio::test]
async fn get_quantities_returns_every_requested_id() {
    let ctx = setup().await;
    let loc = seed_location(&ctx, "main").await;
    let with_stock = seed_component(&ctx, "stocked", false).await;
    let without_stock = seed_component(&ctx, "empty", false).await;

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(with_stock, loc, dec!(7), ctx.user))
        .await
        .unwrap();

    let totals = ctx
        .core
        .balances
        .get_quantities(ctx.tenant, &[with_stock, without_stock], None)
        .await
        .unwrap();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[&with_stock], dec!(7));
    assert_eq!(totals[&without_stock], Decimal::ZERO);

    let empty = ctx
        .core
        .balances
        .get_quantities(ctx.tenant, &[], None)
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn summary_by_location_groups_transfer_endpoints() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "cable", false).await;

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_a, dec!(20), ctx.user))
        .await
        .unwrap();
    ctx.core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_b,
                quantity: dec!(20),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    let summary = ctx
        .core
        .balances
        .summary_by_location(ctx.tenant, comp)
        .await
        .unwrap();
    let find = |loc| {
        summary
            .iter()
            .find(|s| s.location_id == loc)
            .map(|s| s.quantity)
    };
    assert_eq!(find(loc_a), Some(Decimal::ZERO));
    assert_eq!(find(loc_b), Some(dec!(20)));
}

#[tokio::test]
async fn balance_cache_rebuild_matches_ledger() {
    let ctx = setup().await;
    let loc_a = seed_location(&ctx, "a").await;
    let loc_b = seed_location(&ctx, "b").await;
    let comp = seed_component(&ctx, "strap", false).await;

    ctx.core
        .ledger
        .record_receipt(ctx.tenant, receipt(comp, loc_a, dec!(50), ctx.user))
        .await
        .unwrap();
    ctx.core
        .ledger
        .record_transfer(
            ctx.tenant,
            TransferInput {
                entity_id: comp,
                from_location_id: loc_a,
                to_location_id: loc_b,
                quantity: dec!(20),
                created_by: ctx.user,
            },
        )
        .await
        .unwrap();

    // Incremental maintenance should already agree with the ledger.
    let drift = ctx.core.balances.reconcile(ctx.tenant).await.unwrap();
    assert!(drift.is_empty(), "unexpected drift: {:?}", drift);

    // And a full rebuild from the ledger converges to the same state.
    ctx.core.balances.rebuild_balances(ctx.tenant).await.unwrap();
    let drift = ctx.core.balances.reconcile(ctx.tenant).await.unwrap();
    assert!(drift.is_empty(), "drift after rebuild: {:?}", drift);
}
