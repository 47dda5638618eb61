//! Frozen prices stay frozen and add up.

use std::sync::Arc;

use common::{Cart, CartId, CartLine, CheckoutId, CurrencyCode, ManualClock, Money};
use pricing::{
    InMemoryPricingResolver, InMemorySnapshotStore, PriceRequest, PriceSnapshotService,
    PricingContext, SnapshotScope, reconcile,
};

fn usd() -> CurrencyCode {
    CurrencyCode::new("USD").unwrap()
}

fn cart() -> Cart {
    Cart::new(CartId::new(), usd())
        .with_line(CartLine::new("l1", "SHIRT", 3))
        .with_line(CartLine::new("l2", "SOCKS", 7))
        .with_line(CartLine::new("l3", "HAT", 1))
        .with_coupon("SAVE15")
}

fn setup() -> (PriceSnapshotService<InMemorySnapshotStore>, InMemoryPricingResolver) {
    let resolver = InMemoryPricingResolver::new();
    resolver.set_price("SHIRT", Money::from_cents(1999));
    resolver.set_price("SOCKS", Money::from_cents(333));
    resolver.set_price("HAT", Money::from_cents(1250));
    resolver.set_coupon("SAVE15", 1500);
    resolver.set_tax_rate(725);
    let service = PriceSnapshotService::new(
        InMemorySnapshotStore::new(),
        Arc::new(resolver.clone()),
        Arc::new(ManualClock::starting_now()),
    );
    (service, resolver)
}

#[tokio::test]
async fn test_snapshot_ignores_later_price_changes() {
    let (service, resolver) = setup();
    let cart = cart();
    let checkout = CheckoutId::new();
    let requests: Vec<PriceRequest> = cart.lines.iter().map(PriceRequest::from).collect();
    let context = PricingContext {
        coupon_code: cart.coupon_code.clone(),
        ..PricingContext::default()
    };

    let frozen = service
        .freeze(checkout, &cart.currency, &requests, &context)
        .await
        .unwrap();

    resolver.set_price("SHIRT", Money::from_cents(99_999));
    resolver.set_tax_rate(2500);
    resolver.set_fail(true);

    let reread = service.for_checkout(checkout).await.unwrap().unwrap();
    assert_eq!(reread.cart.grand_total(), frozen.cart.grand_total());
    assert_eq!(reread.lines, frozen.lines);
    let shirt = reread.line(&"l1".into()).unwrap();
    assert_eq!(shirt.unit_price(), Some(Money::from_cents(1999)));
    assert_eq!(shirt.coupon_code(), Some("SAVE15"));
}

#[tokio::test]
async fn test_line_snapshots_reconcile_with_cart_snapshot() {
    let (service, _) = setup();
    let cart = cart();
    let requests: Vec<PriceRequest> = cart.lines.iter().map(PriceRequest::from).collect();
    let context = PricingContext {
        coupon_code: cart.coupon_code.clone(),
        ..PricingContext::default()
    };

    let frozen = service
        .freeze(CheckoutId::new(), &cart.currency, &requests, &context)
        .await
        .unwrap();

    reconcile(&frozen.cart, &frozen.lines, 1).unwrap();
    let line_sum: Money = frozen.lines.iter().map(|l| l.grand_total()).sum();
    assert!(line_sum.abs_diff(frozen.cart.grand_total()) <= 1);
    assert_eq!(
        frozen.cart.subtotal() - frozen.cart.discount_total() + frozen.cart.tax_total(),
        frozen.cart.grand_total()
    );
    assert!(frozen.cart.discount_total() > Money::ZERO);
    assert!(frozen
        .lines
        .iter()
        .all(|l| matches!(l.scope(), SnapshotScope::Line { .. })));
}

#[tokio::test]
async fn test_partially_held_lines_are_priced_at_the_held_quantity() {
    let (service, _) = setup();
    let requests = vec![PriceRequest {
        line_id: "l1".into(),
        variant_id: "SOCKS".into(),
        quantity: 4,
    }];

    let frozen = service
        .freeze(CheckoutId::new(), &usd(), &requests, &PricingContext::default())
        .await
        .unwrap();

    assert_eq!(frozen.lines[0].subtotal(), Money::from_cents(1332));
    assert_eq!(
        frozen.lines[0].scope(),
        &SnapshotScope::line("l1", "SOCKS", 4)
    );
}
