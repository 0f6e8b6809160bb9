//! End-to-end settlement flow tests against in-memory SQLite:
//! session creation and validation, payment initiation, gateway-verified
//! payment outcomes, correlation replay protection, and finalization.

mod common;

use chrono::Duration;
use common::{checkout_item, setup, shipping_address, two_item_checkout};
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_api::{
    entities::checkout_session::{CheckoutStatus, PaymentMethod},
    errors::ServiceError,
    gateway::GatewayPaymentStatus,
    services::{CreateCheckoutInput, VerificationOutcome},
};

#[tokio::test]
async fn create_session_computes_total_and_starts_pending() {
    let env = setup().await;
    let owner_id = Uuid::new_v4();

    let created = env
        .services
        .checkout
        .create_session(owner_id, two_item_checkout())
        .await
        .expect("session created");

    assert_eq!(created.session.status, CheckoutStatus::Pending);
    assert_eq!(created.session.total_price, dec!(1500));
    assert_eq!(created.session.owner_id, owner_id);
    assert!(created.session.payment_correlation_id.is_none());
    assert_eq!(created.items.len(), 2);
    assert_eq!(created.items[0].line_total, dec!(1000));
    // No gateway traffic before initiation
    assert_eq!(env.gateway.initiate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn create_session_rejects_empty_items() {
    let env = setup().await;
    let input = CreateCheckoutInput {
        items: vec![],
        shipping_address: shipping_address(),
        payment_method: PaymentMethod::Khalti,
    };

    let err = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), input)
        .await
        .expect_err("empty checkout must be rejected");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn create_session_rejects_non_positive_quantity() {
    let env = setup().await;
    let input = CreateCheckoutInput {
        items: vec![checkout_item("Plain Tee", 0, dec!(500))],
        shipping_address: shipping_address(),
        payment_method: PaymentMethod::Khalti,
    };

    let err = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), input)
        .await
        .expect_err("zero quantity must be rejected");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn initiate_payment_stores_correlation_id() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");

    let initiation = env
        .services
        .checkout
        .initiate_payment(created.session.id)
        .await
        .expect("payment initiated");

    assert_eq!(initiation.correlation_id, "pidx_1");
    assert!(!initiation.redirect_url.is_empty());

    let reloaded = env
        .services
        .checkout
        .load_session(created.session.id)
        .await
        .expect("session reloads");
    assert_eq!(reloaded.session.status, CheckoutStatus::PaymentInitiated);
    assert_eq!(
        reloaded.session.payment_correlation_id.as_deref(),
        Some("pidx_1")
    );
}

#[tokio::test]
async fn initiate_payment_twice_is_rejected() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");

    env.services
        .checkout
        .initiate_payment(created.session.id)
        .await
        .expect("first initiation");

    let err = env
        .services
        .checkout
        .initiate_payment(created.session.id)
        .await
        .expect_err("second initiation must be rejected");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    // The gateway was only asked once
    assert_eq!(
        env.gateway
            .initiate_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

// Scenario: completed payment settles into a finalized order with the cart
// cleared.
#[tokio::test]
async fn completed_payment_settles_into_order() {
    let env = setup().await;
    let owner_id = Uuid::new_v4();
    common::seed_cart(&env.db, owner_id).await;

    let created = env
        .services
        .checkout
        .create_session(owner_id, two_item_checkout())
        .await
        .expect("session created");
    let session_id = created.session.id;

    let initiation = env
        .services
        .checkout
        .initiate_payment(session_id)
        .await
        .expect("payment initiated");
    assert_eq!(initiation.correlation_id, "pidx_1");

    env.gateway.set_lookup_status(GatewayPaymentStatus::Completed);
    let outcome = env
        .services
        .verifier
        .verify_payment(session_id, "pidx_1")
        .await
        .expect("verification");
    assert!(matches!(outcome, VerificationOutcome::Paid { .. }));

    let paid = env
        .services
        .checkout
        .load_session(session_id)
        .await
        .expect("session reloads");
    assert_eq!(paid.session.status, CheckoutStatus::Paid);
    assert!(paid.session.paid_at.is_some());

    let finalized = env
        .services
        .finalizer
        .finalize(session_id)
        .await
        .expect("finalize");
    assert!(finalized.order.is_paid);
    assert!(!finalized.order.is_delivered);
    assert_eq!(finalized.order.checkout_session_id, session_id);
    assert_eq!(finalized.order.total_price, dec!(1500));
    assert_eq!(finalized.order.payment_correlation_id.as_deref(), Some("pidx_1"));

    let settled = env
        .services
        .checkout
        .load_session(session_id)
        .await
        .expect("session reloads");
    assert_eq!(settled.session.status, CheckoutStatus::Finalized);
    assert!(settled.session.finalized_at.is_some());

    assert!(!common::active_cart_exists(&env.db, owner_id).await);
}

// Scenario: a lookup that is not Completed marks the session failed and
// blocks finalization.
#[tokio::test]
async fn pending_lookup_fails_session_and_blocks_finalize() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");
    let session_id = created.session.id;

    env.services
        .checkout
        .initiate_payment(session_id)
        .await
        .expect("payment initiated");

    env.gateway.set_lookup_status(GatewayPaymentStatus::Pending);
    let outcome = env
        .services
        .verifier
        .verify_payment(session_id, "pidx_1")
        .await
        .expect("verification completes with failure outcome");
    assert_eq!(
        outcome,
        VerificationOutcome::Failed {
            gateway_status: "Pending".to_string()
        }
    );

    let failed = env
        .services
        .checkout
        .load_session(session_id)
        .await
        .expect("session reloads");
    assert_eq!(failed.session.status, CheckoutStatus::Failed);

    let err = env
        .services
        .finalizer
        .finalize(session_id)
        .await
        .expect_err("failed session cannot finalize");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn verify_payment_is_idempotent_after_paid() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");
    let session_id = created.session.id;

    env.services
        .checkout
        .initiate_payment(session_id)
        .await
        .expect("payment initiated");

    env.gateway.set_lookup_status(GatewayPaymentStatus::Completed);
    let first = env
        .services
        .verifier
        .verify_payment(session_id, "pidx_1")
        .await
        .expect("first verification");
    assert_eq!(env.gateway.lookup_count(), 1);

    let second = env
        .services
        .verifier
        .verify_payment(session_id, "pidx_1")
        .await
        .expect("second verification");

    // Same result, and no second gateway lookup
    assert_eq!(first, second);
    assert_eq!(env.gateway.lookup_count(), 1);
}

// Scenario: a correlation id that does not match the stored one is rejected
// and the session is left untouched.
#[tokio::test]
async fn mismatched_correlation_id_is_rejected() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");
    let session_id = created.session.id;

    env.services
        .checkout
        .initiate_payment(session_id)
        .await
        .expect("payment initiated");

    let err = env
        .services
        .verifier
        .verify_payment(session_id, "pidx_999")
        .await
        .expect_err("replayed correlation id must be rejected");
    assert!(matches!(err, ServiceError::CorrelationMismatch(id) if id == session_id));

    // No gateway traffic and no state change
    assert_eq!(env.gateway.lookup_count(), 0);
    let unchanged = env
        .services
        .checkout
        .load_session(session_id)
        .await
        .expect("session reloads");
    assert_eq!(unchanged.session.status, CheckoutStatus::PaymentInitiated);
}

#[tokio::test]
async fn verify_payment_requires_initiation() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");

    let err = env
        .services
        .verifier
        .verify_payment(created.session.id, "pidx_1")
        .await
        .expect_err("pending session cannot verify");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn finalize_requires_paid_status() {
    let env = setup().await;
    let owner_id = Uuid::new_v4();

    // Pending
    let pending = env
        .services
        .checkout
        .create_session(owner_id, two_item_checkout())
        .await
        .expect("session created");
    let err = env
        .services
        .finalizer
        .finalize(pending.session.id)
        .await
        .expect_err("pending session cannot finalize");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    // PaymentInitiated
    env.services
        .checkout
        .initiate_payment(pending.session.id)
        .await
        .expect("payment initiated");
    let err = env
        .services
        .finalizer
        .finalize(pending.session.id)
        .await
        .expect_err("initiated session cannot finalize");
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn order_copies_session_snapshot_exactly() {
    let env = setup().await;
    let owner_id = Uuid::new_v4();

    let created = env
        .services
        .checkout
        .create_session(owner_id, two_item_checkout())
        .await
        .expect("session created");
    let session_id = created.session.id;

    env.services
        .checkout
        .initiate_payment(session_id)
        .await
        .expect("payment initiated");
    env.services
        .verifier
        .verify_payment(session_id, "pidx_1")
        .await
        .expect("verification");

    let finalized = env
        .services
        .finalizer
        .finalize(session_id)
        .await
        .expect("finalize");

    let session = env
        .services
        .checkout
        .load_session(session_id)
        .await
        .expect("session reloads");

    assert_eq!(finalized.order.owner_id, session.session.owner_id);
    assert_eq!(
        finalized.order.shipping_address,
        session.session.shipping_address
    );
    assert_eq!(finalized.order.payment_method, session.session.payment_method);
    assert_eq!(finalized.order.total_price, session.session.total_price);
    assert_eq!(finalized.order.paid_at, session.session.paid_at);

    assert_eq!(finalized.items.len(), session.items.len());
    for (order_item, session_item) in finalized.items.iter().zip(session.items.iter()) {
        assert_eq!(order_item.product_id, session_item.product_id);
        assert_eq!(order_item.name, session_item.name);
        assert_eq!(order_item.variant, session_item.variant);
        assert_eq!(order_item.quantity, session_item.quantity);
        assert_eq!(order_item.unit_price, session_item.unit_price);
        assert_eq!(order_item.line_total, session_item.line_total);
        assert_eq!(order_item.position, session_item.position);
    }
}

#[tokio::test]
async fn ownership_gates_session_reads() {
    let env = setup().await;
    let owner_id = Uuid::new_v4();
    let created = env
        .services
        .checkout
        .create_session(owner_id, two_item_checkout())
        .await
        .expect("session created");

    let err = env
        .services
        .checkout
        .get_session_for_owner(created.session.id, Uuid::new_v4())
        .await
        .expect_err("foreign session must read as missing");
    assert!(matches!(err, ServiceError::NotFound(_)));

    env.services
        .checkout
        .get_session_for_owner(created.session.id, owner_id)
        .await
        .expect("owner can read");
}

#[tokio::test]
async fn stale_initiated_sessions_are_listed_for_reconciliation() {
    let env = setup().await;
    let created = env
        .services
        .checkout
        .create_session(Uuid::new_v4(), two_item_checkout())
        .await
        .expect("session created");
    env.services
        .checkout
        .initiate_payment(created.session.id)
        .await
        .expect("payment initiated");

    let stale = env
        .services
        .checkout
        .stale_payment_initiated(Duration::zero())
        .await
        .expect("stale listing");
    assert!(stale.iter().any(|s| s.id == created.session.id));

    // A recent cutoff excludes it
    let stale = env
        .services
        .checkout
        .stale_payment_initiated(Duration::hours(1))
        .await
        .expect("stale listing");
    assert!(stale.iter().all(|s| s.id != created.session.id));
}
