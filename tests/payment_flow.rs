use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use payflow::{
    application::{
        stripe_gateway::StripeGateway,
        usecases::{
            admin::AdminChargeUseCase,
            reconcile::ChargeReconciler,
            refunds::{RefundWorkflow, RequesterInfo},
            webhook::{WebhookHealth, WebhookUseCase},
        },
    },
    config::config_model::{ConfiguredMode, RetryPolicy, StripeSettings},
    domain::{
        entities::orders::OrderEntity,
        repositories::orders::OrderRepository,
        value_objects::enums::{
            capture_methods::CaptureMethod, order_statuses::OrderStatus,
            payment_modes::PaymentMode,
        },
    },
    infrastructure::{
        locks::InMemoryPaymentLockStore,
        memory::orders::InMemoryOrderRepository,
        stripe::{
            client::{CreateIntentParams, CreateRefundParams},
            errors::StripeError,
            types::{
                BalanceTransaction, Customer, PaymentIntent, Refund, WebhookEndpoint,
            },
        },
    },
};

const SITE_URL: &str = "https://shop.example";
const WEBHOOK_SECRET: &str = "whsec_integration";

/// Canned processor responses, keyed the way the use cases look them up.
#[derive(Default)]
struct StubGateway {
    intents: Mutex<HashMap<String, Value>>,
    balances: Mutex<HashMap<String, (i64, i64)>>,
    refund_queue: Mutex<Vec<Value>>,
    capture_result: Mutex<Option<Value>>,
}

impl StubGateway {
    fn put_intent(&self, intent_id: &str, intent: Value) {
        self.intents
            .lock()
            .unwrap()
            .insert(intent_id.to_string(), intent);
    }

    fn put_balance(&self, txn_id: &str, fee: i64, net: i64) {
        self.balances
            .lock()
            .unwrap()
            .insert(txn_id.to_string(), (fee, net));
    }

    fn queue_refund(&self, refund: Value) {
        self.refund_queue.lock().unwrap().push(refund);
    }

    fn set_capture_result(&self, intent: Value) {
        *self.capture_result.lock().unwrap() = Some(intent);
    }

    fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StripeError> {
        serde_json::from_value(value).map_err(|err| StripeError::Protocol(err.to_string()))
    }
}

#[async_trait]
impl StripeGateway for StubGateway {
    async fn create_payment_intent(
        &self,
        _mode: PaymentMode,
        _params: &CreateIntentParams,
        _idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeError> {
        Err(StripeError::Protocol("no canned intent creation".into()))
    }

    async fn retrieve_payment_intent(
        &self,
        _mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let canned = self.intents.lock().unwrap().get(intent_id).cloned();
        match canned {
            Some(value) => Self::parse(value),
            None => Err(StripeError::Protocol(format!(
                "no canned intent {intent_id}"
            ))),
        }
    }

    async fn capture_payment_intent(
        &self,
        _mode: PaymentMode,
        intent_id: &str,
        _amount_minor: Option<i64>,
    ) -> Result<PaymentIntent, StripeError> {
        let canned = self.capture_result.lock().unwrap().take();
        match canned {
            Some(value) => Self::parse(value),
            None => Err(StripeError::Protocol(format!(
                "no canned capture for {intent_id}"
            ))),
        }
    }

    async fn cancel_payment_intent(
        &self,
        _mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        Self::parse(json!({"id": intent_id, "status": "canceled"}))
    }

    async fn create_refund(
        &self,
        _mode: PaymentMode,
        _params: &CreateRefundParams,
    ) -> Result<Refund, StripeError> {
        let mut queue = self.refund_queue.lock().unwrap();
        if queue.is_empty() {
            return Err(StripeError::Protocol("no canned refund".into()));
        }
        Self::parse(queue.remove(0))
    }

    async fn create_customer(
        &self,
        _mode: PaymentMode,
        _email: Option<String>,
        _description: &str,
    ) -> Result<Customer, StripeError> {
        Err(StripeError::Protocol("no canned customer".into()))
    }

    async fn retrieve_customer(
        &self,
        _mode: PaymentMode,
        customer_id: &str,
    ) -> Result<Customer, StripeError> {
        Err(StripeError::Protocol(format!(
            "no canned customer {customer_id}"
        )))
    }

    async fn update_customer_description(
        &self,
        _mode: PaymentMode,
        customer_id: &str,
        _description: &str,
    ) -> Result<Customer, StripeError> {
        Err(StripeError::Protocol(format!(
            "no canned customer {customer_id}"
        )))
    }

    async fn retrieve_balance_transaction(
        &self,
        _mode: PaymentMode,
        txn_id: &str,
    ) -> Result<BalanceTransaction, StripeError> {
        let canned = self.balances.lock().unwrap().get(txn_id).copied();
        match canned {
            Some((fee, net)) => Self::parse(json!({
                "id": txn_id,
                "fee": fee,
                "net": net,
                "currency": "usd"
            })),
            None => Err(StripeError::Protocol(format!("no canned balance {txn_id}"))),
        }
    }

    async fn create_webhook_endpoint(
        &self,
        _mode: PaymentMode,
        _url: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        Err(StripeError::Protocol("no canned endpoint".into()))
    }

    async fn retrieve_webhook_endpoint(
        &self,
        _mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        Err(StripeError::Protocol(format!(
            "no canned endpoint {endpoint_id}"
        )))
    }

    async fn delete_webhook_endpoint(
        &self,
        _mode: PaymentMode,
        _endpoint_id: &str,
    ) -> Result<(), StripeError> {
        Ok(())
    }
}

struct World {
    repo: Arc<InMemoryOrderRepository>,
    stripe: Arc<StubGateway>,
    webhook: WebhookUseCase<InMemoryOrderRepository, InMemoryPaymentLockStore, StubGateway>,
    refunds: Arc<RefundWorkflow<InMemoryOrderRepository, StubGateway>>,
    admin: AdminChargeUseCase<InMemoryOrderRepository, StubGateway>,
}

fn settings() -> Arc<StripeSettings> {
    Arc::new(StripeSettings {
        mode: ConfiguredMode::Test,
        test_publishable_key: Some("pk_test_1".into()),
        test_secret_key: Some("sk_test_1".into()),
        live_publishable_key: None,
        live_secret_key: None,
        test_webhook_secret: Some(WEBHOOK_SECRET.into()),
        live_webhook_secret: None,
        test_webhook_endpoint_id: None,
        live_webhook_endpoint_id: None,
        capture_method: CaptureMethod::Automatic,
        save_cards: false,
        register_webhooks: false,
        retry_policy: RetryPolicy::Auto,
        statement_descriptor: None,
    })
}

fn world() -> World {
    let settings = settings();
    let repo = Arc::new(InMemoryOrderRepository::new());
    let locks = Arc::new(InMemoryPaymentLockStore::new());
    let stripe = Arc::new(StubGateway::default());
    let reconciler = Arc::new(ChargeReconciler::new(Arc::clone(&repo), Arc::clone(&stripe)));
    let refunds = Arc::new(RefundWorkflow::new(
        Arc::clone(&repo),
        Arc::clone(&stripe),
        Arc::clone(&settings),
    ));
    let webhook = WebhookUseCase::new(
        Arc::clone(&repo),
        locks,
        Arc::clone(&stripe),
        Arc::clone(&reconciler),
        Arc::clone(&refunds),
        Arc::clone(&settings),
        SITE_URL.to_string(),
        Arc::new(WebhookHealth::default()),
    );
    let admin = AdminChargeUseCase::new(Arc::clone(&repo), Arc::clone(&stripe), reconciler, settings);

    World {
        repo,
        stripe,
        webhook,
        refunds,
        admin,
    }
}

fn sign(payload: &str) -> String {
    let timestamp = "1700000000";
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={sig}")
}

async fn deliver(world: &World, payload: &Value) {
    let body = payload.to_string();
    world
        .webhook
        .handle(body.as_bytes(), &sign(&body))
        .await
        .unwrap();
}

fn seed_order(world: &World, status: OrderStatus) -> Uuid {
    let id = Uuid::new_v4();
    let mut order = OrderEntity::new(id, "wc_order_abc", 4999, "usd");
    order.status = status;
    world.repo.insert(order);
    id
}

fn charge_succeeded_event(order_id: Uuid) -> Value {
    json!({
        "id": "evt_1",
        "type": "charge.succeeded",
        "livemode": false,
        "data": {"object": {
            "id": "ch_1",
            "captured": true,
            "status": "succeeded",
            "amount": 4999,
            "amount_captured": 4999,
            "currency": "usd",
            "payment_intent": "pi_1",
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    })
}

async fn order(world: &World, id: Uuid) -> OrderEntity {
    world.repo.find_by_id(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn replayed_success_webhook_settles_the_order_once() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Pending);
    let event = charge_succeeded_event(order_id);

    deliver(&world, &event).await;
    deliver(&world, &event).await;

    let order = order(&world, order_id).await;
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.transaction_id.as_deref(), Some("ch_1"));
    assert!(order.charge_captured);
    assert_eq!(world.repo.stock_reduction_count(order_id), 1);

    let completions = order
        .notes
        .iter()
        .filter(|note| note.contains("completed via Stripe"))
        .count();
    assert_eq!(completions, 1);
    assert!(order.notes.iter().any(|note| note.contains("49.99 USD")));
}

#[tokio::test]
async fn charge_and_intent_success_events_converge() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Pending);
    world
        .repo
        .save_intent_ref(order_id, "pi_1", "pi_1_secret", PaymentMode::Test)
        .await
        .unwrap();

    deliver(&world, &charge_succeeded_event(order_id)).await;

    // The same settlement arrives again wrapped in the intent event.
    let intent_event = json!({
        "id": "evt_2",
        "type": "payment_intent.succeeded",
        "livemode": false,
        "data": {"object": {
            "id": "pi_1",
            "status": "succeeded",
            "charges": {"data": [{
                "id": "ch_1",
                "captured": true,
                "status": "succeeded",
                "amount": 4999,
                "currency": "usd",
                "payment_intent": "pi_1"
            }]},
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    });
    deliver(&world, &intent_event).await;

    let order = order(&world, order_id).await;
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(world.repo.stock_reduction_count(order_id), 1);
}

#[tokio::test]
async fn events_from_another_deployment_are_acknowledged_and_ignored() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Pending);

    let mut event = charge_succeeded_event(order_id);
    event["data"]["object"]["metadata"]["site_url"] = json!("https://other-shop.example");
    deliver(&world, &event).await;

    let order = order(&world, order_id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(world.repo.stock_reduction_count(order_id), 0);
}

#[tokio::test]
async fn charge_failure_marks_the_order_failed_with_the_decline_reason() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Pending);
    world.stripe.put_intent(
        "pi_1",
        json!({
            "id": "pi_1",
            "status": "requires_payment_method",
            "last_payment_error": {
                "type": "card_error",
                "code": "card_declined",
                "decline_code": "insufficient_funds",
                "message": "Your card has insufficient funds."
            }
        }),
    );

    let event = json!({
        "id": "evt_3",
        "type": "charge.failed",
        "livemode": false,
        "data": {"object": {
            "id": "ch_1",
            "captured": false,
            "status": "failed",
            "payment_intent": "pi_1",
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    });
    deliver(&world, &event).await;

    let order = order(&world, order_id).await;
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order
        .notes
        .iter()
        .any(|note| note.starts_with("Payment failed:")));
}

#[tokio::test]
async fn authorized_charge_holds_until_admin_captures() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Pending);
    world
        .repo
        .save_intent_ref(order_id, "pi_1", "pi_1_secret", PaymentMode::Test)
        .await
        .unwrap();

    let authorized = json!({
        "id": "evt_4",
        "type": "charge.succeeded",
        "livemode": false,
        "data": {"object": {
            "id": "ch_1",
            "captured": false,
            "status": "succeeded",
            "amount": 4999,
            "currency": "usd",
            "payment_intent": "pi_1",
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    });
    deliver(&world, &authorized).await;

    let held = order(&world, order_id).await;
    assert_eq!(held.status, OrderStatus::OnHold);
    assert!(held
        .notes
        .iter()
        .any(|note| note.contains("capture pending")));

    world.stripe.set_capture_result(json!({
        "id": "pi_1",
        "status": "succeeded",
        "charges": {"data": [{
            "id": "ch_1",
            "captured": true,
            "status": "succeeded",
            "amount": 4999,
            "amount_captured": 4999,
            "currency": "usd",
            "payment_intent": "pi_1"
        }]}
    }));
    world.admin.capture_charge(order_id, None).await.unwrap();

    let settled = order(&world, order_id).await;
    assert_eq!(settled.status, OrderStatus::Completed);
    assert_eq!(world.repo.stock_reduction_count(order_id), 1);
}

#[tokio::test]
async fn won_dispute_restores_the_pre_dispute_status() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Completed);
    world
        .repo
        .save_intent_ref(order_id, "pi_1", "pi_1_secret", PaymentMode::Test)
        .await
        .unwrap();

    let created = json!({
        "id": "evt_5",
        "type": "charge.dispute.created",
        "livemode": false,
        "data": {"object": {
            "id": "dp_1",
            "status": "needs_response",
            "payment_intent": "pi_1",
            "reason": "fraudulent"
        }}
    });
    deliver(&world, &created).await;

    let disputed = order(&world, order_id).await;
    assert_eq!(disputed.status, OrderStatus::OnHold);
    assert_eq!(disputed.status_before_dispute, Some(OrderStatus::Completed));

    let closed = json!({
        "id": "evt_6",
        "type": "charge.dispute.closed",
        "livemode": false,
        "data": {"object": {
            "id": "dp_1",
            "status": "won",
            "payment_intent": "pi_1"
        }}
    });
    deliver(&world, &closed).await;

    let restored = order(&world, order_id).await;
    assert_eq!(restored.status, OrderStatus::Completed);
    assert_eq!(restored.status_before_dispute, None);
}

#[tokio::test]
async fn partial_refunds_accumulate_and_the_echo_webhook_is_skipped() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::Completed);
    world
        .repo
        .save_intent_ref(order_id, "pi_1", "pi_1_secret", PaymentMode::Test)
        .await
        .unwrap();

    world.stripe.put_balance("txn_r1", 10, -69);
    world.stripe.put_balance("txn_r2", 5, -35);
    world.stripe.queue_refund(json!({
        "id": "re_1",
        "status": "succeeded",
        "amount": 59,
        "currency": "usd",
        "balance_transaction": "txn_r1"
    }));
    world.stripe.queue_refund(json!({
        "id": "re_2",
        "status": "succeeded",
        "amount": 30,
        "currency": "usd",
        "balance_transaction": "txn_r2"
    }));

    let first = world
        .refunds
        .refund(order_id, Some(59), None, RequesterInfo::default())
        .await
        .unwrap();
    let second = world
        .refunds
        .refund(order_id, Some(30), None, RequesterInfo::default())
        .await
        .unwrap();
    assert_eq!(first, "re_1");
    assert_eq!(second, "re_2");

    let refunded = order(&world, order_id).await;
    assert_eq!(refunded.fee_minor, 15);
    assert_eq!(refunded.net_minor, -104);
    assert_eq!(refunded.refund_id.as_deref(), Some("re_2"));

    // The processor echoes our own refund back; the lock window absorbs it.
    let echo = json!({
        "id": "evt_7",
        "type": "charge.refunded",
        "livemode": false,
        "data": {"object": {
            "id": "ch_1",
            "captured": true,
            "status": "succeeded",
            "amount_refunded": 89,
            "currency": "usd",
            "payment_intent": "pi_1",
            "refunds": {"data": [{"id": "re_2", "amount": 30, "currency": "usd"}]},
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    });
    deliver(&world, &echo).await;

    let after_echo = order(&world, order_id).await;
    assert_eq!(after_echo.fee_minor, 15);
    assert_eq!(after_echo.net_minor, -104);
}

#[tokio::test]
async fn refunding_an_uncaptured_charge_voids_the_order() {
    let world = world();
    let order_id = seed_order(&world, OrderStatus::OnHold);
    world
        .repo
        .save_intent_ref(order_id, "pi_1", "pi_1_secret", PaymentMode::Test)
        .await
        .unwrap();

    let released = json!({
        "id": "evt_8",
        "type": "charge.refunded",
        "livemode": false,
        "data": {"object": {
            "id": "ch_1",
            "captured": false,
            "status": "succeeded",
            "amount_refunded": 4999,
            "currency": "usd",
            "payment_intent": "pi_1",
            "refunds": {"data": [{"id": "re_9", "amount": 4999, "currency": "usd"}]},
            "metadata": {"site_url": SITE_URL, "order_id": order_id.to_string()}
        }}
    });
    deliver(&world, &released).await;

    let voided = order(&world, order_id).await;
    assert_eq!(voided.status, OrderStatus::Cancelled);
    assert!(voided
        .notes
        .iter()
        .any(|note| note.contains("voided at the processor")));
}
