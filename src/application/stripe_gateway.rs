use async_trait::async_trait;

use crate::{
    domain::value_objects::enums::payment_modes::PaymentMode,
    infrastructure::stripe::{
        client::{CreateIntentParams, CreateRefundParams, StripeClient},
        errors::StripeError,
        types::{BalanceTransaction, Customer, PaymentIntent, Refund, WebhookEndpoint},
    },
};

/// Processor surface the use cases depend on, mockable in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        mode: PaymentMode,
        params: &CreateIntentParams,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeError>;

    async fn retrieve_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError>;

    async fn capture_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<PaymentIntent, StripeError>;

    async fn cancel_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError>;

    async fn create_refund(
        &self,
        mode: PaymentMode,
        params: &CreateRefundParams,
    ) -> Result<Refund, StripeError>;

    async fn create_customer(
        &self,
        mode: PaymentMode,
        email: Option<String>,
        description: &str,
    ) -> Result<Customer, StripeError>;

    async fn retrieve_customer(
        &self,
        mode: PaymentMode,
        customer_id: &str,
    ) -> Result<Customer, StripeError>;

    async fn update_customer_description(
        &self,
        mode: PaymentMode,
        customer_id: &str,
        description: &str,
    ) -> Result<Customer, StripeError>;

    async fn retrieve_balance_transaction(
        &self,
        mode: PaymentMode,
        txn_id: &str,
    ) -> Result<BalanceTransaction, StripeError>;

    async fn create_webhook_endpoint(
        &self,
        mode: PaymentMode,
        url: &str,
    ) -> Result<WebhookEndpoint, StripeError>;

    async fn retrieve_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<WebhookEndpoint, StripeError>;

    async fn delete_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<(), StripeError>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    async fn create_payment_intent(
        &self,
        mode: PaymentMode,
        params: &CreateIntentParams,
        idempotency_key: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.create_payment_intent(mode, params, idempotency_key)
            .await
    }

    async fn retrieve_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.retrieve_payment_intent(mode, intent_id).await
    }

    async fn capture_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
        amount_minor: Option<i64>,
    ) -> Result<PaymentIntent, StripeError> {
        self.capture_payment_intent(mode, intent_id, amount_minor)
            .await
    }

    async fn cancel_payment_intent(
        &self,
        mode: PaymentMode,
        intent_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.cancel_payment_intent(mode, intent_id).await
    }

    async fn create_refund(
        &self,
        mode: PaymentMode,
        params: &CreateRefundParams,
    ) -> Result<Refund, StripeError> {
        self.create_refund(mode, params).await
    }

    async fn create_customer(
        &self,
        mode: PaymentMode,
        email: Option<String>,
        description: &str,
    ) -> Result<Customer, StripeError> {
        self.create_customer(mode, email.as_deref(), description)
            .await
    }

    async fn retrieve_customer(
        &self,
        mode: PaymentMode,
        customer_id: &str,
    ) -> Result<Customer, StripeError> {
        self.retrieve_customer(mode, customer_id).await
    }

    async fn update_customer_description(
        &self,
        mode: PaymentMode,
        customer_id: &str,
        description: &str,
    ) -> Result<Customer, StripeError> {
        self.update_customer_description(mode, customer_id, description)
            .await
    }

    async fn retrieve_balance_transaction(
        &self,
        mode: PaymentMode,
        txn_id: &str,
    ) -> Result<BalanceTransaction, StripeError> {
        self.retrieve_balance_transaction(mode, txn_id).await
    }

    async fn create_webhook_endpoint(
        &self,
        mode: PaymentMode,
        url: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        self.create_webhook_endpoint(mode, url).await
    }

    async fn retrieve_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<WebhookEndpoint, StripeError> {
        self.retrieve_webhook_endpoint(mode, endpoint_id).await
    }

    async fn delete_webhook_endpoint(
        &self,
        mode: PaymentMode,
        endpoint_id: &str,
    ) -> Result<(), StripeError> {
        self.delete_webhook_endpoint(mode, endpoint_id).await
    }
}
