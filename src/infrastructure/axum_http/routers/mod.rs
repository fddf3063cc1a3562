pub mod admin_charges;
pub mod checkout;
pub mod stripe_webhook;
