pub mod stripe_gateway;
pub mod usecases;
