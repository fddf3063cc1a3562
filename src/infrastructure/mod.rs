pub mod axum_http;
pub mod locks;
pub mod memory;
pub mod stripe;
