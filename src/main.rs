use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(error) = payflow::run().await {
        error!("Payment service exited with error: {}", error);
        std::process::exit(1);
    }
}
