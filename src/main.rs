#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "fleet_ble_broker=info,tower_http=info".into()))
        .json()
        .init();

    fleet_ble_broker::run().await;
}
