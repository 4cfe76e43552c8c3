use tokio::net::TcpListener;
use walletwire_bridge::run_bridge;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8547".to_string());
    let listener = TcpListener::bind(&addr).await.expect("bind failed");
    tracing::info!(%addr, "bridge listening");
    run_bridge(listener).await;
}
