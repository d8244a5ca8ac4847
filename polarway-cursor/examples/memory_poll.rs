use std::sync::Arc;

use polarway_cursor::{MemoryProvider, StreamEvent, StreamFactory, StreamOptions};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_i64(name: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(name) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let nrows = env_i64("POLARWAY_CURSOR_NROWS", 2)?;
    let interval_ms = env_i64("POLARWAY_CURSOR_INTERVAL_MS", 250)?;

    // Captured result set standing in for a server-side cursor.
    let provider = MemoryProvider::new();
    provider.register(
        "SELECT symbol, price FROM ticks",
        vec![
            json!({"symbol": "AAPL", "price": 189.3}),
            json!({"symbol": "MSFT", "price": 402.1}),
            json!({"symbol": "NVDA", "price": 875.0}),
            json!({"symbol": "AMZN", "price": 178.6}),
            json!({"symbol": "GOOG", "price": 151.2}),
        ],
    );

    let options = StreamOptions::new("SELECT symbol, price FROM ticks")
        .with_nrows(nrows)
        .with_interval_ms(interval_ms);
    let factory = StreamFactory::new(Arc::new(provider), &options)?;
    info!("Streaming with {}", serde_json::to_string(factory.config())?);

    let mut stream = factory.create()?;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Data(row) => println!("{}", row),
            StreamEvent::Error(e) => eprintln!("stream error: {}", e),
            StreamEvent::End => info!("Cursor exhausted"),
            StreamEvent::Close => info!("Stream closed after {:?}", stream.stats()),
        }
    }

    Ok(())
}
