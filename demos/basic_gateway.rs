//! Start a switchboard gateway programmatically.
//!
//! Usage:
//!   export OPENAI_API_KEY=sk-your-key
//!   cargo run --example basic_gateway

use std::sync::Arc;
use switchboard::{build_router, AppState, GatewayConfig, SharedLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = GatewayConfig::find_and_load(None)?;
    let base_url = config.effective_base_url()?;

    println!("Backend: {} ({})", config.backend.name, base_url);
    println!("Protocol: {}", config.wire_protocol()?);
    println!("Models mapped: {}", config.models.len());

    let log = SharedLog::new("gateway-demo.log")?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        log,
    });

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("Listening on http://{}", addr);
    println!();
    println!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", port);

    axum::serve(listener, app).await?;
    Ok(())
}
