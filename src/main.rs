use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use ai_stream_relay::config::{Cli, Config};
use ai_stream_relay::limiter::RateLimiter;
use ai_stream_relay::server::api::{build_router, AppState, TransportCapabilities};
use ai_stream_relay::upstream::openrouter::OpenRouterClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "ai_stream_relay=debug,tower_http=debug"
    } else {
        "ai_stream_relay=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("ai-stream-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let api_key = config.api_key()?;
    let config = Arc::new(config);

    info!(
        base_url = config.upstream.base_url,
        model = config.upstream.model,
        requests_per_second = config.limits.requests_per_second,
        max_prompt_length = config.limits.max_prompt_length,
        "Configuration loaded"
    );

    // Wire the upstream client and shared state.
    let upstream = OpenRouterClient::new(&config.upstream, api_key)?;
    let state = Arc::new(AppState {
        limiter: RateLimiter::new(config.limits.requests_per_second),
        upstream: Arc::new(upstream),
        transport: TransportCapabilities::default(),
        config: config.clone(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
