use clap::Parser;
use gemini_anti_truncate::handler::build_router;
use gemini_anti_truncate::logging::{init_tracing, setup_panic_hook};
use gemini_anti_truncate::main_helper::{build_http_client, AppState, Args, ProxyConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _guard = init_tracing(&args);
    setup_panic_hook();

    let client = match build_http_client(&args) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let config = ProxyConfig::from_args(&args);
    tracing::info!(
        upstream = %config.upstream_url_base,
        max_retries = config.max_retries,
        debug = config.debug_mode,
        managed_models = ?config.managed_models,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(client, config));
    let app = build_router(state, args.max_body_size);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Gemini anti-truncation proxy listening on {}", addr);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
