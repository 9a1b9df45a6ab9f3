use relaygate::error::AppError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,relaygate=debug")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let state = relaygate::app::load_state().await?;
    let app = relaygate::app::build_app(state.clone());
    let addr: std::net::SocketAddr =
        state
            .runtime
            .listen
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                AppError::new(
                    axum::http::StatusCode::BAD_REQUEST,
                    "listen_invalid",
                    err.to_string(),
                )
            })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        AppError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "listen_failed",
            err.to_string(),
        )
    })?;
    tracing::info!("relaygate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            AppError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "serve_failed",
                err.to_string(),
            )
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
