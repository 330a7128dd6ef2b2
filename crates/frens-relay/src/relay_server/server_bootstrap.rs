//! Relay server bootstrap and router wiring.
use std::future::Future;

use super::*;

/// Binds `config.bind` and serves until ctrl-c.
pub async fn run_relay_server(config: RelayServerConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --relay-bind '{}'", config.bind))?;

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind relay server on {bind_addr}"))?;
    serve_relay(listener, config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serves relay connections on an already bound listener until `shutdown`
/// resolves, running the allow-list refresh loop alongside when an interval
/// is configured.
pub async fn serve_relay<F>(
    listener: TcpListener,
    config: RelayServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound relay server address")?;

    info!(
        addr = %local_addr,
        name = config.info.name.as_str(),
        allowlist_source = config.allowlist_source.label(),
        members = config.gate.allowlist().len(),
        store = config.store.label(),
        "relay server listening"
    );

    let mut allowlist_refresh = start_allowlist_refresh_runtime(
        Arc::clone(&config.allowlist_source),
        config.gate.allowlist().clone(),
        config.allowlist_refresh_interval,
    );
    let state = Arc::new(RelayServerState::new(config));
    let app = build_relay_router(state);
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;
    allowlist_refresh.shutdown().await;
    serve_result.context("relay server exited unexpectedly")?;

    info!(addr = %local_addr, "relay server stopped");
    Ok(())
}

pub(super) fn build_relay_router(state: Arc<RelayServerState>) -> Router {
    Router::new()
        .route(RELAY_ROOT_ENDPOINT, get(handle_relay_root))
        .with_state(state)
}
