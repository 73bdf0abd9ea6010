use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use tribute_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events; notifications are written by the background worker
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    let sink = Arc::new(api::notifications::DbNotificationSink::new(db_arc.clone()));
    let handlers: Vec<Arc<dyn api::events::EventHandler>> =
        vec![Arc::new(api::notifications::NotificationDispatcher::new(sink))];
    tokio::spawn(api::events::process_events(event_rx, handlers));

    // Payment gateway
    let secret_key = match cfg.gateway_secret_key.clone() {
        Some(key) => key,
        None if cfg.is_development() => {
            warn!("Gateway secret key not configured; paid checkouts will fail");
            String::new()
        }
        None => anyhow::bail!("gateway_secret_key must be set outside development"),
    };
    let gateway = Arc::new(api::gateway::StripeGateway::new(
        cfg.gateway_api_base.clone(),
        secret_key,
        cfg.gateway_timeout(),
    )?);

    let services = api::handlers::AppServices::new(
        db_arc.clone(),
        &cfg,
        event_sender.clone(),
        gateway,
        Arc::new(api::cache::InMemoryCache::new()),
    );
    let seeded = services.prices.seed_defaults().await?;
    info!(seeded, "price catalog ready");

    let auth = Arc::new(api::auth::AuthService::new((&cfg).into()));
    let cors = api::cors_layer(&cfg)?;

    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        event_sender,
        auth,
        services,
    };
    let app = api::build_router(app_state, cors);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    info!("tribute-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
