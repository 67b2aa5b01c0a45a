use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{signal, sync::mpsc};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use paymongo_checkout as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Outbound seams: processor API and invoice delivery
    let processor = Arc::new(api::paymongo::PaymongoClient::new(&cfg.paymongo)?);
    let notifier = Arc::new(api::notifications::EventInvoiceNotifier::new(
        event_sender.clone(),
    ));

    if cfg.paymongo.enabled {
        info!(
            mode = cfg.paymongo.mode().as_str(),
            "PayMongo gateway enabled"
        );
        if cfg.paymongo.credentials().webhook_secret.is_none() {
            warn!("No webhook signing secret for the active mode; webhooks will be rejected");
        }
    } else {
        info!("PayMongo gateway disabled; orders will not get payment intents");
    }
    info!(
        "Register this webhook URL with PayMongo: {}",
        cfg.store.url("paymongo/webhook")
    );

    let app_state = api::AppState::new(
        db_arc,
        cfg.clone(),
        processor,
        notifier,
        event_sender,
    );

    let app = api::app_router(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.http_timeout_secs)));

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("paymongo-checkout listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
    info!("Shutdown signal received");
}
