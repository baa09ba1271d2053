pub mod config;
pub mod error;
pub mod geo;
pub mod http;
pub mod inference;
pub mod mac;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod state;
pub mod tcp;
pub mod webhook;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use persistence::{Adapter, FileAdapter};
use state::model::{BeaconType, KnownBeaconDef};
use state::Store;

/// Default known-beacon table, seeded the way the original deployment
/// ships fixed test hardware (`original_source/setup_database.py`).
pub fn default_known_beacons() -> Vec<KnownBeaconDef> {
    vec![
        KnownBeaconDef {
            mac: "f008d1d55c3c".to_string(),
            name: "Eybe2plus1".to_string(),
            category: "Towed Device".to_string(),
            beacon_type: BeaconType::EyeBeacon,
            serial: "Eybe2plus1".to_string(),
        },
        KnownBeaconDef {
            mac: "f008d1d54c72".to_string(),
            name: "Eybe2plus2".to_string(),
            category: "Equipment".to_string(),
            beacon_type: BeaconType::EyeBeacon,
            serial: "Eybe2plus2".to_string(),
        },
        KnownBeaconDef {
            mac: "f008d1d516fb".to_string(),
            name: "Eysen2plus".to_string(),
            category: "Safety".to_string(),
            beacon_type: BeaconType::EyeSensor,
            serial: "Eysen2plus".to_string(),
        },
    ]
}

/// Wires config, state, persistence, the TCP listener, and the HTTP
/// server together. `main.rs` is just a thin entry point around this.
pub async fn run() {
    let settings = Arc::new(config::Settings::from_env());
    info!(tcp_port = settings.tcp_port, http_port = settings.http_port, "starting fleet-ble-broker");

    let store = Store::new();
    store.seed_known_beacons(default_known_beacons());

    let metrics = Arc::new(metrics::Metrics::new());
    let persistence: Arc<dyn Adapter> = FileAdapter::spawn(settings.persist_log_path.clone(), metrics.clone());
    for (_, reg) in persistence.load_scanners().await {
        store.register_scanner(reg);
    }

    let params = inference::Params::from(&*settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tcp_task = {
        let settings = settings.clone();
        let store = store.clone();
        let persistence = persistence.clone();
        let metrics = metrics.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = tcp::run(settings, store, persistence, params, metrics, shutdown_rx).await {
                tracing::error!(error = %e, "tcp_listener_failed");
            }
        })
    };

    let app_state =
        http::AppState { store: store.clone(), persistence: persistence.clone(), params, metrics, db_enabled: false };
    let app = http::router(app_state);
    let http_addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = match tokio::net::TcpListener::bind(http_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %http_addr, "http_bind_failed");
            std::process::exit(1);
        }
    };
    info!(%http_addr, "http_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown_signal_received");
            let _ = shutdown_tx.send(true);
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "http_server_failed");
            std::process::exit(1);
        });

    let _ = tcp_task.await;
}
