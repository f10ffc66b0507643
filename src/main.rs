// Módulos de la aplicación
mod analysis;
mod api;
mod app_state;
mod auth;
mod classifier;
mod config;
mod dataset;
mod db;
mod export;
mod kobo;
mod models;
mod quality;
mod render;
mod rules;
mod store;
mod suggestions;
mod sync;

use std::sync::Arc;

use crate::app_state::AppState;
use axum::Router;
use tokio::sync::{oneshot, watch};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a SQLite y asegurar el esquema
    let db = db::connect_from_config(&cfg)
        .await
        .expect("Error conectando a la base de datos");
    db::ensure_schema(&db)
        .await
        .expect("Error asegurando el esquema de la base de datos");

    // 4. Reglas de análisis y cliente de Kobo
    let rules = rules::AnalysisRules::standard().expect("Patrones de análisis inválidos");
    let kobo = kobo::KoboClient::new(cfg.kobo_api_url.clone());
    let sync = sync::AutoSyncService::new(db.clone(), kobo.clone(), cfg.auto_sync_poll, cfg.auto_sync_retry);

    // Canales de apagado: servidor (oneshot) y sincronización (watch).
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (stop_sync_tx, stop_sync_rx) = watch::channel(false);

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        db,
        kobo,
        rules: Arc::new(rules),
        sync: sync.clone(),
    };

    let sync_task = if cfg.auto_sync_enabled {
        Some(tokio::spawn(sync.run(stop_sync_rx)))
    } else {
        info!("Sincronización automática desactivada por configuración.");
        None
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);
    info!("📍 Health check: http://{}/api/health", cfg.server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
            let _ = stop_sync_tx.send(true);
        })
        .await
        .expect("Error en el servidor HTTP");

    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            warn!("La tarea de sincronización terminó con error: {e}");
        }
    }

    info!("✅ Servidor cerrado correctamente.");
}
