//! Router HTTP de la API y utilidades compartidas por los handlers.

mod charts;
mod projects;
mod tokens;
mod users;

use std::fmt::Display;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{delete, get, patch, post, put},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::error;

use crate::{app_state::AppState, sync::SyncStatus};

/// Error de un handler: estado HTTP y cuerpo `{"success": false, "error": …}`.
pub(crate) type ApiError = (StatusCode, Json<Value>);
pub(crate) type ApiResult<T> = Result<T, ApiError>;

pub(crate) fn api_error(status: StatusCode, message: impl Display) -> ApiError {
    (status, Json(json!({ "success": false, "error": message.to_string() })))
}

pub(crate) fn bad_request(message: impl Display) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn not_found(message: impl Display) -> ApiError {
    api_error(StatusCode::NOT_FOUND, message)
}

/// Registra el error y responde 500 con su mensaje.
pub(crate) fn internal(context: &str, e: impl Display) -> ApiError {
    error!("{context}: {e}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e)
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/health", get(health_handler))
        .route("/api/sync/status", get(sync_status_handler))
        // Usuarios
        .route("/api/auth/register", post(users::register_handler))
        .route("/api/auth/login", post(users::login_handler))
        .route("/api/auth/test", get(users::test_handler))
        // Tokens de Kobo
        .route("/api/tokens", get(tokens::list_tokens_handler).post(tokens::add_token_handler))
        .route(
            "/api/tokens/:id",
            put(tokens::rename_token_handler).delete(tokens::delete_token_handler),
        )
        // Kobo
        .route("/api/kobo/projects", post(projects::fetch_kobo_projects_handler))
        .route("/api/kobo/projects/:id/sync", post(projects::sync_project_handler))
        // Proyectos
        .route("/api/projects/save", post(projects::save_project_handler))
        .route("/api/projects/user", get(projects::user_projects_handler))
        .route("/api/projects/token/:token_id", get(projects::token_projects_handler))
        .route(
            "/api/projects/:id",
            get(projects::get_project_handler).delete(projects::delete_project_handler),
        )
        .route("/api/projects/:id/columns", put(projects::update_columns_handler))
        .route("/api/projects/:id/sync", post(projects::sync_project_handler))
        .route("/api/projects/:id/auto-sync", put(projects::auto_sync_handler))
        .route("/api/projects/:id/export", get(projects::export_handler))
        // Gráficos
        .route("/api/charts/analyze/:uid", post(charts::analyze_handler))
        .route("/api/charts/project/:uid", get(charts::project_charts_handler))
        .route("/api/charts/data/:id", get(charts::chart_data_handler))
        .route("/api/charts/config/:id", put(charts::update_chart_handler))
        .route("/api/charts/toggle/:id", patch(charts::toggle_chart_handler))
        .route("/api/charts/force-delete/:uid", delete(charts::force_delete_handler))
        .route("/api/charts/logs/:uid", get(charts::analysis_logs_handler))
        .route("/api/charts/quality/:uid", get(charts::quality_report_handler))
        .route("/api/charts/debug/:uid", get(charts::debug_handler))
        .route("/api/charts/:id", delete(charts::delete_chart_handler))
        .with_state(app_state)
}

// --- Handlers generales ---

#[axum::debug_handler]
async fn root_handler() -> Json<Value> {
    Json(json!({
        "message": "Welcome to Kobo Dashboard API!",
        "endpoints": {
            "kobo": "/api/kobo/projects",
            "tokens": "/api/tokens",
            "projects": "/api/projects",
            "charts": "/api/charts",
        }
    }))
}

#[axum::debug_handler]
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Server is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[axum::debug_handler]
async fn sync_status_handler(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync.status())
}


#[cfg(test)]
mod tests {
    use super::testing::{json_of, serve, test_state};
    use crate::kobo::testing::fake_kobo;

    #[tokio::test]
    async fn health_root_and_sync_status() {
        let base = serve(test_state(fake_kobo().await).await).await;
        let client = reqwest::Client::new();

        let (status, body) = json_of(client.get(format!("{base}/api/health")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "OK");

        let (_, body) = json_of(client.get(format!("{base}/")).send().await.unwrap()).await;
        assert_eq!(body["message"], "Welcome to Kobo Dashboard API!");

        let (status, body) = json_of(client.get(format!("{base}/api/sync/status")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["isRunning"], false);
        assert_eq!(body["maxConcurrent"], 3);
        assert_eq!(body["queueLength"], 0);
    }
}
