use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{api_error, bad_request, internal, not_found, ApiResult};
use crate::{
    app_state::AppState,
    auth::CurrentUser,
    dataset::{parse_date, Record},
    export::{self, ExportFormat},
    store::{self, NewProject},
    sync::{after, format_interval, parse_interval, DEFAULT_INTERVAL},
};

/// Serializa `item` y le añade los campos de `extra`.
fn merged(item: &impl Serialize, extra: Value) -> ApiResult<Value> {
    let mut value = serde_json::to_value(item).map_err(|e| internal("Error serializando el proyecto", e))?;
    if let (Value::Object(target), Value::Object(fields)) = (&mut value, extra) {
        target.extend(fields);
    }
    Ok(value)
}

// --- Kobo ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchProjectsPayload {
    token: Option<String>,
    token_name: Option<String>,
}

#[axum::debug_handler]
pub async fn fetch_kobo_projects_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<FetchProjectsPayload>,
) -> ApiResult<Json<Value>> {
    let token = payload
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("API token is required"))?;

    let assets = state
        .kobo
        .list_assets(&token)
        .await
        .map_err(|e| internal("Error consultando Kobo", e))?;
    let projects = state
        .kobo
        .fetch_projects(&token, assets, state.config.kobo_fetch_concurrency)
        .await;

    let name = payload
        .token_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "Untitled Token".to_string());
    let saved = store::insert_token(&state.db, user.id(), &name, &token)
        .await
        .map_err(|e| internal("Error guardando el token", e))?;

    let total_submissions: usize = projects.iter().map(|p| p.total_submissions).sum();
    info!("Kobo: {} proyectos y {total_submissions} envíos descargados", projects.len());
    Ok(Json(json!({
        "success": true,
        "tokenId": saved.id,
        "tokenName": saved.name,
        "tokenPreview": saved.token_preview,
        "totalProjects": projects.len(),
        "totalSubmissions": total_submissions,
        "projects": projects,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

// --- Proyectos ---

#[derive(Deserialize)]
pub struct SaveProjectPayload {
    token_id: i64,
    #[serde(default)]
    uid: String,
    name: Option<String>,
    #[serde(rename = "owner__username")]
    owner_username: Option<String>,
    date_created: Option<String>,
    #[serde(rename = "deployment__active")]
    deployment_active: Option<bool>,
    #[serde(default)]
    submissions: Vec<Record>,
    #[serde(default)]
    available_columns: Vec<String>,
    selected_columns: Option<Vec<String>>,
    data_url: Option<String>,
}

#[axum::debug_handler]
pub async fn save_project_handler(
    State(state): State<AppState>,
    Json(payload): Json<SaveProjectPayload>,
) -> ApiResult<Json<Value>> {
    let uid = payload.uid.trim().to_string();
    if uid.is_empty() {
        return Err(bad_request("Project uid is required"));
    }
    let existing = store::find_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error buscando el proyecto", e))?;
    if existing.is_some() {
        return Err(bad_request("Project already saved"));
    }

    let selected_columns = payload
        .selected_columns
        .unwrap_or_else(|| payload.available_columns.clone());
    let project = store::insert_project(
        &state.db,
        NewProject {
            token_id: payload.token_id,
            project_uid: uid.clone(),
            project_name: payload.name.unwrap_or_else(|| "Untitled Project".to_string()),
            owner_username: payload.owner_username,
            date_created: Some(
                payload
                    .date_created
                    .as_deref()
                    .and_then(parse_date)
                    .unwrap_or_else(Utc::now),
            ),
            deployment_active: payload.deployment_active.unwrap_or(false),
            total_submissions: payload.submissions.len() as i64,
            available_columns: payload.available_columns,
            selected_columns,
            data_url: payload.data_url,
        },
    )
    .await
    .map_err(|e| internal("Error guardando el proyecto", e))?;

    if !payload.submissions.is_empty() {
        store::upsert_submissions(&state.db, &uid, &payload.submissions)
            .await
            .map_err(|e| internal("Error guardando los envíos", e))?;
    }

    info!("Proyecto {uid} guardado con {} envíos", payload.submissions.len());
    Ok(Json(json!({ "success": true, "message": "Project saved successfully", "project": project })))
}

#[axum::debug_handler]
pub async fn token_projects_handler(
    State(state): State<AppState>,
    Path(token_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let projects = store::projects_for_token(&state.db, token_id)
        .await
        .map_err(|e| internal("Error listando proyectos", e))?;

    let mut listed = Vec::with_capacity(projects.len());
    for project in projects {
        let uid = &project.project.project_uid;
        let submissions = store::submissions_for_project(&state.db, uid)
            .await
            .map_err(|e| internal("Error leyendo envíos", e))?;
        listed.push(merged(
            &project,
            json!({ "total_submissions": submissions.len(), "submissions": submissions }),
        )?);
    }
    Ok(Json(json!({ "success": true, "projects": listed })))
}

#[axum::debug_handler]
pub async fn user_projects_handler(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Json<Value>> {
    let projects = store::projects_for_user(&state.db, user.id())
        .await
        .map_err(|e| internal("Error listando proyectos", e))?;

    let mut listed = Vec::with_capacity(projects.len());
    for project in projects {
        let count = store::count_submissions(&state.db, &project.project.project_uid)
            .await
            .map_err(|e| internal("Error contando envíos", e))?;
        listed.push(merged(&project, json!({ "total_submissions": count }))?);
    }
    Ok(Json(json!({ "success": true, "projects": listed })))
}

#[axum::debug_handler]
pub async fn get_project_handler(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<Value>> {
    let project = store::find_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error buscando el proyecto", e))?
        .ok_or_else(|| not_found("Project not found"))?;
    let submissions = store::submissions_for_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error leyendo envíos", e))?;

    let project = merged(
        &project,
        json!({ "total_submissions": submissions.len(), "submissions": submissions }),
    )?;
    Ok(Json(json!({ "success": true, "project": project })))
}

#[axum::debug_handler]
pub async fn delete_project_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let deleted = store::delete_project(&state.db, id)
        .await
        .map_err(|e| internal("Error borrando el proyecto", e))?
        .ok_or_else(|| not_found("Project not found"))?;
    info!("Proyecto {} borrado", deleted.project_uid);
    Ok(Json(json!({ "success": true, "message": "Project deleted successfully", "project": deleted })))
}

#[derive(Deserialize)]
pub struct ColumnsPayload {
    #[serde(default)]
    selected_columns: Vec<String>,
}

#[axum::debug_handler]
pub async fn update_columns_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<ColumnsPayload>,
) -> ApiResult<Json<Value>> {
    let project = store::update_selected_columns(&state.db, &uid, payload.selected_columns)
        .await
        .map_err(|e| internal("Error actualizando columnas", e))?
        .ok_or_else(|| not_found("Project not found"))?;
    Ok(Json(json!({ "success": true, "message": "Columns updated successfully", "project": project })))
}

// --- Sincronización ---

#[derive(Deserialize, Default)]
pub struct SyncPayload {
    #[serde(default)]
    submissions: Vec<Record>,
}

/// Con envíos en el cuerpo los inserta/actualiza; si no, descarga el
/// formulario desde Kobo con el servicio de sincronización.
#[axum::debug_handler]
pub async fn sync_project_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    payload: Option<Json<SyncPayload>>,
) -> ApiResult<Json<Value>> {
    let Json(payload) = payload.unwrap_or_default();

    let total = if payload.submissions.is_empty() {
        let project = store::project_with_token(&state.db, &uid)
            .await
            .map_err(|e| internal("Error buscando el proyecto", e))?
            .ok_or_else(|| not_found("Project not found"))?;
        if state.sync.is_syncing(&uid) {
            return Err(api_error(StatusCode::CONFLICT, "Project is already syncing"));
        }
        let outcome = state
            .sync
            .manual_sync(&project)
            .await
            .map_err(|e| internal("Error sincronizando el proyecto", e))?;
        outcome.total_submissions as i64
    } else {
        if store::find_project(&state.db, &uid)
            .await
            .map_err(|e| internal("Error buscando el proyecto", e))?
            .is_none()
        {
            return Err(not_found("Project not found"));
        }
        store::upsert_submissions(&state.db, &uid, &payload.submissions)
            .await
            .map_err(|e| internal("Error guardando los envíos", e))?;
        let total = store::count_submissions(&state.db, &uid)
            .await
            .map_err(|e| internal("Error contando envíos", e))?;
        store::record_sync(&state.db, &uid, total)
            .await
            .map_err(|e| internal("Error registrando la sincronización", e))?;
        total
    };

    Ok(Json(json!({
        "success": true,
        "message": "Project synced successfully",
        "total_submissions": total,
        "last_sync": Utc::now().to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct AutoSyncPayload {
    enabled: bool,
    interval: Option<String>,
}

#[axum::debug_handler]
pub async fn auto_sync_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(payload): Json<AutoSyncPayload>,
) -> ApiResult<Json<Value>> {
    let interval = match payload.interval.as_deref() {
        Some(raw) => parse_interval(raw).map_err(bad_request)?,
        None => DEFAULT_INTERVAL,
    };
    let next_sync_time = payload.enabled.then(|| after(interval));

    let project = store::configure_auto_sync(
        &state.db,
        &uid,
        payload.enabled,
        Some(interval.as_secs() as i64),
        next_sync_time,
    )
    .await
    .map_err(|e| internal("Error configurando la sincronización automática", e))?
    .ok_or_else(|| not_found("Project not found"))?;

    info!(
        "Sincronización automática de {uid} {} (intervalo {})",
        if payload.enabled { "activada" } else { "desactivada" },
        format_interval(interval)
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Auto-sync {}", if payload.enabled { "enabled" } else { "disabled" }),
        "interval": format_interval(interval),
        "project": project,
    })))
}

// --- Exportación ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    format: Option<String>,
    include_all_columns: Option<String>,
}

#[axum::debug_handler]
pub async fn export_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let project = store::find_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error buscando el proyecto", e))?
        .ok_or_else(|| not_found("Project not found"))?;
    let records = store::submissions_for_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error leyendo envíos", e))?;
    if records.is_empty() {
        return Err(bad_request("No data to export"));
    }

    let format: ExportFormat = query.format.as_deref().unwrap_or("csv").parse().map_err(bad_request)?;
    let include_all = query.include_all_columns.as_deref() == Some("true");
    let columns = export::export_columns(
        &records,
        &project.available_columns.0,
        &project.selected_columns.0,
        include_all,
    );

    let file = export::export(format, &project.project_name, &records, &columns)
        .map_err(|e| internal("Error generando la exportación", e))?;
    info!(
        "Exportación {} de {uid}: {} columnas, {} filas",
        file.filename,
        columns.len(),
        records.len()
    );

    let content_type = match format {
        ExportFormat::Csv => format!("{}; charset=utf-8", file.content_type),
        _ => file.content_type.clone(),
    };
    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_str(&content_type).map_err(|e| internal("Cabecera inválida", e))?),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_bytes(disposition.as_bytes()).unwrap_or_else(|_| {
                warn!("Nombre de fichero no válido en cabecera: {}", file.filename);
                HeaderValue::from_static("attachment")
            }),
        ),
    ];
    Ok((headers, file.body).into_response())
}

#[cfg(test)]
mod tests {
    use crate::{
        api::testing::{json_of, serve, test_state},
        kobo::testing::fake_kobo,
        store,
    };
    use serde_json::json;

    fn farm_project(token_id: i64) -> serde_json::Value {
        json!({
            "token_id": token_id,
            "uid": "aA1",
            "name": "Farm survey",
            "owner__username": "ana",
            "date_created": "2024-03-01T09:00:00Z",
            "deployment__active": true,
            "submissions": [
                {"_id": 1, "region": "north", "crop": "maize", "_uuid": "x"},
                {"_id": 2, "region": "south", "crop": "teff", "_uuid": "y"}
            ],
            "available_columns": ["_id", "region", "crop", "_uuid"],
            "selected_columns": []
        })
    }

    #[tokio::test]
    async fn fetch_save_list_and_sync() {
        let state = test_state(fake_kobo().await).await;
        let db = state.db.clone();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let (status, body) = json_of(
            client
                .post(format!("{base}/api/kobo/projects"))
                .json(&json!({"token": "good", "tokenName": "Campo"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["totalProjects"], 2);
        assert_eq!(body["totalSubmissions"], 2);
        let token_id = body["tokenId"].as_i64().unwrap();

        let (status, _) = json_of(client.post(format!("{base}/api/projects/save")).json(&farm_project(token_id)).send().await.unwrap()).await;
        assert_eq!(status, 200);
        let (status, body) = json_of(client.post(format!("{base}/api/projects/save")).json(&farm_project(token_id)).send().await.unwrap()).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Project already saved");

        let (_, body) = json_of(client.get(format!("{base}/api/projects/user")).send().await.unwrap()).await;
        assert_eq!(body["projects"][0]["token_name"], "Campo");
        assert_eq!(body["projects"][0]["total_submissions"], 2);
        assert!(body["projects"][0].get("token").is_none());

        let (_, body) = json_of(client.get(format!("{base}/api/projects/token/{token_id}")).send().await.unwrap()).await;
        assert_eq!(body["projects"][0]["submissions"].as_array().unwrap().len(), 2);

        let (status, body) = json_of(
            client
                .post(format!("{base}/api/projects/aA1/sync"))
                .json(&json!({"submissions": [{"_id": 3, "region": "east"}]}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["total_submissions"], 3);

        // Sin cuerpo se descarga el formulario completo desde Kobo.
        let (status, body) = json_of(client.post(format!("{base}/api/kobo/projects/aA1/sync")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["total_submissions"], 2);
        assert_eq!(store::count_submissions(&db, "aA1").await.unwrap(), 2);

        let (status, _) = json_of(client.get(format!("{base}/api/projects/missing")).send().await.unwrap()).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn auto_sync_configuration_and_export() {
        let state = test_state(fake_kobo().await).await;
        let db = state.db.clone();
        let base = serve(state).await;
        let client = reqwest::Client::new();
        let token = store::insert_token(&db, "demo-user", "Campo", "good").await.unwrap();
        client.post(format!("{base}/api/projects/save")).json(&farm_project(token.id)).send().await.unwrap();

        let (status, _) = json_of(
            client
                .put(format!("{base}/api/projects/aA1/auto-sync"))
                .json(&json!({"enabled": true, "interval": "bad"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 400);
        for huge in ["10000000000:00:00", "9999999999999999:00:00"] {
            let (status, _) = json_of(
                client
                    .put(format!("{base}/api/projects/aA1/auto-sync"))
                    .json(&json!({"enabled": true, "interval": huge}))
                    .send()
                    .await
                    .unwrap(),
            )
            .await;
            assert_eq!(status, 400);
        }
        let (status, body) = json_of(
            client
                .put(format!("{base}/api/projects/aA1/auto-sync"))
                .json(&json!({"enabled": true, "interval": "01:00:00"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["interval"], "01:00:00");
        assert_eq!(body["project"]["auto_sync_interval_secs"], 3600);
        assert!(body["project"]["next_sync_time"].is_string());

        let response = client.get(format!("{base}/api/projects/aA1/export?format=csv")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "text/csv; charset=utf-8");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"Farm survey_data.csv\""
        );
        let text = response.text().await.unwrap();
        assert_eq!(text.trim_start_matches('\u{FEFF}').lines().next(), Some("No.,region,crop"));

        let response = client
            .get(format!("{base}/api/projects/aA1/export?format=json&includeAllColumns=true"))
            .send()
            .await
            .unwrap();
        let rows: serde_json::Value = response.json().await.unwrap();
        assert_eq!(rows[0]["_uuid"], "x");

        let (status, _) = json_of(client.get(format!("{base}/api/projects/aA1/export?format=pdf")).send().await.unwrap()).await;
        assert_eq!(status, 400);
        let (status, _) = json_of(client.get(format!("{base}/api/projects/nope/export")).send().await.unwrap()).await;
        assert_eq!(status, 404);
    }
}
