use std::collections::BTreeSet;

use axum::extract::{Json, Path, Query, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task;
use tracing::{info, warn};
use uuid::Uuid;

use super::{bad_request, internal, not_found, ApiResult};
use crate::{
    analysis::{analyze_dataset, AnalysisResult},
    app_state::AppState,
    dataset::{columns_of_first, Dataset},
    render::{render, MAX_BINS},
    store::{self, ChartUpdate},
    suggestions::{ChartBindings, ChartType},
};

/// Envíos del proyecto analizados fuera del runtime asíncrono.
struct ProjectAnalysis {
    submissions: usize,
    columns: Vec<String>,
    result: AnalysisResult,
}

async fn analyze_project(state: &AppState, uid: &str) -> ApiResult<ProjectAnalysis> {
    let records = store::submissions_for_project(&state.db, uid)
        .await
        .map_err(|e| internal("Error leyendo envíos", e))?;
    if records.is_empty() {
        return Err(not_found("No submissions found for this project"));
    }
    let columns = columns_of_first(&records);
    if columns.is_empty() {
        return Err(bad_request("No data columns found in submissions"));
    }

    let rules = state.rules.clone();
    let dataset_id = uid.to_string();
    let (records, columns, result) = task::spawn_blocking(move || {
        let result = analyze_dataset(&rules, Dataset::new(&dataset_id, &records, &columns));
        (records, columns, result)
    })
    .await
    .map_err(|e| internal("La tarea de análisis falló", e))?;

    let result = result.map_err(bad_request)?;
    Ok(ProjectAnalysis {
        submissions: records.len(),
        columns,
        result,
    })
}

#[axum::debug_handler]
pub async fn analyze_handler(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<Value>> {
    info!("📊 Iniciando análisis de gráficos para {uid}");
    let analysis = match analyze_project(&state, &uid).await {
        Ok(analysis) => analysis,
        Err(err) => {
            let message = err.1["error"].as_str().unwrap_or_default().to_string();
            if let Err(e) = store::log_analysis(&state.db, &uid, "chart_analysis", json!({}), Some(message)).await {
                warn!("No se pudo registrar el análisis fallido de {uid}: {e}");
            }
            return Err(err);
        }
    };
    let ProjectAnalysis {
        submissions,
        columns,
        result,
    } = analysis;

    let saved = store::replace_charts(&state.db, &uid, &result.suggestions)
        .await
        .map_err(|e| internal("Error guardando los gráficos", e))?;

    let run = json!({
        "runId": Uuid::new_v4().to_string(),
        "totalSubmissions": submissions,
        "availableColumns": columns.len(),
        "suggestedCharts": result.suggestions.len(),
        "dataQuality": result.data_quality,
        "domainInsights": result.domain_insights,
    });
    if let Err(e) = store::log_analysis(&state.db, &uid, "chart_analysis", run, None).await {
        warn!("No se pudo registrar el análisis de {uid}: {e}");
    }

    info!("✅ {} gráficos generados para {uid}", saved.len());
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Generated {} high-quality charts from {} suggestions",
            saved.len(),
            result.suggestions.len()
        ),
        "generatedCharts": saved.len(),
        "finalChartCount": saved.len(),
        "dataQuality": result.data_quality,
        "domainInsights": result.domain_insights,
        "analysis": {
            "totalSubmissions": submissions,
            "availableColumns": columns.len(),
            "suggestedCharts": result.suggestions.len(),
            "savedCharts": saved.len(),
        },
    })))
}

#[axum::debug_handler]
pub async fn project_charts_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let charts = store::charts_for_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error listando gráficos", e))?;
    let stats = store::analysis_stats(&state.db, &uid)
        .await
        .map_err(|e| internal("Error leyendo estadísticas de análisis", e))?;

    let chart_types: BTreeSet<&str> = charts.iter().map(|c| c.chart_type.as_str()).collect();
    Ok(Json(json!({
        "success": true,
        "totalCharts": charts.len(),
        "enabledCharts": charts.iter().filter(|c| c.is_enabled).count(),
        "autoGeneratedCharts": charts.iter().filter(|c| c.is_auto_generated).count(),
        "chartTypes": chart_types,
        "analysisStats": stats,
        "charts": charts,
    })))
}

#[axum::debug_handler]
pub async fn chart_data_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let chart = store::find_chart(&state.db, id)
        .await
        .map_err(|e| internal("Error buscando el gráfico", e))?
        .ok_or_else(|| not_found("Chart not found"))?;
    let records = store::submissions_for_project(&state.db, &chart.project_uid)
        .await
        .map_err(|e| internal("Error leyendo envíos", e))?;
    if records.is_empty() {
        return Err(not_found("No submissions found for this project"));
    }

    let chart_type = ChartType::parse(&chart.chart_type)
        .ok_or_else(|| bad_request(format!("Unsupported chart type '{}'", chart.chart_type)))?;
    let data = render(chart_type, &chart.config_data.0, &records).map_err(bad_request)?;

    Ok(Json(json!({
        "success": true,
        "chartConfig": {
            "id": chart.id,
            "name": chart.chart_name,
            "type": chart.chart_type,
            "isEnabled": chart.is_enabled,
            "isAutoGenerated": chart.is_auto_generated,
        },
        "chartData": data,
        "metadata": {
            "dataPoints": records.len(),
            "generatedAt": Utc::now().to_rfc3339(),
            "chartId": id,
        },
    })))
}

#[derive(Deserialize)]
pub struct UpdateChartPayload {
    #[serde(alias = "chartName")]
    chart_name: Option<String>,
    #[serde(alias = "chartType")]
    chart_type: Option<String>,
    #[serde(alias = "configData")]
    config_data: Option<ChartBindings>,
    #[serde(alias = "isEnabled")]
    is_enabled: Option<bool>,
    #[serde(alias = "displayOrder")]
    display_order: Option<i64>,
}

#[axum::debug_handler]
pub async fn update_chart_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateChartPayload>,
) -> ApiResult<Json<Value>> {
    let chart_type = payload
        .chart_type
        .map(|raw| {
            ChartType::parse(&raw)
                .map(|t| t.as_str().to_string())
                .ok_or_else(|| bad_request(format!("Unsupported chart type '{raw}'")))
        })
        .transpose()?;
    if let Some(bins) = payload.config_data.as_ref().and_then(|c| c.bins) {
        if bins == 0 || bins > MAX_BINS {
            return Err(bad_request(format!("bins must be between 1 and {MAX_BINS}")));
        }
    }
    let update = ChartUpdate {
        chart_name: payload.chart_name.filter(|n| !n.trim().is_empty()),
        chart_type,
        config_data: payload.config_data,
        is_enabled: payload.is_enabled,
        display_order: payload.display_order,
    };
    if update.is_empty() {
        return Err(bad_request("No chart fields to update"));
    }

    let chart = store::update_chart(&state.db, id, update)
        .await
        .map_err(|e| internal("Error actualizando el gráfico", e))?
        .ok_or_else(|| not_found("Chart not found"))?;
    Ok(Json(json!({ "success": true, "message": "Chart updated successfully", "chart": chart })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglePayload {
    is_enabled: bool,
}

#[axum::debug_handler]
pub async fn toggle_chart_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TogglePayload>,
) -> ApiResult<Json<Value>> {
    let chart = store::set_chart_enabled(&state.db, id, payload.is_enabled)
        .await
        .map_err(|e| internal("Error cambiando el estado del gráfico", e))?
        .ok_or_else(|| not_found("Chart not found"))?;
    let verb = if payload.is_enabled { "enabled" } else { "disabled" };
    Ok(Json(json!({ "success": true, "message": format!("Chart {verb} successfully"), "chart": chart })))
}

#[axum::debug_handler]
pub async fn delete_chart_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let chart = store::delete_chart(&state.db, id)
        .await
        .map_err(|e| internal("Error borrando el gráfico", e))?
        .ok_or_else(|| not_found("Chart not found"))?;
    Ok(Json(json!({ "success": true, "message": "Chart deleted successfully", "chart": chart })))
}

#[axum::debug_handler]
pub async fn force_delete_handler(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<Value>> {
    let deleted = store::delete_charts_for_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error borrando los gráficos", e))?;
    warn!("🗑️ {deleted} gráficos borrados de {uid}");
    Ok(Json(json!({
        "success": true,
        "message": format!("Force deleted {deleted} charts"),
        "deletedCount": deleted,
        "projectUid": uid,
    })))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    limit: Option<i64>,
}

#[axum::debug_handler]
pub async fn analysis_logs_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let logs = store::recent_analyses(&state.db, &uid, limit)
        .await
        .map_err(|e| internal("Error leyendo el registro de análisis", e))?;
    Ok(Json(json!({ "success": true, "total": logs.len(), "logs": logs })))
}

#[axum::debug_handler]
pub async fn quality_report_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Json<Value>> {
    let analysis = analyze_project(&state, &uid).await?;
    Ok(Json(json!({
        "success": true,
        "dataQuality": analysis.result.data_quality,
        "domainInsights": analysis.result.domain_insights,
        "columnAnalysis": analysis.result.column_profiles,
        "summary": {
            "totalSubmissions": analysis.submissions,
            "totalColumns": analysis.columns.len(),
            "analysisTimestamp": Utc::now().to_rfc3339(),
        },
    })))
}

#[axum::debug_handler]
pub async fn debug_handler(State(state): State<AppState>, Path(uid): Path<String>) -> ApiResult<Json<Value>> {
    let charts = store::charts_for_project(&state.db, &uid)
        .await
        .map_err(|e| internal("Error listando gráficos", e))?;

    let chart_types: BTreeSet<&str> = charts.iter().map(|c| c.chart_type.as_str()).collect();
    let detailed: Vec<Value> = charts
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.chart_name,
                "type": c.chart_type,
                "enabled": c.is_enabled,
                "auto": c.is_auto_generated,
                "created": c.created_at,
                "order": c.display_order,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "debug": {
            "projectUid": uid,
            "totalCharts": charts.len(),
            "charts": detailed,
            "summary": {
                "total": charts.len(),
                "autoGenerated": charts.iter().filter(|c| c.is_auto_generated).count(),
                "enabled": charts.iter().filter(|c| c.is_enabled).count(),
                "chartTypes": chart_types,
                "dateRange": {
                    "oldest": charts.iter().map(|c| c.created_at).min(),
                    "newest": charts.iter().map(|c| c.created_at).max(),
                },
            },
        },
    })))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::testing::{json_of, serve, test_state},
        dataset::fixtures,
        kobo::testing::fake_kobo,
        store::{self, NewProject},
    };
    use serde_json::json;

    #[tokio::test]
    async fn analyze_render_and_manage_charts() {
        let state = test_state(fake_kobo().await).await;
        let db = state.db.clone();
        let base = serve(state).await;
        let client = reqwest::Client::new();

        let token = store::insert_token(&db, "demo-user", "Campo", "good").await.unwrap();
        store::insert_project(
            &db,
            NewProject {
                token_id: token.id,
                project_uid: "farm".into(),
                project_name: "Farm survey".into(),
                ..NewProject::default()
            },
        )
        .await
        .unwrap();
        let records = fixtures::records(
            (0..12)
                .map(|i| {
                    let region = ["north", "south", "east"][i % 3];
                    json!({
                        "_id": i,
                        "region": region,
                        "land_area_ha": 1 + i % 4,
                        "maize_yield_kg": 400 + i * 35,
                    })
                })
                .collect(),
        );
        store::upsert_submissions(&db, "farm", &records).await.unwrap();

        let (status, _) = json_of(client.post(format!("{base}/api/charts/analyze/empty")).send().await.unwrap()).await;
        assert_eq!(status, 404);

        let (status, body) = json_of(client.post(format!("{base}/api/charts/analyze/farm")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        let generated = body["generatedCharts"].as_u64().unwrap();
        assert!(generated > 0 && generated <= 15);
        assert_eq!(body["analysis"]["totalSubmissions"], 12);

        let (_, body) = json_of(client.get(format!("{base}/api/charts/project/farm")).send().await.unwrap()).await;
        assert_eq!(body["totalCharts"].as_u64(), Some(generated));
        assert_eq!(body["analysisStats"]["successful_analyses"], 1);
        let charts = body["charts"].as_array().unwrap().clone();
        assert!(charts.iter().all(|c| !c["config_data"].to_string().contains("\"_id\"")));
        let first_id = charts[0]["id"].as_i64().unwrap();

        let (status, body) = json_of(client.get(format!("{base}/api/charts/data/{first_id}")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert!(!body["chartData"]["datasets"].as_array().unwrap().is_empty());
        assert_eq!(body["metadata"]["dataPoints"], 12);

        let (status, body) = json_of(
            client
                .patch(format!("{base}/api/charts/toggle/{first_id}"))
                .json(&json!({"isEnabled": false}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["chart"]["is_enabled"], false);

        let (status, _) = json_of(
            client
                .put(format!("{base}/api/charts/config/{first_id}"))
                .json(&json!({"chart_type": "radar"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 400);
        let (status, body) = json_of(
            client
                .put(format!("{base}/api/charts/config/{first_id}"))
                .json(&json!({"config_data": {"column": "land_area_ha", "bins": 4_000_000_000u32}}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "bins must be between 1 and 100");
        let (status, body) = json_of(
            client
                .put(format!("{base}/api/charts/config/{first_id}"))
                .json(&json!({"chartName": "Renamed", "chart_type": "horizontalBar"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["chart"]["chart_name"], "Renamed");
        assert_eq!(body["chart"]["chart_type"], "bar");

        let (_, body) = json_of(client.get(format!("{base}/api/charts/quality/farm")).send().await.unwrap()).await;
        assert!(body["dataQuality"]["score"].as_u64().unwrap() > 0);
        assert!(body["columnAnalysis"]["region"].is_object());

        let (_, body) = json_of(client.get(format!("{base}/api/charts/logs/farm?limit=5")).send().await.unwrap()).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["logs"][0]["success"], true);

        let (status, _) = json_of(client.delete(format!("{base}/api/charts/{first_id}")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        let (status, _) = json_of(client.get(format!("{base}/api/charts/data/{first_id}")).send().await.unwrap()).await;
        assert_eq!(status, 404);

        let (_, body) = json_of(client.delete(format!("{base}/api/charts/force-delete/farm")).send().await.unwrap()).await;
        assert_eq!(body["deletedCount"].as_u64(), Some(generated - 1));
        let (_, body) = json_of(client.get(format!("{base}/api/charts/debug/farm")).send().await.unwrap()).await;
        assert_eq!(body["debug"]["totalCharts"], 0);
    }
}
