use axum::extract::{Json, Path, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{bad_request, internal, not_found, ApiResult};
use crate::{app_state::AppState, auth::CurrentUser, store};

#[derive(Deserialize)]
pub struct AddTokenPayload {
    name: Option<String>,
    token: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameTokenPayload {
    name: Option<String>,
}

#[axum::debug_handler]
pub async fn list_tokens_handler(State(state): State<AppState>, user: CurrentUser) -> ApiResult<Json<Value>> {
    let tokens = store::tokens_for_user(&state.db, user.id())
        .await
        .map_err(|e| internal("Error listando tokens", e))?;
    Ok(Json(json!({ "success": true, "tokens": tokens })))
}

#[axum::debug_handler]
pub async fn add_token_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AddTokenPayload>,
) -> ApiResult<Json<Value>> {
    let token = payload
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| bad_request("API token is required"))?;
    let name = payload
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Token {}", Utc::now().timestamp_millis()));

    let saved = store::insert_token(&state.db, user.id(), &name, token.trim())
        .await
        .map_err(|e| internal("Error guardando el token", e))?;
    info!("Token '{}' añadido para {}", saved.name, user.id());
    Ok(Json(json!({ "success": true, "message": "Token added successfully", "token": saved })))
}

#[axum::debug_handler]
pub async fn rename_token_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<RenameTokenPayload>,
) -> ApiResult<Json<Value>> {
    let name = payload
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| bad_request("Token name is required"))?;

    let updated = store::rename_token(&state.db, id, &name)
        .await
        .map_err(|e| internal("Error renombrando el token", e))?
        .ok_or_else(|| not_found("Token not found"))?;
    Ok(Json(json!({ "success": true, "message": "Token updated successfully", "token": updated })))
}

#[axum::debug_handler]
pub async fn delete_token_handler(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let deleted = store::delete_token(&state.db, id)
        .await
        .map_err(|e| internal("Error borrando el token", e))?
        .ok_or_else(|| not_found("Token not found"))?;
    Ok(Json(json!({ "success": true, "message": "Token deleted successfully", "token": deleted })))
}

#[cfg(test)]
mod tests {
    use crate::{
        api::testing::{json_of, serve, test_state},
        kobo::testing::fake_kobo,
    };
    use serde_json::json;

    #[tokio::test]
    async fn token_lifecycle() {
        let base = serve(test_state(fake_kobo().await).await).await;
        let client = reqwest::Client::new();

        let (status, _) = json_of(client.post(format!("{base}/api/tokens")).json(&json!({"name": "x"})).send().await.unwrap()).await;
        assert_eq!(status, 400);

        let (status, body) = json_of(
            client
                .post(format!("{base}/api/tokens"))
                .json(&json!({"token": "abcdefghij123"}))
                .send()
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(status, 200);
        assert!(body["token"]["name"].as_str().unwrap().starts_with("Token "));
        assert_eq!(body["token"]["token_preview"], "abcdefgh...");
        assert!(body["token"].get("token").is_none());
        let id = body["token"]["id"].as_i64().unwrap();

        let (_, body) = json_of(client.get(format!("{base}/api/tokens")).send().await.unwrap()).await;
        assert_eq!(body["tokens"].as_array().unwrap().len(), 1);
        assert_eq!(body["tokens"][0]["user_id"], "demo-user");
        assert!(!body.to_string().contains("abcdefghij123"));

        let (status, _) = json_of(client.put(format!("{base}/api/tokens/{id}")).json(&json!({"name": "  "})).send().await.unwrap()).await;
        assert_eq!(status, 400);
        let (status, body) = json_of(client.put(format!("{base}/api/tokens/{id}")).json(&json!({"name": "Campo"})).send().await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["token"]["name"], "Campo");

        let (status, _) = json_of(client.delete(format!("{base}/api/tokens/{id}")).send().await.unwrap()).await;
        assert_eq!(status, 200);
        let (status, _) = json_of(client.delete(format!("{base}/api/tokens/{id}")).send().await.unwrap()).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn malformed_authorization_is_rejected() {
        let base = serve(test_state(fake_kobo().await).await).await;
        let response = reqwest::Client::new()
            .get(format!("{base}/api/tokens"))
            .header("authorization", "%%%")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }
}
