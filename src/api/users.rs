use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{api_error, bad_request, internal, ApiResult};
use crate::{
    app_state::AppState,
    auth::{hash_password, verify_password},
    store::{self, NewUser},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    position: String,
    kobo_username: Option<String>,
    kobo_token: Option<String>,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct LoginPayload {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[axum::debug_handler]
pub async fn register_handler(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let required = [&payload.full_name, &payload.email, &payload.phone, &payload.position, &payload.password];
    if required.iter().any(|field| field.trim().is_empty()) {
        return Err(bad_request("All required fields must be filled"));
    }

    let email = payload.email.trim().to_string();
    let existing = store::find_user_by_email(&state.db, &email)
        .await
        .map_err(|e| internal("Error comprobando el usuario", e))?;
    if existing.is_some() {
        return Err(bad_request("User already exists with this email"));
    }

    let password_hash =
        hash_password(&payload.password).map_err(|e| internal("Error generando el hash", e))?;
    let user = store::create_user(
        &state.db,
        NewUser {
            full_name: payload.full_name.trim().to_string(),
            email,
            phone: payload.phone.trim().to_string(),
            position: payload.position.trim().to_string(),
            kobo_username: non_blank(payload.kobo_username),
            kobo_token: non_blank(payload.kobo_token),
            password_hash,
        },
    )
    .await
    .map_err(|e| internal("Error registrando el usuario", e))?;

    info!("Usuario registrado: {}", user.email);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "User registered successfully", "user": user })),
    ))
}

#[axum::debug_handler]
pub async fn login_handler(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> ApiResult<Json<Value>> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(bad_request("Email and password are required"));
    }

    let invalid = || api_error(StatusCode::UNAUTHORIZED, "Invalid email or password");
    let user = store::find_user_by_email(&state.db, payload.email.trim())
        .await
        .map_err(|e| internal("Error buscando el usuario", e))?
        .ok_or_else(invalid)?;

    match verify_password(&payload.password, &user.password_hash) {
        Ok(true) => {
            info!("Inicio de sesión correcto: {}", user.email);
            Ok(Json(json!({ "success": true, "message": "Login successful", "user": user })))
        }
        Ok(false) => Err(invalid()),
        Err(e) => {
            warn!("Hash almacenado inválido para {}: {e}", user.email);
            Err(invalid())
        }
    }
}

#[axum::debug_handler]
pub async fn test_handler() -> Json<Value> {
    Json(json!({ "message": "Auth routes are working!" }))
}
