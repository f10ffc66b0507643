//! Contraseñas (argon2) y resolución del usuario actual a partir de la
//! cabecera `Authorization`.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::OsRng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::{app_state::AppState, models::User, store};

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("No se pudo generar el hash de la contraseña: {e}"))
}

/// `Ok(false)` si la contraseña no coincide; error si el hash es inválido.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow!("Hash de contraseña inválido: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Deserialize)]
struct UserClaim {
    id: String,
}

/// Id de usuario contenido en la cabecera: JSON `{"id": …}` en base64.
pub fn user_id_from_header(raw: &str) -> Option<String> {
    let bytes = STANDARD.decode(raw.trim()).ok()?;
    let claim: UserClaim = serde_json::from_slice(&bytes).ok()?;
    (!claim.id.trim().is_empty()).then_some(claim.id)
}

/// Usuario que origina la petición.
#[derive(Debug, Clone)]
pub enum CurrentUser {
    Admin(User),
    /// Sin cabecera y con la autenticación desactivada.
    Default(String),
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        match self {
            CurrentUser::Admin(user) => &user.id,
            CurrentUser::Default(id) => id,
        }
    }
}

fn reject(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "error": message })))
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(header::AUTHORIZATION) else {
            if state.config.require_auth {
                return Err(reject(StatusCode::UNAUTHORIZED, "Se requiere autenticación"));
            }
            return Ok(CurrentUser::Default(state.config.default_user_id.clone()));
        };

        let id = raw
            .to_str()
            .ok()
            .and_then(user_id_from_header)
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Cabecera de autorización inválida"))?;

        match store::find_admin(&state.db, &id).await {
            Ok(Some(user)) => Ok(CurrentUser::Admin(user)),
            Ok(None) => {
                warn!("Acceso denegado para el usuario {id}");
                Err(reject(StatusCode::FORBIDDEN, "Acceso denegado: se requieren permisos de administrador"))
            }
            Err(e) => {
                error!("Error verificando el usuario {id}: {e}");
                Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Error verificando el usuario"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies_passwords() {
        let hash = hash_password("s3creta").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3creta", &hash).unwrap());
        assert!(!verify_password("otra", &hash).unwrap());
        assert!(verify_password("s3creta", "no-es-un-hash").is_err());
    }

    #[test]
    fn decodes_user_header() {
        let header = STANDARD.encode(r#"{"id":"u-1","email":"a@b.c"}"#);
        assert_eq!(user_id_from_header(&header).as_deref(), Some("u-1"));
        assert_eq!(user_id_from_header("%%%"), None);
        assert_eq!(user_id_from_header(&STANDARD.encode(r#"{"id":""}"#)), None);
        assert_eq!(user_id_from_header(&STANDARD.encode("not json")), None);
    }
}
