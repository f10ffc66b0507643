//! Carga y gestión de configuración de la aplicación (base de datos, API de
//! Kobo y sincronización automática).

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};
use url::Url;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub server_addr: String,

    pub kobo_api_url: Url,
    pub kobo_fetch_concurrency: usize,

    pub auto_sync_enabled: bool,
    pub auto_sync_poll: Duration,
    pub auto_sync_retry: Duration,

    pub default_user_id: String,
    pub require_auth: bool,
}

const DEFAULT_DATABASE_URL: &str = "sqlite://kobo_dashboard.db?mode=rwc";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_KOBO_API_URL: &str = "https://kf.kobotoolbox.org/api/v2/";

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| DEFAULT_SERVER_ADDR.to_string());

        let raw = env::var("KOBO_API_URL").unwrap_or_else(|_| DEFAULT_KOBO_API_URL.to_string());
        // `Url::join` descarta el último segmento si no acaba en '/'.
        let raw = if raw.ends_with('/') { raw } else { format!("{raw}/") };
        let kobo_api_url = Url::parse(&raw).map_err(|e| anyhow!("KOBO_API_URL inválida: {e}"))?;

        let kobo_fetch_concurrency: usize = parsed("KOBO_FETCH_CONCURRENCY", 3)?;
        if kobo_fetch_concurrency == 0 {
            return Err(anyhow!("KOBO_FETCH_CONCURRENCY debe ser mayor que 0"));
        }

        let auto_sync_enabled = parsed("AUTO_SYNC_ENABLED", true)?;
        let poll_secs: u64 = parsed("AUTO_SYNC_POLL_SECS", 60)?;
        let retry_minutes: u64 = parsed("AUTO_SYNC_RETRY_MINUTES", 10)?;

        let default_user_id =
            env::var("DEFAULT_USER_ID").unwrap_or_else(|_| "demo-user".to_string());
        let require_auth = parsed("REQUIRE_AUTH", false)?;

        Ok(Self {
            database_url,
            server_addr,
            kobo_api_url,
            kobo_fetch_concurrency,
            auto_sync_enabled,
            auto_sync_poll: Duration::from_secs(poll_secs.max(1)),
            auto_sync_retry: Duration::from_secs(retry_minutes * 60),
            default_user_id,
            require_auth,
        })
    }
}
