//! Filas persistidas (usuarios, tokens, proyectos, envíos, gráficos y
//! registro de análisis).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{types::Json, FromRow};

use crate::{dataset::Record, suggestions::ChartBindings};

/// Usuario del panel. El hash de la contraseña y el token de Kobo nunca se
/// serializan.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub position: String,
    pub kobo_username: Option<String>,
    #[serde(skip_serializing)]
    pub kobo_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_image: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KoboToken {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub token_preview: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SavedProject {
    pub id: i64,
    pub token_id: i64,
    pub project_uid: String,
    pub project_name: String,
    pub owner_username: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub deployment_active: bool,
    pub total_submissions: i64,
    pub available_columns: Json<Vec<String>>,
    pub selected_columns: Json<Vec<String>>,
    pub data_url: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub auto_sync_enabled: bool,
    pub auto_sync_interval_secs: Option<i64>,
    pub next_sync_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Proyecto junto con los datos del token al que pertenece.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectWithToken {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub project: SavedProject,
    pub token_name: String,
    pub token_preview: String,
    #[serde(skip_serializing)]
    pub token: String,
}

/// Envío almacenado de un proyecto.
#[derive(Debug, Clone, FromRow)]
pub struct StoredSubmission {
    pub id: i64,
    pub project_uid: String,
    pub submission_id: String,
    pub submission_data: Json<Record>,
    pub sync_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ChartConfigRow {
    pub id: i64,
    pub project_uid: String,
    pub chart_name: String,
    pub chart_type: String,
    pub config_data: Json<ChartBindings>,
    pub is_auto_generated: bool,
    pub is_enabled: bool,
    pub display_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AnalysisLogEntry {
    pub id: i64,
    pub project_uid: String,
    pub analysis_type: String,
    pub analysis_data: Json<Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct AnalysisStats {
    pub total_analyses: i64,
    pub successful_analyses: i64,
    pub failed_analyses: i64,
    pub last_analysis: Option<String>,
}
