//! Acceso a datos: todas las consultas SQL de la aplicación.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, SqlitePool};
use uuid::Uuid;

use crate::{
    dataset::Record,
    models::{
        AnalysisLogEntry, AnalysisStats, ChartConfigRow, KoboToken, ProjectWithToken, SavedProject,
        StoredSubmission, User,
    },
    suggestions::{ChartBindings, ChartSuggestion},
};

// --- Usuarios ---

#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub position: String,
    pub kobo_username: Option<String>,
    pub kobo_token: Option<String>,
    pub password_hash: String,
}

pub async fn create_user(pool: &SqlitePool, user: NewUser) -> Result<User> {
    let created = sqlx::query_as::<_, User>(
        "INSERT INTO users
            (id, full_name, email, phone, position, kobo_username, kobo_token, password_hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user.full_name)
    .bind(user.email)
    .bind(user.phone)
    .bind(user.position)
    .bind(user.kobo_username)
    .bind(user.kobo_token)
    .bind(user.password_hash)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(created)
}

pub async fn find_user_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Usuario con rol de administración (`admin` o `superadmin`).
pub async fn find_admin(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = ? AND role IN ('admin', 'superadmin')",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

// --- Tokens de Kobo ---

/// Vista previa segura de un token: los 8 primeros caracteres.
pub fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{head}...")
}

pub async fn insert_token(pool: &SqlitePool, user_id: &str, name: &str, token: &str) -> Result<KoboToken> {
    let row = sqlx::query_as::<_, KoboToken>(
        "INSERT INTO kobo_tokens (user_id, name, token, token_preview, created_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(user_id)
    .bind(name)
    .bind(token)
    .bind(token_preview(token))
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn tokens_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<KoboToken>> {
    let rows = sqlx::query_as::<_, KoboToken>(
        "SELECT * FROM kobo_tokens WHERE user_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn rename_token(pool: &SqlitePool, id: i64, name: &str) -> Result<Option<KoboToken>> {
    let row = sqlx::query_as::<_, KoboToken>("UPDATE kobo_tokens SET name = ? WHERE id = ? RETURNING *")
        .bind(name)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Borra el token junto con sus proyectos y los envíos y gráficos de estos.
pub async fn delete_token(pool: &SqlitePool, id: i64) -> Result<Option<KoboToken>> {
    let mut tx = pool.begin().await?;
    for table in ["project_submissions", "chart_configs"] {
        sqlx::query(&format!(
            "DELETE FROM {table}
             WHERE project_uid IN (SELECT project_uid FROM saved_projects WHERE token_id = ?)"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }
    sqlx::query("DELETE FROM saved_projects WHERE token_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let row = sqlx::query_as::<_, KoboToken>("DELETE FROM kobo_tokens WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(row)
}

// --- Proyectos ---

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub token_id: i64,
    pub project_uid: String,
    pub project_name: String,
    pub owner_username: Option<String>,
    pub date_created: Option<DateTime<Utc>>,
    pub deployment_active: bool,
    pub total_submissions: i64,
    pub available_columns: Vec<String>,
    pub selected_columns: Vec<String>,
    pub data_url: Option<String>,
}

const PROJECT_WITH_TOKEN: &str = "SELECT sp.*, kt.name AS token_name, kt.token_preview, kt.token
     FROM saved_projects sp
     JOIN kobo_tokens kt ON sp.token_id = kt.id";

pub async fn insert_project(pool: &SqlitePool, project: NewProject) -> Result<SavedProject> {
    let row = sqlx::query_as::<_, SavedProject>(
        "INSERT INTO saved_projects
            (token_id, project_uid, project_name, owner_username, date_created, deployment_active,
             total_submissions, available_columns, selected_columns, data_url, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING *",
    )
    .bind(project.token_id)
    .bind(project.project_uid)
    .bind(project.project_name)
    .bind(project.owner_username)
    .bind(project.date_created)
    .bind(project.deployment_active)
    .bind(project.total_submissions)
    .bind(Json(project.available_columns))
    .bind(Json(project.selected_columns))
    .bind(project.data_url)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn find_project(pool: &SqlitePool, project_uid: &str) -> Result<Option<SavedProject>> {
    let row = sqlx::query_as::<_, SavedProject>("SELECT * FROM saved_projects WHERE project_uid = ?")
        .bind(project_uid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn project_with_token(pool: &SqlitePool, project_uid: &str) -> Result<Option<ProjectWithToken>> {
    let row = sqlx::query_as::<_, ProjectWithToken>(&format!("{PROJECT_WITH_TOKEN} WHERE sp.project_uid = ?"))
        .bind(project_uid)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn projects_for_token(pool: &SqlitePool, token_id: i64) -> Result<Vec<ProjectWithToken>> {
    let rows = sqlx::query_as::<_, ProjectWithToken>(&format!(
        "{PROJECT_WITH_TOKEN} WHERE sp.token_id = ? ORDER BY sp.created_at DESC, sp.id DESC"
    ))
    .bind(token_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn projects_for_user(pool: &SqlitePool, user_id: &str) -> Result<Vec<ProjectWithToken>> {
    let rows = sqlx::query_as::<_, ProjectWithToken>(&format!(
        "{PROJECT_WITH_TOKEN} WHERE kt.user_id = ? ORDER BY kt.name, sp.project_name"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Borra el proyecto junto con sus envíos y gráficos.
pub async fn delete_project(pool: &SqlitePool, id: i64) -> Result<Option<SavedProject>> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query_as::<_, SavedProject>("DELETE FROM saved_projects WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if let Some(project) = &deleted {
        sqlx::query("DELETE FROM project_submissions WHERE project_uid = ?")
            .bind(&project.project_uid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chart_configs WHERE project_uid = ?")
            .bind(&project.project_uid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(deleted)
}

pub async fn update_selected_columns(
    pool: &SqlitePool,
    project_uid: &str,
    columns: Vec<String>,
) -> Result<Option<SavedProject>> {
    let row = sqlx::query_as::<_, SavedProject>(
        "UPDATE saved_projects SET selected_columns = ? WHERE project_uid = ? RETURNING *",
    )
    .bind(Json(columns))
    .bind(project_uid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Marca la sincronización y actualiza el total de envíos.
pub async fn record_sync(pool: &SqlitePool, project_uid: &str, total_submissions: i64) -> Result<()> {
    sqlx::query("UPDATE saved_projects SET last_sync = ?, total_submissions = ? WHERE project_uid = ?")
        .bind(Utc::now())
        .bind(total_submissions)
        .bind(project_uid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_available_columns(pool: &SqlitePool, project_uid: &str, columns: Vec<String>) -> Result<()> {
    sqlx::query("UPDATE saved_projects SET available_columns = ? WHERE project_uid = ?")
        .bind(Json(columns))
        .bind(project_uid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn configure_auto_sync(
    pool: &SqlitePool,
    project_uid: &str,
    enabled: bool,
    interval_secs: Option<i64>,
    next_sync_time: Option<DateTime<Utc>>,
) -> Result<Option<SavedProject>> {
    let row = sqlx::query_as::<_, SavedProject>(
        "UPDATE saved_projects
         SET auto_sync_enabled = ?, auto_sync_interval_secs = ?, next_sync_time = ?
         WHERE project_uid = ?
         RETURNING *",
    )
    .bind(enabled)
    .bind(interval_secs)
    .bind(next_sync_time)
    .bind(project_uid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_next_sync_time(pool: &SqlitePool, project_uid: &str, when: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE saved_projects SET next_sync_time = ? WHERE project_uid = ?")
        .bind(when)
        .bind(project_uid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Proyectos con sincronización automática vencida, el más antiguo primero.
pub async fn projects_due_for_sync(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<ProjectWithToken>> {
    let rows = sqlx::query_as::<_, ProjectWithToken>(&format!(
        "{PROJECT_WITH_TOKEN}
         WHERE sp.auto_sync_enabled = 1
           AND sp.next_sync_time IS NOT NULL
           AND sp.next_sync_time <= ?
         ORDER BY sp.next_sync_time ASC"
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// --- Envíos ---

/// Identificador de un envío: `_id`, luego `id`; si falta, un UUID nuevo.
pub fn submission_id_of(record: &Record) -> String {
    ["_id", "id"]
        .iter()
        .find_map(|key| match record.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

const UPSERT_SUBMISSION: &str = "INSERT INTO project_submissions
        (project_uid, submission_id, submission_data, sync_timestamp, created_at)
     VALUES (?, ?, ?, ?, ?)
     ON CONFLICT (project_uid, submission_id)
     DO UPDATE SET submission_data = excluded.submission_data,
                   sync_timestamp = excluded.sync_timestamp";

/// Inserta o sobrescribe envíos por (proyecto, id de envío).
pub async fn upsert_submissions(pool: &SqlitePool, project_uid: &str, records: &[Record]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();
    for record in records {
        sqlx::query(UPSERT_SUBMISSION)
            .bind(project_uid)
            .bind(submission_id_of(record))
            .bind(Json(record))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(records.len())
}

/// Sustituye todos los envíos del proyecto de forma atómica.
pub async fn replace_submissions(pool: &SqlitePool, project_uid: &str, records: &[Record]) -> Result<usize> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM project_submissions WHERE project_uid = ?")
        .bind(project_uid)
        .execute(&mut *tx)
        .await?;
    let now = Utc::now();
    for record in records {
        sqlx::query(UPSERT_SUBMISSION)
            .bind(project_uid)
            .bind(submission_id_of(record))
            .bind(Json(record))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(records.len())
}

pub async fn submissions_for_project(pool: &SqlitePool, project_uid: &str) -> Result<Vec<Record>> {
    let rows = sqlx::query_as::<_, StoredSubmission>(
        "SELECT * FROM project_submissions WHERE project_uid = ? ORDER BY id",
    )
    .bind(project_uid)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.submission_data.0).collect())
}

pub async fn count_submissions(pool: &SqlitePool, project_uid: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_submissions WHERE project_uid = ?")
        .bind(project_uid)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// --- Gráficos ---

/// Sustituye los gráficos del proyecto por las sugerencias, en su orden.
pub async fn replace_charts(
    pool: &SqlitePool,
    project_uid: &str,
    suggestions: &[ChartSuggestion],
) -> Result<Vec<ChartConfigRow>> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chart_configs WHERE project_uid = ?")
        .bind(project_uid)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    let mut saved = Vec::with_capacity(suggestions.len());
    for (order, suggestion) in suggestions.iter().enumerate() {
        let row = sqlx::query_as::<_, ChartConfigRow>(
            "INSERT INTO chart_configs
                (project_uid, chart_name, chart_type, config_data, is_auto_generated, is_enabled,
                 display_order, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, 1, ?, ?, ?)
             RETURNING *",
        )
        .bind(project_uid)
        .bind(&suggestion.name)
        .bind(suggestion.chart_type.as_str())
        .bind(Json(&suggestion.configuration))
        .bind(order as i64)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        saved.push(row);
    }
    tx.commit().await?;
    Ok(saved)
}

pub async fn charts_for_project(pool: &SqlitePool, project_uid: &str) -> Result<Vec<ChartConfigRow>> {
    let rows = sqlx::query_as::<_, ChartConfigRow>(
        "SELECT * FROM chart_configs WHERE project_uid = ? ORDER BY display_order, created_at, id",
    )
    .bind(project_uid)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_chart(pool: &SqlitePool, id: i64) -> Result<Option<ChartConfigRow>> {
    let row = sqlx::query_as::<_, ChartConfigRow>("SELECT * FROM chart_configs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Cambios parciales de un gráfico; los campos `None` se conservan.
#[derive(Debug, Clone, Default)]
pub struct ChartUpdate {
    pub chart_name: Option<String>,
    pub chart_type: Option<String>,
    pub config_data: Option<ChartBindings>,
    pub is_enabled: Option<bool>,
    pub display_order: Option<i64>,
}

impl ChartUpdate {
    pub fn is_empty(&self) -> bool {
        self.chart_name.is_none()
            && self.chart_type.is_none()
            && self.config_data.is_none()
            && self.is_enabled.is_none()
            && self.display_order.is_none()
    }
}

pub async fn update_chart(pool: &SqlitePool, id: i64, update: ChartUpdate) -> Result<Option<ChartConfigRow>> {
    let row = sqlx::query_as::<_, ChartConfigRow>(
        "UPDATE chart_configs
         SET chart_name = COALESCE(?, chart_name),
             chart_type = COALESCE(?, chart_type),
             config_data = COALESCE(?, config_data),
             is_enabled = COALESCE(?, is_enabled),
             display_order = COALESCE(?, display_order),
             updated_at = ?
         WHERE id = ?
         RETURNING *",
    )
    .bind(update.chart_name)
    .bind(update.chart_type)
    .bind(update.config_data.map(Json))
    .bind(update.is_enabled)
    .bind(update.display_order)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_chart_enabled(pool: &SqlitePool, id: i64, enabled: bool) -> Result<Option<ChartConfigRow>> {
    update_chart(
        pool,
        id,
        ChartUpdate {
            is_enabled: Some(enabled),
            ..ChartUpdate::default()
        },
    )
    .await
}

pub async fn delete_chart(pool: &SqlitePool, id: i64) -> Result<Option<ChartConfigRow>> {
    let row = sqlx::query_as::<_, ChartConfigRow>("DELETE FROM chart_configs WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn delete_charts_for_project(pool: &SqlitePool, project_uid: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM chart_configs WHERE project_uid = ?")
        .bind(project_uid)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// --- Registro de análisis ---

pub async fn log_analysis(
    pool: &SqlitePool,
    project_uid: &str,
    analysis_type: &str,
    analysis_data: Value,
    error_message: Option<String>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO data_analysis_log
            (project_uid, analysis_type, analysis_data, success, error_message, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(project_uid)
    .bind(analysis_type)
    .bind(Json(analysis_data))
    .bind(error_message.is_none())
    .bind(error_message)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_analyses(pool: &SqlitePool, project_uid: &str, limit: i64) -> Result<Vec<AnalysisLogEntry>> {
    let rows = sqlx::query_as::<_, AnalysisLogEntry>(
        "SELECT * FROM data_analysis_log WHERE project_uid = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(project_uid)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn analysis_stats(pool: &SqlitePool, project_uid: &str) -> Result<AnalysisStats> {
    let stats = sqlx::query_as::<_, AnalysisStats>(
        "SELECT COUNT(*) AS total_analyses,
                COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0) AS successful_analyses,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS failed_analyses,
                MAX(created_at) AS last_analysis
         FROM data_analysis_log
         WHERE project_uid = ?",
    )
    .bind(project_uid)
    .fetch_one(pool)
    .await?;
    Ok(stats)
}
