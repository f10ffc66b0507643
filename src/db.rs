use crate::config::AppConfig;
use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<SqlitePool> {
    info!("Conectando a la base de datos en {}...", cfg.database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&cfg.database_url)
        .await?;
    info!("Conexión a la base de datos OK");
    Ok(pool)
}

/// Crea las tablas e índices si no existen. Idempotente.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            full_name     TEXT NOT NULL,
            email         TEXT NOT NULL UNIQUE,
            phone         TEXT NOT NULL,
            position      TEXT NOT NULL,
            kobo_username TEXT,
            kobo_token    TEXT,
            password_hash TEXT NOT NULL,
            profile_image TEXT,
            role          TEXT NOT NULL DEFAULT 'admin',
            created_at    TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS kobo_tokens (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            name          TEXT NOT NULL,
            token         TEXT NOT NULL,
            token_preview TEXT NOT NULL,
            created_at    TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS saved_projects (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            token_id                INTEGER NOT NULL REFERENCES kobo_tokens(id),
            project_uid             TEXT NOT NULL UNIQUE,
            project_name            TEXT NOT NULL,
            owner_username          TEXT,
            date_created            TEXT,
            deployment_active       INTEGER NOT NULL DEFAULT 0,
            total_submissions       INTEGER NOT NULL DEFAULT 0,
            available_columns       TEXT NOT NULL DEFAULT '[]',
            selected_columns        TEXT NOT NULL DEFAULT '[]',
            data_url                TEXT,
            last_sync               TEXT,
            auto_sync_enabled       INTEGER NOT NULL DEFAULT 0,
            auto_sync_interval_secs INTEGER,
            next_sync_time          TEXT,
            created_at              TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS project_submissions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_uid     TEXT NOT NULL,
            submission_id   TEXT NOT NULL,
            submission_data TEXT NOT NULL,
            sync_timestamp  TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE (project_uid, submission_id)
        )",
        "CREATE TABLE IF NOT EXISTS chart_configs (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            project_uid       TEXT NOT NULL,
            chart_name        TEXT NOT NULL,
            chart_type        TEXT NOT NULL,
            config_data       TEXT NOT NULL,
            is_auto_generated INTEGER NOT NULL DEFAULT 1,
            is_enabled        INTEGER NOT NULL DEFAULT 1,
            display_order     INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS data_analysis_log (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            project_uid   TEXT NOT NULL,
            analysis_type TEXT NOT NULL,
            analysis_data TEXT NOT NULL,
            success       INTEGER NOT NULL,
            error_message TEXT,
            created_at    TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_submissions_project ON project_submissions (project_uid)",
        "CREATE INDEX IF NOT EXISTS idx_charts_project ON chart_configs (project_uid)",
        "CREATE INDEX IF NOT EXISTS idx_analysis_log_project ON data_analysis_log (project_uid)",
        "CREATE INDEX IF NOT EXISTS idx_projects_next_sync ON saved_projects (auto_sync_enabled, next_sync_time)",
    ];

    for stmt in statements {
        sqlx::query(stmt).execute(pool).await?;
    }

    info!("Esquema de la base de datos asegurado.");
    Ok(())
}

/// Base de datos en memoria con el esquema creado. Una sola conexión: cada
/// conexión `:memory:` es una base distinta.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("sqlite en memoria");
    ensure_schema(&pool).await.expect("esquema");
    pool
}
