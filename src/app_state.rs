use std::sync::Arc;

use sqlx::SqlitePool;

use crate::{config::AppConfig, kobo::KoboClient, rules::AnalysisRules, sync::AutoSyncService};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: SqlitePool,
    pub kobo: KoboClient,
    pub rules: Arc<AnalysisRules>,
    pub sync: AutoSyncService,
}
