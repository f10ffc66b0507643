//! Sincronización de proyectos con Kobo: sincronización puntual y servicio
//! de sincronización automática en segundo plano.

use std::{
    collections::{BTreeSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::{dataset::columns_of_first, kobo::KoboClient, models::ProjectWithToken, store};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const MAX_CONCURRENT_SYNCS: usize = 3;
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Interpreta un intervalo "HH:MM:SS". Debe ser mayor que cero y no
/// superar `MAX_INTERVAL`.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let parts = raw
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| anyhow!("Intervalo inválido '{raw}': se esperaba HH:MM:SS"))?;
    let &[hours, minutes, seconds] = parts.as_slice() else {
        return Err(anyhow!("Intervalo inválido '{raw}': se esperaba HH:MM:SS"));
    };
    let total = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(seconds))
        .filter(|total| *total <= MAX_INTERVAL.as_secs())
        .ok_or_else(|| anyhow!("El intervalo '{raw}' supera el máximo de {}", format_interval(MAX_INTERVAL)))?;
    if total == 0 {
        return Err(anyhow!("El intervalo de sincronización debe ser mayor que cero"));
    }
    Ok(Duration::from_secs(total))
}

pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

/// Intervalo configurado del proyecto, o el de por defecto.
pub fn project_interval(project: &ProjectWithToken) -> Duration {
    project
        .project
        .auto_sync_interval_secs
        .filter(|secs| *secs > 0)
        .map(|secs| Duration::from_secs(secs as u64))
        .unwrap_or(DEFAULT_INTERVAL)
}

/// Instante `interval` después de ahora, limitado a `MAX_INTERVAL`.
pub fn after(interval: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(interval.min(MAX_INTERVAL))
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

/// Resultado de una sincronización completada.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub project_uid: String,
    pub total_submissions: usize,
    pub available_columns: Vec<String>,
    pub columns_changed: bool,
}

/// Descarga todos los envíos del proyecto y reemplaza los almacenados.
/// Actualiza `last_sync`, el total de envíos y la lista de columnas si cambió.
pub async fn sync_project(
    pool: &SqlitePool,
    kobo: &KoboClient,
    project_uid: &str,
    token: &str,
) -> Result<SyncOutcome> {
    let records = kobo.fetch_submissions(token, project_uid).await?;
    let available_columns = columns_of_first(&records);

    store::replace_submissions(pool, project_uid, &records).await?;

    let previous = store::find_project(pool, project_uid)
        .await?
        .map(|p| p.available_columns.0)
        .unwrap_or_default();
    // Un formulario vacío conserva las columnas conocidas.
    let columns_changed = !available_columns.is_empty() && available_columns != previous;
    if columns_changed {
        store::update_available_columns(pool, project_uid, available_columns.clone()).await?;
    }
    store::record_sync(pool, project_uid, records.len() as i64).await?;

    info!(
        project = project_uid,
        submissions = records.len(),
        columns_changed,
        "Proyecto sincronizado"
    );
    Ok(SyncOutcome {
        project_uid: project_uid.to_string(),
        total_submissions: records.len(),
        available_columns,
        columns_changed,
    })
}

/// Proyecto pendiente en la cola de sincronización.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSync {
    pub project_uid: String,
    pub project_name: String,
    pub next_sync_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    token: String,
    #[serde(skip)]
    interval: Duration,
}

impl From<ProjectWithToken> for QueuedSync {
    fn from(project: ProjectWithToken) -> Self {
        let interval = project_interval(&project);
        Self {
            project_uid: project.project.project_uid,
            project_name: project.project.project_name,
            next_sync_time: project.project.next_sync_time,
            token: project.token,
            interval,
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    is_running: bool,
    syncing: BTreeSet<String>,
    queue: VecDeque<QueuedSync>,
}

impl SyncState {
    /// Encola los proyectos que no estén ya en cola ni sincronizándose y
    /// ordena la cola por `next_sync_time`. Devuelve cuántos se añadieron.
    fn enqueue(&mut self, jobs: impl IntoIterator<Item = QueuedSync>) -> usize {
        let mut added = 0;
        for job in jobs {
            if self.syncing.contains(&job.project_uid)
                || self.queue.iter().any(|q| q.project_uid == job.project_uid)
            {
                continue;
            }
            self.queue.push_back(job);
            added += 1;
        }
        self.queue
            .make_contiguous()
            .sort_by_key(|q| q.next_sync_time);
        added
    }
}

/// Instantánea del servicio para `GET /api/sync/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub currently_syncing: Vec<String>,
    pub queue_length: usize,
    pub max_concurrent: usize,
    pub queue: Vec<QueuedSync>,
}

#[derive(Clone)]
pub struct AutoSyncService {
    pool: SqlitePool,
    kobo: KoboClient,
    poll: Duration,
    retry: Duration,
    permits: Arc<Semaphore>,
    state: Arc<Mutex<SyncState>>,
}

impl AutoSyncService {
    pub fn new(pool: SqlitePool, kobo: KoboClient, poll: Duration, retry: Duration) -> Self {
        Self {
            pool,
            kobo,
            poll,
            retry,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_SYNCS)),
            state: Arc::new(Mutex::new(SyncState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            is_running: state.is_running,
            currently_syncing: state.syncing.iter().cloned().collect(),
            queue_length: state.queue.len(),
            max_concurrent: MAX_CONCURRENT_SYNCS,
            queue: state.queue.iter().cloned().collect(),
        }
    }

    pub fn is_syncing(&self, project_uid: &str) -> bool {
        self.state().syncing.contains(project_uid)
    }

    /// Bucle de sondeo hasta que `shutdown` cambie a `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.state().is_running = true;
        info!("🔄 Sincronización automática iniciada (sondeo cada {:?})", self.poll);

        let mut ticker = tokio::time::interval(self.poll);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Error consultando proyectos pendientes de sincronizar: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state().is_running = false;
        info!("Sincronización automática detenida.");
    }

    /// Encola los proyectos vencidos y lanza tantos como permita el límite
    /// de concurrencia.
    pub async fn poll_once(&self) -> Result<usize> {
        let due = store::projects_due_for_sync(&self.pool, Utc::now()).await?;
        let added = self.state().enqueue(due.into_iter().map(QueuedSync::from));
        if added > 0 {
            info!("{added} proyecto(s) añadidos a la cola de sincronización");
        }
        self.drain_queue();
        Ok(added)
    }

    fn drain_queue(&self) {
        loop {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            let job = {
                let mut state = self.state();
                let Some(job) = state.queue.pop_front() else {
                    break;
                };
                state.syncing.insert(job.project_uid.clone());
                job
            };
            let service = self.clone();
            tokio::spawn(async move {
                service.run_job(job).await;
                drop(permit);
                service.drain_queue();
            });
        }
    }

    async fn run_job(&self, job: QueuedSync) {
        let next = match sync_project(&self.pool, &self.kobo, &job.project_uid, &job.token).await {
            Ok(outcome) => {
                info!(
                    "Sincronización automática de {} completada: {} envíos",
                    job.project_name, outcome.total_submissions
                );
                after(job.interval)
            }
            Err(e) => {
                warn!("Fallo en la sincronización automática de {}: {e}", job.project_uid);
                after(self.retry)
            }
        };
        if let Err(e) = store::set_next_sync_time(&self.pool, &job.project_uid, next).await {
            error!("No se pudo programar la próxima sincronización de {}: {e}", job.project_uid);
        }
        self.state().syncing.remove(&job.project_uid);
    }

    /// Sincronización solicitada por el usuario. Falla si el proyecto ya se
    /// está sincronizando. Reprograma la siguiente ejecución automática.
    pub async fn manual_sync(&self, project: &ProjectWithToken) -> Result<SyncOutcome> {
        let uid = project.project.project_uid.clone();
        if !self.state().syncing.insert(uid.clone()) {
            return Err(anyhow!("El proyecto {uid} ya se está sincronizando"));
        }

        let result = sync_project(&self.pool, &self.kobo, &uid, &project.token).await;
        let scheduled = match &result {
            Ok(_) => store::set_next_sync_time(&self.pool, &uid, after(project_interval(project))).await,
            Err(_) => Ok(()),
        };
        self.state().syncing.remove(&uid);
        scheduled?;
        result
    }
}
