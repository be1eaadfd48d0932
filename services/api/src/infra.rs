use admissions::applications::{
    NotifyError, RepositoryError, SqliteApplicationRepository, StatusNotice, StatusNotifier,
};
use admissions::config::StorageConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Publishes committed status changes as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn notify(&self, notice: StatusNotice) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&notice)
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        info!(
            target: "admissions::notifications",
            application_id = %notice.application_id,
            owner = %notice.owner,
            status = %notice.to,
            %payload,
            "status change notice"
        );
        Ok(())
    }
}

/// File-backed store when a path is configured, otherwise a throwaway in-memory database.
pub(crate) fn open_repository(
    storage: &StorageConfig,
) -> Result<SqliteApplicationRepository, RepositoryError> {
    match &storage.database_path {
        Some(path) => {
            info!(path = %path.display(), "using sqlite application store");
            SqliteApplicationRepository::open(path)
        }
        None => {
            warn!("APP_DATABASE_PATH not set; applications are kept in memory only");
            SqliteApplicationRepository::in_memory()
        }
    }
}
