use crate::cli::ServeArgs;
use crate::infra::{open_repository, AppState, TracingNotifier};
use crate::routes::with_application_routes;
use admissions::applications::{ApplicationLifecycleService, TransitionPolicy};
use admissions::config::AppConfig;
use admissions::error::AppError;
use admissions::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(database) = args.database.take() {
        config.storage.database_path = Some(database);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(open_repository(&config.storage)?);
    let policy = TransitionPolicy::new(config.lifecycle.transition_mode);
    let lifecycle_service = Arc::new(ApplicationLifecycleService::new(
        repository,
        Arc::new(TracingNotifier),
        policy,
    ));

    let app = with_application_routes(lifecycle_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        transition_policy = policy.mode().label(),
        "admissions lifecycle service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
