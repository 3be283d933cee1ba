use crate::cli::ServeArgs;
use crate::infra::{seed_demo_roster, AppState, InMemoryFileStorage, InMemoryIdentityProvider};
use crate::routes::with_program_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use mentorship_ledger::config::AppConfig;
use mentorship_ledger::error::AppError;
use mentorship_ledger::program::{MemoryDocumentStore, MentorshipProgram, ProgramError};
use mentorship_ledger::telemetry;
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

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(MemoryDocumentStore::new());
    let files = Arc::new(InMemoryFileStorage::default());
    let identity = Arc::new(InMemoryIdentityProvider::default());
    if args.seed_demo {
        seed_demo_roster(&store, &identity).map_err(ProgramError::from)?;
        info!("demo roster loaded");
    }

    let program = Arc::new(MentorshipProgram::new(
        store,
        files,
        identity,
        config.program,
    ));

    let app = with_program_routes(program)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        base_points = config.program.base_points,
        "mentorship ledger ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
