use crate::cli::ServeArgs;
use crate::infra::{AppState, SharedService, TracingGateway};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use bloodline::clock::{Clock, SystemClock};
use bloodline::config::AppConfig;
use bloodline::error::AppError;
use bloodline::ledger::{BloodBankService, MemoryStore};
use bloodline::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(interval) = args.monitor_interval_secs.take() {
        config.monitor_interval_secs = interval;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service: SharedService = Arc::new(BloodBankService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(TracingGateway),
        clock,
        config.engine.clone(),
    ));

    tokio::spawn(monitor_loop(
        service.clone(),
        Duration::from_secs(config.monitor_interval_secs.max(1)),
    ));

    let app = with_operational_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        monitor_interval_secs = config.monitor_interval_secs,
        "bloodline service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic critical-stock scan; a failed run is logged and retried on the next tick.
async fn monitor_loop(service: SharedService, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match service.run_monitor() {
            Ok(run) => info!(
                critical = run.report.critical,
                alerts = run.report.alerts.len(),
                suppressed = run.report.suppressed,
                delivered = run.delivered,
                failed = run.failed,
                "stock monitor run finished"
            ),
            Err(error) => warn!(%error, code = error.code(), "stock monitor run failed"),
        }
    }
}
