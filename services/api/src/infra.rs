use bloodline::ledger::{
    BloodBankService, MemoryStore, Notification, NotificationGateway, NotifyError,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type SharedService = Arc<BloodBankService<MemoryStore, TracingGateway>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Gateway that hands notifications to the log pipeline; an SMS or e-mail relay replaces it
/// in deployments that deliver for real.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingGateway;

impl NotificationGateway for TracingGateway {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&notification.payload)
            .map_err(|err| NotifyError::Rejected(err.to_string()))?;
        info!(
            recipient = %notification.recipient,
            kind = ?notification.kind,
            %payload,
            "notification sent"
        );
        Ok(())
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
