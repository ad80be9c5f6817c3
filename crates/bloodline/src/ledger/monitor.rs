use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{BloodType, CenterId, StockKey};
use super::error::EngineError;
use super::notify::{MessageKind, Notification, NotificationDispatcher, NotificationGateway};
use super::repository::{LedgerStore, StockFilter};
use crate::clock::Clock;
use crate::config::MonitorPolicy;

/// Critical stock pair selected for alerting by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub center: CenterId,
    pub center_name: String,
    pub blood_type: BloodType,
    pub quantity: u32,
    pub critical_threshold: u32,
}

impl StockAlert {
    pub fn key(&self) -> StockKey {
        StockKey {
            center: self.center,
            blood_type: self.blood_type,
        }
    }

    pub fn notification(&self, recipient: &str) -> Notification {
        Notification::new(recipient, MessageKind::CriticalStock)
            .with("center_id", self.center)
            .with("center", &self.center_name)
            .with("blood_type", self.blood_type)
            .with("quantity", self.quantity)
            .with("critical_threshold", self.critical_threshold)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Pairs currently at or below threshold.
    pub critical: usize,
    /// Pairs newly alerted by this scan.
    pub alerts: Vec<StockAlert>,
    /// Critical pairs held back because nothing changed since their last alert.
    pub suppressed: usize,
    /// Pairs back above threshold whose alert memory was cleared.
    pub recovered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorRun {
    pub report: ScanReport,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct AlertMark {
    quantity: u32,
    at: DateTime<Utc>,
}

/// Periodic critical-stock scanner.
///
/// A critical pair is alerted when it was never alerted, when its quantity differs from
/// the quantity last alerted, or once the re-alert cooldown has elapsed. A pair that
/// recovers above its threshold is forgotten, so the next breach alerts immediately.
/// The monitor only reads the ledger.
pub struct StockMonitor<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    recipient: String,
    cooldown: Duration,
    marks: Mutex<HashMap<StockKey, AlertMark>>,
}

impl<S> StockMonitor<S>
where
    S: LedgerStore + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, policy: &MonitorPolicy) -> Self {
        Self {
            store,
            clock,
            recipient: policy.alert_recipient.clone(),
            cooldown: policy.realert_cooldown(),
            marks: Mutex::new(HashMap::new()),
        }
    }

    /// Select the alerts due now and remember them as sent.
    pub fn scan(&self) -> Result<ScanReport, EngineError> {
        let now = self.clock.now();
        let (entries, names) = self.store.transaction(|unit| {
            let entries = unit.stock_entries(&StockFilter::default())?;
            let names: BTreeMap<CenterId, String> = unit
                .centers()?
                .into_iter()
                .map(|center| (center.id, center.name))
                .collect();
            Ok::<_, EngineError>((entries, names))
        })?;

        let mut marks = self.marks();
        let mut report = ScanReport::default();
        for entry in entries {
            let key = entry.key();
            if !entry.is_critical() {
                if marks.remove(&key).is_some() {
                    report.recovered += 1;
                    debug!(center_id = %key.center, blood_type = %key.blood_type, "stock recovered");
                }
                continue;
            }

            report.critical += 1;
            let due = match marks.get(&key) {
                None => true,
                Some(mark) => mark.quantity != entry.quantity || now - mark.at >= self.cooldown,
            };
            if !due {
                report.suppressed += 1;
                continue;
            }

            marks.insert(
                key,
                AlertMark {
                    quantity: entry.quantity,
                    at: now,
                },
            );
            report.alerts.push(StockAlert {
                center: entry.center,
                center_name: names
                    .get(&entry.center)
                    .cloned()
                    .unwrap_or_else(|| entry.center.to_string()),
                blood_type: entry.blood_type,
                quantity: entry.quantity,
                critical_threshold: entry.critical_threshold,
            });
        }

        info!(
            critical = report.critical,
            alerts = report.alerts.len(),
            suppressed = report.suppressed,
            recovered = report.recovered,
            "stock scan complete"
        );
        Ok(report)
    }

    /// Scan and deliver; pairs whose alert could not be delivered are retried next run.
    pub fn run<G>(&self, dispatcher: &NotificationDispatcher<G>) -> Result<MonitorRun, EngineError>
    where
        G: NotificationGateway + 'static,
    {
        let report = self.scan()?;
        let mut run = MonitorRun::default();
        for alert in &report.alerts {
            match dispatcher.deliver(&alert.notification(&self.recipient)) {
                Ok(()) => run.delivered += 1,
                Err(_) => {
                    run.failed += 1;
                    self.forget(alert.key());
                }
            }
        }
        if run.failed > 0 {
            warn!(failed = run.failed, "critical stock alerts will be retried");
        }
        run.report = report;
        Ok(run)
    }

    fn forget(&self, key: StockKey) {
        self.marks().remove(&key);
    }

    fn marks(&self) -> MutexGuard<'_, HashMap<StockKey, AlertMark>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
