use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Purpose of an outbound message; gateways pick templates from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    AppointmentBooked,
    AppointmentConfirmed,
    AppointmentCancelled,
    DonationRecorded,
    DonationValidated,
    CriticalStock,
}

/// Message queued by a committed operation for delivery after commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub kind: MessageKind,
    pub payload: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(recipient: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            recipient: recipient.into(),
            kind,
            payload: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outbound delivery hook (SMS, push, e-mail adapters).
pub trait NotificationGateway: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("notification rejected by gateway: {0}")]
    Rejected(String),
}

/// Result of a committed domain operation plus the messages it wants delivered.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Committed<T> {
    pub value: T,
    pub notifications: Vec<Notification>,
}

impl<T> Committed<T> {
    pub fn new(value: T, notifications: Vec<Notification>) -> Self {
        Self {
            value,
            notifications,
        }
    }

    pub fn into_parts(self) -> (T, Vec<Notification>) {
        (self.value, self.notifications)
    }
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<(Notification, NotifyError)>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Post-commit delivery step; failures are logged and reported, never propagated.
pub struct NotificationDispatcher<G> {
    gateway: Arc<G>,
}

impl<G> Clone for NotificationDispatcher<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<G> NotificationDispatcher<G>
where
    G: NotificationGateway + 'static,
{
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self.gateway.notify(notification) {
            Ok(()) => {
                debug!(kind = ?notification.kind, recipient = %notification.recipient, "notification delivered");
                Ok(())
            }
            Err(error) => {
                warn!(kind = ?notification.kind, recipient = %notification.recipient, %error, "notification delivery failed");
                Err(error)
            }
        }
    }

    pub fn dispatch(&self, notifications: Vec<Notification>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for notification in notifications {
            match self.deliver(&notification) {
                Ok(()) => report.delivered += 1,
                Err(error) => report.failed.push((notification, error)),
            }
        }
        report
    }

    /// Deliver a committed operation's messages and hand back its value.
    pub fn settle<T>(&self, committed: Committed<T>) -> T {
        let (value, notifications) = committed.into_parts();
        self.dispatch(notifications);
        value
    }
}
