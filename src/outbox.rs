//! Outbox for side effects of appointment mutations.
//!
//! Mutations enqueue notifications and change events after they commit. An
//! [`OutboxWorker`] delivers them through a [`Notifier`] and an
//! [`EventPublisher`]; delivery failures are logged and dropped so they can
//! never turn a committed booking into a reported failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::models::{AppointmentId, AppointmentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AppointmentCreated,
    AppointmentStatusUpdated,
    AppointmentCancelled,
    AppointmentRescheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: String,
}

/// Payload published on the change channel after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ChangeEvent {
    #[serde(rename_all = "camelCase")]
    Created {
        appointment_id: AppointmentId,
        provider_id: String,
        client_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StatusUpdated {
        appointment_id: AppointmentId,
        status: AppointmentStatus,
    },
    #[serde(rename_all = "camelCase")]
    Rescheduled {
        appointment_id: AppointmentId,
        date_time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Updated {
        appointment_id: AppointmentId,
        field: String,
        value: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: Notification) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), DeliveryError>;
}

/// Writes notifications to the log instead of a delivery transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, user_id: &str, notification: Notification) -> Result<(), DeliveryError> {
        info!(
            user_id,
            kind = ?notification.kind,
            link = %notification.link,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Writes change events to the log instead of a pub/sub transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), DeliveryError> {
        info!(channel, %payload, "Change event published");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboxMessage {
    Notify {
        user_id: String,
        notification: Notification,
    },
    Publish(ChangeEvent),
}

/// Sending half of the outbox, held by the scheduler.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboxMessage>,
}

impl Outbox {
    pub fn channel() -> (Outbox, mpsc::UnboundedReceiver<OutboxMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx }, rx)
    }

    pub fn notify(&self, user_id: &str, notification: Notification) {
        self.enqueue(OutboxMessage::Notify {
            user_id: user_id.to_string(),
            notification,
        });
    }

    pub fn publish(&self, event: ChangeEvent) {
        self.enqueue(OutboxMessage::Publish(event));
    }

    fn enqueue(&self, message: OutboxMessage) {
        if let Err(err) = self.tx.send(message) {
            warn!(message = ?err.0, "Outbox worker is gone, dropping message");
        }
    }
}

pub struct OutboxWorker {
    rx: mpsc::UnboundedReceiver<OutboxMessage>,
    notifier: Arc<dyn Notifier>,
    publisher: Arc<dyn EventPublisher>,
    channel: String,
}

impl OutboxWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<OutboxMessage>,
        notifier: Arc<dyn Notifier>,
        publisher: Arc<dyn EventPublisher>,
        channel: impl Into<String>,
    ) -> Self {
        OutboxWorker {
            rx,
            notifier,
            publisher,
            channel: channel.into(),
        }
    }

    /// Deliver messages until every [`Outbox`] handle has been dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.deliver(message).await;
        }
        debug!("Outbox closed, worker stopping");
    }

    /// Deliver everything queued right now and return how many messages
    /// were handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.rx.try_recv() {
            self.deliver(message).await;
            handled += 1;
        }
        handled
    }

    async fn deliver(&self, message: OutboxMessage) {
        match message {
            OutboxMessage::Notify {
                user_id,
                notification,
            } => {
                let kind = notification.kind;
                if let Err(err) = self.notifier.notify(&user_id, notification).await {
                    warn!(%user_id, ?kind, error = %err, "Notification delivery failed");
                }
            }
            OutboxMessage::Publish(event) => {
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(?event, error = %err, "Could not encode change event");
                        return;
                    }
                };
                if let Err(err) = self.publisher.publish(&self.channel, payload).await {
                    warn!(channel = %self.channel, error = %err, "Change event publish failed");
                }
            }
        }
    }
}
