//! Best-effort voter notifications.
//!
//! Notifications are queued and delivered by a background task, so a slow or
//! failing mailer never holds up ballot intake or token issuance.

use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::model::{ballot::TrackingCode, id::Id};

/// A message for one voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A link carrying a fresh access token.
    AccessLink {
        email: String,
        election_id: Id,
        election_title: String,
        link: String,
        expires_at: DateTime<Utc>,
    },
    /// Confirmation that a ballot was recorded.
    VoteConfirmation {
        email: String,
        election_id: Id,
        election_title: String,
        tracking_code: TrackingCode,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Self::AccessLink { email, .. } | Self::VoteConfirmation { email, .. } => email,
        }
    }
}

impl Display for Notification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessLink { election_id, .. } => {
                write!(f, "access link for election {election_id}")
            }
            Self::VoteConfirmation {
                election_id,
                tracking_code,
                ..
            } => write!(f, "vote confirmation {tracking_code} for election {election_id}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("mail delivery failed: {0}")]
pub struct MailError(pub String);

/// Delivers notifications. Called from a blocking thread.
pub trait Mailer: Send + Sync + 'static {
    fn deliver(&self, notification: &Notification) -> Result<(), MailError>;
}

/// A mailer that only logs what it would have sent.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, notification: &Notification) -> Result<(), MailError> {
        info!(
            "Mail disabled, not sending {notification} to {}",
            notification.recipient()
        );
        Ok(())
    }
}

/// A mailer that keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl Outbox {
    /// Everything delivered so far, oldest first.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Mailer for Outbox {
    fn deliver(&self, notification: &Notification) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Handle for queueing notifications onto the delivery task.
pub struct NotificationQueue {
    sender: Mutex<Option<UnboundedSender<Notification>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NotificationQueue {
    /// Spawn the delivery task. Must be called from within a tokio runtime.
    pub fn start(mailer: Arc<dyn Mailer>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver_all(receiver, mailer));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queue a notification. Never fails; problems are logged.
    pub fn enqueue(&self, notification: Notification) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.as_ref() {
            Some(sender) => {
                if let Err(e) = sender.send(notification) {
                    warn!("Notification queue closed, dropping {}", e.0);
                }
            }
            None => warn!("Notification queue shut down, dropping {notification}"),
        }
    }

    /// Stop accepting notifications and wait for queued ones to be delivered.
    pub async fn shutdown(&self) {
        // Dropping the sender ends the worker once the queue drains.
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Notification worker failed: {e}");
            }
        }
    }
}

/// Deliver notifications one at a time until the queue closes.
async fn deliver_all(mut receiver: UnboundedReceiver<Notification>, mailer: Arc<dyn Mailer>) {
    debug!("Notification worker started");
    while let Some(notification) = receiver.recv().await {
        let mailer = mailer.clone();
        let delivery = tokio::task::spawn_blocking(move || {
            let result = mailer.deliver(&notification);
            (notification, result)
        })
        .await;
        match delivery {
            Ok((notification, Ok(()))) => {
                debug!("Sent {notification} to {}", notification.recipient())
            }
            Ok((notification, Err(e))) => error!(
                "Failed to send {notification} to {}: {e}",
                notification.recipient()
            ),
            Err(e) => error!("Mailer task failed: {e}"),
        }
    }
    debug!("Notification worker stopped");
}
