//! Email notifications.
//!
//! [`Notifier`] renders and delivers one notification, retrying transient
//! provider failures with exponential backoff. Scheduled scans call it inline
//! so that each invoice gets a result record. Status transitions and chat go
//! through [`NotificationDispatcher`]: a bounded queue drained by a background
//! worker, so the request that caused the notification never waits on SMTP.

use super::metrics::record_notification;
use super::providers::{EmailProvider, ProviderError, ProviderResponse};
use super::templates;
use crate::models::Invoice;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Invoice fields the templates need.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceNotice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_name: String,
    pub client_email: String,
    pub total_ttc: Decimal,
    pub due_date: NaiveDate,
}

impl From<&Invoice> for InvoiceNotice {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            client_name: invoice.client_name.clone(),
            client_email: invoice.client_email.trim().to_string(),
            total_ttc: invoice.total_ttc,
            due_date: invoice.due_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    InvoiceSent(InvoiceNotice),
    PaymentConfirmed {
        notice: InvoiceNotice,
        paid_on: NaiveDate,
    },
    PaymentReminder {
        notice: InvoiceNotice,
        days_remaining: i64,
    },
    OverdueNotice {
        notice: InvoiceNotice,
        days_overdue: i64,
    },
    NewMessage {
        to: String,
        recipient_name: String,
        sender_name: String,
        preview: String,
        conversation_id: Uuid,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::InvoiceSent(notice)
            | Notification::PaymentConfirmed { notice, .. }
            | Notification::PaymentReminder { notice, .. }
            | Notification::OverdueNotice { notice, .. } => &notice.client_email,
            Notification::NewMessage { to, .. } => to,
        }
    }

    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::InvoiceSent(_) => "invoice_sent",
            Notification::PaymentConfirmed { .. } => "payment_confirmed",
            Notification::PaymentReminder { .. } => "payment_reminder",
            Notification::OverdueNotice { .. } => "overdue_notice",
            Notification::NewMessage { .. } => "new_message",
        }
    }
}

pub struct Notifier {
    provider: Arc<dyn EmailProvider>,
    base_url: String,
    retry_window: Duration,
}

impl Notifier {
    pub fn new(provider: Arc<dyn EmailProvider>, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            retry_window: Duration::from_secs(60),
        }
    }

    /// Upper bound on time spent retrying one notification.
    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Render and send. Blank recipients are refused without calling the provider.
    pub async fn deliver(
        &self,
        notification: &Notification,
    ) -> Result<ProviderResponse, ProviderError> {
        let kind = notification.kind();
        if notification.recipient().trim().is_empty() {
            record_notification(kind, "skipped");
            return Err(ProviderError::InvalidRecipient(
                "recipient email is empty".to_string(),
            ));
        }

        let email = templates::render(notification, &self.base_url);
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };

        let result = retry(backoff, || async {
            self.provider.send(&email).await.map_err(|e| {
                if e.is_transient() {
                    tracing::warn!(kind, to = %email.to, error = %e, "Transient email failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await;

        match &result {
            Ok(_) => {
                record_notification(kind, "sent");
                tracing::info!(kind, to = %email.to, "Notification delivered");
            }
            Err(e) => {
                record_notification(kind, "failed");
                tracing::error!(kind, to = %email.to, error = %e, "Notification failed");
            }
        }
        result
    }
}

/// Time [`NotificationDispatcher::shutdown`] waits for running deliveries.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Fire-and-forget delivery through a bounded queue.
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
    shutdown_token: CancellationToken,
    deliveries: TaskTracker,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn spawn_delivery(deliveries: &TaskTracker, notifier: &Arc<Notifier>, notification: Notification) {
    let notifier = notifier.clone();
    deliveries.spawn(async move {
        // Errors are logged and counted by the notifier.
        let _ = notifier.deliver(&notification).await;
    });
}

impl NotificationDispatcher {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn start(notifier: Arc<Notifier>, queue_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Notification>(queue_size.max(1));
        let shutdown_token = CancellationToken::new();
        let shutdown = shutdown_token.clone();
        let deliveries = TaskTracker::new();
        let tracker = deliveries.clone();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(notification) => spawn_delivery(&tracker, &notifier, notification),
                        None => break,
                    },
                }
            }

            // Refuse new work, then hand out everything already accepted.
            rx.close();
            let mut drained = 0usize;
            while let Some(notification) = rx.recv().await {
                spawn_delivery(&tracker, &notifier, notification);
                drained += 1;
            }
            tracing::info!(drained, "Notification worker shutting down");
        });

        Self {
            tx,
            shutdown_token,
            deliveries,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a notification. Never blocks; returns whether it was accepted.
    pub fn enqueue(&self, notification: Notification) -> bool {
        let kind = notification.kind();
        if notification.recipient().trim().is_empty() {
            record_notification(kind, "skipped");
            tracing::info!(kind, "No recipient email, notification skipped");
            return false;
        }

        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_notification(kind, "dropped");
                tracing::warn!(kind, "Notification queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_notification(kind, "dropped");
                tracing::warn!(kind, "Notification worker stopped, dropping notification");
                false
            }
        }
    }

    /// Stop accepting notifications, deliver the queued ones and wait for
    /// running deliveries, up to [`DRAIN_TIMEOUT`].
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Notification worker panicked");
            }
        }

        self.deliveries.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.deliveries.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.deliveries.len(),
                "Notification deliveries still running at shutdown"
            );
        }
    }
}
