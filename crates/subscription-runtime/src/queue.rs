//! Notification Queue
//!
//! Bounded channel in front of a single delivery worker. The webhook path
//! only ever calls `try_send`; a full or closed queue drops the message with
//! a warning. Delivery failures stay inside the worker.

use std::sync::Arc;
use subscription_core::{Mailer, Notification, Notifier};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::mailer::MailerConfig;

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Job {
    id: Uuid,
    notification: Notification,
}

/// Handle for enqueuing notifications
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Job>,
}

/// Owns the worker task; await [`NotificationWorker::shutdown`] to drain
pub struct NotificationWorker {
    handle: JoinHandle<usize>,
}

impl NotificationQueue {
    /// Start the worker and return the enqueue handle
    pub fn start(
        mailer: Arc<dyn Mailer>,
        config: &MailerConfig,
        capacity: usize,
    ) -> (Self, NotificationWorker) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let templates = config.templates.clone();

        let handle = tokio::spawn(async move {
            let mut delivered = 0usize;
            while let Some(job) = rx.recv().await {
                let kind = job.notification.kind;
                let Some(template_id) = templates.get(&kind) else {
                    tracing::warn!(job_id = %job.id, kind = kind.as_str(), "No email template configured");
                    continue;
                };

                match mailer
                    .send(&job.notification.to, template_id, &job.notification.variables)
                    .await
                {
                    Ok(()) => {
                        delivered += 1;
                        tracing::info!(job_id = %job.id, kind = kind.as_str(), "Notification sent");
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, kind = kind.as_str(), error = %e, "Notification failed");
                    }
                }
            }
            tracing::info!(delivered, "Notification worker stopped");
            delivered
        });

        (Self { tx }, NotificationWorker { handle })
    }
}

impl Notifier for NotificationQueue {
    fn notify(&self, notification: Notification) {
        if notification.to.is_empty() {
            return;
        }

        let job = Job {
            id: Uuid::new_v4(),
            notification,
        };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(job_id = %job.id, "Notification queue full; dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(job_id = %job.id, "Notification queue closed; dropping message");
            }
        }
    }
}

impl NotificationWorker {
    /// Wait for queued messages to be delivered. Every [`NotificationQueue`]
    /// handle must be dropped first, or this waits forever.
    pub async fn shutdown(self) -> usize {
        match self.handle.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(error = %e, "Notification worker panicked");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use subscription_core::{NotificationKind, SubscriptionError};

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: Option<String>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, template_id: &str, _vars: &Map<String, Value>) -> subscription_core::Result<()> {
            if self.fail_for.as_deref() == Some(to) {
                return Err(SubscriptionError::Notification("rejected".into()));
            }
            self.sent.lock().unwrap().push((to.to_string(), template_id.to_string()));
            Ok(())
        }
    }

    fn config() -> MailerConfig {
        MailerConfig {
            api_key: "k".into(),
            from: "billing@example.com".into(),
            api_url: "http://unused".into(),
            templates: HashMap::from([
                (NotificationKind::SubscriptionStarted, "d-started".to_string()),
                (NotificationKind::PaymentFailed, "d-failed".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("bad@example.com".into()),
            ..Default::default()
        });
        let (queue, worker) = NotificationQueue::start(mailer.clone(), &config(), 16);

        queue.notify(Notification::new(NotificationKind::SubscriptionStarted, "a@example.com"));
        queue.notify(Notification::new(NotificationKind::PaymentFailed, "bad@example.com"));
        queue.notify(Notification::new(NotificationKind::PlanChanged, "a@example.com"));
        queue.notify(Notification::new(NotificationKind::PaymentFailed, "b@example.com"));
        queue.notify(Notification::new(NotificationKind::PaymentFailed, ""));
        drop(queue);

        let delivered = worker.shutdown().await;

        assert_eq!(delivered, 2);
        assert_eq!(
            *mailer.sent.lock().unwrap(),
            vec![
                ("a@example.com".to_string(), "d-started".to_string()),
                ("b@example.com".to_string(), "d-failed".to_string()),
            ]
        );
    }

    /// Mailer that never finishes, so the queue fills up
    struct StuckMailer;

    #[async_trait]
    impl Mailer for StuckMailer {
        async fn send(&self, _to: &str, _template_id: &str, _vars: &Map<String, Value>) -> subscription_core::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, worker) = NotificationQueue::start(Arc::new(StuckMailer), &config(), 1);

        for _ in 0..10 {
            queue.notify(Notification::new(NotificationKind::SubscriptionStarted, "a@example.com"));
        }

        drop(queue);
        worker.handle.abort();
    }
}
