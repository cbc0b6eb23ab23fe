//! Notification dispatcher: background task that delivers queued alerts.
//!
//! The poll loop only ever calls [`NotifierHandle::notify`], which queues
//! without waiting. Delivery happens in the dispatcher task, bounded by a
//! per-message timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{NotifyError, NotifyResult};
use crate::message::AlertMessage;
use crate::sink::AlertSink;

/// Cloneable, non-blocking entry point to a dispatcher.
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<AlertMessage>,
}

impl NotifierHandle {
    /// A handle whose messages land in the returned receiver.
    ///
    /// Useful when the caller wants to drive delivery itself.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AlertMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message for delivery. Never blocks.
    ///
    /// Returns `false` (and logs) if the queue is full or the dispatcher
    /// has stopped; the message is dropped in that case.
    pub fn notify(&self, message: AlertMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(headline = %msg.headline, "notification queue full, dropping alert");
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!(headline = %msg.headline, "notifier closed, dropping alert");
                false
            }
        }
    }
}

/// Spawns and runs the delivery task.
pub struct Dispatcher;

impl Dispatcher {
    /// Start a dispatcher delivering to `sink`.
    ///
    /// The task exits once every [`NotifierHandle`] clone has been dropped
    /// and the queue is drained.
    pub fn spawn(
        sink: Arc<dyn AlertSink>,
        send_timeout: Duration,
        capacity: usize,
    ) -> (NotifierHandle, JoinHandle<()>) {
        let (handle, rx) = NotifierHandle::channel(capacity);
        let task = tokio::spawn(run_dispatcher(sink, rx, send_timeout));
        (handle, task)
    }
}

async fn run_dispatcher(
    sink: Arc<dyn AlertSink>,
    mut rx: mpsc::Receiver<AlertMessage>,
    send_timeout: Duration,
) {
    debug!(timeout = ?send_timeout, "notification dispatcher starting");
    while let Some(message) = rx.recv().await {
        // Errors are already logged; delivery is best-effort.
        let _ = deliver(sink.as_ref(), &message, send_timeout).await;
    }
    debug!("notification dispatcher stopped");
}

/// Deliver one message with a bounded wait. Failures are logged, not retried.
pub async fn deliver(
    sink: &dyn AlertSink,
    message: &AlertMessage,
    send_timeout: Duration,
) -> NotifyResult<()> {
    let result = match tokio::time::timeout(send_timeout, sink.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(send_timeout)),
    };

    match &result {
        Ok(()) => info!(headline = %message.headline, "alert delivered"),
        Err(e) => warn!(headline = %message.headline, error = %e, "alert delivery failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<AlertMessage>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, message: &AlertMessage) -> NotifyResult<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn send(&self, _message: &AlertMessage) -> NotifyResult<()> {
            Err(NotifyError::Status {
                status: 500,
                body: "nope".to_string(),
            })
        }
    }

    struct HangingSink;

    #[async_trait]
    impl AlertSink for HangingSink {
        async fn send(&self, _message: &AlertMessage) -> NotifyResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_delivers_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let (handle, task) = Dispatcher::spawn(sink.clone(), Duration::from_secs(1), 8);

        assert!(handle.notify(AlertMessage::plain("one")));
        assert!(handle.notify(AlertMessage::plain("two")));
        drop(handle);
        task.await.unwrap();

        let sent = sink.sent.lock().unwrap();
        let headlines: Vec<_> = sent.iter().map(|m| m.headline.as_str()).collect();
        assert_eq!(headlines, ["one", "two"]);
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_dispatcher() {
        let (handle, task) = Dispatcher::spawn(Arc::new(FailingSink), Duration::from_secs(1), 8);
        assert!(handle.notify(AlertMessage::plain("one")));
        assert!(handle.notify(AlertMessage::plain("two")));
        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_sink_times_out() {
        let result = deliver(
            &HangingSink,
            &AlertMessage::plain("stuck"),
            Duration::from_secs(10),
        )
        .await;
        assert!(matches!(result, Err(NotifyError::Timeout(d)) if d == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn notify_never_blocks_when_full() {
        let (handle, _rx) = NotifierHandle::channel(1);
        assert!(handle.notify(AlertMessage::plain("one")));
        assert!(!handle.notify(AlertMessage::plain("two")));
    }

    #[tokio::test]
    async fn notify_after_close_is_dropped() {
        let (handle, rx) = NotifierHandle::channel(4);
        drop(rx);
        assert!(!handle.notify(AlertMessage::plain("late")));
    }
}
