//! Defers operations until connectivity returns.

use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{runtime::Handle, sync::oneshot};
use tracing::{debug, info};

use crate::{
    error::AppError,
    network::{ListenerId, NetworkMonitor},
};

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct QueuedOperation {
    label: String,
    job: Job,
}

struct Shared {
    monitor: Arc<NetworkMonitor>,
    pending: Mutex<VecDeque<QueuedOperation>>,
    listener: Mutex<Option<ListenerId>>,
}

/// FIFO of operations waiting for the next online transition.
///
/// Queued operations wait indefinitely; wrap `enqueue` in a timeout if the
/// caller needs a bound.
#[derive(Clone)]
pub struct OfflineQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue").field("pending", &self.pending_len()).finish()
    }
}

impl OfflineQueue {
    pub fn new(monitor: Arc<NetworkMonitor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                monitor,
                pending: Mutex::new(VecDeque::new()),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Run `operation` now if online, otherwise once connectivity returns.
    ///
    /// Queued operations replay in submission order; a failing operation only
    /// fails its own caller.
    pub async fn enqueue<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.monitor.is_online() {
            return operation().await;
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                // The caller may have given up; the operation still ran.
                let _ = tx.send(operation().await);
            })
        });

        let pending = {
            let mut queue = self.shared.lock_pending();
            queue.push_back(QueuedOperation { label: label.to_string(), job });
            queue.len()
        };
        info!(label, pending, "queued until connectivity returns");

        let handle = Handle::current();
        self.shared.arm(&handle);
        if self.shared.monitor.is_online() {
            self.shared.flush(&handle);
        }

        rx.await
            .map_err(|_| AppError::network("Queued request was dropped before it could run"))?
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedOperation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the one-shot online listener unless one is already waiting.
    fn arm(self: &Arc<Self>, handle: &Handle) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let handle = handle.clone();
        let id = self.monitor.subscribe(move |online| {
            if !online {
                return;
            }
            if let Some(shared) = weak.upgrade() {
                shared.flush(&handle);
            }
        });
        *listener = Some(id);
    }

    fn flush(&self, handle: &Handle) {
        let id = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = id {
            self.monitor.unsubscribe(id);
        }

        let drained: Vec<QueuedOperation> = self.lock_pending().drain(..).collect();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "replaying queued operations");
        handle.spawn(async move {
            for op in drained {
                debug!(label = %op.label, "running queued operation");
                (op.job)().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, testing::MockTransport};

    fn setup(online: bool) -> (Arc<NetworkMonitor>, OfflineQueue) {
        let monitor =
            Arc::new(NetworkMonitor::new(online, Arc::new(MockTransport::new()), "http://probe"));
        (monitor.clone(), OfflineQueue::new(monitor))
    }

    async fn wait_for_pending(queue: &OfflineQueue, n: usize) {
        while queue.pending_len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn runs_immediately_when_online() {
        let (monitor, queue) = setup(true);
        let value = queue.enqueue("now", || async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(monitor.listener_count(), 0);
    }

    #[tokio::test]
    async fn replays_in_submission_order_once_online() {
        let (monitor, queue) = setup(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for (i, label) in ["first", "second", "third"].into_iter().enumerate() {
            let q = queue.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                q.enqueue(label, move || async move {
                    order.lock().unwrap().push(label);
                    Ok::<_, AppError>(i)
                })
                .await
            }));
            wait_for_pending(&queue, i + 1).await;
        }

        assert_eq!(monitor.listener_count(), 1);
        assert!(order.lock().unwrap().is_empty());

        monitor.handle_online();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i);
        }
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(monitor.listener_count(), 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_drain() {
        let (monitor, queue) = setup(false);

        let q = queue.clone();
        let failing = tokio::spawn(async move {
            q.enqueue("bad", || async { Err::<u8, _>(AppError::api("Access forbidden", false)) })
                .await
        });
        wait_for_pending(&queue, 1).await;

        let q = queue.clone();
        let fine = tokio::spawn(async move {
            q.enqueue("good", || async { Ok::<_, AppError>(1u8) }).await
        });
        wait_for_pending(&queue, 2).await;

        monitor.handle_online();

        let err = failing.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(fine.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn offline_transitions_do_not_drain() {
        let (monitor, queue) = setup(false);

        let q = queue.clone();
        let task = tokio::spawn(async move {
            q.enqueue("later", || async { Ok::<_, AppError>(()) }).await
        });
        wait_for_pending(&queue, 1).await;

        monitor.handle_offline();
        tokio::task::yield_now().await;
        assert_eq!(queue.pending_len(), 1);
        assert!(!task.is_finished());

        monitor.handle_online();
        task.await.unwrap().unwrap();
    }
}
