//! Connectivity state shared by the retry engine, the offline queue and the UI.

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::http::HttpTransport;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle returned by [`NetworkMonitor::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Tracks whether the process believes it is online.
///
/// One instance is built by the composition root and shared as
/// `Arc<NetworkMonitor>`. The flag only changes through
/// [`handle_online`](Self::handle_online) and
/// [`handle_offline`](Self::handle_offline).
pub struct NetworkMonitor {
    online: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    transport: Arc<dyn HttpTransport>,
    probe_url: String,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.listener_count())
            .field("probe_url", &self.probe_url)
            .finish()
    }
}

impl NetworkMonitor {
    pub fn new(
        initially_online: bool,
        transport: Arc<dyn HttpTransport>,
        probe_url: impl Into<String>,
    ) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            transport,
            probe_url: probe_url.into(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Register a callback invoked with the new state on every transition.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the listener was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    pub fn handle_online(&self) {
        self.transition(true);
    }

    pub fn handle_offline(&self) {
        self.transition(false);
    }

    /// Issue a short request to the probe URL, ignoring the cached flag.
    pub async fn probe(&self) -> bool {
        let request = self.transport.get(&self.probe_url, &[], PROBE_TIMEOUT);
        match tokio::time::timeout(PROBE_TIMEOUT, request).await {
            Ok(Ok(res)) => {
                debug!(status = res.status, "connectivity probe answered");
                true
            }
            Ok(Err(err)) => {
                debug!(error = %err, "connectivity probe failed");
                false
            }
            Err(_) => {
                debug!("connectivity probe timed out");
                false
            }
        }
    }

    /// Poll [`probe`](Self::probe) every `interval` and feed the result into
    /// the transition handlers. Stands in for an OS online/offline signal.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if monitor.probe().await {
                    monitor.handle_online();
                } else {
                    monitor.handle_offline();
                }
            }
        })
    }

    fn transition(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return;
        }

        if online {
            info!("connectivity restored");
        } else {
            warn!("connectivity lost");
        }

        // Snapshot so listeners may unsubscribe themselves mid-notification.
        let snapshot: Vec<Listener> =
            self.lock_listeners().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(online);
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::TransportError, testing::MockTransport};
    use std::sync::Mutex;

    fn monitor(online: bool) -> Arc<NetworkMonitor> {
        Arc::new(NetworkMonitor::new(online, Arc::new(MockTransport::new()), "http://probe"))
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let monitor = monitor(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            monitor.subscribe(move |online| seen.lock().unwrap().push((tag, online)));
        }

        monitor.handle_offline();

        assert!(!monitor.is_online());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", false), ("second", false), ("third", false)]
        );
    }

    #[test]
    fn repeated_state_is_not_a_transition() {
        let monitor = monitor(true);
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        monitor.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        monitor.handle_online();
        monitor.handle_offline();
        monitor.handle_offline();
        monitor.handle_online();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_can_remove_itself_during_notification() {
        let monitor = monitor(false);
        let calls = Arc::new(AtomicU64::new(0));
        let id_slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&monitor);
        let slot = Arc::clone(&id_slot);
        let c = Arc::clone(&calls);
        let id = monitor.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let (Some(m), Some(id)) = (weak.upgrade(), *slot.lock().unwrap()) {
                m.unsubscribe(id);
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        let after = Arc::new(AtomicU64::new(0));
        let a = Arc::clone(&after);
        monitor.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        monitor.handle_online();
        monitor.handle_offline();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.listener_count(), 1);
    }

    #[test]
    fn unsubscribe_unknown_id_is_false() {
        let monitor = monitor(true);
        let id = monitor.subscribe(|_| {});
        assert!(monitor.unsubscribe(id));
        assert!(!monitor.unsubscribe(id));
    }

    #[tokio::test]
    async fn probe_reports_reachability_without_touching_flag() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(503, "");
        transport.push_error(TransportError::Connect("refused".into()));
        let monitor = NetworkMonitor::new(false, transport.clone(), "http://probe");

        assert!(monitor.probe().await);
        assert!(!monitor.probe().await);
        assert!(!monitor.is_online());
        assert_eq!(transport.requests()[0].url, "http://probe");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_gives_up_after_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.push_hang();
        let monitor = NetworkMonitor::new(true, transport, "http://probe");

        let started = tokio::time::Instant::now();
        assert!(!monitor.probe().await);
        assert!(started.elapsed() >= PROBE_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_feeds_transition_handlers() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::Connect("down".into()));
        transport.always(200, "");
        let monitor = Arc::new(NetworkMonitor::new(true, transport, "http://probe"));

        let watcher = monitor.spawn_watcher(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!monitor.is_online());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(monitor.is_online());
        watcher.abort();
    }
}
