//! Connectivity monitor
//!
//! Holds the current online/offline state on a `watch` channel. Platform
//! code pushes transitions with [`ConnectivityMonitor::set_online`]; where no
//! push events exist, [`ConnectivityMonitor::spawn_poller`] probes the
//! backend at a fixed interval instead.
//!
//! The offline → online transition is what triggers automatic sync passes;
//! see [`Reconnects`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ConnectivityProbe;

/// Current network reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    fn from_online(online: bool) -> Self {
        if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

/// Value carried on the monitor's watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub status: NetworkStatus,
    /// Offline → online transitions seen so far. Watch receivers only observe
    /// the latest value, so a counter keeps quick flaps from being lost.
    pub reconnects: u64,
}

/// Observes online/offline transitions
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState {
            status: initial,
            reconnects: 0,
        });
        Self { tx }
    }

    /// Current status
    pub fn status(&self) -> NetworkStatus {
        self.tx.borrow().status
    }

    pub fn is_offline(&self) -> bool {
        self.status() == NetworkStatus::Offline
    }

    /// Report the platform's connectivity. Only real transitions notify
    /// subscribers.
    pub fn set_online(&self, online: bool) {
        let next = NetworkStatus::from_online(online);
        let changed = self.tx.send_if_modified(|state| {
            if state.status == next {
                return false;
            }
            if next == NetworkStatus::Online {
                state.reconnects += 1;
            }
            state.status = next;
            true
        });

        if changed {
            match next {
                NetworkStatus::Online => tracing::info!("Network online"),
                NetworkStatus::Offline => tracing::warn!("Network offline"),
            }
        }
    }

    /// Raw state stream
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }

    /// Stream of offline → online transitions, starting from now
    pub fn reconnects(&self) -> Reconnects {
        let rx = self.tx.subscribe();
        let seen = rx.borrow().reconnects;
        Reconnects { rx, seen }
    }

    /// Poll `probe` every `interval` and feed the result into this monitor.
    ///
    /// The task runs until the returned handle is aborted.
    pub fn spawn_poller(
        self: &Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.is_reachable().await;
                tracing::trace!(reachable, "Connectivity probe");
                monitor.set_online(reachable);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}

/// Yields once per offline → online transition
///
/// Several reconnects that happen before `next` is polled collapse into one,
/// which is all a sync trigger needs.
pub struct Reconnects {
    rx: watch::Receiver<ConnectivityState>,
    seen: u64,
}

impl Reconnects {
    /// Wait for the next reconnect. Returns `None` once the monitor is gone.
    pub async fn next(&mut self) -> Option<()> {
        loop {
            self.rx.changed().await.ok()?;
            let now = self.rx.borrow_and_update().reconnects;
            if now > self.seen {
                self.seen = now;
                return Some(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagProbe(AtomicBool);

    #[async_trait]
    impl ConnectivityProbe for FlagProbe {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_set_online_updates_status() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::Offline);
        assert!(monitor.is_offline());
        monitor.set_online(true);
        assert_eq!(monitor.status(), NetworkStatus::Online);
    }

    #[tokio::test]
    async fn test_reconnects_fire_only_on_offline_to_online() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::Online);
        let mut reconnects = monitor.reconnects();

        // online → online is not a transition
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        tokio::time::timeout(Duration::from_secs(1), reconnects.next())
            .await
            .expect("reconnect should fire")
            .expect("monitor alive");

        monitor.set_online(false);
        let pending = tokio::time::timeout(Duration::from_millis(50), reconnects.next()).await;
        assert!(pending.is_err(), "going offline is not a reconnect");
    }

    #[tokio::test]
    async fn test_reconnects_end_when_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(NetworkStatus::Offline);
        let mut reconnects = monitor.reconnects();
        drop(monitor);
        assert!(reconnects.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_tracks_probe() {
        let monitor = Arc::new(ConnectivityMonitor::new(NetworkStatus::Online));
        let probe = Arc::new(FlagProbe(AtomicBool::new(false)));
        let handle = monitor.spawn_poller(probe.clone(), Duration::from_secs(20));

        let mut rx = monitor.subscribe();
        rx.changed().await.unwrap();
        assert!(monitor.is_offline());

        probe.0.store(true, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(monitor.status(), NetworkStatus::Online);

        handle.abort();
    }
}
