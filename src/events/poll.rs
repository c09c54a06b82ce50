use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

use super::{Dispatcher, Event, EventTransport};
use crate::client::ApiBase;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_EVERY: u64 = 10;

/// Fallback for servers without an event stream. Each tick probes `/config`
/// and every `heartbeat_every`-th tick emits a liveness event. The liveness
/// event is generated locally; it says nothing about server activity.
#[derive(Debug, Clone)]
pub struct PollingEvents {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub heartbeat_every: u64,
}

impl Default for PollingEvents {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
        }
    }
}

impl EventTransport for PollingEvents {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn spawn(&self, api: ApiBase, dispatcher: Dispatcher) -> JoinHandle<()> {
        let config = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.cancelled() => {}
                _ = config.run(api, &dispatcher) => {}
            }
        })
    }
}

impl PollingEvents {
    async fn run(self, api: ApiBase, dispatcher: &Dispatcher) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "starting event monitoring (polling mode)"
        );
        let heartbeat_every = self.heartbeat_every.max(1);
        let connected = Arc::new(AtomicBool::new(false));
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        let mut poll_count: u64 = 0;

        loop {
            ticker.tick().await;
            poll_count += 1;

            // Probes outlive a slow tick and are not cancelled on disconnect.
            let api = api.clone();
            let connected = Arc::clone(&connected);
            let timeout = self.probe_timeout;
            tokio::spawn(async move {
                let reachable = api.probe_liveness(timeout).await;
                let was_connected = connected.swap(reachable, Ordering::SeqCst);
                match transition(was_connected, reachable) {
                    Some(Transition::Connected) => {
                        tracing::info!(base_url = %api.base_url(), "connected to API server")
                    }
                    Some(Transition::Lost) => {
                        tracing::warn!(base_url = %api.base_url(), "lost connection to API server")
                    }
                    None => {}
                }
            });

            if poll_count % heartbeat_every == 0 {
                dispatcher.deliver(Event::liveness(poll_count));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Lost,
}

/// Only edges are reported; steady state yields `None`.
pub fn transition(was_connected: bool, reachable: bool) -> Option<Transition> {
    match (was_connected, reachable) {
        (false, true) => Some(Transition::Connected),
        (true, false) => Some(Transition::Lost),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Subscription};
    use crate::test_support::{MockOpencode, collecting_callback, free_local_url, wait_for_events};

    #[test]
    fn transitions_reported_on_edges_only() {
        assert_eq!(transition(false, true), Some(Transition::Connected));
        assert_eq!(transition(true, false), Some(Transition::Lost));
        assert_eq!(transition(true, true), None);
        assert_eq!(transition(false, false), None);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_every_tenth_tick() {
        let api = ApiBase::parse(&free_local_url().await).unwrap();
        let (callback, events) = collecting_callback();
        let sub = Subscription::start(&PollingEvents::default(), api, callback);

        // 31 ticks at 3s, plus slack before the 32nd.
        tokio::time::sleep(Duration::from_secs(3 * 31) + Duration::from_millis(500)).await;
        sub.disconnect();

        let got = events.lock().unwrap().clone();
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|e| e.kind == EventKind::Liveness));
        let counts: Vec<_> = got.iter().map(|e| e.data["pollCount"].as_u64().unwrap()).collect();
        assert_eq!(counts, vec![10, 20, 30]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(events.lock().unwrap().len(), 3);
        sub.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_before_first_interval() {
        let api = ApiBase::parse(&free_local_url().await).unwrap();
        let (callback, events) = collecting_callback();
        let polling = PollingEvents { heartbeat_every: 1, ..Default::default() };
        let _sub = Subscription::start(&polling, api, callback);

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(events.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn heartbeats_continue_while_server_is_reachable() {
        let mock = MockOpencode::new();
        let base = mock.spawn().await;
        let (callback, events) = collecting_callback();
        let polling = PollingEvents {
            interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(500),
            heartbeat_every: 2,
        };
        let sub = Subscription::start(&polling, ApiBase::parse(&base).unwrap(), callback);

        wait_for_events(&events, 2).await;
        sub.disconnect();
        assert!(mock.config_probes() >= 1);
        let got = events.lock().unwrap().clone();
        assert_eq!(got[0].data["pollCount"], 2);
        assert_eq!(got[1].data["pollCount"], 4);
    }
}
