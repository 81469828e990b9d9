//! Network reachability.
//!
//! `Reachability` holds the single online flag. Changes are edge-triggered:
//! subscribers hear about a transition only when the value actually flips.
//! `Monitor` turns every `BecameOnline` into one sync run, and `Prober` feeds
//! the flag from periodic requests to the backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Request, Transport};
use crate::sync::SyncProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  BecameOnline,
  BecameOffline,
}

struct Inner {
  state: watch::Sender<bool>,
  events: broadcast::Sender<Transition>,
}

/// Shared online/offline state. Cloning yields another handle to the same flag.
#[derive(Clone)]
pub struct Reachability {
  inner: Arc<Inner>,
}

impl Reachability {
  pub fn new(online: bool) -> Self {
    let (state, _) = watch::channel(online);
    let (events, _) = broadcast::channel(16);
    Self {
      inner: Arc::new(Inner { state, events }),
    }
  }

  pub fn is_online(&self) -> bool {
    *self.inner.state.borrow()
  }

  /// Record the current connectivity. Returns the transition when the value
  /// changed, `None` when it was already `online`.
  pub fn set_online(&self, online: bool) -> Option<Transition> {
    let changed = self.inner.state.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if !changed {
      return None;
    }

    let transition = if online {
      Transition::BecameOnline
    } else {
      Transition::BecameOffline
    };
    info!(?transition, "connectivity changed");
    // Nobody listening is fine.
    let _ = self.inner.events.send(transition);
    Some(transition)
  }

  /// Transition events from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
    self.inner.events.subscribe()
  }

  /// Current state plus change notifications.
  pub fn watch(&self) -> watch::Receiver<bool> {
    self.inner.state.subscribe()
  }
}

/// Runs the sync processor once for every transition to online.
pub struct Monitor {
  handle: JoinHandle<()>,
  runs: Arc<AtomicUsize>,
}

impl Monitor {
  pub fn spawn<T>(reachability: &Reachability, processor: Arc<SyncProcessor<T>>) -> Self
  where
    T: Transport + 'static,
  {
    let mut events = reachability.subscribe();
    let reachability = reachability.clone();
    let runs = Arc::new(AtomicUsize::new(0));
    let started = runs.clone();

    let handle = tokio::spawn(async move {
      loop {
        let trigger = match events.recv().await {
          Ok(Transition::BecameOnline) => true,
          Ok(Transition::BecameOffline) => false,
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "reachability events lagged");
            reachability.is_online()
          }
          Err(broadcast::error::RecvError::Closed) => break,
        };
        if !trigger {
          continue;
        }

        started.fetch_add(1, Ordering::SeqCst);
        let processor = processor.clone();
        // Runs may overlap; the processor handles that per item.
        tokio::spawn(async move {
          if let Err(e) = processor.process_queue().await {
            warn!(error = %e, "sync run failed");
          }
        });
      }
      debug!("reachability monitor stopped");
    });

    Self { handle, runs }
  }

  /// Sync runs started so far.
  pub fn runs_started(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }

  pub fn shutdown(self) {
    self.handle.abort();
  }
}

/// Periodically checks whether the backend answers.
#[derive(Clone)]
pub struct Prober<T: Transport> {
  transport: T,
  url: Url,
  interval: Duration,
  timeout: Duration,
}

impl<T: Transport> Prober<T> {
  pub fn new(transport: T, url: Url) -> Self {
    Self {
      transport,
      url,
      interval: Duration::from_secs(30),
      timeout: Duration::from_secs(5),
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Any HTTP response counts as reachable; only a connection failure or a
  /// timeout counts as offline.
  pub async fn probe(&self) -> bool {
    let request = Request::get(self.url.clone());
    match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
      Ok(Ok(response)) => {
        debug!(status = response.status, url = %self.url, "probe answered");
        true
      }
      Ok(Err(e)) => {
        debug!(error = %e, "probe failed");
        false
      }
      Err(_) => {
        debug!(timeout = ?self.timeout, "probe timed out");
        false
      }
    }
  }

  /// Probe once and publish the result.
  pub async fn check(&self, reachability: &Reachability) -> bool {
    let online = self.probe().await;
    reachability.set_online(online);
    online
  }

  pub fn spawn(self, reachability: Reachability) -> JoinHandle<()>
  where
    T: 'static,
  {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        self.check(&reachability).await;
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::net::mock::MockTransport;
  use crate::net::Response;
  use crate::store::{Collection, LocalStore, MemoryStore, SyncQueueItem};
  use crate::sync;
  use serde_json::json;

  async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
      if done() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
  }

  #[tokio::test]
  async fn test_transitions_are_edge_triggered() {
    let reachability = Reachability::new(false);
    let mut events = reachability.subscribe();

    assert_eq!(reachability.set_online(false), None);
    assert_eq!(reachability.set_online(true), Some(Transition::BecameOnline));
    assert_eq!(reachability.set_online(true), None);
    assert_eq!(reachability.set_online(false), Some(Transition::BecameOffline));

    assert_eq!(events.recv().await.unwrap(), Transition::BecameOnline);
    assert_eq!(events.recv().await.unwrap(), Transition::BecameOffline);
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_watch_sees_latest_state() {
    let reachability = Reachability::new(true);
    let mut state = reachability.watch();
    assert!(*state.borrow());

    reachability.set_online(false);
    state.changed().await.unwrap();
    assert!(!*state.borrow_and_update());
    assert!(!reachability.is_online());
  }

  #[tokio::test]
  async fn test_monitor_syncs_once_per_online_transition() {
    let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
    for n in 0..3 {
      sync::enqueue(
        store.as_ref(),
        SyncQueueItem::new(&format!("user/progress/u{}", n), "POST", json!({})),
      )
      .unwrap();
    }
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(200))));
    let processor = Arc::new(SyncProcessor::new(
      store.clone(),
      transport.clone(),
      Url::parse("http://localhost:5000").unwrap(),
    ));

    let reachability = Reachability::new(false);
    let monitor = Monitor::spawn(&reachability, processor);

    reachability.set_online(true);
    reachability.set_online(true);
    wait_for(|| store.count(Collection::SyncQueue).unwrap() == 0).await;
    assert_eq!(monitor.runs_started(), 1);
    assert_eq!(transport.call_count(), 3);

    reachability.set_online(false);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(monitor.runs_started(), 1);

    monitor.shutdown();
  }

  #[tokio::test]
  async fn test_prober_publishes_result() {
    let url = Url::parse("http://localhost:5000/api/ai/status").unwrap();
    let reachability = Reachability::new(false);

    let up = Prober::new(Arc::new(MockTransport::new(|_| Ok(Response::new(500)))), url.clone());
    assert!(up.check(&reachability).await);
    assert!(reachability.is_online());

    let down = Prober::new(
      Arc::new(MockTransport::new(|_| Err(Error::NetworkUnreachable("refused".into())))),
      url.clone(),
    );
    assert!(!down.check(&reachability).await);
    assert!(!reachability.is_online());

    let slow = Prober::new(
      Arc::new(MockTransport::new(|_| Ok(Response::new(200))).with_delay(Duration::from_millis(200))),
      url,
    )
    .with_timeout(Duration::from_millis(20));
    assert!(!slow.probe().await);
  }
}
