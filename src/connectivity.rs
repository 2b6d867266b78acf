use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::network::{Fetcher, Method, Request};

/// Connectivity transitions observed by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Event handler that turns periodic origin probes into connectivity events.
///
/// Only changes are emitted; the first probe always reports the initial state.
pub struct ConnectivityMonitor {
  rx: mpsc::UnboundedReceiver<Connectivity>,
}

impl ConnectivityMonitor {
  /// Spawn the probe loop. It stops once the monitor is dropped.
  pub fn spawn<F: Fetcher>(fetcher: Arc<F>, probe: Url, interval: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut last = None;

      loop {
        ticker.tick().await;

        // Any HTTP response means the origin is reachable
        let request = Request::get(probe.clone()).with_method(Method::Head);
        let now = match fetcher.fetch(&request).await {
          Ok(_) => Connectivity::Online,
          Err(e) => {
            debug!(error = %e, "Connectivity probe failed");
            Connectivity::Offline
          }
        };

        if last != Some(now) {
          last = Some(now);
          if tx.send(now).is_err() {
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next transition
  pub async fn next(&mut self) -> Option<Connectivity> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::network::fake::ScriptedFetcher;
  use crate::network::Response;

  const PROBE: &str = "https://jobconnect.example.org/";

  #[tokio::test]
  async fn test_emits_initial_state_then_transitions_only() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(PROBE, Response::new(200, ""));

    let mut monitor = ConnectivityMonitor::spawn(
      Arc::clone(&fetcher),
      Url::parse(PROBE).unwrap(),
      Duration::from_millis(5),
    );
    assert_eq!(monitor.next().await, Some(Connectivity::Online));

    fetcher.fail(PROBE);
    assert_eq!(monitor.next().await, Some(Connectivity::Offline));

    // Error statuses still prove the origin is reachable
    fetcher.respond(PROBE, Response::new(503, ""));
    assert_eq!(monitor.next().await, Some(Connectivity::Online));
    assert!(fetcher.calls_to(PROBE) >= 3);
  }
}
