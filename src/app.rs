use crate::cache::CacheStorage;
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::network::Fetcher;
use crate::worker::{Event, Outcome, ServiceWorker};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Long-running mode: keep the worker installed and replay queued
/// submissions whenever the origin becomes reachable.
pub struct App<S: CacheStorage, F: Fetcher> {
  worker: Arc<ServiceWorker<S, F>>,
  fetcher: Arc<F>,
  probe: Url,
  interval: Duration,
}

impl<S: CacheStorage, F: Fetcher> App<S, F> {
  pub fn new(config: &Config, worker: Arc<ServiceWorker<S, F>>, fetcher: Arc<F>) -> Result<Self> {
    Ok(Self {
      worker,
      fetcher,
      probe: config.resolve(&config.connectivity.probe_path)?,
      interval: Duration::from_secs(config.connectivity.interval_secs.max(1)),
    })
  }

  /// Run until Ctrl-C
  pub async fn run(&self) -> Result<()> {
    // An offline start keeps serving whatever version is already active
    if let Err(e) = self.worker.dispatch(Event::Install).await {
      warn!(error = %e, "Install failed, continuing with the active version");
    }

    let mut monitor =
      ConnectivityMonitor::spawn(Arc::clone(&self.fetcher), self.probe.clone(), self.interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(probe = %self.probe, "Watching connectivity");
    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("Shutting down");
          break;
        }
        change = monitor.next() => match change {
          Some(change) => self.on_connectivity(change).await,
          None => break,
        },
      }
    }

    Ok(())
  }

  async fn on_connectivity(&self, change: Connectivity) {
    match change {
      Connectivity::Offline => warn!("Origin unreachable, serving from cache"),
      Connectivity::Online => {
        info!("Origin reachable");
        let tag = self.worker.sync_tag().to_string();
        match self.worker.dispatch(Event::Sync(tag)).await {
          Ok(Outcome::Drained(report)) if !report.skipped => info!(
            delivered = report.delivered.len(),
            pending = report.pending.len(),
            "Replayed queued submissions"
          ),
          Ok(_) => {}
          Err(e) => warn!(error = %e, "Replay failed"),
        }
      }
    }
  }
}
