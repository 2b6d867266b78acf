//! Deferred submission queue.
//!
//! Writes attempted while offline are persisted and replayed once
//! connectivity returns. A failed replay never blocks the submissions
//! queued behind it, and is retried on the next drain.

mod store;
mod submission;

pub use store::{QueueStore, SqliteQueueStore};
pub use submission::{PendingSubmission, ReplayEvent, SubmissionState};

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::network::{Fetcher, Request};

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Ids delivered and removed
  pub delivered: Vec<String>,
  /// Ids still pending after this pass
  pub pending: Vec<String>,
  /// Another drain was already running, nothing was attempted
  pub skipped: bool,
}

/// Durable, ordered queue of writes replayed against `endpoint`.
pub struct SubmissionQueue<Q: QueueStore, F: Fetcher> {
  store: Arc<Q>,
  fetcher: Arc<F>,
  endpoint: Url,
  draining: Mutex<()>,
}

impl<Q: QueueStore, F: Fetcher> SubmissionQueue<Q, F> {
  pub fn new(store: Arc<Q>, fetcher: Arc<F>, endpoint: Url) -> Self {
    Self {
      store,
      fetcher,
      endpoint,
      draining: Mutex::new(()),
    }
  }

  /// Persist a submission. Returns once the durable write completed.
  pub fn enqueue(&self, payload: Value) -> Result<String> {
    let record = self.store.add(&PendingSubmission::new(payload))?;
    info!(id = %record.id, seq = record.seq, "Queued submission for replay");
    Ok(record.id)
  }

  /// Submissions waiting for delivery, oldest first.
  pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
    self.store.get_all()
  }

  /// Manually drop a submission.
  pub fn clear(&self, id: &str) -> Result<bool> {
    self.store.delete(id)
  }

  /// Replay every pending submission once, in creation order.
  ///
  /// Submissions enqueued while a pass runs are left for the next pass.
  pub async fn drain(&self) -> Result<DrainReport> {
    let Ok(_guard) = self.draining.try_lock() else {
      debug!("Drain already in progress, skipping");
      return Ok(DrainReport {
        skipped: true,
        ..DrainReport::default()
      });
    };

    let snapshot = self.store.get_all()?;
    let mut report = DrainReport::default();

    for submission in snapshot {
      let state = advance(SubmissionState::Pending, ReplayEvent::Start)?;
      let event = if self.deliver(&submission).await {
        ReplayEvent::Delivered
      } else {
        ReplayEvent::Failed
      };

      if !advance(state, event)?.is_terminal() {
        report.pending.push(submission.id);
        continue;
      }
      match self.store.delete(&submission.id) {
        Ok(_) => report.delivered.push(submission.id),
        Err(e) => {
          warn!(id = %submission.id, error = %e, "Delivered submission could not be removed");
          report.pending.push(submission.id);
        }
      }
    }

    info!(
      delivered = report.delivered.len(),
      pending = report.pending.len(),
      "Drain complete"
    );
    Ok(report)
  }

  /// POST the payload. Only a 2xx response counts as delivered.
  async fn deliver(&self, submission: &PendingSubmission) -> bool {
    let request = match Request::post_json(self.endpoint.clone(), &submission.payload) {
      Ok(request) => request,
      Err(e) => {
        warn!(id = %submission.id, error = %e, "Failed to build replay request");
        return false;
      }
    };

    match self.fetcher.fetch(&request).await {
      Ok(response) if response.is_ok() => true,
      Ok(response) => {
        warn!(id = %submission.id, status = response.status, "Replay rejected");
        false
      }
      Err(e) => {
        warn!(id = %submission.id, error = %e, "Replay failed");
        false
      }
    }
  }
}

fn advance(state: SubmissionState, event: ReplayEvent) -> Result<SubmissionState> {
  state
    .on(event)
    .ok_or_else(|| eyre!("Invalid submission transition {:?} on {:?}", state, event))
}
