use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A write operation waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
  pub id: String,
  /// Opaque payload, replayed as the JSON request body
  pub payload: Value,
  /// Creation order, assigned by the store
  pub seq: i64,
  pub created_at: DateTime<Utc>,
}

impl PendingSubmission {
  /// New record with a generated id. `seq` is assigned when stored.
  pub fn new(payload: Value) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      payload,
      seq: 0,
      created_at: Utc::now(),
    }
  }
}

/// Replay state of one submission.
///
/// ```text
/// Pending --start--> Replaying --delivered--> Delivered
///                        |
///                        +------failed------> Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
  Pending,
  Replaying,
  Delivered,
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEvent {
  Start,
  Delivered,
  Failed,
}

impl SubmissionState {
  /// Next state, or `None` if the event is not valid in this state.
  pub fn on(self, event: ReplayEvent) -> Option<Self> {
    match (self, event) {
      (Self::Pending, ReplayEvent::Start) => Some(Self::Replaying),
      (Self::Replaying, ReplayEvent::Delivered) => Some(Self::Delivered),
      // No retry limit: a failed replay waits for the next connectivity signal
      (Self::Replaying, ReplayEvent::Failed) => Some(Self::Pending),
      _ => None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Delivered)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_successful_replay() {
    let state = SubmissionState::Pending
      .on(ReplayEvent::Start)
      .and_then(|s| s.on(ReplayEvent::Delivered));
    assert_eq!(state, Some(SubmissionState::Delivered));
    assert!(SubmissionState::Delivered.is_terminal());
  }

  #[test]
  fn test_failed_replay_returns_to_pending() {
    let state = SubmissionState::Pending
      .on(ReplayEvent::Start)
      .and_then(|s| s.on(ReplayEvent::Failed));
    assert_eq!(state, Some(SubmissionState::Pending));
  }

  #[test]
  fn test_retries_are_unbounded() {
    let mut state = SubmissionState::Pending;
    for _ in 0..100 {
      state = state.on(ReplayEvent::Start).unwrap();
      state = state.on(ReplayEvent::Failed).unwrap();
    }
    assert_eq!(state, SubmissionState::Pending);
  }

  #[test]
  fn test_invalid_transitions() {
    assert_eq!(SubmissionState::Pending.on(ReplayEvent::Delivered), None);
    assert_eq!(SubmissionState::Delivered.on(ReplayEvent::Start), None);
    assert_eq!(SubmissionState::Replaying.on(ReplayEvent::Start), None);
  }

  #[test]
  fn test_generated_ids_are_unique() {
    let a = PendingSubmission::new(serde_json::json!({"jobId": "42"}));
    let b = PendingSubmission::new(serde_json::json!({"jobId": "42"}));
    assert_ne!(a.id, b.id);
  }
}
