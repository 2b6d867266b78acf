//! Scripted fetcher for tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::client::Fetcher;
use super::types::{Request, Response};

#[derive(Clone)]
enum Outcome {
  Respond(Response),
  RespondAfter(Response, Duration),
  Fail,
  Hang,
}

/// Fetcher answering from a per-URL script. Unscripted URLs fail as if offline.
#[derive(Default)]
pub struct ScriptedFetcher {
  routes: Mutex<HashMap<String, Outcome>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Respond(response));
  }

  /// Answer with `response` once `delay` has passed
  pub fn respond_after(&self, url: &str, response: Response, delay: Duration) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::RespondAfter(response, delay));
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Fail);
  }

  /// The fetch never settles
  pub fn hang(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Hang);
  }

  pub fn calls_to(&self, url: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|u| u.as_str() == url)
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let outcome = self.routes.lock().unwrap().get(&url).cloned();
    match outcome {
      Some(Outcome::Respond(response)) => Ok(response),
      Some(Outcome::RespondAfter(response, delay)) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      Some(Outcome::Hang) => futures::future::pending().await,
      Some(Outcome::Fail) | None => Err(eyre!("network unreachable: {}", url)),
    }
  }
}
