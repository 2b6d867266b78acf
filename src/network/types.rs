use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// HTTP method of an intercepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What the page intends to do with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Destination {
  #[default]
  Empty,
  Document,
  Image,
  Font,
  Script,
  Style,
  Manifest,
}

/// Request mode, only `Navigate` matters for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  #[default]
  Cors,
  /// Top-level navigation
  Navigate,
}

/// An outgoing request from the controlled page scope
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub mode: RequestMode,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// Plain GET for the given absolute URL
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      destination: Destination::Empty,
      mode: RequestMode::Cors,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Top-level navigation to the given URL
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// POST with a JSON body
  pub fn post_json(url: Url, payload: &serde_json::Value) -> Result<Self> {
    let body =
      serde_json::to_vec(payload).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());

    Ok(Self {
      method: Method::Post,
      headers,
      body: Some(body),
      ..Self::get(url)
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Whether this request targets the same origin as `origin`
  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }
}

/// Snapshot of a network response, as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// Add a header. Repeated names are joined with `, ` so no value is lost.
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self
      .headers
      .entry(name.to_lowercase())
      .and_modify(|existing| {
        existing.push_str(", ");
        existing.push_str(value);
      })
      .or_insert_with(|| value.to_string());
    self
  }

  /// 2xx status
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type(&self) -> Option<&str> {
    self.headers.get("content-type").map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_repeated_headers_are_kept() {
    let response = Response::new(200, "")
      .with_header("Vary", "Accept")
      .with_header("vary", "Accept-Encoding")
      .with_header("Content-Type", "text/html");

    assert_eq!(
      response.headers.get("vary").map(String::as_str),
      Some("Accept, Accept-Encoding")
    );
    assert_eq!(response.content_type(), Some("text/html"));
  }

  #[test]
  fn test_navigation_is_a_document_get() {
    let request = Request::navigate(Url::parse("https://jobs.example/gigs").unwrap());
    assert_eq!(request.method, Method::Get);
    assert_eq!(request.mode, RequestMode::Navigate);
    assert_eq!(request.destination, Destination::Document);
  }
}
