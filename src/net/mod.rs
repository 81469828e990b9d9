//! Request/response types and the network transport seam.

mod http;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

use crate::error::{Error, Result};

pub use self::http::HttpTransport;
pub use reqwest::Method;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  Default,
  /// Top-level page load.
  Navigate,
}

/// An outbound request as seen by the gateway and the sync processor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Default,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// Request with a JSON body.
  pub fn json(method: Method, url: Url, body: &serde_json::Value) -> Result<Self> {
    Ok(
      Self::new(method, url)
        .with_header("Content-Type", "application/json")
        .with_body(serde_json::to_vec(body)?),
    )
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }
}

/// A response, either from the network, the cache, or synthesized offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_slice(&self.body)?)
  }
}

/// Sends requests to the network. Connectivity failures come back as
/// `Error::NetworkUnreachable`; non-2xx responses are returned as `Ok`.
pub trait Transport: Send + Sync {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    (**self).send(request)
  }
}

/// Resolve an API path (e.g. `user/progress/42`) against the backend base URL.
pub fn api_url(base: &Url, api_prefix: &str, path: &str) -> Result<Url> {
  let joined = format!(
    "{}/{}",
    api_prefix.trim_end_matches('/'),
    path.trim_start_matches('/')
  );
  base
    .join(&joined)
    .map_err(|e| Error::UpstreamService(format!("Invalid API path '{}': {}", path, e)))
}
