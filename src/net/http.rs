use futures::future::BoxFuture;
use std::time::Duration;
use tracing::debug;

use super::{Request, Response, Transport};
use crate::error::{Error, Result};

/// Transport backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::NetworkUnreachable(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self { client })
  }

  async fn execute(&self, request: Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(|e| {
      Error::NetworkUnreachable(format!("{} {}: {}", request.method, request.url, e))
    })?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| Error::NetworkUnreachable(format!("Failed to read response body: {}", e)))?
      .to_vec();

    debug!(method = %request.method, url = %request.url, status, "network response");
    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    Box::pin(self.execute(request))
  }
}
