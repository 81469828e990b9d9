use futures::future::BoxFuture;
use serde::Deserialize;
use url::Url;

use super::{ContentService, LessonContent, LessonRequest};
use crate::error::{Error, Result};
use crate::net::{api_url, Method, Request, Transport};

/// `{success, data}` envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
  #[serde(default)]
  success: bool,
  data: Option<T>,
  #[serde(default)]
  message: Option<String>,
}

/// Content service backed by the lesson endpoint of the backend.
pub struct RemoteContentService<T: Transport> {
  transport: T,
  base_url: Url,
  api_prefix: String,
}

impl<T: Transport> RemoteContentService<T> {
  pub fn new(transport: T, base_url: Url, api_prefix: &str) -> Self {
    Self {
      transport,
      base_url,
      api_prefix: api_prefix.to_string(),
    }
  }

  async fn generate(&self, request: &LessonRequest) -> Result<LessonContent> {
    let url = api_url(&self.base_url, &self.api_prefix, "content/lesson")?;
    let body = serde_json::to_value(request)?;
    let response = self
      .transport
      .send(Request::json(Method::POST, url, &body)?)
      .await?;

    if !response.is_success() {
      return Err(Error::UpstreamService(format!(
        "Lesson generation failed with status {}",
        response.status
      )));
    }

    let envelope: Envelope<LessonContent> = response
      .json()
      .map_err(|e| Error::UpstreamService(format!("Invalid lesson payload: {}", e)))?;

    match envelope.data {
      Some(content) if envelope.success => Ok(content),
      _ => Err(Error::UpstreamService(
        envelope
          .message
          .unwrap_or_else(|| "Lesson generation returned no content".to_string()),
      )),
    }
  }
}

impl<T: Transport> ContentService for RemoteContentService<T> {
  fn generate_content<'a>(&'a self, request: &'a LessonRequest) -> BoxFuture<'a, Result<LessonContent>> {
    Box::pin(self.generate(request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::mock::MockTransport;
  use crate::net::Response;
  use std::sync::Arc;

  fn service(transport: Arc<MockTransport>) -> RemoteContentService<Arc<MockTransport>> {
    RemoteContentService::new(transport, Url::parse("http://localhost:5000").unwrap(), "/api/")
  }

  #[tokio::test]
  async fn test_unwraps_envelope() {
    let transport = Arc::new(MockTransport::new(|request| {
      assert_eq!(request.method, Method::POST);
      assert_eq!(request.url.path(), "/api/content/lesson");
      Ok(Response::new(200).with_body(
        r#"{"success":true,"data":{"title":"ਜੋੜ","difficulty":"beginner","estimatedTime":10,
            "nextSteps":["ਅਭਿਆਸ ਕਰੋ"]},"timestamp":"2024-01-01T00:00:00Z"}"#,
      ))
    }));

    let content = service(transport)
      .generate_content(&LessonRequest::new("addition", "beginner"))
      .await
      .unwrap();
    assert_eq!(content.title, "ਜੋੜ");
    assert_eq!(content.estimated_time, 10);
    assert_eq!(content.next_steps, vec!["ਅਭਿਆਸ ਕਰੋ".to_string()]);
  }

  #[tokio::test]
  async fn test_error_status_is_upstream_error() {
    let transport = Arc::new(MockTransport::new(|_| {
      Ok(Response::new(400).with_body(r#"{"error":"No topic provided"}"#))
    }));

    let err = service(transport)
      .generate_content(&LessonRequest::new("", "beginner"))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::UpstreamService(_)));
  }

  #[tokio::test]
  async fn test_network_failure_is_transient() {
    let err = service(Arc::new(MockTransport::offline()))
      .generate_content(&LessonRequest::new("addition", "beginner"))
      .await
      .unwrap_err();
    assert!(err.is_transient());
  }
}
