//! Resource classification and synthetic fallback responses.

use crate::net::{Method, Request, RequestMode, Response};

/// Message of the offline API payload. Clients match on this text.
pub const OFFLINE_MESSAGE: &str = "You are offline. Some features may not be available.";

/// Which caching policy applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Backend API read: network first, cache fallback, offline payload.
  Api,
  /// Bundled script, style or root document: cache first.
  Static,
  /// Top-level page load: network first, cached app shell fallback.
  Navigation,
  /// Not cached at all.
  Passthrough,
}

impl ResourceClass {
  pub fn classify(request: &Request, api_prefix: &str) -> Self {
    if request.method != Method::GET {
      return ResourceClass::Passthrough;
    }

    let path = request.url.path();
    if path.starts_with(api_prefix) {
      return ResourceClass::Api;
    }
    if path.starts_with("/static/") || path == "/" || path.ends_with(".js") || path.ends_with(".css")
    {
      return ResourceClass::Static;
    }
    if request.mode == RequestMode::Navigate {
      return ResourceClass::Navigation;
    }
    ResourceClass::Passthrough
  }
}

/// 503 JSON payload returned for API reads when neither network nor cache answers.
pub fn offline_api_response() -> Response {
  let body = serde_json::json!({
    "error": "Offline",
    "message": OFFLINE_MESSAGE,
    "offline": true,
  });

  Response::new(503)
    .with_header("Content-Type", "application/json")
    .with_body(body.to_string())
}

/// Typed stand-in for a static asset that is neither cached nor reachable.
pub fn static_fallback(path: &str) -> Response {
  if path.ends_with(".js") {
    return Response::new(200)
      .with_header("Content-Type", "application/javascript")
      .with_body(r#"console.log("Script not available offline");"#);
  }
  if path.ends_with(".css") {
    return Response::new(200)
      .with_header("Content-Type", "text/css")
      .with_body("/* Styles not available offline */");
  }
  Response::new(404)
    .with_header("Content-Type", "text/plain")
    .with_body("Resource not available offline")
}

pub fn navigation_fallback() -> Response {
  Response::new(404)
    .with_header("Content-Type", "text/plain")
    .with_body("App not available offline")
}
