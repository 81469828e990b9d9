//! Cache-augmented fetch gateway.
//!
//! Every intercepted request resolves to exactly one response:
//! - API reads go network-first, then to the cache, then to the offline payload
//! - static assets go cache-first, then to the network, then to a typed stand-in
//! - page loads go network-first, then to the cached page or app shell
//! - anything else (including every non-GET request) is passed through untouched

mod cache;
mod policy;

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::net::{Method, Request, Response, Transport};

pub use cache::{
  open_response_cache, CacheKey, MemoryResponseCache, ResponseCache, SqliteResponseCache,
};
pub use policy::{offline_api_response, ResourceClass, OFFLINE_MESSAGE};

/// Cache of data saved for offline use. It is not versioned with the app
/// shell, so `activate` keeps it unless told otherwise.
pub const OFFLINE_CACHE_NAME: &str = "nabha-shiksha-ai-offline-v1";

/// Where a gateway response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Synthesized because neither network nor cache could answer.
  Fallback,
}

/// A response together with its source.
#[derive(Debug, Clone)]
pub struct Resolution {
  pub response: Response,
  pub source: ResponseSource,
  pub class: ResourceClass,
}

impl Resolution {
  fn new(response: Response, source: ResponseSource, class: ResourceClass) -> Self {
    Self {
      response,
      source,
      class,
    }
  }
}

/// Intercepts outbound requests and applies a per-resource caching policy.
pub struct FetchGateway<T: Transport> {
  transport: T,
  cache: Arc<dyn ResponseCache>,
  cache_name: String,
  /// Other caches `activate` leaves in place.
  retained: Vec<String>,
  api_prefix: String,
  shell_url: Url,
}

impl<T: Transport> FetchGateway<T> {
  /// Create a gateway for the app served from `base_url`.
  pub fn new(transport: T, cache: Arc<dyn ResponseCache>, base_url: &Url) -> Self {
    let mut shell_url = base_url.clone();
    shell_url.set_path("/");

    Self {
      transport,
      cache,
      cache_name: "nabha-shiksha-ai-v1".to_string(),
      retained: vec![OFFLINE_CACHE_NAME.to_string()],
      api_prefix: "/api/".to_string(),
      shell_url,
    }
  }

  /// Name of the current cache version. Entries of other versions are
  /// removed by `activate`.
  pub fn with_cache_name(mut self, name: &str) -> Self {
    self.cache_name = name.to_string();
    self
  }

  /// Replace the list of caches, besides the current one, that survive
  /// `activate`.
  pub fn with_retained_caches(mut self, names: &[String]) -> Self {
    self.retained = names.to_vec();
    self
  }

  pub fn with_api_prefix(mut self, prefix: &str) -> Self {
    self.api_prefix = prefix.to_string();
    self
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  /// Resolve a request to a response.
  ///
  /// Only passthrough requests can fail; every cached class always yields a
  /// response.
  pub async fn fetch(&self, request: Request) -> Result<Response> {
    self.resolve(request).await.map(|r| r.response)
  }

  /// Like `fetch`, but reports where the response came from.
  pub async fn resolve(&self, request: Request) -> Result<Resolution> {
    let class = ResourceClass::classify(&request, &self.api_prefix);
    debug!(method = %request.method, url = %request.url, ?class, "intercepted request");

    let resolution = match class {
      ResourceClass::Api => self.network_first_api(request).await,
      ResourceClass::Static => self.cache_first_static(request).await,
      ResourceClass::Navigation => self.network_first_navigation(request).await,
      ResourceClass::Passthrough => {
        let response = self.transport.send(request).await?;
        Resolution::new(response, ResponseSource::Network, class)
      }
    };

    Ok(resolution)
  }

  async fn network_first_api(&self, request: Request) -> Resolution {
    let class = ResourceClass::Api;
    let key = CacheKey::for_request(&request);
    let url = request.url.clone();

    match self.transport.send(request).await {
      Ok(response) if response.is_success() => {
        self.store(&key, &response);
        return Resolution::new(response, ResponseSource::Network, class);
      }
      Ok(response) => {
        debug!(%url, status = response.status, "API response not ok, trying cache");
      }
      Err(e) => {
        debug!(%url, error = %e, "API request failed, trying cache");
      }
    }

    match self.lookup(&key) {
      Some(cached) => Resolution::new(cached, ResponseSource::Cache, class),
      None => Resolution::new(offline_api_response(), ResponseSource::Fallback, class),
    }
  }

  async fn cache_first_static(&self, request: Request) -> Resolution {
    let class = ResourceClass::Static;
    let key = CacheKey::for_request(&request);

    if let Some(cached) = self.lookup(&key) {
      return Resolution::new(cached, ResponseSource::Cache, class);
    }

    let path = request.url.path().to_string();
    match self.transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&key, &response);
        }
        Resolution::new(response, ResponseSource::Network, class)
      }
      Err(e) => {
        debug!(%path, error = %e, "static asset request failed");
        Resolution::new(policy::static_fallback(&path), ResponseSource::Fallback, class)
      }
    }
  }

  async fn network_first_navigation(&self, request: Request) -> Resolution {
    let class = ResourceClass::Navigation;
    let key = CacheKey::for_request(&request);

    match self.transport.send(request).await {
      Ok(response) if response.is_success() => {
        return Resolution::new(response, ResponseSource::Network, class);
      }
      Ok(response) => debug!(status = response.status, "navigation response not ok, trying cache"),
      Err(e) => debug!(error = %e, "navigation request failed, trying cache"),
    }

    let shell = CacheKey::new(&Method::GET, self.shell_url.as_str());
    match self.lookup(&key).or_else(|| self.lookup(&shell)) {
      Some(cached) => Resolution::new(cached, ResponseSource::Cache, class),
      None => Resolution::new(policy::navigation_fallback(), ResponseSource::Fallback, class),
    }
  }

  /// Fetch and cache a list of URLs (or paths relative to the app).
  /// Returns how many were cached; failures are logged and skipped.
  pub async fn precache(&self, urls: &[String]) -> usize {
    let mut cached = 0;

    for raw in urls {
      let url = match self.shell_url.join(raw) {
        Ok(url) => url,
        Err(e) => {
          warn!(url = %raw, error = %e, "skipping invalid precache URL");
          continue;
        }
      };

      let key = CacheKey::new(&Method::GET, url.as_str());
      match self.transport.send(Request::get(url.clone())).await {
        Ok(response) if response.is_success() => {
          self.store(&key, &response);
          cached += 1;
        }
        Ok(response) => warn!(%url, status = response.status, "precache response not ok"),
        Err(e) => warn!(%url, error = %e, "precache request failed"),
      }
    }

    cached
  }

  /// Populate the current cache with the static app files.
  pub async fn install(&self, static_urls: &[String]) -> usize {
    let cached = self.precache(static_urls).await;
    info!(cache = %self.cache_name, cached, total = static_urls.len(), "static assets cached");
    cached
  }

  /// Remove caches from previous versions, returning their names. The
  /// current cache and the retained ones are kept.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();

    for name in self.cache.cache_names()? {
      if name != self.cache_name && !self.retained.contains(&name) {
        let entries = self.cache.delete_cache(&name)?;
        info!(cache = %name, entries, "deleted old cache");
        removed.push(name);
      }
    }

    Ok(removed)
  }

  fn lookup(&self, key: &CacheKey) -> Option<Response> {
    match self.cache.get(&self.cache_name, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(request = key.description(), error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store(&self, key: &CacheKey, response: &Response) {
    if let Err(e) = self.cache.put(&self.cache_name, key, response) {
      warn!(request = key.description(), error = %e, "failed to cache response");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::net::mock::MockTransport;
  use std::sync::atomic::{AtomicBool, Ordering};

  fn base() -> Url {
    Url::parse("http://localhost:5000").unwrap()
  }

  fn url(path: &str) -> Url {
    base().join(path).unwrap()
  }

  fn gateway(transport: Arc<MockTransport>) -> FetchGateway<Arc<MockTransport>> {
    FetchGateway::new(transport, Arc::new(MemoryResponseCache::new()), &base())
  }

  #[tokio::test]
  async fn test_cached_static_asset_skips_network() {
    let transport = Arc::new(MockTransport::new(|_| {
      Ok(Response::new(200)
        .with_header("Content-Type", "application/javascript")
        .with_body(vec![0x63, 0x6f, 0x6e, 0x73, 0x74, 0x00, 0xff]))
    }));
    let gateway = gateway(transport.clone());

    let first = gateway.resolve(Request::get(url("/static/js/bundle.js"))).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    assert_eq!(transport.call_count(), 1);

    let second = gateway.resolve(Request::get(url("/static/js/bundle.js"))).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response, first.response);
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_returns_503_payload() {
    let gateway = gateway(Arc::new(MockTransport::offline()));

    let resolution = gateway.resolve(Request::get(url("/api/content/topics"))).await.unwrap();
    assert_eq!(resolution.source, ResponseSource::Fallback);
    assert_eq!(resolution.response.status, 503);
    assert_eq!(resolution.response.header("Content-Type"), Some("application/json"));
    assert_eq!(
      resolution.response.text(),
      r#"{"error":"Offline","message":"You are offline. Some features may not be available.","offline":true}"#
    );
  }

  #[tokio::test]
  async fn test_api_falls_back_to_last_good_response() {
    let online = Arc::new(AtomicBool::new(true));
    let flag = online.clone();
    let transport = Arc::new(MockTransport::new(move |_| {
      if flag.load(Ordering::SeqCst) {
        Ok(Response::new(200).with_body(r#"{"data":[1]}"#))
      } else {
        Err(Error::NetworkUnreachable("down".into()))
      }
    }));
    let gateway = gateway(transport);

    gateway.fetch(Request::get(url("/api/content/levels"))).await.unwrap();
    online.store(false, Ordering::SeqCst);

    let resolution = gateway.resolve(Request::get(url("/api/content/levels"))).await.unwrap();
    assert_eq!(resolution.source, ResponseSource::Cache);
    assert_eq!(resolution.response.text(), r#"{"data":[1]}"#);
  }

  #[tokio::test]
  async fn test_api_error_status_is_not_cached() {
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(500))));
    let gateway = gateway(transport);

    let resolution = gateway.resolve(Request::get(url("/api/ai/status"))).await.unwrap();
    assert_eq!(resolution.source, ResponseSource::Fallback);
    assert_eq!(resolution.response.status, 503);
  }

  #[tokio::test]
  async fn test_static_fallback_when_offline() {
    let gateway = gateway(Arc::new(MockTransport::offline()));

    let css = gateway.fetch(Request::get(url("/static/css/main.css"))).await.unwrap();
    assert_eq!(css.status, 200);
    assert_eq!(css.header("Content-Type"), Some("text/css"));

    let root = gateway.fetch(Request::get(url("/"))).await.unwrap();
    assert_eq!(root.status, 404);
  }

  #[tokio::test]
  async fn test_navigation_uses_cached_shell() {
    let online = Arc::new(AtomicBool::new(true));
    let flag = online.clone();
    let transport = Arc::new(MockTransport::new(move |_| {
      if flag.load(Ordering::SeqCst) {
        Ok(Response::new(200).with_body("<html>shell</html>"))
      } else {
        Err(Error::NetworkUnreachable("down".into()))
      }
    }));
    let gateway = gateway(transport);

    assert_eq!(gateway.install(&["/".to_string()]).await, 1);
    online.store(false, Ordering::SeqCst);

    let page = gateway.resolve(Request::navigate(url("/tutor"))).await.unwrap();
    assert_eq!(page.source, ResponseSource::Cache);
    assert_eq!(page.response.text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_navigation_without_shell_is_404() {
    let gateway = gateway(Arc::new(MockTransport::offline()));
    let page = gateway.fetch(Request::navigate(url("/tutor"))).await.unwrap();
    assert_eq!(page.status, 404);
    assert_eq!(page.text(), "App not available offline");
  }

  #[tokio::test]
  async fn test_non_get_passes_through_uncached() {
    let transport = Arc::new(MockTransport::new(|_| Ok(Response::new(201))));
    let gateway = gateway(transport.clone());

    let post = Request::new(Method::POST, url("/api/user/register"));
    assert_eq!(gateway.fetch(post.clone()).await.unwrap().status, 201);
    assert_eq!(gateway.fetch(post).await.unwrap().status, 201);
    assert_eq!(transport.call_count(), 2);

    let offline = gateway_offline_post().await;
    assert!(matches!(offline, Err(Error::NetworkUnreachable(_))));
  }

  async fn gateway_offline_post() -> Result<Response> {
    let gateway = gateway(Arc::new(MockTransport::offline()));
    gateway
      .fetch(Request::new(Method::POST, url("/api/user/register")))
      .await
  }

  #[tokio::test]
  async fn test_activate_removes_old_versions() {
    let cache: Arc<dyn ResponseCache> = Arc::new(MemoryResponseCache::new());
    let key = CacheKey::new(&Method::GET, "http://localhost:5000/");
    cache.put("nabha-shiksha-ai-v0", &key, &Response::new(200)).unwrap();
    cache.put("nabha-shiksha-ai-v1", &key, &Response::new(200)).unwrap();

    let gateway = FetchGateway::new(Arc::new(MockTransport::offline()), cache.clone(), &base());
    let removed = gateway.activate().unwrap();

    assert_eq!(removed, vec!["nabha-shiksha-ai-v0".to_string()]);
    assert_eq!(cache.cache_names().unwrap(), vec!["nabha-shiksha-ai-v1".to_string()]);
  }

  #[tokio::test]
  async fn test_activate_keeps_offline_cache() {
    let cache: Arc<dyn ResponseCache> = Arc::new(MemoryResponseCache::new());
    let key = CacheKey::new(&Method::GET, "http://localhost:5000/");
    for name in ["nabha-shiksha-ai-v0", "nabha-shiksha-ai-v1", "nabha-shiksha-ai-offline-v1"] {
      cache.put(name, &key, &Response::new(200)).unwrap();
    }

    let gateway = FetchGateway::new(Arc::new(MockTransport::offline()), cache.clone(), &base());
    assert_eq!(gateway.activate().unwrap(), vec!["nabha-shiksha-ai-v0".to_string()]);
    let mut left = cache.cache_names().unwrap();
    left.sort();
    assert_eq!(left, vec!["nabha-shiksha-ai-offline-v1", "nabha-shiksha-ai-v1"]);

    let gateway = gateway.with_retained_caches(&[]);
    assert_eq!(
      gateway.activate().unwrap(),
      vec!["nabha-shiksha-ai-offline-v1".to_string()]
    );
  }
}
