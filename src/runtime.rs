//! Explicitly constructed application context.
//!
//! `Runtime::create` opens storage, probes connectivity and wires the
//! gateway, sync processor and tutor over one shared transport. Background
//! tasks only run after `start` and stop on `shutdown`.

use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::gateway::{open_response_cache, FetchGateway};
use crate::net::{HttpTransport, Transport};
use crate::offline::OfflineService;
use crate::reachability::{Monitor, Prober, Reachability};
use crate::services::{DictionaryAnalyzer, RemoteContentService};
use crate::store::open_store;
use crate::sync::SyncProcessor;
use crate::tutor::Tutor;

pub type SharedTransport = Arc<dyn Transport>;

pub struct Runtime {
  config: Config,
  offline: OfflineService,
  reachability: Reachability,
  prober: Prober<SharedTransport>,
  gateway: FetchGateway<SharedTransport>,
  processor: Arc<SyncProcessor<SharedTransport>>,
  tutor: Tutor<SharedTransport>,
  monitor: Option<Monitor>,
  probe_task: Option<JoinHandle<()>>,
}

impl Runtime {
  /// Build the context over HTTP.
  pub async fn create(config: Config) -> Result<Self> {
    let transport = HttpTransport::new(config.sync_policy().replay_timeout)?;
    Self::with_transport(config, Arc::new(transport)).await
  }

  pub async fn with_transport(config: Config, transport: SharedTransport) -> Result<Self> {
    let base_url = config.base_url()?;
    let api_prefix = config.server.api_prefix.clone();
    let data_dir = config.data_dir();
    let file = |name: &str| data_dir.as_ref().map(|dir: &PathBuf| dir.join(name));

    let store = open_store(file("offline.db").as_deref());
    let cache = open_response_cache(file("responses.db").as_deref());
    let offline = OfflineService::new(store.clone());

    let prober = Prober::new(transport.clone(), config.probe_url()?)
      .with_interval(config.probe_interval())
      .with_timeout(config.probe_timeout());
    let reachability = Reachability::new(prober.probe().await);

    let gateway = FetchGateway::new(transport.clone(), cache, &base_url)
      .with_cache_name(&config.cache.name)
      .with_retained_caches(&config.cache.keep)
      .with_api_prefix(&api_prefix);

    let processor = Arc::new(
      SyncProcessor::new(store, transport.clone(), base_url.clone())
        .with_policy(config.sync_policy())
        .with_api_prefix(&api_prefix),
    );

    let content = Arc::new(RemoteContentService::new(
      transport.clone(),
      base_url.clone(),
      &api_prefix,
    ));
    let tutor = Tutor::new(
      offline.clone(),
      content,
      Arc::new(DictionaryAnalyzer::new()),
      reachability.clone(),
      transport,
      base_url,
    )
    .with_api_prefix(&api_prefix)
    .with_timeout(config.sync_policy().replay_timeout);

    info!(
      online = reachability.is_online(),
      storage = offline.store().backend(),
      "runtime ready"
    );

    Ok(Self {
      config,
      offline,
      reachability,
      prober,
      gateway,
      processor,
      tutor,
      monitor: None,
      probe_task: None,
    })
  }

  /// Start periodic probing and sync-on-reconnect.
  pub fn start(&mut self) {
    if self.monitor.is_none() {
      self.monitor = Some(Monitor::spawn(&self.reachability, self.processor.clone()));
    }
    if self.probe_task.is_none() {
      self.probe_task = Some(self.prober.clone().spawn(self.reachability.clone()));
    }
  }

  pub fn shutdown(mut self) {
    if let Some(task) = self.probe_task.take() {
      task.abort();
    }
    if let Some(monitor) = self.monitor.take() {
      monitor.shutdown();
    }
    info!("runtime stopped");
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn offline(&self) -> &OfflineService {
    &self.offline
  }

  pub fn reachability(&self) -> &Reachability {
    &self.reachability
  }

  pub fn prober(&self) -> &Prober<SharedTransport> {
    &self.prober
  }

  pub fn gateway(&self) -> &FetchGateway<SharedTransport> {
    &self.gateway
  }

  pub fn processor(&self) -> &SyncProcessor<SharedTransport> {
    &self.processor
  }

  pub fn tutor(&self) -> &Tutor<SharedTransport> {
    &self.tutor
  }
}
