//! Public facade: one explicitly constructed engine per process.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::ApiClient;
use crate::cache::{
  CacheBackend, CacheLayer, MemoryStorage, NoopStorage, QueryOptions, SqliteStorage, TtlCache,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheBackendKind, CacheConfig, Config};
use crate::health::{ApiProbe, HealthMonitor, HealthReport};
use crate::persist::{self, PersistenceAdapter};
use crate::sync::{
  ApiJobHandler, JobHandler, JobKind, Priority, Scheduler, SchedulerSettings, Subscription,
  SyncEngine, SyncSettings, SyncStatus,
};

/// Open the cache backend named in the configuration.
pub fn cache_backend(config: &CacheConfig) -> color_eyre::Result<Arc<dyn CacheBackend>> {
  let backend: Arc<dyn CacheBackend> = match config.backend {
    CacheBackendKind::Memory => Arc::new(MemoryStorage::new()),
    CacheBackendKind::None => Arc::new(NoopStorage),
    CacheBackendKind::Sqlite => {
      let path = match &config.path {
        Some(path) => path.clone(),
        None => SqliteStorage::default_path()?,
      };
      Arc::new(SqliteStorage::open(&path)?)
    }
  };
  Ok(backend)
}

/// Assembles an [`Engine`], with overridable collaborators for tests and
/// embedders. Anything not overridden is built from the [`Config`].
pub struct EngineBuilder {
  config: Config,
  clock: Option<Arc<dyn Clock>>,
  cache_backend: Option<Arc<dyn CacheBackend>>,
  store: Option<Arc<dyn PersistenceAdapter>>,
  handler: Option<Arc<dyn JobHandler>>,
  probe: Option<Arc<dyn ApiProbe>>,
}

impl EngineBuilder {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      clock: None,
      cache_backend: None,
      store: None,
      handler: None,
      probe: None,
    }
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
    self.cache_backend = Some(backend);
    self
  }

  pub fn store(mut self, store: Arc<dyn PersistenceAdapter>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
    self.handler = Some(handler);
    self
  }

  pub fn probe(mut self, probe: Arc<dyn ApiProbe>) -> Self {
    self.probe = Some(probe);
    self
  }

  pub async fn build(self) -> color_eyre::Result<Engine> {
    let config = self.config;
    let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

    let backend = match self.cache_backend {
      Some(backend) => backend,
      None => cache_backend(&config.cache)?,
    };
    let cache = TtlCache::with_clock(backend, clock.clone());

    let store = match self.store {
      Some(store) => store,
      None => persist::open(&config.persistence)?,
    };

    let api = ApiClient::new(&config.api)?;
    let handler = self.handler.unwrap_or_else(|| {
      Arc::new(
        ApiJobHandler::new(
          api.clone(),
          cache.clone(),
          store.clone(),
          config.cache.default_ttl(),
        )
        .with_tracked_handles(config.sync.tracked_handles.clone()),
      )
    });
    let probe = self.probe.unwrap_or_else(|| Arc::new(api));

    let sync = SyncEngine::open(
      handler,
      store.clone(),
      clock.clone(),
      SyncSettings::from(&config.sync),
    )
    .await;
    let scheduler = Scheduler::new(
      sync.clone(),
      cache.clone(),
      SchedulerSettings::from(&config.sync),
    );
    let health = HealthMonitor::new(
      cache.clone(),
      store.clone(),
      probe,
      sync.clone(),
      clock,
      &config.health,
    );

    Ok(Engine {
      layer: CacheLayer::new(cache.clone()),
      cache,
      store,
      sync,
      scheduler,
      health,
      config,
    })
  }
}

/// The caching and sync engine.
///
/// Reads go through the TTL cache; writes to the judge mirror happen only on
/// the sync queue's drain loop.
pub struct Engine {
  config: Config,
  cache: TtlCache,
  layer: CacheLayer,
  store: Arc<dyn PersistenceAdapter>,
  sync: SyncEngine,
  scheduler: Scheduler,
  health: HealthMonitor,
}

impl Engine {
  pub async fn from_config(config: Config) -> color_eyre::Result<Self> {
    EngineBuilder::new(config).build().await
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &TtlCache {
    &self.cache
  }

  pub fn cache_layer(&self) -> &CacheLayer {
    &self.layer
  }

  pub fn store(&self) -> &Arc<dyn PersistenceAdapter> {
    &self.store
  }

  pub fn sync(&self) -> &SyncEngine {
    &self.sync
  }

  pub fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.cache.get(key)
  }

  pub fn set_cached<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
    self.cache.set(key, value, ttl);
  }

  /// Drop every cached entry matching a glob pattern. Returns how many went.
  pub fn invalidate(&self, pattern: &str) -> u64 {
    self.cache.invalidate_pattern(pattern)
  }

  /// Cache-aside lookup, see [`CacheLayer::query`].
  pub async fn query<T, E, F, Fut>(&self, options: &QueryOptions, compute: F) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.layer.query(options, compute).await
  }

  pub async fn enqueue_sync(&self, kind: JobKind, priority: Priority) -> String {
    self.sync.enqueue(kind, priority).await
  }

  pub async fn start_background_sync(&self, handle: &str) -> bool {
    self.scheduler.start_background_sync(handle).await
  }

  pub fn stop_background_sync(&self, handle: &str) -> bool {
    self.scheduler.stop_background_sync(handle)
  }

  pub fn active_background_syncs(&self) -> Vec<String> {
    self.scheduler.active_entities()
  }

  /// Register a status listener. Call [`Subscription::unsubscribe`] to remove it.
  pub fn on_status_change<F>(&self, listener: F) -> Subscription
  where
    F: Fn(&SyncStatus) + Send + Sync + 'static,
  {
    self.sync.subscribe(listener)
  }

  pub fn status(&self) -> SyncStatus {
    self.sync.status()
  }

  pub fn set_online(&self, online: bool) {
    self.sync.set_online(online);
  }

  pub async fn get_health(&self) -> HealthReport {
    self.health.check().await
  }

  /// Start the periodic refresh and pick up any rehydrated jobs.
  pub fn start(&self) {
    self.scheduler.start();
    if self.config.sync.auto_drain {
      let sync = self.sync.clone();
      tokio::spawn(async move { sync.drain().await });
    }
    info!(
      pending = self.sync.queue_len(),
      tracked = self.config.sync.tracked_handles.len(),
      "Engine started"
    );
  }

  /// Stop all timers. Pending jobs stay in the persisted snapshot.
  pub fn shutdown(&self) {
    self.scheduler.stop();
    self.sync.shutdown();
    info!(pending = self.sync.queue_len(), "Engine stopped");
  }
}
