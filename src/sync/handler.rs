//! Job execution: the seam between the queue and the outside world.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::job::JobKind;
use crate::api::ApiClient;
use crate::cache::{keys, Cacheable, TtlCache};
use crate::error::Result;
use crate::persist::{PersistenceAdapter, Record};

/// Executes one job. Called only from the drain loop, one job at a time.
#[async_trait]
pub trait JobHandler: Send + Sync {
  async fn handle(&self, job: &JobKind) -> Result<()>;
}

/// Default handler: fetch from the judge API, upsert into the durable store,
/// then refresh the cache.
///
/// Durable writes happen before cache writes, so a store failure leaves the
/// cache untouched and the job retryable.
pub struct ApiJobHandler {
  api: ApiClient,
  cache: TtlCache,
  store: Arc<dyn PersistenceAdapter>,
  ttl: Duration,
  tracked_handles: Vec<String>,
}

impl ApiJobHandler {
  pub fn new(
    api: ApiClient,
    cache: TtlCache,
    store: Arc<dyn PersistenceAdapter>,
    ttl: Duration,
  ) -> Self {
    Self {
      api,
      cache,
      store,
      ttl,
      tracked_handles: Vec::new(),
    }
  }

  pub fn with_tracked_handles(mut self, handles: Vec<String>) -> Self {
    self.tracked_handles = handles;
    self
  }

  async fn persist<T: Cacheable>(&self, entities: &[T]) -> Result<()> {
    let now = Utc::now();
    let records = entities
      .iter()
      .map(|entity| Record::from_entity(entity, now))
      .collect::<Result<Vec<_>>>()?;
    self.store.apply(&records).await
  }

  async fn sync_users(&self, handles: &[String]) -> Result<()> {
    let users = self.api.user_info(handles).await?;
    self.persist(&users).await?;

    for user in &users {
      self.cache.invalidate_pattern(&keys::user_pattern(&user.handle));
      self.cache.set(&keys::user_info(&user.handle), user, self.ttl);
    }
    // Ratings feed every leaderboard page
    self.cache.invalidate_pattern(keys::LEADERBOARD_PATTERN);
    debug!(users = users.len(), "Synced user profiles");
    Ok(())
  }
}

#[async_trait]
impl JobHandler for ApiJobHandler {
  async fn handle(&self, job: &JobKind) -> Result<()> {
    match job {
      JobKind::UserSync { handle } => self.sync_users(std::slice::from_ref(handle)).await,
      JobKind::SubmissionSync { handle, count } => {
        let submissions = self.api.user_status(handle, *count).await?;
        self.persist(&submissions).await?;
        self
          .cache
          .set(&keys::user_submissions(handle), &submissions, self.ttl);
        self.cache.invalidate_pattern(keys::LEADERBOARD_PATTERN);
        Ok(())
      }
      JobKind::ContestSync { include_gym } => {
        let contests = self.api.contest_list(*include_gym).await?;
        self.persist(&contests).await?;
        self
          .cache
          .set(&keys::contests(*include_gym), &contests, self.ttl);
        Ok(())
      }
      JobKind::ProblemsetSync { tags } => {
        let problemset = self.api.problemset_problems(tags).await?;
        self.persist(&problemset.problems).await?;
        self.cache.set(&keys::problemset(tags), &problemset, self.ttl);
        Ok(())
      }
      JobKind::RefreshTracked => {
        if self.tracked_handles.is_empty() {
          return Ok(());
        }
        self.sync_users(&self.tracked_handles).await
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::User;
  use crate::cache::MemoryStorage;
  use crate::config::ApiConfig;
  use crate::error::SyncError;
  use crate::persist::MemoryPersistence;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  /// Store that refuses every write.
  struct ReadOnlyStore;

  #[async_trait]
  impl PersistenceAdapter for ReadOnlyStore {
    async fn apply(&self, _records: &[Record]) -> Result<()> {
      Err(SyncError::Store("database is locked".into()))
    }
    async fn get(&self, _kind: &str, _key: &str) -> Result<Option<Record>> {
      Ok(None)
    }
    async fn load_queue(&self) -> Result<Vec<crate::sync::SyncJob>> {
      Ok(Vec::new())
    }
    async fn save_queue(&self, _jobs: &[crate::sync::SyncJob]) -> Result<()> {
      Ok(())
    }
    async fn ping(&self) -> Result<()> {
      Ok(())
    }
  }

  fn api_for(server: &MockServer) -> ApiClient {
    ApiClient::new(&ApiConfig {
      base_url: format!("{}/api", server.uri()),
      max_retries: 0,
      min_interval_ms: 0,
      ..ApiConfig::default()
    })
    .unwrap()
  }

  async fn mount_users(server: &MockServer) {
    Mock::given(method("GET"))
      .and(path("/api/user.info"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": "OK",
        "result": [
          { "handle": "Alice", "rating": 1900 },
          { "handle": "bob", "rating": 1400 }
        ]
      })))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn test_user_sync_writes_store_and_cache() {
    let server = MockServer::start().await;
    mount_users(&server).await;

    let cache = TtlCache::new(Arc::new(MemoryStorage::new()));
    let store = Arc::new(MemoryPersistence::new());
    cache.set(&keys::leaderboard("iit"), &vec!["stale"], Duration::from_secs(60));

    let handler = ApiJobHandler::new(
      api_for(&server),
      cache.clone(),
      store.clone(),
      Duration::from_secs(60),
    );
    handler.handle(&JobKind::user("alice")).await.unwrap();

    let record = store.get("user", "alice").await.unwrap().unwrap();
    assert_eq!(record.decode::<User>().unwrap().rating, Some(1900));
    let cached: User = cache.get(&keys::user_info("alice")).unwrap();
    assert_eq!(cached.handle, "Alice");
    assert!(cache.get::<Vec<String>>(&keys::leaderboard("iit")).is_none());
  }

  #[tokio::test]
  async fn test_refresh_tracked_batches_handles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user.info"))
      .and(query_param("handles", "alice;bob"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": "OK",
        "result": [{ "handle": "alice" }, { "handle": "bob" }]
      })))
      .mount(&server)
      .await;

    let store = Arc::new(MemoryPersistence::new());
    let handler = ApiJobHandler::new(
      api_for(&server),
      TtlCache::new(Arc::new(MemoryStorage::new())),
      store.clone(),
      Duration::from_secs(60),
    )
    .with_tracked_handles(vec!["alice".to_string(), "bob".to_string()]);

    handler.handle(&JobKind::RefreshTracked).await.unwrap();

    assert_eq!(store.record_count(), 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_refresh_without_tracked_handles_is_noop() {
    let server = MockServer::start().await;
    let handler = ApiJobHandler::new(
      api_for(&server),
      TtlCache::new(Arc::new(MemoryStorage::new())),
      Arc::new(MemoryPersistence::new()),
      Duration::from_secs(60),
    );

    handler.handle(&JobKind::RefreshTracked).await.unwrap();
    assert!(server.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_store_failure_is_retryable_and_skips_cache() {
    let server = MockServer::start().await;
    mount_users(&server).await;
    let cache = TtlCache::new(Arc::new(MemoryStorage::new()));

    let handler = ApiJobHandler::new(
      api_for(&server),
      cache.clone(),
      Arc::new(ReadOnlyStore),
      Duration::from_secs(60),
    );
    let err = handler.handle(&JobKind::user("alice")).await.unwrap_err();

    assert!(err.is_retryable());
    assert!(cache.get::<User>(&keys::user_info("alice")).is_none());
  }

  #[tokio::test]
  async fn test_contest_sync() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/contest.list"))
      .and(query_param("gym", "false"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": "OK",
        "result": [{ "id": 1999, "name": "Round 963", "phase": "FINISHED" }]
      })))
      .mount(&server)
      .await;

    let cache = TtlCache::new(Arc::new(MemoryStorage::new()));
    let store = Arc::new(MemoryPersistence::new());
    let handler = ApiJobHandler::new(
      api_for(&server),
      cache.clone(),
      store.clone(),
      Duration::from_secs(60),
    );

    handler
      .handle(&JobKind::ContestSync { include_gym: false })
      .await
      .unwrap();

    assert!(store.get("contest", "1999").await.unwrap().is_some());
    assert!(cache
      .get::<serde_json::Value>(&keys::contests(false))
      .is_some());
  }
}
