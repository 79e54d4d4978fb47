//! Cache-aside helpers: single lookups and concurrent batches.

use futures::future::{join_all, try_join_all, BoxFuture};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::ops::Index;
use std::time::Duration;

use super::store::TtlCache;
use super::traits::CacheResult;

/// How a single cache-aside lookup should be cached.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// Without a key the compute function always runs and nothing is stored
  pub cache_key: Option<String>,
  pub ttl: Duration,
}

impl QueryOptions {
  pub fn keyed(cache_key: impl Into<String>, ttl: Duration) -> Self {
    Self {
      cache_key: Some(cache_key.into()),
      ttl,
    }
  }

  pub fn uncached() -> Self {
    Self {
      cache_key: None,
      ttl: Duration::ZERO,
    }
  }
}

/// Cache layer that sits between callers and their compute functions.
///
/// 1. Check cache - if present, return without computing
/// 2. On miss, compute
/// 3. Store successful results; failures propagate and are never cached
#[derive(Clone)]
pub struct CacheLayer {
  cache: TtlCache,
}

impl CacheLayer {
  pub fn new(cache: TtlCache) -> Self {
    Self { cache }
  }

  /// Check the cache, else compute and store. Returns just the value.
  pub async fn query<T, E, F, Fut>(&self, options: &QueryOptions, compute: F) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    Ok(self.fetch(options, compute).await?.data)
  }

  /// Same as [`query`](Self::query) but reports whether the value was cached.
  pub async fn fetch<T, E, F, Fut>(
    &self,
    options: &QueryOptions,
    compute: F,
  ) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let key = match &options.cache_key {
      Some(key) => key,
      None => return Ok(CacheResult::uncached(compute().await?)),
    };

    if let Some(cached) = self.cache.get::<T>(key) {
      return Ok(CacheResult::from_cache(cached));
    }

    let data = compute().await?;
    self.cache.set(key, &data, options.ttl);
    Ok(CacheResult::computed(data))
  }
}

/// Independent lookups run concurrently, results kept in submission order.
///
/// ```ignore
/// let counts = BatchQuery::new()
///   .add(async { store.count("user").await })
///   .add(async { store.count("contest").await })
///   .run()
///   .await;
/// let users = &counts[0];
/// ```
pub struct BatchQuery<'a, T, E> {
  tasks: Vec<BoxFuture<'a, Result<T, E>>>,
}

impl<'a, T, E> Default for BatchQuery<'a, T, E> {
  fn default() -> Self {
    Self { tasks: Vec::new() }
  }
}

impl<'a, T, E> BatchQuery<'a, T, E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add<Fut>(mut self, task: Fut) -> Self
  where
    Fut: Future<Output = Result<T, E>> + Send + 'a,
  {
    self.tasks.push(Box::pin(task));
    self
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }

  /// Run every task to completion. One failure does not cancel the others.
  pub async fn run(self) -> BatchResults<T, E> {
    BatchResults(join_all(self.tasks).await)
  }

  /// Run every task, short-circuiting on the first error.
  pub async fn try_run(self) -> Result<Vec<T>, E> {
    try_join_all(self.tasks).await
  }
}

/// Batch outcomes, indexable by the position the task was added at.
#[derive(Debug)]
pub struct BatchResults<T, E>(Vec<Result<T, E>>);

impl<T, E> BatchResults<T, E> {
  pub fn get(&self, index: usize) -> Option<&Result<T, E>> {
    self.0.get(index)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn into_vec(self) -> Vec<Result<T, E>> {
    self.0
  }
}

impl<T, E> Index<usize> for BatchResults<T, E> {
  type Output = Result<T, E>;

  fn index(&self, index: usize) -> &Self::Output {
    &self.0[index]
  }
}
