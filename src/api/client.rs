//! Resilient HTTP client for the judge API.

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::throttle::Throttle;
use super::types::{ApiEnvelope, Contest, Problemset, Submission, User};
use crate::config::ApiConfig;
use crate::error::{Result, SyncError};
use crate::health::ApiProbe;

/// Retry budget and backoff for a single logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts allowed after the first one
  pub max_retries: u32,
  pub base_delay: Duration,
}

impl RetryPolicy {
  /// Delay before retry number `attempt + 1`: `base_delay * 2^attempt`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    self
      .base_delay
      .saturating_mul(2u32.saturating_pow(attempt))
  }
}

/// Judge API client.
///
/// Every attempt goes through one process-wide throttle shared by all clones,
/// gets its own timeout, and transient failures (timeouts, transport errors,
/// 5xx) are retried with exponential backoff. 4xx responses and non-"OK"
/// envelopes fail immediately.
#[derive(Clone)]
pub struct ApiClient {
  http: Client,
  base_url: Url,
  timeout: Duration,
  retry: RetryPolicy,
  throttle: Arc<Throttle>,
  probe_handle: String,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> color_eyre::Result<Self> {
    let http = Client::builder()
      .user_agent(concat!("cpsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let mut base_url = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;
    // Url::join replaces the last segment unless the path ends with '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      http,
      base_url,
      timeout: config.timeout(),
      retry: RetryPolicy {
        max_retries: config.max_retries,
        base_delay: config.base_delay(),
      },
      throttle: Arc::new(Throttle::new(config.min_interval())),
      probe_handle: config.probe_handle.clone(),
    })
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Build the URL for an API method such as `user.info`.
  pub fn endpoint(&self, method: &str, params: &[(&str, String)]) -> Result<Url> {
    let mut url = self
      .base_url
      .join(method)
      .map_err(|e| SyncError::Network(format!("invalid endpoint {}: {}", method, e)))?;
    if !params.is_empty() {
      let mut query = url.query_pairs_mut();
      for (name, value) in params {
        query.append_pair(name, value);
      }
    }
    Ok(url)
  }

  /// Call an API method and unwrap its envelope.
  pub async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> Result<T> {
    let url = self.endpoint(method, params)?;
    let body = self.fetch(&url).await?;
    let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)?;
    envelope.into_result()
  }

  /// GET with the configured retry budget.
  pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
    self.fetch_with_retries(url, self.retry.max_retries).await
  }

  /// GET with an explicit retry budget.
  pub async fn fetch_with_retries(&self, url: &Url, max_retries: u32) -> Result<Vec<u8>> {
    let mut attempt = 0u32;

    loop {
      match self.attempt(url).await {
        Ok(body) => return Ok(body),
        Err(err) => {
          if !err.is_retryable() || attempt >= max_retries {
            if err.is_retryable() {
              warn!(
                url = %url,
                attempts = attempt + 1,
                error = %err,
                "Max retries exhausted"
              );
            }
            return Err(err);
          }

          let backoff = self.retry.backoff(attempt);
          debug!(
            url = %url,
            attempt = attempt + 1,
            max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
          );
          tokio::time::sleep(backoff).await;
          attempt += 1;
        }
      }
    }
  }

  async fn attempt(&self, url: &Url) -> Result<Vec<u8>> {
    self.throttle.acquire().await;

    let request = async {
      let response = self.http.get(url.clone()).send().await?;
      let status = response.status();
      if !status.is_success() {
        if status.is_client_error() {
          // The judge explains 4xx in the envelope comment
          let comment = response
            .json::<ApiEnvelope<serde_json::Value>>()
            .await
            .ok()
            .and_then(|envelope| envelope.comment);
          warn!(url = %url, status = status.as_u16(), comment = ?comment, "Client error");
        }
        return Err(SyncError::from_status(status.as_u16()));
      }
      Ok::<_, SyncError>(response.bytes().await?.to_vec())
    };

    tokio::time::timeout(self.timeout, request)
      .await
      .map_err(|_| SyncError::Timeout)?
  }

  /// `user.info` for one or more handles.
  pub async fn user_info(&self, handles: &[String]) -> Result<Vec<User>> {
    self
      .call("user.info", &[("handles", handles.join(";"))])
      .await
  }

  /// Most recent `count` submissions of a handle.
  pub async fn user_status(&self, handle: &str, count: u32) -> Result<Vec<Submission>> {
    self
      .call(
        "user.status",
        &[
          ("handle", handle.to_string()),
          ("from", "1".to_string()),
          ("count", count.to_string()),
        ],
      )
      .await
  }

  pub async fn contest_list(&self, include_gym: bool) -> Result<Vec<Contest>> {
    self
      .call("contest.list", &[("gym", include_gym.to_string())])
      .await
  }

  pub async fn problemset_problems(&self, tags: &[String]) -> Result<Problemset> {
    let params = if tags.is_empty() {
      Vec::new()
    } else {
      vec![("tags", tags.join(";"))]
    };
    self.call("problemset.problems", &params).await
  }
}

#[async_trait]
impl ApiProbe for ApiClient {
  /// One lightweight lookup, no retries.
  async fn probe(&self) -> Result<()> {
    let url = self.endpoint("user.info", &[("handles", self.probe_handle.clone())])?;
    let body = self.fetch_with_retries(&url, 0).await?;
    let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_slice(&body)?;
    envelope.into_result().map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server: &MockServer, max_retries: u32) -> ApiClient {
    let config = ApiConfig {
      base_url: format!("{}/api", server.uri()),
      timeout_secs: 5,
      max_retries,
      base_delay_ms: 1,
      min_interval_ms: 0,
      probe_handle: "tourist".to_string(),
    };
    ApiClient::new(&config).unwrap()
  }

  fn users_body() -> serde_json::Value {
    serde_json::json!({
      "status": "OK",
      "result": [{ "handle": "alice", "rating": 1500 }]
    })
  }

  async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
  }

  #[tokio::test]
  async fn test_success_returns_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/user.info"))
      .and(query_param("handles", "alice"))
      .respond_with(ResponseTemplate::new(200).set_body_json(users_body()))
      .mount(&server)
      .await;

    let users = client_for(&server, 3)
      .user_info(&["alice".to_string()])
      .await
      .unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].rating, Some(1500));
    assert_eq!(request_count(&server).await, 1);
  }

  #[tokio::test]
  async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let result = client_for(&server, 3)
      .user_info(&["alice".to_string()])
      .await;

    assert_eq!(result.unwrap_err(), SyncError::Client(404));
    assert_eq!(request_count(&server).await, 1);
  }

  #[tokio::test]
  async fn test_server_error_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(503))
      .up_to_n_times(2)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_json(users_body()))
      .mount(&server)
      .await;

    let users = client_for(&server, 3)
      .user_info(&["alice".to_string()])
      .await
      .unwrap();

    assert_eq!(users[0].handle, "alice");
    assert_eq!(request_count(&server).await, 3);
  }

  #[tokio::test]
  async fn test_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let result = client_for(&server, 2).contest_list(false).await;

    assert_eq!(result.unwrap_err(), SyncError::Server(500));
    // Initial attempt + max_retries
    assert_eq!(request_count(&server).await, 3);
  }

  #[tokio::test]
  async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(users_body())
          .set_delay(Duration::from_millis(500)),
      )
      .mount(&server)
      .await;

    let result = client_for(&server, 1)
      .with_timeout(Duration::from_millis(50))
      .user_info(&["alice".to_string()])
      .await;

    assert_eq!(result.unwrap_err(), SyncError::Timeout);
  }

  #[tokio::test]
  async fn test_failed_envelope_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": "FAILED",
        "comment": "Call limit exceeded"
      })))
      .mount(&server)
      .await;

    let result = client_for(&server, 3).contest_list(true).await;

    assert_eq!(
      result.unwrap_err(),
      SyncError::Api("Call limit exceeded".to_string())
    );
    assert_eq!(request_count(&server).await, 1);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_network_error() {
    let config = ApiConfig {
      base_url: "http://127.0.0.1:1/api".to_string(),
      max_retries: 0,
      min_interval_ms: 0,
      ..ApiConfig::default()
    };
    let result = ApiClient::new(&config).unwrap().contest_list(false).await;
    assert!(result.unwrap_err().is_retryable());
  }

  #[tokio::test]
  async fn test_probe_uses_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(502))
      .mount(&server)
      .await;

    let client = client_for(&server, 3);
    assert!(client.probe().await.is_err());
    assert_eq!(request_count(&server).await, 1);
  }

  #[test]
  fn test_backoff_doubles() {
    let policy = RetryPolicy {
      max_retries: 3,
      base_delay: Duration::from_millis(1000),
    };
    assert_eq!(policy.backoff(0), Duration::from_millis(1000));
    assert_eq!(policy.backoff(1), Duration::from_millis(2000));
    assert_eq!(policy.backoff(2), Duration::from_millis(4000));
  }

  #[test]
  fn test_endpoint_keeps_api_prefix() {
    let config = ApiConfig {
      base_url: "https://codeforces.com/api".to_string(),
      ..ApiConfig::default()
    };
    let client = ApiClient::new(&config).unwrap();
    let url = client
      .endpoint("user.status", &[("handle", "alice".to_string())])
      .unwrap();
    assert_eq!(url.as_str(), "https://codeforces.com/api/user.status?handle=alice");
  }
}
