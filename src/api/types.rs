//! Wire types for the judge API.
//!
//! Every response is wrapped as `{ "status": "OK" | "FAILED", "result": ..., "comment": ... }`.

use serde::{Deserialize, Serialize};

use crate::cache::Cacheable;
use crate::error::SyncError;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
  pub status: String,
  pub result: Option<T>,
  pub comment: Option<String>,
}

impl<T> ApiEnvelope<T> {
  /// Unwrap the payload; any status other than "OK" is an application error.
  pub fn into_result(self) -> Result<T, SyncError> {
    if self.status != "OK" {
      return Err(SyncError::Api(
        self.comment.unwrap_or_else(|| format!("status {}", self.status)),
      ));
    }
    self
      .result
      .ok_or_else(|| SyncError::Decode("OK envelope without result".to_string()))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub handle: String,
  pub rating: Option<i32>,
  pub max_rating: Option<i32>,
  pub rank: Option<String>,
  pub max_rank: Option<String>,
  pub organization: Option<String>,
  pub last_online_time_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
  pub contest_id: Option<u64>,
  pub index: String,
  pub name: String,
  pub rating: Option<u32>,
  #[serde(default)]
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
  pub id: u64,
  pub contest_id: Option<u64>,
  pub creation_time_seconds: i64,
  pub problem: Problem,
  pub verdict: Option<String>,
  pub programming_language: Option<String>,
}

impl Submission {
  pub fn is_accepted(&self) -> bool {
    self.verdict.as_deref() == Some("OK")
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
  pub id: u64,
  pub name: String,
  pub phase: String,
  pub start_time_seconds: Option<i64>,
  pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemStatistics {
  pub contest_id: Option<u64>,
  pub index: String,
  pub solved_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problemset {
  pub problems: Vec<Problem>,
  #[serde(default)]
  pub problem_statistics: Vec<ProblemStatistics>,
}

impl Cacheable for User {
  fn cache_key(&self) -> String {
    self.handle.to_lowercase()
  }

  fn entity_type() -> &'static str {
    "user"
  }
}

impl Cacheable for Submission {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "submission"
  }
}

impl Cacheable for Contest {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn entity_type() -> &'static str {
    "contest"
  }
}

impl Cacheable for Problem {
  fn cache_key(&self) -> String {
    match self.contest_id {
      Some(contest) => format!("{}{}", contest, self.index),
      None => format!("{}:{}", self.name, self.index),
    }
  }

  fn entity_type() -> &'static str {
    "problem"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ok_envelope_unwraps_result() {
    let envelope: ApiEnvelope<Vec<User>> = serde_json::from_str(
      r#"{"status":"OK","result":[{"handle":"tourist","rating":3800,"maxRating":4009,"rank":"legendary grandmaster"}]}"#,
    )
    .unwrap();

    let users = envelope.into_result().unwrap();
    assert_eq!(users[0].handle, "tourist");
    assert_eq!(users[0].max_rating, Some(4009));
    assert_eq!(users[0].organization, None);
  }

  #[test]
  fn test_failed_envelope_carries_comment() {
    let envelope: ApiEnvelope<Vec<User>> = serde_json::from_str(
      r#"{"status":"FAILED","comment":"handles: User with handle nobody_xyz not found"}"#,
    )
    .unwrap();

    assert_eq!(
      envelope.into_result(),
      Err(SyncError::Api(
        "handles: User with handle nobody_xyz not found".to_string()
      ))
    );
  }

  #[test]
  fn test_ok_envelope_without_result_is_decode_error() {
    let envelope: ApiEnvelope<Vec<User>> = serde_json::from_str(r#"{"status":"OK"}"#).unwrap();
    assert!(matches!(envelope.into_result(), Err(SyncError::Decode(_))));
  }

  #[test]
  fn test_problem_key() {
    let problem = Problem {
      contest_id: Some(1520),
      index: "F2".to_string(),
      name: "Guess the K-th Zero (Hard version)".to_string(),
      rating: Some(2200),
      tags: vec!["binary search".to_string()],
    };
    assert_eq!(problem.cache_key(), "1520F2");
  }
}
