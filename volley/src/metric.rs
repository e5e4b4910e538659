use std::{fmt::Debug, path::PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::macros::metric;

/// A `Metric` is a single observed sample produced by a scenario action.
///
/// Metrics are collected by an [`crate::Aggregate`], projected into a
/// [`crate::Report`] and finally rendered by a [`crate::Reporter`].
///
/// Use the `#[metric]` attribute to get the required derives and the marker
/// impl in one go.
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
}

/// Identity of one request handed to a scenario action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dispatch {
    /// Concurrency level the request belongs to.
    pub level: usize,
    /// 1-based, unique within the level.
    pub request_id: usize,
}

/// Classification of a single request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// HTTP 200.
    Success,
    /// Any other HTTP status, or a worker that vanished.
    Failed,
    /// The transport never produced an HTTP status.
    Timeout,
}

/// Result of one executed image generation request.
#[metric]
pub struct RequestOutcome {
    pub request_id: usize,
    pub status: OutcomeStatus,
    /// `None` when the transport failed before any status line arrived.
    pub http_status: Option<u16>,
    pub duration_seconds: f64,
    /// Only set for successes whose payload was decoded and written.
    pub artifact_path: Option<PathBuf>,
    pub error_detail: Option<String>,
}

impl RequestOutcome {
    pub fn success(request_id: usize, duration_seconds: f64, artifact_path: Option<PathBuf>) -> Self {
        Self {
            request_id,
            status: OutcomeStatus::Success,
            http_status: Some(200),
            duration_seconds,
            artifact_path,
            error_detail: None,
        }
    }

    pub fn failed(
        request_id: usize,
        http_status: Option<u16>,
        duration_seconds: f64,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            status: OutcomeStatus::Failed,
            http_status,
            duration_seconds,
            artifact_path: None,
            error_detail: Some(detail.into()),
        }
    }

    pub fn timeout(request_id: usize, duration_seconds: f64, detail: impl Into<String>) -> Self {
        Self {
            request_id,
            status: OutcomeStatus::Timeout,
            http_status: None,
            duration_seconds,
            artifact_path: None,
            error_detail: Some(detail.into()),
        }
    }

    /// Stand-in for a dispatch whose worker terminated without reporting back.
    pub fn vanished(dispatch: &Dispatch) -> Self {
        Self::failed(dispatch.request_id, None, 0.0, "worker vanished")
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanished_is_a_failure_without_status() {
        let outcome = RequestOutcome::vanished(&Dispatch {
            level: 3,
            request_id: 2,
        });

        assert_eq!(outcome.request_id, 2);
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.http_status, None);
        assert!(outcome.artifact_path.is_none());
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&OutcomeStatus::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
