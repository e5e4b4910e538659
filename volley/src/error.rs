use std::path::PathBuf;

/// Setup-phase failures. Anything that goes wrong with a single request is
/// recorded in its [`crate::metric::RequestOutcome`] instead.
#[derive(Debug, thiserror::Error)]
pub enum VolleyError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("inference server at {0} failed its health check")]
    Unhealthy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
