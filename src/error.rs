// src/error.rs
use thiserror::Error;

/// Failures surfaced by the coordination core.
///
/// None of these are fatal to the dashboard: the runtime logs them and degrades the affected
/// feature to "unavailable".
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("collaborator `{0}` is not registered")]
    MissingCollaborator(&'static str),
    #[error("handler for `{topic}` failed: {reason}")]
    HandlerFault { topic: String, reason: String },
    #[error("unknown bus topic `{0}`")]
    UnknownTopic(String),
    #[error("{0} is not active")]
    Unavailable(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown label `{0}`")]
    UnknownLabel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to render snapshot: {0}")]
    Render(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for CoreError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        CoreError::Render(format!("{value:?}"))
    }
}

impl From<image::ImageError> for CoreError {
    fn from(value: image::ImageError) -> Self {
        CoreError::Render(value.to_string())
    }
}
