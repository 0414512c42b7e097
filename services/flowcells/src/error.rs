use lims::RecordError;
use schema::ValidationError;
use views::ViewError;

#[derive(Debug, thiserror::Error)]
pub enum FlowcellError {
    #[error("flowcell not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("unrecognised start date '{0}'")]
    MalformedDate(String),
    #[error("malformed upstream data: {0}")]
    MalformedUpstream(String),
    #[error("q30 aggregate for flowcell {flowcell} lane {lane} has a zero count")]
    DivisionByZero { flowcell: String, lane: String },
    #[error(transparent)]
    View(#[from] ViewError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("page rendering failed: {0}")]
    Render(String),
}

impl FlowcellError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// HTTP status for a failed request. Upstream contract violations are
    /// server errors; missing input is the caller's.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::MalformedDate(_)
            | Self::MalformedUpstream(_)
            | Self::DivisionByZero { .. }
            | Self::View(_)
            | Self::Record(_)
            | Self::Json(_)
            | Self::Render(_) => 500,
        }
    }
}
