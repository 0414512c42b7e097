use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Record fields and defaults
// ---------------------------------------------------------------------------

/// Container field holding the running-notes JSON blob.
pub const NOTES_FIELD: &str = "Notes";
/// Container field holding the external-links JSON blob.
pub const LINKS_FIELD: &str = "Links";
pub const DEFAULT_NOTE_CATEGORY: &str = "Flowcell";

/// Expected yield per instrument mode, in millions of reads.
pub const YIELD_THRESHOLDS: &[(&str, f64)] = &[
    ("HiSeq X", 320.0),
    ("RapidHighOutput", 188.0),
    ("HighOutput", 143.0),
    ("RapidRun", 114.0),
    ("MiSeq Version3", 18.0),
    ("MiSeq Version2", 10.0),
    ("NovaSeq SP", 325.0),
    ("NovaSeq S1", 650.0),
    ("NovaSeq S2", 1650.0),
    ("NovaSeq S4", 2000.0),
    ("NextSeq Mid", 32.5),
    ("NextSeq High", 100.0),
];

// ---------------------------------------------------------------------------
// Flowcell projections
// ---------------------------------------------------------------------------

/// Summary document for one flowcell as emitted by the summary indices.
///
/// Only the fields the service reshapes are typed; everything else the
/// index emits is carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowcellSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane_info: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_list: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlowcellSummary {
    pub fn project_ids(&self) -> &[String] {
        self.pid_list.as_deref().unwrap_or(&[])
    }
}

/// One per-lane statistic extracted from a `(flowcell, lane, ...)` keyed index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStat {
    pub flowcell: String,
    pub lane: String,
    pub value: Value,
}

/// Partial aggregate emitted by the reduced Q30 index. The mean is computed
/// at read time from `sum / count`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Q30Aggregate {
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// Stored value of a running note; the timestamp is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningNote {
    pub user: String,
    pub email: String,
    pub note: String,
    pub category: String,
}

/// Stored value of an external link; the timestamp is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub user: String,
    pub email: String,
    #[serde(rename = "type")]
    pub link_type: String,
    pub title: String,
    pub url: String,
    pub desc: String,
}

/// The person posting an annotation, as forwarded by the authenticating proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            name: "anonymous".to_string(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteRequest {
    pub note: String,
    pub category: Option<String>,
}

impl NoteRequest {
    /// Category to store, falling back to the default for absent or empty input.
    pub fn category(&self) -> &str {
        match self.category.as_deref() {
            Some(category) if !category.is_empty() => category,
            _ => DEFAULT_NOTE_CATEGORY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRequest {
    pub link_type: String,
    pub title: String,
    pub url: String,
    pub desc: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

pub fn validate_note_request(request: &NoteRequest) -> Result<(), ValidationError> {
    if request.note.is_empty() {
        return Err(ValidationError::MissingField("note"));
    }
    Ok(())
}

pub fn validate_link_request(request: &LinkRequest) -> Result<(), ValidationError> {
    if request.link_type.is_empty() {
        return Err(ValidationError::MissingField("type"));
    }
    if request.title.is_empty() {
        return Err(ValidationError::MissingField("title"));
    }
    Ok(())
}
