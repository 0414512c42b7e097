use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

pub const MISEQ_RUN_PROCESS_TYPE: &str = "MiSeq Run (MiSeq) 4.0";
pub const MISEQ_FLOW_CELL_UDF: &str = "Flow Cell ID";
pub const MISEQ_CARTRIDGE_UDF: &str = "Reagent Cartridge ID";

/// Run identifiers carry `YYMMDD_` before the instrument-specific part.
const MISEQ_OFFSET: usize = 7;
const MISEQ_MARKER: &str = "00000000";
const CONTAINER_OFFSET: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("record store rejected the request: {0}")]
    Upstream(String),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A container record and its user-defined fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    #[serde(default)]
    pub udf: BTreeMap<String, String>,
}

impl ContainerRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            udf: BTreeMap::new(),
        }
    }

    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.udf.get(field).map(String::as_str)
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.udf.insert(field.into(), value.into());
    }
}

/// How a flowcell identifier maps onto a container lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerLookup {
    /// MiSeq runs are keyed by the run process; the reagent cartridge names the container.
    MiSeqRun { flow_cell_id: String },
    Named { name: String },
}

pub fn container_lookup_for(flowcell_id: &str) -> Option<ContainerLookup> {
    let tail = flowcell_id.get(MISEQ_OFFSET..)?;
    if tail.starts_with(MISEQ_MARKER) {
        return Some(ContainerLookup::MiSeqRun {
            flow_cell_id: tail.to_string(),
        });
    }
    let name = flowcell_id.get(CONTAINER_OFFSET..)?;
    if name.is_empty() {
        return None;
    }
    Some(ContainerLookup::Named {
        name: name.to_string(),
    })
}

/// Fetch and persist container records in the sample-tracking system.
pub trait RecordStore: Send + Sync {
    fn find_container(&self, name: &str) -> Result<Option<ContainerRecord>, RecordError>;

    /// Reagent cartridge of the MiSeq run process with the given flow cell.
    fn miseq_cartridge_id(&self, flow_cell_id: &str) -> Result<Option<String>, RecordError>;

    fn persist(&self, record: &ContainerRecord) -> Result<(), RecordError>;

    fn resolve(&self, flowcell_id: &str) -> Result<Option<ContainerRecord>, RecordError> {
        match container_lookup_for(flowcell_id) {
            Some(ContainerLookup::MiSeqRun { flow_cell_id }) => {
                match self.miseq_cartridge_id(&flow_cell_id)? {
                    Some(cartridge) => self.find_container(&cartridge),
                    None => Ok(None),
                }
            }
            Some(ContainerLookup::Named { name }) => self.find_container(&name),
            None => Ok(None),
        }
    }
}

/// Project-level running notes owned by another part of the dashboard.
pub trait ProjectNotes: Send + Sync {
    fn post_project_note(
        &self,
        project_id: &str,
        text: &str,
        category: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<(), RecordError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedProjectNote {
    pub project_id: String,
    pub text: String,
    pub category: String,
    pub author_name: String,
    pub author_email: String,
}

#[derive(Debug, Default)]
pub struct InMemoryLims {
    containers: RwLock<BTreeMap<String, ContainerRecord>>,
    miseq_runs: RwLock<BTreeMap<String, String>>,
    project_notes: Mutex<Vec<PostedProjectNote>>,
    persist_total: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct LimsSnapshot {
    #[serde(default)]
    containers: Vec<ContainerRecord>,
    #[serde(default)]
    miseq_runs: Vec<MiSeqRunEntry>,
}

#[derive(Debug, Deserialize)]
struct MiSeqRunEntry {
    flow_cell_id: String,
    reagent_cartridge_id: String,
}

impl InMemoryLims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `{"containers": [{"name", "udf"}], "miseq_runs": [{"flow_cell_id", "reagent_cartridge_id"}]}`.
    pub fn from_snapshot_str(raw: &str) -> Result<Self, RecordError> {
        let snapshot: LimsSnapshot = serde_json::from_str(raw)?;
        let lims = Self::new();
        for container in snapshot.containers {
            lims.insert_container(container);
        }
        for run in snapshot.miseq_runs {
            lims.insert_miseq_run(run.flow_cell_id, run.reagent_cartridge_id);
        }
        Ok(lims)
    }

    pub fn from_snapshot_file(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_snapshot_str(&raw)
    }

    pub fn insert_container(&self, record: ContainerRecord) {
        let mut containers = match self.containers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        containers.insert(record.name.clone(), record);
    }

    pub fn insert_miseq_run(&self, flow_cell_id: impl Into<String>, cartridge: impl Into<String>) {
        let mut runs = match self.miseq_runs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.insert(flow_cell_id.into(), cartridge.into());
    }

    pub fn container(&self, name: &str) -> Option<ContainerRecord> {
        match self.containers.read() {
            Ok(containers) => containers.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }

    pub fn persist_total(&self) -> u64 {
        self.persist_total.load(Ordering::Relaxed)
    }

    pub fn posted_project_notes(&self) -> Vec<PostedProjectNote> {
        match self.project_notes.lock() {
            Ok(notes) => notes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl RecordStore for InMemoryLims {
    fn find_container(&self, name: &str) -> Result<Option<ContainerRecord>, RecordError> {
        Ok(self.container(name))
    }

    fn miseq_cartridge_id(&self, flow_cell_id: &str) -> Result<Option<String>, RecordError> {
        let runs = self
            .miseq_runs
            .read()
            .map_err(|_| RecordError::Upstream("miseq run table lock poisoned".to_string()))?;
        Ok(runs.get(flow_cell_id).cloned())
    }

    fn persist(&self, record: &ContainerRecord) -> Result<(), RecordError> {
        let mut containers = self
            .containers
            .write()
            .map_err(|_| RecordError::Upstream("container table lock poisoned".to_string()))?;
        containers.insert(record.name.clone(), record.clone());
        self.persist_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl ProjectNotes for InMemoryLims {
    fn post_project_note(
        &self,
        project_id: &str,
        text: &str,
        category: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<(), RecordError> {
        let mut notes = self
            .project_notes
            .lock()
            .map_err(|_| RecordError::Upstream("project note log lock poisoned".to_string()))?;
        notes.push(PostedProjectNote {
            project_id: project_id.to_string(),
            text: text.to_string(),
            category: category.to_string(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        });
        Ok(())
    }
}
