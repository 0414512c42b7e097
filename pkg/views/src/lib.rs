use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use serde::Deserialize;
use serde_json::{Map, Value, json};

mod collate;

pub use collate::collate;

// ---------------------------------------------------------------------------
// Index addressing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Database {
    /// Flowcells from 2016 and older.
    Flowcells,
    /// Flowcells from the current instrument generation.
    XFlowcells,
    Samples,
}

impl Database {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flowcells => "flowcells",
            Self::XFlowcells => "x_flowcells",
            Self::Samples => "samples",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "flowcells" => Some(Self::Flowcells),
            "x_flowcells" => Some(Self::XFlowcells),
            "samples" => Some(Self::Samples),
            _ => None,
        }
    }
}

/// A named view (`design/view`) inside one database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewIndex {
    pub database: Database,
    pub view: String,
}

impl ViewIndex {
    pub fn new(database: Database, view: impl Into<String>) -> Self {
        Self {
            database,
            view: view.into(),
        }
    }
}

impl fmt::Display for ViewIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database.as_str(), self.view)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewQuery {
    pub descending: bool,
    pub key: Option<Value>,
    pub startkey: Option<Value>,
    pub endkey: Option<Value>,
    pub inclusive_end: bool,
    pub group_level: Option<usize>,
    /// `None` reduces whenever the view defines a reducer.
    pub reduce: Option<bool>,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            descending: false,
            key: None,
            startkey: None,
            endkey: None,
            inclusive_end: true,
            group_level: None,
            reduce: None,
        }
    }
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    pub fn startkey(mut self, key: Value) -> Self {
        self.startkey = Some(key);
        self
    }

    pub fn endkey(mut self, key: Value) -> Self {
        self.endkey = Some(key);
        self
    }

    pub fn range(self, start: Value, end: Value) -> Self {
        self.startkey(start).endkey(end)
    }

    pub fn group_level(mut self, level: usize) -> Self {
        self.group_level = Some(level);
        self
    }

    pub fn reduce(mut self, reduce: bool) -> Self {
        self.reduce = Some(reduce);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewRow {
    pub key: Value,
    pub value: Value,
}

impl ViewRow {
    pub fn new(key: Value, value: Value) -> Self {
        Self { key, value }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("view {0} has no reduce function")]
    NoReducer(String),
    #[error("reduce failed for view {view}: {message}")]
    Reduce { view: String, message: String },
    #[error("view snapshot i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("view snapshot parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("view snapshot refers to unknown database '{0}'")]
    UnknownDatabase(String),
    #[error("upstream view error: {0}")]
    Upstream(String),
}

/// Read access to externally maintained, key-sorted views.
pub trait ViewClient: Send + Sync {
    fn query(&self, index: &ViewIndex, query: &ViewQuery) -> Result<Vec<ViewRow>, ViewError>;
}

// ---------------------------------------------------------------------------
// In-memory views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Reducer {
    #[serde(rename = "_count")]
    Count,
    #[serde(rename = "_sum")]
    Sum,
    #[serde(rename = "_stats")]
    Stats,
}

#[derive(Debug, Default)]
struct StoredView {
    rows: Vec<ViewRow>,
    reducer: Option<Reducer>,
}

/// View client over rows held in memory, sorted by key collation.
///
/// Views that were never defined answer with no rows. Every query is counted
/// per index so callers can assert how often the backing views were hit.
#[derive(Debug, Default)]
pub struct InMemoryViews {
    views: RwLock<BTreeMap<ViewIndex, StoredView>>,
    query_counts: Mutex<HashMap<ViewIndex, u64>>,
    queries_total: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct ViewsSnapshot {
    #[serde(default)]
    views: Vec<SnapshotView>,
}

#[derive(Debug, Deserialize)]
struct SnapshotView {
    database: String,
    view: String,
    #[serde(default)]
    reduce: Option<Reducer>,
    #[serde(default)]
    rows: Vec<ViewRow>,
}

impl InMemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads views from a JSON document of the form
    /// `{"views": [{"database", "view", "reduce"?, "rows": [{"key", "value"}]}]}`.
    pub fn from_snapshot_str(raw: &str) -> Result<Self, ViewError> {
        let snapshot: ViewsSnapshot = serde_json::from_str(raw)?;
        let views = Self::new();
        for entry in snapshot.views {
            let database = Database::from_name(&entry.database)
                .ok_or_else(|| ViewError::UnknownDatabase(entry.database.clone()))?;
            let index = ViewIndex::new(database, entry.view);
            views.define_view(index.clone(), entry.reduce);
            for row in entry.rows {
                views.insert_row(&index, row.key, row.value);
            }
        }
        Ok(views)
    }

    pub fn from_snapshot_file(path: impl AsRef<Path>) -> Result<Self, ViewError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_snapshot_str(&raw)
    }

    pub fn define_view(&self, index: ViewIndex, reducer: Option<Reducer>) {
        let mut views = match self.views.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        views.entry(index).or_default().reducer = reducer;
    }

    /// Inserts a row after any existing rows with an equal key.
    pub fn insert_row(&self, index: &ViewIndex, key: Value, value: Value) {
        let mut views = match self.views.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stored = views.entry(index.clone()).or_default();
        let position = stored
            .rows
            .partition_point(|row| collate(&row.key, &key) != Ordering::Greater);
        stored.rows.insert(position, ViewRow::new(key, value));
    }

    pub fn query_count(&self, index: &ViewIndex) -> u64 {
        match self.query_counts.lock() {
            Ok(counts) => counts.get(index).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(index).copied().unwrap_or(0),
        }
    }

    pub fn queries_total(&self) -> u64 {
        self.queries_total.load(AtomicOrdering::Relaxed)
    }

    fn observe_query(&self, index: &ViewIndex) {
        self.queries_total.fetch_add(1, AtomicOrdering::Relaxed);
        let mut counts = match self.query_counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counts.entry(index.clone()).or_insert(0) += 1;
    }
}

impl ViewClient for InMemoryViews {
    fn query(&self, index: &ViewIndex, query: &ViewQuery) -> Result<Vec<ViewRow>, ViewError> {
        self.observe_query(index);
        let views = match self.views.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(stored) = views.get(index) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<&ViewRow> = stored
            .rows
            .iter()
            .filter(|row| row_in_range(&row.key, query))
            .collect();
        if query.descending {
            selected.reverse();
        }

        let reducer = match (query.reduce, stored.reducer) {
            (Some(false), _) => None,
            (Some(true), None) => return Err(ViewError::NoReducer(index.to_string())),
            (_, reducer) => reducer,
        };
        let Some(reducer) = reducer else {
            return Ok(selected.into_iter().cloned().collect());
        };
        reduce_rows(index, reducer, &selected, query.group_level)
    }
}

fn row_in_range(key: &Value, query: &ViewQuery) -> bool {
    if let Some(exact) = &query.key {
        return collate(key, exact) == Ordering::Equal;
    }
    // Descending scans walk from startkey down to endkey.
    let (lower, upper, lower_inclusive, upper_inclusive) = if query.descending {
        (&query.endkey, &query.startkey, query.inclusive_end, true)
    } else {
        (&query.startkey, &query.endkey, true, query.inclusive_end)
    };
    if let Some(lower) = lower {
        match collate(key, lower) {
            Ordering::Less => return false,
            Ordering::Equal if !lower_inclusive => return false,
            _ => {}
        }
    }
    if let Some(upper) = upper {
        match collate(key, upper) {
            Ordering::Greater => return false,
            Ordering::Equal if !upper_inclusive => return false,
            _ => {}
        }
    }
    true
}

fn group_key(key: &Value, group_level: Option<usize>) -> Value {
    match (group_level, key) {
        (None, _) => Value::Null,
        (Some(level), Value::Array(parts)) => {
            Value::Array(parts.iter().take(level).cloned().collect())
        }
        (Some(_), other) => other.clone(),
    }
}

fn reduce_rows(
    index: &ViewIndex,
    reducer: Reducer,
    rows: &[&ViewRow],
    group_level: Option<usize>,
) -> Result<Vec<ViewRow>, ViewError> {
    let mut out: Vec<ViewRow> = Vec::new();
    let mut group: Vec<&Value> = Vec::new();
    let mut current_key: Option<Value> = None;

    for row in rows {
        let key = group_key(&row.key, group_level);
        if let Some(active) = &current_key
            && collate(active, &key) != Ordering::Equal
        {
            out.push(ViewRow::new(
                active.clone(),
                apply_reducer(index, reducer, &group)?,
            ));
            group.clear();
        }
        current_key = Some(key);
        group.push(&row.value);
    }
    if let Some(active) = current_key {
        out.push(ViewRow::new(active, apply_reducer(index, reducer, &group)?));
    }
    Ok(out)
}

fn apply_reducer(index: &ViewIndex, reducer: Reducer, values: &[&Value]) -> Result<Value, ViewError> {
    match reducer {
        Reducer::Count => Ok(json!(values.len())),
        Reducer::Sum => Ok(json!(numeric_values(index, values)?.iter().sum::<f64>())),
        Reducer::Stats => {
            let numbers = numeric_values(index, values)?;
            let mut stats = Map::new();
            stats.insert("sum".to_string(), json!(numbers.iter().sum::<f64>()));
            stats.insert("count".to_string(), json!(numbers.len()));
            stats.insert(
                "min".to_string(),
                json!(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
            );
            stats.insert(
                "max".to_string(),
                json!(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            );
            stats.insert(
                "sumsqr".to_string(),
                json!(numbers.iter().map(|n| n * n).sum::<f64>()),
            );
            Ok(Value::Object(stats))
        }
    }
}

fn numeric_values(index: &ViewIndex, values: &[&Value]) -> Result<Vec<f64>, ViewError> {
    values
        .iter()
        .map(|value| {
            value.as_f64().ok_or_else(|| ViewError::Reduce {
                view: index.to_string(),
                message: format!("non-numeric value {value}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_index() -> ViewIndex {
        ViewIndex::new(Database::XFlowcells, "info/summary")
    }

    fn sample_views() -> InMemoryViews {
        let views = InMemoryViews::new();
        let index = summary_index();
        for key in ["190101_A", "181212_B", "190615_C", "170303_D"] {
            views.insert_row(&index, json!(key), json!({"id": key}));
        }
        views
    }

    fn keys(rows: &[ViewRow]) -> Vec<String> {
        rows.iter()
            .map(|row| row.key.as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn query_returns_rows_in_key_order() {
        let views = sample_views();
        let rows = views.query(&summary_index(), &ViewQuery::new()).unwrap();
        assert_eq!(
            keys(&rows),
            vec!["170303_D", "181212_B", "190101_A", "190615_C"]
        );
    }

    #[test]
    fn descending_endkey_stops_at_lower_bound() {
        let views = sample_views();
        let rows = views
            .query(
                &summary_index(),
                &ViewQuery::new().descending().endkey(json!("181212")),
            )
            .unwrap();
        assert_eq!(keys(&rows), vec!["190615_C", "190101_A", "181212_B"]);
    }

    #[test]
    fn exact_key_lookup_matches_only_equal_keys() {
        let views = sample_views();
        let rows = views
            .query(&summary_index(), &ViewQuery::new().key(json!("190101_A")))
            .unwrap();
        assert_eq!(keys(&rows), vec!["190101_A"]);
    }

    #[test]
    fn exclusive_end_drops_the_end_key() {
        let views = sample_views();
        let mut query = ViewQuery::new().range(json!("170303_D"), json!("190101_A"));
        query.inclusive_end = false;
        let rows = views.query(&summary_index(), &query).unwrap();
        assert_eq!(keys(&rows), vec!["170303_D", "181212_B"]);
    }

    #[test]
    fn composite_key_range_selects_one_flowcell() {
        let views = InMemoryViews::new();
        let index = ViewIndex::new(Database::Flowcells, "lanes/qc");
        views.insert_row(&index, json!(["FC2", "1"]), json!("other"));
        views.insert_row(&index, json!(["FC1", "2"]), json!("two"));
        views.insert_row(&index, json!(["FC1", "1"]), json!("one"));
        let rows = views
            .query(
                &index,
                &ViewQuery::new().range(json!(["FC1", ""]), json!(["FC1", "Z"])),
            )
            .unwrap();
        let values: Vec<&Value> = rows.iter().map(|row| &row.value).collect();
        assert_eq!(values, vec![&json!("one"), &json!("two")]);
    }

    #[test]
    fn stats_reducer_groups_by_key_prefix() {
        let views = InMemoryViews::new();
        let index = ViewIndex::new(Database::Flowcells, "lanes/gtq30");
        views.define_view(index.clone(), Some(Reducer::Stats));
        views.insert_row(&index, json!(["FC1", "1", "1", "S1"]), json!(29.0));
        views.insert_row(&index, json!(["FC1", "1", "1", "S2"]), json!(31.0));
        views.insert_row(&index, json!(["FC1", "2", "2", "S1"]), json!(40.0));

        let rows = views
            .query(&index, &ViewQuery::new().group_level(3))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, json!(["FC1", "1", "1"]));
        assert_eq!(rows[0].value["sum"], json!(60.0));
        assert_eq!(rows[0].value["count"], json!(2));
        assert_eq!(rows[1].value["max"], json!(40.0));
    }

    #[test]
    fn reduce_false_returns_raw_rows_and_missing_reducer_errors() {
        let views = InMemoryViews::new();
        let index = ViewIndex::new(Database::Samples, "flowcell/name");
        views.define_view(index.clone(), Some(Reducer::Count));
        views.insert_row(&index, json!("FC1"), json!({"sample": "P1_101"}));
        views.insert_row(&index, json!("FC1"), json!({"sample": "P1_102"}));

        let raw = views
            .query(&index, &ViewQuery::new().key(json!("FC1")).reduce(false))
            .unwrap();
        assert_eq!(raw.len(), 2);
        let counted = views.query(&index, &ViewQuery::new()).unwrap();
        assert_eq!(counted, vec![ViewRow::new(Value::Null, json!(2))]);

        let err = views
            .query(&summary_index(), &ViewQuery::new().reduce(true))
            .unwrap_err();
        assert!(matches!(err, ViewError::NoReducer(_)));
    }

    #[test]
    fn undefined_view_answers_empty_and_counts_queries() {
        let views = InMemoryViews::new();
        let index = summary_index();
        assert!(views.query(&index, &ViewQuery::new()).unwrap().is_empty());
        assert!(views.query(&index, &ViewQuery::new()).unwrap().is_empty());
        assert_eq!(views.query_count(&index), 2);
        assert_eq!(views.queries_total(), 2);
    }

    #[test]
    fn snapshot_loading_defines_reducers_and_rows() {
        let raw = r#"{
          "views": [
            {"database": "flowcells", "view": "lanes/gtq30", "reduce": "_stats",
             "rows": [{"key": ["FC1", "1", "1"], "value": 30}]},
            {"database": "x_flowcells", "view": "info/id",
             "rows": [{"key": "190101_A", "value": null}]}
          ]
        }"#;
        let views = InMemoryViews::from_snapshot_str(raw).unwrap();
        let rows = views
            .query(
                &ViewIndex::new(Database::Flowcells, "lanes/gtq30"),
                &ViewQuery::new().group_level(3),
            )
            .unwrap();
        assert_eq!(rows[0].value["count"], json!(1));

        let err = InMemoryViews::from_snapshot_str(
            r#"{"views": [{"database": "nope", "view": "x", "rows": []}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ViewError::UnknownDatabase(name) if name == "nope"));
    }
}
