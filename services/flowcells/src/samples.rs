use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use views::{Database, ViewClient, ViewIndex, ViewQuery};

use crate::{
    aggregate::{Source, query_source},
    error::FlowcellError,
};

pub const SAMPLE_RUNS_VIEW: &str = "flowcell/name";
pub const LANE_CLUSTERS_VIEW: &str = "samples/lane_clusters";

/// Sample-run records of one flowcell, in index order.
pub fn sample_runs(views: &dyn ViewClient, flowcell: &str) -> Result<Vec<Value>, FlowcellError> {
    let index = ViewIndex::new(Database::Samples, SAMPLE_RUNS_VIEW);
    let query = ViewQuery::new().key(json!(flowcell)).reduce(false);
    Ok(views
        .query(&index, &query)?
        .into_iter()
        .map(|row| row.value)
        .collect())
}

/// Lane cluster counts for every sample key starting with `query`, grouped
/// by key. Groups are ordered by key and each group by its `fcp` field.
pub fn reads_total(views: &dyn ViewClient, query: &str) -> Result<Map<String, Value>, FlowcellError> {
    if query.is_empty() {
        return Ok(Map::new());
    }
    let range = ViewQuery::new()
        .range(json!(query), json!(format!("{query}Z")))
        .reduce(false);

    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in query_source(views, Source::Current, LANE_CLUSTERS_VIEW, &range)? {
        let key = match row.key {
            Value::String(key) => key,
            other => other.to_string(),
        };
        grouped.entry(key).or_default().push(row.value);
    }

    Ok(grouped
        .into_iter()
        .map(|(key, mut runs)| {
            runs.sort_by(|a, b| fcp(a).cmp(&fcp(b)));
            (key, Value::Array(runs))
        })
        .collect())
}

fn fcp(run: &Value) -> Option<&str> {
    run.get("fcp").and_then(Value::as_str)
}
