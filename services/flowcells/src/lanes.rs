use schema::{LaneStat, Q30Aggregate};
use serde_json::{Map, Value, json};
use views::{ViewClient, ViewQuery, ViewRow};

use crate::{
    aggregate::{Source, query_source},
    error::FlowcellError,
};

/// Per-lane statistics read from the legacy flowcell database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneStatKind {
    Qc,
    Demultiplex,
    Q30,
}

impl LaneStatKind {
    pub fn view(self) -> &'static str {
        match self {
            Self::Qc => "lanes/qc",
            Self::Demultiplex => "lanes/demultiplex",
            Self::Q30 => "lanes/gtq30",
        }
    }

    /// Key position of the lane label.
    fn lane_position(self) -> usize {
        match self {
            Self::Qc | Self::Demultiplex => 1,
            Self::Q30 => 2,
        }
    }

    fn query(self, flowcell: &str) -> ViewQuery {
        let query = ViewQuery::new().range(json!([flowcell, ""]), json!([flowcell, "Z"]));
        match self {
            Self::Q30 => query.group_level(3),
            Self::Qc | Self::Demultiplex => query,
        }
    }
}

/// Lane statistics for one flowcell in index key order.
pub fn lane_stats(
    views: &dyn ViewClient,
    flowcell: &str,
    kind: LaneStatKind,
) -> Result<Vec<LaneStat>, FlowcellError> {
    query_source(views, Source::Legacy, kind.view(), &kind.query(flowcell))?
        .into_iter()
        .map(|row| lane_stat(flowcell, kind, row))
        .collect()
}

/// Lane label to value, keeping index key order.
pub fn lane_values(
    views: &dyn ViewClient,
    flowcell: &str,
    kind: LaneStatKind,
) -> Result<Map<String, Value>, FlowcellError> {
    Ok(lane_stats(views, flowcell, kind)?
        .into_iter()
        .map(|stat| (stat.lane, stat.value))
        .collect())
}

fn lane_stat(flowcell: &str, kind: LaneStatKind, row: ViewRow) -> Result<LaneStat, FlowcellError> {
    let lane = lane_label(&row.key, kind.lane_position()).ok_or_else(|| {
        FlowcellError::MalformedUpstream(format!(
            "{} key {} has no lane at position {}",
            kind.view(),
            row.key,
            kind.lane_position()
        ))
    })?;
    let value = match kind {
        LaneStatKind::Q30 => json!(q30_mean(flowcell, &lane, row.value)?),
        LaneStatKind::Qc | LaneStatKind::Demultiplex => row.value,
    };
    Ok(LaneStat {
        flowcell: flowcell.to_string(),
        lane,
        value,
    })
}

fn lane_label(key: &Value, position: usize) -> Option<String> {
    match key.as_array()?.get(position)? {
        Value::String(label) => Some(label.clone()),
        Value::Number(label) => Some(label.to_string()),
        _ => None,
    }
}

pub fn q30_mean(flowcell: &str, lane: &str, aggregate: Value) -> Result<f64, FlowcellError> {
    let aggregate: Q30Aggregate = serde_json::from_value(aggregate)
        .map_err(|err| FlowcellError::MalformedUpstream(format!("q30 aggregate: {err}")))?;
    if aggregate.count == 0 {
        return Err(FlowcellError::DivisionByZero {
            flowcell: flowcell.to_string(),
            lane: lane.to_string(),
        });
    }
    Ok(aggregate.sum / aggregate.count as f64)
}
