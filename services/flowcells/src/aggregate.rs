use std::collections::BTreeMap;

use chrono::{Months, NaiveDate};
use schema::FlowcellSummary;
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::{Map, Value, json};
use views::{Database, ViewClient, ViewError, ViewIndex, ViewQuery, ViewRow};

use crate::error::FlowcellError;

pub const SUMMARY_VIEW: &str = "info/summary";

const COMPACT_DATE_FORMAT: &str = "%y%m%d";
const SLASHED_DATE_FORMAT: &str = "%m/%d/%Y";
const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// The two flowcell databases. Legacy holds runs from 2016 and older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Legacy,
    Current,
}

impl Source {
    pub fn database(self) -> Database {
        match self {
            Self::Legacy => Database::Flowcells,
            Self::Current => Database::XFlowcells,
        }
    }

    pub fn index(self, view: &str) -> ViewIndex {
        ViewIndex::new(self.database(), view)
    }
}

pub fn query_source(
    views: &dyn ViewClient,
    source: Source,
    view: &str,
    query: &ViewQuery,
) -> Result<Vec<ViewRow>, ViewError> {
    views.query(&source.index(view), query)
}

/// Flowcell summaries keyed by identifier, in the order they were listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowcellListing {
    entries: Vec<(String, FlowcellSummary)>,
}

impl FlowcellListing {
    pub fn newest_first(merged: BTreeMap<String, FlowcellSummary>) -> Self {
        Self {
            entries: merged.into_iter().rev().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlowcellSummary)> {
        self.entries.iter().map(|(id, summary)| (id.as_str(), summary))
    }

    pub fn get(&self, id: &str) -> Option<&FlowcellSummary> {
        self.entries
            .iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, summary)| summary)
    }
}

impl Serialize for FlowcellListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, summary) in &self.entries {
            map.serialize_entry(id, summary)?;
        }
        map.end()
    }
}

/// Lists flowcell summaries newest first.
///
/// Without `include_all` only current-database runs started within the last
/// `recent_months` are read; the legacy database is older than any such
/// window and is skipped. With `include_all` both are read, legacy first, so
/// current entries replace legacy entries sharing an identifier.
pub fn list_summaries(
    views: &dyn ViewClient,
    include_all: bool,
    today: NaiveDate,
    recent_months: u32,
) -> Result<FlowcellListing, FlowcellError> {
    let mut merged = BTreeMap::new();
    let current_query = if include_all {
        for row in query_source(views, Source::Legacy, SUMMARY_VIEW, &ViewQuery::new().descending())? {
            let (id, mut summary) = summary_from_row(row)?;
            sort_lane_info(&mut summary);
            merged.insert(id, summary);
        }
        ViewQuery::new().descending()
    } else {
        ViewQuery::new()
            .descending()
            .endkey(json!(recent_cutoff_key(today, recent_months)))
    };

    for row in query_source(views, Source::Current, SUMMARY_VIEW, &current_query)? {
        let (id, mut summary) = summary_from_row(row)?;
        if let Some(raw) = summary.startdate.take() {
            summary.startdate = Some(normalize_start_date(&raw)?);
        }
        sort_lane_info(&mut summary);
        merged.insert(id, summary);
    }

    Ok(FlowcellListing::newest_first(merged))
}

/// Every brief summary from both databases, exactly as indexed, sorted by
/// identifier ascending. Current entries replace legacy ones.
pub fn list_brief_summaries(views: &dyn ViewClient) -> Result<Map<String, Value>, FlowcellError> {
    let mut merged = BTreeMap::new();
    for source in [Source::Legacy, Source::Current] {
        for row in query_source(views, source, SUMMARY_VIEW, &ViewQuery::new().descending())? {
            merged.insert(row_id(&row.key)?, row.value);
        }
    }
    Ok(merged.into_iter().collect())
}

/// Lowest identifier prefix still inside the recent window, as `YYMMDD`.
pub fn recent_cutoff_key(today: NaiveDate, recent_months: u32) -> String {
    today
        .checked_sub_months(Months::new(recent_months))
        .unwrap_or(NaiveDate::MIN)
        .format(COMPACT_DATE_FORMAT)
        .to_string()
}

/// Converts `YYMMDD` or `M/D/YYYY <time>` to `YYYY-MM-DD`.
pub fn normalize_start_date(raw: &str) -> Result<String, FlowcellError> {
    let compact = raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit());
    if compact && let Ok(date) = NaiveDate::parse_from_str(raw, COMPACT_DATE_FORMAT) {
        return Ok(date.format(CANONICAL_DATE_FORMAT).to_string());
    }
    let date_part = raw.split_whitespace().next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, SLASHED_DATE_FORMAT)
        .map(|date| date.format(CANONICAL_DATE_FORMAT).to_string())
        .map_err(|_| FlowcellError::MalformedDate(raw.to_string()))
}

/// Upstream occasionally emits lanes out of order.
pub fn sort_lane_info(summary: &mut FlowcellSummary) {
    if let Some(lanes) = summary.lane_info.take() {
        let sorted: BTreeMap<String, Value> = lanes.into_iter().collect();
        summary.lane_info = Some(sorted.into_iter().collect());
    }
}

pub(crate) fn row_id(key: &Value) -> Result<String, FlowcellError> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| FlowcellError::MalformedUpstream(format!("non-string flowcell key {key}")))
}

pub(crate) fn summary_from_value(value: Value) -> Result<FlowcellSummary, FlowcellError> {
    serde_json::from_value(value)
        .map_err(|err| FlowcellError::MalformedUpstream(format!("flowcell summary: {err}")))
}

fn summary_from_row(row: ViewRow) -> Result<(String, FlowcellSummary), FlowcellError> {
    let id = row_id(&row.key)?;
    Ok((id, summary_from_value(row.value)?))
}
