use schema::FlowcellSummary;
use serde_json::{Value, json};
use views::{ViewClient, ViewQuery};

use crate::{
    aggregate::{SUMMARY_VIEW, Source, query_source, summary_from_value},
    error::FlowcellError,
};

pub const LEGACY_INFO_VIEW: &str = "info/summary2";
pub const CURRENT_INFO_VIEW: &str = "info/summary2_full_id";
pub const SHORT_NAME_VIEW: &str = "info/short_name_to_full_name";

/// One step of flowcell info resolution. `Ok(None)` passes to the next step.
pub trait InfoResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(
        &self,
        views: &dyn ViewClient,
        flowcell: &str,
    ) -> Result<Option<FlowcellSummary>, FlowcellError>;
}

/// Exact key lookup in a per-identifier summary index.
#[derive(Debug, Clone, Copy)]
pub struct SummaryIndexResolver {
    pub source: Source,
    pub view: &'static str,
}

impl InfoResolver for SummaryIndexResolver {
    fn name(&self) -> &'static str {
        match self.source {
            Source::Legacy => "legacy-summary",
            Source::Current => "current-summary",
        }
    }

    fn resolve(
        &self,
        views: &dyn ViewClient,
        flowcell: &str,
    ) -> Result<Option<FlowcellSummary>, FlowcellError> {
        first_value(views, self.source, self.view, flowcell)?
            .map(summary_from_value)
            .transpose()
    }
}

/// Maps a short name onto its full identifier, then looks that up in the
/// current summary index.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortNameResolver;

impl InfoResolver for ShortNameResolver {
    fn name(&self) -> &'static str {
        "short-name"
    }

    fn resolve(
        &self,
        views: &dyn ViewClient,
        flowcell: &str,
    ) -> Result<Option<FlowcellSummary>, FlowcellError> {
        let Some(full_id) = first_value(views, Source::Current, SHORT_NAME_VIEW, flowcell)? else {
            return Ok(None);
        };
        let Some(full_id) = full_id.as_str() else {
            return Err(FlowcellError::MalformedUpstream(format!(
                "short name {flowcell} maps to non-string identifier {full_id}"
            )));
        };
        SummaryIndexResolver {
            source: Source::Current,
            view: CURRENT_INFO_VIEW,
        }
        .resolve(views, full_id)
    }
}

/// Resolvers tried in order until one produces a summary.
pub struct ResolverChain {
    steps: Vec<Box<dyn InfoResolver>>,
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl ResolverChain {
    pub fn new(steps: Vec<Box<dyn InfoResolver>>) -> Self {
        Self { steps }
    }

    /// Current full id, then legacy full id, then short name.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(SummaryIndexResolver {
                source: Source::Current,
                view: CURRENT_INFO_VIEW,
            }),
            Box::new(SummaryIndexResolver {
                source: Source::Legacy,
                view: LEGACY_INFO_VIEW,
            }),
            Box::new(ShortNameResolver),
        ])
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn resolve(
        &self,
        views: &dyn ViewClient,
        flowcell: &str,
    ) -> Result<Option<FlowcellSummary>, FlowcellError> {
        for step in &self.steps {
            if let Some(summary) = step.resolve(views, flowcell)? {
                tracing::debug!(flowcell, resolver = step.name(), "flowcell info resolved");
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }
}

pub fn get_flowcell_info(
    views: &dyn ViewClient,
    flowcell: &str,
) -> Result<Option<FlowcellSummary>, FlowcellError> {
    ResolverChain::standard().resolve(views, flowcell)
}

/// Brief summary of one flowcell from the current summary index.
pub fn legacy_flowcell_info(
    views: &dyn ViewClient,
    flowcell: &str,
) -> Result<Option<Value>, FlowcellError> {
    first_value(views, Source::Current, SUMMARY_VIEW, flowcell)
}

fn first_value(
    views: &dyn ViewClient,
    source: Source,
    view: &str,
    key: &str,
) -> Result<Option<Value>, FlowcellError> {
    let rows = query_source(views, source, view, &ViewQuery::new().key(json!(key)))?;
    Ok(rows.into_iter().next().map(|row| row.value))
}
