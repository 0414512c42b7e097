use schema::YIELD_THRESHOLDS;
use serde_json::{Map, Value};

use crate::{aggregate::FlowcellListing, error::FlowcellError};

/// Pages the service hands to a renderer.
#[derive(Debug, Clone, Copy)]
pub enum Page<'a> {
    FlowcellList {
        listing: &'a FlowcellListing,
        include_all: bool,
    },
    FlowcellDetail {
        flowcell: &'a str,
    },
    ReadsTotal {
        query: &'a str,
        data: &'a Map<String, Value>,
    },
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, page: &Page<'_>) -> Result<String, FlowcellError>;
}

/// Self-contained HTML pages. Page data is embedded as JSON for the
/// dashboard scripts alongside a plain table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicHtmlRenderer;

impl PageRenderer for BasicHtmlRenderer {
    fn render(&self, page: &Page<'_>) -> Result<String, FlowcellError> {
        match page {
            Page::FlowcellList {
                listing,
                include_all,
            } => render_listing(listing, *include_all),
            Page::FlowcellDetail { flowcell } => Ok(render_detail(flowcell)),
            Page::ReadsTotal { query, data } => render_reads_total(query, data),
        }
    }
}

fn render_listing(listing: &FlowcellListing, include_all: bool) -> Result<String, FlowcellError> {
    let thresholds: Map<String, Value> = YIELD_THRESHOLDS
        .iter()
        .map(|(mode, reads)| (mode.to_string(), Value::from(*reads)))
        .collect();

    let mut rows = String::new();
    for (id, summary) in listing.iter() {
        let lanes = summary.lane_info.as_ref().map_or(0, Map::len);
        rows.push_str(&format!(
            "<tr><td><a href=\"/flowcells/{href}\">{id}</a></td><td>{date}</td><td>{lanes}</td></tr>\n",
            href = html_escape(id),
            id = html_escape(id),
            date = html_escape(summary.startdate.as_deref().unwrap_or_default()),
        ));
    }
    let toggle = if include_all {
        "<a href=\"/flowcells\">Show recent flowcells</a>"
    } else {
        "<a href=\"/flowcells?all=true\">Show all flowcells</a>"
    };

    Ok(format!(
        "<!DOCTYPE html>\n<html><head><title>Flowcells</title></head><body>\n<h1>Flowcells</h1>\n<p>{toggle}</p>\n<table>\n<tr><th>Flowcell</th><th>Start date</th><th>Lanes</th></tr>\n{rows}</table>\n{thresholds}{flowcells}</body></html>\n",
        thresholds = json_script("yield-thresholds", &Value::Object(thresholds))?,
        flowcells = json_script("flowcells", &serde_json::to_value(listing)?)?,
    ))
}

fn render_detail(flowcell: &str) -> String {
    let id = html_escape(flowcell);
    format!(
        "<!DOCTYPE html>\n<html><head><title>Flowcell {id}</title></head><body data-flowcell=\"{id}\">\n<h1>{id}</h1>\n<div id=\"flowcell-info\" data-src=\"/api/v1/flowcell_info2/{id}\"></div>\n<div id=\"sample-runs\" data-src=\"/api/v1/flowcells/{id}\"></div>\n<div id=\"running-notes\" data-src=\"/api/v1/flowcell_notes/{id}\"></div>\n<div id=\"links\" data-src=\"/api/v1/links/{id}\"></div>\n</body></html>\n"
    )
}

fn render_reads_total(query: &str, data: &Map<String, Value>) -> Result<String, FlowcellError> {
    let mut rows = String::new();
    for (sample, runs) in data {
        for run in runs.as_array().into_iter().flatten() {
            rows.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(sample),
                html_escape(&field_text(run, "fcp")),
                html_escape(&field_text(run, "clusters")),
            ));
        }
    }
    Ok(format!(
        "<!DOCTYPE html>\n<html><head><title>Reads total</title></head><body>\n<h1>Reads total: {query}</h1>\n<table>\n<tr><th>Sample</th><th>Flowcell lane</th><th>Clusters</th></tr>\n{rows}</table>\n{data}</body></html>\n",
        query = html_escape(query),
        data = json_script("reads-data", &Value::Object(data.clone()))?,
    ))
}

fn field_text(run: &Value, field: &str) -> String {
    match run.get(field) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn json_script(id: &str, value: &Value) -> Result<String, FlowcellError> {
    let body = serde_json::to_string(value)
        .map_err(|err| FlowcellError::Render(format!("{id}: {err}")))?
        .replace("</", "<\\/");
    Ok(format!(
        "<script type=\"application/json\" id=\"{id}\">{body}</script>\n"
    ))
}

pub fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
