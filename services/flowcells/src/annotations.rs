use chrono::NaiveDateTime;
use lims::ContainerRecord;
use schema::{
    Author, ExternalLink, LINKS_FIELD, LinkRequest, NOTES_FIELD, NoteRequest, RunningNote,
    validate_link_request, validate_note_request,
};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{FlowcellService, error::FlowcellError};

const TIMESTAMP_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Key an annotation is stored under. Two writes in the same microsecond
/// share a key and the later one replaces the earlier.
pub fn timestamp_key(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_KEY_FORMAT).to_string()
}

/// Text cross-posted to each project of the flowcell.
pub fn project_note_text(flowcell: &str, note: &str) -> String {
    format!(
        "#####*Running note posted on flowcell <a href='/flowcells/{flowcell}'>{flowcell}</a>:*\n{note}"
    )
}

/// Running notes of a flowcell, newest first.
pub fn running_notes(
    service: &FlowcellService,
    flowcell: &str,
) -> Result<Map<String, Value>, FlowcellError> {
    let record = find_record(service, flowcell)?;
    let mut notes: Vec<(String, Value)> = read_blob(&record, NOTES_FIELD)?.into_iter().collect();
    notes.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(notes.into_iter().collect())
}

/// External links of a flowcell grouped by type, newest first within a type.
pub fn external_links(
    service: &FlowcellService,
    flowcell: &str,
) -> Result<Map<String, Value>, FlowcellError> {
    let record = find_record(service, flowcell)?;
    let mut links: Vec<(String, Value)> = read_blob(&record, LINKS_FIELD)?.into_iter().collect();
    links.sort_by(|a, b| b.0.cmp(&a.0));
    links.sort_by(|a, b| link_type(&a.1).cmp(link_type(&b.1)));
    Ok(links.into_iter().collect())
}

fn link_type(link: &Value) -> &str {
    link.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// Stores a running note on the flowcell's container and cross-posts it to
/// every project on the flowcell. Cross-posting happens after the container
/// write and its failures do not fail the request.
pub fn append_note(
    service: &FlowcellService,
    flowcell: &str,
    request: &NoteRequest,
    author: &Author,
) -> Result<RunningNote, FlowcellError> {
    validate_note_request(request)?;
    let mut record = find_record(service, flowcell)?;
    let projects = service
        .flowcell_info(flowcell)?
        .map(|summary| summary.project_ids().to_vec())
        .unwrap_or_default();

    let note = RunningNote {
        user: author.name.clone(),
        email: author.email.clone(),
        note: request.note.clone(),
        category: request.category().to_string(),
    };
    let key = timestamp_key(service.clock().now());
    insert_entry(&mut record, NOTES_FIELD, key, serde_json::to_value(&note)?)?;
    service.records().persist(&record)?;

    let text = project_note_text(flowcell, &note.note);
    for project in &projects {
        if let Err(err) = service.project_notes().post_project_note(
            project,
            &text,
            &note.category,
            &author.name,
            &author.email,
        ) {
            warn!(flowcell, project = %project, error = %err, "project note cross-post failed");
        }
    }
    info!(flowcell, projects = projects.len(), "running note added");
    Ok(note)
}

/// Stores an external link and returns every link now on the record.
pub fn append_link(
    service: &FlowcellService,
    flowcell: &str,
    request: &LinkRequest,
    author: &Author,
) -> Result<Map<String, Value>, FlowcellError> {
    validate_link_request(request)?;
    let mut record = find_record(service, flowcell)?;

    let link = ExternalLink {
        user: author.name.clone(),
        email: author.email.clone(),
        link_type: request.link_type.clone(),
        title: request.title.clone(),
        url: request.url.clone(),
        desc: request.desc.clone(),
    };
    let key = timestamp_key(service.clock().now());
    let links = insert_entry(&mut record, LINKS_FIELD, key, serde_json::to_value(&link)?)?;
    service.records().persist(&record)?;
    info!(flowcell, link_type = %link.link_type, "external link added");
    Ok(links)
}

fn find_record(service: &FlowcellService, flowcell: &str) -> Result<ContainerRecord, FlowcellError> {
    service
        .records()
        .resolve(flowcell)?
        .ok_or_else(|| FlowcellError::NotFound(flowcell.to_string()))
}

/// Parses a JSON-object field; an absent field is an empty mapping.
pub(crate) fn read_blob(record: &ContainerRecord, field: &str) -> Result<Map<String, Value>, FlowcellError> {
    match record.get_field(field) {
        None => Ok(Map::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|err| {
            FlowcellError::MalformedUpstream(format!(
                "container {} field {field}: {err}",
                record.name
            ))
        }),
    }
}

/// Adds one entry to a JSON-object field on the in-memory record and returns
/// the updated mapping. Nothing is persisted.
pub(crate) fn insert_entry(
    record: &mut ContainerRecord,
    field: &str,
    key: String,
    value: Value,
) -> Result<Map<String, Value>, FlowcellError> {
    let mut blob = read_blob(record, field)?;
    blob.insert(key, value);
    record.set_field(field, serde_json::to_string(&blob)?);
    Ok(blob)
}
