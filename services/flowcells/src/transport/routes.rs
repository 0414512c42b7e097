use std::collections::HashMap;

use schema::{Author, LinkRequest, NoteRequest};
use serde::Serialize;

use super::{
    HttpRequest, HttpResponse, SharedMetrics, TransportMetrics,
    http::{decode_path_segment, request_params, split_target},
    map_flowcell_error,
};
use crate::{FlowcellService, error::FlowcellError, lanes::LaneStatKind, render::Page};

const NOTE_REQUIRED_MESSAGE: &str = "No note parameters found";
const LINK_REQUIRED_MESSAGE: &str = "Link title and type is required";
const FLOWCELL_NOT_FOUND_MESSAGE: &str = "Flowcell not found";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Health,
    Metrics,
    FlowcellsPage,
    FlowcellPage(String),
    BriefSummaries,
    FlowcellInfo(String),
    LegacyFlowcellInfo(String),
    Search(String),
    SampleRuns(String),
    LaneStats(String, LaneStatKind),
    Notes(String),
    Links(String),
    ReadsTotal(String),
}

impl Route {
    fn accepts_post(&self) -> bool {
        matches!(self, Self::Notes(_) | Self::Links(_))
    }
}

fn parse_route(path: &str) -> Option<Result<Route, String>> {
    let exact = match path {
        "/health" => Some(Route::Health),
        "/metrics" => Some(Route::Metrics),
        "/flowcells" => Some(Route::FlowcellsPage),
        "/api/v1/flowcells" => Some(Route::BriefSummaries),
        _ => None,
    };
    if let Some(route) = exact {
        return Some(Ok(route));
    }

    let prefixed: [(&str, fn(String) -> Route); 11] = [
        ("/flowcells/", Route::FlowcellPage),
        ("/api/v1/flowcells/", Route::SampleRuns),
        ("/api/v1/flowcell_info2/", Route::FlowcellInfo),
        ("/api/v1/flowcell_info/", Route::LegacyFlowcellInfo),
        ("/api/v1/flowcell_search/", Route::Search),
        ("/api/v1/flowcell_qc/", |id| Route::LaneStats(id, LaneStatKind::Qc)),
        ("/api/v1/flowcell_demultiplex/", |id| {
            Route::LaneStats(id, LaneStatKind::Demultiplex)
        }),
        ("/api/v1/flowcell_q30/", |id| Route::LaneStats(id, LaneStatKind::Q30)),
        ("/api/v1/flowcell_notes/", Route::Notes),
        ("/api/v1/links/", Route::Links),
        ("/reads_total/", Route::ReadsTotal),
    ];
    for (prefix, build) in prefixed {
        if let Some(raw) = path.strip_prefix(prefix)
            && !raw.contains('/')
        {
            return Some(decode_path_segment(raw).map(build));
        }
    }
    None
}

pub(crate) fn handle_request(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    request: &HttpRequest,
) -> HttpResponse {
    let response = route_request(service, metrics, request);
    if let Ok(mut guard) = metrics.lock() {
        guard.observe_response(response.status);
    }
    response
}

fn route_request(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    request: &HttpRequest,
) -> HttpResponse {
    let (path, query) = split_target(&request.target);
    let route = match parse_route(&path) {
        Some(Ok(route)) => route,
        Some(Err(err)) => return HttpResponse::bad_request(&err),
        None => return HttpResponse::not_found("not found"),
    };

    match request.method.as_str() {
        "GET" => handle_get(service, metrics, route, &query),
        "POST" if route.accepts_post() => {
            let params = request_params(request, query);
            let author = author_from_headers(&request.headers);
            handle_post(service, metrics, route, &params, &author)
        }
        _ => HttpResponse::method_not_allowed("method not allowed"),
    }
}

fn handle_get(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    route: Route,
    query: &HashMap<String, String>,
) -> HttpResponse {
    match route {
        Route::Health => HttpResponse::ok_json("{\"status\":\"ok\"}".to_string()),
        Route::Metrics => {
            let body = match metrics.lock() {
                Ok(guard) => guard.metrics_text(service),
                Err(_) => "status_flowcells_metrics_unavailable 1\n".to_string(),
            };
            HttpResponse::ok_metrics(body)
        }
        Route::FlowcellsPage => {
            let include_all = query.get("all").is_some_and(|raw| flag_enabled(raw));
            html_page(service.list_summaries(include_all).and_then(|listing| {
                service.render(&Page::FlowcellList {
                    listing: &listing,
                    include_all,
                })
            }))
        }
        Route::FlowcellPage(flowcell) => {
            html_page(service.render(&Page::FlowcellDetail {
                flowcell: &flowcell,
            }))
        }
        Route::BriefSummaries => json_result(service.list_brief_summaries()),
        Route::FlowcellInfo(flowcell) => json_result(service.flowcell_info(&flowcell)),
        Route::LegacyFlowcellInfo(flowcell) => {
            json_result(service.legacy_flowcell_info(&flowcell))
        }
        Route::Search(text) => json_result(service.search(&text)),
        Route::SampleRuns(flowcell) => json_result(service.sample_runs(&flowcell)),
        Route::LaneStats(flowcell, kind) => json_result(service.lane_values(&flowcell, kind)),
        Route::Notes(flowcell) => json_or_empty_object(service.running_notes(&flowcell)),
        Route::Links(flowcell) => json_or_empty_object(service.external_links(&flowcell)),
        Route::ReadsTotal(text) => html_page(service.reads_total(&text).and_then(|data| {
            service.render(&Page::ReadsTotal {
                query: &text,
                data: &data,
            })
        })),
    }
}

fn handle_post(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    route: Route,
    params: &HashMap<String, String>,
    author: &Author,
) -> HttpResponse {
    let param = |name: &str| params.get(name).cloned().unwrap_or_default();
    match route {
        Route::Notes(flowcell) => {
            let request = NoteRequest {
                note: param("note"),
                category: params.get("category").cloned(),
            };
            match service.append_note(&flowcell, &request, author) {
                Ok(note) => {
                    observe(metrics, TransportMetrics::observe_note_added);
                    serialize(&note).map_or_else(error_response, HttpResponse::created_json)
                }
                Err(err) => write_error(&err, NOTE_REQUIRED_MESSAGE),
            }
        }
        Route::Links(flowcell) => {
            let request = LinkRequest {
                link_type: param("type"),
                title: param("title"),
                url: param("url"),
                desc: param("desc"),
            };
            match service.append_link(&flowcell, &request, author) {
                Ok(links) => {
                    observe(metrics, TransportMetrics::observe_link_added);
                    json_result(Ok(links))
                }
                Err(err) => write_error(&err, LINK_REQUIRED_MESSAGE),
            }
        }
        _ => HttpResponse::method_not_allowed("method not allowed"),
    }
}

fn observe(metrics: &SharedMetrics, update: fn(&mut TransportMetrics)) {
    if let Ok(mut guard) = metrics.lock() {
        update(&mut *guard);
    }
}

/// Identity forwarded by the authenticating proxy in front of the dashboard.
fn author_from_headers(headers: &HashMap<String, String>) -> Author {
    let defaults = Author::default();
    Author {
        name: headers
            .get("x-user-name")
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .unwrap_or(defaults.name),
        email: headers.get("x-user-email").cloned().unwrap_or(defaults.email),
    }
}

/// Any non-empty value switches the flag on, `all=false` included.
fn flag_enabled(raw: &str) -> bool {
    !raw.is_empty()
}

fn serialize<T: Serialize>(value: &T) -> Result<String, FlowcellError> {
    Ok(serde_json::to_string(value)?)
}

fn json_result<T: Serialize>(result: Result<T, FlowcellError>) -> HttpResponse {
    match result.and_then(|value| serialize(&value)) {
        Ok(body) => HttpResponse::ok_json(body),
        Err(err) => error_response(err),
    }
}

fn json_or_empty_object<T: Serialize>(result: Result<T, FlowcellError>) -> HttpResponse {
    match result {
        Err(err) if err.is_not_found() => HttpResponse::ok_json("{}".to_string()),
        other => json_result(other),
    }
}

fn html_page(result: Result<String, FlowcellError>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::ok_html(body),
        Err(err) => error_response(err),
    }
}

fn write_error(err: &FlowcellError, validation_message: &str) -> HttpResponse {
    match err {
        FlowcellError::Validation(_) => HttpResponse::bad_request_text(validation_message),
        FlowcellError::NotFound(_) => HttpResponse::bad_request_text(FLOWCELL_NOT_FOUND_MESSAGE),
        other => {
            let (status, message) = map_flowcell_error(other);
            HttpResponse::error_with_status(status, &message)
        }
    }
}

fn error_response(err: FlowcellError) -> HttpResponse {
    let (status, message) = map_flowcell_error(&err);
    HttpResponse::error_with_status(status, &message)
}
