use std::{
    collections::HashMap,
    net::{TcpListener, TcpStream},
    sync::{Arc, Mutex, mpsc},
    time::{Duration, Instant},
};

use tracing::{error, warn};

use crate::{FlowcellService, error::FlowcellError};

mod http;
mod routes;

use http::{
    declared_body_len, parse_headers, parse_request_line, read_http_request, render_response_text,
    write_response,
};
pub(crate) use routes::handle_request;

pub(crate) const MAX_HTTP_BODY_BYTES: usize = 1024 * 1024;
const SOCKET_TIMEOUT_SECS: u64 = 5;
const DEFAULT_HTTP_WORKERS: usize = 4;

pub(crate) type SharedMetrics = Arc<Mutex<TransportMetrics>>;

#[derive(Debug, Clone)]
pub(crate) struct TransportMetrics {
    requests_total: u64,
    client_errors_total: u64,
    server_errors_total: u64,
    notes_added_total: u64,
    links_added_total: u64,
    started_at: Instant,
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self {
            requests_total: 0,
            client_errors_total: 0,
            server_errors_total: 0,
            notes_added_total: 0,
            links_added_total: 0,
            started_at: Instant::now(),
        }
    }
}

impl TransportMetrics {
    pub(crate) fn shared() -> SharedMetrics {
        Arc::new(Mutex::new(Self::default()))
    }

    fn observe_response(&mut self, status: u16) {
        self.requests_total += 1;
        match status {
            400..=499 => self.client_errors_total += 1,
            500..=599 => self.server_errors_total += 1,
            _ => {}
        }
    }

    fn observe_note_added(&mut self) {
        self.notes_added_total += 1;
    }

    fn observe_link_added(&mut self) {
        self.links_added_total += 1;
    }

    fn metrics_text(&self, service: &FlowcellService) -> String {
        format!(
            "# TYPE status_flowcells_requests_total counter\n\
status_flowcells_requests_total {}\n\
# TYPE status_flowcells_client_errors_total counter\n\
status_flowcells_client_errors_total {}\n\
# TYPE status_flowcells_server_errors_total counter\n\
status_flowcells_server_errors_total {}\n\
# TYPE status_flowcells_notes_added_total counter\n\
status_flowcells_notes_added_total {}\n\
# TYPE status_flowcells_links_added_total counter\n\
status_flowcells_links_added_total {}\n\
# TYPE status_flowcells_search_cache_refresh_total counter\n\
status_flowcells_search_cache_refresh_total {}\n\
# TYPE status_flowcells_search_cache_hit_total counter\n\
status_flowcells_search_cache_hit_total {}\n\
# TYPE status_flowcells_uptime_seconds gauge\n\
status_flowcells_uptime_seconds {:.4}\n",
            self.requests_total,
            self.client_errors_total,
            self.server_errors_total,
            self.notes_added_total,
            self.links_added_total,
            service.search_cache().refresh_total(),
            service.search_cache().hit_total(),
            self.started_at.elapsed().as_secs_f64()
        )
    }
}

pub fn serve_http(service: FlowcellService, bind_addr: &str) -> std::io::Result<()> {
    serve_http_with_workers(service, bind_addr, DEFAULT_HTTP_WORKERS)
}

pub fn serve_http_with_workers(
    service: FlowcellService,
    bind_addr: &str,
    worker_count: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    let worker_count = worker_count.max(1);
    let service = Arc::new(service);
    let metrics = TransportMetrics::shared();
    let (tx, rx) = mpsc::channel::<TcpStream>();
    let rx = Arc::new(Mutex::new(rx));

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let service = Arc::clone(&service);
            let metrics = Arc::clone(&metrics);
            let rx = Arc::clone(&rx);
            scope.spawn(move || {
                loop {
                    let stream = {
                        let guard = match rx.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        match guard.recv() {
                            Ok(stream) => stream,
                            Err(_) => break,
                        }
                    };
                    if let Err(err) = handle_connection(&service, &metrics, stream) {
                        warn!(error = %err, "flowcells transport error");
                    }
                }
            });
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if tx.send(stream).is_err() {
                        error!("flowcells transport worker queue closed");
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "flowcells transport accept error"),
            }
        }
        drop(tx);
    });

    Ok(())
}

/// Parses one raw HTTP/1.1 request, routes it, and returns the raw response.
pub fn handle_http_request_bytes(
    service: &FlowcellService,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let metrics = TransportMetrics::shared();
    handle_http_request_bytes_with_metrics(service, &metrics, raw_request)
}

pub(crate) fn handle_http_request_bytes_with_metrics(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let request_text =
        std::str::from_utf8(raw_request).map_err(|_| "request must be valid UTF-8".to_string())?;
    let (header_block, body) = request_text
        .split_once("\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;

    let mut lines = header_block.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;
    let headers = parse_headers(lines)?;
    if declared_body_len(&headers)? != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    let request = HttpRequest {
        method,
        target,
        headers,
        body: body.as_bytes().to_vec(),
    };
    let response = handle_request(service, metrics, &request);
    Ok(render_response_text(&response).into_bytes())
}

fn handle_connection(
    service: &FlowcellService,
    metrics: &SharedMetrics,
    mut stream: TcpStream,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;
    stream.set_write_timeout(Some(Duration::from_secs(SOCKET_TIMEOUT_SECS)))?;

    let request = match read_http_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(err) => return write_response(&mut stream, HttpResponse::bad_request(&err)),
    };

    let response = handle_request(service, metrics, &request);
    write_response(&mut stream, response)
}

/// Status and message for a failed service call. Read endpoints degrade
/// not-found to an empty body before reaching this.
fn map_flowcell_error(error: &FlowcellError) -> (u16, String) {
    let status = error.status();
    if status >= 500 {
        error!(error = %error, "flowcells request failed");
    }
    (status, error.to_string())
}

/// Header map in the shape the router reads: lowercased names, trimmed values.
pub(crate) fn normalize_headers<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) content_type: &'static str,
    pub(crate) body: String,
}

impl HttpResponse {
    fn ok_json(body: String) -> Self {
        Self::json_with_status(200, body)
    }

    fn created_json(body: String) -> Self {
        Self::json_with_status(201, body)
    }

    fn json_with_status(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    fn ok_html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn ok_metrics(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4; charset=utf-8",
            body,
        }
    }

    /// Plain-text 400 used by the annotation write endpoints.
    fn bad_request_text(message: &str) -> Self {
        Self {
            status: 400,
            content_type: "text/plain; charset=utf-8",
            body: message.to_string(),
        }
    }

    pub(crate) fn bad_request(message: &str) -> Self {
        Self::error_with_status(400, message)
    }

    fn not_found(message: &str) -> Self {
        Self::error_with_status(404, message)
    }

    fn method_not_allowed(message: &str) -> Self {
        Self::error_with_status(405, message)
    }

    fn error_with_status(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }
}
