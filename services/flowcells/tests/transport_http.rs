use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use flowcells::{
    FlowcellService,
    aggregate::{SUMMARY_VIEW, Source},
    clock::ManualClock,
    lanes::LaneStatKind,
    resolve::CURRENT_INFO_VIEW,
    samples::LANE_CLUSTERS_VIEW,
    search::ID_VIEW,
    transport::handle_http_request_bytes,
};
use lims::{ContainerRecord, InMemoryLims};
use serde_json::{Value, json};
use views::{InMemoryViews, Reducer};

const FLOWCELL: &str = "190412_AHCVWGCCXY";

struct Fixture {
    service: FlowcellService,
    lims: Arc<InMemoryLims>,
    clock: Arc<ManualClock>,
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 6, 3)
        .unwrap()
        .and_hms_micro_opt(8, 15, 0, 42)
        .unwrap()
}

fn fixture() -> Fixture {
    let views = Arc::new(InMemoryViews::new());
    views.insert_row(
        &Source::Current.index(CURRENT_INFO_VIEW),
        json!(FLOWCELL),
        json!({"startdate": "190412", "pid_list": ["P1001"]}),
    );
    views.insert_row(
        &Source::Current.index(SUMMARY_VIEW),
        json!(FLOWCELL),
        json!({"startdate": "190412", "lane_info": {"2": {}, "1": {}}}),
    );
    views.insert_row(
        &Source::Current.index(SUMMARY_VIEW),
        json!("180101_BHAAAAAXX"),
        json!({"startdate": "180101"}),
    );
    views.insert_row(
        &Source::Current.index(ID_VIEW),
        json!("190412_ST-E00198_0345_AHCVWGCCXY"),
        Value::Null,
    );
    views.insert_row(
        &Source::Legacy.index(ID_VIEW),
        json!("151001_ST-E00198_0012_AHCVWGCCXX"),
        Value::Null,
    );

    let q30 = Source::Legacy.index(LaneStatKind::Q30.view());
    views.define_view(q30.clone(), Some(Reducer::Stats));
    for (lane, value) in [("1", 88.0), ("1", 92.0), ("2", 75.5)] {
        views.insert_row(&q30, json!([FLOWCELL, "A", lane, "P1001_101"]), json!(value));
    }

    let clusters = Source::Current.index(LANE_CLUSTERS_VIEW);
    views.insert_row(
        &clusters,
        json!("P1001_101"),
        json!({"fcp": "190412_AHCVWGCCXY:2", "clusters": 200}),
    );
    views.insert_row(
        &clusters,
        json!("P1001_101"),
        json!({"fcp": "190412_AHCVWGCCXY:1", "clusters": 100}),
    );
    views.insert_row(&clusters, json!("P2002_101"), json!({"fcp": "x:1", "clusters": 5}));

    let lims = Arc::new(InMemoryLims::new());
    lims.insert_container(ContainerRecord::new("HCVWGCCXY"));
    let clock = Arc::new(ManualClock::new(start()));
    let service = FlowcellService::new(views, lims.clone(), lims.clone()).with_clock(clock.clone());
    Fixture {
        service,
        lims,
        clock,
    }
}

fn get(target: &str) -> Vec<u8> {
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").into_bytes()
}

fn post_form(target: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {target} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nX-User-Name: Ada Lovelace\r\nX-User-Email: ada@example.org\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn send(service: &FlowcellService, raw: &[u8]) -> (String, String) {
    let response = handle_http_request_bytes(service, raw).unwrap();
    let text = String::from_utf8(response).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    let status_line = head.lines().next().unwrap().to_string();
    (status_line, body.to_string())
}

fn json_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

#[test]
fn health_reports_ok() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get("/health"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(json_body(&body), json!({"status": "ok"}));
}

#[test]
fn running_notes_round_trip_newest_first() {
    let fx = fixture();
    let target = format!("/api/v1/flowcell_notes/{FLOWCELL}");
    let (status, body) = send(&fx.service, &post_form(&target, "note=first+pass&category=Flowcell"));
    assert_eq!(status, "HTTP/1.1 201 Created");
    assert_eq!(
        json_body(&body),
        json!({
            "user": "Ada Lovelace",
            "email": "ada@example.org",
            "note": "first pass",
            "category": "Flowcell",
        })
    );

    fx.clock.advance(TimeDelta::minutes(5));
    let (status, _) = send(&fx.service, &post_form(&target, "note=second"));
    assert_eq!(status, "HTTP/1.1 201 Created");

    let (status, body) = send(&fx.service, &get(&target));
    assert_eq!(status, "HTTP/1.1 200 OK");
    let notes = json_body(&body);
    let keys: Vec<&String> = notes.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["2019-06-03 08:20:00.000042", "2019-06-03 08:15:00.000042"]);
    assert_eq!(notes["2019-06-03 08:20:00.000042"]["note"], json!("second"));
    assert_eq!(fx.lims.persist_total(), 2);

    let posted = fx.lims.posted_project_notes();
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].project_id, "P1001");
    assert!(posted[0].text.ends_with(":*\nfirst pass"));
}

#[test]
fn empty_note_is_rejected_without_writing() {
    let fx = fixture();
    let target = format!("/api/v1/flowcell_notes/{FLOWCELL}");
    let (status, body) = send(&fx.service, &post_form(&target, "note=&category=Flowcell"));
    assert_eq!(status, "HTTP/1.1 400 Bad Request");
    assert_eq!(body, "No note parameters found");
    assert_eq!(fx.lims.persist_total(), 0);
    assert!(fx.lims.posted_project_notes().is_empty());
}

#[test]
fn unknown_flowcell_rejects_writes_and_reads_empty() {
    let fx = fixture();
    let target = "/api/v1/flowcell_notes/190412_AUNKNOWNXX";
    let (status, body) = send(&fx.service, &post_form(target, "note=hello"));
    assert_eq!(status, "HTTP/1.1 400 Bad Request");
    assert_eq!(body, "Flowcell not found");

    let (status, body) = send(&fx.service, &get(target));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, "{}");

    let (status, body) = send(&fx.service, &get("/api/v1/links/190412_AUNKNOWNXX"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, "{}");
}

#[test]
fn flowcell_info_is_null_when_no_index_knows_the_id() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get("/api/v1/flowcell_info2/190101_AMISSINGXX"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(body, "null");

    let (_, body) = send(&fx.service, &get(&format!("/api/v1/flowcell_info2/{FLOWCELL}")));
    assert_eq!(json_body(&body)["pid_list"], json!(["P1001"]));
}

#[test]
fn search_lists_current_hits_before_legacy() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get("/api/v1/flowcell_search/st-e00198"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(
        json_body(&body),
        json!([
            {"url": "/flowcells/190412_AHCVWGCCXY", "name": "190412_ST-E00198_0345_AHCVWGCCXY"},
            {"url": "/flowcells/151001_AHCVWGCCXX", "name": "151001_ST-E00198_0012_AHCVWGCCXX"},
        ])
    );

    let (_, body) = send(&fx.service, &get("/api/v1/flowcell_search/"));
    assert_eq!(json_body(&body), json!([]));
}

#[test]
fn q30_reports_the_mean_per_lane() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get(&format!("/api/v1/flowcell_q30/{FLOWCELL}")));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(json_body(&body), json!({"1": 90.0, "2": 75.5}));
}

#[test]
fn links_round_trip_grouped_by_type() {
    let fx = fixture();
    let target = format!("/api/v1/links/{FLOWCELL}");
    let (status, body) = send(
        &fx.service,
        &post_form(&target, "type=Warning&title=Low+yield&url=https%3A%2F%2Fexample.org&desc=lane+3"),
    );
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert_eq!(json_body(&body).as_object().unwrap().len(), 1);

    fx.clock.advance(TimeDelta::seconds(1));
    send(&fx.service, &post_form(&target, "type=Deviation&title=Reagent+lot"));

    let (_, body) = send(&fx.service, &get(&target));
    let links = json_body(&body);
    let types: Vec<&Value> = links.as_object().unwrap().values().map(|link| &link["type"]).collect();
    assert_eq!(types, vec![&json!("Deviation"), &json!("Warning")]);
    let warning = links["2019-06-03 08:15:00.000042"].clone();
    assert_eq!(warning["url"], json!("https://example.org"));
    assert_eq!(warning["user"], json!("Ada Lovelace"));
}

#[test]
fn link_without_title_is_rejected() {
    let fx = fixture();
    let (status, body) = send(
        &fx.service,
        &post_form(&format!("/api/v1/links/{FLOWCELL}"), "type=Warning"),
    );
    assert_eq!(status, "HTTP/1.1 400 Bad Request");
    assert_eq!(body, "Link title and type is required");
    assert_eq!(fx.lims.persist_total(), 0);
}

#[test]
fn flowcells_page_lists_recent_runs_and_all_on_request() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get("/flowcells"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    assert!(body.contains(&format!("<a href=\"/flowcells/{FLOWCELL}\">{FLOWCELL}</a>")));
    assert!(body.contains("2019-04-12"));
    assert!(!body.contains("180101_BHAAAAAXX"));

    let (_, body) = send(&fx.service, &get("/flowcells?all=true"));
    assert!(body.contains("180101_BHAAAAAXX"));
}

#[test]
fn reads_total_page_groups_runs_by_sample() {
    let fx = fixture();
    let (status, body) = send(&fx.service, &get("/reads_total/P1001"));
    assert_eq!(status, "HTTP/1.1 200 OK");
    let first = body.find("190412_AHCVWGCCXY:1").unwrap();
    let second = body.find("190412_AHCVWGCCXY:2").unwrap();
    assert!(first < second);
    assert!(!body.contains("P2002_101"));
}

#[test]
fn unsupported_method_is_rejected() {
    let fx = fixture();
    let raw = b"DELETE /api/v1/flowcell_notes/190412_AHCVWGCCXY HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let (status, _) = send(&fx.service, raw);
    assert_eq!(status, "HTTP/1.1 405 Method Not Allowed");

    let (status, _) = send(&fx.service, &post_form("/api/v1/flowcells", "x=1"));
    assert_eq!(status, "HTTP/1.1 405 Method Not Allowed");
}

#[test]
fn oversized_body_is_refused_before_routing() {
    let fx = fixture();
    let raw = "POST /api/v1/flowcell_notes/190412_AHCVWGCCXY HTTP/1.1\r\nContent-Length: 2097152\r\n\r\n";
    let err = handle_http_request_bytes(&fx.service, raw.as_bytes()).unwrap_err();
    assert!(err.contains("max body size"));
    assert_eq!(fx.lims.persist_total(), 0);
}

#[test]
fn form_body_overrides_query_parameters() {
    let fx = fixture();
    let target = format!("/api/v1/flowcell_notes/{FLOWCELL}?note=from+query&category=Workset");
    let (status, body) = send(&fx.service, &post_form(&target, "note=from+body"));
    assert_eq!(status, "HTTP/1.1 201 Created");
    let note = json_body(&body);
    assert_eq!(note["note"], json!("from body"));
    assert_eq!(note["category"], json!("Workset"));
}

#[test]
fn whitespace_note_is_stored() {
    let fx = fixture();
    let target = format!("/api/v1/flowcell_notes/{FLOWCELL}");
    let (status, body) = send(&fx.service, &post_form(&target, "note=+"));
    assert_eq!(status, "HTTP/1.1 201 Created");
    assert_eq!(json_body(&body)["note"], json!(" "));
    assert_eq!(fx.lims.persist_total(), 1);
}
