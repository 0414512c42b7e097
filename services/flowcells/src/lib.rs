pub mod aggregate;
pub mod annotations;
pub mod clock;
pub mod config;
pub mod error;
pub mod lanes;
pub mod render;
pub mod resolve;
pub mod samples;
pub mod search;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use std::{sync::Arc, time::Duration};

use lims::{ProjectNotes, RecordStore};
use schema::{Author, FlowcellSummary, LinkRequest, NoteRequest, RunningNote, SearchHit};
use serde_json::{Map, Value};
use views::ViewClient;

use crate::{
    aggregate::FlowcellListing,
    clock::{Clock, SystemClock},
    config::DEFAULT_RECENT_MONTHS,
    error::FlowcellError,
    lanes::LaneStatKind,
    render::{BasicHtmlRenderer, Page, PageRenderer},
    resolve::ResolverChain,
    search::SearchCache,
};

/// Top-level context shared by every request: the external clients, the
/// search cache and the page renderer.
pub struct FlowcellService {
    views: Arc<dyn ViewClient>,
    records: Arc<dyn RecordStore>,
    project_notes: Arc<dyn ProjectNotes>,
    clock: Arc<dyn Clock>,
    search_cache: SearchCache,
    resolvers: ResolverChain,
    renderer: Box<dyn PageRenderer>,
    recent_months: u32,
}

impl FlowcellService {
    pub fn new(
        views: Arc<dyn ViewClient>,
        records: Arc<dyn RecordStore>,
        project_notes: Arc<dyn ProjectNotes>,
    ) -> Self {
        Self {
            views,
            records,
            project_notes,
            clock: Arc::new(SystemClock),
            search_cache: SearchCache::default(),
            resolvers: ResolverChain::standard(),
            renderer: Box::new(BasicHtmlRenderer),
            recent_months: DEFAULT_RECENT_MONTHS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_search_cache_ttl(mut self, ttl: Duration) -> Self {
        self.search_cache = SearchCache::new(ttl);
        self
    }

    pub fn with_recent_months(mut self, months: u32) -> Self {
        self.recent_months = months.max(1);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_resolvers(mut self, resolvers: ResolverChain) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn views(&self) -> &dyn ViewClient {
        self.views.as_ref()
    }

    pub fn views_arc(&self) -> Arc<dyn ViewClient> {
        Arc::clone(&self.views)
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    pub fn project_notes(&self) -> &dyn ProjectNotes {
        self.project_notes.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn search_cache(&self) -> &SearchCache {
        &self.search_cache
    }

    pub fn recent_months(&self) -> u32 {
        self.recent_months
    }

    pub fn list_summaries(&self, include_all: bool) -> Result<FlowcellListing, FlowcellError> {
        aggregate::list_summaries(
            self.views(),
            include_all,
            self.clock.now().date(),
            self.recent_months,
        )
    }

    pub fn list_brief_summaries(&self) -> Result<Map<String, Value>, FlowcellError> {
        aggregate::list_brief_summaries(self.views())
    }

    pub fn flowcell_info(&self, flowcell: &str) -> Result<Option<FlowcellSummary>, FlowcellError> {
        self.resolvers.resolve(self.views(), flowcell)
    }

    pub fn legacy_flowcell_info(&self, flowcell: &str) -> Result<Option<Value>, FlowcellError> {
        resolve::legacy_flowcell_info(self.views(), flowcell)
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>, FlowcellError> {
        search::search_flowcells(&self.search_cache, self.views(), query, self.clock.now())
    }

    pub fn sample_runs(&self, flowcell: &str) -> Result<Vec<Value>, FlowcellError> {
        samples::sample_runs(self.views(), flowcell)
    }

    pub fn lane_values(
        &self,
        flowcell: &str,
        kind: LaneStatKind,
    ) -> Result<Map<String, Value>, FlowcellError> {
        lanes::lane_values(self.views(), flowcell, kind)
    }

    pub fn reads_total(&self, query: &str) -> Result<Map<String, Value>, FlowcellError> {
        samples::reads_total(self.views(), query)
    }

    pub fn running_notes(&self, flowcell: &str) -> Result<Map<String, Value>, FlowcellError> {
        annotations::running_notes(self, flowcell)
    }

    pub fn append_note(
        &self,
        flowcell: &str,
        request: &NoteRequest,
        author: &Author,
    ) -> Result<RunningNote, FlowcellError> {
        annotations::append_note(self, flowcell, request, author)
    }

    pub fn external_links(&self, flowcell: &str) -> Result<Map<String, Value>, FlowcellError> {
        annotations::external_links(self, flowcell)
    }

    pub fn append_link(
        &self,
        flowcell: &str,
        request: &LinkRequest,
        author: &Author,
    ) -> Result<Map<String, Value>, FlowcellError> {
        annotations::append_link(self, flowcell, request, author)
    }

    pub fn render(&self, page: &Page<'_>) -> Result<String, FlowcellError> {
        self.renderer.render(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregate::Source, clock::ManualClock, search::ID_VIEW};
    use chrono::{NaiveDate, TimeDelta};
    use lims::InMemoryLims;
    use serde_json::json;
    use views::InMemoryViews;

    fn service_at(views: Arc<InMemoryViews>, clock: Arc<ManualClock>) -> FlowcellService {
        let lims = Arc::new(InMemoryLims::new());
        FlowcellService::new(views, lims.clone(), lims).with_clock(clock)
    }

    fn start() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 10, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn search_cache_follows_the_injected_clock() {
        let views = Arc::new(InMemoryViews::new());
        views.insert_row(&Source::Current.index(ID_VIEW), json!("190101_A"), Value::Null);
        let clock = Arc::new(ManualClock::new(start()));
        let service = service_at(views.clone(), clock.clone())
            .with_search_cache_ttl(Duration::from_secs(60));

        service.search("1901").unwrap();
        clock.advance(TimeDelta::seconds(30));
        service.search("1901").unwrap();
        assert_eq!(service.search_cache().refresh_total(), 1);

        clock.advance(TimeDelta::seconds(31));
        service.search("1901").unwrap();
        assert_eq!(service.search_cache().refresh_total(), 2);
        assert_eq!(views.query_count(&Source::Current.index(ID_VIEW)), 2);
    }

    #[test]
    fn recent_window_is_configurable() {
        let views = Arc::new(InMemoryViews::new());
        views.insert_row(
            &Source::Current.index(aggregate::SUMMARY_VIEW),
            json!("190301_BHGVLMDSXX"),
            json!({"startdate": "190301"}),
        );
        let clock = Arc::new(ManualClock::new(start()));
        let six = service_at(views.clone(), clock.clone());
        assert!(six.list_summaries(false).unwrap().is_empty());

        let twelve = service_at(views, clock).with_recent_months(12);
        assert_eq!(twelve.list_summaries(false).unwrap().len(), 1);
    }

    struct TitleOnly;

    impl PageRenderer for TitleOnly {
        fn render(&self, page: &Page<'_>) -> Result<String, FlowcellError> {
            Ok(match page {
                Page::FlowcellList { include_all, .. } => format!("list all={include_all}"),
                Page::FlowcellDetail { flowcell } => format!("detail {flowcell}"),
                Page::ReadsTotal { query, .. } => format!("reads {query}"),
            })
        }
    }

    #[test]
    fn pages_go_through_the_installed_renderer() {
        let clock = Arc::new(ManualClock::new(start()));
        let service =
            service_at(Arc::new(InMemoryViews::new()), clock).with_renderer(Box::new(TitleOnly));
        let page = service
            .render(&Page::FlowcellDetail {
                flowcell: "190412_AHCVWGCCXY",
            })
            .unwrap();
        assert_eq!(page, "detail 190412_AHCVWGCCXY");
    }

    struct Always;

    impl resolve::InfoResolver for Always {
        fn name(&self) -> &'static str {
            "always"
        }

        fn resolve(
            &self,
            _views: &dyn ViewClient,
            flowcell: &str,
        ) -> Result<Option<FlowcellSummary>, FlowcellError> {
            Ok(Some(FlowcellSummary {
                startdate: Some(flowcell[..6].to_string()),
                ..FlowcellSummary::default()
            }))
        }
    }

    #[test]
    fn flowcell_info_uses_the_installed_resolvers() {
        let clock = Arc::new(ManualClock::new(start()));
        let service = service_at(Arc::new(InMemoryViews::new()), clock)
            .with_resolvers(ResolverChain::new(vec![Box::new(Always)]));
        let info = service.flowcell_info("190412_AHCVWGCCXY").unwrap().unwrap();
        assert_eq!(info.startdate.as_deref(), Some("190412"));
    }

    #[test]
    fn default_resolvers_match_the_standard_lookup() {
        let views = Arc::new(InMemoryViews::new());
        views.insert_row(
            &Source::Current.index(resolve::CURRENT_INFO_VIEW),
            json!("190412_ST-E00214_0305_AHCVWGCCXY"),
            json!({"pid_list": ["P1001"]}),
        );
        let service = service_at(views.clone(), Arc::new(ManualClock::new(start())));
        let full = "190412_ST-E00214_0305_AHCVWGCCXY";
        let expected = resolve::get_flowcell_info(views.as_ref(), full).unwrap();
        assert!(expected.is_some());
        assert_eq!(service.flowcell_info(full).unwrap(), expected);
    }
}
