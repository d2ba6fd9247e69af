//! Step-oriented JSON API over per-session pipelines.
//!
//! [`App::handle`] takes a method, a URL and a body and returns an
//! [`ApiResponse`]; the tiny_http loop in the crate root only moves bytes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use leadscout_core::llm::truncate_chars;
use leadscout_core::snapshot::{SnapshotDocument, snapshot_filename};
use leadscout_core::{
    CONTACT_DISPLAY_FIELDS, ICP_DISPLAY_FIELDS, PROSPECT_DISPLAY_FIELDS, Pipeline, PipelineSettings,
    ProgressReporter, RunReport, Services, geographic_summary, parse_override, project, project_all,
    validate_icp,
};
use leadscout_scraper::{ScrapedSite, normalize_url};
use leadscout_shared::{ErrorKind, LeadScoutError, Result};

use crate::input::{InputPart, MULTI_INPUT_SOURCE, aggregate, raw_text_part};
use crate::session::{EnrichmentTask, Session, SessionStore, SharedSession, TaskStatus, new_id};

const PREVIEW_CHARS: usize = 500;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

impl ApiRequest {
    /// Split the URL and parse the body. An empty body reads as `{}`.
    pub fn parse(method: &str, url: &str, body: &str) -> Result<Self> {
        let (path, query_str) = url.split_once('?').unwrap_or((url, ""));
        let mut query = HashMap::new();
        for pair in query_str.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = urlencoding::decode(value)
                .map_err(|e| LeadScoutError::user_input(format!("bad query parameter {key}: {e}")))?;
            query.insert(key.to_string(), value.into_owned());
        }

        let body = if body.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(body)
                .map_err(|e| LeadScoutError::user_input(format!("request body is not JSON: {e}")))?
        };

        Ok(Self {
            method: method.to_uppercase(),
            path: path.trim_end_matches('/').to_string(),
            query,
            body,
        })
    }

    /// `session_id` from the body, else from the query string.
    pub fn session_id(&self) -> Option<String> {
        self.body
            .get("session_id")
            .and_then(Value::as_str)
            .or_else(|| self.query.get("session_id").map(String::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.body
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.body.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    /// File name when the body should be served as a download.
    pub attachment: Option<String>,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            attachment: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self {
            status: 404,
            body: json!({"error": format!("{what} not found"), "kind": "not_found"}),
            attachment: None,
        }
    }

    /// 400 for bad input, 500 for everything else.
    pub fn from_error(e: &LeadScoutError, session_id: Option<&str>) -> Self {
        let kind = e.kind();
        let status = if kind == ErrorKind::UserInput { 400 } else { 500 };
        let mut body = json!({"error": e.to_string(), "kind": kind});
        if let Some(id) = session_id {
            body["session_id"] = json!(id);
        }
        Self {
            status,
            body,
            attachment: None,
        }
    }

    /// Body text; downloads are pretty-printed.
    pub fn body_text(&self) -> String {
        if self.attachment.is_some() {
            serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| self.body.to_string())
        } else {
            self.body.to_string()
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| LeadScoutError::malformed(format!("response serialization failed: {e}")))
}

/// Echo the session id into an object body.
fn with_session(mut body: Value, session_id: &str) -> Value {
    body["session_id"] = json!(session_id);
    body
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// The serving layer: shared read-only providers plus the session store.
pub struct App {
    services: Services,
    settings: PipelineSettings,
    sessions: SessionStore,
    request_timeout: Duration,
}

impl App {
    pub fn new(services: Services, settings: PipelineSettings, request_timeout: Duration) -> Self {
        Self {
            services,
            settings,
            sessions: SessionStore::new(),
            request_timeout,
        }
    }

    /// Drop sessions idle for longer than `ttl`.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions = SessionStore::with_ttl(ttl);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn new_session(&self) -> (String, SharedSession) {
        let pipeline = Pipeline::new(self.services.clone(), self.settings.clone());
        self.sessions.insert(Session::new(pipeline))
    }

    fn session(&self, req: &ApiRequest) -> Result<(String, SharedSession)> {
        let id = req
            .session_id()
            .ok_or_else(|| LeadScoutError::user_input("missing session_id"))?;
        let session = self.sessions.get(&id)?;
        Ok((id, session))
    }

    /// The named session, or a new one when the request names none.
    fn session_or_new(&self, req: &ApiRequest) -> Result<(String, SharedSession)> {
        match req.session_id() {
            Some(_) => self.session(req),
            None => Ok(self.new_session()),
        }
    }

    /// Handle one raw request. Never fails; errors become error payloads.
    #[instrument(skip_all, fields(method = %method, url = %url))]
    pub async fn handle(&self, method: &str, url: &str, body: &str) -> ApiResponse {
        let req = match ApiRequest::parse(method, url, body) {
            Ok(req) => req,
            Err(e) => return ApiResponse::from_error(&e, None),
        };

        let response = match tokio::time::timeout(self.request_timeout, self.dispatch(&req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(path = %req.path, error = %e, "request failed");
                ApiResponse::from_error(&e, req.session_id().as_deref())
            }
            Err(_) => {
                let e = LeadScoutError::Network(format!(
                    "request exceeded {}s",
                    self.request_timeout.as_secs()
                ));
                warn!(path = %req.path, "request timed out");
                let mut response = ApiResponse::from_error(&e, req.session_id().as_deref());
                response.status = 504;
                response
            }
        };
        debug!(status = response.status, "responded");
        response
    }

    async fn dispatch(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let path = req.path.as_str();
        match (req.method.as_str(), path) {
            ("GET", "/health") => Ok(ApiResponse::ok(
                json!({"status": "ok", "timestamp": Utc::now().to_rfc3339()}),
            )),
            ("POST", "/api/scrape") => self.scrape(req).await,
            ("POST", "/api/process-inputs") => self.process_inputs(req).await,
            ("POST", "/api/generate-icp") => self.generate_icp(req).await,
            ("POST", "/api/update-icp") => self.update_icp(req).await,
            ("POST", "/api/find-prospects") => self.find_prospects(req).await,
            ("POST", "/api/enrich") => self.enrich(req).await,
            ("POST", "/api/start-enrichment") => self.start_enrichment(req).await,
            ("GET", "/api/enrichment-results") => self.enrichment_results(req).await,
            ("POST", "/api/export-sheets") => self.export_sheets(req).await,
            ("POST", "/api/save-final") => self.save_final(req).await,
            ("GET", p) if p.starts_with("/api/enrichment-status/") => {
                self.enrichment_status(&p["/api/enrichment-status/".len()..]).await
            }
            ("GET", p) if p.starts_with("/api/download/") => {
                self.download(&p["/api/download/".len()..]).await
            }
            _ => Ok(ApiResponse::not_found(&format!("{} {}", req.method, req.path))),
        }
    }

    // --- Step handlers ---

    async fn scrape(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let url = req
            .str_field("url")
            .ok_or_else(|| LeadScoutError::user_input("missing url"))?;
        let (id, session) = self.session_or_new(req)?;
        let mut session = session.lock().await;

        let site = session.pipeline.scrape(url).await?;
        info!(session = %id, chars = site.content_length, "scraped");
        Ok(ApiResponse::ok(with_session(
            json!({
                "success": true,
                "url": site.url,
                "content_length": site.content_length,
                "method": site.method,
                "preview": truncate_chars(&site.combined_text, PREVIEW_CHARS),
            }),
            &id,
        )))
    }

    async fn process_inputs(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let url = req.str_field("url").map(normalize_url);
        let mut parts = Vec::new();

        if let Some(url) = &url {
            match self.services.scraper.scrape(url).await {
                Ok(site) if site.content_length >= self.settings.min_content_chars => {
                    parts.push(InputPart {
                        source: format!("Website: {url}"),
                        content: site.combined_text,
                    });
                }
                Ok(site) => warn!(url = %url, chars = site.content_length, "website text too short, ignoring"),
                Err(e) if e.kind() == ErrorKind::UserInput => return Err(e),
                Err(e) => warn!(url = %url, error = %e, "website scrape failed, ignoring"),
            }
        }
        if let Some(part) = req.str_field("raw_text").and_then(raw_text_part) {
            parts.push(part);
        }

        if parts.is_empty() {
            return Err(LeadScoutError::user_input(
                "no usable input: give a website URL or at least 50 characters of text",
            ));
        }

        let combined = aggregate(&parts);
        let source = url.as_deref().unwrap_or(MULTI_INPUT_SOURCE);
        let (id, session) = self.session_or_new(req)?;
        let mut session = session.lock().await;
        let site = session
            .pipeline
            .use_content(ScrapedSite::from_text(source, &combined))?;

        let sources: Vec<&str> = parts.iter().map(|p| p.source.as_str()).collect();
        info!(session = %id, sources = sources.len(), chars = site.content_length, "inputs processed");
        Ok(ApiResponse::ok(with_session(
            json!({
                "success": true,
                "content_length": site.content_length,
                "input_sources": sources,
            }),
            &id,
        )))
    }

    async fn generate_icp(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let mut session = session.lock().await;
        let icp = session.pipeline.generate_icp().await?;
        Ok(ApiResponse::ok(with_session(
            json!({
                "icp": project(&to_json(icp)?, ICP_DISPLAY_FIELDS),
                "geographic_summary": geographic_summary(&icp.serviceable_geography),
                "warnings": validate_icp(icp),
            }),
            &id,
        )))
    }

    async fn update_icp(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let raw = req
            .body
            .get("override")
            .cloned()
            .ok_or_else(|| LeadScoutError::user_input("missing override"))?;
        let ov = parse_override(raw)?;

        let mut session = session.lock().await;
        let icp = session.pipeline.customize_icp(&ov)?;
        Ok(ApiResponse::ok(with_session(
            json!({
                "icp": project(&to_json(icp)?, ICP_DISPLAY_FIELDS),
                "geographic_summary": geographic_summary(&icp.serviceable_geography),
            }),
            &id,
        )))
    }

    async fn find_prospects(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let mut session = session.lock().await;
        let prospects = session.pipeline.find_prospects().await?;
        Ok(ApiResponse::ok(with_session(
            json!({
                "count": prospects.len(),
                "prospects": project_all(prospects, PROSPECT_DISPLAY_FIELDS),
            }),
            &id,
        )))
    }

    async fn enrich(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let unlock = req.flag("unlock_emails");
        let mut session = session.lock().await;

        let contacts = match req.str_field("domain") {
            Some(domain) => session.pipeline.enrich_company(domain, unlock).await?,
            None => session.pipeline.enrich_contacts(unlock).await?.to_vec(),
        };
        let run = session.pipeline.run();
        Ok(ApiResponse::ok(with_session(
            json!({
                "count": contacts.len(),
                "contacts": project_all(&contacts, CONTACT_DISPLAY_FIELDS),
                "contact_searches": to_json(&run.contact_searches)?,
                "credits_used": run.credits_used,
            }),
            &id,
        )))
    }

    async fn start_enrichment(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let mut session = session.lock().await;
        let task_id = new_id();
        let total = session.pipeline.run().apollo_enriched.len();

        let result = session.pipeline.deep_enrich(&TaskProgress).await.map(<[_]>::len);
        let run = session.pipeline.run();
        let task = EnrichmentTask {
            task_id: task_id.clone(),
            status: if result.is_ok() { TaskStatus::Completed } else { TaskStatus::Failed },
            processed: result.as_ref().copied().unwrap_or(0),
            total,
            profiles_scraped: run.deep_enriched.iter().filter(|c| c.bio_snippet.is_some()).count(),
            stacks_detected: run.deep_enriched.iter().filter(|c| !c.tech_stack.is_empty()).count(),
            error: result.as_ref().err().map(|e| e.to_string()),
            finished_at: Utc::now(),
        };
        session.tasks.insert(task_id.clone(), task.clone());
        self.sessions.register_task(&task_id, &id);

        result?;
        info!(session = %id, task = %task_id, processed = task.processed, "deep enrichment finished");
        Ok(ApiResponse::ok(with_session(to_json(&task)?, &id)))
    }

    async fn enrichment_status(&self, task_id: &str) -> Result<ApiResponse> {
        let Some(session_id) = self.sessions.task_owner(task_id) else {
            return Ok(ApiResponse::not_found(&format!("task {task_id}")));
        };
        let session = self.sessions.get(&session_id)?;
        let session = session.lock().await;
        match session.tasks.get(task_id) {
            Some(task) => Ok(ApiResponse::ok(with_session(to_json(task)?, &session_id))),
            None => Ok(ApiResponse::not_found(&format!("task {task_id}"))),
        }
    }

    async fn enrichment_results(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let session = session.lock().await;
        let contacts = &session.pipeline.run().deep_enriched;
        Ok(ApiResponse::ok(with_session(
            json!({"count": contacts.len(), "contacts": to_json(contacts)?}),
            &id,
        )))
    }

    async fn export_sheets(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let mut session = session.lock().await;
        let sheet_url = session.pipeline.export().await?.to_string();
        Ok(ApiResponse::ok(with_session(
            json!({"success": true, "sheet_url": sheet_url}),
            &id,
        )))
    }

    async fn save_final(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let (id, session) = self.session(req)?;
        let mut session = session.lock().await;
        let path = session.pipeline.finish()?;
        Ok(ApiResponse::ok(with_session(
            json!({"success": true, "snapshot_path": path.display().to_string()}),
            &id,
        )))
    }

    async fn download(&self, session_id: &str) -> Result<ApiResponse> {
        let session = self.sessions.get(session_id)?;
        let session = session.lock().await;
        let run = session.pipeline.run();
        let now = Utc::now();
        Ok(ApiResponse {
            status: 200,
            body: to_json(&SnapshotDocument::new(run, now))?,
            attachment: Some(snapshot_filename(&run.source_url, now)),
        })
    }
}

/// Deep enrichment runs inside the request, so progress only goes to the log.
struct TaskProgress;

impl ProgressReporter for TaskProgress {
    fn phase(&self, name: &str) {
        debug!(phase = name, "enrichment phase");
    }

    fn item(&self, label: &str, current: usize, total: usize) {
        debug!(label, current, total, "enrichment item");
    }

    fn done(&self, _report: &RunReport) {}
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use async_trait::async_trait;
    use leadscout_core::apollo::{CreditBalance, PeopleProvider, Unlock};
    use leadscout_core::linkedin::{LinkedInProfile, ProfileScraper};
    use leadscout_core::prospects::FinderSettings;
    use leadscout_core::search::{CompanySearch, SearchHit};
    use leadscout_core::sheets::SheetExporter;
    use leadscout_core::techstack::{TechDetector, TechStack};
    use leadscout_core::{GenerationOptions, LanguageModel};
    use leadscout_scraper::SiteScraper;
    use leadscout_shared::{Contact, MASKED_EMAIL, TechCategories};
    use uuid::Uuid;

    use super::*;

    struct Sites;

    #[async_trait]
    impl SiteScraper for Sites {
        async fn scrape(&self, url: &str) -> Result<ScrapedSite> {
            if url.contains("down") {
                return Err(LeadScoutError::Network(format!("{url}: connection refused")));
            }
            let text = format!("{url} collects and disposes of medical waste for hospitals. ").repeat(8);
            Ok(ScrapedSite::from_text(url, &text))
        }
    }

    struct Model;

    #[async_trait]
    impl LanguageModel for Model {
        async fn generate(&self, prompt: &str, _options: GenerationOptions) -> Result<String> {
            if prompt.contains("Domain: stmarys.org") {
                return Ok(r#"{"is_qualified_prospect": true, "company_name": "St. Mary's", "confidence": 90}"#.into());
            }
            if prompt.contains("B2B sales research expert") {
                return Ok(r#"{"what_they_sell": "Medical waste disposal", "customer_industry": "Hospitals",
                    "target_buyers": ["Facilities Director"],
                    "serviceable_geography": {"scope": "regional", "countries": ["USA"], "states_or_regions": ["TX"]}}"#
                    .into());
            }
            Err(LeadScoutError::Network("no scripted reply".into()))
        }
    }

    struct Search;

    #[async_trait]
    impl CompanySearch for Search {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: "St. Mary's".into(),
                link: "https://stmarys.org/".into(),
                snippet: String::new(),
            }])
        }
    }

    struct People;

    #[async_trait]
    impl PeopleProvider for People {
        async fn search_people(&self, domain: &str, _titles: &[String]) -> Result<Vec<Contact>> {
            Ok(vec![Contact {
                name: "Dana White".into(),
                title: "Facilities Director".into(),
                email: MASKED_EMAIL.into(),
                domain: domain.to_string(),
                linkedin_url: Some("https://linkedin.com/in/dana".into()),
                ..Default::default()
            }])
        }

        async fn unlock(&self, _person_id: &str) -> Result<Unlock> {
            Ok(Unlock::OutOfCredits)
        }

        async fn credit_balance(&self) -> Result<CreditBalance> {
            Ok(CreditBalance::default())
        }
    }

    struct Profiles;

    #[async_trait]
    impl ProfileScraper for Profiles {
        async fn scrape_profile(&self, url: &str) -> Result<LinkedInProfile> {
            Ok(LinkedInProfile {
                bio_snippet: "Keeps hospitals running".into(),
                time_in_role: "3 yr".into(),
                linkedin_url: Some(url.to_string()),
                ..Default::default()
            })
        }
    }

    struct Detector;

    #[async_trait]
    impl TechDetector for Detector {
        async fn detect(&self, url: &str) -> Result<TechStack> {
            Ok(TechStack {
                domain: url.trim_start_matches("https://").to_string(),
                tech_stack: vec!["Drupal".into()],
                categories: TechCategories {
                    cms: Some("Drupal".into()),
                    ..Default::default()
                },
                confidence: "high".into(),
                detection_method: "firecrawl_llm".into(),
                detected_at: Utc::now(),
            })
        }
    }

    struct Sheets;

    #[async_trait]
    impl SheetExporter for Sheets {
        async fn export(&self, _table: &[Vec<String>], _title: &str) -> Result<String> {
            Ok("https://docs.google.com/spreadsheets/d/abc".into())
        }
    }

    fn app() -> (App, PathBuf) {
        let services = Services {
            scraper: Arc::new(Sites),
            model: Arc::new(Model),
            search: Arc::new(Search),
            people: Arc::new(People),
            profiles: Arc::new(Profiles),
            tech: Arc::new(Detector),
            sheets: Arc::new(Sheets),
        };
        let output_dir = std::env::temp_dir().join(format!("ls-server-{}", Uuid::now_v7()));
        let settings = PipelineSettings {
            finder: FinderSettings {
                fallback_threshold: 0,
                ..Default::default()
            },
            output_dir: output_dir.clone(),
            max_linkedin: 0,
            min_content_chars: 200,
        };
        (App::new(services, settings, Duration::from_secs(30)), output_dir)
    }

    async fn post(app: &App, path: &str, body: Value) -> ApiResponse {
        app.handle("POST", path, &body.to_string()).await
    }

    #[test]
    fn parses_query_and_empty_body() {
        let req = ApiRequest::parse("get", "/api/enrichment-results/?session_id=a%20b", "").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/enrichment-results");
        assert_eq!(req.session_id().as_deref(), Some("a b"));
        assert_eq!(req.body, json!({}));

        let err = ApiRequest::parse("POST", "/api/scrape", "{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserInput);
    }

    #[tokio::test]
    async fn health_and_unknown_route() {
        let (app, _) = app();
        let health = app.handle("GET", "/health", "").await;
        assert_eq!(health.status, 200);
        assert_eq!(health.body["status"], "ok");

        let missing = app.handle("GET", "/api/nope", "").await;
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn step_through_a_session() {
        let (app, output_dir) = app();

        let scraped = post(&app, "/api/scrape", json!({"url": "medwaste.com"})).await;
        assert_eq!(scraped.status, 200, "{}", scraped.body);
        let sid = scraped.body["session_id"].as_str().unwrap().to_string();
        assert_eq!(scraped.body["url"], "https://medwaste.com");

        let icp = post(&app, "/api/generate-icp", json!({"session_id": sid})).await;
        assert_eq!(icp.status, 200, "{}", icp.body);
        assert_eq!(icp.body["icp"]["what_they_sell"], "Medical waste disposal");
        assert!(icp.body["icp"].get("pain_points_solved").is_none());
        assert_eq!(icp.body["session_id"], sid.as_str());

        let updated = post(
            &app,
            "/api/update-icp",
            json!({"session_id": sid, "override": {"target_buyers": ["COO"]}}),
        )
        .await;
        assert_eq!(updated.body["icp"]["target_buyers"], json!(["COO"]));

        let prospects = post(&app, "/api/find-prospects", json!({"session_id": sid})).await;
        assert_eq!(prospects.body["count"], 1);
        assert_eq!(prospects.body["prospects"][0], json!({"name": "St. Mary's", "domain": "stmarys.org", "why_good_fit": "Matches ICP"}));

        let enriched = post(&app, "/api/enrich", json!({"session_id": sid})).await;
        assert_eq!(enriched.body["count"], 1);
        assert_eq!(enriched.body["contact_searches"][0]["outcome"]["status"], "found");
        assert!(enriched.body["contacts"][0].get("domain").is_none());

        let task = post(&app, "/api/start-enrichment", json!({"session_id": sid})).await;
        assert_eq!(task.body["status"], "completed");
        assert_eq!(task.body["processed"], 1);
        let task_id = task.body["task_id"].as_str().unwrap().to_string();

        let status = app.handle("GET", &format!("/api/enrichment-status/{task_id}"), "").await;
        assert_eq!(status.body["total"], 1);
        assert_eq!(status.body["session_id"], sid.as_str());

        let results = app
            .handle("GET", &format!("/api/enrichment-results?session_id={sid}"), "")
            .await;
        assert_eq!(results.body["contacts"][0]["tech_stack"], json!(["Drupal"]));
        assert_eq!(results.body["contacts"][0]["bio_snippet"], "Keeps hospitals running");

        let sheet = post(&app, "/api/export-sheets", json!({"session_id": sid})).await;
        assert_eq!(sheet.body["sheet_url"], "https://docs.google.com/spreadsheets/d/abc");

        let download = app.handle("GET", &format!("/api/download/{sid}"), "").await;
        assert!(download.attachment.as_deref().unwrap().starts_with("medwaste_full_pipeline_"));
        assert_eq!(download.body["google_sheet_url"], "https://docs.google.com/spreadsheets/d/abc");
        assert_eq!(download.body["furthest_completed"], "exported");

        let saved = post(&app, "/api/save-final", json!({"session_id": sid})).await;
        let path = saved.body["snapshot_path"].as_str().unwrap();
        assert!(std::path::Path::new(path).exists());

        std::fs::remove_dir_all(output_dir).unwrap();
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (app, _) = app();
        let a = post(&app, "/api/scrape", json!({"url": "https://a-clinic.com"})).await;
        let b = post(&app, "/api/scrape", json!({"url": "https://b-clinic.com"})).await;
        assert_ne!(a.body["session_id"], b.body["session_id"]);
        assert_eq!(app.sessions().len(), 2);

        let sid = a.body["session_id"].as_str().unwrap();
        let out_of_order = post(&app, "/api/find-prospects", json!({"session_id": sid})).await;
        assert_eq!(out_of_order.status, 400);
        assert_eq!(out_of_order.body["kind"], "user_input");
        assert_eq!(out_of_order.body["session_id"], sid);
    }

    #[tokio::test]
    async fn idle_sessions_are_dropped_with_their_tasks() {
        let (app, _) = app();
        let app = app.with_session_ttl(Duration::ZERO);

        let first = post(&app, "/api/scrape", json!({"url": "https://a-clinic.com"})).await;
        let stale = first.body["session_id"].as_str().unwrap().to_string();
        app.sessions().register_task("t-stale", &stale);
        assert_eq!(app.sessions().task_owner("t-stale").as_deref(), Some(stale.as_str()));

        let second = post(&app, "/api/scrape", json!({"url": "https://b-clinic.com"})).await;
        let fresh = second.body["session_id"].as_str().unwrap().to_string();
        assert_eq!(app.sessions().len(), 1);
        assert!(app.sessions().task_owner("t-stale").is_none());

        let status = app.handle("GET", "/api/enrichment-status/t-stale", "").await;
        assert_eq!(status.status, 404);
        let gone = post(&app, "/api/generate-icp", json!({"session_id": stale})).await;
        assert_eq!(gone.status, 400);
        let kept = post(&app, "/api/generate-icp", json!({"session_id": fresh})).await;
        assert_eq!(kept.status, 200, "{}", kept.body);
    }

    #[tokio::test]
    async fn active_sessions_survive_pruning() {
        let (app, _) = app();
        let a = post(&app, "/api/scrape", json!({"url": "https://a-clinic.com"})).await;
        let sid = a.body["session_id"].as_str().unwrap().to_string();
        app.sessions().register_task("t-live", &sid);

        post(&app, "/api/scrape", json!({"url": "https://b-clinic.com"})).await;
        assert_eq!(app.sessions().prune_idle(), 0);
        assert_eq!(app.sessions().len(), 2);
        assert_eq!(app.sessions().task_owner("t-live").as_deref(), Some(sid.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_pool_answers_over_http() {
        use std::io::{Read as _, Write as _};

        let (app, _) = app();
        let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let pool = crate::spawn_workers(&server, 2, &Arc::new(app), &tokio::runtime::Handle::current()).unwrap();
        assert_eq!(pool.len(), 2);

        let replies = tokio::task::spawn_blocking(move || {
            (0..3)
                .map(|_| {
                    let mut stream = std::net::TcpStream::connect(addr).unwrap();
                    stream
                        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                        .unwrap();
                    let mut reply = String::new();
                    stream.read_to_string(&mut reply).unwrap();
                    reply
                })
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

        for reply in replies {
            assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
            assert!(reply.contains("application/json"));
            assert!(reply.contains("\"ok\""));
        }
        for _ in 0..pool.len() {
            server.unblock();
        }
    }

    #[tokio::test]
    async fn bad_inputs_are_400() {
        let (app, _) = app();
        let unknown = post(&app, "/api/generate-icp", json!({"session_id": "missing"})).await;
        assert_eq!(unknown.status, 400);

        let no_url = post(&app, "/api/scrape", json!({})).await;
        assert_eq!(no_url.status, 400);

        let nothing = post(&app, "/api/process-inputs", json!({"raw_text": "short"})).await;
        assert_eq!(nothing.status, 400);

        let task = app.handle("GET", "/api/enrichment-status/nope", "").await;
        assert_eq!(task.status, 404);
    }

    #[tokio::test]
    async fn process_inputs_falls_back_to_raw_text() {
        let (app, _) = app();
        let text = "We collect sharps and pharmaceutical waste from clinics across Texas and Oklahoma.";
        let resp = post(
            &app,
            "/api/process-inputs",
            json!({"url": "https://down.example", "raw_text": text}),
        )
        .await;
        assert_eq!(resp.status, 200, "{}", resp.body);
        assert_eq!(resp.body["input_sources"], json!(["Raw Text"]));

        let sid = resp.body["session_id"].as_str().unwrap();
        let icp = post(&app, "/api/generate-icp", json!({"session_id": sid})).await;
        assert_eq!(icp.status, 200);
    }
}
