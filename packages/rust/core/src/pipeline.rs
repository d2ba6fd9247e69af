//! Step-wise pipeline: URL → scrape → ICP → (customize) → prospects →
//! contacts → (deep enrichment) → (export) → snapshot.
//!
//! [`Pipeline`] holds one run's state and exposes one operation per step.
//! Each operation checks the stage it may start from, so steps only move
//! forward. [`Pipeline::run_all`] chains them and stops at the first failure.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use leadscout_scraper::{ScrapedSite, normalize_url};
use leadscout_shared::{
    AppConfig, Contact, ContactSearch, Icp, IcpOverride, LeadScoutError, Prospect, Result, Stage,
    StepFailure,
};

use crate::apollo::{ApolloEnricher, buyer_titles};
use crate::deep::DeepEnricher;
use crate::icp::IcpGenerator;
use crate::overrides::merge_icp;
use crate::prospects::{FinderSettings, ProspectFinder, extract_domain};
use crate::services::Services;
use crate::sheets::export_contacts;
use crate::snapshot;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new step.
    fn phase(&self, name: &str);
    /// Called per contact or company inside a long step.
    fn item(&self, label: &str, current: usize, total: usize);
    /// Called once when [`Pipeline::run_all`] returns.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _label: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Everything one run has produced so far.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub source_url: String,
    pub generated_at: DateTime<Utc>,
    /// Furthest completed step.
    pub stage: Stage,
    /// Last step failure; cleared when a step succeeds.
    pub failure: Option<StepFailure>,
    pub scraped: Option<ScrapedSite>,
    pub icp: Option<Icp>,
    pub prospects: Vec<Prospect>,
    pub contact_searches: Vec<ContactSearch>,
    pub apollo_enriched: Vec<Contact>,
    pub deep_enriched: Vec<Contact>,
    pub google_sheet_url: Option<String>,
    pub credits_used: usize,
    pub snapshot_path: Option<PathBuf>,
}

impl PipelineRun {
    pub fn new(source_url: &str) -> Self {
        Self {
            source_url: source_url.to_string(),
            generated_at: Utc::now(),
            stage: Stage::Start,
            failure: None,
            scraped: None,
            icp: None,
            prospects: Vec::new(),
            contact_searches: Vec::new(),
            apollo_enriched: Vec::new(),
            deep_enriched: Vec::new(),
            google_sheet_url: None,
            credits_used: 0,
            snapshot_path: None,
        }
    }

    /// Deep-enriched contacts when that step ran, otherwise the Apollo ones.
    pub fn final_contacts(&self) -> &[Contact] {
        if self.deep_enriched.is_empty() {
            &self.apollo_enriched
        } else {
            &self.deep_enriched
        }
    }
}

/// Tunables for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub finder: FinderSettings,
    pub output_dir: PathBuf,
    /// LinkedIn profiles to scrape per run; 0 means all.
    pub max_linkedin: usize,
    /// Scrapes with less text than this fail as empty.
    pub min_content_chars: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let min_content_chars = config.defaults.min_content_chars;
        Self {
            finder: FinderSettings::from_config(&config.search, min_content_chars),
            output_dir: PathBuf::from(&config.defaults.output_dir),
            max_linkedin: config.defaults.max_linkedin_profiles,
            min_content_chars,
        }
    }
}

// ---------------------------------------------------------------------------
// run_all options and report
// ---------------------------------------------------------------------------

/// Chance to edit the generated ICP before prospecting.
pub trait IcpReview: Send + Sync {
    /// `None` or an empty override keeps the ICP as generated.
    fn review(&self, icp: &Icp) -> Result<Option<IcpOverride>>;
}

/// A fixed override, e.g. loaded from a file.
impl IcpReview for IcpOverride {
    fn review(&self, _icp: &Icp) -> Result<Option<IcpOverride>> {
        Ok(Some(self.clone()))
    }
}

#[derive(Default)]
pub struct RunOptions {
    pub unlock_emails: bool,
    /// Customization runs only when this is set.
    pub review: Option<Box<dyn IcpReview>>,
    pub skip_deep_enrich: bool,
    pub skip_export: bool,
}

/// Summary of a [`Pipeline::run_all`] call.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source_url: String,
    pub furthest_completed: Stage,
    pub failure: Option<StepFailure>,
    pub snapshot_path: Option<PathBuf>,
    pub prospects: usize,
    pub contacts: usize,
    pub credits_used: usize,
    pub google_sheet_url: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    services: Services,
    settings: PipelineSettings,
    run: PipelineRun,
}

impl Pipeline {
    pub fn new(services: Services, settings: PipelineSettings) -> Self {
        Self {
            services,
            settings,
            run: PipelineRun::new(""),
        }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn stage(&self) -> Stage {
        self.run.stage
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn require(&self, op: &str, allowed: &[Stage]) -> Result<()> {
        if allowed.contains(&self.run.stage) {
            Ok(())
        } else {
            Err(LeadScoutError::user_input(format!(
                "cannot run {op} after {}",
                self.run.stage
            )))
        }
    }

    /// Remember a failed step; a successful one clears the last failure.
    fn record<T>(&mut self, step: Stage, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.run.failure = None;
                Ok(value)
            }
            Err(e) => {
                warn!(%step, error = %e, "step failed");
                self.run.failure = Some(StepFailure {
                    step,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn icp(&self) -> Result<&Icp> {
        self.run
            .icp
            .as_ref()
            .ok_or_else(|| LeadScoutError::user_input("no ICP has been generated"))
    }

    // --- Steps ---

    /// Scrape the seller's website. Thin sites fail as an empty result.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn scrape(&mut self, url: &str) -> Result<&ScrapedSite> {
        self.require("scrape", &[Stage::Start])?;
        let url = normalize_url(url);
        self.run.source_url = url.clone();

        let result = self.scrape_site(&url).await;
        let site = self.record(Stage::Scraped, result)?;
        self.run.stage = Stage::Scraped;
        Ok(&*self.run.scraped.insert(site))
    }

    async fn scrape_site(&self, url: &str) -> Result<ScrapedSite> {
        let site = self.services.scraper.scrape(url).await?;
        if site.content_length < self.settings.min_content_chars {
            return Err(LeadScoutError::empty(format!(
                "only {} characters of text at {}; need {}",
                site.content_length, site.url, self.settings.min_content_chars
            )));
        }
        info!(chars = site.content_length, method = ?site.method, "website scraped");
        Ok(site)
    }

    /// Seed the run with content collected some other way (pasted text,
    /// aggregated inputs) instead of scraping.
    pub fn use_content(&mut self, site: ScrapedSite) -> Result<&ScrapedSite> {
        self.require("process_inputs", &[Stage::Start])?;
        if site.combined_text.trim().is_empty() {
            return Err(LeadScoutError::user_input("no content provided"));
        }
        self.run.source_url = site.url.clone();
        self.run.stage = Stage::Scraped;
        Ok(&*self.run.scraped.insert(site))
    }

    #[instrument(skip_all)]
    pub async fn generate_icp(&mut self) -> Result<&Icp> {
        self.require("generate_icp", &[Stage::Scraped])?;
        let content = self
            .run
            .scraped
            .as_ref()
            .map(|s| s.combined_text.as_str())
            .unwrap_or_default();

        let result = IcpGenerator::new(self.services.model.clone())
            .generate(content)
            .await;
        let icp = self.record(Stage::IcpGenerated, result)?;
        self.run.stage = Stage::IcpGenerated;
        Ok(&*self.run.icp.insert(icp))
    }

    /// Apply a user override. Allowed once, straight after generation.
    pub fn customize_icp(&mut self, ov: &IcpOverride) -> Result<&Icp> {
        self.require("customize_icp", &[Stage::IcpGenerated])?;
        let merged = merge_icp(self.icp()?, ov);
        info!(buyers = merged.target_buyers.len(), "ICP customized");
        self.run.stage = Stage::IcpCustomized;
        Ok(&*self.run.icp.insert(merged))
    }

    /// An empty list is a valid result.
    #[instrument(skip_all)]
    pub async fn find_prospects(&mut self) -> Result<&[Prospect]> {
        self.require("find_prospects", &[Stage::IcpGenerated, Stage::IcpCustomized])?;
        let seller = extract_domain(&self.run.source_url).unwrap_or_default();

        let finder = ProspectFinder::new(
            self.services.model.clone(),
            self.services.search.clone(),
            self.services.scraper.clone(),
            self.settings.finder.clone(),
        );
        let result = finder.find(self.icp()?, &seller).await;
        self.run.prospects = self.record(Stage::ProspectsFound, result)?;
        self.run.stage = Stage::ProspectsFound;
        Ok(&self.run.prospects)
    }

    /// Look up contacts at every prospect.
    #[instrument(skip_all, fields(unlock = unlock_emails))]
    pub async fn enrich_contacts(&mut self, unlock_emails: bool) -> Result<&[Contact]> {
        self.require("enrich_contacts", &[Stage::ProspectsFound])?;

        let result = {
            let icp = self.icp()?;
            let mut enricher = ApolloEnricher::new(self.services.people.as_ref(), unlock_emails);
            enricher.enrich(&self.run.prospects, icp).await
        };
        let batch = self.record(Stage::ContactsEnriched, result)?;

        self.run.apollo_enriched = batch.contacts;
        self.run.contact_searches = batch.searches;
        self.run.credits_used += batch.credits_used;
        self.run.stage = Stage::ContactsEnriched;
        Ok(&self.run.apollo_enriched)
    }

    /// Look up contacts at one prospect, replacing any earlier lookup for it.
    #[instrument(skip_all, fields(domain = %domain, unlock = unlock_emails))]
    pub async fn enrich_company(&mut self, domain: &str, unlock_emails: bool) -> Result<Vec<Contact>> {
        self.require(
            "enrich_company",
            &[Stage::ProspectsFound, Stage::ContactsEnriched],
        )?;
        let Some(prospect) = self
            .run
            .prospects
            .iter()
            .find(|p| p.domain.eq_ignore_ascii_case(domain.trim()))
            .cloned()
        else {
            return Err(LeadScoutError::user_input(format!(
                "{domain} is not one of this run's prospects"
            )));
        };

        let (result, credits) = {
            let titles = buyer_titles(self.icp()?);
            let mut enricher = ApolloEnricher::new(self.services.people.as_ref(), unlock_emails);
            let result = enricher.enrich_company(&prospect, &titles).await;
            (result, enricher.credits_used())
        };
        let (contacts, search) = self.record(Stage::ContactsEnriched, result)?;

        self.run.apollo_enriched.retain(|c| c.domain != prospect.domain);
        self.run.contact_searches.retain(|s| s.domain != prospect.domain);
        self.run.apollo_enriched.extend(contacts.iter().cloned());
        self.run.contact_searches.push(search);
        self.run.credits_used += credits;
        self.run.stage = Stage::ContactsEnriched;
        Ok(contacts)
    }

    /// LinkedIn and tech-stack pass over copies of the Apollo contacts.
    #[instrument(skip_all)]
    pub async fn deep_enrich(&mut self, progress: &dyn ProgressReporter) -> Result<&[Contact]> {
        self.require("deep_enrich", &[Stage::ContactsEnriched])?;

        let enricher = DeepEnricher::new(
            self.services.profiles.clone(),
            self.services.tech.clone(),
            self.settings.max_linkedin,
        );
        let result = enricher.enrich(&self.run.apollo_enriched, progress).await;
        let deep = self.record(Stage::DeepEnriched, result)?;

        self.run.deep_enriched = deep.contacts;
        self.run.stage = Stage::DeepEnriched;
        Ok(&self.run.deep_enriched)
    }

    /// Export the final contact list. Exporting again creates a new sheet.
    #[instrument(skip_all)]
    pub async fn export(&mut self) -> Result<&str> {
        self.require(
            "export",
            &[Stage::ContactsEnriched, Stage::DeepEnriched, Stage::Exported],
        )?;

        let result = export_contacts(
            self.services.sheets.as_ref(),
            self.run.final_contacts(),
            &self.run.source_url,
        )
        .await;
        let url = self.record(Stage::Exported, result)?;
        self.run.stage = Stage::Exported;
        Ok(self.run.google_sheet_url.insert(url).as_str())
    }

    /// Write the run to a new snapshot file without changing its stage.
    pub fn write_snapshot(&mut self) -> Result<PathBuf> {
        let path = snapshot::write_snapshot(&self.settings.output_dir, &self.run, Utc::now())?;
        self.run.snapshot_path = Some(path.clone());
        Ok(path)
    }

    /// Mark the run done and write its snapshot. Allowed from any stage.
    pub fn finish(&mut self) -> Result<PathBuf> {
        let previous = self.run.stage;
        self.run.stage = Stage::Done;
        match self.write_snapshot() {
            Ok(path) => Ok(path),
            Err(e) => {
                self.run.stage = previous;
                Err(e)
            }
        }
    }

    // --- Whole run ---

    /// Run every step for `url` on a fresh run.
    ///
    /// Stops at the first failing step and never invokes the one after it.
    /// A snapshot is written either way; side effects of completed steps
    /// (such as a created sheet) are left in place.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn run_all(
        &mut self,
        url: &str,
        options: &RunOptions,
        progress: &dyn ProgressReporter,
    ) -> RunReport {
        self.run = PipelineRun::new(&normalize_url(url));

        let outcome = self.run_steps(url, options, progress).await;
        let snapshot = match &outcome {
            Ok(()) => self.finish(),
            Err(e) => {
                if self.run.failure.is_none() {
                    self.run.failure = Some(StepFailure {
                        step: self.run.stage,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
                self.write_snapshot()
            }
        };

        if let Err(e) = snapshot {
            error!(error = %e, "failed to write snapshot");
            if self.run.failure.is_none() {
                self.run.failure = Some(StepFailure {
                    step: Stage::Done,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }

        let report = self.report();
        match &report.failure {
            Some(f) => warn!(step = %f.step, furthest = %report.furthest_completed, "pipeline stopped"),
            None => info!(
                prospects = report.prospects,
                contacts = report.contacts,
                "pipeline complete"
            ),
        }
        progress.done(&report);
        report
    }

    async fn run_steps(
        &mut self,
        url: &str,
        options: &RunOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        progress.phase("Scraping website");
        self.scrape(url).await?;

        progress.phase("Generating ICP");
        self.generate_icp().await?;

        if let Some(review) = &options.review {
            let reviewed = review.review(self.icp()?);
            match self.record(Stage::IcpCustomized, reviewed)? {
                Some(ov) if !ov.is_empty() => {
                    progress.phase("Applying ICP changes");
                    self.customize_icp(&ov)?;
                }
                _ => debug!("ICP kept as generated"),
            }
        }

        progress.phase("Finding prospects");
        self.find_prospects().await?;

        progress.phase("Finding contacts");
        self.enrich_contacts(options.unlock_emails).await?;

        if options.skip_deep_enrich {
            debug!("deep enrichment skipped");
        } else {
            progress.phase("Deep enrichment");
            self.deep_enrich(progress).await?;
        }

        if options.skip_export {
            debug!("export skipped");
        } else if self.run.final_contacts().is_empty() {
            info!("no contacts, skipping export");
        } else {
            progress.phase("Exporting to Google Sheets");
            self.export().await?;
        }

        Ok(())
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            source_url: self.run.source_url.clone(),
            furthest_completed: self.run.stage,
            failure: self.run.failure.clone(),
            snapshot_path: self.run.snapshot_path.clone(),
            prospects: self.run.prospects.len(),
            contacts: self.run.final_contacts().len(),
            credits_used: self.run.credits_used,
            google_sheet_url: self.run.google_sheet_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use leadscout_shared::{ErrorKind, MASKED_EMAIL};
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::apollo::UnlockedPerson;
    use crate::apollo::testing::FakePeople;
    use crate::deep::testing::{FakeDetector, FakeProfiles};
    use crate::llm::testing::ScriptedModel;
    use crate::search::{CompanySearch, SearchHit};
    use crate::services::Unconfigured;
    use crate::sheets::SheetExporter;
    use crate::techstack::TechStackDetector;
    use leadscout_scraper::SiteScraper;

    const ICP_REPLY: &str = r#"{
        "seller_business_type": "physical_service",
        "what_they_sell": "Medical waste disposal",
        "customer_industry": "Hospitals",
        "target_buyers": ["Facilities Director", "Environmental Services Manager"],
        "serviceable_geography": {"scope": "regional", "countries": ["USA"], "states_or_regions": ["TX"]}
    }"#;

    /// Long text everywhere, except hosts containing "thin".
    struct FakeSites;

    #[async_trait]
    impl SiteScraper for FakeSites {
        async fn scrape(&self, url: &str) -> Result<ScrapedSite> {
            if url.contains("thin") {
                return Ok(ScrapedSite::from_text(url, "Coming soon"));
            }
            let text = format!("{url} runs hospitals and handles medical waste. ").repeat(10);
            Ok(ScrapedSite::from_text(url, &text))
        }
    }

    struct FixedSearch;

    #[async_trait]
    impl CompanySearch for FixedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                title: "St. Mary's".into(),
                link: "https://www.stmarys.org/locations".into(),
                snippet: String::new(),
            }])
        }
    }

    #[derive(Default)]
    struct FakeSheets {
        exports: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl SheetExporter for FakeSheets {
        async fn export(&self, table: &[Vec<String>], title: &str) -> Result<String> {
            let mut exports = self.exports.lock().unwrap();
            exports.push((title.to_string(), table.len()));
            Ok(format!("https://docs.google.com/spreadsheets/d/s{}", exports.len()))
        }
    }

    struct Fixture {
        people: Arc<FakePeople>,
        detector: Arc<FakeDetector>,
        sheets: Arc<FakeSheets>,
        output_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let mut people = FakePeople::default().with("stmarys.org", &[("Dana White", "p1"), ("Sam Lee", "p2")]);
            people.unlocked.insert(
                "p1".into(),
                UnlockedPerson {
                    email: "dana@stmarys.org".into(),
                    email_verified: true,
                    ..Default::default()
                },
            );
            *people.credits.lock().unwrap() = 10;
            Self {
                people: Arc::new(people),
                detector: Arc::new(FakeDetector::default()),
                sheets: Arc::new(FakeSheets::default()),
                output_dir: std::env::temp_dir().join(format!("ls-pipeline-{}", Uuid::now_v7())),
            }
        }

        fn pipeline(&self) -> Pipeline {
            self.pipeline_with_people(self.people.clone())
        }

        fn pipeline_with_people(&self, people: Arc<dyn crate::apollo::PeopleProvider>) -> Pipeline {
            self.pipeline_with(|services| services.people = people)
        }

        fn pipeline_with(&self, edit: impl FnOnce(&mut Services)) -> Pipeline {
            let model = ScriptedModel::new()
                .when(
                    "Domain: stmarys.org",
                    r#"{"is_qualified_prospect": true, "company_name": "St. Mary's", "confidence": 88}"#,
                )
                .when("B2B sales research expert", ICP_REPLY);
            let mut services = Services {
                scraper: Arc::new(FakeSites),
                model: Arc::new(model),
                search: Arc::new(FixedSearch),
                people: self.people.clone(),
                profiles: Arc::new(FakeProfiles::default()),
                tech: self.detector.clone(),
                sheets: self.sheets.clone(),
            };
            edit(&mut services);
            let settings = PipelineSettings {
                finder: FinderSettings {
                    fallback_threshold: 0,
                    ..Default::default()
                },
                output_dir: self.output_dir.clone(),
                max_linkedin: 0,
                min_content_chars: 200,
            };
            Pipeline::new(services, settings)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.output_dir);
        }
    }

    fn read_json(path: &std::path::Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn run_all_completes_every_step() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();

        let report = pipeline
            .run_all("medwaste.com", &RunOptions::default(), &SilentProgress)
            .await;

        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.furthest_completed, Stage::Done);
        assert_eq!(report.source_url, "https://medwaste.com");
        assert_eq!(report.prospects, 1);
        assert_eq!(report.contacts, 2);
        assert_eq!(report.google_sheet_url.as_deref(), Some("https://docs.google.com/spreadsheets/d/s1"));

        let run = pipeline.run();
        let domains: Vec<&str> = run.prospects.iter().map(|p| p.domain.as_str()).collect();
        assert!(run.apollo_enriched.iter().all(|c| domains.contains(&c.domain.as_str())));
        assert!(run.deep_enriched.iter().all(|c| c.tech_stack == vec!["WordPress", "PHP"]));
        assert!(run.apollo_enriched.iter().all(|c| c.email == MASKED_EMAIL));

        let exports = fx.sheets.exports.lock().unwrap();
        assert_eq!(exports.len(), 1);
        assert!(exports[0].0.starts_with("Leads_medwaste_"));
        assert_eq!(exports[0].1, 3);

        let doc = read_json(report.snapshot_path.as_ref().unwrap());
        assert_eq!(doc["furthest_completed"], "done");
        assert_eq!(doc["total_contacts"], 2);
        assert_eq!(doc["icp"]["what_they_sell"], "Medical waste disposal");
    }

    #[tokio::test]
    async fn failure_stops_before_next_step_and_still_snapshots() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline_with_people(Arc::new(Unconfigured::new("Apollo", "APOLLO_API_KEY")));

        let report = pipeline
            .run_all("https://medwaste.com", &RunOptions::default(), &SilentProgress)
            .await;

        assert_eq!(report.furthest_completed, Stage::ProspectsFound);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.step, Stage::ContactsEnriched);
        assert_eq!(failure.kind, ErrorKind::Auth);
        assert!(fx.detector.calls.lock().unwrap().is_empty());
        assert!(fx.sheets.exports.lock().unwrap().is_empty());

        let doc = read_json(report.snapshot_path.as_ref().unwrap());
        assert_eq!(doc["furthest_completed"], "prospects_found");
        assert_eq!(doc["failure"]["kind"], "auth");
        assert_eq!(doc["apollo_enriched"], Value::Array(vec![]));
        assert!(doc["google_sheet_url"].is_null());
    }

    #[tokio::test]
    async fn missing_deep_enrichment_credentials_fail_the_step() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline_with(|services| {
            services.profiles = Arc::new(Unconfigured::new("PhantomBuster", "PHANTOMBUSTER_API_KEY"));
        });
        let options = RunOptions {
            skip_export: true,
            ..Default::default()
        };

        let report = pipeline.run_all("https://medwaste.com", &options, &SilentProgress).await;

        assert_eq!(report.furthest_completed, Stage::ContactsEnriched);
        let failure = report.failure.unwrap();
        assert_eq!(failure.step, Stage::DeepEnriched);
        assert_eq!(failure.kind, ErrorKind::Auth);
        assert!(pipeline.run().deep_enriched.is_empty());
    }

    #[tokio::test]
    async fn missing_renderer_credentials_fail_deep_enrichment() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline_with(|services| {
            let renderer = Arc::new(Unconfigured::new("Firecrawl", "FIRECRAWL_API_KEY"));
            services.tech = Arc::new(TechStackDetector::new(renderer, services.model.clone()));
        });
        let options = RunOptions {
            skip_export: true,
            ..Default::default()
        };

        let report = pipeline.run_all("https://medwaste.com", &options, &SilentProgress).await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.step, Stage::DeepEnriched);
        assert!(failure.message.contains("FIRECRAWL_API_KEY"));
    }

    #[tokio::test]
    async fn thin_site_fails_the_scrape() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        let report = pipeline
            .run_all("https://thin.io", &RunOptions::default(), &SilentProgress)
            .await;
        assert_eq!(report.furthest_completed, Stage::Start);
        let failure = report.failure.unwrap();
        assert_eq!(failure.step, Stage::Scraped);
        assert_eq!(failure.kind, ErrorKind::EmptyResult);
    }

    #[tokio::test]
    async fn steps_only_move_forward() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();

        let err = pipeline.generate_icp().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserInput);
        assert!(err.to_string().contains("cannot run generate_icp after start"));

        pipeline.scrape("https://medwaste.com").await.unwrap();
        pipeline.generate_icp().await.unwrap();
        pipeline.find_prospects().await.unwrap();

        let err = pipeline.customize_icp(&IcpOverride::default()).unwrap_err();
        assert!(err.to_string().contains("after prospects_found"));
        assert!(pipeline.scrape("https://medwaste.com").await.is_err());
        assert!(pipeline.deep_enrich(&SilentProgress).await.is_err());
        assert_eq!(pipeline.stage(), Stage::ProspectsFound);
        assert!(pipeline.run().failure.is_none());
    }

    #[tokio::test]
    async fn review_override_replaces_buyers() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        let options = RunOptions {
            review: Some(Box::new(IcpOverride {
                target_buyers: Some(vec!["Chief Nursing Officer".into()]),
                ..Default::default()
            })),
            skip_deep_enrich: true,
            skip_export: true,
            ..Default::default()
        };

        let report = pipeline.run_all("https://medwaste.com", &options, &SilentProgress).await;
        assert!(report.succeeded());
        let icp = pipeline.run().icp.as_ref().unwrap();
        assert_eq!(icp.target_buyers, vec!["Chief Nursing Officer"]);
        assert_eq!(icp.customer_industry, "Hospitals");
        assert!(pipeline.run().deep_enriched.is_empty());
        assert!(fx.sheets.exports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unlock_flag_reveals_emails() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        pipeline.scrape("https://medwaste.com").await.unwrap();
        pipeline.generate_icp().await.unwrap();
        pipeline.find_prospects().await.unwrap();

        let contacts = pipeline.enrich_contacts(true).await.unwrap();
        assert_eq!(contacts[0].email, "dana@stmarys.org");
        assert!(contacts[0].email_verified);
        assert_eq!(pipeline.run().credits_used, 2);
    }

    #[tokio::test]
    async fn single_company_lookup_replaces_earlier_results() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        pipeline.scrape("https://medwaste.com").await.unwrap();
        pipeline.generate_icp().await.unwrap();
        pipeline.find_prospects().await.unwrap();

        let err = pipeline.enrich_company("unknown.com", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserInput);

        pipeline.enrich_company("stmarys.org", false).await.unwrap();
        pipeline.enrich_company("STMARYS.org", false).await.unwrap();
        assert_eq!(pipeline.stage(), Stage::ContactsEnriched);
        assert_eq!(pipeline.run().apollo_enriched.len(), 2);
        assert_eq!(pipeline.run().contact_searches.len(), 1);
    }

    #[tokio::test]
    async fn re_export_creates_a_new_sheet() {
        let fx = Fixture::new();
        let mut pipeline = fx.pipeline();
        pipeline.scrape("https://medwaste.com").await.unwrap();
        pipeline.generate_icp().await.unwrap();
        pipeline.find_prospects().await.unwrap();
        pipeline.enrich_contacts(false).await.unwrap();

        let first = pipeline.export().await.unwrap().to_string();
        let second = pipeline.export().await.unwrap().to_string();
        assert_ne!(first, second);
        assert_eq!(pipeline.run().google_sheet_url.as_deref(), Some(second.as_str()));
        assert_eq!(fx.sheets.exports.lock().unwrap().len(), 2);

        let path = pipeline.finish().unwrap();
        assert_eq!(pipeline.stage(), Stage::Done);
        assert!(pipeline.export().await.is_err());
        let again = pipeline.finish().unwrap();
        assert_ne!(path, again);
        assert_eq!(read_json(&path)["google_sheet_url"], second.as_str());
    }
}
