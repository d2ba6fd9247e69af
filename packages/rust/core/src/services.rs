//! The set of provider implementations a pipeline runs against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use leadscout_scraper::{FirecrawlClient, PageRenderer, RenderedPage, SiteScraper, WebsiteScraper};
use leadscout_shared::{AppConfig, Contact, Credentials, LeadScoutError, Result};

use crate::apollo::{ApolloClient, CreditBalance, PeopleProvider, Unlock};
use crate::linkedin::{LinkedInProfile, PhantomBusterClient, ProfileScraper};
use crate::llm::{GeminiClient, GenerationOptions, LanguageModel};
use crate::oauth::GoogleOAuth;
use crate::search::{CompanySearch, GoogleSearchClient, SearchHit};
use crate::sheets::{GoogleSheetsClient, SheetExporter};
use crate::techstack::{TechDetector, TechStackDetector};

/// One implementation of every provider seam.
#[derive(Clone)]
pub struct Services {
    pub scraper: Arc<dyn SiteScraper>,
    pub model: Arc<dyn LanguageModel>,
    pub search: Arc<dyn CompanySearch>,
    pub people: Arc<dyn PeopleProvider>,
    pub profiles: Arc<dyn ProfileScraper>,
    pub tech: Arc<dyn TechDetector>,
    pub sheets: Arc<dyn SheetExporter>,
}

impl Services {
    /// Build the real HTTP clients.
    ///
    /// A provider with a missing secret becomes an [`Unconfigured`] stand-in,
    /// so only the steps that need it fail.
    pub fn from_config(config: &AppConfig, creds: &Credentials) -> Result<Self> {
        let timeout = config.defaults.request_timeout_secs;

        let renderer: Arc<dyn PageRenderer> = match &creds.firecrawl_api_key {
            Some(key) => Arc::new(FirecrawlClient::new(&config.firecrawl.base_url, key, timeout)?),
            None => Arc::new(Unconfigured::new("Firecrawl", &config.firecrawl.api_key_env)),
        };

        let mut website = WebsiteScraper::new(timeout)?;
        if creds.firecrawl_api_key.is_some() {
            website = website.with_renderer(renderer.clone());
        } else {
            warn!("Firecrawl not configured; JavaScript-heavy sites will be scraped without rendering");
        }

        let model: Arc<dyn LanguageModel> = match &creds.llm_api_key {
            Some(key) => Arc::new(GeminiClient::new(
                &config.llm.base_url,
                &config.llm.model,
                key,
                timeout,
            )?),
            None => Arc::new(Unconfigured::new("Gemini", &config.llm.api_key_env)),
        };

        let search: Arc<dyn CompanySearch> = match (&creds.search_api_key, &creds.search_engine_id) {
            (Some(key), Some(cx)) => Arc::new(GoogleSearchClient::new(
                &config.search.base_url,
                key,
                cx,
                timeout,
                config.search.rate_limit_retry_ms,
            )?),
            (None, _) => Arc::new(Unconfigured::new("Google Search", &config.search.api_key_env)),
            (_, None) => Arc::new(Unconfigured::new("Google Search", &config.search.engine_id_env)),
        };

        let people: Arc<dyn PeopleProvider> = match &creds.apollo_api_key {
            Some(key) => Arc::new(ApolloClient::new(
                &config.apollo.base_url,
                key,
                config.apollo.per_page,
                timeout,
                config.apollo.rate_limit_retry_ms,
            )?),
            None => Arc::new(Unconfigured::new("Apollo", &config.apollo.api_key_env)),
        };

        let pb = &config.phantombuster;
        let profiles: Arc<dyn ProfileScraper> = match (
            &creds.phantombuster_api_key,
            &creds.phantombuster_agent_id,
            &creds.linkedin_session_cookie,
        ) {
            (Some(key), Some(agent), Some(cookie)) => Arc::new(
                PhantomBusterClient::new(&pb.base_url, &pb.results_base_url, key, agent, cookie, timeout)?
                    .with_polling(
                        Duration::from_secs(pb.poll_interval_secs),
                        Duration::from_secs(pb.max_wait_secs),
                    ),
            ),
            (None, _, _) => Arc::new(Unconfigured::new("PhantomBuster", &pb.api_key_env)),
            (_, None, _) => Arc::new(Unconfigured::new("PhantomBuster", &pb.phantom_id_env)),
            (_, _, None) => Arc::new(Unconfigured::new("PhantomBuster", &pb.session_cookie_env)),
        };

        let tech: Arc<dyn TechDetector> = Arc::new(TechStackDetector::new(renderer, model.clone()));

        let oauth = GoogleOAuth::new(&config.sheets, timeout)?;
        let sheets: Arc<dyn SheetExporter> = Arc::new(GoogleSheetsClient::new(
            &config.sheets.sheets_base_url,
            &config.sheets.drive_base_url,
            Arc::new(oauth),
            timeout,
        )?);

        info!(configured = ?creds.configured_providers(), "providers ready");

        Ok(Self {
            scraper: Arc::new(website),
            model,
            search,
            people,
            profiles,
            tech,
            sheets,
        })
    }
}

// ---------------------------------------------------------------------------
// Unconfigured stand-in
// ---------------------------------------------------------------------------

/// Fills a provider seam whose credential is missing. Every call is an
/// auth error naming the env var to set.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    provider: &'static str,
    env_var: String,
}

impl Unconfigured {
    pub fn new(provider: &'static str, env_var: &str) -> Self {
        Self {
            provider,
            env_var: env_var.to_string(),
        }
    }

    fn error(&self) -> LeadScoutError {
        LeadScoutError::Auth(format!("{} not configured: set {}", self.provider, self.env_var))
    }
}

#[async_trait]
impl PageRenderer for Unconfigured {
    async fn render(&self, _url: &str) -> Result<RenderedPage> {
        Err(self.error())
    }
}

#[async_trait]
impl LanguageModel for Unconfigured {
    async fn generate(&self, _prompt: &str, _options: GenerationOptions) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl CompanySearch for Unconfigured {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
        Err(self.error())
    }
}

#[async_trait]
impl PeopleProvider for Unconfigured {
    async fn search_people(&self, _domain: &str, _titles: &[String]) -> Result<Vec<Contact>> {
        Err(self.error())
    }

    async fn unlock(&self, _person_id: &str) -> Result<Unlock> {
        Err(self.error())
    }

    async fn credit_balance(&self) -> Result<CreditBalance> {
        Err(self.error())
    }
}

#[async_trait]
impl ProfileScraper for Unconfigured {
    async fn scrape_profile(&self, _url: &str) -> Result<LinkedInProfile> {
        Err(self.error())
    }
}
