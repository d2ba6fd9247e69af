//! Application configuration for LeadScout.
//!
//! User config lives at `~/.leadscout/leadscout.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file: each provider section names the env var
//! that holds its key, and [`Credentials`] reads them once at start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LeadScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadscout";

// ---------------------------------------------------------------------------
// Config structs (matching leadscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Company search settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// People-data provider settings.
    #[serde(default)]
    pub apollo: ApolloConfig,

    /// LinkedIn automation settings.
    #[serde(default)]
    pub phantombuster: PhantomBusterConfig,

    /// Rendering scrape provider settings.
    #[serde(default)]
    pub firecrawl: FirecrawlConfig,

    /// Spreadsheet export settings.
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Web serving layer settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory that receives run snapshots.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// LinkedIn profiles scraped per run (0 = all).
    #[serde(default = "default_max_linkedin")]
    pub max_linkedin_profiles: usize,

    /// Scraped text shorter than this fails the scrape step.
    #[serde(default = "default_min_content")]
    pub min_content_chars: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            request_timeout_secs: default_request_timeout(),
            max_linkedin_profiles: default_max_linkedin(),
            min_content_chars: default_min_content(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_linkedin() -> usize {
    10
}
fn default_min_content() -> usize {
    200
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Model used for every generation call.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API root.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
        }
    }
}

fn default_llm_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Env var holding the custom search engine id (`cx`).
    #[serde(default = "default_search_engine_env")]
    pub engine_id_env: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Cap on search queries per run.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Cap on candidate domains sent to classification.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Classification stops once this many prospects are accepted.
    #[serde(default = "default_target_prospects")]
    pub target_prospects: usize,

    /// Minimum classifier confidence (0-100).
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u8,

    /// Below this many prospects the LLM fallback runs.
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: usize,

    /// Final prospect list cap.
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Wait before the single retry after HTTP 429.
    #[serde(default = "default_search_retry_ms")]
    pub rate_limit_retry_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            engine_id_env: default_search_engine_env(),
            base_url: default_search_base_url(),
            max_queries: default_max_queries(),
            max_candidates: default_max_candidates(),
            target_prospects: default_target_prospects(),
            min_confidence: default_min_confidence(),
            fallback_threshold: default_fallback_threshold(),
            max_results: default_max_results(),
            rate_limit_retry_ms: default_search_retry_ms(),
        }
    }
}

fn default_search_key_env() -> String {
    "GOOGLE_SEARCH_API_KEY".into()
}
fn default_search_engine_env() -> String {
    "GOOGLE_SEARCH_ENGINE_ID".into()
}
fn default_search_base_url() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_max_queries() -> usize {
    25
}
fn default_max_candidates() -> usize {
    50
}
fn default_target_prospects() -> usize {
    20
}
fn default_min_confidence() -> u8 {
    60
}
fn default_fallback_threshold() -> usize {
    10
}
fn default_max_results() -> usize {
    50
}
fn default_search_retry_ms() -> u64 {
    2000
}

/// `[apollo]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApolloConfig {
    #[serde(default = "default_apollo_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_apollo_base_url")]
    pub base_url: String,

    /// Contacts requested per company.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Wait before the single retry after HTTP 429.
    #[serde(default = "default_apollo_retry_ms")]
    pub rate_limit_retry_ms: u64,
}

impl Default for ApolloConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_apollo_key_env(),
            base_url: default_apollo_base_url(),
            per_page: default_per_page(),
            rate_limit_retry_ms: default_apollo_retry_ms(),
        }
    }
}

fn default_apollo_key_env() -> String {
    "APOLLO_API_KEY".into()
}
fn default_apollo_base_url() -> String {
    "https://api.apollo.io/api/v1".into()
}
fn default_per_page() -> u32 {
    5
}
fn default_apollo_retry_ms() -> u64 {
    3000
}

/// `[phantombuster]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhantomBusterConfig {
    #[serde(default = "default_pb_key_env")]
    pub api_key_env: String,

    /// Env var holding the LinkedIn profile scraper agent id.
    #[serde(default = "default_pb_phantom_env")]
    pub phantom_id_env: String,

    /// Env var holding the LinkedIn `li_at` session cookie.
    #[serde(default = "default_pb_cookie_env")]
    pub session_cookie_env: String,

    #[serde(default = "default_pb_base_url")]
    pub base_url: String,

    /// Where agent result files are published.
    #[serde(default = "default_pb_results_url")]
    pub results_base_url: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

impl Default for PhantomBusterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_pb_key_env(),
            phantom_id_env: default_pb_phantom_env(),
            session_cookie_env: default_pb_cookie_env(),
            base_url: default_pb_base_url(),
            results_base_url: default_pb_results_url(),
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

fn default_pb_key_env() -> String {
    "PHANTOMBUSTER_API_KEY".into()
}
fn default_pb_phantom_env() -> String {
    "PHANTOMBUSTER_PHANTOM_ID".into()
}
fn default_pb_cookie_env() -> String {
    "LINKEDIN_SESSION_COOKIE".into()
}
fn default_pb_base_url() -> String {
    "https://api.phantombuster.com/api/v2".into()
}
fn default_pb_results_url() -> String {
    "https://phantombuster.s3.amazonaws.com".into()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_max_wait() -> u64 {
    180
}

/// `[firecrawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirecrawlConfig {
    #[serde(default = "default_firecrawl_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_firecrawl_base_url")]
    pub base_url: String,
}

impl Default for FirecrawlConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_firecrawl_key_env(),
            base_url: default_firecrawl_base_url(),
        }
    }
}

fn default_firecrawl_key_env() -> String {
    "FIRECRAWL_API_KEY".into()
}
fn default_firecrawl_base_url() -> String {
    "https://api.firecrawl.dev/v1".into()
}

/// `[sheets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// OAuth client file downloaded from the Google console ("installed" app).
    #[serde(default = "default_credentials_path")]
    pub credentials_path: String,

    /// Cached user token, refreshed in place.
    #[serde(default = "default_token_path")]
    pub token_path: String,

    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,

    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            token_path: default_token_path(),
            sheets_base_url: default_sheets_base_url(),
            drive_base_url: default_drive_base_url(),
            token_url: default_token_url(),
        }
    }
}

fn default_credentials_path() -> String {
    "~/.leadscout/credentials.json".into()
}
fn default_token_path() -> String {
    "~/.leadscout/token.json".into()
}
fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4".into()
}
fn default_drive_base_url() -> String {
    "https://www.googleapis.com/drive/v3".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a single step request (deep enrichment can take minutes).
    #[serde(default = "default_server_timeout")]
    pub request_timeout_secs: u64,

    /// Sessions untouched for this long are dropped.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Request-handling threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            request_timeout_secs: default_server_timeout(),
            session_ttl_secs: default_session_ttl(),
            workers: default_workers(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    5000
}
fn default_server_timeout() -> u64 {
    300
}
fn default_session_ttl() -> u64 {
    3600
}
fn default_workers() -> usize {
    8
}

// ---------------------------------------------------------------------------
// Credentials (read once from the environment)
// ---------------------------------------------------------------------------

/// Provider secrets, resolved from the env vars named in [`AppConfig`].
///
/// Read once at process start and never mutated. A `None` field means the
/// provider is unconfigured; steps that need it fail with an auth error.
#[derive(Clone, Default)]
pub struct Credentials {
    pub llm_api_key: Option<String>,
    pub search_api_key: Option<String>,
    pub search_engine_id: Option<String>,
    pub apollo_api_key: Option<String>,
    pub phantombuster_api_key: Option<String>,
    pub phantombuster_agent_id: Option<String>,
    pub linkedin_session_cookie: Option<String>,
    pub firecrawl_api_key: Option<String>,
}

impl Credentials {
    /// Read every provider secret from the process environment.
    pub fn from_env(config: &AppConfig) -> Self {
        Self {
            llm_api_key: env_secret(&config.llm.api_key_env),
            search_api_key: env_secret(&config.search.api_key_env),
            search_engine_id: env_secret(&config.search.engine_id_env),
            apollo_api_key: env_secret(&config.apollo.api_key_env),
            phantombuster_api_key: env_secret(&config.phantombuster.api_key_env),
            phantombuster_agent_id: env_secret(&config.phantombuster.phantom_id_env),
            linkedin_session_cookie: env_secret(&config.phantombuster.session_cookie_env),
            firecrawl_api_key: env_secret(&config.firecrawl.api_key_env),
        }
    }

    /// Names of providers that have every secret they need.
    pub fn configured_providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if self.llm_api_key.is_some() {
            providers.push("llm");
        }
        if self.search_api_key.is_some() && self.search_engine_id.is_some() {
            providers.push("search");
        }
        if self.apollo_api_key.is_some() {
            providers.push("apollo");
        }
        if self.phantombuster_api_key.is_some()
            && self.phantombuster_agent_id.is_some()
            && self.linkedin_session_cookie.is_some()
        {
            providers.push("phantombuster");
        }
        if self.firecrawl_api_key.is_some() {
            providers.push("firecrawl");
        }
        providers
    }
}

// Keep secrets out of debug output.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("configured", &self.configured_providers())
            .finish()
    }
}

fn env_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LeadScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadscout/leadscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        LeadScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LeadScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LeadScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LeadScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains("APOLLO_API_KEY"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[defaults]
max_linkedin_profiles = 0

[apollo]
per_page = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.max_linkedin_profiles, 0);
        assert_eq!(config.defaults.output_dir, "output");
        assert_eq!(config.apollo.per_page, 10);
        assert_eq!(config.apollo.base_url, "https://api.apollo.io/api/v1");
        assert_eq!(config.search.max_queries, 25);
        assert_eq!(config.server.request_timeout_secs, 300);
        assert_eq!(config.server.session_ttl_secs, 3600);
        assert_eq!(config.server.workers, 8);
    }

    #[test]
    fn load_config_from_file() {
        let dir = std::env::temp_dir().join(format!("ls-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("leadscout.toml");
        std::fs::write(&path, "[llm]\nmodel = \"gemini-2.5-pro\"\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.llm.model, "gemini-2.5-pro");
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");

        std::fs::write(&path, "[llm\nbroken").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_credentials_are_none() {
        let mut config = AppConfig::default();
        // Unique env var names so other tests are not affected
        config.apollo.api_key_env = "LS_TEST_NONEXISTENT_APOLLO_12345".into();
        config.llm.api_key_env = "LS_TEST_NONEXISTENT_LLM_12345".into();
        let creds = Credentials::from_env(&config);
        assert!(creds.apollo_api_key.is_none());
        assert!(!creds.configured_providers().contains(&"apollo"));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials {
            apollo_api_key: Some("super-secret".into()),
            ..Default::default()
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("apollo"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("output"), PathBuf::from("output"));
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
