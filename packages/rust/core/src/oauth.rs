//! Google OAuth for the spreadsheet export (installed-app flow).
//!
//! A cached user token is read from disk and refreshed when it expires.
//! With no usable token, the browser flow runs:
//!
//! 1. Start `tiny_http` on `127.0.0.1:0`
//! 2. Open the consent page with a random `state`
//! 3. Wait for the redirect carrying `code` (blocking, so on `spawn_blocking`)
//! 4. Exchange the code and save the token

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use leadscout_shared::{LeadScoutError, Result, SheetsConfig, expand_home};

const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Supplies a bearer token for Google APIs.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Client id and secret from the downloaded OAuth client file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Deserialize)]
struct ClientFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))?;
        let file: ClientFile = serde_json::from_str(&content).map_err(|e| {
            LeadScoutError::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        file.installed.or(file.web).ok_or_else(|| {
            LeadScoutError::config(format!(
                "{} has no \"installed\" or \"web\" client",
                path.display()
            ))
        })
    }
}

/// Cached user token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => (at - now).num_seconds() > EXPIRY_MARGIN_SECS,
            None => false,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub fn load_token(path: &Path) -> Result<Option<StoredToken>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))?;
    match serde_json::from_str(&content) {
        Ok(token) => Ok(Some(token)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable token file");
            Ok(None)
        }
    }
}

pub fn save_token(path: &Path, token: &StoredToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LeadScoutError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(token)
        .map_err(|e| LeadScoutError::config(format!("failed to serialize token: {e}")))?;
    std::fs::write(path, json).map_err(|e| LeadScoutError::io(path, e))
}

// ---------------------------------------------------------------------------
// Callback handling
// ---------------------------------------------------------------------------

/// Pull the authorization code out of a redirect query string.
///
/// `Ok(None)` means the request is not the redirect (keep waiting).
pub fn parse_callback(query: &str, expected_state: &str) -> Result<Option<String>> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value)
            .map_err(|e| LeadScoutError::Auth(format!("bad OAuth callback: {e}")))?
            .into_owned();
        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(LeadScoutError::Auth(format!("Google sign-in refused: {error}")));
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        return Err(LeadScoutError::Auth("OAuth state mismatch".into()));
    }
    Ok(Some(code))
}

fn html_response(body: &str) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let response = tiny_http::Response::from_string(body);
    match tiny_http::Header::from_bytes("Content-Type", "text/html") {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

fn wait_for_code(server: tiny_http::Server, expected_state: String) -> Result<String> {
    let deadline = std::time::Instant::now() + CALLBACK_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        let request = match server.recv_timeout(remaining) {
            Ok(Some(request)) => request,
            Ok(None) => {
                return Err(LeadScoutError::Auth(format!(
                    "no OAuth callback within {}s",
                    CALLBACK_TIMEOUT.as_secs()
                )));
            }
            Err(e) => return Err(LeadScoutError::Auth(format!("OAuth callback server: {e}"))),
        };

        let url = request.url().to_string();
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        match parse_callback(query, &expected_state) {
            Ok(Some(code)) => {
                let _ = request.respond(html_response(
                    "<html><body><h1>Signed in</h1><p>You can close this tab.</p></body></html>",
                ));
                return Ok(code);
            }
            Ok(None) => {
                let _ = request.respond(tiny_http::Response::empty(tiny_http::StatusCode(204)));
            }
            Err(e) => {
                let _ = request.respond(html_response(
                    "<html><body><h1>Sign-in failed</h1><p>Check the terminal.</p></body></html>",
                ));
                return Err(e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Token source
// ---------------------------------------------------------------------------

/// User-account OAuth backed by a token file.
pub struct GoogleOAuth {
    client: Client,
    credentials_path: PathBuf,
    token_path: PathBuf,
    token_url: String,
}

impl GoogleOAuth {
    pub fn new(config: &SheetsConfig, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            credentials_path: expand_home(&config.credentials_path),
            token_path: expand_home(&config.token_path),
            token_url: config.token_url.clone(),
        })
    }

    async fn token_request(&self, url: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if status.is_client_error() {
            return Err(LeadScoutError::Auth(format!("Google token endpoint refused ({status})")));
        }
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("{url}: {e}")))
    }

    fn stored(response: TokenResponse, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }

    async fn refresh(&self, secrets: &ClientSecrets, refresh_token: &str) -> Result<StoredToken> {
        let url = secrets.token_uri.as_deref().unwrap_or(&self.token_url);
        let response = self
            .token_request(
                url,
                &[
                    ("client_id", secrets.client_id.as_str()),
                    ("client_secret", secrets.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ],
            )
            .await?;
        debug!("OAuth token refreshed");
        Ok(Self::stored(response, Some(refresh_token.to_string())))
    }

    async fn browser_flow(&self, secrets: &ClientSecrets) -> Result<StoredToken> {
        let server = tiny_http::Server::http("127.0.0.1:0")
            .map_err(|e| LeadScoutError::Auth(format!("failed to bind OAuth callback: {e}")))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|a| a.port())
            .ok_or_else(|| LeadScoutError::Auth("OAuth callback has no port".into()))?;

        let state = uuid::Uuid::new_v4().simple().to_string();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let auth_url = format!(
            "{base}?response_type=code&client_id={client}&redirect_uri={redirect}&scope={scope}&state={state}&access_type=offline&prompt=consent",
            base = secrets.auth_uri.as_deref().unwrap_or(DEFAULT_AUTH_URI),
            client = urlencoding::encode(&secrets.client_id),
            redirect = urlencoding::encode(&redirect_uri),
            scope = urlencoding::encode(SCOPES),
        );

        eprintln!("Opening browser for Google sign-in:\n{auth_url}");
        if let Err(e) = open::that(&auth_url) {
            eprintln!("Could not open a browser ({e}). Open the URL above manually.");
        }

        let code = tokio::task::spawn_blocking(move || wait_for_code(server, state))
            .await
            .map_err(|e| LeadScoutError::Auth(format!("OAuth callback task: {e}")))??;

        let url = secrets.token_uri.as_deref().unwrap_or(&self.token_url);
        let response = self
            .token_request(
                url,
                &[
                    ("code", code.as_str()),
                    ("client_id", secrets.client_id.as_str()),
                    ("client_secret", secrets.client_secret.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;
        info!("Google account authorized");
        Ok(Self::stored(response, None))
    }
}

#[async_trait]
impl TokenSource for GoogleOAuth {
    async fn access_token(&self) -> Result<String> {
        let cached = load_token(&self.token_path)?;
        if let Some(token) = &cached {
            if token.is_fresh(Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let secrets = ClientSecrets::load(&self.credentials_path).map_err(|e| match e {
            LeadScoutError::Io { path, .. } => LeadScoutError::Auth(format!(
                "Google OAuth client file not found at {}. Download it from the Google Cloud console.",
                path.display()
            )),
            other => other,
        })?;

        let token = match cached.and_then(|t| t.refresh_token) {
            Some(refresh) => match self.refresh(&secrets, &refresh).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "token refresh failed, starting browser sign-in");
                    self.browser_flow(&secrets).await?
                }
            },
            None => self.browser_flow(&secrets).await?,
        };

        save_token(&self.token_path, &token)?;
        Ok(token.access_token)
    }
}
