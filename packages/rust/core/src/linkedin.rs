//! LinkedIn profile scraping through a PhantomBuster agent.
//!
//! The agent is launched with one profile URL, polled until idle, and its
//! `result.json` is read from the agent's storage folder.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use leadscout_shared::{LeadScoutError, Result};

use crate::llm::truncate_chars;

const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));
const BIO_CHARS: usize = 200;

/// Fields read from one scraped profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedInProfile {
    pub full_name: String,
    pub headline: String,
    pub bio_snippet: String,
    pub location: String,
    pub current_title: String,
    pub current_company: String,
    pub time_in_role: String,
    pub linkedin_url: Option<String>,
    pub connections: u64,
}

#[async_trait]
pub trait ProfileScraper: Send + Sync {
    async fn scrape_profile(&self, linkedin_url: &str) -> Result<LinkedInProfile>;
}

// ---------------------------------------------------------------------------
// Tenure
// ---------------------------------------------------------------------------

static START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b([a-z]{3,9})\.?\s+)?(\d{4})\b").expect("valid regex")
});

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = name.get(..3)?.to_lowercase();
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

/// Tenure of an ongoing role, e.g. `"Jun 2023 - Present"` → `"1 yr 4 mo"`.
///
/// Returns `"Unknown"` for finished roles or ranges that do not parse.
pub fn time_in_role(date_range: &str, today: NaiveDate) -> String {
    const UNKNOWN: &str = "Unknown";
    if !date_range.contains("Present") {
        return UNKNOWN.into();
    }
    let start = date_range.split(['-', '–']).next().unwrap_or_default();
    let Some(caps) = START_RE.captures(start) else {
        return UNKNOWN.into();
    };
    let Ok(year) = caps[2].parse::<i32>() else {
        return UNKNOWN.into();
    };
    let month = match caps.get(1) {
        Some(m) => match month_number(m.as_str()) {
            Some(n) => n,
            None => return UNKNOWN.into(),
        },
        None => 1,
    };

    let total = (today.year() - year) * 12 + today.month() as i32 - month as i32;
    if total < 0 {
        return UNKNOWN.into();
    }
    let (years, months) = (total / 12, total % 12);
    if years > 0 {
        format!("{years} yr {months} mo")
    } else {
        format!("{months} mo")
    }
}

/// Map one raw agent result row.
pub fn parse_profile(raw: &Value, today: NaiveDate) -> LinkedInProfile {
    let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string();
    let or = |value: String, fallback: &str| if value.is_empty() { fallback.to_string() } else { value };

    let location = Some(text("location"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| or(text("linkedinJobLocation"), "Unknown"));

    LinkedInProfile {
        full_name: format!("{} {}", text("firstName"), text("lastName")).trim().to_string(),
        headline: or(text("linkedinHeadline"), "N/A"),
        bio_snippet: truncate_chars(&text("linkedinDescription"), BIO_CHARS).to_string(),
        location,
        current_title: or(text("linkedinJobTitle"), "Unknown"),
        current_company: or(text("companyName"), "Unknown"),
        time_in_role: time_in_role(&text("linkedinJobDateRange"), today),
        linkedin_url: Some(text("profileUrl")).filter(|s| !s.is_empty()),
        connections: raw
            .get("linkedinConnectionsCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}

// ---------------------------------------------------------------------------
// PhantomBuster client
// ---------------------------------------------------------------------------

pub struct PhantomBusterClient {
    client: Client,
    base_url: String,
    results_base_url: String,
    api_key: String,
    agent_id: String,
    session_cookie: String,
    poll_interval: Duration,
    max_wait: Duration,
}

impl PhantomBusterClient {
    pub fn new(
        base_url: &str,
        results_base_url: &str,
        api_key: &str,
        agent_id: &str,
        session_cookie: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            results_base_url: results_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            session_cookie: session_cookie.to_string(),
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(180),
        })
    }

    pub fn with_polling(mut self, interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = interval;
        self.max_wait = max_wait;
        self
    }

    async fn launch(&self, profile_url: &str) -> Result<()> {
        let url = format!("{}/agents/launch", self.base_url);
        let body = json!({
            "id": self.agent_id,
            "argument": {
                "sessionCookie": self.session_cookie,
                "spreadsheetUrl": profile_url,
                "numberOfProfiles": 1,
            }
        });
        let response = self
            .client
            .post(&url)
            .header("X-Phantombuster-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;
        check_status(&url, response.status())
    }

    async fn fetch_agent(&self) -> Result<Value> {
        let url = format!("{}/agents/fetch", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("id", &self.agent_id)])
            .header("X-Phantombuster-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;
        check_status(&url, response.status())?;
        response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("{url}: {e}")))
    }

    /// Poll until the agent reports `idle`; returns the final agent record.
    async fn wait_until_idle(&self) -> Result<Value> {
        let started = Instant::now();
        loop {
            // Transient fetch failures are retried until the deadline.
            match self.fetch_agent().await {
                Ok(agent) if agent.get("status").and_then(Value::as_str) == Some("idle") => {
                    return Ok(agent);
                }
                Ok(agent) => debug!(status = ?agent.get("status"), "agent still running"),
                Err(e @ LeadScoutError::Auth(_)) => return Err(e),
                Err(e) => debug!(error = %e, "agent status fetch failed"),
            }
            if started.elapsed() >= self.max_wait {
                return Err(LeadScoutError::Network(format!(
                    "LinkedIn agent did not finish within {}s",
                    self.max_wait.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download_results(&self, agent: &Value) -> Result<Vec<Value>> {
        let folder = |key: &str| agent.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
        let (Some(org), Some(s3)) = (folder("orgS3Folder"), folder("s3Folder")) else {
            return Err(LeadScoutError::malformed("agent record has no result folder"));
        };

        let url = format!("{}/{org}/{s3}/result.json", self.results_base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("{url}: {e}")))
    }
}

fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(LeadScoutError::Auth(format!("PhantomBuster rejected the API key ({status})")));
    }
    if !status.is_success() {
        return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
    }
    Ok(())
}

#[async_trait]
impl ProfileScraper for PhantomBusterClient {
    #[instrument(skip_all)]
    async fn scrape_profile(&self, linkedin_url: &str) -> Result<LinkedInProfile> {
        let profile_url = match linkedin_url.strip_prefix("http://") {
            Some(rest) => format!("https://{rest}"),
            None => linkedin_url.to_string(),
        };

        self.launch(&profile_url).await?;
        let agent = self.wait_until_idle().await?;
        let results = self.download_results(&agent).await?;

        let last = results
            .last()
            .ok_or_else(|| LeadScoutError::empty(format!("no profile data for {profile_url}")))?;
        let profile = parse_profile(last, chrono::Utc::now().date_naive());
        info!(name = %profile.full_name, "LinkedIn profile scraped");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn tenure_in_years_and_months() {
        let today = day(2026, 10, 17);
        assert_eq!(time_in_role("Jun 2025 - Present", today), "1 yr 4 mo");
        assert_eq!(time_in_role("March 2026 – Present", today), "7 mo");
        assert_eq!(time_in_role("2020 - Present", today), "6 yr 9 mo");
        assert_eq!(time_in_role("Oct 2026 - Present", today), "0 mo");
    }

    #[test]
    fn tenure_unknown_cases() {
        let today = day(2026, 10, 17);
        assert_eq!(time_in_role("Jun 2020 - Aug 2022", today), "Unknown");
        assert_eq!(time_in_role("", today), "Unknown");
        assert_eq!(time_in_role("sometime - Present", today), "Unknown");
        assert_eq!(time_in_role("Jan 2030 - Present", today), "Unknown");
    }

    #[test]
    fn profile_fields_and_fallbacks() {
        let raw = json!({
            "firstName": "Dana",
            "lastName": "White",
            "linkedinDescription": "x".repeat(300),
            "linkedinJobLocation": "Houston, Texas",
            "linkedinJobDateRange": "Jan 2024 - Present",
            "profileUrl": "https://www.linkedin.com/in/danawhite",
            "linkedinConnectionsCount": 500
        });
        let profile = parse_profile(&raw, day(2026, 10, 1));
        assert_eq!(profile.full_name, "Dana White");
        assert_eq!(profile.headline, "N/A");
        assert_eq!(profile.bio_snippet.len(), 200);
        assert_eq!(profile.location, "Houston, Texas");
        assert_eq!(profile.current_company, "Unknown");
        assert_eq!(profile.time_in_role, "2 yr 9 mo");
        assert_eq!(profile.connections, 500);
    }

    #[tokio::test]
    async fn launches_polls_and_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agents/launch"))
            .and(header("X-Phantombuster-Key", "pb"))
            .and(body_partial_json(json!({
                "id": "agent-1",
                "argument": {"spreadsheetUrl": "https://www.linkedin.com/in/danawhite", "numberOfProfiles": 1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"containerId": "c1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/agents/fetch"))
            .and(query_param("id", "agent-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/agents/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "idle", "orgS3Folder": "org", "s3Folder": "run"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/org/run/result.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"firstName": "Old", "lastName": "Row"},
                {"firstName": "Dana", "lastName": "White", "linkedinHeadline": "VP Construction"}
            ])))
            .mount(&server)
            .await;

        let client = PhantomBusterClient::new(&server.uri(), &server.uri(), "pb", "agent-1", "cookie", 5)
            .unwrap()
            .with_polling(Duration::from_millis(10), Duration::from_secs(5));
        let profile = client
            .scrape_profile("http://www.linkedin.com/in/danawhite")
            .await
            .unwrap();
        assert_eq!(profile.full_name, "Dana White");
        assert_eq!(profile.headline, "VP Construction");
    }

    #[tokio::test]
    async fn agent_that_never_finishes_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/agents/fetch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
            .mount(&server)
            .await;

        let client = PhantomBusterClient::new(&server.uri(), &server.uri(), "pb", "agent-1", "cookie", 5)
            .unwrap()
            .with_polling(Duration::from_millis(10), Duration::from_millis(50));
        let err = client
            .scrape_profile("https://www.linkedin.com/in/x")
            .await
            .unwrap_err();
        assert!(matches!(err, LeadScoutError::Network(_)));
        assert!(err.to_string().contains("did not finish"));
    }
}
