//! Web search for candidate companies (Google Custom Search).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use leadscout_shared::{LeadScoutError, Result};

const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));

/// Results requested per query.
const RESULTS_PER_QUERY: u8 = 10;

/// One organic search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Keyword web search.
#[async_trait]
pub trait CompanySearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// Google Custom Search JSON API client.
pub struct GoogleSearchClient {
    client: Client,
    base_url: String,
    api_key: String,
    engine_id: String,
    retry_wait: Duration,
}

impl GoogleSearchClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        engine_id: &str,
        timeout_secs: u64,
        retry_wait_ms: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            retry_wait: Duration::from_millis(retry_wait_ms),
        })
    }

    async fn send(&self, query: &str) -> Result<reqwest::Response> {
        let num = RESULTS_PER_QUERY.to_string();
        self.client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("search '{query}': {e}")))
    }
}

#[async_trait]
impl CompanySearch for GoogleSearchClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut response = self.send(query).await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(wait_ms = self.retry_wait.as_millis() as u64, "search rate limited, retrying once");
            tokio::time::sleep(self.retry_wait).await;
            response = self.send(query).await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LeadScoutError::Auth(format!("search API rejected the key ({status})")));
        }
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("search '{query}': HTTP {status}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("search '{query}': {e}")))?;

        debug!(hits = parsed.items.len(), "search complete");
        Ok(parsed.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_items_with_missing_fields_defaulted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "hospital systems texas"))
            .and(query_param("cx", "engine"))
            .and(query_param("num", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"title": "Baylor Scott & White", "link": "https://www.bswhealth.com/", "snippet": "Hospitals"},
                    {"link": "https://www.texashealth.org/"}
                ]
            })))
            .mount(&server)
            .await;

        let client = GoogleSearchClient::new(&server.uri(), "key", "engine", 5, 10).unwrap();
        let hits = client.search("hospital systems texas").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "");
        assert_eq!(hits[1].link, "https://www.texashealth.org/");
    }

    #[tokio::test]
    async fn no_items_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "customsearch#search"})))
            .mount(&server)
            .await;

        let client = GoogleSearchClient::new(&server.uri(), "key", "engine", 5, 10).unwrap();
        assert!(client.search("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"title": "Acme", "link": "https://acme.com"}]
            })))
            .mount(&server)
            .await;

        let client = GoogleSearchClient::new(&server.uri(), "key", "engine", 5, 10).unwrap();
        let hits = client.search("acme").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn forbidden_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = GoogleSearchClient::new(&server.uri(), "bad", "engine", 5, 10).unwrap();
        let err = client.search("acme").await.unwrap_err();
        assert!(matches!(err, LeadScoutError::Auth(_)));
    }
}
