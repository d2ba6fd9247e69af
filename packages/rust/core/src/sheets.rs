//! Spreadsheet export of enriched contacts (Google Sheets + Drive sharing).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{info, instrument};

use leadscout_scraper::company_slug;
use leadscout_shared::{Contact, LeadScoutError, Result};

use crate::llm::truncate_chars;
use crate::oauth::TokenSource;
use crate::projection::EXPORT_HEADERS;

const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));
const NA: &str = "N/A";

/// Writes a table to a new shareable spreadsheet.
#[async_trait]
pub trait SheetExporter: Send + Sync {
    /// Create a spreadsheet titled `title` holding `table` (header row first)
    /// and return its URL.
    async fn export(&self, table: &[Vec<String>], title: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Row formatting
// ---------------------------------------------------------------------------

fn or_na(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NA.to_string(),
    }
}

/// One spreadsheet row, in [`EXPORT_HEADERS`] order.
pub fn contact_to_row(contact: &Contact, now: DateTime<Utc>) -> Vec<String> {
    let (first, last) = contact
        .name
        .split_once(' ')
        .unwrap_or((contact.name.as_str(), ""));

    let bio = contact
        .bio_snippet
        .as_deref()
        .filter(|b| !b.is_empty())
        .or(contact.headline.as_deref())
        .unwrap_or("");

    let tech = if contact.tech_stack.is_empty() {
        "Not detected".to_string()
    } else {
        contact.tech_stack.join(", ")
    };
    let analytics = if contact.analytics.is_empty() {
        NA.to_string()
    } else {
        contact.analytics.join(", ")
    };
    let date = contact.enriched_at.unwrap_or(now);

    vec![
        first.to_string(),
        last.to_string(),
        contact.name.clone(),
        or_na(Some(&contact.title)),
        or_na(Some(&contact.email)),
        if contact.email_verified { "Yes" } else { "No" }.to_string(),
        or_na(contact.linkedin_url.as_deref()),
        or_na(contact.time_in_role.as_deref()),
        or_na(contact.location.as_deref()),
        truncate_chars(bio, 100).to_string(),
        or_na(Some(&contact.company)),
        or_na(Some(&contact.domain)),
        tech,
        or_na(contact.frameworks.as_deref()),
        or_na(contact.hosting.as_deref()),
        analytics,
        date.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
}

/// Header row followed by one row per contact.
pub fn contacts_table(contacts: &[Contact], now: DateTime<Utc>) -> Vec<Vec<String>> {
    let mut table = Vec::with_capacity(contacts.len() + 1);
    table.push(EXPORT_HEADERS.iter().map(|h| h.to_string()).collect());
    table.extend(contacts.iter().map(|c| contact_to_row(c, now)));
    table
}

/// `Leads_{slug}_{YYYYmmdd_HHMM}`
pub fn sheet_title(source_url: &str, now: DateTime<Utc>) -> String {
    format!("Leads_{}_{}", company_slug(source_url), now.format("%Y%m%d_%H%M"))
}

/// Export `contacts` to a new sheet named after `source_url`.
///
/// Zero contacts is an empty-result error; nothing is created.
pub async fn export_contacts(
    exporter: &dyn SheetExporter,
    contacts: &[Contact],
    source_url: &str,
) -> Result<String> {
    if contacts.is_empty() {
        return Err(LeadScoutError::empty("no contacts to export"));
    }
    let now = Utc::now();
    let table = contacts_table(contacts, now);
    exporter.export(&table, &sheet_title(source_url, now)).await
}

// ---------------------------------------------------------------------------
// Google client
// ---------------------------------------------------------------------------

pub struct GoogleSheetsClient {
    client: Client,
    sheets_base_url: String,
    drive_base_url: String,
    auth: Arc<dyn TokenSource>,
}

impl GoogleSheetsClient {
    pub fn new(
        sheets_base_url: &str,
        drive_base_url: &str,
        auth: Arc<dyn TokenSource>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LeadScoutError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            sheets_base_url: sheets_base_url.trim_end_matches('/').to_string(),
            drive_base_url: drive_base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    async fn post(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LeadScoutError::Auth(format!("Google rejected the OAuth token ({status})")));
        }
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl SheetExporter for GoogleSheetsClient {
    #[instrument(skip_all, fields(title = %title, rows = table.len()))]
    async fn export(&self, table: &[Vec<String>], title: &str) -> Result<String> {
        let token = self.auth.access_token().await?;

        let created = self
            .post(
                &format!("{}/spreadsheets", self.sheets_base_url),
                &token,
                &json!({"properties": {"title": title}}),
            )
            .await?;
        let id = created
            .get("spreadsheetId")
            .and_then(Value::as_str)
            .ok_or_else(|| LeadScoutError::malformed("spreadsheet create: no spreadsheetId"))?
            .to_string();
        let sheet_id = created
            .pointer("/sheets/0/properties/sheetId")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let url = created
            .get("spreadsheetUrl")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| format!("https://docs.google.com/spreadsheets/d/{id}"));
        info!(spreadsheet = %id, "spreadsheet created");

        // From here on a failure leaves a partial sheet behind.
        self.post(
            &format!(
                "{}/spreadsheets/{id}/values/A1:append?valueInputOption=RAW",
                self.sheets_base_url
            ),
            &token,
            &json!({"values": table}),
        )
        .await?;

        self.post(
            &format!("{}/spreadsheets/{id}:batchUpdate", self.sheets_base_url),
            &token,
            &json!({"requests": [{
                "updateSheetProperties": {
                    "properties": {"sheetId": sheet_id, "gridProperties": {"frozenRowCount": 1}},
                    "fields": "gridProperties.frozenRowCount"
                }
            }]}),
        )
        .await?;

        self.post(
            &format!("{}/files/{id}/permissions", self.drive_base_url),
            &token,
            &json!({"type": "anyone", "role": "reader"}),
        )
        .await?;

        info!(url = %url, "spreadsheet shared");
        Ok(url)
    }
}
