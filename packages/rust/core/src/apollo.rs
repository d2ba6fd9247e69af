//! Contact lookup and email unlocking through the Apollo people API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use leadscout_shared::{
    Contact, ContactSearch, ContactSearchOutcome, ErrorKind, Icp, LeadScoutError, MASKED_EMAIL,
    Prospect, Result,
};

const USER_AGENT: &str = concat!("LeadScout/", env!("CARGO_PKG_VERSION"));

/// Titles searched when the ICP names no buyers.
const FALLBACK_TITLES: &[&str] = &[
    "CEO", "Founder", "Director", "Manager", "Head", "VP", "Executive", "Lead",
];

/// Profile data revealed by an unlock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnlockedPerson {
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub email_verified: bool,
    pub linkedin_url: String,
    pub location: String,
    pub phone: String,
    pub headline: String,
    pub photo_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Unlock {
    Person(UnlockedPerson),
    /// The account has no credits left.
    OutOfCredits,
}

/// Remaining and monthly credits as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditBalance {
    #[serde(default)]
    pub credits_remaining: Option<Value>,
    #[serde(default)]
    pub monthly_limit: Option<Value>,
}

impl std::fmt::Display for CreditBalance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => "Unknown".to_string(),
        };
        write!(f, "{} / {}", show(&self.credits_remaining), show(&self.monthly_limit))
    }
}

/// People-data provider.
#[async_trait]
pub trait PeopleProvider: Send + Sync {
    /// People at `domain` holding one of `titles`. Emails come back masked.
    async fn search_people(&self, domain: &str, titles: &[String]) -> Result<Vec<Contact>>;

    /// Reveal one person's email and profile. Costs a credit.
    async fn unlock(&self, person_id: &str) -> Result<Unlock>;

    async fn credit_balance(&self) -> Result<CreditBalance>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct ApolloClient {
    client: Client,
    base_url: String,
    api_key: String,
    per_page: u32,
    retry_wait: Duration,
}

impl ApolloClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        per_page: u32,
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
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            per_page,
            retry_wait: Duration::from_millis(retry_wait_ms),
        })
    }

    /// POST with a single retry on 429.
    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/{path}", self.base_url);
        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .header("X-Api-Key", &self.api_key)
                .json(body)
                .send()
                .await
                .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt == 0 {
                attempt += 1;
                warn!(path, wait_ms = self.retry_wait.as_millis() as u64, "rate limited, retrying once");
                tokio::time::sleep(self.retry_wait).await;
                continue;
            }
            return Ok(response);
        }
    }
}

fn check_auth(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(LeadScoutError::Auth(format!("Apollo rejected the API key ({status})")));
    }
    Ok(())
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("").trim()
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Turn one search-result person into a contact, or `None` when it lacks a name or title.
fn parse_person(p: &Value, domain: &str) -> Option<Contact> {
    let first = str_field(p, "first_name");
    let title = str_field(p, "title");
    if first.is_empty() || title.is_empty() {
        return None;
    }
    let last = Some(str_field(p, "last_name"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| str_field(p, "last_name_obfuscated"));

    Some(Contact {
        name: format!("{first} {last}").trim().to_string(),
        title: title.to_string(),
        email: MASKED_EMAIL.to_string(),
        email_verified: false,
        domain: domain.to_string(),
        person_id: p.get("id").and_then(Value::as_str).map(String::from),
        ..Default::default()
    })
}

fn parse_unlocked(person: &Value) -> UnlockedPerson {
    let location = ["city", "state", "country"]
        .iter()
        .map(|k| str_field(person, k))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    UnlockedPerson {
        full_name: str_field(person, "name").to_string(),
        first_name: str_field(person, "first_name").to_string(),
        last_name: str_field(person, "last_name").to_string(),
        email: str_field(person, "email").to_string(),
        email_verified: matches!(str_field(person, "email_status"), "verified" | "guessed"),
        linkedin_url: str_field(person, "linkedin_url").to_string(),
        location,
        phone: str_field(person, "sanitized_phone").to_string(),
        headline: str_field(person, "headline").to_string(),
        photo_url: str_field(person, "photo_url").to_string(),
    }
}

#[async_trait]
impl PeopleProvider for ApolloClient {
    #[instrument(skip_all, fields(domain = %domain))]
    async fn search_people(&self, domain: &str, titles: &[String]) -> Result<Vec<Contact>> {
        let body = json!({
            "q_organization_domains": domain,
            "page": 1,
            "per_page": self.per_page,
            "person_titles": titles,
        });
        let response = self.post("mixed_people/api_search", &body).await?;
        let status = response.status();
        check_auth(status)?;
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("Apollo search for {domain}: HTTP {status}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("Apollo search for {domain}: {e}")))?;
        let people = data.get("people").and_then(Value::as_array);

        let contacts: Vec<Contact> = people
            .into_iter()
            .flatten()
            .filter_map(|p| parse_person(p, domain))
            .collect();
        debug!(found = contacts.len(), "people search complete");
        Ok(contacts)
    }

    async fn unlock(&self, person_id: &str) -> Result<Unlock> {
        let body = json!({"id": person_id, "reveal_personal_emails": true});
        let response = self.post("people/match", &body).await?;
        let status = response.status();
        if status == StatusCode::PAYMENT_REQUIRED {
            return Ok(Unlock::OutOfCredits);
        }
        check_auth(status)?;
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("Apollo unlock {person_id}: HTTP {status}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("Apollo unlock {person_id}: {e}")))?;
        let person = data.get("person").cloned().unwrap_or(Value::Null);
        Ok(Unlock::Person(parse_unlocked(&person)))
    }

    async fn credit_balance(&self) -> Result<CreditBalance> {
        let url = format!("{}/auth/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        check_auth(status)?;
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| LeadScoutError::malformed(format!("{url}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Contacts found for a batch of prospects.
#[derive(Debug, Default)]
pub struct EnrichmentBatch {
    pub contacts: Vec<Contact>,
    pub searches: Vec<ContactSearch>,
    pub credits_used: usize,
}

/// Titles to search: the ICP's buyers, or a generic leadership list.
pub fn buyer_titles(icp: &Icp) -> Vec<String> {
    if icp.target_buyers.is_empty() {
        FALLBACK_TITLES.iter().map(|t| t.to_string()).collect()
    } else {
        icp.target_buyers.clone()
    }
}

/// Copy revealed profile data onto a contact.
fn apply_unlock(contact: &mut Contact, person: UnlockedPerson) {
    if !person.email.is_empty() {
        contact.email = person.email;
        contact.email_verified = person.email_verified;
    }
    if !person.full_name.is_empty() {
        contact.name = person.full_name;
    } else if !person.last_name.is_empty() {
        let first = contact.name.split(' ').next().unwrap_or_default().to_string();
        let first = non_empty(&person.first_name).unwrap_or(first);
        contact.name = format!("{first} {}", person.last_name);
    }
    contact.linkedin_url = non_empty(&person.linkedin_url).or(contact.linkedin_url.take());
    contact.location = non_empty(&person.location).or(contact.location.take());
    contact.phone = non_empty(&person.phone).or(contact.phone.take());
    contact.headline = non_empty(&person.headline).or(contact.headline.take());
    contact.photo_url = non_empty(&person.photo_url).or(contact.photo_url.take());
}

/// Looks up contacts at each prospect and optionally unlocks their emails.
pub struct ApolloEnricher<'a> {
    provider: &'a dyn PeopleProvider,
    unlock_emails: bool,
    credits_used: usize,
}

impl<'a> ApolloEnricher<'a> {
    pub fn new(provider: &'a dyn PeopleProvider, unlock_emails: bool) -> Self {
        if unlock_emails {
            warn!("email unlocking enabled; each unlock costs an Apollo credit");
        }
        Self {
            provider,
            unlock_emails,
            credits_used: 0,
        }
    }

    /// Unlocks paid for so far.
    pub fn credits_used(&self) -> usize {
        self.credits_used
    }

    /// Enrich every prospect in order.
    ///
    /// A rejected API key fails the whole batch. Any other per-company
    /// failure is recorded as `provider_error` and the batch continues.
    #[instrument(skip_all, fields(prospects = prospects.len(), unlock = self.unlock_emails))]
    pub async fn enrich(&mut self, prospects: &[Prospect], icp: &Icp) -> Result<EnrichmentBatch> {
        let titles = buyer_titles(icp);
        let mut batch = EnrichmentBatch::default();

        for prospect in prospects {
            let (contacts, search) = self.enrich_company(prospect, &titles).await?;
            batch.contacts.extend(contacts);
            batch.searches.push(search);
        }

        batch.credits_used = self.credits_used;
        if self.credits_used > 0 {
            info!(credits = self.credits_used, "Apollo credits used");
        }
        info!(contacts = batch.contacts.len(), "contact enrichment complete");
        Ok(batch)
    }

    /// Look up one prospect.
    pub async fn enrich_company(
        &mut self,
        prospect: &Prospect,
        titles: &[String],
    ) -> Result<(Vec<Contact>, ContactSearch)> {
        let record = |outcome| ContactSearch {
            company: prospect.name.clone(),
            domain: prospect.domain.clone(),
            outcome,
        };

        if prospect.domain.trim().is_empty() {
            warn!(company = %prospect.name, "prospect has no domain, skipping company");
            let outcome = ContactSearchOutcome::Skipped {
                reason: "no domain to search".into(),
            };
            return Ok((Vec::new(), record(outcome)));
        }

        let found = match self.provider.search_people(&prospect.domain, titles).await {
            Ok(found) => found,
            Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
            Err(e) => {
                warn!(domain = %prospect.domain, error = %e, "contact search failed, skipping company");
                let outcome = ContactSearchOutcome::ProviderError {
                    message: e.to_string(),
                };
                return Ok((Vec::new(), record(outcome)));
            }
        };

        if found.is_empty() {
            warn!(domain = %prospect.domain, "no contacts found");
            return Ok((Vec::new(), record(ContactSearchOutcome::NoMatches)));
        }

        let mut contacts = Vec::with_capacity(found.len());
        for mut contact in found {
            contact.company = prospect.name.clone();
            contact.domain = prospect.domain.clone();
            self.try_unlock(&mut contact).await;
            contacts.push(contact);
        }

        info!(domain = %prospect.domain, contacts = contacts.len(), "contacts found");
        let outcome = ContactSearchOutcome::Found {
            count: contacts.len(),
        };
        Ok((contacts, record(outcome)))
    }

    async fn try_unlock(&mut self, contact: &mut Contact) {
        if !self.unlock_emails {
            return;
        }
        let Some(person_id) = contact.person_id.clone() else {
            return;
        };
        match self.provider.unlock(&person_id).await {
            Ok(Unlock::Person(person)) => {
                self.credits_used += 1;
                apply_unlock(contact, person);
                debug!(name = %contact.name, "contact unlocked");
            }
            Ok(Unlock::OutOfCredits) => {
                warn!("out of Apollo credits, no further unlocks this run");
                self.unlock_emails = false;
            }
            Err(e) => {
                warn!(person_id, error = %e, "unlock failed, keeping masked contact");
            }
        }
    }
}
