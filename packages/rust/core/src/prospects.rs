//! Prospect discovery: search, classify, and fall back to model suggestions.
//!
//! 1. Build search queries from ICP templates plus model-suggested queries
//! 2. Run the searches and collect unique, plausible company domains
//! 3. Scrape each candidate and ask the model whether it would buy
//! 4. When too few pass, ask the model for companies directly and verify them

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use leadscout_scraper::SiteScraper;
use leadscout_shared::{
    ErrorKind, GeographyScope, Icp, Prospect, ProspectSource, Result, SearchConfig,
    SellerBusinessType,
};

use crate::llm::{GenerationOptions, LanguageModel, parse_json_array, parse_json_object, truncate_chars};
use crate::search::CompanySearch;

/// Hosts that never belong to a prospect company.
const BLOCKLIST: &[&str] = &[
    // social
    "linkedin.com", "facebook.com", "twitter.com", "instagram.com", "youtube.com", "tiktok.com",
    "pinterest.com", "x.com",
    // news
    "reuters.com", "bloomberg.com", "forbes.com", "techcrunch.com", "businessinsider.com",
    "cnbc.com", "wsj.com", "nytimes.com", "cnn.com", "bbc.com", "foxnews.com",
    // directories and reviews
    "crunchbase.com", "glassdoor.com", "indeed.com", "yelp.com", "g2.com", "capterra.com",
    "trustpilot.com", "bbb.org", "yellowpages.com", "manta.com", "clutch.co", "goodfirms.co",
    "toptal.com",
    // code hosts
    "github.com", "gitlab.com", "stackoverflow.com", "npmjs.com",
    // reference
    "wikipedia.org", "medium.com", "quora.com", "reddit.com",
    // job boards
    "greenhouse.io", "lever.co", "workday.com", "jobvite.com", "ziprecruiter.com", "monster.com",
    "careerbuilder.com",
    // academic publishers
    "sciencedirect.com", "researchgate.net", "academia.edu", "springer.com", "elsevier.com",
];

const BLOCKED_SUFFIXES: &[&str] = &[".gov", ".edu", ".mil"];

const ALLOWED_TLDS: &[&str] = &[
    ".com", ".io", ".co", ".net", ".org", ".ai", ".tech", ".us", ".ca", ".uk", ".de", ".in", ".biz",
];

const MAX_INDUSTRIES: usize = 5;
const GEO_QUERIES_PER_INDUSTRY: usize = 2;
const LLM_QUERY_COUNT: usize = 10;
const FALLBACK_CANDIDATES: usize = 20;
/// Unverified model suggestions never score above this.
const UNVERIFIED_CONFIDENCE_CAP: f64 = 85.0;
const CLASSIFY_CONTENT_CHARS: usize = 3500;

// ---------------------------------------------------------------------------
// Query generation
// ---------------------------------------------------------------------------

/// Deterministic queries from the ICP's industries and geography.
pub fn template_queries(icp: &Icp) -> Vec<String> {
    let industries: Vec<&str> = icp
        .customer_industry
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(MAX_INDUSTRIES)
        .collect();

    let geo = &icp.serviceable_geography;
    let geo_terms: Vec<&String> = match geo.scope {
        GeographyScope::Regional => geo.states_or_regions.iter().take(5).collect(),
        GeographyScope::National => geo.countries.iter().take(3).collect(),
        GeographyScope::Custom => geo.countries.iter().chain(&geo.states_or_regions).collect(),
        GeographyScope::Global | GeographyScope::Unclear => Vec::new(),
    };

    let mut queries = Vec::new();
    for industry in industries {
        queries.push(format!("largest {industry} companies USA"));
        queries.push(format!("top {industry} companies headquarters"));
        queries.push(format!("leading {industry} companies"));
        queries.push(format!("{industry} companies with facilities"));
        for term in geo_terms.iter().take(GEO_QUERIES_PER_INDUSTRY) {
            queries.push(format!("{industry} companies {term}"));
        }
    }
    queries
}

/// Order-preserving, case-insensitive dedupe, capped at `max`.
pub fn dedupe_queries(queries: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}

// ---------------------------------------------------------------------------
// Domain filtering
// ---------------------------------------------------------------------------

/// Registrable-ish domain of a URL: host without `www.`, lowercased,
/// cut to the last two labels unless it looks like `example.co.uk`.
pub fn extract_domain(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let labels: Vec<&str> = host.split('.').collect();
    let domain = if labels.len() > 2 && !matches!(labels[labels.len() - 2], "co" | "com") {
        labels[labels.len() - 2..].join(".")
    } else {
        host.to_string()
    };
    Some(domain).filter(|d| !d.is_empty())
}

/// Whether a domain could plausibly be a prospect company.
pub fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    if domain.len() < 4 {
        return false;
    }
    let blocked = BLOCKLIST
        .iter()
        .any(|b| domain == *b || domain.ends_with(&format!(".{b}")));
    if blocked || BLOCKED_SUFFIXES.iter().any(|s| domain.ends_with(s)) {
        return false;
    }
    ALLOWED_TLDS.iter().any(|tld| domain.ends_with(tld))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// The model's verdict on one candidate company.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_qualified_prospect: bool,
    pub company_name: String,
    pub what_they_do: String,
    pub is_competitor: bool,
    pub would_buy_reasoning: String,
    /// 0-100
    pub confidence: f64,
    pub rejection_reason: String,
}

impl Classification {
    fn from_value(raw: &Value, domain: &str) -> Self {
        let text = |key: &str| {
            raw.get(key)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        let flag = |key: &str| match raw.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        let confidence = match raw.get("confidence") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
            _ => 50.0,
        };

        let company_name = Some(text("company_name"))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| name_from_domain(domain));

        Self {
            is_qualified_prospect: flag("is_qualified_prospect"),
            company_name,
            what_they_do: text("what_they_do"),
            is_competitor: flag("is_competitor"),
            would_buy_reasoning: text("would_buy_reasoning"),
            confidence: confidence.clamp(0.0, 100.0),
            rejection_reason: text("rejection_reason"),
        }
    }

    /// Qualified, not a competitor, and confident enough.
    pub fn accepts(&self, min_confidence: f64) -> bool {
        self.is_qualified_prospect && !self.is_competitor && self.confidence >= min_confidence
    }
}

/// `acme-robotics.com` -> `Acme-robotics`
fn name_from_domain(domain: &str) -> String {
    let first = domain.split('.').next().unwrap_or(domain);
    let mut chars = first.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn business_type_guidance(kind: SellerBusinessType) -> &'static str {
    match kind {
        SellerBusinessType::PhysicalService => {
            "Qualified: developers, expanding chains, and organisations building, relocating or renovating. \
             Reject: companies that merely own facilities, facilities managers, trade associations, \
             and other construction or maintenance firms (competitors)."
        }
        SellerBusinessType::EngineeringServices => {
            "Qualified: OEMs and companies that outsource engineering or are moving to new technology. \
             Reject: anyone selling similar engineering, IT or development services (competitors) and \
             companies with large in-house teams."
        }
        SellerBusinessType::SoftwareSaas => {
            "Qualified: companies that have the specific problem the software solves. \
             Reject: other software vendors, platforms and marketplaces, and companies too small to need it."
        }
        SellerBusinessType::B2bSupplier => {
            "Qualified: manufacturers and OEMs that incorporate or consume these products. \
             Reject: distributors, resellers and other suppliers of similar products."
        }
        SellerBusinessType::Consulting => {
            "Qualified: companies undergoing change, entering new markets or lacking internal expertise. \
             Reject: other consulting firms and companies not in a change cycle."
        }
        SellerBusinessType::Unknown => {
            "Reject companies that sell similar products or services, and platforms that serve the \
             industry without being buyers themselves."
        }
    }
}

fn geography_requirement(icp: &Icp) -> String {
    let geo = &icp.serviceable_geography;
    let areas = match geo.scope {
        GeographyScope::Regional => &geo.states_or_regions,
        GeographyScope::National => &geo.countries,
        GeographyScope::Custom if !geo.states_or_regions.is_empty() => &geo.states_or_regions,
        GeographyScope::Custom => &geo.countries,
        _ => return String::new(),
    };
    if areas.is_empty() {
        String::new()
    } else {
        format!("GEOGRAPHIC REQUIREMENT: the company must operate in {}", areas.join(", "))
    }
}

fn classification_prompt(domain: &str, content: &str, icp: &Icp) -> String {
    let avoid = if icp.avoid_company_types.is_empty() {
        "- Competitors selling similar products/services".to_string()
    } else {
        icp.avoid_company_types
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let buyers: Vec<&str> = icp.target_buyers.iter().take(5).map(String::as_str).collect();
    let traits: Vec<&str> = icp
        .ideal_customer_characteristics
        .iter()
        .take(5)
        .map(String::as_str)
        .collect();

    format!(
        r#"You are a B2B sales qualification expert. Decide whether this company is a QUALIFIED PROSPECT.

SELLER
Business type: {seller_type}
Sells: {sells}

IDEAL CUSTOMER PROFILE
Target industries: {industry}
Target buyer titles: {buyers}
Ideal characteristics: {traits}
{geo}

REJECT THESE COMPANY TYPES
{avoid}

GUIDANCE
{guidance}

CANDIDATE
Domain: {domain}
Website content (excerpt):
{content}

Return ONLY this JSON:
{{
  "is_qualified_prospect": true,
  "company_name": "Official company name",
  "what_they_do": "One sentence",
  "is_competitor": false,
  "would_buy_reasoning": "One sentence",
  "confidence": 0,
  "rejection_reason": "Only when not qualified"
}}"#,
        seller_type = icp.seller_business_type.as_str(),
        sells = icp.what_they_sell,
        industry = icp.customer_industry,
        buyers = buyers.join(", "),
        traits = traits.join(", "),
        geo = geography_requirement(icp),
        guidance = business_type_guidance(icp.seller_business_type),
        content = truncate_chars(content, CLASSIFY_CONTENT_CHARS),
    )
}

// ---------------------------------------------------------------------------
// Finder
// ---------------------------------------------------------------------------

/// Tunables taken from `[search]`.
#[derive(Debug, Clone)]
pub struct FinderSettings {
    pub max_queries: usize,
    pub max_candidates: usize,
    pub target_prospects: usize,
    pub min_confidence: f64,
    pub fallback_threshold: usize,
    pub max_results: usize,
    /// Candidate sites with less text than this are skipped.
    pub min_content_chars: usize,
}

impl FinderSettings {
    pub fn from_config(search: &SearchConfig, min_content_chars: usize) -> Self {
        Self {
            max_queries: search.max_queries,
            max_candidates: search.max_candidates,
            target_prospects: search.target_prospects,
            min_confidence: f64::from(search.min_confidence),
            fallback_threshold: search.fallback_threshold,
            max_results: search.max_results,
            min_content_chars,
        }
    }
}

impl Default for FinderSettings {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default(), 200)
    }
}

#[derive(Debug, Deserialize)]
struct SuggestedCompany {
    name: String,
    domain: String,
    #[serde(default, alias = "why_buyer")]
    why_good_fit: String,
    #[serde(default, alias = "estimated_confidence")]
    confidence: Option<f64>,
}

/// Outcome of checking a model-suggested company against its own website.
enum Verification {
    Accepted(Classification),
    Rejected,
    Unverifiable,
}

/// Finds companies that match an ICP.
pub struct ProspectFinder {
    model: Arc<dyn LanguageModel>,
    search: Arc<dyn CompanySearch>,
    scraper: Arc<dyn SiteScraper>,
    settings: FinderSettings,
}

impl ProspectFinder {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn CompanySearch>,
        scraper: Arc<dyn SiteScraper>,
        settings: FinderSettings,
    ) -> Self {
        Self {
            model,
            search,
            scraper,
            settings,
        }
    }

    /// Find prospects for `icp`, never returning the seller's own domain.
    ///
    /// An empty list is a valid outcome. Only credential failures abort.
    #[instrument(skip_all, fields(seller = %seller_domain))]
    pub async fn find(&self, icp: &Icp, seller_domain: &str) -> Result<Vec<Prospect>> {
        let queries = self.build_queries(icp).await;
        info!(queries = queries.len(), "generated search queries");

        let candidates = self.collect_candidates(&queries, seller_domain).await?;
        info!(candidates = candidates.len(), "collected candidate domains");

        let mut prospects = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(seller_domain.to_lowercase());

        for (i, domain) in candidates.iter().enumerate() {
            seen.insert(domain.clone());
            debug!(domain, n = i + 1, total = candidates.len(), "classifying candidate");

            let Some(content) = self.scrape_candidate(domain).await else {
                continue;
            };
            match self.classify(domain, &content, icp).await {
                Ok(c) if c.accepts(self.settings.min_confidence) => {
                    info!(domain, confidence = c.confidence, name = %c.company_name, "accepted prospect");
                    prospects.push(to_prospect(domain, c, ProspectSource::WebSearchVerified));
                }
                Ok(c) => {
                    debug!(domain, reason = %c.rejection_reason, "rejected candidate");
                }
                Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
                Err(e) => {
                    warn!(domain, error = %e, "classification failed, skipping");
                }
            }

            if prospects.len() >= self.settings.target_prospects {
                info!(prospects = prospects.len(), "target reached");
                break;
            }
        }

        if prospects.len() < self.settings.fallback_threshold {
            self.fallback(icp, &mut prospects, &mut seen).await?;
        }

        prospects.sort_by(|a, b| b.confidence_score.total_cmp(&a.confidence_score));
        prospects.truncate(self.settings.max_results);

        info!(prospects = prospects.len(), "prospect search complete");
        Ok(prospects)
    }

    async fn build_queries(&self, icp: &Icp) -> Vec<String> {
        let mut queries = template_queries(icp);
        match self.llm_queries(icp).await {
            Ok(extra) => queries.extend(extra),
            Err(e) => warn!(error = %e, "model query generation failed, using templates only"),
        }
        dedupe_queries(queries, self.settings.max_queries)
    }

    async fn llm_queries(&self, icp: &Icp) -> Result<Vec<String>> {
        let prompt = format!(
            r#"Generate {LLM_QUERY_COUNT} Google search queries to find companies that would BUY this:

SERVICE: {sells}
TARGET INDUSTRIES: {industry}

Rules:
- Find companies that NEED this (end users), not companies that SELL something similar
- Do not use the words "software", "platform", "tool" or "solution"

Return ONLY a JSON array of strings."#,
            sells = icp.what_they_sell,
            industry = icp.customer_industry,
        );
        let reply = self
            .model
            .generate(&prompt, GenerationOptions::new(0.2, 500))
            .await?;
        let raw: Vec<Value> = parse_json_array(&reply, "search queries")?;
        Ok(raw
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|q| q.len() > 5)
            .take(LLM_QUERY_COUNT)
            .collect())
    }

    async fn collect_candidates(&self, queries: &[String], seller_domain: &str) -> Result<Vec<String>> {
        let seller = seller_domain.to_lowercase();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for query in queries {
            let hits = match self.search.search(query).await {
                Ok(hits) => hits,
                Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
                Err(e) => {
                    warn!(query, error = %e, "search failed, skipping query");
                    continue;
                }
            };
            for hit in hits {
                let Some(domain) = extract_domain(&hit.link) else {
                    continue;
                };
                if domain != seller && is_valid_domain(&domain) && seen.insert(domain.clone()) {
                    candidates.push(domain);
                }
            }
            if candidates.len() >= self.settings.max_candidates {
                break;
            }
        }

        candidates.truncate(self.settings.max_candidates);
        Ok(candidates)
    }

    /// Site text, or `None` when the site is unreachable or too thin.
    async fn scrape_candidate(&self, domain: &str) -> Option<String> {
        match self.scraper.scrape(&format!("https://{domain}")).await {
            Ok(site) if site.combined_text.chars().count() >= self.settings.min_content_chars => {
                Some(site.combined_text)
            }
            Ok(_) => {
                debug!(domain, "insufficient content, skipping");
                None
            }
            Err(e) => {
                debug!(domain, error = %e, "scrape failed, skipping");
                None
            }
        }
    }

    async fn classify(&self, domain: &str, content: &str, icp: &Icp) -> Result<Classification> {
        let prompt = classification_prompt(domain, content, icp);
        let reply = self
            .model
            .generate(&prompt, GenerationOptions::new(0.0, 500))
            .await?;
        let raw: Value = parse_json_object(&reply, "classification")?;
        Ok(Classification::from_value(&raw, domain))
    }

    async fn verify(&self, domain: &str, icp: &Icp) -> Result<Verification> {
        let Some(content) = self.scrape_candidate(domain).await else {
            return Ok(Verification::Unverifiable);
        };
        match self.classify(domain, &content, icp).await {
            Ok(c) if c.accepts(self.settings.min_confidence) => Ok(Verification::Accepted(c)),
            Ok(_) => Ok(Verification::Rejected),
            Err(e) if e.kind() == ErrorKind::Auth => Err(e),
            Err(e) => {
                debug!(domain, error = %e, "verification classify failed");
                Ok(Verification::Unverifiable)
            }
        }
    }

    async fn fallback(
        &self,
        icp: &Icp,
        prospects: &mut Vec<Prospect>,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        info!(have = prospects.len(), "too few prospects, asking the model for candidates");

        let suggestions = match self.suggest_companies(icp).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
            Err(e) => {
                warn!(error = %e, "model suggestions failed");
                return Ok(());
            }
        };

        for suggestion in suggestions {
            if prospects.len() >= self.settings.target_prospects {
                break;
            }
            let domain = suggestion.domain.trim().to_lowercase();
            let domain = domain.strip_prefix("www.").unwrap_or(&domain).to_string();
            if !is_valid_domain(&domain) || !seen.insert(domain.clone()) {
                continue;
            }

            match self.verify(&domain, icp).await? {
                Verification::Accepted(c) => {
                    info!(domain, confidence = c.confidence, "verified suggested prospect");
                    prospects.push(to_prospect(&domain, c, ProspectSource::LlmVerified));
                }
                Verification::Rejected => debug!(domain, "suggested prospect rejected"),
                Verification::Unverifiable => {
                    let confidence = suggestion
                        .confidence
                        .unwrap_or(70.0)
                        .min(UNVERIFIED_CONFIDENCE_CAP);
                    prospects.push(Prospect {
                        name: suggestion.name.clone(),
                        domain,
                        why_good_fit: if suggestion.why_good_fit.is_empty() {
                            "Matches target customer profile".into()
                        } else {
                            suggestion.why_good_fit.clone()
                        },
                        what_they_do: String::new(),
                        source: ProspectSource::LlmGenerated,
                        confidence_score: confidence / 100.0,
                    });
                }
            }
        }
        Ok(())
    }

    async fn suggest_companies(&self, icp: &Icp) -> Result<Vec<SuggestedCompany>> {
        let geo = geography_requirement(icp);
        let prompt = format!(
            r#"List {FALLBACK_CANDIDATES} REAL, currently operating companies that would BUY this:

SERVICE: {sells}
TARGET CUSTOMER INDUSTRIES: {industry}
{geo}

Mix large well-known companies with mid-size regional ones. Do not include competitors,
consulting firms, or companies outside the required geography.

Return ONLY a JSON array:
[{{"name": "Company", "domain": "company.com", "why_good_fit": "One sentence", "confidence": 80}}]"#,
            sells = icp.what_they_sell,
            industry = icp.customer_industry,
            geo = if geo.is_empty() { "No geographic restriction".to_string() } else { geo },
        );
        let reply = self
            .model
            .generate(&prompt, GenerationOptions::new(0.3, 2000))
            .await?;
        let raw: Vec<Value> = parse_json_array(&reply, "company suggestions")?;
        Ok(raw
            .into_iter()
            .filter_map(|v| serde_json::from_value::<SuggestedCompany>(v).ok())
            .take(FALLBACK_CANDIDATES)
            .collect())
    }
}

fn to_prospect(domain: &str, c: Classification, source: ProspectSource) -> Prospect {
    Prospect {
        name: c.company_name,
        domain: domain.to_string(),
        why_good_fit: if c.would_buy_reasoning.is_empty() {
            "Matches ICP".into()
        } else {
            c.would_buy_reasoning
        },
        what_they_do: c.what_they_do,
        source,
        confidence_score: c.confidence / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::search::SearchHit;
    use async_trait::async_trait;
    use leadscout_scraper::ScrapedSite;
    use leadscout_shared::{LeadScoutError, ServiceableGeography};

    struct FixedSearch(Vec<&'static str>);

    #[async_trait]
    impl CompanySearch for FixedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(self
                .0
                .iter()
                .map(|link| SearchHit {
                    title: String::new(),
                    link: link.to_string(),
                    snippet: String::new(),
                })
                .collect())
        }
    }

    /// Serves long text for every domain except those listed as down.
    struct FakeSites {
        down: Vec<&'static str>,
    }

    #[async_trait]
    impl SiteScraper for FakeSites {
        async fn scrape(&self, url: &str) -> Result<ScrapedSite> {
            if self.down.iter().any(|d| url.contains(d)) {
                return Err(LeadScoutError::Network(format!("{url}: connection refused")));
            }
            let text = format!("{url} operates hospitals and outpatient clinics. ").repeat(10);
            Ok(ScrapedSite::from_text(url, &text))
        }
    }

    fn icp() -> Icp {
        Icp {
            seller_business_type: SellerBusinessType::PhysicalService,
            what_they_sell: "Medical waste disposal".into(),
            customer_industry: "Hospitals, Dental clinics".into(),
            target_buyers: vec!["Facilities Director".into()],
            serviceable_geography: ServiceableGeography {
                scope: GeographyScope::Regional,
                countries: vec!["USA".into()],
                states_or_regions: vec!["TX".into(), "OK".into(), "LA".into()],
                notes: String::new(),
            },
            ..Default::default()
        }
    }

    fn settings() -> FinderSettings {
        FinderSettings {
            fallback_threshold: 0,
            ..Default::default()
        }
    }

    #[test]
    fn templates_include_geo_terms() {
        let queries = template_queries(&icp());
        assert_eq!(queries.len(), 2 * 6);
        assert_eq!(queries[0], "largest Hospitals companies USA");
        assert!(queries.contains(&"Hospitals companies TX".to_string()));
        assert!(queries.contains(&"Dental clinics companies OK".to_string()));
        assert!(!queries.iter().any(|q| q.ends_with(" LA")));
    }

    #[test]
    fn custom_scope_uses_countries_then_regions() {
        let mut icp = icp();
        icp.customer_industry = "Hotels".into();
        icp.serviceable_geography.scope = GeographyScope::Custom;
        let queries = template_queries(&icp);
        assert_eq!(queries[4], "Hotels companies USA");
        assert_eq!(queries[5], "Hotels companies TX");
    }

    #[test]
    fn dedupe_is_case_insensitive_and_capped() {
        let queries = vec!["A b".into(), "a B".into(), "c".into(), "d".into()];
        assert_eq!(dedupe_queries(queries, 2), vec!["A b", "c"]);
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(extract_domain("https://www.HCAhealthcare.com/about"), Some("hcahealthcare.com".into()));
        assert_eq!(extract_domain("https://careers.acme.io/jobs"), Some("acme.io".into()));
        assert_eq!(extract_domain("https://www.nhs.co.uk/"), Some("nhs.co.uk".into()));
        assert_eq!(extract_domain("not a url"), None);
    }

    #[test]
    fn domain_validation() {
        assert!(is_valid_domain("hcahealthcare.com"));
        assert!(is_valid_domain("fedex.com"));
        assert!(!is_valid_domain("linkedin.com"));
        assert!(!is_valid_domain("en.wikipedia.org"));
        assert!(!is_valid_domain("tx.gov"));
        assert!(!is_valid_domain("acme.xyz"));
        assert!(!is_valid_domain("io"));
    }

    #[test]
    fn classification_defaults_and_acceptance() {
        let c = Classification::from_value(
            &serde_json::json!({"is_qualified_prospect": true, "confidence": "75%"}),
            "baylor.com",
        );
        assert_eq!(c.company_name, "Baylor");
        assert_eq!(c.confidence, 75.0);
        assert!(c.accepts(60.0));

        let competitor = Classification {
            is_competitor: true,
            ..c.clone()
        };
        assert!(!competitor.accepts(60.0));
    }

    #[tokio::test]
    async fn accepts_qualified_candidates_and_skips_seller() {
        let model = ScriptedModel::new()
            .when("Generate 10 Google search queries", r#"["hospital expansion texas 2025"]"#)
            .when(
                "Domain: stmarys.org",
                r#"{"is_qualified_prospect": true, "company_name": "St. Mary's", "would_buy_reasoning": "Opening two new clinics", "confidence": 90}"#,
            )
            .when(
                "Domain: wastepros.com",
                r#"{"is_qualified_prospect": false, "is_competitor": true, "confidence": 95, "rejection_reason": "competitor"}"#,
            )
            .when(
                "Domain: clinicnet.com",
                r#"{"is_qualified_prospect": true, "company_name": "ClinicNet", "confidence": 65}"#,
            );
        let search = FixedSearch(vec![
            "https://www.stmarys.org/",
            "https://wastepros.com/services",
            "https://www.linkedin.com/company/stmarys",
            "https://medwaste.com/",
            "https://clinicnet.com",
        ]);
        let finder = ProspectFinder::new(
            Arc::new(model),
            Arc::new(search),
            Arc::new(FakeSites { down: vec![] }),
            settings(),
        );

        let prospects = finder.find(&icp(), "medwaste.com").await.unwrap();
        let domains: Vec<&str> = prospects.iter().map(|p| p.domain.as_str()).collect();
        assert_eq!(domains, vec!["stmarys.org", "clinicnet.com"]);
        assert_eq!(prospects[0].confidence_score, 0.9);
        assert_eq!(prospects[0].why_good_fit, "Opening two new clinics");
        assert_eq!(prospects[1].why_good_fit, "Matches ICP");
        assert!(prospects.iter().all(|p| p.source == ProspectSource::WebSearchVerified));
    }

    #[tokio::test]
    async fn no_candidates_is_empty_not_error() {
        let model = ScriptedModel::new().when("Generate 10", "[]");
        let finder = ProspectFinder::new(
            Arc::new(model),
            Arc::new(FixedSearch(vec![])),
            Arc::new(FakeSites { down: vec![] }),
            settings(),
        );
        assert!(finder.find(&icp(), "medwaste.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fallback_verifies_or_caps_suggestions() {
        let model = ScriptedModel::new()
            .when("Generate 10", "not json")
            .when(
                "List 20 REAL",
                r#"[
                    {"name": "Texas Health", "domain": "texashealth.org", "why_good_fit": "Hospital network", "confidence": 92},
                    {"name": "Offline Clinics", "domain": "offlineclinics.com", "confidence": 95},
                    {"name": "Bad Row"}
                ]"#,
            )
            .when(
                "Domain: texashealth.org",
                r#"{"is_qualified_prospect": true, "company_name": "Texas Health Resources", "confidence": 80}"#,
            );
        let finder = ProspectFinder::new(
            Arc::new(model),
            Arc::new(FixedSearch(vec![])),
            Arc::new(FakeSites {
                down: vec!["offlineclinics.com"],
            }),
            FinderSettings::default(),
        );

        let prospects = finder.find(&icp(), "medwaste.com").await.unwrap();
        assert_eq!(prospects.len(), 2);
        assert_eq!(prospects[0].domain, "offlineclinics.com");
        assert_eq!(prospects[0].source, ProspectSource::LlmGenerated);
        assert_eq!(prospects[0].confidence_score, 0.85);
        assert_eq!(prospects[1].name, "Texas Health Resources");
        assert_eq!(prospects[1].source, ProspectSource::LlmVerified);
    }
}
