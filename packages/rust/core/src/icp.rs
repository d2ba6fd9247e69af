//! Ideal Customer Profile generation.
//!
//! The model is asked who would *buy* from the seller, not what the seller
//! does. Its reply is parsed leniently: missing fields get defaults, scalars
//! where lists are expected are wrapped, and unknown enum labels degrade to
//! `unknown`/`unclear` rather than failing the step.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use leadscout_shared::{GeographyScope, Icp, Result, SellerBusinessType, ServiceableGeography};

use crate::llm::{GenerationOptions, LanguageModel, parse_json_object, truncate_content};

/// Website content sent to the model is cut to this many characters.
const MAX_CONTENT_CHARS: usize = 5000;

/// At most this many regions are spelled out in a geographic summary.
const SUMMARY_REGION_LIMIT: usize = 5;

const DEFAULT_WHAT_THEY_SELL: &str = "Unknown product/service";
const DEFAULT_INDUSTRY: &str = "Various industries";
const DEFAULT_COMPANY_SIZE: &str = "SMB to Enterprise";
const DEFAULT_CUSTOMER_GEOGRAPHY: &str = "Global";
const NO_GEOGRAPHY_NOTES: &str = "No geographic information detected";

/// Industry labels too generic to drive a search.
const VAGUE_INDUSTRIES: &[&str] = &["software", "technology", "services", "business", "companies"];

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Derives an [`Icp`] from scraped website text.
pub struct IcpGenerator {
    model: Arc<dyn LanguageModel>,
}

impl IcpGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One model call, then lenient parsing. Fails only when the reply holds no JSON object.
    #[instrument(skip_all, fields(content_chars = content.len()))]
    pub async fn generate(&self, content: &str) -> Result<Icp> {
        let prompt = build_prompt(content);
        let reply = self
            .model
            .generate(&prompt, GenerationOptions::new(0.1, 1500))
            .await?;

        let raw: Value = parse_json_object(&reply, "ICP")?;
        let icp = normalize_icp(&raw);

        for warning in validate_icp(&icp) {
            warn!(%warning, "ICP check");
        }

        info!(
            seller_type = icp.seller_business_type.as_str(),
            buyers = icp.target_buyers.len(),
            scope = ?icp.serviceable_geography.scope,
            "ICP generated"
        );
        Ok(icp)
    }
}

fn build_prompt(content: &str) -> String {
    let content = truncate_content(content, MAX_CONTENT_CHARS);
    format!(
        r#"You are a B2B sales research expert. Identify WHO would BUY this company's product or service.

Step 1: classify the seller as one of:
- physical_service (construction, cleaning, maintenance, logistics): customers COMMISSION new work, e.g. developers and chains that are expanding, not companies that merely own facilities.
- software_saas (tools, platforms, analytics): customers HAVE THE PROBLEM the software solves; other software vendors are competitors.
- b2b_supplier (parts, components, materials): customers INCORPORATE the products into their own.
- engineering_services (R&D, embedded software, design): customers OUTSOURCE this capability; firms offering the same service are competitors.
- consulting (strategy, advisory): customers are undergoing change and need guidance; other consultancies are not customers.

Step 2: describe the buyer. Be specific about customer industries. Always list competitors and in-house providers under avoid_company_types.

Step 3: detect the seller's serviceable geography from the content. Use "regional" when it names states or regions, "national" for a single country, "global" for worldwide service, and "unclear" otherwise.

WEBSITE CONTENT:
{content}

Return ONLY this JSON:
{{
  "seller_business_type": "physical_service | software_saas | b2b_supplier | engineering_services | consulting",
  "what_they_sell": "Specific product/service description",
  "customer_industry": "Comma-separated types of companies that would BUY",
  "customer_company_size": "Size of buyer companies",
  "target_buyers": ["Job title 1", "Job title 2"],
  "pain_points_solved": ["Problem 1", "Problem 2"],
  "ideal_customer_characteristics": ["Trait that signals an active need"],
  "customer_geography": "Where customers are located",
  "serviceable_geography": {{
    "scope": "regional | national | global | unclear",
    "countries": ["USA"],
    "states_or_regions": ["CA", "TX"],
    "notes": "Geographic limitation details"
  }},
  "customer_business_model": "developer | expanding_retailer | outsourcing_oem | end_user_brand | other",
  "avoid_company_types": ["Competitors selling similar products", "Companies that do this in-house"]
}}"#
    )
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Build an [`Icp`] from an arbitrary JSON object, filling defaults.
pub fn normalize_icp(raw: &Value) -> Icp {
    let serviceable_geography = match raw.get("serviceable_geography") {
        Some(Value::Object(_)) => normalize_geography(&raw["serviceable_geography"]),
        Some(_) => ServiceableGeography {
            notes: "Invalid format".into(),
            ..Default::default()
        },
        None => ServiceableGeography {
            notes: NO_GEOGRAPHY_NOTES.into(),
            ..Default::default()
        },
    };

    let seller_business_type = string_field(raw, "seller_business_type")
        .map(|label| SellerBusinessType::from_label(&label))
        .unwrap_or_default();

    Icp {
        seller_business_type,
        what_they_sell: string_field(raw, "what_they_sell")
            .unwrap_or_else(|| DEFAULT_WHAT_THEY_SELL.into()),
        customer_industry: string_field(raw, "customer_industry")
            .unwrap_or_else(|| DEFAULT_INDUSTRY.into()),
        customer_company_size: string_field(raw, "customer_company_size")
            .unwrap_or_else(|| DEFAULT_COMPANY_SIZE.into()),
        target_buyers: list_field(raw, "target_buyers"),
        pain_points_solved: list_field(raw, "pain_points_solved"),
        ideal_customer_characteristics: list_field(raw, "ideal_customer_characteristics"),
        customer_geography: string_field(raw, "customer_geography")
            .unwrap_or_else(|| DEFAULT_CUSTOMER_GEOGRAPHY.into()),
        serviceable_geography,
        customer_business_model: string_field(raw, "customer_business_model").unwrap_or_default(),
        avoid_company_types: list_field(raw, "avoid_company_types"),
    }
}

fn normalize_geography(geo: &Value) -> ServiceableGeography {
    let scope = string_field(geo, "scope")
        .map(|label| GeographyScope::from_label(&label))
        .unwrap_or_default();

    // Only arrays count here; a scalar country is too ambiguous to keep.
    let strict_list = |key: &str| match geo.get(key) {
        Some(Value::Array(_)) => list_field(geo, key),
        _ => Vec::new(),
    };

    ServiceableGeography {
        scope,
        countries: strict_list("countries"),
        states_or_regions: strict_list("states_or_regions"),
        notes: string_field(geo, "notes").unwrap_or_default(),
    }
}

/// Non-empty string value; numbers and booleans are rendered as text.
fn string_field(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// List of strings; a lone scalar becomes a one-element list.
fn list_field(raw: &Value, key: &str) -> Vec<String> {
    match raw.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Validation and summaries
// ---------------------------------------------------------------------------

/// Soft checks on a generated ICP. Never fails; returns human-readable warnings.
pub fn validate_icp(icp: &Icp) -> Vec<String> {
    let mut warnings = Vec::new();

    if icp.ideal_customer_characteristics.is_empty() {
        warnings.push("no customer characteristics defined; ICP may be too generic".into());
    }
    if icp.target_buyers.is_empty() {
        warnings.push("no target buyers defined".into());
    }
    if icp.avoid_company_types.is_empty() {
        warnings.push("avoid_company_types is empty; competitors will not be excluded".into());
    }
    if icp.pain_points_solved.is_empty() {
        warnings.push("no pain points defined".into());
    }

    let industry = icp.customer_industry.trim().to_lowercase();
    if VAGUE_INDUSTRIES.contains(&industry.as_str()) {
        warnings.push(format!("customer industry is too vague: '{}'", icp.customer_industry));
    }

    match icp.seller_business_type {
        SellerBusinessType::EngineeringServices => {
            let avoid = icp.avoid_company_types.join(" ").to_lowercase();
            if !["competitor", "similar service", "same type"]
                .iter()
                .any(|kw| avoid.contains(kw))
            {
                warnings.push(
                    "engineering services should list competitors under avoid_company_types".into(),
                );
            }
        }
        SellerBusinessType::SoftwareSaas => {
            let traits = icp.ideal_customer_characteristics.join(" ").to_lowercase();
            if !["need", "problem", "challenge", "pain", "struggle"]
                .iter()
                .any(|kw| traits.contains(kw))
            {
                warnings.push(
                    "software ICP characteristics should describe the problem buyers have".into(),
                );
            }
        }
        _ => {}
    }

    let geo = &icp.serviceable_geography;
    if geo.scope == GeographyScope::Regional && geo.states_or_regions.is_empty() {
        warnings.push("scope is regional but no regions are listed".into());
    }

    warnings
}

/// One-line description of where the seller can deliver.
pub fn geographic_summary(geo: &ServiceableGeography) -> String {
    match geo.scope {
        GeographyScope::Global => "Global service area - no geographic restrictions".into(),
        GeographyScope::National if geo.countries.is_empty() => "National service area".into(),
        GeographyScope::National => format!("National service in: {}", geo.countries.join(", ")),
        GeographyScope::Regional => match area_parts(geo) {
            Some(parts) => format!("Regional service - {parts}"),
            None => "Regional service area (specific regions not identified)".into(),
        },
        GeographyScope::Custom => match area_parts(geo) {
            Some(parts) => format!("Custom service area - {parts}"),
            None => "Custom service area".into(),
        },
        GeographyScope::Unclear => "Geographic scope unclear - no filtering applied".into(),
    }
}

fn area_parts(geo: &ServiceableGeography) -> Option<String> {
    let mut parts = Vec::new();
    if !geo.countries.is_empty() {
        parts.push(format!("Countries: {}", geo.countries.join(", ")));
    }
    let regions = &geo.states_or_regions;
    if !regions.is_empty() {
        if regions.len() <= SUMMARY_REGION_LIMIT {
            parts.push(format!("Regions: {}", regions.join(", ")));
        } else {
            parts.push(format!(
                "Regions: {} and {} more",
                regions[..SUMMARY_REGION_LIMIT].join(", "),
                regions.len() - SUMMARY_REGION_LIMIT
            ));
        }
    }
    (!parts.is_empty()).then(|| parts.join(" | "))
}
