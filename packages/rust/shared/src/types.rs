//! Core domain types for a prospecting run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Email shown for contacts whose address was not unlocked.
pub const MASKED_EMAIL: &str = "email_not_unlocked@domain.com";

// ---------------------------------------------------------------------------
// ICP
// ---------------------------------------------------------------------------

/// What kind of business the seller runs. Drives how prospects are judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerBusinessType {
    PhysicalService,
    SoftwareSaas,
    B2bSupplier,
    EngineeringServices,
    Consulting,
    #[default]
    Unknown,
}

impl SellerBusinessType {
    /// Lenient parse of a model-produced label; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "physical_service" => Self::PhysicalService,
            "software_saas" => Self::SoftwareSaas,
            "b2b_supplier" => Self::B2bSupplier,
            "engineering_services" => Self::EngineeringServices,
            "consulting" => Self::Consulting,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhysicalService => "physical_service",
            Self::SoftwareSaas => "software_saas",
            Self::B2bSupplier => "b2b_supplier",
            Self::EngineeringServices => "engineering_services",
            Self::Consulting => "consulting",
            Self::Unknown => "unknown",
        }
    }
}

/// How far the seller can serve customers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyScope {
    Regional,
    National,
    Global,
    #[default]
    Unclear,
    /// Set by a user override of countries or regions.
    Custom,
}

impl GeographyScope {
    /// Lenient parse; unknown labels become `Unclear`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "regional" => Self::Regional,
            "national" => Self::National,
            "global" => Self::Global,
            "custom" => Self::Custom,
            _ => Self::Unclear,
        }
    }
}

/// Where the seller can deliver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceableGeography {
    pub scope: GeographyScope,
    pub countries: Vec<String>,
    pub states_or_regions: Vec<String>,
    pub notes: String,
}

/// Ideal Customer Profile derived from the seller's website.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Icp {
    pub seller_business_type: SellerBusinessType,
    pub what_they_sell: String,
    pub customer_industry: String,
    pub customer_company_size: String,
    /// Buyer personas, most important first.
    pub target_buyers: Vec<String>,
    pub pain_points_solved: Vec<String>,
    pub ideal_customer_characteristics: Vec<String>,
    pub customer_geography: String,
    pub serviceable_geography: ServiceableGeography,
    pub customer_business_model: String,
    pub avoid_company_types: Vec<String>,
}

/// Partial user edit of a generated [`Icp`]. Absent fields keep generated values.
///
/// Unknown keys are ignored; a present key with the wrong type fails to deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpOverride {
    pub seller_business_type: Option<SellerBusinessType>,
    pub what_they_sell: Option<String>,
    pub customer_industry: Option<String>,
    pub customer_company_size: Option<String>,
    pub target_buyers: Option<Vec<String>>,
    pub ideal_customer_characteristics: Option<Vec<String>>,
    pub customer_geography: Option<String>,
    pub countries: Option<Vec<String>>,
    pub regions: Option<Vec<String>>,
    pub avoid_company_types: Option<Vec<String>>,
}

impl IcpOverride {
    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Prospects
// ---------------------------------------------------------------------------

/// How a prospect entered the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProspectSource {
    /// Found by web search and confirmed by classifying its site.
    WebSearchVerified,
    /// Suggested by the model and confirmed by classifying its site.
    LlmVerified,
    /// Suggested by the model; its site could not be checked.
    LlmGenerated,
}

/// A company that matches the ICP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub name: String,
    pub domain: String,
    pub why_good_fit: String,
    #[serde(default)]
    pub what_they_do: String,
    pub source: ProspectSource,
    /// 0.0 ..= 1.0
    pub confidence_score: f64,
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Technology categories attached to a contact's company.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechCategories {
    pub frontend: Option<String>,
    pub backend: Option<String>,
    pub hosting: Option<String>,
    pub analytics: Vec<String>,
    pub crm: Vec<String>,
    pub cms: Option<String>,
}

/// A person at a prospect company.
///
/// Created by the people-data step; the deep-enrichment fields are filled
/// in later on a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub name: String,
    pub title: String,
    pub email: String,
    pub email_verified: bool,
    pub linkedin_url: Option<String>,
    pub company: String,
    /// Always one of the run's prospect domains.
    pub domain: String,
    pub person_id: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub photo_url: Option<String>,

    pub bio_snippet: Option<String>,
    pub time_in_role: Option<String>,
    pub tech_stack: Vec<String>,
    pub frameworks: Option<String>,
    pub hosting: Option<String>,
    pub analytics: Vec<String>,
    pub company_description: Option<TechCategories>,
    pub enriched_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Whether the email is a real address rather than the masked placeholder.
    pub fn has_unlocked_email(&self) -> bool {
        !self.email.is_empty() && self.email != MASKED_EMAIL
    }
}

/// Result of looking up contacts at one prospect.
///
/// Keeps "the provider failed" apart from "the provider found nobody".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContactSearchOutcome {
    Found { count: usize },
    NoMatches,
    ProviderError { message: String },
    Skipped { reason: String },
}

/// Per-prospect record of the contact lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSearch {
    pub company: String,
    pub domain: String,
    pub outcome: ContactSearchOutcome,
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Furthest completed step of a run. Ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Start,
    Scraped,
    IcpGenerated,
    IcpCustomized,
    ProspectsFound,
    ContactsEnriched,
    DeepEnriched,
    Exported,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Scraped => "scraped",
            Self::IcpGenerated => "icp_generated",
            Self::IcpCustomized => "icp_customized",
            Self::ProspectsFound => "prospects_found",
            Self::ContactsEnriched => "contacts_enriched",
            Self::DeepEnriched => "deep_enriched",
            Self::Exported => "exported",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step failed. `step` is the stage the step would have reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: Stage,
    pub kind: ErrorKind,
    pub message: String,
}
