//! Merging user edits into a generated ICP.

use serde_json::Value;

use leadscout_shared::{GeographyScope, Icp, IcpOverride, LeadScoutError, Result};

/// Parse an override from JSON. Unknown keys are ignored; wrong shapes are rejected.
pub fn parse_override(value: Value) -> Result<IcpOverride> {
    if !value.is_object() {
        return Err(LeadScoutError::user_input("ICP override must be a JSON object"));
    }
    serde_json::from_value(value)
        .map_err(|e| LeadScoutError::user_input(format!("invalid ICP override: {e}")))
}

/// Apply `ov` on top of `icp`.
///
/// Present fields replace the generated value wholesale; list fields are
/// never merged element-wise. When countries or regions are given, the
/// serviceable geography becomes `custom` and its notes are rebuilt.
pub fn merge_icp(icp: &Icp, ov: &IcpOverride) -> Icp {
    let mut merged = icp.clone();

    if let Some(kind) = ov.seller_business_type {
        merged.seller_business_type = kind;
    }
    if let Some(v) = &ov.what_they_sell {
        merged.what_they_sell = v.clone();
    }
    if let Some(v) = &ov.customer_industry {
        merged.customer_industry = v.clone();
    }
    if let Some(v) = &ov.customer_company_size {
        merged.customer_company_size = v.clone();
    }
    if let Some(v) = &ov.target_buyers {
        merged.target_buyers = v.clone();
    }
    if let Some(v) = &ov.ideal_customer_characteristics {
        merged.ideal_customer_characteristics = v.clone();
    }
    if let Some(v) = &ov.customer_geography {
        merged.customer_geography = v.clone();
    }
    if let Some(v) = &ov.avoid_company_types {
        merged.avoid_company_types = v.clone();
    }

    if ov.countries.is_some() || ov.regions.is_some() {
        let geo = &mut merged.serviceable_geography;
        if let Some(countries) = &ov.countries {
            geo.countries = countries.clone();
        }
        if let Some(regions) = &ov.regions {
            geo.states_or_regions = regions.clone();
        }
        geo.scope = GeographyScope::Custom;

        let mut notes = Vec::new();
        if !geo.countries.is_empty() {
            notes.push(format!("Countries: {}", geo.countries.join(", ")));
        }
        if !geo.states_or_regions.is_empty() {
            notes.push(format!("Regions: {}", geo.states_or_regions.join(", ")));
        }
        geo.notes = notes.join(" | ");
    }

    merged
}

/// Split a comma-separated answer into trimmed, non-empty items.
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
