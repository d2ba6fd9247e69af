//! Allow-listed field projections for display and export.

use serde::Serialize;
use serde_json::{Map, Value};

/// ICP fields shown to the user and saved with a run.
pub const ICP_DISPLAY_FIELDS: &[&str] = &[
    "seller_business_type",
    "what_they_sell",
    "customer_industry",
    "customer_company_size",
    "target_buyers",
    "ideal_customer_characteristics",
    "customer_geography",
    "serviceable_geography",
    "avoid_company_types",
];

pub const PROSPECT_DISPLAY_FIELDS: &[&str] = &["name", "domain", "why_good_fit"];

pub const CONTACT_DISPLAY_FIELDS: &[&str] =
    &["name", "title", "email", "linkedin_url", "location", "headline"];

/// Column headers of the exported spreadsheet, in order.
pub const EXPORT_HEADERS: &[&str] = &[
    "First Name",
    "Last Name",
    "Full Name",
    "Job Title",
    "Email",
    "Email Verified",
    "LinkedIn URL",
    "Time in Role",
    "Location",
    "Bio Snippet",
    "Company",
    "Company Domain",
    "Company Tech Stack",
    "Primary Framework",
    "Hosting Provider",
    "Analytics Tools",
    "Enrichment Date",
];

/// Keep only allow-listed keys. Anything that is not an object projects to `{}`.
pub fn project(value: &Value, allow: &[&str]) -> Value {
    let Value::Object(map) = value else {
        return Value::Object(Map::new());
    };
    let kept = allow
        .iter()
        .filter_map(|key| map.get(*key).map(|v| ((*key).to_string(), v.clone())))
        .collect();
    Value::Object(kept)
}

/// Serialize each record and project it. Records that fail to serialize project to `{}`.
pub fn project_all<T: Serialize>(records: &[T], allow: &[&str]) -> Vec<Value> {
    records
        .iter()
        .map(|r| project(&serde_json::to_value(r).unwrap_or(Value::Null), allow))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_shared::{Icp, Prospect, ProspectSource};
    use serde_json::json;

    #[test]
    fn drops_fields_outside_allow_list() {
        let record = json!({"name": "Acme", "domain": "acme.com", "why_good_fit": "Expanding", "secret": 1});
        let out = project(&record, PROSPECT_DISPLAY_FIELDS);
        assert_eq!(out, json!({"name": "Acme", "domain": "acme.com", "why_good_fit": "Expanding"}));
    }

    #[test]
    fn absent_fields_are_not_invented() {
        let out = project(&json!({"name": "Jane"}), CONTACT_DISPLAY_FIELDS);
        assert_eq!(out, json!({"name": "Jane"}));
    }

    #[test]
    fn non_objects_project_to_empty() {
        for input in [json!(null), json!([1, 2]), json!("text"), json!(3)] {
            assert_eq!(project(&input, ICP_DISPLAY_FIELDS), json!({}));
        }
    }

    #[test]
    fn icp_display_hides_internal_fields() {
        let icp = Icp {
            pain_points_solved: vec!["Downtime".into()],
            customer_business_model: "developer".into(),
            ..Default::default()
        };
        let out = project_all(&[icp], ICP_DISPLAY_FIELDS).remove(0);
        let keys: Vec<&String> = out.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), ICP_DISPLAY_FIELDS.len());
        assert!(out.get("pain_points_solved").is_none());
        assert!(out.get("customer_business_model").is_none());
    }

    #[test]
    fn prospect_display_drops_source_and_score() {
        let prospect = Prospect {
            name: "Hines".into(),
            domain: "hines.com".into(),
            why_good_fit: "Developing new towers".into(),
            what_they_do: "Real estate".into(),
            source: ProspectSource::WebSearchVerified,
            confidence_score: 0.9,
        };
        let out = project_all(&[prospect], PROSPECT_DISPLAY_FIELDS).remove(0);
        assert!(out.get("confidence_score").is_none());
        assert_eq!(out["domain"], "hines.com");
    }

    #[test]
    fn seventeen_export_headers() {
        assert_eq!(EXPORT_HEADERS.len(), 17);
    }
}
