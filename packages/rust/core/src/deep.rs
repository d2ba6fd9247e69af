//! Second enrichment pass: LinkedIn signals per contact and a tech stack
//! per company.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use leadscout_shared::{Contact, ErrorKind, Result};

use crate::linkedin::{LinkedInProfile, ProfileScraper};
use crate::pipeline::ProgressReporter;
use crate::techstack::{TechDetector, TechStack};

/// Output of a deep-enrichment pass.
#[derive(Debug, Default)]
pub struct DeepEnrichment {
    pub contacts: Vec<Contact>,
    pub profiles_scraped: usize,
    pub stacks_detected: usize,
}

/// Order contacts for deep enrichment: those with a LinkedIn URL first,
/// capped at `max_linkedin` (0 keeps all), then those without one.
pub fn select_contacts(contacts: &[Contact], max_linkedin: usize) -> Vec<Contact> {
    let (mut with, without): (Vec<Contact>, Vec<Contact>) = contacts
        .iter()
        .cloned()
        .partition(|c| c.linkedin_url.as_deref().is_some_and(|u| !u.is_empty()));

    if max_linkedin > 0 && with.len() > max_linkedin {
        warn!(
            available = with.len(),
            limit = max_linkedin,
            "limiting LinkedIn profiles for this run"
        );
        with.truncate(max_linkedin);
    }
    with.extend(without);
    with
}

fn known(value: &str) -> Option<String> {
    let v = value.trim();
    (!v.is_empty() && v != "Unknown" && v != "N/A").then(|| v.to_string())
}

fn apply_profile(contact: &mut Contact, profile: LinkedInProfile) {
    contact.bio_snippet = known(&profile.bio_snippet);
    contact.time_in_role = known(&profile.time_in_role);
    if let Some(location) = known(&profile.location) {
        contact.location = Some(location);
    }
    if let Some(headline) = known(&profile.headline) {
        contact.headline = Some(headline);
    }
}

fn apply_stack(contact: &mut Contact, stack: &TechStack) {
    contact.tech_stack = stack.tech_stack.clone();
    contact.frameworks = stack.categories.frontend.clone();
    contact.hosting = stack.categories.hosting.clone();
    contact.analytics = stack.categories.analytics.clone();
    contact.company_description = Some(stack.categories.clone());
}

pub struct DeepEnricher {
    profiles: Arc<dyn ProfileScraper>,
    detector: Arc<dyn TechDetector>,
    max_linkedin: usize,
}

impl DeepEnricher {
    pub fn new(
        profiles: Arc<dyn ProfileScraper>,
        detector: Arc<dyn TechDetector>,
        max_linkedin: usize,
    ) -> Self {
        Self {
            profiles,
            detector,
            max_linkedin,
        }
    }

    /// Enrich copies of `contacts`; the input list is left untouched.
    ///
    /// Failed profile scrapes and failed stack detections are logged and
    /// skipped. A missing or rejected credential fails the whole pass.
    #[instrument(skip_all, fields(contacts = contacts.len(), max_linkedin = self.max_linkedin))]
    pub async fn enrich(
        &self,
        contacts: &[Contact],
        progress: &dyn ProgressReporter,
    ) -> Result<DeepEnrichment> {
        let selected = select_contacts(contacts, self.max_linkedin);

        let mut domains: Vec<&str> = Vec::new();
        for contact in &selected {
            if !contact.domain.is_empty() && !domains.contains(&contact.domain.as_str()) {
                domains.push(&contact.domain);
            }
        }

        // Failures are cached as None so a domain is tried once per run.
        let mut stacks: HashMap<String, Option<TechStack>> = HashMap::new();
        for (i, domain) in domains.iter().enumerate() {
            progress.item(&format!("tech stack {domain}"), i + 1, domains.len());
            let stack = match self.detector.detect(&format!("https://{domain}")).await {
                Ok(stack) => Some(stack),
                Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
                Err(e) => {
                    warn!(domain, error = %e, "tech stack detection failed, skipping");
                    None
                }
            };
            stacks.insert(domain.to_string(), stack);
        }

        let mut result = DeepEnrichment {
            stacks_detected: stacks.values().filter(|s| s.is_some()).count(),
            ..Default::default()
        };

        let total = selected.len();
        for (i, mut contact) in selected.into_iter().enumerate() {
            progress.item(&contact.name, i + 1, total);

            match contact.linkedin_url.clone().filter(|u| !u.is_empty()) {
                Some(url) => match self.profiles.scrape_profile(&url).await {
                    Ok(profile) => {
                        apply_profile(&mut contact, profile);
                        result.profiles_scraped += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::Auth => return Err(e),
                    Err(e) => warn!(name = %contact.name, error = %e, "LinkedIn scrape failed, skipping"),
                },
                None => warn!(name = %contact.name, "no LinkedIn URL, skipping profile"),
            }

            if let Some(Some(stack)) = stacks.get(&contact.domain) {
                apply_stack(&mut contact, stack);
            }
            contact.enriched_at = Some(Utc::now());
            result.contacts.push(contact);
        }

        info!(
            contacts = result.contacts.len(),
            profiles = result.profiles_scraped,
            stacks = result.stacks_detected,
            "deep enrichment complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes for the deep-enrichment providers.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use leadscout_shared::{LeadScoutError, TechCategories};

    use super::*;

    #[derive(Default)]
    pub struct FakeProfiles {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProfileScraper for FakeProfiles {
        async fn scrape_profile(&self, url: &str) -> Result<LinkedInProfile> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("broken") {
                return Err(LeadScoutError::Network("agent failed".into()));
            }
            Ok(LinkedInProfile {
                full_name: "Someone".into(),
                bio_snippet: "Builds hospitals".into(),
                time_in_role: "2 yr 1 mo".into(),
                location: "Unknown".into(),
                headline: "VP Construction".into(),
                linkedin_url: Some(url.to_string()),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    pub struct FakeDetector {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TechDetector for FakeDetector {
        async fn detect(&self, url: &str) -> Result<TechStack> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("down") {
                return Err(LeadScoutError::empty("no HTML"));
            }
            Ok(TechStack {
                domain: url.trim_start_matches("https://").to_string(),
                tech_stack: vec!["WordPress".into(), "PHP".into()],
                categories: TechCategories {
                    cms: Some("WordPress".into()),
                    backend: Some("PHP".into()),
                    hosting: Some("WP Engine".into()),
                    ..Default::default()
                },
                confidence: "high".into(),
                detection_method: "firecrawl_llm".into(),
                detected_at: Utc::now(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeDetector, FakeProfiles};
    use super::*;
    use crate::pipeline::SilentProgress;

    fn contact(name: &str, domain: &str, linkedin: Option<&str>) -> Contact {
        Contact {
            name: name.into(),
            domain: domain.into(),
            linkedin_url: linkedin.map(String::from),
            location: Some("Houston, TX".into()),
            ..Default::default()
        }
    }

    #[test]
    fn selection_puts_linkedin_first_and_caps() {
        let contacts = vec![
            contact("a", "x.com", None),
            contact("b", "x.com", Some("https://linkedin.com/in/b")),
            contact("c", "x.com", Some("https://linkedin.com/in/c")),
            contact("d", "x.com", Some("")),
        ];
        let names = |v: Vec<Contact>| v.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names(select_contacts(&contacts, 0)), vec!["b", "c", "a", "d"]);
        assert_eq!(names(select_contacts(&contacts, 1)), vec!["b", "a", "d"]);
    }

    #[tokio::test]
    async fn enriches_copies_and_detects_each_domain_once() {
        let profiles = Arc::new(FakeProfiles::default());
        let detector = Arc::new(FakeDetector::default());
        let enricher = DeepEnricher::new(profiles.clone(), detector.clone(), 0);

        let input = vec![
            contact("Dana", "hines.com", Some("https://linkedin.com/in/dana")),
            contact("Sam", "hines.com", Some("https://linkedin.com/in/broken")),
            contact("Ari", "down.com", None),
        ];
        let out = enricher.enrich(&input, &SilentProgress).await.unwrap();

        assert_eq!(detector.calls.lock().unwrap().len(), 2);
        assert_eq!(out.stacks_detected, 1);
        assert_eq!(out.profiles_scraped, 1);
        assert_eq!(out.contacts.len(), 3);

        let dana = &out.contacts[0];
        assert_eq!(dana.bio_snippet.as_deref(), Some("Builds hospitals"));
        assert_eq!(dana.time_in_role.as_deref(), Some("2 yr 1 mo"));
        // "Unknown" from the profile does not replace a known location
        assert_eq!(dana.location.as_deref(), Some("Houston, TX"));
        assert_eq!(dana.tech_stack, vec!["WordPress", "PHP"]);
        assert_eq!(dana.hosting.as_deref(), Some("WP Engine"));
        assert!(dana.enriched_at.is_some());

        let sam = &out.contacts[1];
        assert!(sam.bio_snippet.is_none());
        assert_eq!(sam.tech_stack, vec!["WordPress", "PHP"]);

        let ari = &out.contacts[2];
        assert!(ari.tech_stack.is_empty());
        assert!(ari.company_description.is_none());

        assert!(input[0].bio_snippet.is_none());
    }

    #[tokio::test]
    async fn missing_linkedin_credentials_fail_the_pass() {
        use crate::services::Unconfigured;
        use leadscout_shared::ErrorKind;

        let detector = Arc::new(FakeDetector::default());
        let enricher = DeepEnricher::new(
            Arc::new(Unconfigured::new("PhantomBuster", "PHANTOMBUSTER_API_KEY")),
            detector.clone(),
            0,
        );
        let input = vec![contact("Dana", "hines.com", Some("https://linkedin.com/in/dana"))];

        let err = enricher.enrich(&input, &SilentProgress).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("PHANTOMBUSTER_API_KEY"));
    }
}
