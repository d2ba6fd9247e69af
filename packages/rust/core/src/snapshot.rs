//! JSON snapshot of a pipeline run, written once per run and never rewritten.

use std::fs::OpenOptions;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use leadscout_scraper::company_slug;
use leadscout_shared::{Contact, ContactSearch, Icp, LeadScoutError, Prospect, Result, Stage, StepFailure};

use crate::pipeline::PipelineRun;

pub const PIPELINE_VERSION: &str = "Agent01 + Agent02";

/// Give up after this many numbered variants of one file name.
const MAX_COLLISIONS: usize = 1000;

/// The persisted document. Field order is the on-disk key order.
#[derive(Debug, Serialize)]
pub struct SnapshotDocument<'a> {
    pub generated_at: DateTime<Utc>,
    pub source_url: &'a str,
    pub pipeline_version: &'static str,
    pub furthest_completed: Stage,
    pub failure: Option<&'a StepFailure>,
    pub icp: Option<&'a Icp>,
    pub prospects_found: usize,
    pub prospects: &'a [Prospect],
    pub contact_searches: &'a [ContactSearch],
    pub apollo_enriched: &'a [Contact],
    pub deep_enriched: &'a [Contact],
    pub google_sheet_url: Option<&'a str>,
    pub total_contacts: usize,
}

impl<'a> SnapshotDocument<'a> {
    pub fn new(run: &'a PipelineRun, generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            source_url: &run.source_url,
            pipeline_version: PIPELINE_VERSION,
            furthest_completed: run.stage,
            failure: run.failure.as_ref(),
            icp: run.icp.as_ref(),
            prospects_found: run.prospects.len(),
            prospects: &run.prospects,
            contact_searches: &run.contact_searches,
            apollo_enriched: &run.apollo_enriched,
            deep_enriched: &run.deep_enriched,
            google_sheet_url: run.google_sheet_url.as_deref(),
            total_contacts: run.final_contacts().len(),
        }
    }
}

/// `{slug}_full_pipeline_{YYYYmmdd_HHMMSS}.json`
pub fn snapshot_filename(source_url: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_full_pipeline_{}.json",
        company_slug(source_url),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// `name.json`, then `name_1.json`, `name_2.json`, ...
fn numbered(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.strip_suffix(".json") {
        Some(stem) => format!("{stem}_{n}.json"),
        None => format!("{file_name}_{n}"),
    }
}

/// Serialize `run` into a new file under `output_dir`.
///
/// Existing files are never opened for writing; a name clash picks the
/// next numbered variant.
pub fn write_snapshot(output_dir: &Path, run: &PipelineRun, now: DateTime<Utc>) -> Result<PathBuf> {
    let document = SnapshotDocument::new(run, now);
    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| LeadScoutError::malformed(format!("snapshot serialization failed: {e}")))?;

    std::fs::create_dir_all(output_dir).map_err(|e| LeadScoutError::io(output_dir, e))?;

    let base = snapshot_filename(&run.source_url, now);
    for n in 0..MAX_COLLISIONS {
        let path = output_dir.join(numbered(&base, n));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "snapshot name taken");
                continue;
            }
            Err(e) => return Err(LeadScoutError::io(&path, e)),
        };
        file.write_all(json.as_bytes())
            .map_err(|e| LeadScoutError::io(&path, e))?;
        info!(path = %path.display(), stage = %run.stage, "snapshot written");
        return Ok(path);
    }

    Err(LeadScoutError::io(
        output_dir.join(base),
        std::io::Error::new(IoErrorKind::AlreadyExists, "too many snapshots with this name"),
    ))
}
