//! Core pipeline orchestration and domain logic for LeadScout.
//!
//! This crate ties together ICP generation, prospect search, contact
//! enrichment, deep enrichment and spreadsheet export into one step-wise
//! [`Pipeline`]. Every external provider sits behind a trait so the
//! sequencer can be driven with real clients ([`Services::from_config`])
//! or in-memory fakes.

pub mod apollo;
pub mod deep;
pub mod icp;
pub mod linkedin;
pub mod llm;
pub mod oauth;
pub mod overrides;
pub mod pipeline;
pub mod projection;
pub mod prospects;
pub mod search;
pub mod services;
pub mod sheets;
pub mod snapshot;
pub mod techstack;

pub use apollo::{ApolloClient, ApolloEnricher, CreditBalance, PeopleProvider};
pub use icp::{IcpGenerator, geographic_summary, validate_icp};
pub use llm::{GeminiClient, GenerationOptions, LanguageModel};
pub use overrides::{merge_icp, parse_override};
pub use pipeline::{
    IcpReview, Pipeline, PipelineRun, PipelineSettings, ProgressReporter, RunOptions, RunReport,
    SilentProgress,
};
pub use projection::{
    CONTACT_DISPLAY_FIELDS, EXPORT_HEADERS, ICP_DISPLAY_FIELDS, PROSPECT_DISPLAY_FIELDS, project,
    project_all,
};
pub use services::Services;
