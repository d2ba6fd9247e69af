//! Shared types, error model, and configuration for LeadScout.
//!
//! This crate is the foundation depended on by all other LeadScout crates.
//! It provides:
//! - [`LeadScoutError`], the unified error type
//! - Domain types ([`Icp`], [`Prospect`], [`Contact`], [`Stage`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApolloConfig, AppConfig, Credentials, DefaultsConfig, FirecrawlConfig, LlmConfig,
    PhantomBusterConfig, SearchConfig, ServerConfig, SheetsConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{ErrorKind, LeadScoutError, Result};
pub use types::{
    Contact, ContactSearch, ContactSearchOutcome, GeographyScope, Icp, IcpOverride, MASKED_EMAIL,
    Prospect, ProspectSource, SellerBusinessType, ServiceableGeography, Stage, StepFailure,
    TechCategories,
};
