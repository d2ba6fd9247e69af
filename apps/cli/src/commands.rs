//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use leadscout_core::overrides::split_list;
use leadscout_core::{
    IcpReview, Pipeline, PipelineSettings, ProgressReporter, RunOptions, RunReport, Services,
    geographic_summary, parse_override,
};
use leadscout_server::routes::App;
use leadscout_shared::{AppConfig, Credentials, Icp, IcpOverride, init_config, load_config};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LeadScout: find companies that would buy from you, and who to talk to there.
#[derive(Parser)]
#[command(
    name = "leadscout",
    version,
    about = "Turn a company website into a qualified, enriched lead list.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline for one company website.
    Run {
        /// The seller's website.
        url: String,

        /// Spend Apollo credits to reveal contact emails.
        #[arg(long)]
        unlock_emails: bool,

        /// Keep the generated ICP without prompting.
        #[arg(long)]
        skip_customize: bool,

        /// JSON file with ICP fields to replace.
        #[arg(long = "override", value_name = "FILE")]
        override_file: Option<PathBuf>,

        /// Skip LinkedIn and tech-stack enrichment.
        #[arg(long)]
        skip_deep_enrich: bool,

        /// Skip the Google Sheets export.
        #[arg(long)]
        skip_export: bool,

        /// Where to write the run snapshot (overrides config).
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// LinkedIn profiles to scrape, 0 for all (overrides config).
        #[arg(long)]
        max_linkedin: Option<usize>,
    },

    /// Start the step-by-step web API.
    Serve {
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the Apollo credit balance.
    Credits,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadscout=info",
        1 => "leadscout=debug",
        _ => "leadscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            url,
            unlock_emails,
            skip_customize,
            override_file,
            skip_deep_enrich,
            skip_export,
            output_dir,
            max_linkedin,
        } => {
            let mut config = load_config()?;
            if let Some(dir) = output_dir {
                config.defaults.output_dir = dir.to_string_lossy().into_owned();
            }
            if let Some(n) = max_linkedin {
                config.defaults.max_linkedin_profiles = n;
            }
            let options = RunFlags {
                unlock_emails,
                skip_customize,
                override_file,
                skip_deep_enrich,
                skip_export,
            };
            cmd_run(&config, &url, options).await
        }
        Command::Serve { bind, port } => cmd_serve(bind, port).await,
        Command::Credits => cmd_credits().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

struct RunFlags {
    unlock_emails: bool,
    skip_customize: bool,
    override_file: Option<PathBuf>,
    skip_deep_enrich: bool,
    skip_export: bool,
}

fn build_services(config: &AppConfig) -> Result<Services> {
    let creds = Credentials::from_env(config);
    info!(providers = ?creds.configured_providers(), "credentials loaded");
    Ok(Services::from_config(config, &creds)?)
}

async fn cmd_run(config: &AppConfig, url: &str, flags: RunFlags) -> Result<()> {
    let services = build_services(config)?;
    let mut pipeline = Pipeline::new(services, PipelineSettings::from_config(config));
    let progress = CliProgress::new();

    let review: Option<Box<dyn IcpReview>> = match &flags.override_file {
        Some(path) => Some(Box::new(read_override(path)?)),
        None if !flags.skip_customize && std::io::stdin().is_terminal() => {
            Some(Box::new(TerminalReview {
                spinner: progress.spinner.clone(),
            }))
        }
        None => None,
    };
    let options = RunOptions {
        unlock_emails: flags.unlock_emails,
        review,
        skip_deep_enrich: flags.skip_deep_enrich,
        skip_export: flags.skip_export,
    };

    info!(url, unlock = options.unlock_emails, "starting pipeline");
    let report = pipeline.run_all(url, &options, &progress).await;
    print_summary(&report);

    match report.failure {
        Some(f) => Err(eyre!("{} step failed ({:?}): {}", f.step, f.kind, f.message)),
        None => Ok(()),
    }
}

fn read_override(path: &Path) -> Result<IcpOverride> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre!("cannot read override file '{}': {e}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| eyre!("override file '{}' is not JSON: {e}", path.display()))?;
    Ok(parse_override(value)?)
}

fn print_summary(report: &RunReport) {
    println!();
    match &report.failure {
        None => println!("  Pipeline complete!"),
        Some(f) => println!("  Pipeline stopped at {}: {}", f.step, f.message),
    }
    println!("  Website:   {}", report.source_url);
    println!("  Reached:   {}", report.furthest_completed);
    println!("  Prospects: {}", report.prospects);
    println!("  Contacts:  {}", report.contacts);
    if report.credits_used > 0 {
        println!("  Credits:   {}", report.credits_used);
    }
    if let Some(url) = &report.google_sheet_url {
        println!("  Sheet:     {url}");
    }
    if let Some(path) = &report.snapshot_path {
        println!("  Snapshot:  {}", path.display());
    }
    println!();
}

async fn cmd_serve(bind: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let services = build_services(&config)?;
    let app = Arc::new(
        App::new(
            services,
            PipelineSettings::from_config(&config),
            Duration::from_secs(config.server.request_timeout_secs),
        )
        .with_session_ttl(Duration::from_secs(config.server.session_ttl_secs)),
    );

    println!(
        "LeadScout API on http://{}:{}",
        config.server.bind, config.server.port
    );
    let handle = tokio::runtime::Handle::current();
    let server = config.server.clone();
    tokio::task::spawn_blocking(move || leadscout_server::serve(&server, app, handle)).await??;
    Ok(())
}

async fn cmd_credits() -> Result<()> {
    let config = load_config()?;
    let services = build_services(&config)?;
    let balance = services.people.credit_balance().await?;
    println!("Apollo credits: {balance}");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Interactive ICP review
// ---------------------------------------------------------------------------

/// Shows the generated ICP and asks for replacements on stdin.
struct TerminalReview {
    spinner: ProgressBar,
}

impl IcpReview for TerminalReview {
    fn review(&self, icp: &Icp) -> leadscout_shared::Result<Option<IcpOverride>> {
        self.spinner.suspend(|| {
            println!();
            println!("  Sells:     {}", icp.what_they_sell);
            println!("  Industry:  {}", icp.customer_industry);
            println!("  Buyers:    {}", icp.target_buyers.join(", "));
            println!("  Geography: {}", geographic_summary(&icp.serviceable_geography));
            println!();
            println!("  Press Enter to keep a value. Lists are comma-separated.");

            let stdin = std::io::stdin();
            let mut lines = stdin.lock();
            let mut ask = |label: &str| -> leadscout_shared::Result<String> {
                print!("  {label}: ");
                let mut answer = String::new();
                std::io::stdout()
                    .flush()
                    .and_then(|()| lines.read_line(&mut answer))
                    .map_err(|e| leadscout_shared::LeadScoutError::io("<stdin>", e))?;
                Ok(answer)
            };

            let answers = Answers {
                countries: ask("Countries")?,
                regions: ask("States / regions")?,
                industry: ask("Customer industry")?,
                buyers: ask("Target buyers")?,
            };
            Ok(Some(answers.into_override()))
        })
    }
}

/// Raw replies to the review prompts.
struct Answers {
    countries: String,
    regions: String,
    industry: String,
    buyers: String,
}

impl Answers {
    fn into_override(self) -> IcpOverride {
        let list = |s: &str| Some(split_list(s)).filter(|v| !v.is_empty());
        IcpOverride {
            countries: list(&self.countries),
            regions: list(&self.regions),
            customer_industry: Some(self.industry.trim().to_string()).filter(|s| !s.is_empty()),
            target_buyers: list(&self.buyers),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, label: &str, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}] {label}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
