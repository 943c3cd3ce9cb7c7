//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use codecheck_core::{
    ConfigAgentFactory, JobApi, JobManager, JobOutcome, ResearchAgent, SectionDocument,
    SectionSink, Worker, flatten_form, pipeline, to_tsv,
};
use codecheck_shared::{
    AppConfig, JobId, LlmProvider, SECTION_COUNT, config_file_path, expand_home, init_config,
    load_config, load_config_from, normalize_address, secret_present,
};
use codecheck_storage::JobStore;
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Code Check: research municipal sign codes for a street address.
#[derive(Parser)]
#[command(
    name = "codecheck",
    version,
    about = "Research municipal sign regulations for an address into a 13-section code-check form.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.codecheck/codecheck.toml).
    #[arg(long, env = "CODECHECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Job database path (overrides `defaults.database_path`).
    #[arg(long, env = "CODECHECK_DB", global = true)]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Report output format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Tsv,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research an address now and print the completed form.
    Research {
        /// Street address to research.
        address: String,

        /// Extraction backend: openai or gemini (defaults to config).
        #[arg(short, long)]
        provider: Option<String>,

        /// Print the form as JSON or as flattened TSV rows.
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Submit and manage persisted research jobs.
    Jobs {
        /// Pre-shared job API key.
        #[arg(long, env = "CODECHECK_API_KEY", global = true, hide_env_values = true)]
        api_key: Option<String>,

        #[command(subcommand)]
        action: JobsAction,
    },

    /// Run the background worker that processes pending jobs.
    Worker {
        /// Process every pending job once, then exit.
        #[arg(long)]
        once: bool,

        /// Maximum jobs running at once (overrides `worker.max_concurrent_jobs`).
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Claim and process a single pending job in the foreground.
    Process {
        /// Job ID.
        job_id: String,
    },

    /// Export a job's results as a flat report.
    Export {
        /// Job ID.
        job_id: String,

        /// Pre-shared job API key.
        #[arg(long, env = "CODECHECK_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(short, long, default_value = "tsv")]
        format: OutputFormat,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Job API subcommands.
#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// Queue an address for research.
    Submit {
        address: String,

        /// Extraction backend: openai or gemini (defaults to config).
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Show a job's status and progress.
    Status { job_id: String },
    /// Show a job's stored section results.
    Results {
        job_id: String,

        /// Print the aggregated form instead of per-section records.
        #[arg(long)]
        form: bool,
    },
    /// List jobs, newest first.
    List {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Delete a job and its results.
    Delete { job_id: String },
    /// Cancel a pending or processing job.
    Cancel { job_id: String },
    /// Requeue a finished job.
    Retry { job_id: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize default config file.
    Init,
    /// Show current effective config.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing subscriber based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "codecheck=info",
        1 => "codecheck=debug",
        _ => "codecheck=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        db,
        command,
        ..
    } = cli;

    match command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
        command => {
            let mut config = match &config_path {
                Some(path) => load_config_from(path)?,
                None => load_config()?,
            };
            if let Some(db) = db {
                config.defaults.database_path = db;
            }
            dispatch(config, command).await
        }
    }
}

async fn dispatch(config: AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Research {
            address,
            provider,
            format,
        } => cmd_research(&config, &address, provider.as_deref(), format).await,
        Command::Jobs { api_key, action } => {
            let api = JobApi::new(config.clone(), open_manager(&config).await?);
            cmd_jobs(&api, api_key.as_deref(), action).await
        }
        Command::Worker { once, concurrency } => cmd_worker(config, once, concurrency).await,
        Command::Process { job_id } => cmd_process(&config, &job_id).await,
        Command::Export {
            job_id,
            api_key,
            format,
        } => {
            let api = JobApi::new(config.clone(), open_manager(&config).await?);
            cmd_export(&api, api_key.as_deref(), &job_id, format).await
        }
        Command::Config { .. } => cmd_config_show(None).await,
    }
}

async fn open_manager(config: &AppConfig) -> Result<Arc<JobManager>> {
    let path = expand_home(&config.defaults.database_path)?;
    let store = Arc::new(JobStore::open(&path).await?);
    let agents = Arc::new(ConfigAgentFactory::new(config.clone()));
    Ok(Arc::new(JobManager::new(store, agents)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

async fn cmd_research(
    config: &AppConfig,
    address: &str,
    provider: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let address = normalize_address(address)?;
    let provider = match provider {
        Some(name) => name.parse::<LlmProvider>()?,
        None => config.defaults.llm_provider,
    };
    let agent = ResearchAgent::from_config(config, provider)?;

    info!(address = %address, provider = %provider, "researching address");

    let reporter = CliProgress::new();
    let result = pipeline::run(&agent, &address, &reporter).await;
    reporter.finish();
    let form = result?;

    match format {
        OutputFormat::Json => print_json(&form)?,
        OutputFormat::Tsv => print!("{}", to_tsv(&flatten_form(&form, Some(&address)))),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner that follows the pipeline section by section.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.set_message("Researching jurisdiction");
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

#[async_trait]
impl SectionSink for CliProgress {
    async fn section_done(
        &self,
        doc: &SectionDocument,
        completed: usize,
    ) -> codecheck_shared::Result<()> {
        self.spinner.set_message(format!(
            "Researched [{completed}/{SECTION_COUNT}] {}",
            doc.slot().topic()
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

async fn cmd_jobs(api: &JobApi, api_key: Option<&str>, action: JobsAction) -> Result<()> {
    match action {
        JobsAction::Submit { address, provider } => {
            let job = api.create_job(api_key, &address, provider.as_deref()).await?;
            println!();
            println!("  Job queued.");
            println!("  ID:       {}", job.id);
            println!("  Address:  {}", job.address);
            println!("  Provider: {}", job.llm_provider);
            println!("  Status:   {}", job.status);
            println!();
        }
        JobsAction::Status { job_id } => {
            let job = api.get_job(api_key, &job_id).await?;
            println!();
            println!("  ID:       {}", job.id);
            println!("  Address:  {}", job.address);
            println!("  Provider: {}", job.llm_provider);
            println!("  Status:   {}", job.status);
            println!("  Progress: {}", job.progress);
            println!("  Created:  {}", job.created_at.to_rfc3339());
            if let Some(started) = job.started_at {
                println!("  Started:  {}", started.to_rfc3339());
            }
            if let Some(completed) = job.completed_at {
                println!("  Finished: {}", completed.to_rfc3339());
            }
            if let Some(error) = &job.error_message {
                println!("  Error:    {error}");
            }
            println!();
        }
        JobsAction::Results { job_id, form } => {
            let results = api.get_results(api_key, &job_id).await?;
            if form {
                print_json(&results.form())?;
            } else {
                print_json(&results)?;
            }
        }
        JobsAction::List { limit, offset } => {
            let page = api.list_jobs(api_key, limit, offset).await?;
            if page.jobs.is_empty() {
                println!("No jobs found (total {}).", page.total);
                return Ok(());
            }
            println!();
            println!(
                "  {:<36}  {:<10}  {:<14}  {:<6}  ADDRESS",
                "ID", "STATUS", "PROGRESS", "LLM"
            );
            for job in &page.jobs {
                println!(
                    "  {:<36}  {:<10}  {:<14}  {:<6}  {}",
                    job.id.to_string(),
                    job.status.as_str(),
                    job.progress,
                    job.llm_provider.as_str(),
                    job.address
                );
            }
            println!();
            println!(
                "  Showing {}-{} of {}",
                page.offset as usize + 1,
                page.offset as usize + page.jobs.len(),
                page.total
            );
            println!();
        }
        JobsAction::Delete { job_id } => {
            api.delete_job(api_key, &job_id).await?;
            println!("Job {job_id} deleted.");
        }
        JobsAction::Cancel { job_id } => {
            let job = api.cancel_job(api_key, &job_id).await?;
            println!("Job {} {}.", job.id, job.status);
        }
        JobsAction::Retry { job_id } => {
            let job = api.retry_job(api_key, &job_id).await?;
            println!("Job {} requeued ({}).", job.id, job.status);
        }
    }
    Ok(())
}

async fn cmd_export(
    api: &JobApi,
    api_key: Option<&str>,
    job_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let results = api.get_results(api_key, job_id).await?;
    let rows = flatten_form(&results.form(), Some(&results.job.address));
    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Tsv => print!("{}", to_tsv(&rows)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn cmd_worker(mut config: AppConfig, once: bool, concurrency: Option<usize>) -> Result<()> {
    if let Some(n) = concurrency {
        config.worker.max_concurrent_jobs = n.max(1);
    }
    let worker = Worker::new(open_manager(&config).await?, &config.worker);

    if once {
        let outcomes = worker.run_once().await?;
        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Completed { .. }))
            .count();
        println!();
        println!("  Jobs processed: {}", outcomes.len());
        println!("  Completed:      {completed}");
        println!("  Not completed:  {}", outcomes.len() - completed);
        println!();
        return Ok(());
    }

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}

async fn cmd_process(config: &AppConfig, job_id: &str) -> Result<()> {
    let id: JobId = job_id.parse()?;
    let manager = open_manager(config).await?;
    let outcome = manager.process(&id).await?;

    println!();
    match &outcome {
        JobOutcome::Completed {
            job_id,
            sections_completed,
        } => {
            println!("  Job completed.");
            println!("  ID:       {job_id}");
            println!("  Sections: {sections_completed}/{SECTION_COUNT}");
        }
        JobOutcome::Failed { job_id, error } => {
            println!("  Job failed.");
            println!("  ID:       {job_id}");
            println!("  Error:    {error}");
        }
        JobOutcome::Cancelled { job_id } => {
            println!("  Job cancelled while running.");
            println!("  ID:       {job_id}");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<PathBuf>) -> Result<()> {
    let (config, source) = match path {
        Some(path) => (load_config_from(&path)?, path),
        None => (load_config()?, config_file_path()?),
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&config)?);

    println!("# credentials (from environment)");
    for var in [
        &config.api.api_key_env,
        &config.perplexity.api_key_env,
        &config.openai.api_key_env,
        &config.gemini.api_key_env,
    ] {
        let state = if secret_present(var) { "set" } else { "missing" };
        println!("#   {var}: {state}");
    }
    Ok(())
}
