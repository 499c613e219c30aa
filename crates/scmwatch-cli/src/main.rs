//! scmwatch - source-control change detection from the command line
//!
//! Every command reads a TOML project file (see [`config`]) naming the
//! backend and its settings.
//!
//! ## Commands
//!
//! - `parse`: normalise saved client output without running the client
//! - `detect`: list modifications committed in a time window
//! - `materialize`: update or check out the project's working copy
//! - `label`: label (or roll back the label of) a build

mod config;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use scmwatch_core::{
    CommandExecutor, IntegrationStatus, Modification, ProcessExecutor, SessionRegistries,
    SourceControl, METRICS,
};

use crate::config::ProjectFile;

#[derive(Parser)]
#[command(name = "scmwatch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Source-control change detection for CI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse saved client output into modifications
    Parse {
        /// Project file naming the backend
        #[arg(short, long, env = "SCMWATCH_PROJECT")]
        project: PathBuf,

        /// File holding the client's output (`-` reads stdin)
        input: PathBuf,

        /// Window start (RFC 3339); unbounded when omitted
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC 3339); now when omitted
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run the backend's history command for a time window
    Detect {
        #[arg(short, long, env = "SCMWATCH_PROJECT")]
        project: PathBuf,

        /// Start of the previous integration (RFC 3339)
        #[arg(long)]
        since: DateTime<Utc>,

        /// Start of this integration (RFC 3339); now when omitted
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Outcome of the previous integration
        #[arg(long, value_enum, default_value_t = Status::Success)]
        last_status: Status,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Update or check out the working copy
    Materialize {
        #[arg(short, long, env = "SCMWATCH_PROJECT")]
        project: PathBuf,

        /// Build label, for backends that label before the get
        #[arg(long, default_value = "")]
        label: String,
    },

    /// Label the built revision, or roll back a label after a failed build
    Label {
        #[arg(short, long, env = "SCMWATCH_PROJECT")]
        project: PathBuf,

        #[arg(long)]
        label: String,

        /// Outcome of the build being labelled
        #[arg(long, value_enum, default_value_t = Status::Success)]
        status: Status,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Status {
    Success,
    Failure,
    Exception,
    Unknown,
}

impl From<Status> for IntegrationStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => IntegrationStatus::Success,
            Status::Failure => IntegrationStatus::Failure,
            Status::Exception => IntegrationStatus::Exception,
            Status::Unknown => IntegrationStatus::Unknown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let executor: Arc<dyn ProcessExecutor> = Arc::new(CommandExecutor);
    let sessions = SessionRegistries::new();

    let outcome = match cli.command {
        Commands::Parse {
            project,
            input,
            from,
            to,
            format,
        } => {
            let project = ProjectFile::load(&project)?;
            let raw = read_input(&input)?;
            let modifications = cmd_parse(&project, &raw, from, to)?;
            print_modifications(&modifications, format)
        }
        Commands::Detect {
            project,
            since,
            until,
            last_status,
            format,
        } => {
            let project = ProjectFile::load(&project)?;
            let mut connector = project.connector(executor, &sessions)?;
            let modifications = cmd_detect(
                &project,
                &mut connector,
                since,
                until.unwrap_or_else(Utc::now),
                last_status.into(),
            )
            .await?;
            print_modifications(&modifications, format)
        }
        Commands::Materialize { project, label } => {
            let project = ProjectFile::load(&project)?;
            let mut connector = project.connector(executor, &sessions)?;
            cmd_materialize(&project, &mut connector, &label).await
        }
        Commands::Label {
            project,
            label,
            status,
        } => {
            let project = ProjectFile::load(&project)?;
            let mut connector = project.connector(executor, &sessions)?;
            cmd_label(&project, &mut connector, &label, status.into()).await
        }
    };

    METRICS.flush();
    outcome
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).context("failed to read stdin");
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

fn cmd_parse(
    project: &ProjectFile,
    raw: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<Modification>> {
    let from = from.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let to = to.unwrap_or_else(Utc::now);
    let modifications = project
        .source
        .parse_history(raw, from, to)
        .with_context(|| format!("failed to parse {} output", project.source.backend_name()))?;
    project.post_process(modifications)
}

async fn cmd_detect(
    project: &ProjectFile,
    connector: &mut dyn SourceControl,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    last_status: IntegrationStatus,
) -> Result<Vec<Modification>> {
    let from = project.result(since).with_status(last_status);
    let to = project.result(until).with_last_integration_status(last_status);
    let modifications = connector
        .detect_changes(&from, &to)
        .await
        .with_context(|| format!("{} history failed", connector.backend_name()))?;
    info!(
        project = %project.name,
        backend = connector.backend_name(),
        count = modifications.len(),
        "detected modifications"
    );
    Ok(modifications)
}

async fn cmd_materialize(
    project: &ProjectFile,
    connector: &mut dyn SourceControl,
    label: &str,
) -> Result<()> {
    let result = project.result(Utc::now()).with_label(label);
    connector
        .materialize_working_copy(&result)
        .await
        .with_context(|| format!("{} get failed", connector.backend_name()))?;
    println!("Working copy ready at {}", project.working_directory.display());
    Ok(())
}

async fn cmd_label(
    project: &ProjectFile,
    connector: &mut dyn SourceControl,
    label: &str,
    status: IntegrationStatus,
) -> Result<()> {
    let result = project
        .result(Utc::now())
        .with_label(label)
        .with_status(status);
    connector
        .label(&result)
        .await
        .with_context(|| format!("{} label {label} failed", connector.backend_name()))?;
    Ok(())
}

fn print_modifications(modifications: &[Modification], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(modifications)?),
        OutputFormat::Text => {
            if modifications.is_empty() {
                println!("No modifications");
            }
            for line in modifications.iter().map(render_modification) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn render_modification(modification: &Modification) -> String {
    let mut line = format!(
        "{:<9} {} {} {} {}",
        modification.kind.as_str(),
        modification.modified_time.format("%Y-%m-%d %H:%M:%S"),
        modification.user_name,
        modification.version,
        modification.path()
    );
    if let Some(url) = &modification.url {
        line.push_str(&format!(" <{url}>"));
    }
    line
}
