//! `stratum`: provision and reconcile tenant schemas from the command line.

mod config;
mod output;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use output::Printer;
use std::process::ExitCode;
use stratum::{Orchestrator, RunOptions, SchemaSource, expected_schema, plan_schema};
use tokio_postgres::{Client, NoTls};

/// Tenant schema provisioning and drift reconciliation for Postgres.
#[derive(Parser, Debug)]
#[command(name = "stratum", version)]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Directory of `*.sql` schema sources
    #[arg(long, global = true)]
    sources: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the schema, verify it and record its version
    Provision {
        /// Do not add missing columns to existing tables
        #[arg(long)]
        skip_auto_sync: bool,

        /// Log every reconciliation statement
        #[arg(long)]
        verbose: bool,

        /// Tenant name, attached to every log line of the run
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Show what reconciliation would change, without changing anything
    Plan {
        /// Print the SQL instead of a summary
        #[arg(long)]
        sql: bool,
    },
    /// Parse the sources and print the tables they declare
    Parse,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("no database URL: pass --database-url, set DATABASE_URL or configure database.url")]
    MissingDatabaseUrl,

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error(transparent)]
    Stratum(#[from] stratum::Error),

    #[error("{0} source(s) had parse warnings")]
    ParseWarnings(usize),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratum=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let (file, config_path) = config::load_or_default()?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "loaded config");
    }
    let settings = config::settings(&file);
    let dir = config::sources_dir(cli.sources.as_deref(), &file, config_path.as_deref());
    let sources = SchemaSource::load_dir(&dir)?;
    tracing::info!(dir = %dir, count = sources.len(), "loaded schema sources");
    let printer = Printer::detect();

    match cli.command {
        Commands::Provision {
            skip_auto_sync,
            verbose,
            tenant,
        } => {
            let url = database_url(cli.database_url, &file)?;
            let client = connect(&url).await?;
            let options = RunOptions {
                skip_auto_sync: skip_auto_sync || file.run.skip_auto_sync.unwrap_or(false),
                verbose: verbose || file.run.verbose.unwrap_or(false),
            };
            let span = tracing::info_span!(
                "provision",
                tenant = tenant.as_deref().unwrap_or("-"),
                schema = %settings.schema,
            );

            let orchestrator = Orchestrator::new(&client, sources, settings, span)?;
            let report = orchestrator.run(options).await?;
            report.log();
            print!("{}", printer.report(&report));
        }
        Commands::Plan { sql } => {
            let url = database_url(cli.database_url, &file)?;
            let client = connect(&url).await?;
            let expected = expected_schema(&sources);
            let plans = plan_schema(&client, &expected, &settings.schema).await?;
            print!("{}", printer.plans(&plans, &settings.schema, sql));
        }
        Commands::Parse => {
            let parsed: Vec<_> = sources.iter().map(SchemaSource::parse).collect();
            print!("{}", printer.parsed(&parsed));
            let warned = parsed.iter().filter(|p| !p.warnings.is_empty()).count();
            if warned > 0 {
                return Err(CliError::ParseWarnings(warned));
            }
        }
    }
    Ok(())
}

fn database_url(flag: Option<String>, file: &config::Config) -> Result<String, CliError> {
    flag.or_else(|| file.database.url.clone())
        .ok_or(CliError::MissingDatabaseUrl)
}

async fn connect(url: &str) -> Result<Client, CliError> {
    let (client, connection) =
        tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|source| CliError::Connect {
                url: mask_password(url),
                source,
            })?;

    // Spawn connection handler
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "database connection error");
        }
    });

    tracing::info!(database = %mask_password(url), "connected");
    Ok(client)
}

/// Mask password in database URL for display
fn mask_password(url: &str) -> String {
    if let Some(start) = url.find("://") {
        if let Some(at) = url.rfind('@') {
            if at > start {
                let prefix = &url[..start + 3];
                let suffix = &url[at..];
                if let Some(colon) = url[start + 3..at].find(':') {
                    let user = &url[start + 3..start + 3 + colon];
                    return format!("{}{}:***{}", prefix, user, suffix);
                }
            }
        }
    }
    url.to_string()
}
