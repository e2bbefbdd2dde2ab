//! `platecheck`: verify a project's plates against the asset database.
//!
//! ```bash
//! platecheck --config show.toml [--exclude-omits] [--limit N] [--json] [verify]
//! platecheck --config show.toml init-db
//! platecheck --config show.toml add-shot --code SH010 --sequence SQ010
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use platecheck_core::{ExrHeaderReader, PlateVerifier, PlatecheckConfig, SqliteAssetDatabase};

/// Verify production plates on disk against the asset database
#[derive(Parser, Debug)]
#[command(name = "platecheck", version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        short = 'c',
        env = "PLATECHECK_CONFIG",
        default_value = "platecheck.toml",
        global = true
    )]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    /// Project to operate on, overriding the config file
    #[arg(long, env = "PLATECHECK_PROJECT", global = true)]
    project: Option<String>,

    /// Skip shots with an omitted status
    #[arg(long)]
    exclude_omits: bool,

    /// Process at most this many shots
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Print the fault report and run counters as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the filesystem with the database (default)
    Verify,
    /// Create the asset database schema
    InitDb,
    /// Add or refresh a shot in the asset database
    AddShot {
        #[arg(long)]
        code: String,
        #[arg(long)]
        sequence: String,
        #[arg(long)]
        shot_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "platecheck=debug,platecheck_core=debug"
    } else {
        "platecheck=info,platecheck_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(true)
        .with_level(true)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<PlatecheckConfig> {
    let mut config = PlatecheckConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(project) = &cli.project {
        config.project = project.clone();
    }
    if cli.exclude_omits {
        config.exclude_omitted = true;
    }
    Ok(config)
}

fn open_database(config: &PlatecheckConfig) -> anyhow::Result<SqliteAssetDatabase> {
    let path = config.database_path();
    let db = SqliteAssetDatabase::new(&path, &config.project)
        .with_context(|| format!("opening asset database {}", path.display()))?;
    db.init_schema().context("initialising asset database schema")?;
    Ok(db)
}

fn verify(cli: &Cli, config: &PlatecheckConfig) -> anyhow::Result<ExitCode> {
    let templates = config
        .build_templates()
        .context("compiling path templates")?;
    let db = open_database(config)?;
    let mut verifier =
        PlateVerifier::new(db, ExrHeaderReader, templates, config.settings())
            .context("resolving the plate tag")?;

    info!(project = %config.project, "Starting plate verification");
    verifier.run(cli.limit).context("listing shots")?;

    let report = verifier.report();
    if cli.json {
        let output = serde_json::json!({
            "project": config.project,
            "stats": verifier.stats(),
            "faults": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{report}");
        let stats = verifier.stats();
        println!(
            "{} shots, {} walked, {} created, {} updated, {} published, {} uploaded",
            stats.shots_selected,
            stats.shots_walked,
            stats.versions_created,
            stats.versions_updated,
            stats.publishes,
            stats.uploads
        );
    }
    Ok(if report.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let config = load_config(&cli)?;

    match &cli.command {
        None | Some(Command::Verify) => verify(&cli, &config),
        Some(Command::InitDb) => {
            let db = open_database(&config)?;
            println!(
                "{} (schema v{})",
                db.db_path().display(),
                db.schema_version()?
            );
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::AddShot {
            code,
            sequence,
            shot_type,
            status,
        }) => {
            let db = open_database(&config)?;
            let id = db
                .insert_shot(
                    code,
                    Some(sequence.as_str()),
                    shot_type.as_deref(),
                    status.as_deref(),
                )
                .with_context(|| format!("adding shot {code}"))?;
            println!("{code} -> {id}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
