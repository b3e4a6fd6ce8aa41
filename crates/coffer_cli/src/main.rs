//! `cofferd` daemon entry point.
//!
//! # Responsibility
//! - Wire logging, configuration, storage and the access gate together.
//! - Run one-shot export/import jobs, or seed a fresh vault and keep the
//!   pruning scheduler running.
//!
//! # Invariants
//! - Seeding only happens when this start created the database.
//! - Export and import go through the same gate as API callers.

use clap::Parser;
use coffer_api::{AccessGate, ApiError, BearerTokenGate, OpenGate, RequestContext, VaultApi};
use coffer_core::{
    default_log_level, init_logging, init_stderr_logging, read_snapshot_file, ConfigError,
    Database, DbError, Pruner, PruningScheduler, SchedulerError, SnapshotCoordinator,
    SnapshotError, SqliteVaultRepository, StoreId, VaultConfig,
};
use log::{error, info, warn};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "cofferd", version, about = "Self-hosted secret vault daemon")]
struct Args {
    /// JSON configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long)]
    debug: bool,

    /// Absolute directory for rotating log files; logs go to stderr otherwise.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Disable colored stderr logs.
    #[arg(long)]
    no_colors: bool,

    /// Database file, overriding the config.
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Disable bearer token authentication.
    #[arg(long)]
    no_auth: bool,

    /// Export the vault (or one store) and exit.
    #[arg(long, conflicts_with = "import")]
    export: bool,

    /// Store to export.
    #[arg(long, value_name = "ID", requires = "export")]
    store: Option<StoreId>,

    /// Export destination.
    #[arg(long, value_name = "FILE", default_value = "coffer.json")]
    output: PathBuf,

    /// Import a snapshot file and exit.
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Snapshot imported when the database is created by this start.
    #[arg(long, value_name = "FILE")]
    seed: Option<PathBuf>,
}

#[derive(Debug)]
enum DaemonError {
    Logging(String),
    Config(ConfigError),
    Database(DbError),
    MissingToken,
    Api(ApiError),
    Snapshot(SnapshotError),
    Scheduler(SchedulerError),
}

impl Display for DaemonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logging(message) => write!(f, "logging: {message}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Database(err) => write!(f, "database: {err}"),
            Self::MissingToken => {
                write!(f, "auth.token is required unless --no-auth is given")
            }
            Self::Api(err) => write!(f, "{err}"),
            Self::Snapshot(err) => write!(f, "{err}"),
            Self::Scheduler(err) => write!(f, "{err}"),
        }
    }
}

impl From<ConfigError> for DaemonError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for DaemonError {
    fn from(value: DbError) -> Self {
        Self::Database(value)
    }
}

impl From<ApiError> for DaemonError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl From<SnapshotError> for DaemonError {
    fn from(value: SnapshotError) -> Self {
        Self::Snapshot(value)
    }
}

impl From<SchedulerError> for DaemonError {
    fn from(value: SchedulerError) -> Self {
        Self::Scheduler(value)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=daemon_exit module=cli status=error error={err}");
            eprintln!("cofferd: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), DaemonError> {
    let level = if args.debug {
        "debug"
    } else {
        default_log_level()
    };
    let logging = match args.log_dir.as_deref() {
        Some(dir) => init_logging(level, dir),
        None => init_stderr_logging(level, !args.no_colors),
    };
    logging.map_err(DaemonError::Logging)?;

    let mut config = match args.config.as_ref() {
        Some(path) => VaultConfig::load(path)?,
        None => VaultConfig::default(),
    };
    if let Some(database) = args.database.clone() {
        config.database = database;
    }
    config.validate()?;

    let db = Database::open(&config.database)?;
    let fresh = db.freshly_created();
    info!(
        "event=daemon_start module=cli status=ok database={} fresh={}",
        config.database.display(),
        fresh
    );
    let repo = Arc::new(SqliteVaultRepository::new(db));

    let gate: Box<dyn AccessGate> = if args.no_auth {
        warn!("event=auth_disabled module=cli status=warn");
        Box::new(OpenGate)
    } else {
        let token = config.auth.token.as_deref().unwrap_or_default();
        Box::new(BearerTokenGate::new(token).ok_or(DaemonError::MissingToken)?)
    };
    let context = config
        .auth
        .token
        .as_deref()
        .map_or_else(RequestContext::anonymous, RequestContext::with_bearer);
    let api = VaultApi::new(Arc::clone(&repo), gate);

    if args.export {
        let summary = api.export(&context, args.store, &args.output)?;
        println!(
            "exported {} store(s), {} record(s) to {}",
            summary.stores, summary.records, summary.output
        );
        return Ok(());
    }
    if let Some(input) = args.import.as_ref() {
        let stores = api.import(&context, input)?;
        println!("imported {} store(s) from {}", stores.len(), input.display());
        return Ok(());
    }

    if let Some(seed_path) = args.seed.as_ref() {
        if fresh {
            let seed = read_snapshot_file(seed_path)?;
            let created = SnapshotCoordinator::new(Arc::clone(&repo)).seed_if_empty(&seed)?;
            info!(
                "event=seed module=cli status=ok path={} stores={}",
                seed_path.display(),
                created
            );
        } else {
            info!("event=seed module=cli status=skipped reason=existing_database");
        }
    }

    if !config.scheduler.enabled {
        warn!("event=scheduler_disabled module=cli status=warn");
        return Ok(());
    }
    let pruner = Pruner::with_default_policy(Arc::clone(&repo));
    let handle = PruningScheduler::start(pruner, config.scheduler.period())?;
    handle.join()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn export_defaults_output_file() {
        let args = Args::try_parse_from(["cofferd", "--export", "--store", "4"]).unwrap();
        assert!(args.export);
        assert_eq!(args.store, Some(4));
        assert_eq!(args.output, PathBuf::from("coffer.json"));
    }

    #[test]
    fn stderr_logs_are_colored_unless_disabled() {
        let args = Args::try_parse_from(["cofferd"]).unwrap();
        assert!(!args.no_colors);

        let args = Args::try_parse_from(["cofferd", "--no-colors"]).unwrap();
        assert!(args.no_colors);
    }

    #[test]
    fn store_requires_export() {
        assert!(Args::try_parse_from(["cofferd", "--store", "4"]).is_err());
    }

    #[test]
    fn export_conflicts_with_import() {
        assert!(Args::try_parse_from(["cofferd", "--export", "--import", "a.json"]).is_err());
    }
}
