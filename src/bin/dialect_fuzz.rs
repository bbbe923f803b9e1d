//! Command-line driver.
//!
//! ```text
//! dialect-fuzz --config fuzz.toml run --url postgres://postgres@localhost/postgres
//! dialect-fuzz reproduce --url postgres://... logs/reproducers/<id>.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueHint};

use dialect_fuzz::connection::{Connector, PostgresConnector};
use dialect_fuzz::fragments::learner::{CommandLearner, FragmentLearner, NoLearner};
use dialect_fuzz::logging::init_logging;
use dialect_fuzz::oracle::Reproducer;
use dialect_fuzz::{FuzzConfig, FuzzError, reproduce_from_file, run};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Feedback-directed logic-bug finder for SQL engines"
)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory for logs, statistics and reproducers
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,

    /// Lower the default log level to debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fuzz a target server
    Run(RunArgs),

    /// Replay a reproducer (.json) or a SQL script against a target
    Reproduce(ReproduceArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Connection URL of the target server
    #[arg(long, env = "DIALECT_FUZZ_URL")]
    url: String,

    /// Dialect name selecting `dbconfigs/<dialect>`
    #[arg(long)]
    dialect: Option<String>,

    /// Dialect whose fragment files are loaded first
    #[arg(long)]
    compatible_with: Option<String>,

    /// Fragment directory, overriding `dbconfigs/<dialect>`
    #[arg(long, value_hint = ValueHint::DirPath)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    databases: Option<u32>,

    #[arg(long)]
    threads: Option<u32>,

    /// Oracle checks per database
    #[arg(long)]
    queries: Option<u32>,

    /// Program answering learn requests (JSON on stdin, CSV on stdout)
    #[arg(long, env = "DIALECT_FUZZ_LEARNER")]
    learner_command: Option<String>,

    #[arg(long)]
    enable_learning: bool,

    /// Keep every feature enabled regardless of its success rate
    #[arg(long)]
    no_feedback: bool,

    /// Route oracle SELECTs through an indexed view
    #[arg(long)]
    auto_index: bool,

    /// Reuse the URL's database instead of creating one per session
    #[arg(long)]
    no_create_database: bool,
}

#[derive(Args)]
struct ReproduceArgs {
    /// Connection URL of the target server
    #[arg(long, env = "DIALECT_FUZZ_URL")]
    url: String,

    /// Database to create for the replay
    #[arg(long, default_value = "reproduce")]
    database: String,

    /// Reproducer JSON or `;`-separated SQL script
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,
}

fn load_config(cli: &Cli) -> Result<FuzzConfig, FuzzError> {
    let mut config = match &cli.config {
        Some(path) => FuzzConfig::load(path)?,
        None => FuzzConfig::default(),
    };
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Command::Run(args) = &cli.command {
        if let Some(dialect) = &args.dialect {
            config.dialect_name = dialect.clone();
        }
        if args.compatible_with.is_some() {
            config.compatible_with = args.compatible_with.clone();
        }
        if args.config_dir.is_some() {
            config.config_dir = args.config_dir.clone();
        }
        if args.seed.is_some() {
            config.seed = args.seed;
        }
        if let Some(n) = args.databases {
            config.num_databases = n;
        }
        if let Some(n) = args.threads {
            config.num_threads = n;
        }
        if let Some(n) = args.queries {
            config.num_queries = n;
        }
        if args.learner_command.is_some() {
            config.learner_command = args.learner_command.clone();
        }
        config.enable_learning |= args.enable_learning;
        config.enable_feedback &= !args.no_feedback;
        config.auto_index_selects |= args.auto_index;
        config.create_database_per_session &= !args.no_create_database;
    }
    config.validate()?;
    Ok(config)
}

fn learner_for(config: &FuzzConfig) -> Arc<dyn FragmentLearner> {
    match &config.learner_command {
        Some(command) if config.enable_learning => Arc::new(CommandLearner::new(
            command.clone(),
            Duration::from_secs(config.learner_timeout_secs),
        )),
        _ => Arc::new(NoLearner),
    }
}

fn run_command(config: FuzzConfig, args: &RunArgs) -> Result<ExitCode, FuzzError> {
    let connector: Arc<dyn Connector> = Arc::new(PostgresConnector::new(
        args.url.clone(),
        config.create_database_per_session,
    ));
    let learner = learner_for(&config);
    let summary = run(config, connector, learner)?;
    for bug in &summary.bugs {
        println!(
            "[{}] {} (reproducer {})\n{}",
            bug.oracle,
            bug.session,
            bug.reproducer.id(),
            bug.message
        );
    }
    println!(
        "{} sessions, {} bugs, {} aborted",
        summary.sessions,
        summary.bugs.len(),
        summary.errors
    );
    Ok(if summary.bugs.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn reproduce_command(args: &ReproduceArgs) -> Result<ExitCode, FuzzError> {
    let connector = PostgresConnector::new(args.url.clone(), true);
    let mut conn = connector.connect(&args.database)?;
    if args.file.extension().is_some_and(|ext| ext == "json") {
        let reproduced = Reproducer::load(&args.file)?.replay_from_scratch(conn.as_mut())?;
        println!("{}", if reproduced { "reproduced" } else { "not reproduced" });
        return Ok(if reproduced {
            ExitCode::from(1)
        } else {
            ExitCode::SUCCESS
        });
    }
    let all_ok = reproduce_from_file(&args.file, conn.as_mut())?;
    println!(
        "{}",
        if all_ok {
            "all statements succeeded"
        } else {
            "some statements failed"
        }
    );
    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let _guard = match init_logging(Some(&config.log_dir), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot initialize logging: {e}");
            return ExitCode::from(2);
        }
    };

    let result = match &cli.command {
        Command::Run(args) => run_command(config, args),
        Command::Reproduce(args) => reproduce_command(args),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(kind = %e.kind(), error = %e, "fatal");
            ExitCode::from(2)
        }
    }
}
