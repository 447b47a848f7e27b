//! Strategy backtesting engine - main entry point
//!
//! Subcommands:
//! - backtest: Replay one symbol's signals over historical bars
//! - optimize: Grid-search engine parameters
//! - walk-forward: Rolling train/test parameter selection
//! - monte-carlo: Resample a run's trades into outcome distributions
//! - batch: Independent runs across a symbol list
//! - export / runs: Inspect the results store
//!
//! Exit codes: 0 clean run, 1 data unavailable or corrupt, 2 prop-firm
//! constraint breached, 3 internal error.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use prop_backtest::EngineError;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "prop-backtest")]
#[command(about = "Signal-driven backtesting with prop-firm risk constraints", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single-symbol backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol to run
        #[arg(short, long)]
        symbol: String,

        /// Signal CSV path (defaults to {data_dir}/{SYMBOL}_signals.csv)
        #[arg(long)]
        signals: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Grid-search engine parameters
    Optimize {
        /// Path to configuration file with a grid section
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol to optimize on
        #[arg(short, long)]
        symbol: String,

        /// Signal CSV path
        #[arg(long)]
        signals: Option<String>,

        /// Objective to maximize (sharpe, return, calmar, profit_factor)
        #[arg(long, default_value = "sharpe")]
        objective: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Rolling train/test parameter selection
    WalkForward {
        /// Path to configuration file with a grid section
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol to run
        #[arg(short, long)]
        symbol: String,

        /// Signal CSV path
        #[arg(long)]
        signals: Option<String>,

        /// Bars per training window
        #[arg(long, default_value = "252")]
        train: usize,

        /// Bars per test window
        #[arg(long, default_value = "63")]
        test: usize,

        /// Window advance per fold (defaults to the test size)
        #[arg(long)]
        step: Option<usize>,

        /// Objective to maximize on the training window
        #[arg(long, default_value = "sharpe")]
        objective: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Resample trades into outcome distributions
    MonteCarlo {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol for a fresh run (alternative to --run-id)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Stored run to resample
        #[arg(long)]
        run_id: Option<i64>,

        /// Signal CSV path (fresh runs only)
        #[arg(long)]
        signals: Option<String>,

        /// Resampling iterations
        #[arg(long, default_value = "1000")]
        iterations: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Block length for block resampling (omit for iid draws)
        #[arg(long)]
        block: Option<usize>,

        /// Start date (YYYY-MM-DD, fresh runs only)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, fresh runs only)
        #[arg(long)]
        end: Option<String>,
    },

    /// Independent runs across a symbol list
    Batch {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbols to run (comma-separated); defaults to the configured table
        #[arg(short, long)]
        symbols: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Export a stored run
    Export {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Stored run id
        #[arg(long)]
        run_id: i64,

        /// Output format (json, csv)
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output path
        #[arg(short, long)]
        output: String,
    },

    /// List stored runs
    Runs {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Max runs to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // File appender
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // For optimizer: only log to file, keep console clean for progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // File layer - same format but without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Backtest {
            config,
            symbol,
            signals,
            capital,
            start,
            end,
        } => commands::backtest::run(config, symbol, signals, capital, start, end),

        Commands::Optimize {
            config,
            symbol,
            signals,
            objective,
            top,
            start,
            end,
        } => commands::optimize::run(config, symbol, signals, objective, top, start, end),

        Commands::WalkForward {
            config,
            symbol,
            signals,
            train,
            test,
            step,
            objective,
            start,
            end,
        } => commands::walk_forward::run(
            config, symbol, signals, train, test, step, objective, start, end,
        ),

        Commands::MonteCarlo {
            config,
            symbol,
            run_id,
            signals,
            iterations,
            seed,
            block,
            start,
            end,
        } => commands::monte_carlo::run(
            config, symbol, run_id, signals, iterations, seed, block, start, end,
        ),

        Commands::Batch {
            config,
            symbols,
            start,
            end,
        } => commands::batch::run(config, symbols, start, end),

        Commands::Export {
            config,
            run_id,
            format,
            output,
        } => commands::export::run(config, run_id, format, output),

        Commands::Runs { config, limit } => commands::export::list(config, limit),
    }
}

fn main() {
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true), // File-only for clean progress bar
        Commands::WalkForward { .. } => ("walk_forward", true),
        Commands::MonteCarlo { .. } => ("monte_carlo", false),
        Commands::Batch { .. } => ("batch", false),
        Commands::Export { .. } => ("export", false),
        Commands::Runs { .. } => ("runs", false),
    };

    if let Err(e) = setup_logging(cli.verbose, command_name, file_only) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(3);
    }

    match dispatch(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<EngineError>()
                .map(EngineError::exit_code)
                .unwrap_or(3);
            std::process::exit(code);
        }
    }
}
