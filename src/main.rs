use std::{path::PathBuf, sync::Arc};

use chrono::{NaiveDate, Utc};
use clap::Parser;
use costroll::{
    config::CostrollConfig,
    db::{DateRange, DbPool},
    jobs, observability,
    rollup::{BuildOptions, RefreshWindow, RollupEngine},
};

/// Config file used when `--config` is not given and it exists.
const DEFAULT_CONFIG_FILE: &str = "costroll.toml";

/// CLI arguments for costroll
#[derive(Parser, Debug)]
#[command(version, about = "Windowed cost rollup engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./costroll.toml if it exists)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the scheduled refresh worker until interrupted (default)
    Serve,
    /// Build one rollup for one tenant and print the report as JSON
    Build {
        #[arg(short, long)]
        rollup: String,
        #[arg(short, long)]
        tenant: String,
        /// Date the window is anchored to (defaults to today, UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Aggregate without publishing
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the refresh window for a retention length
    Window {
        #[arg(short, long)]
        months: u32,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// List the rollup catalog
    Rollups,
    /// Print published rollup rows as JSON lines
    Show {
        #[arg(short, long)]
        rollup: String,
        #[arg(short, long)]
        tenant: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(args.config.as_deref());

    match args.command {
        Some(Command::Build {
            rollup,
            tenant,
            as_of,
            dry_run,
        }) => run_build(config, &rollup, &tenant, as_of, dry_run).await,
        Some(Command::Window { months, as_of }) => run_window(months, as_of),
        Some(Command::Rollups) => run_rollups(&config),
        Some(Command::Show {
            rollup,
            tenant,
            from,
            to,
        }) => run_show(config, &rollup, &tenant, from, to).await,
        Some(Command::Migrate) => run_migrate(config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

fn load_config(explicit_path: Option<&str>) -> CostrollConfig {
    let path = match explicit_path {
        Some(p) => PathBuf::from(p),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return CostrollConfig::default();
            }
            default
        }
    };

    match CostrollConfig::from_file(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_observability(config: &CostrollConfig) {
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Connect to the configured database, exiting on failure.
async fn connect(config: &CostrollConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

fn engine_for(config: &CostrollConfig, db: &DbPool) -> RollupEngine {
    let catalog = match config.catalog() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    RollupEngine::new(db, catalog).with_options(BuildOptions::from(&config.scheduler))
}

async fn run_server(config: CostrollConfig) {
    init_observability(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }

    let db = connect(&config).await;
    if config.database.run_migrations()
        && let Err(e) = db.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        std::process::exit(1);
    }
    if let Err(e) = db.health_check().await {
        tracing::error!(error = %e, "Database health check failed");
        std::process::exit(1);
    }

    let engine = Arc::new(engine_for(&config, &db));
    tracing::info!(
        rollups = engine.catalog().len(),
        "costroll started"
    );

    let worker = tokio::spawn(jobs::start_rollup_refresh_worker(
        engine,
        config.scheduler.clone(),
    ));

    shutdown_signal().await;
    worker.abort();
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn run_build(
    mut config: CostrollConfig,
    rollup: &str,
    tenant: &str,
    as_of: Option<NaiveDate>,
    dry_run: bool,
) {
    init_observability(&config);
    config.scheduler.dry_run |= dry_run;

    let db = connect(&config).await;
    let engine = engine_for(&config, &db);
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());

    match engine.build(rollup, tenant, as_of).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_window(months: u32, as_of: Option<NaiveDate>) {
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    match RefreshWindow::for_retention(as_of, months) {
        Ok(window) => println!("{}", window),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_rollups(config: &CostrollConfig) {
    let catalog = match config.catalog() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    for def in catalog.iter() {
        let dimensions: Vec<&str> = def.dimensions.iter().map(|d| d.as_str()).collect();
        println!(
            "{}\tline_item_type={}\tdimensions=[{}]\tretention_months={}\tgranularity={}",
            def.name,
            def.line_item_type,
            dimensions.join(","),
            def.retention_months,
            def.granularity.as_str()
        );
    }
}

async fn run_show(
    config: CostrollConfig,
    rollup: &str,
    tenant: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) {
    init_observability(&config);
    let db = connect(&config).await;

    let all = DateRange::all();
    let range = DateRange {
        start: from.unwrap_or(all.start),
        end: to.unwrap_or(all.end),
    };

    let rows = match db.rollups().list_rows(rollup, tenant, range).await {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    for row in rows {
        match serde_json::to_string(&row) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_migrate(config: CostrollConfig) {
    init_observability(&config);
    tracing::info!("Running database migrations");

    let db = connect(&config).await;
    match db.run_migrations().await {
        Ok(()) => {
            tracing::info!("Database migrations completed successfully");
        }
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            eprintln!("Error: Database migrations failed: {}", e);
            std::process::exit(1);
        }
    }
}
