use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docstore_tasks::config::{AppConfig, CliConfig, FileConfig};
use docstore_tasks::tasks::{KnownTask, SqliteTaskQueueStore, TaskMetadata, TaskTable};
use std::path::PathBuf;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite tasks database file.
    #[clap(value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override command line options.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Total weight at which a merge pass stops absorbing tasks.
    #[clap(long)]
    pub merge_weight_limit: Option<usize>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List pending tasks in insertion order.
    List {
        /// Print one JSON object per task.
        #[clap(long)]
        json: bool,
    },
    /// Print whether tasks are pending and roughly how many.
    Count,
    /// Decode every pending task and report its weight, or why it can't be decoded.
    Inspect,
}

fn print_metadata(task: &TaskMetadata) {
    println!(
        "{:>8}  {}  index={:<4}  {}",
        task.id,
        task.enqueued_at.map_or_else(|| "-".to_string(), |at| at.to_rfc3339()),
        task.target_index,
        task.kind
    );
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        merge_weight_limit: cli_args.merge_weight_limit,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let store = SqliteTaskQueueStore::new(&config.db_path, config.queue.clone())
        .with_context(|| format!("Failed to open tasks database at {:?}", config.db_path))?;

    match cli_args.command {
        Command::List { json } => {
            let listed = store.read(|queue| {
                let mut listed = 0usize;
                for task in queue.list_pending() {
                    let task = task?;
                    if json {
                        match serde_json::to_string(&task) {
                            Ok(line) => println!("{}", line),
                            Err(e) => warn!("Could not serialize task {}: {}", task.id, e),
                        }
                    } else {
                        print_metadata(&task);
                    }
                    listed += 1;
                }
                Ok(listed)
            })?;
            info!("{} pending tasks", listed);
        }
        Command::Count => {
            let (pending, count) =
                store.read(|queue| Ok((queue.has_pending()?, queue.approximate_count()?)))?;
            println!("pending: {}", pending);
            println!("approximate count: {}", count);
        }
        Command::Inspect => {
            let faulty = store.read(|queue| {
                let mut faulty = 0usize;
                let mut after = None;
                while let Some(row) = queue.table().next_by_id(after)? {
                    after = Some(row.id);
                    match KnownTask::decode(&row.kind, &row.payload) {
                        Ok(task) => println!(
                            "{:>8}  {:<28}  index={:?}  weight={}",
                            row.id,
                            task.kind(),
                            task.target_index(),
                            task.weight()
                        ),
                        Err(e) => {
                            faulty += 1;
                            warn!("Task {} ({}) cannot be decoded: {}", row.id, row.kind, e);
                            println!("{:>8}  {:<28}  FAULTY: {}", row.id, row.kind, e);
                        }
                    }
                }
                Ok(faulty)
            })?;
            if faulty > 0 {
                warn!("{} pending tasks cannot be decoded", faulty);
            }
        }
    }

    Ok(())
}
