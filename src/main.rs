use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::{Builder, Env};
use log::{error, info};

use pagedb::config::Config;
use pagedb::repl::{Repl, SharedState};
use pagedb::storage::{BTree, Pager};

/// Interactive shell over a page file and the btree stored in it
#[derive(Debug, Parser)]
#[command(name = "pagedb", version)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding tree.db and pages.db
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Btree order t (nodes hold at most 2t-1 keys)
    #[arg(long)]
    order: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: Args) -> pagedb::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(order) = args.order {
        config.order = order;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: Config) -> pagedb::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let options = config.pager_options();
    let btree = BTree::open(config.tree_path(), &options, config.order)?;
    let pager = Pager::open(config.pages_path(), &options)?;
    info!("database in {:?}, order {}", config.data_dir, config.order);

    let mut repl = Repl::new(SharedState::new(config, btree, pager));
    let stdin = std::io::stdin();
    repl.run(stdin.lock(), &mut std::io::stdout())?;

    repl.into_shared().close()
}

fn main() -> ExitCode {
    let config = match load_config(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pagedb: {e}");
            return ExitCode::FAILURE;
        }
    };

    Builder::from_env(Env::default().default_filter_or(config.log_level.as_str())).init();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
