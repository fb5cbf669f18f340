mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, order::OrderSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tracker",
    about = "Placement order tracking with time-based auto-progression",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .tracker/)
    #[arg(long, global = true, env = "TRACKER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a tracker project in the current directory
    Init {
        /// Project name (default: directory name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Manage orders
    Order {
        #[command(subcommand)]
        subcommand: OrderSubcommand,
    },

    /// Run one auto-progress cycle and exit
    Tick {
        /// Evaluate as of this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Run the auto-progress worker in the foreground
    Worker,

    /// Serve the JSON API with the auto-progress worker
    Serve {
        /// Port to listen on (default: server.port from config; 0 = OS-assigned)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Worker => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { name } => cmd::init::run(&root, name.as_deref()),
        Commands::Order { subcommand } => cmd::order::run(&root, subcommand, cli.json),
        Commands::Tick { at } => cmd::tick::run(&root, at.as_deref(), cli.json),
        Commands::Worker => cmd::worker::run(&root),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
