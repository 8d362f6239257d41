//! datacrew - analyst agents for your database

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    ask_command, chat_command, init_command, memory_reset_command, memory_show_command,
    status_command,
};

const DEFAULT_AGENT: &str = "Data Manager";

/// datacrew - ask your database questions through a crew of analyst agents
#[derive(Parser)]
#[command(name = "datacrew")]
#[command(about = "◆ Analyst agents for your database")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and data directory
    Init,
    /// Ask one question and print the answer
    Ask {
        /// Question to answer
        question: String,
        /// Agent to ask (SQL Analyst, Data Manager, Data Scientist, Visualisation Analyst)
        #[arg(short, long, default_value = DEFAULT_AGENT)]
        agent: String,
        /// Print tool calls and hand-offs as they happen
        #[arg(short, long)]
        stream: bool,
    },
    /// Interactive session
    Chat {
        /// Agent to start with
        #[arg(short, long, default_value = DEFAULT_AGENT)]
        agent: String,
    },
    /// Inspect or clear the conversation transcript
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Show configuration status
    Status,
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Print the stored transcript
    Show {
        /// Only the last N turns
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Delete every stored turn
    Reset,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init => init_command().await,
        Commands::Ask {
            question,
            agent,
            stream,
        } => ask_command(&agent, &question, stream).await,
        Commands::Chat { agent } => chat_command(&agent).await,
        Commands::Memory { command } => match command {
            MemoryCommands::Show { limit } => memory_show_command(limit).await,
            MemoryCommands::Reset => memory_reset_command().await,
        },
        Commands::Status => status_command().await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("✗ {:#}", e);
        std::process::exit(1);
    }
}
