use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Delegating agent server with streaming transports")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Address to bind (e.g., "127.0.0.1:8080")
        #[arg(short, long)]
        bind: Option<String>,

        /// Shared secret the WebSocket bridge requires
        #[arg(long)]
        secret: Option<String>,

        /// Oracle base URL (e.g., "http://localhost:11434")
        #[arg(long)]
        oracle_url: Option<String>,

        /// Oracle model name (e.g., "llama3.2", "qwen2.5:7b")
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum delegation chain depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Path to config file (overrides default search)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
