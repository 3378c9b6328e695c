use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "nexusgate", about = "Policy-filtered tool gateway", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run the HTTP gateway.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 3917)]
        port: u16,
        /// Config file path (defaults to ./nexusgate.json).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load the config, report problems, and exit.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the tools a session would be allowed to call.
    Tools {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "main")]
        session: String,
        /// Channel hint, as sent in x-nexusgate-message-channel.
        #[arg(long)]
        channel: Option<String>,
        /// Account hint, as sent in x-nexusgate-account-id.
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        json: bool,
    },
}
