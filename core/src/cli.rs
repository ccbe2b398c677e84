use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the marketplace chat client.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Overrides applied on top of the config file and environment.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Base URL of the REST API.
    #[arg(long, global = true)]
    pub api_url: Option<String>,
    /// URL of the real-time socket endpoint.
    #[arg(long, global = true)]
    pub socket_url: Option<String>,
    /// Where the session is stored.
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session.
    Logout,
    /// Show the signed-in profile.
    Whoami,
    /// List conversations.
    Conversations,
    /// Open a conversation; every stdin line is sent as a message.
    Chat { conversation_id: String },
}
