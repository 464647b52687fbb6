//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};

/// Keep a MapMyLearn account signed in from the terminal.
#[derive(Debug, Parser)]
#[command(name = "mapmylearn", version)]
pub struct Args {
    /// Path to config file (default: ./mapmylearn.toml or ~/.config/mapmylearn/mapmylearn.toml).
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,

    /// Override API base URL.
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Ask the server for a long-lived session.
        #[arg(long = "remember-me")]
        remember_me: bool,
    },
    /// Create an account and sign in.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long = "full-name")]
        full_name: Option<String>,
    },
    /// Sign out and forget the stored session.
    Logout,
    /// Show who is signed in and when the token expires.
    Status,
    /// Show the account's credit balance.
    Credits,
    /// Refresh the access token now.
    Refresh,
    /// Keep the session fresh until interrupted, following changes made by
    /// other processes.
    Watch,
}
