use clap::{Parser, Subcommand, ValueEnum};

use crate::models::CredentialKind;

/// Keygate: credential issuance and authorization gate for agent traffic
#[derive(Parser)]
#[command(name = "keygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (overrides KEYGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage credentials directly in the database
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Dashboard sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    General,
    Scoped,
}

impl From<KindArg> for CredentialKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::General => CredentialKind::General,
            KindArg::Scoped => CredentialKind::Scoped,
        }
    }
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a credential. The secret is printed once.
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type", value_enum, default_value = "general")]
        kind: KindArg,
        /// Requests per minute (defaults to KEYGATE_DEFAULT_RPM)
        #[arg(long)]
        rate_limit: Option<u32>,
        #[arg(long, value_delimiter = ',')]
        agents: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        models: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        domains: Vec<String>,
    },
    /// List an owner's credentials (metadata only)
    List {
        #[arg(long)]
        owner: String,
    },
    /// Revoke a credential
    Revoke {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },
    /// Permanently delete a credential
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Mint a session token for a principal
    Issue {
        #[arg(long)]
        principal: String,
    },
}
