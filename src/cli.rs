use clap::{Parser, Subcommand};

/// PilotGate — magic-link access control for multi-tenant pilot apps
#[derive(Parser)]
#[command(name = "pilotgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the server
    Serve {
        /// Port to bind (overrides PILOTGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage a tenant's whitelist from the command line
    Whitelist {
        #[command(subcommand)]
        command: WhitelistCommands,
    },
}

#[derive(Subcommand)]
pub enum WhitelistCommands {
    /// Whitelist an email directly (bypasses the pending queue)
    Add {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        email: String,
    },
    /// Remove an email from the whitelist
    Remove {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        email: String,
    },
    /// Approve a pending request
    Approve {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        email: String,
    },
    /// Deny a pending request
    Deny {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        email: String,
    },
    /// Show the whitelist and pending queue
    List {
        #[arg(long)]
        tenant: String,
    },
}
