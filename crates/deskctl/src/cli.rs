//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use desk_common::{Month, DEFAULT_BIND_ADDR};

/// Desk control CLI
#[derive(Parser, Debug)]
#[command(name = "deskctl")]
#[command(about = "Inspect and manage service-request quotas", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Daemon base URL
    #[arg(long, global = true, env = "DESKCTL_SERVER", default_value_t = default_server())]
    pub server: String,

    /// Company to act as (sent as the identity header)
    #[arg(long = "as-company", global = true, env = "DESKCTL_COMPANY")]
    pub as_company: Option<String>,

    /// User to act as (sent as the identity header)
    #[arg(long = "as-user", global = true, env = "DESKCTL_USER")]
    pub as_user: Option<String>,

    /// Print raw JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

fn default_server() -> String {
    format!("http://{}", DEFAULT_BIND_ADDR)
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Ping the daemon
    Health,

    /// Show quota for a company-month (defaults: own company, current month)
    Quota {
        #[arg(long)]
        company: Option<String>,

        #[arg(long, requires = "company")]
        month: Option<Month>,
    },

    /// Grant extra SR tickets to a company for a month (admin)
    AddBundle {
        #[arg(long)]
        company: String,

        #[arg(long)]
        month: Month,

        #[arg(long)]
        tickets: u32,
    },

    /// Buy a ticket bundle for your own company this month
    Purchase {
        #[arg(long)]
        tickets: u32,
    },

    /// List support plans
    Plans,

    /// List registered companies
    Companies,
}
