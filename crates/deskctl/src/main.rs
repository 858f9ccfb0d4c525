//! Desk Control - CLI client for deskd
//!
//! Talks to the daemon over HTTP and renders quota and bundle state.

use anyhow::{anyhow, Result};
use clap::Parser;
use desk_common::Identity;
use deskctl::cli::{Cli, Commands};
use deskctl::client::{DaemonError, DeskClient};
use deskctl::output;
use serde::Serialize;

fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", render(value));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let identity = match (cli.as_company, cli.as_user) {
        (Some(company), Some(user)) => Some(Identity::new(company, user)),
        (None, None) => None,
        _ => return Err(anyhow!("--as-company and --as-user must be given together")),
    };
    let client = DeskClient::new(&cli.server, identity)?;
    let json = cli.json;

    match cli.command {
        Commands::Health => emit(json, &client.health().await?, output::render_health),
        Commands::Quota { company, month } => emit(
            json,
            &client.quota(company.as_deref(), month).await?,
            output::render_quota,
        ),
        Commands::AddBundle {
            company,
            month,
            tickets,
        } => emit(
            json,
            &client.add_bundle(&company, month, tickets).await?,
            output::render_bundle,
        ),
        Commands::Purchase { tickets } => {
            emit(json, &client.purchase(tickets).await?, output::render_bundle)
        }
        Commands::Plans => emit(json, &client.plans().await?, |v| output::render_plans(v)),
        Commands::Companies => emit(json, &client.companies().await?, |v| {
            output::render_companies(v)
        }),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<DaemonError>() {
            Some(daemon) => eprint!("{}", output::render_daemon_error(daemon)),
            None => eprintln!("[ERROR] {:#}", err),
        }
        std::process::exit(1);
    }
}
