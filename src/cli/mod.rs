mod credentials;
mod entities;
mod output;
mod users;

pub use credentials::{EnvironmentArgs, TOKEN_PREFIX};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;

use crate::settings::Settings;
use credentials::mask;

#[derive(Parser, Debug)]
#[command(name = "entity-porter")]
#[command(about = "Copy, download and stash entities between platform workspaces")]
#[command(version)]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "ENTITY_PORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// More output; repeat for more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commands on entity data
    Entities(entities::EntitiesCommand),
    /// Commands on users
    Users(users::UsersCommand),
    /// Show the environment and token picked up from the environment
    ShowCreds(EnvironmentArgs),
}

impl Cli {
    pub fn log_filter(&self) -> String {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        format!("warn,entity_porter={level}")
    }

    pub async fn run(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref())?;
        match self.command {
            Command::Entities(cmd) => cmd.run(&settings).await,
            Command::Users(cmd) => cmd.run(&settings).await,
            Command::ShowCreds(args) => {
                show_creds(&args);
                Ok(())
            }
        }
    }
}

fn show_creds(args: &EnvironmentArgs) {
    let unset = || "not set".dimmed().to_string();
    println!(
        "  {:<12} {}",
        "environment".bold(),
        args.env.clone().unwrap_or_else(unset)
    );
    println!(
        "  {:<12} {}",
        "token".bold(),
        args.pat.as_deref().map(mask).unwrap_or_else(unset)
    );
    if let Some(username) = &args.username {
        println!("  {:<12} {}", "username".bold(), username);
    }
}
