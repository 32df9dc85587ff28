use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::credentials::{EnvironmentArgs, login, release};
use super::output::{heading, success, warning};
use crate::ops::users::{add_users, read_users_csv};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct UsersCommand {
    #[command(flatten)]
    environment: EnvironmentArgs,

    #[command(subcommand)]
    subcommand: UsersSubcommand,
}

#[derive(Subcommand, Debug)]
enum UsersSubcommand {
    /// Add users listed in a CSV file with columns
    /// first_name, last_name, email and optionally job_title
    Add(AddCommand),
}

#[derive(Args, Debug)]
struct AddCommand {
    /// CSV file with the users to add
    #[arg(short, long)]
    file: PathBuf,
}

impl UsersCommand {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let UsersSubcommand::Add(cmd) = self.subcommand;
        // A broken file should not cost a login.
        let sheet = read_users_csv(&cmd.file)?;
        for (line, reason) in &sheet.rejected {
            warning(&format!("Line {line} of {} skipped: {reason}", cmd.file.display()));
        }

        let session = login(settings, &self.environment).await?;
        heading(&format!("Add users to {}", session.domain()));
        let result = add_users(&session, &sheet.users).await;
        release(&session).await;
        let report = result?;

        for (name, reason) in &report.failed {
            warning(&format!("Failed to add {name}: {}", reason.lines().next().unwrap_or_default()));
        }
        success(&format!(
            "Added {} of {} users",
            report.added.len(),
            sheet.users.len() + sheet.rejected.len()
        ));
        Ok(())
    }
}
