use anyhow::Result;
use clap::{Args, Subcommand};
use indicatif::ProgressBar;
use itertools::Itertools;
use std::path::PathBuf;
use std::sync::Arc;

use super::credentials::{EnvironmentArgs, login, release};
use super::output::{heading, note, progress_bar, success, warning};
use crate::base::entity::EntityId;
use crate::client::Session;
use crate::ops::download::download_entities;
use crate::ops::mirror::{MirrorOptions, mirror_subtree};
use crate::ops::prompt::{BatchPrompter, Prompter, TerminalPrompter};
use crate::ops::stash::{export_workspace, restore_workspace};
use crate::repository::RemoteWorkspace;
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct EntitiesCommand {
    #[command(flatten)]
    environment: EnvironmentArgs,

    #[command(subcommand)]
    subcommand: EntitiesSubcommand,
}

#[derive(Subcommand, Debug)]
enum EntitiesSubcommand {
    /// Copy an entity and its children to another workspace
    Copy(CopyCommand),
    /// Write entities of some types to disk as JSON
    Download(DownloadCommand),
    /// Save a workspace's entities to a file, or put them back with --apply
    Stash(StashCommand),
}

#[derive(Args, Debug)]
struct CopyCommand {
    /// Source workspace id or name
    source_workspace: String,
    /// Id of the entity to copy
    source_entity: i64,
    /// Destination workspace id or name
    destination_workspace: String,
    /// Id of the entity to copy under; found by type when left out
    destination_entity: Option<i64>,
    /// Copy only the entity itself
    #[arg(long)]
    exclude_children: bool,
    /// Show what would be created without writing anything
    #[arg(long)]
    dry_run: bool,
    /// Answer yes to every confirmation
    #[arg(short, long)]
    yes: bool,
}

#[derive(Args, Debug)]
struct DownloadCommand {
    /// Workspace id or name
    #[arg(short, long)]
    workspace: String,
    /// Folder to write to
    #[arg(short, long)]
    destination: PathBuf,
    /// Entity type class name; repeat for several
    #[arg(short = 't', long = "entity-type", required = true)]
    entity_types: Vec<String>,
    /// Write every revision instead of the current state
    #[arg(long)]
    include_revisions: bool,
}

#[derive(Args, Debug)]
struct StashCommand {
    /// Workspace id or name
    #[arg(short, long)]
    workspace: String,
    /// Folder holding the stash file
    #[arg(short, long)]
    directory: PathBuf,
    /// Stash file name
    #[arg(short, long, default_value = "stash.json")]
    filename: String,
    /// Replace the workspace's entities by the stashed ones
    #[arg(short, long)]
    apply: bool,
    /// Answer yes to every confirmation
    #[arg(short, long)]
    yes: bool,
}

fn prompter(assume_yes: bool, progress: &ProgressBar) -> Box<dyn Prompter> {
    if assume_yes {
        Box::new(BatchPrompter { assume_yes })
    } else {
        Box::new(TerminalPrompter::new(progress.clone()))
    }
}

impl EntitiesCommand {
    pub async fn run(self, settings: &Settings) -> Result<()> {
        let session = login(settings, &self.environment).await?;
        let result = match self.subcommand {
            EntitiesSubcommand::Copy(cmd) => cmd.run(&session).await,
            EntitiesSubcommand::Download(cmd) => cmd.run(&session).await,
            EntitiesSubcommand::Stash(cmd) => cmd.run(&session).await,
        };
        release(&session).await;
        result
    }
}

impl CopyCommand {
    async fn run(self, session: &Arc<Session>) -> Result<()> {
        let source_ws = session.resolve_workspace(&self.source_workspace).await?;
        let destination_ws = session.resolve_workspace(&self.destination_workspace).await?;
        let source = RemoteWorkspace::new(session.clone(), source_ws);
        let destination = RemoteWorkspace::new(session.clone(), destination_ws);

        heading(if self.dry_run { "Copy entities (dry run)" } else { "Copy entities" });
        let progress = progress_bar("copying");
        let report = mirror_subtree(
            &source,
            &destination,
            EntityId(self.source_entity),
            self.destination_entity.map(EntityId),
            prompter(self.yes, &progress).as_ref(),
            MirrorOptions {
                exclude_children: self.exclude_children,
                dry_run: self.dry_run,
            },
            &progress,
        )
        .await;
        progress.finish_and_clear();
        let report = report?;

        if report.dry_run {
            for planned in &report.created {
                note(&format!(
                    "would create '{}' ({}) under {}",
                    planned.name, planned.source_id, planned.parent
                ));
            }
            success(&format!("{} entities would be created", report.created.len()));
        } else {
            success(&format!(
                "Created {} entities in workspace {destination_ws}",
                report.created.len()
            ));
        }
        if !report.skipped.is_empty() {
            warning(&format!(
                "Skipped {} entities of unknown types: {}",
                report.skipped_count(),
                report.skipped.iter().map(|s| &s.name).join(", ")
            ));
        }
        Ok(())
    }
}

impl DownloadCommand {
    async fn run(self, session: &Arc<Session>) -> Result<()> {
        let workspace = session.resolve_workspace(&self.workspace).await?;
        let api = RemoteWorkspace::new(session.clone(), workspace);

        heading("Download entities");
        let progress = progress_bar("downloading");
        let report = download_entities(
            &api,
            &self.destination,
            &self.entity_types,
            self.include_revisions,
            &progress,
        )
        .await;
        progress.finish_and_clear();
        let report = report?;

        for name in &report.unknown_types {
            warning(&format!("No entity type named '{name}'"));
        }
        success(&format!(
            "Wrote {} files to {}",
            report.files.len(),
            self.destination.display()
        ));
        Ok(())
    }
}

impl StashCommand {
    async fn run(self, session: &Arc<Session>) -> Result<()> {
        let workspace = session.resolve_workspace(&self.workspace).await?;
        let api = RemoteWorkspace::new(session.clone(), workspace);

        if self.apply {
            heading("Apply stash");
            let path = self.directory.join(&self.filename);
            let progress = progress_bar("restoring");
            let report =
                restore_workspace(&api, &path, prompter(self.yes, &progress).as_ref(), &progress).await;
            progress.finish_and_clear();
            let report = report?;
            note(&format!("deleted {} entities", report.deleted));
            if !report.skipped.is_empty() {
                warning(&format!(
                    "Skipped {} entities of unknown types",
                    report.skipped.iter().map(|s| s.size).sum::<usize>()
                ));
            }
            success(&format!(
                "Restored {} entities, rewrote references in {}",
                report.created, report.rewritten
            ));
        } else {
            heading("Stash workspace");
            let progress = progress_bar("reading");
            let path = export_workspace(&api, &self.directory, &self.filename, &progress).await;
            progress.finish_and_clear();
            success(&format!("Stashed to {}", path?.display()));
        }
        Ok(())
    }
}
