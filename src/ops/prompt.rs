//! Decisions the operations cannot take on their own.

use crate::prelude::*;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};
use indicatif::ProgressBar;
use itertools::Itertools;

use crate::base::entity::{Entity, EntityId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Some source types have no destination counterpart; their entities
    /// would be skipped.
    UnmatchedTypes {
        source: String,
        destination: String,
        class_names: Vec<String>,
    },
    /// Every child of every root in `workspace` is about to be deleted.
    DestructiveRestore { workspace: String, roots: usize },
}

impl Confirmation {
    pub fn message(&self) -> String {
        match self {
            Confirmation::UnmatchedTypes {
                source,
                destination,
                class_names,
            } => format!(
                "Entity types [{}] of {source} do not exist in {destination}; \
                 entities of these types are skipped together with their children. Continue?",
                class_names.join(", ")
            ),
            Confirmation::DestructiveRestore { workspace, roots } => format!(
                "All children of the {roots} root entities in {workspace} will be deleted and \
                 replaced by the stash. Continue?"
            ),
        }
    }

    fn default_answer(&self) -> bool {
        matches!(self, Confirmation::UnmatchedTypes { .. })
    }
}

pub trait Prompter: Send + Sync {
    fn confirm(&self, request: &Confirmation) -> Result<bool>;

    /// Picks the parent to create under among several of the right type.
    fn choose_parent(&self, candidates: &[Entity]) -> Result<EntityId>;
}

fn describe(entity: &Entity) -> String {
    format!("{} (id {})", entity.name, entity.id)
}

/// Asks on the terminal, hiding `progress` while a question is open.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
    progress: ProgressBar,
}

impl TerminalPrompter {
    pub fn new(progress: ProgressBar) -> Self {
        Self {
            theme: ColorfulTheme::default(),
            progress,
        }
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, request: &Confirmation) -> Result<bool> {
        let answer = self.progress.suspend(|| {
            Confirm::with_theme(&self.theme)
                .with_prompt(request.message())
                .default(request.default_answer())
                .interact()
        })?;
        Ok(answer)
    }

    fn choose_parent(&self, candidates: &[Entity]) -> Result<EntityId> {
        let items: Vec<String> = candidates.iter().map(describe).collect();
        let index = self.progress.suspend(|| {
            Select::with_theme(&self.theme)
                .with_prompt("Several entities can hold the copy; choose the parent")
                .items(&items)
                .default(0)
                .interact()
        })?;
        candidates
            .get(index)
            .map(|c| c.id)
            .ok_or_else(|| internal_error!("selection {index} out of range"))
    }
}

/// For runs without a terminal: confirmations get `assume_yes`, and an
/// ambiguous parent is an error.
pub struct BatchPrompter {
    pub assume_yes: bool,
}

impl Prompter for BatchPrompter {
    fn confirm(&self, request: &Confirmation) -> Result<bool> {
        info!("{} {}", request.message(), if self.assume_yes { "yes" } else { "no" });
        Ok(self.assume_yes)
    }

    fn choose_parent(&self, candidates: &[Entity]) -> Result<EntityId> {
        client_bail!(
            "several possible parents: {}; pass the destination entity id explicitly",
            candidates.iter().map(describe).join(", ")
        )
    }
}
