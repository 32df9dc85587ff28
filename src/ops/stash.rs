//! Whole-workspace snapshots in a single JSON file.

use crate::prelude::*;

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

use crate::base::entity::{Entity, EntityType, EntityTypeMapping, IdMapping};
use crate::base::field_path::ReferenceCache;
use crate::base::tree::{EntityTree, NestedEntity};
use crate::ops::mirror::{SkippedSubtree, TreeWriter, remap_references, write_all};
use crate::ops::prompt::{Confirmation, Prompter};
use crate::repository::{EntityApi, delete_children, fetch_tree};

pub const RESTORE_MESSAGE: &str = "Apply database stash";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashFile {
    /// Root entities with their full subtrees, in listing order.
    pub entities: Vec<NestedEntity>,
    pub entity_types: Vec<EntityType>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Stashed id to restored id, roots included.
    pub id_mapping: IdMapping,
    pub deleted: usize,
    pub created: usize,
    pub skipped: Vec<SkippedSubtree>,
    /// Entities whose references were rewritten.
    pub rewritten: usize,
}

/// Reads every root entity and its subtree. Writes nothing remotely.
pub async fn export_workspace(
    api: &dyn EntityApi,
    folder: &Path,
    filename: &str,
    progress: &ProgressBar,
) -> Result<PathBuf> {
    let roots = api.root_entities().await?;
    progress.set_length(roots.len() as u64);
    let mut entities = Vec::with_capacity(roots.len());
    for root in &roots {
        progress.set_message(root.name.clone());
        let tree = fetch_tree(api, root.id, true).await?;
        entities.push(tree.to_nested());
        progress.inc(1);
    }
    let stash = StashFile {
        entities,
        entity_types: api.entity_types().await?,
    };

    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("creating {}", folder.display()))?;
    let path = folder.join(filename);
    tokio::fs::write(&path, serde_json::to_vec(&stash)?)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(
        "Stashed {} root entities of {} to {}",
        stash.entities.len(),
        api.label(),
        path.display()
    );
    Ok(path)
}

pub async fn read_stash(path: &Path) -> Result<StashFile> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&content)
        .map_err(Error::from)
        .with_context(|| format!("parsing stash file {}", path.display()))
}

fn class_names<'a>(
    roots: impl Iterator<Item = &'a Entity>,
    types: &[EntityType],
) -> Vec<String> {
    roots
        .map(|root| {
            types
                .iter()
                .find(|t| t.id == root.entity_type)
                .map(|t| t.class_name.clone())
                .unwrap_or_else(|| format!("#{}", root.entity_type))
        })
        .collect()
}

/// Stashed roots must line up one to one, by type, with the current roots.
pub fn check_roots(
    stash: &StashFile,
    current_roots: &[Entity],
    current_types: &[EntityType],
) -> Result<()> {
    let stashed = class_names(stash.entities.iter().map(|n| &n.entity), &stash.entity_types);
    let current = class_names(current_roots.iter(), current_types);
    if stashed != current {
        return Err(Error::StructuralMismatch { stashed, current });
    }
    Ok(())
}

/// Replaces the children of every root in `api` by the stashed ones.
pub async fn restore_workspace(
    api: &dyn EntityApi,
    path: &Path,
    prompter: &dyn Prompter,
    progress: &ProgressBar,
) -> Result<RestoreReport> {
    let stash = read_stash(path).await?;
    let current_roots = api.root_entities().await?;
    let current_types = api.entity_types().await?;
    check_roots(&stash, &current_roots, &current_types)?;

    let request = Confirmation::DestructiveRestore {
        workspace: api.label(),
        roots: current_roots.len(),
    };
    if !prompter.confirm(&request)? {
        return Err(Error::aborted("restore was not confirmed"));
    }

    let mut report = RestoreReport::default();
    progress.set_message("deleting");
    for root in &current_roots {
        report.deleted += delete_children(api, root.id)
            .await
            .with_context(|| format!("clearing root entity '{}'", root.name))?;
    }

    let type_mapping = EntityTypeMapping::between(&stash.entity_types, &current_types);
    if !type_mapping.unmatched().is_empty() {
        warn!(
            "Stashed entity types [{}] no longer exist; their entities are not restored",
            type_mapping.unmatched().join(", ")
        );
    }

    let mut trees = Vec::with_capacity(stash.entities.len());
    for (stashed, current) in stash.entities.iter().zip(&current_roots) {
        api.update_entity(current.id, stashed.entity.properties.clone(), RESTORE_MESSAGE)
            .await
            .with_context(|| format!("restoring root entity '{}'", current.name))?;
        report.id_mapping.insert(stashed.entity.id, current.id)?;
        trees.push((EntityTree::from_nested(stashed.clone())?, current.id));
    }

    progress.set_message("creating");
    progress.set_position(0);
    progress.set_length(
        trees
            .iter()
            .map(|(tree, _)| tree.size(tree.root_id()) as u64 - 1)
            .sum(),
    );
    let jobs: Vec<(&EntityTree, Vec<_>, _)> = trees
        .iter()
        .map(|(tree, root)| (tree, tree.children_of(tree.root_id()).to_vec(), *root))
        .collect();
    let writer = TreeWriter {
        files: api,
        destination: api,
        type_mapping: &type_mapping,
        progress,
        dry_run: false,
    };
    let written = write_all(&writer, &jobs).await?;
    report.created = written.created.len();
    report.skipped = written.skipped;
    for (old, new) in written.id_mapping.iter() {
        report.id_mapping.insert(old, new)?;
    }

    progress.set_message("remapping references");
    progress.set_position(0);
    report.rewritten = remap_references(
        api,
        &report.id_mapping,
        &mut ReferenceCache::new(),
        progress,
    )
    .await?;
    info!(
        "Restored {} into {}: deleted {}, created {}, rewrote references in {}",
        path.display(),
        api.label(),
        report.deleted,
        report.created,
        report.rewritten
    );
    Ok(report)
}
