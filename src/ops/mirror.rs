//! Copies entity subtrees from one workspace into another.

use crate::prelude::*;

use indicatif::ProgressBar;
use serde_json::Value;

use crate::base::entity::{
    Entity, EntityId, EntityType, EntityTypeId, EntityTypeMapping, IdMapping, NewEntity,
};
use crate::base::field_path::{ReferenceCache, paths_from_parametrization};
use crate::base::tree::EntityTree;
use crate::ops::prompt::{Confirmation, Prompter};
use crate::repository::{EntityApi, fetch_tree};

/// Id reported for entities a dry run would have created.
pub const PLACEHOLDER_ID: EntityId = EntityId(0);

pub const REMAP_MESSAGE: &str = "Remap entity references";

#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorOptions {
    /// Copy only the entity itself.
    pub exclude_children: bool,
    /// Walk and report, write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedEntity {
    pub source_id: EntityId,
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityTypeId,
    pub parent: EntityId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSubtree {
    pub source_id: EntityId,
    pub name: String,
    pub entity_type: EntityTypeId,
    /// Entities left out, the subtree root included.
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct MirrorReport {
    /// Empty for a dry run.
    pub id_mapping: IdMapping,
    /// In creation order. Holds placeholder ids for a dry run.
    pub created: Vec<CreatedEntity>,
    pub skipped: Vec<SkippedSubtree>,
    pub dry_run: bool,
}

impl MirrorReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.iter().map(|s| s.size).sum()
    }

    fn absorb(&mut self, other: MirrorReport) -> Result<()> {
        for (old, new) in other.id_mapping.iter() {
            self.id_mapping.insert(old, new)?;
        }
        self.created.extend(other.created);
        self.skipped.extend(other.skipped);
        Ok(())
    }
}

/// Joins the two catalogues on class name. Source types missing at the
/// destination need the operator's consent.
pub fn map_entity_types(
    source_types: &[EntityType],
    destination_types: &[EntityType],
    source: &dyn EntityApi,
    destination: &dyn EntityApi,
    prompter: &dyn Prompter,
) -> Result<EntityTypeMapping> {
    let mapping = EntityTypeMapping::between(source_types, destination_types);
    if !mapping.unmatched().is_empty() {
        let request = Confirmation::UnmatchedTypes {
            source: source.label(),
            destination: destination.label(),
            class_names: mapping.unmatched().to_vec(),
        };
        if !prompter.confirm(&request)? {
            return Err(Error::aborted(format!(
                "entity types [{}] are missing in {}",
                mapping.unmatched().join(", "),
                destination.label()
            )));
        }
    }
    Ok(mapping)
}

/// Copies the subtree at `source_id` under `destination_parent`, or under the
/// one destination entity of the matching parent type when not given.
///
/// A root entity is never created: its children are copied instead.
pub async fn mirror_subtree(
    source: &dyn EntityApi,
    destination: &dyn EntityApi,
    source_id: EntityId,
    destination_parent: Option<EntityId>,
    prompter: &dyn Prompter,
    options: MirrorOptions,
    progress: &ProgressBar,
) -> Result<MirrorReport> {
    let tree = fetch_tree(source, source_id, !options.exclude_children).await?;
    let source_types = source.entity_types().await?;
    let destination_types = destination.entity_types().await?;
    let type_mapping = map_entity_types(
        &source_types,
        &destination_types,
        source,
        destination,
        prompter,
    )?;

    let root = tree.root();
    let (tops, parent_type) = match root.parent_entity_type {
        None => {
            info!("{} is a root entity; copying its children instead", root.name);
            (tree.children_of(root.id).to_vec(), root.entity_type)
        }
        Some(parent_type) => (vec![root.id], parent_type),
    };

    let parent = match destination_parent {
        Some(parent) => parent,
        None => {
            let destination_type = type_mapping.get(parent_type).with_context(|| {
                format!(
                    "the parent type of '{}' does not exist in {}",
                    root.name,
                    destination.label()
                )
            })?;
            resolve_parent(destination, destination_type, prompter).await?
        }
    };

    let writer = TreeWriter {
        files: source,
        destination,
        type_mapping: &type_mapping,
        progress,
        dry_run: options.dry_run,
    };
    progress.set_length(tops.iter().map(|id| tree.size(*id)).sum::<usize>() as u64);
    let report = writer.write(&tree, &tops, parent).await?;
    info!(
        "{} {} entities in {}, skipped {}",
        if report.dry_run { "Would create" } else { "Created" },
        report.created.len(),
        destination.label(),
        report.skipped_count()
    );
    Ok(report)
}

async fn resolve_parent(
    destination: &dyn EntityApi,
    entity_type: EntityTypeId,
    prompter: &dyn Prompter,
) -> Result<EntityId> {
    let candidates = destination.entities_of_type(entity_type).await?;
    match candidates.as_slice() {
        [] => client_bail!(
            "no entity of type {entity_type} in {} to copy under",
            destination.label()
        ),
        [only] => Ok(only.id),
        _ => {
            let chosen = prompter.choose_parent(&candidates)?;
            if !candidates.iter().any(|c| c.id == chosen) {
                client_bail!("entity {chosen} is not one of the possible parents");
            }
            Ok(chosen)
        }
    }
}

/// Creates tree nodes at a destination, parents before children.
pub(crate) struct TreeWriter<'a> {
    /// Where signed file urls in the tree were issued.
    pub files: &'a dyn EntityApi,
    pub destination: &'a dyn EntityApi,
    pub type_mapping: &'a EntityTypeMapping,
    pub progress: &'a ProgressBar,
    pub dry_run: bool,
}

impl TreeWriter<'_> {
    /// Creates the subtrees rooted at `tops` (in order) under `parent`.
    pub async fn write(
        &self,
        tree: &EntityTree,
        tops: &[EntityId],
        parent: EntityId,
    ) -> Result<MirrorReport> {
        let mut report = MirrorReport::new(self.dry_run);
        // source id -> destination id of everything placed so far
        let mut placed: HashMap<EntityId, EntityId> = HashMap::new();

        for top in tops {
            for source_id in tree.pre_order(*top) {
                let parent = if source_id == *top {
                    parent
                } else {
                    let source_parent = tree.parent_of(source_id).ok_or_else(|| {
                        internal_error!("entity {source_id} has no parent in the tree")
                    })?;
                    match placed.get(&source_parent) {
                        Some(parent) => *parent,
                        // inside a skipped subtree, already counted
                        None => continue,
                    }
                };
                let entity = tree
                    .get(source_id)
                    .ok_or_else(|| internal_error!("entity {source_id} is not in the tree"))?;
                let Some(entity_type) = self.type_mapping.get(entity.entity_type) else {
                    let size = tree.size(source_id);
                    warn!(
                        "No entity type matches that of '{}' ({}); skipping it and {} descendants",
                        entity.name,
                        entity.entity_type,
                        size - 1
                    );
                    self.progress.inc(size as u64);
                    report.skipped.push(SkippedSubtree {
                        source_id,
                        name: entity.name.clone(),
                        entity_type: entity.entity_type,
                        size,
                    });
                    continue;
                };

                let id = if self.dry_run {
                    PLACEHOLDER_ID
                } else {
                    let created = self
                        .create(entity, entity_type, parent)
                        .await
                        .with_context(|| format!("creating '{}' under {parent}", entity.name))?;
                    report.id_mapping.insert(source_id, created)?;
                    created
                };
                debug!("{} -> {} under {}", source_id, id, parent);
                report.created.push(CreatedEntity {
                    source_id,
                    id,
                    name: entity.name.clone(),
                    entity_type,
                    parent,
                });
                self.progress.inc(1);
                placed.insert(source_id, id);
            }
        }
        Ok(report)
    }

    async fn create(
        &self,
        entity: &Entity,
        entity_type: EntityTypeId,
        parent: EntityId,
    ) -> Result<EntityId> {
        let file = match entity.filename() {
            Some(url) if is_signed_url(url) => Some(self.files.fetch_file(url).await?),
            _ => None,
        };
        let created = self
            .destination
            .create_child(
                parent,
                NewEntity {
                    entity_type,
                    name: entity.name.clone(),
                    properties: entity.properties.clone(),
                },
                file,
            )
            .await?;
        Ok(created.id)
    }
}

fn is_signed_url(filename: &str) -> bool {
    filename.starts_with("https://") || filename.starts_with("http://")
}

/// Rewrites entity references inside every entity created through `mapping`
/// so they point at the new ids. Returns the number of entities updated.
pub async fn remap_references(
    api: &dyn EntityApi,
    mapping: &IdMapping,
    cache: &mut ReferenceCache,
    progress: &ProgressBar,
) -> Result<usize> {
    progress.set_length(mapping.len() as u64);
    let mut updated = 0;
    for id in mapping.new_ids() {
        progress.inc(1);
        let entity = api.stored_entity(id).await?;
        if cache.get(entity.entity_type).is_none() {
            let parametrization = api.parametrization(id).await?.unwrap_or(Value::Null);
            cache.insert(
                entity.entity_type,
                paths_from_parametrization(&parametrization),
            );
        }
        let paths = cache.get(entity.entity_type).unwrap_or_default();
        if paths.is_empty() {
            continue;
        }

        let mut properties = Value::Object(entity.properties);
        let mut rewritten = 0;
        for path in paths {
            rewritten += path.rewrite(&mut properties, id, mapping)?;
        }
        if rewritten == 0 {
            continue;
        }
        let Value::Object(properties) = properties else {
            internal_bail!("properties of entity {id} stopped being an object");
        };
        api.update_entity(id, properties, REMAP_MESSAGE)
            .await
            .with_context(|| format!("updating references of entity {id}"))?;
        debug!("Rewrote {rewritten} references in entity {id}");
        updated += 1;
    }
    Ok(updated)
}

/// Writes each `(tree, tops, parent)` job in turn and merges the reports.
pub(crate) async fn write_all(
    writer: &TreeWriter<'_>,
    jobs: &[(&EntityTree, Vec<EntityId>, EntityId)],
) -> Result<MirrorReport> {
    let mut report = MirrorReport::new(writer.dry_run);
    for (tree, tops, parent) in jobs {
        report.absorb(writer.write(tree, tops, *parent).await?)?;
    }
    Ok(report)
}
