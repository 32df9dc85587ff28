use crate::prelude::*;

use indexmap::IndexMap;
use std::fmt::Display;

pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Server-assigned entity id. Differs between workspaces for the "same" entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned entity type id. Only meaningful within one installation;
/// match types across installations by [`EntityType::class_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeId(pub i64);

impl Display for EntityTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: EntityTypeId,
    pub class_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub entity_type: EntityTypeId,
    #[serde(default)]
    pub properties: Properties,
    /// `None` for root entities. Only filled in by single-entity reads.
    #[serde(default)]
    pub parent_entity_type: Option<EntityTypeId>,
}

impl Entity {
    /// Stored file key, or a signed download url once the entity was read
    /// through the repository.
    pub fn filename(&self) -> Option<&str> {
        self.properties
            .get(FILENAME_PROPERTY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

pub const FILENAME_PROPERTY: &str = "filename";

/// Payload for creating an entity under some parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntity {
    pub entity_type: EntityTypeId,
    pub name: String,
    pub properties: Properties,
}

/// Old (source) id to new (destination) id, in creation order.
///
/// Append-only: an old id maps to exactly one new id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMapping {
    ids: IndexMap<EntityId, EntityId>,
}

impl IdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, old: EntityId, new: EntityId) -> Result<()> {
        if let Some(existing) = self.ids.get(&old) {
            internal_bail!("entity {old} was already mapped to {existing}, refusing to remap to {new}");
        }
        self.ids.insert(old, new);
        Ok(())
    }

    pub fn get(&self, old: EntityId) -> Option<EntityId> {
        self.ids.get(&old).copied()
    }

    /// Like [`IdMapping::get`], but a miss is the unresolved-reference error for
    /// `referring_entity`.
    pub fn resolve(&self, referring_entity: EntityId, old: EntityId) -> Result<EntityId> {
        self.get(old).ok_or(Error::UnresolvedReference {
            entity_id: referring_entity,
            referenced_id: old,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityId)> + '_ {
        self.ids.iter().map(|(old, new)| (*old, *new))
    }

    pub fn new_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ids.values().copied()
    }
}

/// Source type id to destination type id, joined on `class_name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTypeMapping {
    ids: HashMap<EntityTypeId, EntityTypeId>,
    unmatched: Vec<String>,
}

impl EntityTypeMapping {
    pub fn between(source: &[EntityType], destination: &[EntityType]) -> Self {
        let by_class: HashMap<&str, EntityTypeId> = destination
            .iter()
            .map(|t| (t.class_name.as_str(), t.id))
            .collect();
        let mut mapping = Self::default();
        for source_type in source {
            match by_class.get(source_type.class_name.as_str()) {
                Some(id) => {
                    mapping.ids.insert(source_type.id, *id);
                }
                None => mapping.unmatched.push(source_type.class_name.clone()),
            }
        }
        mapping
    }

    pub fn get(&self, source: EntityTypeId) -> Option<EntityTypeId> {
        self.ids.get(&source).copied()
    }

    /// Class names of source types that have no destination counterpart.
    pub fn unmatched(&self) -> &[String] {
        &self.unmatched
    }
}
