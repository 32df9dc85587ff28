use crate::prelude::*;

use indexmap::IndexMap;

use super::entity::{Entity, EntityId};

/// A fetched entity subtree, stored as an arena keyed by id plus parent links.
///
/// Child order is the order in which the server listed the children.
#[derive(Debug, Clone)]
pub struct EntityTree {
    root: EntityId,
    nodes: IndexMap<EntityId, Entity>,
    parents: IndexMap<EntityId, Option<EntityId>>,
    children: HashMap<EntityId, Vec<EntityId>>,
}

/// Nested form of a tree, as written to stash files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedEntity {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(default)]
    pub children: Vec<NestedEntity>,
    #[serde(default)]
    pub size: usize,
}

impl EntityTree {
    pub fn new(root: Entity) -> Self {
        let root_id = root.id;
        let mut nodes = IndexMap::new();
        nodes.insert(root_id, root);
        let mut parents = IndexMap::new();
        parents.insert(root_id, None);
        Self {
            root: root_id,
            nodes,
            parents,
            children: HashMap::new(),
        }
    }

    /// Appends `child` as the last child of `parent`.
    pub fn attach(&mut self, parent: EntityId, child: Entity) -> Result<()> {
        if !self.nodes.contains_key(&parent) {
            internal_bail!("cannot attach entity {} under unknown parent {}", child.id, parent);
        }
        if self.nodes.contains_key(&child.id) {
            internal_bail!("entity {} appears twice in the tree", child.id);
        }
        let child_id = child.id;
        self.nodes.insert(child_id, child);
        self.parents.insert(child_id, Some(parent));
        self.children.entry(parent).or_default().push(child_id);
        Ok(())
    }

    pub fn root(&self) -> &Entity {
        &self.nodes[&self.root]
    }

    pub fn root_id(&self) -> EntityId {
        self.root
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.nodes.get(&id)
    }

    /// `None` for the root and for ids outside the tree.
    pub fn parent_of(&self, id: EntityId) -> Option<EntityId> {
        self.parents.get(&id).copied().flatten()
    }

    pub fn children_of(&self, id: EntityId) -> &[EntityId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes in the subtree rooted at `id`, `id` included.
    pub fn size(&self, id: EntityId) -> usize {
        if !self.nodes.contains_key(&id) {
            return 0;
        }
        1 + self
            .children_of(id)
            .iter()
            .map(|child| self.size(*child))
            .sum::<usize>()
    }

    /// Ids of the subtree rooted at `from`, parents before children,
    /// siblings in listing order.
    pub fn pre_order(&self, from: EntityId) -> Vec<EntityId> {
        let mut order = Vec::with_capacity(self.size(from));
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if !self.nodes.contains_key(&id) {
                continue;
            }
            order.push(id);
            stack.extend(self.children_of(id).iter().rev().copied());
        }
        order
    }

    pub fn to_nested(&self) -> NestedEntity {
        self.nested_at(self.root)
    }

    fn nested_at(&self, id: EntityId) -> NestedEntity {
        NestedEntity {
            entity: self.nodes[&id].clone(),
            children: self
                .children_of(id)
                .iter()
                .map(|child| self.nested_at(*child))
                .collect(),
            size: self.size(id),
        }
    }

    pub fn from_nested(nested: NestedEntity) -> Result<Self> {
        let NestedEntity {
            entity, children, ..
        } = nested;
        let mut tree = Self::new(entity);
        let mut pending: Vec<(EntityId, Vec<NestedEntity>)> = vec![(tree.root, children)];
        while let Some((parent, children)) = pending.pop() {
            for child in children {
                let NestedEntity {
                    entity, children, ..
                } = child;
                let child_id = entity.id;
                tree.attach(parent, entity)?;
                if !children.is_empty() {
                    pending.push((child_id, children));
                }
            }
        }
        Ok(tree)
    }
}
