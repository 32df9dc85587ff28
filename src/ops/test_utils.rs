use crate::prelude::*;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Mutex;

use crate::base::entity::{
    Entity, EntityId, EntityType, EntityTypeId, FILENAME_PROPERTY, NewEntity, Properties,
};
use crate::ops::prompt::{Confirmation, Prompter};
use crate::repository::EntityApi;

const FILE_HOST: &str = "https://files.test/";

#[derive(Default)]
struct State {
    types: Vec<EntityType>,
    entities: IndexMap<EntityId, Entity>,
    parents: HashMap<EntityId, EntityId>,
    children: HashMap<EntityId, Vec<EntityId>>,
    next_id: i64,
    files: HashMap<String, Bytes>,
    parametrizations: HashMap<EntityTypeId, Value>,
    parametrization_calls: usize,
    revisions: HashMap<EntityId, Vec<Value>>,
    record_fields: HashMap<EntityId, Properties>,
    updates: Vec<(EntityId, String)>,
    deleted: Vec<EntityId>,
    writes: usize,
    transfers: usize,
}

/// A workspace held in memory. Files are stored under their key and handed
/// out as `https://files.test/<key>`.
pub struct InMemoryWorkspace {
    state: Mutex<State>,
}

impl InMemoryWorkspace {
    pub fn new(types: &[(i64, &str)]) -> Self {
        let state = State {
            types: types
                .iter()
                .map(|(id, class_name)| EntityType {
                    id: EntityTypeId(*id),
                    class_name: class_name.to_string(),
                })
                .collect(),
            next_id: 10_000,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Ids handed to created entities count up from `next_id`.
    pub fn with_next_id(self, next_id: i64) -> Self {
        self.state.lock().unwrap().next_id = next_id;
        self
    }

    pub fn add_root(&self, id: i64, name: &str, entity_type: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .entities
            .insert(EntityId(id), entity(id, name, entity_type, Properties::new()));
    }

    pub fn add_child(&self, parent: i64, id: i64, name: &str, entity_type: i64, properties: Value) {
        let properties = properties.as_object().cloned().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        state
            .entities
            .insert(EntityId(id), entity(id, name, entity_type, properties));
        state.parents.insert(EntityId(id), EntityId(parent));
        state
            .children
            .entry(EntityId(parent))
            .or_default()
            .push(EntityId(id));
    }

    pub fn add_file(&self, key: &str, content: &'static [u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(key.to_string(), Bytes::from_static(content));
    }

    pub fn set_parametrization(&self, entity_type: i64, parametrization: Value) {
        self.state
            .lock()
            .unwrap()
            .parametrizations
            .insert(EntityTypeId(entity_type), parametrization);
    }

    pub fn set_revisions(&self, id: i64, revisions: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .revisions
            .insert(EntityId(id), revisions);
    }

    /// Extra fields the listing endpoint reports for `id`, beyond the modelled ones.
    pub fn set_record_fields(&self, id: i64, fields: Value) {
        self.state
            .lock()
            .unwrap()
            .record_fields
            .insert(EntityId(id), fields.as_object().cloned().unwrap_or_default());
    }

    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.state.lock().unwrap().entities.get(&id).cloned()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn children_of(&self, id: EntityId) -> Vec<Entity> {
        let state = self.state.lock().unwrap();
        state
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| state.entities.get(child).cloned())
            .collect()
    }

    pub fn child_names(&self, id: EntityId) -> Vec<String> {
        self.children_of(id).into_iter().map(|e| e.name).collect()
    }

    pub fn file(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().files.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn transfers(&self) -> usize {
        self.state.lock().unwrap().transfers
    }

    pub fn deleted(&self) -> Vec<EntityId> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn updates(&self) -> Vec<(EntityId, String)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn parametrization_calls(&self) -> usize {
        self.state.lock().unwrap().parametrization_calls
    }
}

fn entity(id: i64, name: &str, entity_type: i64, properties: Properties) -> Entity {
    Entity {
        id: EntityId(id),
        name: name.to_string(),
        entity_type: EntityTypeId(entity_type),
        properties,
        parent_entity_type: None,
    }
}

fn not_found(id: EntityId) -> Error {
    Error::Http {
        status: reqwest::StatusCode::NOT_FOUND,
        url: format!("memory://entities/{id}/"),
        body: String::new(),
    }
}

impl State {
    fn with_download_url(&self, mut entity: Entity) -> Entity {
        if let Some(key) = entity.filename() {
            let url = format!("{FILE_HOST}{key}");
            entity
                .properties
                .insert(FILENAME_PROPERTY.to_string(), Value::String(url));
        }
        entity
    }
}

#[async_trait]
impl EntityApi for InMemoryWorkspace {
    fn label(&self) -> String {
        "memory workspace".to_string()
    }

    async fn entity_types(&self) -> Result<Vec<EntityType>> {
        Ok(self.state.lock().unwrap().types.clone())
    }

    async fn root_entities(&self) -> Result<Vec<Entity>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .values()
            .filter(|e| !state.parents.contains_key(&e.id))
            .cloned()
            .collect())
    }

    async fn entities_of_type(&self, entity_type: EntityTypeId) -> Result<Vec<Entity>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn entity_records(&self, entity_type: EntityTypeId) -> Result<Vec<Value>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| {
                let mut record = Properties::new();
                record.insert("id".to_string(), e.id.0.into());
                record.insert("name".to_string(), e.name.clone().into());
                record.insert("entity_type".to_string(), e.entity_type.0.into());
                record.insert("properties".to_string(), Value::Object(e.properties.clone()));
                if let Some(fields) = state.record_fields.get(&e.id) {
                    record.extend(fields.clone());
                }
                Value::Object(record)
            })
            .collect())
    }

    async fn entity(&self, id: EntityId) -> Result<Entity> {
        let state = self.state.lock().unwrap();
        let mut entity = state.entities.get(&id).cloned().ok_or_else(|| not_found(id))?;
        entity.parent_entity_type = state
            .parents
            .get(&id)
            .and_then(|parent| state.entities.get(parent))
            .map(|parent| parent.entity_type);
        Ok(state.with_download_url(entity))
    }

    async fn stored_entity(&self, id: EntityId) -> Result<Entity> {
        self.get(id).ok_or_else(|| not_found(id))
    }

    async fn children(&self, parent: EntityId) -> Result<Vec<Entity>> {
        let listed = self.children_of(parent);
        let state = self.state.lock().unwrap();
        Ok(listed
            .into_iter()
            .map(|child| state.with_download_url(child))
            .collect())
    }

    async fn entity_revisions(&self, id: EntityId) -> Result<Vec<Value>> {
        let state = self.state.lock().unwrap();
        Ok(state.revisions.get(&id).cloned().unwrap_or_default())
    }

    async fn parametrization(&self, id: EntityId) -> Result<Option<Value>> {
        let mut state = self.state.lock().unwrap();
        state.parametrization_calls += 1;
        let entity_type = state
            .entities
            .get(&id)
            .map(|e| e.entity_type)
            .ok_or_else(|| not_found(id))?;
        Ok(state.parametrizations.get(&entity_type).cloned())
    }

    async fn create_child(
        &self,
        parent: EntityId,
        new: NewEntity,
        file: Option<Bytes>,
    ) -> Result<Entity> {
        let mut state = self.state.lock().unwrap();
        if !state.entities.contains_key(&parent) {
            return Err(not_found(parent));
        }
        if !state.types.iter().any(|t| t.id == new.entity_type) {
            client_bail!("unknown entity type {}", new.entity_type);
        }
        let id = EntityId(state.next_id);
        state.next_id += 1;
        let mut properties = new.properties;
        if let Some(file) = file {
            let key = format!("uploads/{id}");
            state.files.insert(key.clone(), file);
            state.transfers += 1;
            properties.insert(FILENAME_PROPERTY.to_string(), Value::String(key));
        }
        let created = Entity {
            id,
            name: new.name,
            entity_type: new.entity_type,
            properties,
            parent_entity_type: None,
        };
        state.entities.insert(id, created.clone());
        state.parents.insert(id, parent);
        state.children.entry(parent).or_default().push(id);
        state.writes += 1;
        Ok(created)
    }

    async fn update_entity(
        &self,
        id: EntityId,
        properties: Properties,
        message: &str,
    ) -> Result<Entity> {
        let mut state = self.state.lock().unwrap();
        let entity = state.entities.get_mut(&id).ok_or_else(|| not_found(id))?;
        entity.properties = properties;
        let updated = entity.clone();
        state.updates.push((id, message.to_string()));
        state.writes += 1;
        Ok(updated)
    }

    async fn delete_entity(&self, id: EntityId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.children.get(&id).is_some_and(|c| !c.is_empty()) {
            client_bail!("entity {id} still has children");
        }
        state.entities.shift_remove(&id).ok_or_else(|| not_found(id))?;
        if let Some(parent) = state.parents.remove(&id) {
            if let Some(siblings) = state.children.get_mut(&parent) {
                siblings.retain(|s| *s != id);
            }
        }
        state.deleted.push(id);
        state.writes += 1;
        Ok(())
    }

    async fn fetch_file(&self, url: &str) -> Result<Bytes> {
        let mut state = self.state.lock().unwrap();
        state.transfers += 1;
        url.strip_prefix(FILE_HOST)
            .and_then(|key| state.files.get(key).cloned())
            .ok_or_else(|| Error::Http {
                status: reqwest::StatusCode::FORBIDDEN,
                url: url.to_string(),
                body: "expired".to_string(),
            })
    }
}

/// Gives fixed answers and remembers what it was asked.
pub struct ScriptedPrompter {
    answer: bool,
    parent: Option<EntityId>,
    asked: Mutex<Vec<Confirmation>>,
}

impl ScriptedPrompter {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            parent: None,
            asked: Mutex::new(vec![]),
        }
    }

    pub fn choosing(parent: i64) -> Self {
        Self {
            answer: true,
            parent: Some(EntityId(parent)),
            asked: Mutex::new(vec![]),
        }
    }

    pub fn asked(&self) -> Vec<Confirmation> {
        self.asked.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, request: &Confirmation) -> Result<bool> {
        self.asked.lock().unwrap().push(request.clone());
        Ok(self.answer)
    }

    fn choose_parent(&self, _candidates: &[Entity]) -> Result<EntityId> {
        self.parent
            .ok_or_else(|| internal_error!("no parent choice scripted"))
    }
}
