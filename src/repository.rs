//! Entity reads and writes against one workspace.

use crate::prelude::*;

use bytes::Bytes;
use serde_json::{Value, json};

use crate::base::entity::{
    Entity, EntityId, EntityType, EntityTypeId, FILENAME_PROPERTY, NewEntity, Properties,
};
use crate::base::tree::EntityTree;
use crate::client::{Scope, Session, WorkspaceId};

#[async_trait]
pub trait EntityApi: Send + Sync {
    /// Human-readable location, for prompts and logs.
    fn label(&self) -> String;

    async fn entity_types(&self) -> Result<Vec<EntityType>>;

    async fn root_entities(&self) -> Result<Vec<Entity>>;

    async fn entities_of_type(&self, entity_type: EntityTypeId) -> Result<Vec<Entity>>;

    /// Same listing as [`EntityApi::entities_of_type`], records exactly as the
    /// server sent them.
    async fn entity_records(&self, entity_type: EntityTypeId) -> Result<Vec<Value>>;

    /// With `parent_entity_type` filled in and `filename` replaced by a
    /// temporary download url.
    async fn entity(&self, id: EntityId) -> Result<Entity>;

    /// As stored: no parent lookup, no download url.
    async fn stored_entity(&self, id: EntityId) -> Result<Entity>;

    /// Direct children in listing order, `filename` replaced as in
    /// [`EntityApi::entity`].
    async fn children(&self, parent: EntityId) -> Result<Vec<Entity>>;

    async fn entity_revisions(&self, id: EntityId) -> Result<Vec<Value>>;

    async fn parametrization(&self, id: EntityId) -> Result<Option<Value>>;

    /// Uploads `file` first when given; `filename` then holds the storage key.
    async fn create_child(
        &self,
        parent: EntityId,
        entity: NewEntity,
        file: Option<Bytes>,
    ) -> Result<Entity>;

    /// Saves `properties` as a new revision.
    async fn update_entity(
        &self,
        id: EntityId,
        properties: Properties,
        message: &str,
    ) -> Result<Entity>;

    async fn delete_entity(&self, id: EntityId) -> Result<()>;

    async fn fetch_file(&self, url: &str) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct ParentRef {
    entity_type: EntityTypeId,
}

#[derive(Debug, Deserialize)]
struct DownloadRef {
    temporary_download_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadSlot {
    url: String,
    fields: serde_json::Map<String, Value>,
}

/// [`EntityApi`] over one workspace of a logged-in [`Session`].
pub struct RemoteWorkspace {
    session: Arc<Session>,
    workspace: WorkspaceId,
}

impl RemoteWorkspace {
    pub fn new(session: Arc<Session>, workspace: WorkspaceId) -> Self {
        Self { session, workspace }
    }

    fn scope(&self) -> Scope {
        Scope::Workspace(self.workspace)
    }

    async fn with_download_url(&self, mut entity: Entity) -> Result<Entity> {
        if entity.filename().is_none() {
            return Ok(entity);
        }
        let download: DownloadRef = self
            .session
            .get(&format!("/entities/{}/download/", entity.id), self.scope())
            .await
            .with_context(|| format!("resolving the file of entity {}", entity.id))?;
        entity.properties.insert(
            FILENAME_PROPERTY.to_string(),
            Value::String(download.temporary_download_url),
        );
        Ok(entity)
    }

    fn expect_entity(&self, response: Option<Value>, what: &str) -> Result<Entity> {
        let value = response.ok_or_else(|| internal_error!("empty response while {what}"))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl EntityApi for RemoteWorkspace {
    fn label(&self) -> String {
        format!("{} workspace {}", self.session.domain(), self.workspace)
    }

    async fn entity_types(&self) -> Result<Vec<EntityType>> {
        self.session.get_list("/entity_types/", self.scope()).await
    }

    async fn root_entities(&self) -> Result<Vec<Entity>> {
        self.session.get_list("/entities/", self.scope()).await
    }

    async fn entities_of_type(&self, entity_type: EntityTypeId) -> Result<Vec<Entity>> {
        self.session
            .get_list(
                &format!("/entity_types/{entity_type}/entities/"),
                self.scope(),
            )
            .await
    }

    async fn entity_records(&self, entity_type: EntityTypeId) -> Result<Vec<Value>> {
        self.session
            .get_list(
                &format!("/entity_types/{entity_type}/entities/"),
                self.scope(),
            )
            .await
    }

    async fn entity(&self, id: EntityId) -> Result<Entity> {
        let parents: Vec<ParentRef> = self
            .session
            .get_list(&format!("/entities/{id}/parents/"), self.scope())
            .await?;
        let mut entity = self.stored_entity(id).await?;
        entity.parent_entity_type = parents.first().map(|p| p.entity_type);
        self.with_download_url(entity).await
    }

    async fn stored_entity(&self, id: EntityId) -> Result<Entity> {
        self.session
            .get(&format!("/entities/{id}/"), self.scope())
            .await
    }

    async fn children(&self, parent: EntityId) -> Result<Vec<Entity>> {
        let listed: Vec<Entity> = self
            .session
            .get_list(&format!("/entities/{parent}/entities/"), self.scope())
            .await?;
        let mut children = Vec::with_capacity(listed.len());
        for child in listed {
            children.push(self.with_download_url(child).await?);
        }
        Ok(children)
    }

    async fn entity_revisions(&self, id: EntityId) -> Result<Vec<Value>> {
        self.session
            .get_list(&format!("/entities/{id}/revisions/"), self.scope())
            .await
    }

    async fn parametrization(&self, id: EntityId) -> Result<Option<Value>> {
        self.session
            .post(
                &format!("/entities/{id}/parametrization/"),
                &json!({}),
                self.scope(),
            )
            .await
    }

    async fn create_child(
        &self,
        parent: EntityId,
        mut entity: NewEntity,
        file: Option<Bytes>,
    ) -> Result<Entity> {
        if let Some(file) = file {
            let slot = self
                .session
                .post(
                    &format!("/entity_types/{}/upload/", entity.entity_type),
                    &json!({}),
                    self.scope(),
                )
                .await?
                .ok_or_else(|| internal_error!("empty upload slot for {}", entity.name))?;
            let slot: UploadSlot = serde_json::from_value(slot)?;
            let key = slot
                .fields
                .get("key")
                .cloned()
                .ok_or_else(|| internal_error!("upload slot for {} has no storage key", entity.name))?;
            self.session.upload(&slot.url, slot.fields, file).await?;
            entity.properties.insert(FILENAME_PROPERTY.to_string(), key);
        }
        let response = self
            .session
            .post(
                &format!("/entities/{parent}/entities/"),
                &serde_json::to_value(&entity)?,
                self.scope(),
            )
            .await?;
        self.expect_entity(response, "creating an entity")
    }

    async fn update_entity(
        &self,
        id: EntityId,
        properties: Properties,
        message: &str,
    ) -> Result<Entity> {
        let response = self
            .session
            .put(
                &format!("/entities/{id}/"),
                &json!({"message": message, "properties": properties}),
                self.scope(),
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn delete_entity(&self, id: EntityId) -> Result<()> {
        self.session
            .delete(&format!("/entities/{id}/"), self.scope())
            .await
    }

    async fn fetch_file(&self, url: &str) -> Result<Bytes> {
        self.session.download(url).await
    }
}

/// Reads the subtree rooted at `id`. Without `recursive`, only the root.
pub async fn fetch_tree(api: &dyn EntityApi, id: EntityId, recursive: bool) -> Result<EntityTree> {
    let root = api
        .entity(id)
        .await
        .with_context(|| format!("reading entity {id} from {}", api.label()))?;
    let mut tree = EntityTree::new(root);
    if !recursive {
        return Ok(tree);
    }
    let mut pending = vec![id];
    while let Some(parent) = pending.pop() {
        let children = api.children(parent).await?;
        // reversed so the first listed child is expanded first
        for child in children.iter().rev() {
            pending.push(child.id);
        }
        for child in children {
            tree.attach(parent, child)?;
        }
    }
    debug!("Fetched {} entities under {id}", tree.len());
    Ok(tree)
}

/// Deletes every descendant of `id`, each after its own descendants.
/// `id` itself stays. Returns the number deleted.
pub async fn delete_children(api: &dyn EntityApi, id: EntityId) -> Result<usize> {
    let tree = fetch_tree(api, id, true).await?;
    let doomed: Vec<EntityId> = tree.pre_order(id).into_iter().skip(1).rev().collect();
    for child in &doomed {
        api.delete_entity(*child)
            .await
            .with_context(|| format!("deleting entity {child}"))?;
    }
    Ok(doomed.len())
}
