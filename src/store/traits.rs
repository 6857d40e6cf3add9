use crate::model::{
    AttributeTypeDef, Classification, EntityDetail, EntityPropertyQuery, EntityProxy,
    EntitySummary, Guid, InstanceProperties, InstanceStatus, InstanceType, NewEntity,
    NewRelationship, Relationship, RelationshipPropertyQuery, RelationshipQuery, TypeDef,
    TypeDefGallery, UserContext,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures reported by a storage engine.
///
/// These never leave the metadata collection; they are mapped onto the
/// repository error taxonomy at the call site.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity {guid} not found")]
    EntityNotKnown { guid: Guid },

    #[error("relationship {guid} not found")]
    RelationshipNotKnown { guid: Guid },

    #[error("type {guid} not found")]
    TypeNotKnown { guid: Guid },

    #[error("entity {guid} is only stored as a proxy")]
    EntityProxyOnly { guid: Guid },

    #[error("user {user_id} is not authorized")]
    NotAuthorized { user_id: String },

    #[error("{function} is not supported")]
    FunctionNotSupported { function: String },

    #[error("instance {guid} is not deleted")]
    NotDeleted { guid: Guid },

    #[error("instance {guid} has no prior version")]
    NoPriorVersion { guid: Guid },

    #[error("guid {guid} is already in use")]
    GuidInUse { guid: Guid },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait::async_trait]
pub trait TypeDefStore: Send + Sync {
    async fn get_all_types(&self, user: &UserContext) -> StoreResult<TypeDefGallery>;
    async fn add_type_def(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<()>;
    async fn add_attribute_type_def(&self, user: &UserContext, attribute_type_def: &AttributeTypeDef) -> StoreResult<()>;
    /// Replace the stored definition with an already patched one
    async fn update_type_def(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<()>;
    async fn update_attribute_type_def(&self, user: &UserContext, attribute_type_def: &AttributeTypeDef) -> StoreResult<()>;
    async fn delete_type_def(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
    async fn delete_attribute_type_def(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
    async fn re_identify_type_def(&self, user: &UserContext, original_guid: &str, type_def: &TypeDef) -> StoreResult<()>;
    async fn re_identify_attribute_type_def(
        &self,
        user: &UserContext,
        original_guid: &str,
        attribute_type_def: &AttributeTypeDef,
    ) -> StoreResult<()>;
    /// Number of stored instances (or classifications) of the given type
    async fn count_instances_of_type(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<usize>;
}

#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Works for both full entities and proxies
    async fn get_entity_summary(&self, user: &UserContext, guid: &str) -> StoreResult<EntitySummary>;
    async fn get_entity_detail(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail>;
    async fn get_entity_detail_as_of(&self, user: &UserContext, guid: &str, as_of_time: DateTime<Utc>) -> StoreResult<EntityDetail>;
    /// Works for both full entities and proxies
    async fn get_entity_proxy(&self, user: &UserContext, guid: &str) -> StoreResult<EntityProxy>;
    async fn get_relationships_for_entity(
        &self,
        user: &UserContext,
        entity_guid: &str,
        query: &RelationshipQuery,
    ) -> StoreResult<Vec<Relationship>>;
    async fn find_entities_by_property(&self, user: &UserContext, query: &EntityPropertyQuery) -> StoreResult<Vec<EntityDetail>>;
    async fn find_entities_by_property_value(
        &self,
        user: &UserContext,
        search_criteria: &str,
        query: &EntityPropertyQuery,
    ) -> StoreResult<Vec<EntityDetail>>;
    /// `query.match_properties` applies to the classification's properties
    async fn find_entities_by_classification(
        &self,
        user: &UserContext,
        classification_name: &str,
        query: &EntityPropertyQuery,
    ) -> StoreResult<Vec<EntityDetail>>;

    async fn add_entity(&self, user: &UserContext, entity: NewEntity) -> StoreResult<EntityDetail>;
    async fn add_entity_proxy(&self, user: &UserContext, proxy: EntityProxy) -> StoreResult<()>;
    async fn update_entity_status(&self, user: &UserContext, guid: &str, status: InstanceStatus) -> StoreResult<EntityDetail>;
    async fn update_entity_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> StoreResult<EntityDetail>;
    async fn undo_entity_update(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail>;
    /// Soft delete; engines without soft-delete return `FunctionNotSupported`
    async fn delete_entity(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail>;
    async fn purge_entity(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
    async fn restore_entity(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail>;
    async fn classify_entity(&self, user: &UserContext, guid: &str, classification: Classification) -> StoreResult<EntityDetail>;
    async fn declassify_entity(&self, user: &UserContext, guid: &str, classification_name: &str) -> StoreResult<EntityDetail>;
    async fn update_entity_classification(
        &self,
        user: &UserContext,
        guid: &str,
        classification_name: &str,
        properties: InstanceProperties,
    ) -> StoreResult<EntityDetail>;
    async fn re_identify_entity(&self, user: &UserContext, guid: &str, new_guid: &str) -> StoreResult<EntityDetail>;
    async fn re_type_entity(&self, user: &UserContext, guid: &str, new_type: InstanceType) -> StoreResult<EntityDetail>;
    async fn re_home_entity(
        &self,
        user: &UserContext,
        guid: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> StoreResult<EntityDetail>;
    async fn save_entity_reference_copy(&self, user: &UserContext, entity: EntityDetail) -> StoreResult<()>;
    async fn purge_entity_reference_copy(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn get_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship>;
    async fn get_relationship_as_of(&self, user: &UserContext, guid: &str, as_of_time: DateTime<Utc>) -> StoreResult<Relationship>;
    async fn find_relationships_by_property(
        &self,
        user: &UserContext,
        query: &RelationshipPropertyQuery,
    ) -> StoreResult<Vec<Relationship>>;

    /// Ends must resolve to stored entities or proxies
    async fn add_relationship(&self, user: &UserContext, relationship: NewRelationship) -> StoreResult<Relationship>;
    async fn update_relationship_status(&self, user: &UserContext, guid: &str, status: InstanceStatus) -> StoreResult<Relationship>;
    async fn update_relationship_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> StoreResult<Relationship>;
    async fn undo_relationship_update(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship>;
    async fn delete_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship>;
    async fn purge_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
    async fn restore_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship>;
    async fn re_identify_relationship(&self, user: &UserContext, guid: &str, new_guid: &str) -> StoreResult<Relationship>;
    async fn re_type_relationship(&self, user: &UserContext, guid: &str, new_type: InstanceType) -> StoreResult<Relationship>;
    async fn re_home_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> StoreResult<Relationship>;
    async fn save_relationship_reference_copy(&self, user: &UserContext, relationship: Relationship) -> StoreResult<()>;
    async fn purge_relationship_reference_copy(&self, user: &UserContext, guid: &str) -> StoreResult<()>;
}

pub trait MetadataStore: TypeDefStore + EntityStore + RelationshipStore + Send + Sync {
    /// Whether delete keeps the instance in a Deleted state until purged
    fn supports_soft_delete(&self) -> bool {
        true
    }
}
