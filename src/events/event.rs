use crate::model::{
    AttributeTypeDef, Classification, CollectionIdentity, EntityDetail, EnumDefPatch, Guid,
    Relationship, TypeDef, TypeDefLink, TypeDefPatch,
};
use serde::{Deserialize, Serialize};

/// Identity of the repository an event originates from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub repository_name: String,
    pub metadata_collection_id: Guid,
    pub server_name: String,
    pub server_type: String,
    pub organization_name: String,
}

impl From<&CollectionIdentity> for EventSource {
    fn from(identity: &CollectionIdentity) -> Self {
        Self {
            repository_name: identity.repository_name.clone(),
            metadata_collection_id: identity.metadata_collection_id.clone(),
            server_name: identity.server_name.clone(),
            server_type: identity.server_type.clone(),
            organization_name: identity.organization_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeDefEvent {
    NewTypeDef {
        type_def: TypeDef,
    },
    NewAttributeTypeDef {
        attribute_type_def: AttributeTypeDef,
    },
    UpdatedTypeDef {
        patch: TypeDefPatch,
        type_def: TypeDef,
    },
    UpdatedAttributeTypeDef {
        patch: EnumDefPatch,
        attribute_type_def: AttributeTypeDef,
    },
    DeletedTypeDef {
        guid: Guid,
        name: String,
    },
    DeletedAttributeTypeDef {
        guid: Guid,
        name: String,
    },
    ReIdentifiedTypeDef {
        original_guid: Guid,
        original_name: String,
        type_def: TypeDef,
    },
    ReIdentifiedAttributeTypeDef {
        original_guid: Guid,
        original_name: String,
        attribute_type_def: AttributeTypeDef,
    },
}

/// Instance transitions broadcast to the cohort. Updates carry both the
/// previous and the new state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceEvent {
    NewEntity {
        entity: EntityDetail,
    },
    UpdatedEntity {
        old_entity: EntityDetail,
        new_entity: EntityDetail,
    },
    UndoneEntity {
        entity: EntityDetail,
    },
    ClassifiedEntity {
        entity: EntityDetail,
        classification: Classification,
    },
    DeclassifiedEntity {
        entity: EntityDetail,
        classification: Classification,
    },
    ReclassifiedEntity {
        entity: EntityDetail,
        old_classification: Classification,
        new_classification: Classification,
    },
    DeletedEntity {
        entity: EntityDetail,
    },
    PurgedEntity {
        type_def_guid: Guid,
        type_def_name: String,
        guid: Guid,
    },
    RestoredEntity {
        entity: EntityDetail,
    },
    ReIdentifiedEntity {
        original_guid: Guid,
        entity: EntityDetail,
    },
    ReTypedEntity {
        original_type: TypeDefLink,
        entity: EntityDetail,
    },
    ReHomedEntity {
        original_home_metadata_collection_id: Guid,
        entity: EntityDetail,
    },
    RefreshedEntity {
        entity: EntityDetail,
    },
    RefreshEntityRequest {
        type_def_guid: Guid,
        type_def_name: String,
        guid: Guid,
        home_metadata_collection_id: Guid,
    },
    NewRelationship {
        relationship: Relationship,
    },
    UpdatedRelationship {
        old_relationship: Relationship,
        new_relationship: Relationship,
    },
    UndoneRelationship {
        relationship: Relationship,
    },
    DeletedRelationship {
        relationship: Relationship,
    },
    PurgedRelationship {
        type_def_guid: Guid,
        type_def_name: String,
        guid: Guid,
    },
    RestoredRelationship {
        relationship: Relationship,
    },
    ReIdentifiedRelationship {
        original_guid: Guid,
        relationship: Relationship,
    },
    ReTypedRelationship {
        original_type: TypeDefLink,
        relationship: Relationship,
    },
    ReHomedRelationship {
        original_home_metadata_collection_id: Guid,
        relationship: Relationship,
    },
    RefreshedRelationship {
        relationship: Relationship,
    },
    RefreshRelationshipRequest {
        type_def_guid: Guid,
        type_def_name: String,
        guid: Guid,
        home_metadata_collection_id: Guid,
    },
}

impl InstanceEvent {
    /// GUID of the instance the event is about
    pub fn instance_guid(&self) -> &str {
        match self {
            InstanceEvent::NewEntity { entity }
            | InstanceEvent::UndoneEntity { entity }
            | InstanceEvent::ClassifiedEntity { entity, .. }
            | InstanceEvent::DeclassifiedEntity { entity, .. }
            | InstanceEvent::ReclassifiedEntity { entity, .. }
            | InstanceEvent::DeletedEntity { entity }
            | InstanceEvent::RestoredEntity { entity }
            | InstanceEvent::ReIdentifiedEntity { entity, .. }
            | InstanceEvent::ReTypedEntity { entity, .. }
            | InstanceEvent::ReHomedEntity { entity, .. }
            | InstanceEvent::RefreshedEntity { entity } => &entity.header.guid,
            InstanceEvent::UpdatedEntity { new_entity, .. } => &new_entity.header.guid,
            InstanceEvent::NewRelationship { relationship }
            | InstanceEvent::UndoneRelationship { relationship }
            | InstanceEvent::DeletedRelationship { relationship }
            | InstanceEvent::RestoredRelationship { relationship }
            | InstanceEvent::ReIdentifiedRelationship { relationship, .. }
            | InstanceEvent::ReTypedRelationship { relationship, .. }
            | InstanceEvent::ReHomedRelationship { relationship, .. }
            | InstanceEvent::RefreshedRelationship { relationship } => &relationship.header.guid,
            InstanceEvent::UpdatedRelationship { new_relationship, .. } => &new_relationship.header.guid,
            InstanceEvent::PurgedEntity { guid, .. }
            | InstanceEvent::RefreshEntityRequest { guid, .. }
            | InstanceEvent::PurgedRelationship { guid, .. }
            | InstanceEvent::RefreshRelationshipRequest { guid, .. } => guid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    TypeDef(TypeDefEvent),
    Instance(InstanceEvent),
}

impl From<TypeDefEvent> for OutboundEvent {
    fn from(event: TypeDefEvent) -> Self {
        OutboundEvent::TypeDef(event)
    }
}

impl From<InstanceEvent> for OutboundEvent {
    fn from(event: InstanceEvent) -> Self {
        OutboundEvent::Instance(event)
    }
}
