use crate::events::{EventSource, InstanceEvent, OutboundEvent, TypeDefEvent};
use crate::model::{
    AttributeTypeDef, Classification, EntityDetail, EnumDefPatch, InstanceAuditHeader,
    Relationship, TypeDef, TypeDefLink, TypeDefPatch,
};
use parking_lot::Mutex;

/// Sink notified after every committed change.
///
/// Only `emit` is required. The per-transition methods build the matching
/// event and forward it, so a sink that needs a different fan-out can
/// override any of them. Emission is fire-and-forget: delivery failures are
/// the sink's concern and never reach the caller of the mutation.
#[async_trait::async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, source: &EventSource, event: OutboundEvent);

    async fn new_type_def(&self, source: &EventSource, type_def: &TypeDef) {
        self.emit(source, TypeDefEvent::NewTypeDef { type_def: type_def.clone() }.into())
            .await
    }

    async fn new_attribute_type_def(&self, source: &EventSource, attribute_type_def: &AttributeTypeDef) {
        self.emit(
            source,
            TypeDefEvent::NewAttributeTypeDef {
                attribute_type_def: attribute_type_def.clone(),
            }
            .into(),
        )
        .await
    }

    async fn updated_type_def(&self, source: &EventSource, patch: &TypeDefPatch, type_def: &TypeDef) {
        self.emit(
            source,
            TypeDefEvent::UpdatedTypeDef {
                patch: patch.clone(),
                type_def: type_def.clone(),
            }
            .into(),
        )
        .await
    }

    async fn updated_attribute_type_def(
        &self,
        source: &EventSource,
        patch: &EnumDefPatch,
        attribute_type_def: &AttributeTypeDef,
    ) {
        self.emit(
            source,
            TypeDefEvent::UpdatedAttributeTypeDef {
                patch: patch.clone(),
                attribute_type_def: attribute_type_def.clone(),
            }
            .into(),
        )
        .await
    }

    async fn deleted_type_def(&self, source: &EventSource, guid: &str, name: &str) {
        self.emit(
            source,
            TypeDefEvent::DeletedTypeDef {
                guid: guid.to_string(),
                name: name.to_string(),
            }
            .into(),
        )
        .await
    }

    async fn deleted_attribute_type_def(&self, source: &EventSource, guid: &str, name: &str) {
        self.emit(
            source,
            TypeDefEvent::DeletedAttributeTypeDef {
                guid: guid.to_string(),
                name: name.to_string(),
            }
            .into(),
        )
        .await
    }

    async fn re_identified_type_def(&self, source: &EventSource, original: &TypeDefLink, type_def: &TypeDef) {
        self.emit(
            source,
            TypeDefEvent::ReIdentifiedTypeDef {
                original_guid: original.guid.clone(),
                original_name: original.name.clone(),
                type_def: type_def.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_identified_attribute_type_def(
        &self,
        source: &EventSource,
        original: &TypeDefLink,
        attribute_type_def: &AttributeTypeDef,
    ) {
        self.emit(
            source,
            TypeDefEvent::ReIdentifiedAttributeTypeDef {
                original_guid: original.guid.clone(),
                original_name: original.name.clone(),
                attribute_type_def: attribute_type_def.clone(),
            }
            .into(),
        )
        .await
    }

    async fn new_entity(&self, source: &EventSource, entity: &EntityDetail) {
        self.emit(source, InstanceEvent::NewEntity { entity: entity.clone() }.into())
            .await
    }

    async fn updated_entity(&self, source: &EventSource, old_entity: &EntityDetail, new_entity: &EntityDetail) {
        self.emit(
            source,
            InstanceEvent::UpdatedEntity {
                old_entity: old_entity.clone(),
                new_entity: new_entity.clone(),
            }
            .into(),
        )
        .await
    }

    async fn undone_entity(&self, source: &EventSource, entity: &EntityDetail) {
        self.emit(source, InstanceEvent::UndoneEntity { entity: entity.clone() }.into())
            .await
    }

    async fn classified_entity(&self, source: &EventSource, entity: &EntityDetail, classification: &Classification) {
        self.emit(
            source,
            InstanceEvent::ClassifiedEntity {
                entity: entity.clone(),
                classification: classification.clone(),
            }
            .into(),
        )
        .await
    }

    async fn declassified_entity(&self, source: &EventSource, entity: &EntityDetail, classification: &Classification) {
        self.emit(
            source,
            InstanceEvent::DeclassifiedEntity {
                entity: entity.clone(),
                classification: classification.clone(),
            }
            .into(),
        )
        .await
    }

    async fn reclassified_entity(
        &self,
        source: &EventSource,
        entity: &EntityDetail,
        old_classification: &Classification,
        new_classification: &Classification,
    ) {
        self.emit(
            source,
            InstanceEvent::ReclassifiedEntity {
                entity: entity.clone(),
                old_classification: old_classification.clone(),
                new_classification: new_classification.clone(),
            }
            .into(),
        )
        .await
    }

    async fn deleted_entity(&self, source: &EventSource, entity: &EntityDetail) {
        self.emit(source, InstanceEvent::DeletedEntity { entity: entity.clone() }.into())
            .await
    }

    async fn purged_entity(&self, source: &EventSource, type_def: &TypeDefLink, guid: &str) {
        self.emit(
            source,
            InstanceEvent::PurgedEntity {
                type_def_guid: type_def.guid.clone(),
                type_def_name: type_def.name.clone(),
                guid: guid.to_string(),
            }
            .into(),
        )
        .await
    }

    async fn restored_entity(&self, source: &EventSource, entity: &EntityDetail) {
        self.emit(source, InstanceEvent::RestoredEntity { entity: entity.clone() }.into())
            .await
    }

    async fn re_identified_entity(&self, source: &EventSource, original_guid: &str, entity: &EntityDetail) {
        self.emit(
            source,
            InstanceEvent::ReIdentifiedEntity {
                original_guid: original_guid.to_string(),
                entity: entity.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_typed_entity(&self, source: &EventSource, original_type: &TypeDefLink, entity: &EntityDetail) {
        self.emit(
            source,
            InstanceEvent::ReTypedEntity {
                original_type: original_type.clone(),
                entity: entity.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_homed_entity(&self, source: &EventSource, original_home: &str, entity: &EntityDetail) {
        self.emit(
            source,
            InstanceEvent::ReHomedEntity {
                original_home_metadata_collection_id: original_home.to_string(),
                entity: entity.clone(),
            }
            .into(),
        )
        .await
    }

    async fn refreshed_entity(&self, source: &EventSource, entity: &EntityDetail) {
        self.emit(source, InstanceEvent::RefreshedEntity { entity: entity.clone() }.into())
            .await
    }

    /// Ask the home repository to broadcast its current copy
    async fn refresh_entity_request(&self, source: &EventSource, type_def: &TypeDefLink, guid: &str, home_metadata_collection_id: &str) {
        self.emit(
            source,
            InstanceEvent::RefreshEntityRequest {
                type_def_guid: type_def.guid.clone(),
                type_def_name: type_def.name.clone(),
                guid: guid.to_string(),
                home_metadata_collection_id: home_metadata_collection_id.to_string(),
            }
            .into(),
        )
        .await
    }

    async fn new_relationship(&self, source: &EventSource, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::NewRelationship {
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn updated_relationship(&self, source: &EventSource, old_relationship: &Relationship, new_relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::UpdatedRelationship {
                old_relationship: old_relationship.clone(),
                new_relationship: new_relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn undone_relationship(&self, source: &EventSource, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::UndoneRelationship {
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn deleted_relationship(&self, source: &EventSource, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::DeletedRelationship {
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn purged_relationship(&self, source: &EventSource, relationship: &Relationship) {
        let type_def = relationship.header().instance_type.link();
        self.emit(
            source,
            InstanceEvent::PurgedRelationship {
                type_def_guid: type_def.guid,
                type_def_name: type_def.name,
                guid: relationship.guid().to_string(),
            }
            .into(),
        )
        .await
    }

    async fn restored_relationship(&self, source: &EventSource, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::RestoredRelationship {
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_identified_relationship(&self, source: &EventSource, original_guid: &str, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::ReIdentifiedRelationship {
                original_guid: original_guid.to_string(),
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_typed_relationship(&self, source: &EventSource, original_type: &TypeDefLink, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::ReTypedRelationship {
                original_type: original_type.clone(),
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn re_homed_relationship(&self, source: &EventSource, original_home: &str, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::ReHomedRelationship {
                original_home_metadata_collection_id: original_home.to_string(),
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn refreshed_relationship(&self, source: &EventSource, relationship: &Relationship) {
        self.emit(
            source,
            InstanceEvent::RefreshedRelationship {
                relationship: relationship.clone(),
            }
            .into(),
        )
        .await
    }

    async fn refresh_relationship_request(
        &self,
        source: &EventSource,
        type_def: &TypeDefLink,
        guid: &str,
        home_metadata_collection_id: &str,
    ) {
        self.emit(
            source,
            InstanceEvent::RefreshRelationshipRequest {
                type_def_guid: type_def.guid.clone(),
                type_def_name: type_def.name.clone(),
                guid: guid.to_string(),
                home_metadata_collection_id: home_metadata_collection_id.to_string(),
            }
            .into(),
        )
        .await
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventEmitter;

#[async_trait::async_trait]
impl EventEmitter for NoopEventEmitter {
    async fn emit(&self, _source: &EventSource, _event: OutboundEvent) {}
}

/// Writes every event as a JSON line on the `omrs::events` log target
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventEmitter;

#[async_trait::async_trait]
impl EventEmitter for LoggingEventEmitter {
    async fn emit(&self, source: &EventSource, event: OutboundEvent) {
        let line = serde_json::json!({ "source": source, "event": event });
        match serde_json::to_string(&line) {
            Ok(json) => log::info!(target: "omrs::events", "{}", json),
            Err(e) => log::warn!(target: "omrs::events", "Could not serialize event: {}", e),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventEmitter {
    events: Mutex<Vec<(EventSource, OutboundEvent)>>,
}

impl RecordingEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn sources(&self) -> Vec<EventSource> {
        self.events
            .lock()
            .iter()
            .map(|(source, _)| source.clone())
            .collect()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .drain(..)
            .map(|(_, event)| event)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl EventEmitter for RecordingEventEmitter {
    async fn emit(&self, source: &EventSource, event: OutboundEvent) {
        self.events.lock().push((source.clone(), event));
    }
}
