use crate::error::{OmrsError, OmrsResult};
use crate::events::{EventEmitter, EventSource, NoopEventEmitter};
use crate::logic::error_handler::{RepositoryErrorHandler, StoreResultExt};
use crate::logic::validator::RepositoryValidator;
use crate::model::{
    AttributeTypeDef, AttributeTypeDefCategory, Classification, CollectionIdentity, EntityDetail,
    EntityPropertyQuery, EntityProxy, EntitySummary, EnumDefPatch, InstanceAuditHeader,
    InstanceHeader, InstanceProperties, InstanceProvenanceType, InstanceStatus, NewEntity,
    NewRelationship, Relationship, RelationshipPropertyQuery, RelationshipQuery, TypeDef,
    TypeDefCategory, TypeDefGallery, TypeDefLink, TypeDefPatch, UserContext,
};
use crate::store::{MetadataStore, StoreError, TypeRegistry};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of a delete request
#[derive(Debug, Clone, PartialEq)]
pub enum Removal<T> {
    /// Status moved to DELETED; the instance can be restored
    SoftDeleted(T),
    /// The storage engine has no soft delete so the instance was purged
    Purged(T),
}

impl<T> Removal<T> {
    pub fn instance(&self) -> &T {
        match self {
            Removal::SoftDeleted(instance) | Removal::Purged(instance) => instance,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Removal::SoftDeleted(instance) | Removal::Purged(instance) => instance,
        }
    }

    pub fn is_purged(&self) -> bool {
        matches!(self, Removal::Purged(_))
    }
}

/// The local metadata collection.
///
/// Every public operation takes the calling user first, validates its
/// input, delegates to the storage engine, stamps provenance on whatever
/// comes back and only then notifies the event emitter.
pub struct LocalMetadataCollection<S: MetadataStore> {
    identity: CollectionIdentity,
    source: EventSource,
    store: Arc<S>,
    registry: Arc<TypeRegistry>,
    validator: RepositoryValidator,
    emitter: Arc<dyn EventEmitter>,
    /// Held from verification to registry update of every type change
    type_writes: Mutex<()>,
}

impl<S: MetadataStore> LocalMetadataCollection<S> {
    pub fn new(identity: CollectionIdentity, store: Arc<S>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            source: EventSource::from(&identity),
            identity,
            store,
            validator: RepositoryValidator::new(registry.clone()),
            registry,
            emitter: Arc::new(NoopEventEmitter),
            type_writes: Mutex::new(()),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.validator = self.validator.with_max_page_size(max_page_size);
        self
    }

    pub fn identity(&self) -> &CollectionIdentity {
        &self.identity
    }

    pub fn metadata_collection_id(&self) -> &str {
        &self.identity.metadata_collection_id
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn validator(&self) -> &RepositoryValidator {
        &self.validator
    }

    fn begin(&self, user: &UserContext, method: &str) -> OmrsResult<()> {
        log::debug!("{} called by {}", method, user.id());
        self.validator.validate_user_id(user, method)
    }

    // provenance

    fn stamp_header(&self, header: &mut InstanceHeader) {
        if header.metadata_collection_id.as_deref().map_or(true, str::is_empty) {
            header.metadata_collection_id = Some(self.identity.metadata_collection_id.clone());
            header.metadata_collection_name = self.identity.metadata_collection_name.clone();
            header.instance_provenance_type = InstanceProvenanceType::LocalCohort;
        }
    }

    fn stamp<T: InstanceAuditHeader>(&self, mut instance: T) -> T {
        self.stamp_header(instance.header_mut());
        instance
    }

    fn stamp_relationship(&self, mut relationship: Relationship) -> Relationship {
        self.stamp_header(&mut relationship.header);
        self.stamp_header(&mut relationship.entity_one_proxy.header);
        self.stamp_header(&mut relationship.entity_two_proxy.header);
        relationship
    }

    fn stamp_entities(&self, entities: Vec<EntityDetail>) -> Vec<EntityDetail> {
        entities.into_iter().map(|entity| self.stamp(entity)).collect()
    }

    fn stamp_relationships(&self, relationships: Vec<Relationship>) -> Vec<Relationship> {
        relationships
            .into_iter()
            .map(|relationship| self.stamp_relationship(relationship))
            .collect()
    }

    fn type_of(&self, header: &InstanceHeader, method: &str) -> OmrsResult<TypeDef> {
        self.registry
            .get_type_def_by_guid(&header.instance_type.type_def_guid, method)
    }

    // types

    pub fn get_all_types(&self, user: &UserContext) -> OmrsResult<TypeDefGallery> {
        self.begin(user, "get_all_types")?;
        Ok(self.registry.get_all_types())
    }

    pub fn find_types_by_name(&self, user: &UserContext, name: &str) -> OmrsResult<TypeDefGallery> {
        const METHOD: &str = "find_types_by_name";
        self.begin(user, METHOD)?;
        self.validator.validate_name("name", name, METHOD)?;
        self.registry.find_types_by_name(name)
    }

    pub fn find_type_defs_by_category(&self, user: &UserContext, category: TypeDefCategory) -> OmrsResult<Vec<TypeDef>> {
        const METHOD: &str = "find_type_defs_by_category";
        self.begin(user, METHOD)?;
        if category == TypeDefCategory::Unknown {
            return Err(OmrsError::invalid_parameter("category", METHOD, "a category is required"));
        }
        Ok(self.registry.find_type_defs_by_category(category))
    }

    pub fn find_attribute_type_defs_by_category(
        &self,
        user: &UserContext,
        category: AttributeTypeDefCategory,
    ) -> OmrsResult<Vec<AttributeTypeDef>> {
        const METHOD: &str = "find_attribute_type_defs_by_category";
        self.begin(user, METHOD)?;
        if category == AttributeTypeDefCategory::Unknown {
            return Err(OmrsError::invalid_parameter("category", METHOD, "a category is required"));
        }
        Ok(self.registry.find_attribute_type_defs_by_category(category))
    }

    pub fn find_type_defs_by_property(&self, user: &UserContext, property_names: &[String]) -> OmrsResult<Vec<TypeDef>> {
        const METHOD: &str = "find_type_defs_by_property";
        self.begin(user, METHOD)?;
        if property_names.is_empty() {
            return Err(OmrsError::invalid_parameter("match_criteria", METHOD, "at least one property name is required"));
        }
        Ok(self.registry.find_type_defs_by_property(property_names))
    }

    pub fn search_for_type_defs(&self, user: &UserContext, search_criteria: &str) -> OmrsResult<Vec<TypeDef>> {
        const METHOD: &str = "search_for_type_defs";
        self.begin(user, METHOD)?;
        self.validator.validate_search_criteria(search_criteria, METHOD)?;
        self.registry.search_for_type_defs(search_criteria)
    }

    pub fn get_type_def_by_guid(&self, user: &UserContext, guid: &str) -> OmrsResult<TypeDef> {
        const METHOD: &str = "get_type_def_by_guid";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        self.registry.get_type_def_by_guid(guid, METHOD)
    }

    pub fn get_type_def_by_name(&self, user: &UserContext, name: &str) -> OmrsResult<TypeDef> {
        const METHOD: &str = "get_type_def_by_name";
        self.begin(user, METHOD)?;
        self.validator.validate_name("name", name, METHOD)?;
        self.registry.get_type_def_by_name(name, METHOD)
    }

    pub fn get_attribute_type_def_by_guid(&self, user: &UserContext, guid: &str) -> OmrsResult<AttributeTypeDef> {
        const METHOD: &str = "get_attribute_type_def_by_guid";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        self.registry.get_attribute_type_def_by_guid(guid, METHOD)
    }

    pub fn get_attribute_type_def_by_name(&self, user: &UserContext, name: &str) -> OmrsResult<AttributeTypeDef> {
        const METHOD: &str = "get_attribute_type_def_by_name";
        self.begin(user, METHOD)?;
        self.validator.validate_name("name", name, METHOD)?;
        self.registry.get_attribute_type_def_by_name(name, METHOD)
    }

    pub fn verify_type_def(&self, user: &UserContext, type_def: &TypeDef) -> OmrsResult<bool> {
        self.begin(user, "verify_type_def")?;
        self.registry.verify_type_def(type_def)
    }

    pub fn verify_attribute_type_def(&self, user: &UserContext, attribute_type_def: &AttributeTypeDef) -> OmrsResult<bool> {
        self.begin(user, "verify_attribute_type_def")?;
        self.registry.verify_attribute_type_def(attribute_type_def)
    }

    pub async fn add_type_def(&self, user: &UserContext, type_def: TypeDef) -> OmrsResult<()> {
        const METHOD: &str = "add_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        if self.registry.verify_type_def(&type_def)? {
            return Err(OmrsError::TypeAlreadyKnown {
                guid: type_def.guid,
                name: type_def.name,
                method: METHOD.to_string(),
            });
        }
        self.store.add_type_def(user, &type_def).await.for_call(METHOD)?;
        self.registry.add_type_def(type_def.clone())?;
        self.emitter.new_type_def(&self.source, &type_def).await;
        Ok(())
    }

    pub async fn add_attribute_type_def(&self, user: &UserContext, attribute_type_def: AttributeTypeDef) -> OmrsResult<()> {
        const METHOD: &str = "add_attribute_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        if self.registry.verify_attribute_type_def(&attribute_type_def)? {
            return Err(OmrsError::TypeAlreadyKnown {
                guid: attribute_type_def.guid,
                name: attribute_type_def.name,
                method: METHOD.to_string(),
            });
        }
        self.store
            .add_attribute_type_def(user, &attribute_type_def)
            .await
            .for_call(METHOD)?;
        self.registry.add_attribute_type_def(attribute_type_def.clone())?;
        self.emitter
            .new_attribute_type_def(&self.source, &attribute_type_def)
            .await;
        Ok(())
    }

    /// Add every definition not already registered, in dependency order.
    /// Returns the number added.
    pub async fn add_type_def_gallery(&self, user: &UserContext, gallery: TypeDefGallery) -> OmrsResult<usize> {
        self.begin(user, "add_type_def_gallery")?;
        let mut added = 0;
        for attribute_type_def in gallery.attribute_type_defs {
            if !self.registry.verify_attribute_type_def(&attribute_type_def)? {
                self.add_attribute_type_def(user, attribute_type_def).await?;
                added += 1;
            }
        }

        let mut pending = gallery.type_defs;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut first_failure = None;
            for type_def in pending {
                match self.registry.verify_type_def(&type_def) {
                    Ok(true) => {}
                    Ok(false) => {
                        self.add_type_def(user, type_def).await?;
                        added += 1;
                    }
                    Err(e) => {
                        first_failure.get_or_insert(e);
                        deferred.push(type_def);
                    }
                }
            }
            if let Some(e) = first_failure {
                if deferred.len() == before {
                    return Err(e);
                }
            }
            pending = deferred;
        }
        Ok(added)
    }

    pub async fn update_type_def(&self, user: &UserContext, patch: TypeDefPatch) -> OmrsResult<TypeDef> {
        const METHOD: &str = "update_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator
            .validate_type_def_ids(&patch.type_def_guid, &patch.type_def_name, METHOD)?;
        let patched = self.registry.patch_type_def(&patch)?;
        self.store.update_type_def(user, &patched).await.for_call(METHOD)?;
        let patched = self.registry.update_type_def(&patch)?;
        self.emitter
            .updated_type_def(&self.source, &patch, &patched)
            .await;
        Ok(patched)
    }

    pub async fn update_attribute_type_def(&self, user: &UserContext, patch: EnumDefPatch) -> OmrsResult<AttributeTypeDef> {
        const METHOD: &str = "update_attribute_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator.validate_type_def_ids(&patch.guid, &patch.name, METHOD)?;
        let patched = self.registry.patch_attribute_type_def(&patch)?;
        self.store
            .update_attribute_type_def(user, &patched)
            .await
            .for_call(METHOD)?;
        let patched = self.registry.update_attribute_type_def(&patch)?;
        self.emitter
            .updated_attribute_type_def(&self.source, &patch, &patched)
            .await;
        Ok(patched)
    }

    /// Refused with `TypeInUse` while any stored instance uses the type
    pub async fn delete_type_def(&self, user: &UserContext, guid: &str, name: &str) -> OmrsResult<()> {
        const METHOD: &str = "delete_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator.validate_type_def_ids(guid, name, METHOD)?;
        let type_def = self.registry.check_delete_type_def(guid, name)?;
        let in_use = self
            .store
            .count_instances_of_type(user, &type_def)
            .await
            .for_call(METHOD)?;
        if in_use > 0 {
            return Err(OmrsError::TypeInUse {
                guid: guid.to_string(),
                name: name.to_string(),
                method: METHOD.to_string(),
            });
        }
        self.store.delete_type_def(user, guid).await.for_call(METHOD)?;
        self.registry.delete_type_def(guid, name)?;
        self.emitter.deleted_type_def(&self.source, guid, name).await;
        Ok(())
    }

    pub async fn delete_attribute_type_def(&self, user: &UserContext, guid: &str, name: &str) -> OmrsResult<()> {
        const METHOD: &str = "delete_attribute_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator.validate_type_def_ids(guid, name, METHOD)?;
        self.registry.check_delete_attribute_type_def(guid, name)?;
        self.store
            .delete_attribute_type_def(user, guid)
            .await
            .for_call(METHOD)?;
        self.registry.delete_attribute_type_def(guid, name)?;
        self.emitter
            .deleted_attribute_type_def(&self.source, guid, name)
            .await;
        Ok(())
    }

    pub async fn re_identify_type_def(
        &self,
        user: &UserContext,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<TypeDef> {
        const METHOD: &str = "re_identify_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator
            .validate_type_def_ids(original_guid, original_name, METHOD)?;
        self.validator.validate_guid("new_type_def_guid", new_guid, METHOD)?;
        self.validator.validate_name("new_type_def_name", new_name, METHOD)?;

        let renamed = self
            .registry
            .check_re_identify_type_def(original_guid, original_name, new_guid, new_name)?;
        self.store
            .re_identify_type_def(user, original_guid, &renamed)
            .await
            .for_call(METHOD)?;
        let renamed = self
            .registry
            .re_identify_type_def(original_guid, original_name, new_guid, new_name)?;
        self.emitter
            .re_identified_type_def(&self.source, &TypeDefLink::new(original_guid, original_name), &renamed)
            .await;
        Ok(renamed)
    }

    pub async fn re_identify_attribute_type_def(
        &self,
        user: &UserContext,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<AttributeTypeDef> {
        const METHOD: &str = "re_identify_attribute_type_def";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        self.validator
            .validate_type_def_ids(original_guid, original_name, METHOD)?;
        self.validator.validate_guid("new_type_def_guid", new_guid, METHOD)?;
        self.validator.validate_name("new_type_def_name", new_name, METHOD)?;

        let renamed = self.registry.check_re_identify_attribute_type_def(
            original_guid,
            original_name,
            new_guid,
            new_name,
        )?;
        self.store
            .re_identify_attribute_type_def(user, original_guid, &renamed)
            .await
            .for_call(METHOD)?;
        let renamed = self.registry.re_identify_attribute_type_def(
            original_guid,
            original_name,
            new_guid,
            new_name,
        )?;
        self.emitter
            .re_identified_attribute_type_def(
                &self.source,
                &TypeDefLink::new(original_guid, original_name),
                &renamed,
            )
            .await;
        Ok(renamed)
    }

    /// Warm the registry with the definitions already held by the storage
    /// engine. Returns how many were new to the registry.
    pub async fn load_types_from_store(&self, user: &UserContext) -> OmrsResult<usize> {
        const METHOD: &str = "load_types_from_store";
        self.begin(user, METHOD)?;
        let _writing = self.type_writes.lock().await;
        let gallery = self.store.get_all_types(user).await.for_call(METHOD)?;
        let loaded = self.registry.add_type_def_gallery(gallery)?;
        log::info!("Loaded {} type definitions from the storage engine", loaded);
        Ok(loaded)
    }

    // entity reads

    /// `None` when the entity is not stored; proxies report `EntityProxyOnly`
    pub async fn is_entity_known(&self, user: &UserContext, guid: &str) -> OmrsResult<Option<EntityDetail>> {
        match self.get_entity_detail(user, guid).await {
            Ok(entity) => Ok(Some(entity)),
            Err(OmrsError::InstanceNotKnown { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_entity_summary(&self, user: &UserContext, guid: &str) -> OmrsResult<EntitySummary> {
        const METHOD: &str = "get_entity_summary";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        let summary = self.store.get_entity_summary(user, guid).await.for_call(METHOD)?;
        Ok(self.stamp(summary))
    }

    pub async fn get_entity_detail(&self, user: &UserContext, guid: &str) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "get_entity_detail";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        let entity = self.store.get_entity_detail(user, guid).await.for_call(METHOD)?;
        Ok(self.stamp(entity))
    }

    pub async fn get_entity_detail_as_of(
        &self,
        user: &UserContext,
        guid: &str,
        as_of_time: DateTime<Utc>,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "get_entity_detail_as_of";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        self.validator.validate_as_of_time(Some(as_of_time), METHOD)?;
        let entity = self
            .store
            .get_entity_detail_as_of(user, guid, as_of_time)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp(entity))
    }

    pub async fn get_relationships_for_entity(
        &self,
        user: &UserContext,
        entity_guid: &str,
        query: RelationshipQuery,
    ) -> OmrsResult<Vec<Relationship>> {
        const METHOD: &str = "get_relationships_for_entity";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity_guid", entity_guid, METHOD)?;
        let query = self.checked_relationship_query(query, METHOD)?;
        let relationships = self
            .store
            .get_relationships_for_entity(user, entity_guid, &query)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_relationships(relationships))
    }

    fn checked_relationship_query(&self, mut query: RelationshipQuery, method: &str) -> OmrsResult<RelationshipQuery> {
        if let Some(type_guid) = &query.relationship_type_guid {
            self.validator.validate_type_for_category(
                "relationship_type_guid",
                type_guid,
                TypeDefCategory::RelationshipDef,
                method,
            )?;
        }
        self.validator.validate_as_of_time(query.as_of_time, method)?;
        query.paging = self.validator.bounded_paging(query.paging, method)?;
        Ok(query)
    }

    /// Checks shared by the entity searches; returns the entity type when
    /// the query names one
    fn checked_entity_query(&self, query: &mut EntityPropertyQuery, method: &str) -> OmrsResult<Option<TypeDef>> {
        let entity_type = match &query.entity_type_guid {
            Some(type_guid) => Some(self.validator.validate_type_for_category(
                "entity_type_guid",
                type_guid,
                TypeDefCategory::EntityDef,
                method,
            )?),
            None => None,
        };
        for classification in &query.limit_results_by_classification {
            self.validator
                .validate_name("limit_results_by_classification", classification, method)?;
        }
        self.validator.validate_as_of_time(query.as_of_time, method)?;
        query.paging = self.validator.bounded_paging(query.paging, method)?;
        Ok(entity_type)
    }

    pub async fn find_entities_by_property(
        &self,
        user: &UserContext,
        mut query: EntityPropertyQuery,
    ) -> OmrsResult<Vec<EntityDetail>> {
        const METHOD: &str = "find_entities_by_property";
        self.begin(user, METHOD)?;
        let entity_type = self.checked_entity_query(&mut query, METHOD)?;
        self.validator
            .validate_match_properties(entity_type.as_ref(), query.match_properties.as_ref(), METHOD)?;
        let entities = self
            .store
            .find_entities_by_property(user, &query)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_entities(entities))
    }

    pub async fn find_entities_by_property_value(
        &self,
        user: &UserContext,
        search_criteria: &str,
        mut query: EntityPropertyQuery,
    ) -> OmrsResult<Vec<EntityDetail>> {
        const METHOD: &str = "find_entities_by_property_value";
        self.begin(user, METHOD)?;
        self.validator.validate_search_criteria(search_criteria, METHOD)?;
        self.checked_entity_query(&mut query, METHOD)?;
        let entities = self
            .store
            .find_entities_by_property_value(user, search_criteria, &query)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_entities(entities))
    }

    /// Match properties apply to the classification's own properties
    pub async fn find_entities_by_classification(
        &self,
        user: &UserContext,
        classification_name: &str,
        mut query: EntityPropertyQuery,
    ) -> OmrsResult<Vec<EntityDetail>> {
        const METHOD: &str = "find_entities_by_classification";
        self.begin(user, METHOD)?;
        self.validator
            .validate_name("classification_name", classification_name, METHOD)?;
        let classification_type = self.registry.get_type_def_by_name(classification_name, METHOD)?;
        if classification_type.category != TypeDefCategory::ClassificationDef {
            return Err(OmrsError::invalid_parameter(
                "classification_name",
                METHOD,
                format!("{} is not a classification type", classification_name),
            ));
        }
        self.checked_entity_query(&mut query, METHOD)?;
        self.validator.validate_match_properties(
            Some(&classification_type),
            query.match_properties.as_ref(),
            METHOD,
        )?;
        let entities = self
            .store
            .find_entities_by_classification(user, classification_name, &query)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_entities(entities))
    }

    // entity mutations

    /// Stored, not deleted entity about to be changed
    async fn current_entity(&self, user: &UserContext, guid: &str, method: &str) -> OmrsResult<EntityDetail> {
        self.validator.validate_guid("entity_guid", guid, method)?;
        let entity = self.store.get_entity_detail(user, guid).await.for_call(method)?;
        self.validator.validate_not_deleted(&entity.header, method)?;
        Ok(self.stamp(entity))
    }

    /// Create an entity of the given type. `initial_status` defaults to the
    /// type's initial status.
    pub async fn add_entity(
        &self,
        user: &UserContext,
        entity_type_guid: &str,
        properties: InstanceProperties,
        classifications: Vec<Classification>,
        initial_status: Option<InstanceStatus>,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "add_entity";
        self.begin(user, METHOD)?;
        let entity_type = self.validator.validate_type_for_category(
            "entity_type_guid",
            entity_type_guid,
            TypeDefCategory::EntityDef,
            METHOD,
        )?;
        let status = initial_status.unwrap_or(entity_type.initial_status);
        self.validator.validate_new_status(&entity_type, status, METHOD)?;
        self.validator
            .validate_properties(&entity_type, &properties, true, METHOD)?;
        self.validator
            .validate_classifications(&entity_type, &classifications, METHOD)?;

        let new_entity = NewEntity {
            instance_type: self.registry.instance_type_for(&entity_type),
            properties,
            classifications,
            initial_status: status,
        };
        let entity = self
            .store
            .add_entity(user, new_entity)
            .await
            .for_type(METHOD, &entity_type.name)?;
        let entity = self.stamp(entity);
        log::info!("Created {} entity {}", entity_type.name, entity.header.guid);
        self.emitter.new_entity(&self.source, &entity).await;
        Ok(entity)
    }

    /// Store a proxy for an entity homed in another collection
    pub async fn add_entity_proxy(&self, user: &UserContext, proxy: EntityProxy) -> OmrsResult<()> {
        const METHOD: &str = "add_entity_proxy";
        self.begin(user, METHOD)?;
        self.validator
            .validate_entity_proxy(&proxy, self.metadata_collection_id(), METHOD)?;
        self.store.add_entity_proxy(user, proxy).await.for_call(METHOD)
    }

    pub async fn update_entity_status(
        &self,
        user: &UserContext,
        guid: &str,
        new_status: InstanceStatus,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "update_entity_status";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let entity_type = self.type_of(&current.header, METHOD)?;
        self.validator.validate_new_status(&entity_type, new_status, METHOD)?;

        let updated = self
            .store
            .update_entity_status(user, guid, new_status)
            .await
            .for_type(METHOD, &entity_type.name)?;
        let updated = self.stamp(updated);
        self.emitter.updated_entity(&self.source, &current, &updated).await;
        Ok(updated)
    }

    /// Replace the entity's properties
    pub async fn update_entity_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "update_entity_properties";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let entity_type = self.type_of(&current.header, METHOD)?;
        self.validator
            .validate_properties(&entity_type, &properties, true, METHOD)?;

        let updated = self
            .store
            .update_entity_properties(user, guid, properties)
            .await
            .for_type(METHOD, &entity_type.name)?;
        let updated = self.stamp(updated);
        self.emitter.updated_entity(&self.source, &current, &updated).await;
        Ok(updated)
    }

    pub async fn undo_entity_update(&self, user: &UserContext, guid: &str) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "undo_entity_update";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let restored = self
            .store
            .undo_entity_update(user, guid)
            .await
            .for_type(METHOD, current.type_name())?;
        let restored = self.stamp(restored);
        self.emitter.undone_entity(&self.source, &restored).await;
        Ok(restored)
    }

    /// Soft delete, falling back to purge when the storage engine has no
    /// soft delete
    pub async fn delete_entity(&self, user: &UserContext, guid: &str) -> OmrsResult<Removal<EntityDetail>> {
        const METHOD: &str = "delete_entity";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;

        match self.store.delete_entity(user, guid).await {
            Ok(deleted) => {
                let deleted = self.stamp(deleted);
                self.emitter.deleted_entity(&self.source, &deleted).await;
                Ok(Removal::SoftDeleted(deleted))
            }
            Err(StoreError::FunctionNotSupported { .. }) => {
                log::warn!("Soft delete is not supported; purging entity {}", guid);
                self.store
                    .purge_entity(user, guid)
                    .await
                    .for_type(METHOD, current.type_name())?;
                self.emitter
                    .purged_entity(&self.source, &current.header.instance_type.link(), guid)
                    .await;
                Ok(Removal::Purged(current))
            }
            Err(e) => Err(RepositoryErrorHandler::handle(e, METHOD, Some(current.type_name()))),
        }
    }

    /// Physically remove a deleted entity (or any entity, when the storage
    /// engine has no soft delete)
    pub async fn purge_entity(&self, user: &UserContext, guid: &str) -> OmrsResult<()> {
        const METHOD: &str = "purge_entity";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity_guid", guid, METHOD)?;
        let summary = self.store.get_entity_summary(user, guid).await.for_call(METHOD)?;
        if self.store.supports_soft_delete() {
            self.validator.validate_deleted(&summary.header, METHOD)?;
        }
        self.store
            .purge_entity(user, guid)
            .await
            .for_type(METHOD, summary.type_name())?;
        log::info!("Purged entity {}", guid);
        self.emitter
            .purged_entity(&self.source, &summary.header.instance_type.link(), guid)
            .await;
        Ok(())
    }

    pub async fn restore_entity(&self, user: &UserContext, guid: &str) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "restore_entity";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity_guid", guid, METHOD)?;
        let restored = self.store.restore_entity(user, guid).await.for_call(METHOD)?;
        let restored = self.stamp(restored);
        self.emitter.restored_entity(&self.source, &restored).await;
        Ok(restored)
    }

    pub async fn classify_entity(
        &self,
        user: &UserContext,
        guid: &str,
        classification_name: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "classify_entity";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let entity_type = self.type_of(&current.header, METHOD)?;
        let classification_type = self
            .validator
            .validate_classification(&entity_type, classification_name, METHOD)?;
        if current.classification(classification_name).is_some() {
            return Err(OmrsError::ClassificationError {
                classification: classification_name.to_string(),
                type_name: entity_type.name,
                method: METHOD.to_string(),
                reason: format!("entity {} is already classified", guid),
            });
        }
        self.validator
            .validate_properties(&classification_type, &properties, true, METHOD)?;

        let classification = Classification::new(classification_name, properties, user.id());
        let updated = self
            .store
            .classify_entity(user, guid, classification.clone())
            .await
            .for_type(METHOD, &entity_type.name)?;
        let updated = self.stamp(updated);
        self.emitter
            .classified_entity(&self.source, &updated, &classification)
            .await;
        Ok(updated)
    }

    pub async fn declassify_entity(
        &self,
        user: &UserContext,
        guid: &str,
        classification_name: &str,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "declassify_entity";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let removed = self.existing_classification(&current, classification_name, METHOD)?;

        let updated = self
            .store
            .declassify_entity(user, guid, classification_name)
            .await
            .for_type(METHOD, current.type_name())?;
        let updated = self.stamp(updated);
        self.emitter
            .declassified_entity(&self.source, &updated, &removed)
            .await;
        Ok(updated)
    }

    pub async fn update_entity_classification(
        &self,
        user: &UserContext,
        guid: &str,
        classification_name: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "update_entity_classification";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let old_classification = self.existing_classification(&current, classification_name, METHOD)?;
        let classification_type = self.registry.get_type_def_by_name(classification_name, METHOD)?;
        self.validator
            .validate_properties(&classification_type, &properties, true, METHOD)?;

        let updated = self
            .store
            .update_entity_classification(user, guid, classification_name, properties)
            .await
            .for_type(METHOD, current.type_name())?;
        let updated = self.stamp(updated);
        let new_classification = self.existing_classification(&updated, classification_name, METHOD)?;
        self.emitter
            .reclassified_entity(&self.source, &updated, &old_classification, &new_classification)
            .await;
        Ok(updated)
    }

    fn existing_classification(
        &self,
        entity: &EntityDetail,
        classification_name: &str,
        method: &str,
    ) -> OmrsResult<Classification> {
        entity
            .classification(classification_name)
            .cloned()
            .ok_or_else(|| OmrsError::ClassificationError {
                classification: classification_name.to_string(),
                type_name: entity.type_name().to_string(),
                method: method.to_string(),
                reason: format!("entity {} is not classified", entity.header.guid),
            })
    }

    pub async fn re_identify_entity(&self, user: &UserContext, guid: &str, new_guid: &str) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "re_identify_entity";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("new_guid", new_guid, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let renamed = self
            .store
            .re_identify_entity(user, guid, new_guid)
            .await
            .for_type(METHOD, current.type_name())?;
        let renamed = self.stamp(renamed);
        log::info!("Re-identified entity {} as {}", guid, new_guid);
        self.emitter
            .re_identified_entity(&self.source, guid, &renamed)
            .await;
        Ok(renamed)
    }

    pub async fn re_type_entity(&self, user: &UserContext, guid: &str, new_type_def_guid: &str) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "re_type_entity";
        self.begin(user, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        let current_type = self.type_of(&current.header, METHOD)?;
        let new_type = self.validator.validate_type_for_category(
            "new_type_def_guid",
            new_type_def_guid,
            TypeDefCategory::EntityDef,
            METHOD,
        )?;
        self.validator
            .validate_re_type(&current_type, &new_type, &current.header, &current.properties, METHOD)?;
        self.validator
            .validate_classifications(&new_type, &current.classifications, METHOD)?;

        let retyped = self
            .store
            .re_type_entity(user, guid, self.registry.instance_type_for(&new_type))
            .await
            .for_type(METHOD, &current_type.name)?;
        let retyped = self.stamp(retyped);
        self.emitter
            .re_typed_entity(&self.source, &current_type.link(), &retyped)
            .await;
        Ok(retyped)
    }

    /// Move the entity to a new home; it must currently live at
    /// `home_metadata_collection_id`
    pub async fn re_home_entity(
        &self,
        user: &UserContext,
        guid: &str,
        home_metadata_collection_id: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> OmrsResult<EntityDetail> {
        const METHOD: &str = "re_home_entity";
        self.begin(user, METHOD)?;
        self.validator
            .validate_guid("new_home_metadata_collection_id", new_home_metadata_collection_id, METHOD)?;
        let current = self.current_entity(user, guid, METHOD).await?;
        self.validator
            .validate_home(&current.header, home_metadata_collection_id, METHOD)?;

        let rehomed = self
            .store
            .re_home_entity(
                user,
                guid,
                new_home_metadata_collection_id,
                new_home_metadata_collection_name,
            )
            .await
            .for_type(METHOD, current.type_name())?;
        let rehomed = self.stamp(rehomed);
        self.emitter
            .re_homed_entity(&self.source, home_metadata_collection_id, &rehomed)
            .await;
        Ok(rehomed)
    }

    // relationship reads

    pub async fn is_relationship_known(&self, user: &UserContext, guid: &str) -> OmrsResult<Option<Relationship>> {
        match self.get_relationship(user, guid).await {
            Ok(relationship) => Ok(Some(relationship)),
            Err(OmrsError::InstanceNotKnown { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_relationship(&self, user: &UserContext, guid: &str) -> OmrsResult<Relationship> {
        const METHOD: &str = "get_relationship";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        let relationship = self.store.get_relationship(user, guid).await.for_call(METHOD)?;
        Ok(self.stamp_relationship(relationship))
    }

    pub async fn get_relationship_as_of(
        &self,
        user: &UserContext,
        guid: &str,
        as_of_time: DateTime<Utc>,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "get_relationship_as_of";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("guid", guid, METHOD)?;
        self.validator.validate_as_of_time(Some(as_of_time), METHOD)?;
        let relationship = self
            .store
            .get_relationship_as_of(user, guid, as_of_time)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_relationship(relationship))
    }

    pub async fn find_relationships_by_property(
        &self,
        user: &UserContext,
        mut query: RelationshipPropertyQuery,
    ) -> OmrsResult<Vec<Relationship>> {
        const METHOD: &str = "find_relationships_by_property";
        self.begin(user, METHOD)?;
        let relationship_type = match &query.relationship_type_guid {
            Some(type_guid) => Some(self.validator.validate_type_for_category(
                "relationship_type_guid",
                type_guid,
                TypeDefCategory::RelationshipDef,
                METHOD,
            )?),
            None => None,
        };
        self.validator.validate_match_properties(
            relationship_type.as_ref(),
            query.match_properties.as_ref(),
            METHOD,
        )?;
        self.validator.validate_as_of_time(query.as_of_time, METHOD)?;
        query.paging = self.validator.bounded_paging(query.paging, METHOD)?;
        let relationships = self
            .store
            .find_relationships_by_property(user, &query)
            .await
            .for_call(METHOD)?;
        Ok(self.stamp_relationships(relationships))
    }

    // relationship mutations

    async fn current_relationship(&self, user: &UserContext, guid: &str, method: &str) -> OmrsResult<Relationship> {
        self.validator.validate_guid("relationship_guid", guid, method)?;
        let relationship = self.store.get_relationship(user, guid).await.for_call(method)?;
        self.validator.validate_not_deleted(&relationship.header, method)?;
        Ok(self.stamp_relationship(relationship))
    }

    /// Link two existing entities (or proxies) with a new relationship
    pub async fn add_relationship(
        &self,
        user: &UserContext,
        relationship_type_guid: &str,
        properties: InstanceProperties,
        entity_one_guid: &str,
        entity_two_guid: &str,
        initial_status: Option<InstanceStatus>,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "add_relationship";
        self.begin(user, METHOD)?;
        let relationship_type = self.validator.validate_type_for_category(
            "relationship_type_guid",
            relationship_type_guid,
            TypeDefCategory::RelationshipDef,
            METHOD,
        )?;
        self.validator.validate_guid("entity_one_guid", entity_one_guid, METHOD)?;
        self.validator.validate_guid("entity_two_guid", entity_two_guid, METHOD)?;
        let status = initial_status.unwrap_or(relationship_type.initial_status);
        self.validator
            .validate_new_status(&relationship_type, status, METHOD)?;
        self.validator
            .validate_properties(&relationship_type, &properties, true, METHOD)?;

        let entity_one = self
            .store
            .get_entity_summary(user, entity_one_guid)
            .await
            .for_call(METHOD)?;
        let entity_two = self
            .store
            .get_entity_summary(user, entity_two_guid)
            .await
            .for_call(METHOD)?;
        for end in [&entity_one, &entity_two] {
            self.validator.validate_not_deleted(&end.header, METHOD)?;
        }
        self.validator
            .validate_relationship_ends(&relationship_type, &entity_one, &entity_two, METHOD)?;

        let new_relationship = NewRelationship {
            instance_type: self.registry.instance_type_for(&relationship_type),
            properties,
            entity_one_guid: entity_one_guid.to_string(),
            entity_two_guid: entity_two_guid.to_string(),
            initial_status: status,
        };
        let relationship = self
            .store
            .add_relationship(user, new_relationship)
            .await
            .for_type(METHOD, &relationship_type.name)?;
        let relationship = self.stamp_relationship(relationship);
        log::info!(
            "Created {} relationship {} between {} and {}",
            relationship_type.name,
            relationship.header.guid,
            entity_one_guid,
            entity_two_guid
        );
        self.emitter
            .new_relationship(&self.source, &relationship)
            .await;
        Ok(relationship)
    }

    pub async fn update_relationship_status(
        &self,
        user: &UserContext,
        guid: &str,
        new_status: InstanceStatus,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "update_relationship_status";
        self.begin(user, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        let relationship_type = self.type_of(&current.header, METHOD)?;
        self.validator
            .validate_new_status(&relationship_type, new_status, METHOD)?;

        let updated = self
            .store
            .update_relationship_status(user, guid, new_status)
            .await
            .for_type(METHOD, &relationship_type.name)?;
        let updated = self.stamp_relationship(updated);
        self.emitter
            .updated_relationship(&self.source, &current, &updated)
            .await;
        Ok(updated)
    }

    pub async fn update_relationship_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "update_relationship_properties";
        self.begin(user, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        let relationship_type = self.type_of(&current.header, METHOD)?;
        self.validator
            .validate_properties(&relationship_type, &properties, true, METHOD)?;

        let updated = self
            .store
            .update_relationship_properties(user, guid, properties)
            .await
            .for_type(METHOD, &relationship_type.name)?;
        let updated = self.stamp_relationship(updated);
        self.emitter
            .updated_relationship(&self.source, &current, &updated)
            .await;
        Ok(updated)
    }

    pub async fn undo_relationship_update(&self, user: &UserContext, guid: &str) -> OmrsResult<Relationship> {
        const METHOD: &str = "undo_relationship_update";
        self.begin(user, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        let restored = self
            .store
            .undo_relationship_update(user, guid)
            .await
            .for_type(METHOD, current.type_name())?;
        let restored = self.stamp_relationship(restored);
        self.emitter
            .undone_relationship(&self.source, &restored)
            .await;
        Ok(restored)
    }

    pub async fn delete_relationship(&self, user: &UserContext, guid: &str) -> OmrsResult<Removal<Relationship>> {
        const METHOD: &str = "delete_relationship";
        self.begin(user, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;

        match self.store.delete_relationship(user, guid).await {
            Ok(deleted) => {
                let deleted = self.stamp_relationship(deleted);
                self.emitter
                    .deleted_relationship(&self.source, &deleted)
                    .await;
                Ok(Removal::SoftDeleted(deleted))
            }
            Err(StoreError::FunctionNotSupported { .. }) => {
                log::warn!("Soft delete is not supported; purging relationship {}", guid);
                self.store
                    .purge_relationship(user, guid)
                    .await
                    .for_type(METHOD, current.type_name())?;
                self.emitter
                    .purged_relationship(&self.source, &current)
                    .await;
                Ok(Removal::Purged(current))
            }
            Err(e) => Err(RepositoryErrorHandler::handle(e, METHOD, Some(current.type_name()))),
        }
    }

    pub async fn purge_relationship(&self, user: &UserContext, guid: &str) -> OmrsResult<()> {
        const METHOD: &str = "purge_relationship";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("relationship_guid", guid, METHOD)?;
        let relationship = self.store.get_relationship(user, guid).await.for_call(METHOD)?;
        let relationship = self.stamp_relationship(relationship);
        if self.store.supports_soft_delete() {
            self.validator.validate_deleted(&relationship.header, METHOD)?;
        }
        self.store
            .purge_relationship(user, guid)
            .await
            .for_type(METHOD, relationship.type_name())?;
        log::info!("Purged relationship {}", guid);
        self.emitter
            .purged_relationship(&self.source, &relationship)
            .await;
        Ok(())
    }

    pub async fn restore_relationship(&self, user: &UserContext, guid: &str) -> OmrsResult<Relationship> {
        const METHOD: &str = "restore_relationship";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("relationship_guid", guid, METHOD)?;
        let restored = self
            .store
            .restore_relationship(user, guid)
            .await
            .for_call(METHOD)?;
        let restored = self.stamp_relationship(restored);
        self.emitter
            .restored_relationship(&self.source, &restored)
            .await;
        Ok(restored)
    }

    pub async fn re_identify_relationship(&self, user: &UserContext, guid: &str, new_guid: &str) -> OmrsResult<Relationship> {
        const METHOD: &str = "re_identify_relationship";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("new_guid", new_guid, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        let renamed = self
            .store
            .re_identify_relationship(user, guid, new_guid)
            .await
            .for_type(METHOD, current.type_name())?;
        let renamed = self.stamp_relationship(renamed);
        self.emitter
            .re_identified_relationship(&self.source, guid, &renamed)
            .await;
        Ok(renamed)
    }

    pub async fn re_type_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        new_type_def_guid: &str,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "re_type_relationship";
        self.begin(user, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        let current_type = self.type_of(&current.header, METHOD)?;
        let new_type = self.validator.validate_type_for_category(
            "new_type_def_guid",
            new_type_def_guid,
            TypeDefCategory::RelationshipDef,
            METHOD,
        )?;
        self.validator
            .validate_re_type(&current_type, &new_type, &current.header, &current.properties, METHOD)?;
        let ends = (
            EntitySummary {
                header: current.entity_one_proxy.header.clone(),
                classifications: Vec::new(),
            },
            EntitySummary {
                header: current.entity_two_proxy.header.clone(),
                classifications: Vec::new(),
            },
        );
        self.validator
            .validate_relationship_ends(&new_type, &ends.0, &ends.1, METHOD)?;

        let retyped = self
            .store
            .re_type_relationship(user, guid, self.registry.instance_type_for(&new_type))
            .await
            .for_type(METHOD, &current_type.name)?;
        let retyped = self.stamp_relationship(retyped);
        self.emitter
            .re_typed_relationship(&self.source, &current_type.link(), &retyped)
            .await;
        Ok(retyped)
    }

    pub async fn re_home_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        home_metadata_collection_id: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> OmrsResult<Relationship> {
        const METHOD: &str = "re_home_relationship";
        self.begin(user, METHOD)?;
        self.validator
            .validate_guid("new_home_metadata_collection_id", new_home_metadata_collection_id, METHOD)?;
        let current = self.current_relationship(user, guid, METHOD).await?;
        self.validator
            .validate_home(&current.header, home_metadata_collection_id, METHOD)?;

        let rehomed = self
            .store
            .re_home_relationship(
                user,
                guid,
                new_home_metadata_collection_id,
                new_home_metadata_collection_name,
            )
            .await
            .for_type(METHOD, current.type_name())?;
        let rehomed = self.stamp_relationship(rehomed);
        self.emitter
            .re_homed_relationship(&self.source, home_metadata_collection_id, &rehomed)
            .await;
        Ok(rehomed)
    }

    // reference copies

    /// Keep a local copy of an entity homed elsewhere
    pub async fn save_entity_reference_copy(&self, user: &UserContext, entity: EntityDetail) -> OmrsResult<()> {
        const METHOD: &str = "save_entity_reference_copy";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity", &entity.header.guid, METHOD)?;
        self.validator
            .validate_reference_copy_home(&entity.header, self.metadata_collection_id(), METHOD)?;
        self.validator.validate_type_for_category(
            "entity",
            &entity.header.instance_type.type_def_guid,
            TypeDefCategory::EntityDef,
            METHOD,
        )?;
        self.store
            .save_entity_reference_copy(user, entity)
            .await
            .for_call(METHOD)
    }

    pub async fn purge_entity_reference_copy(&self, user: &UserContext, guid: &str) -> OmrsResult<()> {
        const METHOD: &str = "purge_entity_reference_copy";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity_guid", guid, METHOD)?;
        let summary = self.store.get_entity_summary(user, guid).await.for_call(METHOD)?;
        let summary = self.stamp(summary);
        self.validator
            .validate_reference_copy_home(&summary.header, self.metadata_collection_id(), METHOD)?;
        self.store
            .purge_entity_reference_copy(user, guid)
            .await
            .for_call(METHOD)
    }

    /// When this collection is the home, broadcast the current state;
    /// otherwise ask the home collection to do so
    pub async fn refresh_entity_reference_copy(
        &self,
        user: &UserContext,
        guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_metadata_collection_id: &str,
    ) -> OmrsResult<()> {
        const METHOD: &str = "refresh_entity_reference_copy";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("entity_guid", guid, METHOD)?;
        self.validator
            .validate_type_def_ids(type_def_guid, type_def_name, METHOD)?;
        self.validator
            .validate_guid("home_metadata_collection_id", home_metadata_collection_id, METHOD)?;

        if self.identity.is_local(home_metadata_collection_id) {
            let entity = self.store.get_entity_detail(user, guid).await.for_type(METHOD, type_def_name)?;
            let entity = self.stamp(entity);
            self.emitter.refreshed_entity(&self.source, &entity).await;
        } else {
            self.emitter
                .refresh_entity_request(
                    &self.source,
                    &TypeDefLink::new(type_def_guid, type_def_name),
                    guid,
                    home_metadata_collection_id,
                )
                .await;
        }
        Ok(())
    }

    pub async fn save_relationship_reference_copy(&self, user: &UserContext, relationship: Relationship) -> OmrsResult<()> {
        const METHOD: &str = "save_relationship_reference_copy";
        self.begin(user, METHOD)?;
        self.validator
            .validate_guid("relationship", &relationship.header.guid, METHOD)?;
        self.validator.validate_reference_copy_home(
            &relationship.header,
            self.metadata_collection_id(),
            METHOD,
        )?;
        self.validator.validate_type_for_category(
            "relationship",
            &relationship.header.instance_type.type_def_guid,
            TypeDefCategory::RelationshipDef,
            METHOD,
        )?;
        self.store
            .save_relationship_reference_copy(user, relationship)
            .await
            .for_call(METHOD)
    }

    pub async fn purge_relationship_reference_copy(&self, user: &UserContext, guid: &str) -> OmrsResult<()> {
        const METHOD: &str = "purge_relationship_reference_copy";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("relationship_guid", guid, METHOD)?;
        let relationship = self.store.get_relationship(user, guid).await.for_call(METHOD)?;
        let relationship = self.stamp_relationship(relationship);
        self.validator.validate_reference_copy_home(
            &relationship.header,
            self.metadata_collection_id(),
            METHOD,
        )?;
        self.store
            .purge_relationship_reference_copy(user, guid)
            .await
            .for_call(METHOD)
    }

    pub async fn refresh_relationship_reference_copy(
        &self,
        user: &UserContext,
        guid: &str,
        type_def_guid: &str,
        type_def_name: &str,
        home_metadata_collection_id: &str,
    ) -> OmrsResult<()> {
        const METHOD: &str = "refresh_relationship_reference_copy";
        self.begin(user, METHOD)?;
        self.validator.validate_guid("relationship_guid", guid, METHOD)?;
        self.validator
            .validate_type_def_ids(type_def_guid, type_def_name, METHOD)?;
        self.validator
            .validate_guid("home_metadata_collection_id", home_metadata_collection_id, METHOD)?;

        if self.identity.is_local(home_metadata_collection_id) {
            let relationship = self
                .store
                .get_relationship(user, guid)
                .await
                .for_type(METHOD, type_def_name)?;
            let relationship = self.stamp_relationship(relationship);
            self.emitter
                .refreshed_relationship(&self.source, &relationship)
                .await;
        } else {
            self.emitter
                .refresh_relationship_request(
                    &self.source,
                    &TypeDefLink::new(type_def_guid, type_def_name),
                    guid,
                    home_metadata_collection_id,
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::events::{InstanceEvent, OutboundEvent, RecordingEventEmitter, TypeDefEvent};
    use crate::model::{
        AttributeTypeDef, PrimitiveDefCategory, RelationshipEndCardinality, RelationshipEndDef,
        TypeDefAttribute,
    };
    use crate::store::{InMemoryStore, TypeDefStore};

    struct Fixture {
        collection: LocalMetadataCollection<InMemoryStore>,
        events: Arc<RecordingEventEmitter>,
    }

    fn user() -> UserContext {
        UserContext::new("erin")
    }

    async fn fixture_with(store: InMemoryStore) -> Fixture {
        let events = Arc::new(RecordingEventEmitter::new());
        let collection = LocalMetadataCollection::new(
            CollectionIdentity::new("local-repo", "mc-local"),
            Arc::new(store),
            Arc::new(TypeRegistry::new()),
        )
        .with_emitter(events.clone());

        let string = AttributeTypeDef::primitive("A-string", PrimitiveDefCategory::String);
        let asset = TypeDef::entity("T1", "Asset")
            .with_attribute(TypeDefAttribute::new("qualifiedName", &string).required());
        let person = TypeDef::entity("T2", "Person");
        let ownership = TypeDef::relationship(
            "R1",
            "AssetOwnership",
            RelationshipEndDef {
                entity_type: asset.link(),
                attribute_name: "owner".to_string(),
                cardinality: RelationshipEndCardinality::AtMostOne,
            },
            RelationshipEndDef {
                entity_type: person.link(),
                attribute_name: "ownedAssets".to_string(),
                cardinality: RelationshipEndCardinality::AnyNumber,
            },
        );
        let confidentiality = TypeDef::classification("C1", "Confidentiality")
            .with_valid_entity(&asset)
            .with_attribute(TypeDefAttribute::new("level", &string));

        collection.add_attribute_type_def(&user(), string).await.unwrap();
        for type_def in [asset, person, ownership, confidentiality] {
            collection.add_type_def(&user(), type_def).await.unwrap();
        }
        events.take();
        Fixture { collection, events }
    }

    async fn fixture() -> Fixture {
        fixture_with(InMemoryStore::new()).await
    }

    fn named(name: &str) -> InstanceProperties {
        InstanceProperties::new().with_string("qualifiedName", name)
    }

    #[tokio::test]
    async fn test_add_type_def_emits_and_rejects_duplicates() {
        let f = fixture().await;
        let glossary = TypeDef::entity("T9", "Glossary");
        f.collection.add_type_def(&user(), glossary.clone()).await.unwrap();
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::TypeDef(TypeDefEvent::NewTypeDef { type_def })] if type_def.name == "Glossary"
        ));

        let err = f.collection.add_type_def(&user(), glossary).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeAlreadyKnown);
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_created_entities_are_stamped_local() {
        let f = fixture().await;
        let entity = f
            .collection
            .add_entity(&user(), "T1", named("a1"), Vec::new(), None)
            .await
            .unwrap();
        assert_eq!(entity.header.metadata_collection_id.as_deref(), Some("mc-local"));
        assert_eq!(entity.header.instance_provenance_type, InstanceProvenanceType::LocalCohort);
        assert_eq!(entity.header.version, 1);

        let fetched = f.collection.get_entity_detail(&user(), entity.guid()).await.unwrap();
        assert_eq!(fetched.header.metadata_collection_id.as_deref(), Some("mc-local"));
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::NewEntity { .. })]
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_storage() {
        let f = fixture().await;
        let missing_name = f
            .collection
            .add_entity(&user(), "T1", InstanceProperties::new(), Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(missing_name.kind(), ErrorKind::PropertyError);

        let wrong_category = f
            .collection
            .add_entity(&user(), "R1", named("a1"), Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(wrong_category.kind(), ErrorKind::InvalidParameter);

        let draft = f
            .collection
            .add_entity(&user(), "T1", named("a1"), Vec::new(), Some(InstanceStatus::Draft))
            .await
            .unwrap_err();
        assert_eq!(draft.kind(), ErrorKind::StatusNotSupported);

        let nobody = f
            .collection
            .get_entity_detail(&UserContext::new(" "), "e1")
            .await
            .unwrap_err();
        assert_eq!(nobody.parameter(), Some("user_id"));

        assert_eq!(f.collection.store().entity_count(), 0);
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_update_emits_old_and_new() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        f.events.take();

        let updated = f
            .collection
            .update_entity_properties(&user(), entity.guid(), named("a2"))
            .await
            .unwrap();
        assert_eq!(updated.header.version, 2);
        match &f.events.take()[..] {
            [OutboundEvent::Instance(InstanceEvent::UpdatedEntity { old_entity, new_entity })] => {
                assert_eq!(old_entity.properties, named("a1"));
                assert_eq!(new_entity.properties, named("a2"));
            }
            other => panic!("unexpected events {:?}", other),
        }

        let undone = f.collection.undo_entity_update(&user(), entity.guid()).await.unwrap();
        assert_eq!(undone.properties, named("a1"));
        assert_eq!(undone.header.version, 3);
    }

    #[tokio::test]
    async fn test_status_update_to_deleted_is_refused() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let err = f
            .collection
            .update_entity_status(&user(), entity.guid(), InstanceStatus::Deleted)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatusNotSupported);
    }

    #[tokio::test]
    async fn test_delete_restore_keeps_content() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let entity = f
            .collection
            .classify_entity(&user(), entity.guid(), "Confidentiality", InstanceProperties::new().with_string("level", "high"))
            .await
            .unwrap();

        let removal = f.collection.delete_entity(&user(), entity.guid()).await.unwrap();
        assert!(!removal.is_purged());
        assert_eq!(removal.instance().header.status, InstanceStatus::Deleted);

        let err = f
            .collection
            .update_entity_properties(&user(), entity.guid(), named("a2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let restored = f.collection.restore_entity(&user(), entity.guid()).await.unwrap();
        assert_eq!(restored.header.status, InstanceStatus::Active);
        assert_eq!(restored.properties, entity.properties);
        assert_eq!(restored.classifications, entity.classifications);
    }

    #[tokio::test]
    async fn test_delete_without_soft_delete_purges() {
        let f = fixture_with(InMemoryStore::new().with_soft_delete(false)).await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        f.events.take();

        let removal = f.collection.delete_entity(&user(), entity.guid()).await.unwrap();
        assert!(removal.is_purged());
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::PurgedEntity { guid, .. })] if guid == entity.guid()
        ));

        let err = f.collection.get_entity_detail(&user(), entity.guid()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceNotKnown);
    }

    #[tokio::test]
    async fn test_purge_requires_deleted() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let err = f.collection.purge_entity(&user(), entity.guid()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceNotDeleted);

        f.collection.delete_entity(&user(), entity.guid()).await.unwrap();
        f.collection.purge_entity(&user(), entity.guid()).await.unwrap();
        assert!(f.collection.is_entity_known(&user(), entity.guid()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relationship_ends_checked() {
        let f = fixture().await;
        let asset = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let person = f.collection.add_entity(&user(), "T2", InstanceProperties::new(), Vec::new(), None).await.unwrap();

        let backwards = f
            .collection
            .add_relationship(&user(), "R1", InstanceProperties::new(), person.guid(), asset.guid(), None)
            .await
            .unwrap_err();
        assert_eq!(backwards.parameter(), Some("entity_one_guid"));

        let missing = f
            .collection
            .add_relationship(&user(), "R1", InstanceProperties::new(), asset.guid(), "nobody", None)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::InstanceNotKnown);

        let relationship = f
            .collection
            .add_relationship(&user(), "R1", InstanceProperties::new(), asset.guid(), person.guid(), None)
            .await
            .unwrap();
        assert_eq!(relationship.entity_one_proxy.header.metadata_collection_id.as_deref(), Some("mc-local"));
        assert_eq!(relationship.end_two_guid(), person.guid());
    }

    #[tokio::test]
    async fn test_storage_failures_are_wrapped() {
        let f = fixture().await;
        f.collection.store().fail_with("disk unplugged");
        let err = f
            .collection
            .add_entity(&user(), "T1", named("a1"), Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepositoryUnavailable);
        assert!(f.events.is_empty());

        f.collection.store().recover();
        f.collection.store().deny_user("mallory");
        let err = f
            .collection
            .get_entity_detail(&UserContext::new("mallory"), "e1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthorized);
    }

    #[tokio::test]
    async fn test_reference_copies_and_refresh() {
        let f = fixture().await;
        let local = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();

        let err = f
            .collection
            .save_entity_reference_copy(&user(), local.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);

        let mut remote = local.clone();
        remote.header.guid = "remote-1".to_string();
        remote.header.metadata_collection_id = Some("mc-remote".to_string());
        f.collection.save_entity_reference_copy(&user(), remote).await.unwrap();
        f.events.take();

        f.collection
            .refresh_entity_reference_copy(&user(), local.guid(), "T1", "Asset", "mc-local")
            .await
            .unwrap();
        f.collection
            .refresh_entity_reference_copy(&user(), "remote-1", "T1", "Asset", "mc-remote")
            .await
            .unwrap();
        let events = f.events.take();
        assert!(matches!(&events[0], OutboundEvent::Instance(InstanceEvent::RefreshedEntity { .. })));
        assert!(matches!(
            &events[1],
            OutboundEvent::Instance(InstanceEvent::RefreshEntityRequest { home_metadata_collection_id, .. })
                if home_metadata_collection_id == "mc-remote"
        ));

        let err = f.collection.purge_entity_reference_copy(&user(), local.guid()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);
        f.collection.purge_entity_reference_copy(&user(), "remote-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_re_home_requires_current_home() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let err = f
            .collection
            .re_home_entity(&user(), entity.guid(), "mc-other", "mc-new", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);

        let rehomed = f
            .collection
            .re_home_entity(&user(), entity.guid(), "mc-local", "mc-new", Some("new home"))
            .await
            .unwrap();
        assert_eq!(rehomed.header.metadata_collection_id.as_deref(), Some("mc-new"));
    }

    #[tokio::test]
    async fn test_type_in_use_cannot_be_deleted() {
        let f = fixture().await;
        f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let err = f.collection.delete_type_def(&user(), "T1", "Asset").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeInUse);
    }

    #[tokio::test]
    async fn test_re_identify_moves_the_guid() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        f.events.take();

        let renamed = f
            .collection
            .re_identify_entity(&user(), entity.guid(), "e-renamed")
            .await
            .unwrap();
        assert_eq!(renamed.guid(), "e-renamed");
        assert!(f.collection.is_entity_known(&user(), entity.guid()).await.unwrap().is_none());
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::ReIdentifiedEntity { .. })]
        ));
    }

    #[tokio::test]
    async fn test_re_type_checks_properties_against_new_type() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();

        let err = f.collection.re_type_entity(&user(), entity.guid(), "T2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PropertyError);
        let err = f.collection.re_type_entity(&user(), entity.guid(), "R1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let string = f.collection.get_attribute_type_def_by_guid(&user(), "A-string").unwrap();
        let dataset = TypeDef::entity("T5", "DataSet")
            .with_attribute(TypeDefAttribute::new("qualifiedName", &string));
        f.collection.add_type_def(&user(), dataset).await.unwrap();
        let retyped = f.collection.re_type_entity(&user(), entity.guid(), "T5").await.unwrap();
        assert_eq!(retyped.type_name(), "DataSet");
        assert_eq!(retyped.properties, entity.properties);
    }

    #[tokio::test]
    async fn test_as_of_reads_see_earlier_versions() {
        let f = fixture().await;
        let entity = f.collection.add_entity(&user(), "T1", named("before"), Vec::new(), None).await.unwrap();
        let created_at = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        f.collection
            .update_entity_properties(&user(), entity.guid(), named("after"))
            .await
            .unwrap();

        let earlier = f
            .collection
            .get_entity_detail_as_of(&user(), entity.guid(), created_at)
            .await
            .unwrap();
        assert_eq!(earlier.properties, named("before"));

        let err = f
            .collection
            .get_entity_detail_as_of(&user(), entity.guid(), Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    /// Asset to Person relationship type with a `role` attribute
    async fn add_stewardship(f: &Fixture) {
        let string = f.collection.get_attribute_type_def_by_guid(&user(), "A-string").unwrap();
        let asset = f.collection.get_type_def_by_guid(&user(), "T1").unwrap();
        let person = f.collection.get_type_def_by_guid(&user(), "T2").unwrap();
        let stewardship = TypeDef::relationship(
            "R2",
            "AssetStewardship",
            RelationshipEndDef {
                entity_type: asset.link(),
                attribute_name: "steward".to_string(),
                cardinality: RelationshipEndCardinality::AnyNumber,
            },
            RelationshipEndDef {
                entity_type: person.link(),
                attribute_name: "stewardedAssets".to_string(),
                cardinality: RelationshipEndCardinality::AnyNumber,
            },
        )
        .with_attribute(TypeDefAttribute::new("role", &string));
        f.collection.add_type_def(&user(), stewardship).await.unwrap();
        f.events.take();
    }

    async fn owned_asset(f: &Fixture) -> (EntityDetail, EntityDetail, Relationship) {
        let asset = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let person = f.collection.add_entity(&user(), "T2", InstanceProperties::new(), Vec::new(), None).await.unwrap();
        let relationship = f
            .collection
            .add_relationship(&user(), "R1", InstanceProperties::new(), asset.guid(), person.guid(), None)
            .await
            .unwrap();
        f.events.take();
        (asset, person, relationship)
    }

    #[tokio::test]
    async fn test_re_identified_types_follow_stored_instances() {
        let f = fixture().await;
        let (asset, _, relationship) = owned_asset(&f).await;
        f.collection
            .classify_entity(
                &user(),
                asset.guid(),
                "Confidentiality",
                InstanceProperties::new().with_string("level", "high"),
            )
            .await
            .unwrap();

        f.collection
            .re_identify_type_def(&user(), "T1", "Asset", "T1-v2", "AssetV2")
            .await
            .unwrap();
        f.collection
            .re_identify_type_def(&user(), "C1", "Confidentiality", "C1-v2", "Secrecy")
            .await
            .unwrap();

        let updated = f
            .collection
            .update_entity_properties(&user(), asset.guid(), named("a2"))
            .await
            .unwrap();
        assert_eq!(updated.header.instance_type.type_def_guid, "T1-v2");
        assert_eq!(updated.type_name(), "AssetV2");
        assert_eq!(updated.classifications[0].name, "Secrecy");

        let undone = f.collection.undo_entity_update(&user(), asset.guid()).await.unwrap();
        assert_eq!(undone.type_name(), "AssetV2");
        assert_eq!(undone.properties, named("a1"));

        let linked = f.collection.get_relationship(&user(), relationship.guid()).await.unwrap();
        assert_eq!(linked.entity_one_proxy.header.instance_type.type_def_guid, "T1-v2");
        f.collection
            .update_relationship_status(&user(), relationship.guid(), InstanceStatus::Active)
            .await
            .unwrap();

        let declassified = f.collection.declassify_entity(&user(), asset.guid(), "Secrecy").await.unwrap();
        assert!(declassified.classifications.is_empty());
    }

    #[tokio::test]
    async fn test_re_identified_attribute_type_relinks_stored_types() {
        let f = fixture().await;
        f.collection
            .re_identify_attribute_type_def(&user(), "A-string", "string", "A-text", "text")
            .await
            .unwrap();

        let stored = f.collection.store().get_all_types(&user()).await.unwrap();
        let asset = stored.type_defs.iter().find(|t| t.guid == "T1").unwrap();
        assert_eq!(asset.attribute("qualifiedName").unwrap().attribute_type.guid, "A-text");
        f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_type_adds_keep_store_and_registry_agreeing() {
        let f = fixture().await;
        let collection = Arc::new(f.collection);
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let collection = collection.clone();
                tokio::spawn(async move {
                    collection
                        .add_type_def(&user(), TypeDef::entity(format!("G{}", i), "Glossary"))
                        .await
                })
            })
            .collect();

        let mut added = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => added += 1,
                Err(err) => assert_eq!(err.kind(), ErrorKind::TypeConflict),
            }
        }
        assert_eq!(added, 1);

        let stored = collection.store().get_all_types(&user()).await.unwrap();
        let glossaries: Vec<_> = stored.type_defs.iter().filter(|t| t.name == "Glossary").collect();
        assert_eq!(glossaries.len(), 1);
        let registered = collection.get_type_def_by_name(&user(), "Glossary").unwrap();
        assert_eq!(glossaries[0].guid, registered.guid);
    }

    #[tokio::test]
    async fn test_relationship_reference_copies_and_refresh() {
        let f = fixture().await;
        let (_, _, local) = owned_asset(&f).await;

        let err = f
            .collection
            .save_relationship_reference_copy(&user(), local.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);

        let mut remote = local.clone();
        remote.header.guid = "remote-r1".to_string();
        remote.header.metadata_collection_id = Some("mc-remote".to_string());
        f.collection.save_relationship_reference_copy(&user(), remote).await.unwrap();
        f.events.take();

        f.collection
            .refresh_relationship_reference_copy(&user(), local.guid(), "R1", "AssetOwnership", "mc-local")
            .await
            .unwrap();
        f.collection
            .refresh_relationship_reference_copy(&user(), "remote-r1", "R1", "AssetOwnership", "mc-remote")
            .await
            .unwrap();
        let events = f.events.take();
        assert!(matches!(
            &events[0],
            OutboundEvent::Instance(InstanceEvent::RefreshedRelationship { relationship })
                if relationship.guid() == local.guid()
        ));
        assert!(matches!(
            &events[1],
            OutboundEvent::Instance(InstanceEvent::RefreshRelationshipRequest { guid, home_metadata_collection_id, .. })
                if guid == "remote-r1" && home_metadata_collection_id == "mc-remote"
        ));

        let err = f
            .collection
            .purge_relationship_reference_copy(&user(), local.guid())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);
        f.collection
            .purge_relationship_reference_copy(&user(), "remote-r1")
            .await
            .unwrap();
        assert!(f.collection.get_relationship(&user(), "remote-r1").await.is_err());
    }

    #[tokio::test]
    async fn test_undo_relationship_update_restores_properties() {
        let f = fixture().await;
        add_stewardship(&f).await;
        let asset = f.collection.add_entity(&user(), "T1", named("a1"), Vec::new(), None).await.unwrap();
        let person = f.collection.add_entity(&user(), "T2", InstanceProperties::new(), Vec::new(), None).await.unwrap();
        let steward = InstanceProperties::new().with_string("role", "steward");
        let relationship = f
            .collection
            .add_relationship(&user(), "R2", steward.clone(), asset.guid(), person.guid(), None)
            .await
            .unwrap();
        f.collection
            .update_relationship_properties(
                &user(),
                relationship.guid(),
                InstanceProperties::new().with_string("role", "custodian"),
            )
            .await
            .unwrap();
        f.events.take();

        let undone = f
            .collection
            .undo_relationship_update(&user(), relationship.guid())
            .await
            .unwrap();
        assert_eq!(undone.properties, steward);
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::UndoneRelationship { .. })]
        ));
        let current = f.collection.get_relationship(&user(), relationship.guid()).await.unwrap();
        assert_eq!(current.properties, steward);
    }

    #[tokio::test]
    async fn test_re_type_relationship_checks_category() {
        let f = fixture().await;
        add_stewardship(&f).await;
        let (_, _, relationship) = owned_asset(&f).await;

        let err = f
            .collection
            .re_type_relationship(&user(), relationship.guid(), "T1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(f.events.is_empty());

        let retyped = f
            .collection
            .re_type_relationship(&user(), relationship.guid(), "R2")
            .await
            .unwrap();
        assert_eq!(retyped.type_name(), "AssetStewardship");
        assert_eq!(retyped.end_one_guid(), relationship.end_one_guid());
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::ReTypedRelationship { original_type, .. })]
                if original_type.name == "AssetOwnership"
        ));
    }

    #[tokio::test]
    async fn test_re_home_relationship_requires_current_home() {
        let f = fixture().await;
        let (_, _, relationship) = owned_asset(&f).await;

        let err = f
            .collection
            .re_home_relationship(&user(), relationship.guid(), "mc-other", "mc-new", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HomeConflict);

        let rehomed = f
            .collection
            .re_home_relationship(&user(), relationship.guid(), "mc-local", "mc-new", Some("new home"))
            .await
            .unwrap();
        assert_eq!(rehomed.header.metadata_collection_id.as_deref(), Some("mc-new"));
        assert!(matches!(
            &f.events.take()[..],
            [OutboundEvent::Instance(InstanceEvent::ReHomedRelationship { original_home_metadata_collection_id, .. })]
                if original_home_metadata_collection_id == "mc-local"
        ));
    }

    #[tokio::test]
    async fn test_purge_active_relationship_is_refused() {
        let f = fixture().await;
        let (_, _, relationship) = owned_asset(&f).await;

        let err = f.collection.purge_relationship(&user(), relationship.guid()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceNotDeleted);
        assert!(f.events.is_empty());
        f.collection.get_relationship(&user(), relationship.guid()).await.unwrap();

        f.collection.delete_relationship(&user(), relationship.guid()).await.unwrap();
        f.collection.purge_relationship(&user(), relationship.guid()).await.unwrap();
        assert!(f.collection.get_relationship(&user(), relationship.guid()).await.is_err());
    }
}
