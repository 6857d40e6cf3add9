use crate::model::{
    generate_guid, AttributeTypeDef, Classification, EntityDetail, EntityPropertyQuery,
    EntityProxy, EntitySummary, Guid, InstanceAuditHeader, InstanceHeader, InstanceProperties,
    InstancePropertyValue, InstanceProvenanceType, InstanceStatus, InstanceType, MatchCriteria,
    NewEntity, NewRelationship, PrimitiveValue, Relationship, RelationshipPropertyQuery,
    RelationshipQuery, SequencingOrder, TypeDef, TypeDefCategory, TypeDefGallery, UserContext,
    status_visible,
};
use crate::store::traits::{
    EntityStore, MetadataStore, RelationshipStore, StoreError, StoreResult, TypeDefStore,
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashSet;

/// Current version of an instance plus every version before it, oldest first
#[derive(Debug, Clone)]
struct Versions<T> {
    current: T,
    history: Vec<T>,
}

impl<T: Clone + InstanceAuditHeader> Versions<T> {
    fn new(instance: T) -> Self {
        Self {
            current: instance,
            history: Vec::new(),
        }
    }

    /// Apply `change` to a copy of the current version and make it current
    fn revise(&mut self, user_id: &str, change: impl FnOnce(&mut T)) -> T {
        let mut next = self.current.clone();
        change(&mut next);
        next.header_mut().touch(user_id);
        let prior = std::mem::replace(&mut self.current, next);
        self.history.push(prior);
        self.current.clone()
    }

    /// Current and historical versions alike
    fn each_mut(&mut self) -> impl Iterator<Item = &mut T> {
        std::iter::once(&mut self.current).chain(self.history.iter_mut())
    }

    /// Bring back the previous content under a new version number. Status is
    /// kept from the current version.
    fn undo(&mut self, user_id: &str) -> Option<T> {
        let mut previous = self.history.pop()?;
        let current = self.current.header();
        let (version, status, status_on_delete) =
            (current.version, current.status, current.status_on_delete);

        let header = previous.header_mut();
        header.version = version + 1;
        header.status = status;
        header.status_on_delete = status_on_delete;
        header.updated_by = Some(user_id.to_string());
        header.update_time = Some(Utc::now());
        self.current = previous;
        Some(self.current.clone())
    }

    fn as_of(&self, as_of_time: DateTime<Utc>) -> Option<&T> {
        std::iter::once(&self.current)
            .chain(self.history.iter().rev())
            .find(|version| effective_time(version.header()) <= as_of_time)
    }

    fn version_at(&self, as_of_time: Option<DateTime<Utc>>) -> Option<&T> {
        match as_of_time {
            Some(time) => self.as_of(time),
            None => Some(&self.current),
        }
    }
}

fn effective_time(header: &InstanceHeader) -> DateTime<Utc> {
    header.update_time.unwrap_or(header.create_time)
}

#[derive(Debug, Clone)]
enum EntityRecord {
    Stored(Versions<EntityDetail>),
    Proxy(EntityProxy),
}

#[derive(Debug, Default)]
struct StoreState {
    type_defs: IndexMap<Guid, TypeDef>,
    attribute_type_defs: IndexMap<Guid, AttributeTypeDef>,
    entities: IndexMap<Guid, EntityRecord>,
    relationships: IndexMap<Guid, Versions<Relationship>>,
}

impl StoreState {
    fn entity_versions(&self, guid: &str) -> StoreResult<&Versions<EntityDetail>> {
        match self.entities.get(guid) {
            Some(EntityRecord::Stored(versions)) => Ok(versions),
            Some(EntityRecord::Proxy(_)) => Err(StoreError::EntityProxyOnly { guid: guid.to_string() }),
            None => Err(StoreError::EntityNotKnown { guid: guid.to_string() }),
        }
    }

    fn entity_versions_mut(&mut self, guid: &str) -> StoreResult<&mut Versions<EntityDetail>> {
        match self.entities.get_mut(guid) {
            Some(EntityRecord::Stored(versions)) => Ok(versions),
            Some(EntityRecord::Proxy(_)) => Err(StoreError::EntityProxyOnly { guid: guid.to_string() }),
            None => Err(StoreError::EntityNotKnown { guid: guid.to_string() }),
        }
    }

    fn relationship_versions(&self, guid: &str) -> StoreResult<&Versions<Relationship>> {
        self.relationships
            .get(guid)
            .ok_or_else(|| StoreError::RelationshipNotKnown { guid: guid.to_string() })
    }

    fn relationship_versions_mut(&mut self, guid: &str) -> StoreResult<&mut Versions<Relationship>> {
        self.relationships
            .get_mut(guid)
            .ok_or_else(|| StoreError::RelationshipNotKnown { guid: guid.to_string() })
    }

    fn proxy_of(&self, guid: &str) -> StoreResult<EntityProxy> {
        match self.entities.get(guid) {
            Some(EntityRecord::Stored(versions)) => Ok(versions.current.proxy()),
            Some(EntityRecord::Proxy(proxy)) => Ok(proxy.clone()),
            None => Err(StoreError::EntityNotKnown { guid: guid.to_string() }),
        }
    }

    fn guid_in_use(&self, guid: &str) -> bool {
        self.entities.contains_key(guid) || self.relationships.contains_key(guid)
    }

    fn attached_relationships(&self, entity_guid: &str) -> Vec<Guid> {
        self.relationships
            .iter()
            .filter(|(_, versions)| versions.current.is_attached_to(entity_guid))
            .map(|(guid, _)| guid.clone())
            .collect()
    }

    /// Carry a re-identified type into every stored instance and version.
    /// Classifications are renamed when the type is a classification.
    fn relink_instances(&mut self, original: &TypeDef, renamed: &TypeDef) {
        let link = renamed.link();
        let relink = |header: &mut InstanceHeader, classifications: &mut Vec<Classification>| {
            header.instance_type.relink(&original.guid, &link);
            if original.category == TypeDefCategory::ClassificationDef {
                for classification in classifications.iter_mut().filter(|c| c.name == original.name) {
                    classification.name = renamed.name.clone();
                }
            }
        };

        for record in self.entities.values_mut() {
            match record {
                EntityRecord::Stored(versions) => {
                    for entity in versions.each_mut() {
                        relink(&mut entity.header, &mut entity.classifications);
                    }
                }
                EntityRecord::Proxy(proxy) => relink(&mut proxy.header, &mut proxy.classifications),
            }
        }
        for versions in self.relationships.values_mut() {
            for relationship in versions.each_mut() {
                relationship.header.instance_type.relink(&original.guid, &link);
                for proxy in [&mut relationship.entity_one_proxy, &mut relationship.entity_two_proxy] {
                    relink(&mut proxy.header, &mut proxy.classifications);
                }
            }
        }
    }

    /// Relationship with its end proxies brought up to date
    fn hydrate(&self, relationship: &Relationship) -> Relationship {
        let mut hydrated = relationship.clone();
        if let Ok(proxy) = self.proxy_of(relationship.end_one_guid()) {
            hydrated.entity_one_proxy = proxy;
        }
        if let Ok(proxy) = self.proxy_of(relationship.end_two_guid()) {
            hydrated.entity_two_proxy = proxy;
        }
        hydrated
    }
}

/// Reference storage engine holding everything in process memory.
///
/// Keeps every prior version of each instance so undo and as-of reads work.
/// Soft delete can be switched off to exercise the purge fallback.
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    soft_delete: bool,
    home: Option<(Guid, Option<String>)>,
    failure: RwLock<Option<String>>,
    denied_users: RwLock<HashSet<String>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            soft_delete: true,
            home: None,
            failure: RwLock::new(None),
            denied_users: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_soft_delete(mut self, soft_delete: bool) -> Self {
        self.soft_delete = soft_delete;
        self
    }

    /// Record this collection id on every instance the engine creates
    pub fn with_metadata_collection_id(mut self, metadata_collection_id: impl Into<Guid>, metadata_collection_name: Option<String>) -> Self {
        self.home = Some((metadata_collection_id.into(), metadata_collection_name));
        self
    }

    /// Make every subsequent call fail with a backend error
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    pub fn deny_user(&self, user_id: impl Into<String>) {
        self.denied_users.write().insert(user_id.into());
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.state.read().relationships.len()
    }

    fn check(&self, user: &UserContext) -> StoreResult<()> {
        if let Some(message) = self.failure.read().as_ref() {
            return Err(StoreError::Backend(anyhow!("{}", message)));
        }
        if self.denied_users.read().contains(user.id()) {
            return Err(StoreError::NotAuthorized {
                user_id: user.id().to_string(),
            });
        }
        Ok(())
    }

    fn new_header(&self, instance_type: InstanceType, status: InstanceStatus, user: &UserContext) -> InstanceHeader {
        let mut header = InstanceHeader::new(generate_guid(), instance_type, status, user.id());
        if let Some((metadata_collection_id, metadata_collection_name)) = &self.home {
            header.metadata_collection_id = Some(metadata_collection_id.clone());
            header.metadata_collection_name = metadata_collection_name.clone();
            header.instance_provenance_type = InstanceProvenanceType::LocalCohort;
        }
        header
    }

    fn not_supported(function: &str) -> StoreError {
        StoreError::FunctionNotSupported {
            function: function.to_string(),
        }
    }
}

fn is_of_type(instance_type: &InstanceType, type_guid: Option<&str>) -> bool {
    match type_guid {
        None => true,
        Some(guid) => {
            instance_type.type_def_guid == guid
                || instance_type
                    .type_def_super_types
                    .iter()
                    .any(|link| link.guid == guid)
        }
    }
}

/// String match values are anchored regular expressions; everything else
/// compares by value
fn value_matches(actual: &InstancePropertyValue, expected: &InstancePropertyValue) -> StoreResult<bool> {
    match expected {
        InstancePropertyValue::Primitive {
            value: PrimitiveValue::String(pattern),
        } => {
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|err| StoreError::Backend(anyhow!("invalid match pattern {}: {}", pattern, err)))?;
            Ok(regex.is_match(&actual.render()))
        }
        other => Ok(actual == other),
    }
}

fn properties_match(
    properties: &InstanceProperties,
    match_properties: Option<&InstanceProperties>,
    criteria: MatchCriteria,
) -> StoreResult<bool> {
    let Some(match_properties) = match_properties.filter(|m| !m.is_empty()) else {
        return Ok(true);
    };
    let mut outcomes = Vec::with_capacity(match_properties.len());
    for (name, expected) in match_properties.iter() {
        let outcome = match properties.get(name) {
            Some(actual) => value_matches(actual, expected)?,
            None => false,
        };
        outcomes.push(outcome);
    }
    Ok(criteria.evaluate(&outcomes))
}

fn has_classifications(entity: &EntityDetail, names: &[String]) -> bool {
    names
        .iter()
        .all(|name| entity.classification(name).is_some())
}

fn sequence<T, F>(items: &mut [T], order: SequencingOrder, property: Option<&str>, properties: F)
where
    T: InstanceAuditHeader,
    F: Fn(&T) -> &InstanceProperties,
{
    match order {
        SequencingOrder::Any => {}
        SequencingOrder::Guid => items.sort_by(|a, b| a.guid().cmp(b.guid())),
        SequencingOrder::CreationDateRecent => {
            items.sort_by(|a, b| b.header().create_time.cmp(&a.header().create_time))
        }
        SequencingOrder::CreationDateOldest => {
            items.sort_by(|a, b| a.header().create_time.cmp(&b.header().create_time))
        }
        SequencingOrder::LastUpdateRecent => {
            items.sort_by(|a, b| effective_time(b.header()).cmp(&effective_time(a.header())))
        }
        SequencingOrder::LastUpdateOldest => {
            items.sort_by(|a, b| effective_time(a.header()).cmp(&effective_time(b.header())))
        }
        SequencingOrder::PropertyAscending | SequencingOrder::PropertyDescending => {
            let key = |item: &T| {
                property
                    .and_then(|name| properties(item).get(name))
                    .map(InstancePropertyValue::render)
            };
            items.sort_by_key(key);
            if order == SequencingOrder::PropertyDescending {
                items.reverse();
            }
        }
    }
}

fn mark_deleted(header: &mut InstanceHeader) {
    header.status_on_delete = Some(header.status);
    header.status = InstanceStatus::Deleted;
}

impl InMemoryStore {
    fn find_entities<P>(&self, query: &EntityPropertyQuery, mut predicate: P) -> StoreResult<Vec<EntityDetail>>
    where
        P: FnMut(&EntityDetail) -> StoreResult<bool>,
    {
        let state = self.state.read();
        let mut found = Vec::new();
        for record in state.entities.values() {
            let EntityRecord::Stored(versions) = record else {
                continue;
            };
            let Some(entity) = versions.version_at(query.as_of_time) else {
                continue;
            };
            if !is_of_type(&entity.header.instance_type, query.entity_type_guid.as_deref())
                || !status_visible(&query.limit_results_by_status, entity.header.status)
                || !has_classifications(entity, &query.limit_results_by_classification)
            {
                continue;
            }
            if predicate(entity)? {
                found.push(entity.clone());
            }
        }
        sequence(
            &mut found,
            query.sequencing_order,
            query.sequencing_property.as_deref(),
            |entity: &EntityDetail| &entity.properties,
        );
        Ok(query.paging.apply(found))
    }
}

#[async_trait::async_trait]
impl TypeDefStore for InMemoryStore {
    async fn get_all_types(&self, user: &UserContext) -> StoreResult<TypeDefGallery> {
        self.check(user)?;
        let state = self.state.read();
        Ok(TypeDefGallery {
            attribute_type_defs: state.attribute_type_defs.values().cloned().collect(),
            type_defs: state.type_defs.values().cloned().collect(),
        })
    }

    async fn add_type_def(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .type_defs
            .insert(type_def.guid.clone(), type_def.clone());
        Ok(())
    }

    async fn add_attribute_type_def(&self, user: &UserContext, attribute_type_def: &AttributeTypeDef) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .attribute_type_defs
            .insert(attribute_type_def.guid.clone(), attribute_type_def.clone());
        Ok(())
    }

    async fn update_type_def(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        match state.type_defs.get_mut(&type_def.guid) {
            Some(existing) => {
                *existing = type_def.clone();
                Ok(())
            }
            None => Err(StoreError::TypeNotKnown { guid: type_def.guid.clone() }),
        }
    }

    async fn update_attribute_type_def(&self, user: &UserContext, attribute_type_def: &AttributeTypeDef) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        match state.attribute_type_defs.get_mut(&attribute_type_def.guid) {
            Some(existing) => {
                *existing = attribute_type_def.clone();
                Ok(())
            }
            None => Err(StoreError::TypeNotKnown {
                guid: attribute_type_def.guid.clone(),
            }),
        }
    }

    async fn delete_type_def(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .type_defs
            .shift_remove(guid)
            .map(|_| ())
            .ok_or_else(|| StoreError::TypeNotKnown { guid: guid.to_string() })
    }

    async fn delete_attribute_type_def(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .attribute_type_defs
            .shift_remove(guid)
            .map(|_| ())
            .ok_or_else(|| StoreError::TypeNotKnown { guid: guid.to_string() })
    }

    async fn re_identify_type_def(&self, user: &UserContext, original_guid: &str, type_def: &TypeDef) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        let original = state
            .type_defs
            .shift_remove(original_guid)
            .ok_or_else(|| StoreError::TypeNotKnown {
                guid: original_guid.to_string(),
            })?;
        let link = type_def.link();
        for other in state.type_defs.values_mut() {
            other.relink(original_guid, &link);
        }
        state.type_defs.insert(type_def.guid.clone(), type_def.clone());
        state.relink_instances(&original, type_def);
        Ok(())
    }

    async fn re_identify_attribute_type_def(
        &self,
        user: &UserContext,
        original_guid: &str,
        attribute_type_def: &AttributeTypeDef,
    ) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        if state.attribute_type_defs.shift_remove(original_guid).is_none() {
            return Err(StoreError::TypeNotKnown {
                guid: original_guid.to_string(),
            });
        }
        for type_def in state.type_defs.values_mut() {
            type_def.relink_attribute_type(original_guid, attribute_type_def);
        }
        state
            .attribute_type_defs
            .insert(attribute_type_def.guid.clone(), attribute_type_def.clone());
        Ok(())
    }

    async fn count_instances_of_type(&self, user: &UserContext, type_def: &TypeDef) -> StoreResult<usize> {
        self.check(user)?;
        let state = self.state.read();
        let count = match type_def.category {
            TypeDefCategory::ClassificationDef => state
                .entities
                .values()
                .filter(|record| match record {
                    EntityRecord::Stored(versions) => versions.current.classification(&type_def.name).is_some(),
                    EntityRecord::Proxy(proxy) => proxy.classifications.iter().any(|c| c.name == type_def.name),
                })
                .count(),
            _ => {
                let entities = state
                    .entities
                    .values()
                    .filter(|record| {
                        let header = match record {
                            EntityRecord::Stored(versions) => &versions.current.header,
                            EntityRecord::Proxy(proxy) => &proxy.header,
                        };
                        header.instance_type.type_def_guid == type_def.guid
                    })
                    .count();
                let relationships = state
                    .relationships
                    .values()
                    .filter(|versions| versions.current.header.instance_type.type_def_guid == type_def.guid)
                    .count();
                entities + relationships
            }
        };
        Ok(count)
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    async fn get_entity_summary(&self, user: &UserContext, guid: &str) -> StoreResult<EntitySummary> {
        self.check(user)?;
        match self.state.read().entities.get(guid) {
            Some(EntityRecord::Stored(versions)) => Ok(versions.current.summary()),
            Some(EntityRecord::Proxy(proxy)) => Ok(EntitySummary {
                header: proxy.header.clone(),
                classifications: proxy.classifications.clone(),
            }),
            None => Err(StoreError::EntityNotKnown { guid: guid.to_string() }),
        }
    }

    async fn get_entity_detail(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        Ok(self.state.read().entity_versions(guid)?.current.clone())
    }

    async fn get_entity_detail_as_of(&self, user: &UserContext, guid: &str, as_of_time: DateTime<Utc>) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let state = self.state.read();
        state
            .entity_versions(guid)?
            .as_of(as_of_time)
            .cloned()
            .ok_or_else(|| StoreError::EntityNotKnown { guid: guid.to_string() })
    }

    async fn get_entity_proxy(&self, user: &UserContext, guid: &str) -> StoreResult<EntityProxy> {
        self.check(user)?;
        self.state.read().proxy_of(guid)
    }

    async fn get_relationships_for_entity(
        &self,
        user: &UserContext,
        entity_guid: &str,
        query: &RelationshipQuery,
    ) -> StoreResult<Vec<Relationship>> {
        self.check(user)?;
        let state = self.state.read();
        if !state.entities.contains_key(entity_guid) {
            return Err(StoreError::EntityNotKnown {
                guid: entity_guid.to_string(),
            });
        }

        let mut found: Vec<Relationship> = state
            .relationships
            .values()
            .filter_map(|versions| versions.version_at(query.as_of_time))
            .filter(|relationship| {
                relationship.is_attached_to(entity_guid)
                    && is_of_type(
                        &relationship.header.instance_type,
                        query.relationship_type_guid.as_deref(),
                    )
                    && status_visible(&query.limit_results_by_status, relationship.header.status)
            })
            .map(|relationship| state.hydrate(relationship))
            .collect();
        sequence(&mut found, query.sequencing_order, None, |r: &Relationship| &r.properties);
        Ok(query.paging.apply(found))
    }

    async fn find_entities_by_property(&self, user: &UserContext, query: &EntityPropertyQuery) -> StoreResult<Vec<EntityDetail>> {
        self.check(user)?;
        self.find_entities(query, |entity| {
            properties_match(
                &entity.properties,
                query.match_properties.as_ref(),
                query.match_criteria,
            )
        })
    }

    async fn find_entities_by_property_value(
        &self,
        user: &UserContext,
        search_criteria: &str,
        query: &EntityPropertyQuery,
    ) -> StoreResult<Vec<EntityDetail>> {
        self.check(user)?;
        let regex = Regex::new(search_criteria)
            .map_err(|err| StoreError::Backend(anyhow!("invalid search criteria: {}", err)))?;
        self.find_entities(query, |entity| {
            Ok(entity
                .properties
                .iter()
                .any(|(_, value)| regex.is_match(&value.render())))
        })
    }

    async fn find_entities_by_classification(
        &self,
        user: &UserContext,
        classification_name: &str,
        query: &EntityPropertyQuery,
    ) -> StoreResult<Vec<EntityDetail>> {
        self.check(user)?;
        self.find_entities(query, |entity| match entity.classification(classification_name) {
            Some(classification) => properties_match(
                &classification.properties,
                query.match_properties.as_ref(),
                query.match_criteria,
            ),
            None => Ok(false),
        })
    }

    async fn add_entity(&self, user: &UserContext, entity: NewEntity) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let detail = EntityDetail {
            header: self.new_header(entity.instance_type, entity.initial_status, user),
            classifications: entity.classifications,
            properties: entity.properties,
        };
        self.state.write().entities.insert(
            detail.header.guid.clone(),
            EntityRecord::Stored(Versions::new(detail.clone())),
        );
        Ok(detail)
    }

    async fn add_entity_proxy(&self, user: &UserContext, proxy: EntityProxy) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .entities
            .entry(proxy.header.guid.clone())
            .or_insert(EntityRecord::Proxy(proxy));
        Ok(())
    }

    async fn update_entity_status(&self, user: &UserContext, guid: &str, status: InstanceStatus) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state
            .entity_versions_mut(guid)?
            .revise(user.id(), |entity| entity.header.status = status))
    }

    async fn update_entity_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state
            .entity_versions_mut(guid)?
            .revise(user.id(), |entity| entity.properties = properties))
    }

    async fn undo_entity_update(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        state
            .entity_versions_mut(guid)?
            .undo(user.id())
            .ok_or_else(|| StoreError::NoPriorVersion { guid: guid.to_string() })
    }

    async fn delete_entity(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        if !self.soft_delete {
            return Err(Self::not_supported("delete_entity"));
        }
        let mut state = self.state.write();
        let deleted = state
            .entity_versions_mut(guid)?
            .revise(user.id(), |entity| mark_deleted(&mut entity.header));

        for relationship_guid in state.attached_relationships(guid) {
            if let Some(versions) = state.relationships.get_mut(&relationship_guid) {
                if versions.current.header.status != InstanceStatus::Deleted {
                    versions.revise(user.id(), |relationship| mark_deleted(&mut relationship.header));
                }
            }
        }
        Ok(deleted)
    }

    async fn purge_entity(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        let status = match state.entities.get(guid) {
            Some(EntityRecord::Stored(versions)) => versions.current.header.status,
            Some(EntityRecord::Proxy(proxy)) => proxy.header.status,
            None => return Err(StoreError::EntityNotKnown { guid: guid.to_string() }),
        };
        if self.soft_delete && status != InstanceStatus::Deleted {
            return Err(StoreError::NotDeleted { guid: guid.to_string() });
        }

        for relationship_guid in state.attached_relationships(guid) {
            state.relationships.shift_remove(&relationship_guid);
        }
        state.entities.shift_remove(guid);
        Ok(())
    }

    async fn restore_entity(&self, user: &UserContext, guid: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        let versions = state.entity_versions_mut(guid)?;
        if versions.current.header.status != InstanceStatus::Deleted {
            return Err(StoreError::NotDeleted { guid: guid.to_string() });
        }
        Ok(versions.revise(user.id(), |entity| {
            entity.header.status = entity
                .header
                .status_on_delete
                .take()
                .unwrap_or(InstanceStatus::Active);
        }))
    }

    async fn classify_entity(&self, user: &UserContext, guid: &str, classification: Classification) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state.entity_versions_mut(guid)?.revise(user.id(), |entity| {
            entity.classifications.retain(|c| c.name != classification.name);
            entity.classifications.push(classification);
        }))
    }

    async fn declassify_entity(&self, user: &UserContext, guid: &str, classification_name: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state.entity_versions_mut(guid)?.revise(user.id(), |entity| {
            entity.classifications.retain(|c| c.name != classification_name)
        }))
    }

    async fn update_entity_classification(
        &self,
        user: &UserContext,
        guid: &str,
        classification_name: &str,
        properties: InstanceProperties,
    ) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state.entity_versions_mut(guid)?.revise(user.id(), |entity| {
            if let Some(classification) = entity
                .classifications
                .iter_mut()
                .find(|c| c.name == classification_name)
            {
                classification.properties = properties;
                classification.version += 1;
                classification.updated_by = Some(user.id().to_string());
                classification.update_time = Some(Utc::now());
            }
        }))
    }

    async fn re_identify_entity(&self, user: &UserContext, guid: &str, new_guid: &str) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        if state.guid_in_use(new_guid) {
            return Err(StoreError::GuidInUse { guid: new_guid.to_string() });
        }
        state.entity_versions(guid)?;

        let Some(EntityRecord::Stored(mut versions)) = state.entities.shift_remove(guid) else {
            return Err(StoreError::EntityNotKnown { guid: guid.to_string() });
        };
        for prior in versions.history.iter_mut() {
            prior.header.guid = new_guid.to_string();
        }
        let renamed = versions.revise(user.id(), |entity| entity.header.guid = new_guid.to_string());
        state
            .entities
            .insert(new_guid.to_string(), EntityRecord::Stored(versions));

        for versions in state.relationships.values_mut() {
            for relationship in std::iter::once(&mut versions.current).chain(versions.history.iter_mut()) {
                for end in [&mut relationship.entity_one_proxy, &mut relationship.entity_two_proxy] {
                    if end.header.guid == guid {
                        end.header.guid = new_guid.to_string();
                    }
                }
            }
        }
        Ok(renamed)
    }

    async fn re_type_entity(&self, user: &UserContext, guid: &str, new_type: InstanceType) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state
            .entity_versions_mut(guid)?
            .revise(user.id(), |entity| entity.header.instance_type = new_type))
    }

    async fn re_home_entity(
        &self,
        user: &UserContext,
        guid: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> StoreResult<EntityDetail> {
        self.check(user)?;
        let mut state = self.state.write();
        Ok(state.entity_versions_mut(guid)?.revise(user.id(), |entity| {
            entity.header.metadata_collection_id = Some(new_home_metadata_collection_id.to_string());
            entity.header.metadata_collection_name = new_home_metadata_collection_name.map(str::to_string);
        }))
    }

    async fn save_entity_reference_copy(&self, user: &UserContext, entity: EntityDetail) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        let guid = entity.header.guid.clone();
        match state.entities.get_mut(&guid) {
            Some(EntityRecord::Stored(versions)) => {
                let prior = std::mem::replace(&mut versions.current, entity);
                versions.history.push(prior);
            }
            _ => {
                state
                    .entities
                    .insert(guid, EntityRecord::Stored(Versions::new(entity)));
            }
        }
        Ok(())
    }

    async fn purge_entity_reference_copy(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .entities
            .shift_remove(guid)
            .map(|_| ())
            .ok_or_else(|| StoreError::EntityNotKnown { guid: guid.to_string() })
    }
}

#[async_trait::async_trait]
impl RelationshipStore for InMemoryStore {
    async fn get_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship> {
        self.check(user)?;
        let state = self.state.read();
        let versions = state.relationship_versions(guid)?;
        Ok(state.hydrate(&versions.current))
    }

    async fn get_relationship_as_of(&self, user: &UserContext, guid: &str, as_of_time: DateTime<Utc>) -> StoreResult<Relationship> {
        self.check(user)?;
        let state = self.state.read();
        state
            .relationship_versions(guid)?
            .as_of(as_of_time)
            .map(|relationship| state.hydrate(relationship))
            .ok_or_else(|| StoreError::RelationshipNotKnown { guid: guid.to_string() })
    }

    async fn find_relationships_by_property(
        &self,
        user: &UserContext,
        query: &RelationshipPropertyQuery,
    ) -> StoreResult<Vec<Relationship>> {
        self.check(user)?;
        let state = self.state.read();
        let mut found = Vec::new();
        for versions in state.relationships.values() {
            let Some(relationship) = versions.version_at(query.as_of_time) else {
                continue;
            };
            if is_of_type(
                &relationship.header.instance_type,
                query.relationship_type_guid.as_deref(),
            ) && status_visible(&query.limit_results_by_status, relationship.header.status)
                && properties_match(
                    &relationship.properties,
                    query.match_properties.as_ref(),
                    query.match_criteria,
                )?
            {
                found.push(state.hydrate(relationship));
            }
        }
        Ok(query.paging.apply(found))
    }

    async fn add_relationship(&self, user: &UserContext, relationship: NewRelationship) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let entity_one_proxy = state.proxy_of(&relationship.entity_one_guid)?;
        let entity_two_proxy = state.proxy_of(&relationship.entity_two_guid)?;
        let created = Relationship {
            header: self.new_header(relationship.instance_type, relationship.initial_status, user),
            properties: relationship.properties,
            entity_one_proxy,
            entity_two_proxy,
        };
        state
            .relationships
            .insert(created.header.guid.clone(), Versions::new(created.clone()));
        Ok(created)
    }

    async fn update_relationship_status(&self, user: &UserContext, guid: &str, status: InstanceStatus) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let updated = state
            .relationship_versions_mut(guid)?
            .revise(user.id(), |relationship| relationship.header.status = status);
        Ok(state.hydrate(&updated))
    }

    async fn update_relationship_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let updated = state
            .relationship_versions_mut(guid)?
            .revise(user.id(), |relationship| relationship.properties = properties);
        Ok(state.hydrate(&updated))
    }

    async fn undo_relationship_update(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let restored = state
            .relationship_versions_mut(guid)?
            .undo(user.id())
            .ok_or_else(|| StoreError::NoPriorVersion { guid: guid.to_string() })?;
        Ok(state.hydrate(&restored))
    }

    async fn delete_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship> {
        self.check(user)?;
        if !self.soft_delete {
            return Err(Self::not_supported("delete_relationship"));
        }
        let mut state = self.state.write();
        let deleted = state
            .relationship_versions_mut(guid)?
            .revise(user.id(), |relationship| mark_deleted(&mut relationship.header));
        Ok(state.hydrate(&deleted))
    }

    async fn purge_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        let status = state.relationship_versions(guid)?.current.header.status;
        if self.soft_delete && status != InstanceStatus::Deleted {
            return Err(StoreError::NotDeleted { guid: guid.to_string() });
        }
        state.relationships.shift_remove(guid);
        Ok(())
    }

    async fn restore_relationship(&self, user: &UserContext, guid: &str) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let versions = state.relationship_versions_mut(guid)?;
        if versions.current.header.status != InstanceStatus::Deleted {
            return Err(StoreError::NotDeleted { guid: guid.to_string() });
        }
        let restored = versions.revise(user.id(), |relationship| {
            relationship.header.status = relationship
                .header
                .status_on_delete
                .take()
                .unwrap_or(InstanceStatus::Active);
        });
        Ok(state.hydrate(&restored))
    }

    async fn re_identify_relationship(&self, user: &UserContext, guid: &str, new_guid: &str) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        if state.guid_in_use(new_guid) {
            return Err(StoreError::GuidInUse { guid: new_guid.to_string() });
        }
        let mut versions = state
            .relationships
            .shift_remove(guid)
            .ok_or_else(|| StoreError::RelationshipNotKnown { guid: guid.to_string() })?;
        for prior in versions.history.iter_mut() {
            prior.header.guid = new_guid.to_string();
        }
        let renamed = versions.revise(user.id(), |relationship| relationship.header.guid = new_guid.to_string());
        state.relationships.insert(new_guid.to_string(), versions);
        Ok(state.hydrate(&renamed))
    }

    async fn re_type_relationship(&self, user: &UserContext, guid: &str, new_type: InstanceType) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let retyped = state
            .relationship_versions_mut(guid)?
            .revise(user.id(), |relationship| relationship.header.instance_type = new_type);
        Ok(state.hydrate(&retyped))
    }

    async fn re_home_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        new_home_metadata_collection_id: &str,
        new_home_metadata_collection_name: Option<&str>,
    ) -> StoreResult<Relationship> {
        self.check(user)?;
        let mut state = self.state.write();
        let rehomed = state.relationship_versions_mut(guid)?.revise(user.id(), |relationship| {
            relationship.header.metadata_collection_id = Some(new_home_metadata_collection_id.to_string());
            relationship.header.metadata_collection_name = new_home_metadata_collection_name.map(str::to_string);
        });
        Ok(state.hydrate(&rehomed))
    }

    async fn save_relationship_reference_copy(&self, user: &UserContext, relationship: Relationship) -> StoreResult<()> {
        self.check(user)?;
        let mut state = self.state.write();
        for proxy in [&relationship.entity_one_proxy, &relationship.entity_two_proxy] {
            state
                .entities
                .entry(proxy.header.guid.clone())
                .or_insert_with(|| EntityRecord::Proxy(proxy.clone()));
        }
        let guid = relationship.header.guid.clone();
        match state.relationships.get_mut(&guid) {
            Some(versions) => {
                let prior = std::mem::replace(&mut versions.current, relationship);
                versions.history.push(prior);
            }
            None => {
                state.relationships.insert(guid, Versions::new(relationship));
            }
        }
        Ok(())
    }

    async fn purge_relationship_reference_copy(&self, user: &UserContext, guid: &str) -> StoreResult<()> {
        self.check(user)?;
        self.state
            .write()
            .relationships
            .shift_remove(guid)
            .map(|_| ())
            .ok_or_else(|| StoreError::RelationshipNotKnown { guid: guid.to_string() })
    }
}

impl MetadataStore for InMemoryStore {
    fn supports_soft_delete(&self) -> bool {
        self.soft_delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Paging, TypeDefLink};

    fn user() -> UserContext {
        UserContext::new("tester")
    }

    fn asset_type() -> InstanceType {
        InstanceType {
            type_def_category: TypeDefCategory::EntityDef,
            type_def_guid: "T1".to_string(),
            type_def_name: "Asset".to_string(),
            type_def_version: 1,
            type_def_super_types: vec![TypeDefLink::new("T0", "Referenceable")],
            valid_status_list: vec![InstanceStatus::Active, InstanceStatus::Deleted],
            valid_instance_properties: vec!["qualifiedName".to_string()],
        }
    }

    fn link_type() -> InstanceType {
        InstanceType {
            type_def_category: TypeDefCategory::RelationshipDef,
            type_def_guid: "R1".to_string(),
            type_def_name: "AssetLink".to_string(),
            type_def_version: 1,
            type_def_super_types: Vec::new(),
            valid_status_list: vec![InstanceStatus::Active, InstanceStatus::Deleted],
            valid_instance_properties: Vec::new(),
        }
    }

    fn new_asset(name: &str) -> NewEntity {
        NewEntity {
            instance_type: asset_type(),
            properties: InstanceProperties::new().with_string("qualifiedName", name),
            classifications: Vec::new(),
            initial_status: InstanceStatus::Active,
        }
    }

    async fn link(store: &InMemoryStore, one: &str, two: &str) -> Relationship {
        store
            .add_relationship(
                &user(),
                NewRelationship {
                    instance_type: link_type(),
                    properties: InstanceProperties::new(),
                    entity_one_guid: one.to_string(),
                    entity_two_guid: two.to_string(),
                    initial_status: InstanceStatus::Active,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_and_undo_keep_history() {
        let store = InMemoryStore::new();
        let created = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        assert!(created.header.metadata_collection_id.is_none());

        let guid = created.header.guid.clone();
        let updated = store
            .update_entity_properties(&user(), &guid, InstanceProperties::new().with_string("qualifiedName", "a2"))
            .await
            .unwrap();
        assert_eq!(updated.header.version, 2);

        let undone = store.undo_entity_update(&user(), &guid).await.unwrap();
        assert_eq!(undone.header.version, 3);
        assert_eq!(undone.properties, created.properties);

        let err = store.undo_entity_update(&user(), &guid).await.unwrap_err();
        assert!(matches!(err, StoreError::NoPriorVersion { .. }));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_purge_requires_deleted() {
        let store = InMemoryStore::new();
        let a = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        let b = store.add_entity(&user(), new_asset("b1")).await.unwrap();
        let relationship = link(&store, a.guid(), b.guid()).await;

        let err = store.purge_entity(&user(), a.guid()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotDeleted { .. }));

        let deleted = store.delete_entity(&user(), a.guid()).await.unwrap();
        assert_eq!(deleted.header.status, InstanceStatus::Deleted);
        assert_eq!(deleted.header.status_on_delete, Some(InstanceStatus::Active));
        let cascaded = store.get_relationship(&user(), relationship.guid()).await.unwrap();
        assert_eq!(cascaded.header.status, InstanceStatus::Deleted);

        store.purge_entity(&user(), a.guid()).await.unwrap();
        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.relationship_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_unsupported_without_soft_delete() {
        let store = InMemoryStore::new().with_soft_delete(false);
        let a = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        let err = store.delete_entity(&user(), a.guid()).await.unwrap_err();
        assert!(matches!(err, StoreError::FunctionNotSupported { .. }));
        store.purge_entity(&user(), a.guid()).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_returns_prior_status() {
        let store = InMemoryStore::new();
        let a = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        store.delete_entity(&user(), a.guid()).await.unwrap();
        let restored = store.restore_entity(&user(), a.guid()).await.unwrap();
        assert_eq!(restored.header.status, InstanceStatus::Active);
        assert!(restored.header.status_on_delete.is_none());
        assert_eq!(restored.properties, a.properties);

        let err = store.restore_entity(&user(), a.guid()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotDeleted { .. }));
    }

    #[tokio::test]
    async fn test_find_matches_regex_by_super_type() {
        let store = InMemoryStore::new();
        store.add_entity(&user(), new_asset("a1")).await.unwrap();
        store.add_entity(&user(), new_asset("a2")).await.unwrap();
        store.add_entity(&user(), new_asset("b1")).await.unwrap();

        let query = EntityPropertyQuery::for_type("T0").matching(
            InstanceProperties::new().with_string("qualifiedName", "a.*"),
            MatchCriteria::All,
        );
        let found = store.find_entities_by_property(&user(), &query).await.unwrap();
        assert_eq!(found.len(), 2);

        let none = EntityPropertyQuery::for_type("T1").matching(
            InstanceProperties::new().with_string("qualifiedName", "a.*"),
            MatchCriteria::None,
        );
        assert_eq!(store.find_entities_by_property(&user(), &none).await.unwrap().len(), 1);

        let paged = EntityPropertyQuery::for_type("T1").with_paging(Paging::first(2));
        assert_eq!(store.find_entities_by_property(&user(), &paged).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_proxy_only_entities() {
        let store = InMemoryStore::new();
        let remote = EntityDetail {
            header: InstanceHeader::new("remote-1".to_string(), asset_type(), InstanceStatus::Active, "peer"),
            classifications: Vec::new(),
            properties: InstanceProperties::new().with_string("qualifiedName", "r1"),
        };
        store.add_entity_proxy(&user(), remote.proxy()).await.unwrap();

        let err = store.get_entity_detail(&user(), "remote-1").await.unwrap_err();
        assert!(matches!(err, StoreError::EntityProxyOnly { .. }));
        assert!(store.get_entity_summary(&user(), "remote-1").await.is_ok());

        let local = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        let relationship = link(&store, local.guid(), "remote-1").await;
        assert_eq!(relationship.end_two_guid(), "remote-1");
    }

    #[tokio::test]
    async fn test_re_identify_moves_relationship_ends() {
        let store = InMemoryStore::new();
        let a = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        let b = store.add_entity(&user(), new_asset("b1")).await.unwrap();
        let relationship = link(&store, a.guid(), b.guid()).await;

        let err = store.re_identify_entity(&user(), a.guid(), b.guid()).await.unwrap_err();
        assert!(matches!(err, StoreError::GuidInUse { .. }));

        let renamed = store.re_identify_entity(&user(), a.guid(), "a-new").await.unwrap();
        assert_eq!(renamed.guid(), "a-new");
        let moved = store.get_relationship(&user(), relationship.guid()).await.unwrap();
        assert_eq!(moved.end_one_guid(), "a-new");
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryStore::new();
        store.deny_user("mallory");
        let err = store
            .get_entity_detail(&UserContext::new("mallory"), "e1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAuthorized { .. }));

        store.fail_with("disk on fire");
        let err = store.get_entity_detail(&user(), "e1").await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        store.recover();
        assert!(matches!(
            store.get_entity_detail(&user(), "e1").await.unwrap_err(),
            StoreError::EntityNotKnown { .. }
        ));
    }

    #[tokio::test]
    async fn test_records_home_when_configured() {
        let store = InMemoryStore::new().with_metadata_collection_id("mc-1", Some("local".to_string()));
        let created = store.add_entity(&user(), new_asset("a1")).await.unwrap();
        assert_eq!(created.header.metadata_collection_id.as_deref(), Some("mc-1"));
        assert_eq!(created.header.instance_provenance_type, InstanceProvenanceType::LocalCohort);
    }
}
