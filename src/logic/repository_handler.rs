use crate::error::{OmrsError, OmrsResult};
use crate::logic::collection::{LocalMetadataCollection, Removal};
use crate::logic::validator::exact_match_pattern;
use crate::model::{
    Classification, EntityDetail, EntityPropertyQuery, Guid, InstanceAuditHeader,
    InstanceProperties, InstanceStatus, MatchCriteria, Paging, Relationship, RelationshipQuery,
    UserContext,
};
use crate::store::MetadataStore;
use std::sync::Arc;

/// Relationships inspected before deciding an entity is unused
pub const LAST_USE_PAGE_SIZE: usize = 5;
/// Two results are enough to prove a name is ambiguous
pub const UNIQUE_NAME_PAGE_SIZE: usize = 2;
/// Page used when walking the relationships of an anchor
pub const RELATIONSHIP_PAGE_SIZE: usize = 100;

/// Dependent entity plus the relationship that links it to its anchor
#[derive(Debug, Clone)]
pub struct AttachedEntity {
    pub entity_type_guid: Guid,
    pub properties: InstanceProperties,
    pub classifications: Vec<Classification>,
    pub relationship_type_guid: Guid,
    pub relationship_properties: InstanceProperties,
}

/// Match properties that find `name` exactly in any of `property_names`
pub fn exact_name_properties(name: &str, property_names: &[&str]) -> InstanceProperties {
    property_names
        .iter()
        .fold(InstanceProperties::new(), |properties, property_name| {
            properties.with(*property_name, exact_match_pattern(name))
        })
}

/// Anchor-oriented orchestration over the local metadata collection.
///
/// Domain services use these helpers to manage dependent entities and
/// relationships that must stay unique for an anchor.
pub struct RepositoryHandler<S: MetadataStore> {
    collection: Arc<LocalMetadataCollection<S>>,
}

impl<S: MetadataStore> Clone for RepositoryHandler<S> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}

impl<S: MetadataStore> RepositoryHandler<S> {
    pub fn new(collection: Arc<LocalMetadataCollection<S>>) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &Arc<LocalMetadataCollection<S>> {
        &self.collection
    }

    /// Attach the expected type to a not-found error
    fn expecting(error: OmrsError, type_name: &str) -> OmrsError {
        match error {
            OmrsError::InstanceNotKnown { guid, method, .. } => OmrsError::InstanceNotKnown {
                guid,
                type_name: type_name.to_string(),
                method,
            },
            other => other,
        }
    }

    fn check_type(&self, instance: &impl InstanceAuditHeader, parameter: &str, type_name: &str, method: &str) -> OmrsResult<()> {
        if self.collection.registry().is_type_of(instance.type_name(), type_name) {
            Ok(())
        } else {
            Err(OmrsError::invalid_parameter(
                parameter,
                method,
                format!("{} is a {}, not a {}", instance.guid(), instance.type_name(), type_name),
            ))
        }
    }

    async fn typed_entity(
        &self,
        user: &UserContext,
        guid: &str,
        parameter: &str,
        type_name: &str,
        method: &str,
    ) -> OmrsResult<EntityDetail> {
        let entity = self
            .collection
            .get_entity_detail(user, guid)
            .await
            .map_err(|e| Self::expecting(e, type_name))?;
        self.check_type(&entity, parameter, type_name, method)?;
        Ok(entity)
    }

    async fn typed_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        type_name: &str,
        method: &str,
    ) -> OmrsResult<Relationship> {
        let relationship = self
            .collection
            .get_relationship(user, guid)
            .await
            .map_err(|e| Self::expecting(e, type_name))?;
        self.check_type(&relationship, "relationship_guid", type_name, method)?;
        Ok(relationship)
    }

    async fn relationships_of_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        relationship_type_guid: &str,
        paging: Paging,
    ) -> OmrsResult<Vec<Relationship>> {
        self.collection
            .get_relationships_for_entity(
                user,
                anchor_guid,
                RelationshipQuery::of_type(relationship_type_guid).with_paging(paging),
            )
            .await
    }

    // entities

    /// Fails with `InstanceNotKnown` unless the entity exists with the
    /// expected type
    pub async fn validate_entity_guid(&self, user: &UserContext, guid: &str, entity_type_name: &str) -> OmrsResult<()> {
        self.typed_entity(user, guid, "guid", entity_type_name, "validate_entity_guid")
            .await
            .map(|_| ())
    }

    pub async fn is_entity_known(
        &self,
        user: &UserContext,
        guid: &str,
        entity_type_name: &str,
    ) -> OmrsResult<Option<EntityDetail>> {
        match self.collection.is_entity_known(user, guid).await? {
            Some(entity) => {
                self.check_type(&entity, "guid", entity_type_name, "is_entity_known")?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    pub async fn get_entity_by_guid(&self, user: &UserContext, guid: &str, entity_type_name: &str) -> OmrsResult<EntityDetail> {
        self.typed_entity(user, guid, "guid", entity_type_name, "get_entity_by_guid")
            .await
    }

    /// Returns the new entity's GUID
    pub async fn create_entity(
        &self,
        user: &UserContext,
        entity_type_guid: &str,
        properties: InstanceProperties,
        classifications: Vec<Classification>,
    ) -> OmrsResult<Guid> {
        let entity = self
            .collection
            .add_entity(user, entity_type_guid, properties, classifications, None)
            .await?;
        Ok(entity.header.guid)
    }

    /// Replace the entity's properties; unchanged properties leave the
    /// entity (and its version) untouched
    pub async fn update_entity(
        &self,
        user: &UserContext,
        guid: &str,
        entity_type_name: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<EntityDetail> {
        let current = self
            .typed_entity(user, guid, "guid", entity_type_name, "update_entity")
            .await?;
        if current.properties == properties {
            log::debug!("Properties of {} unchanged; skipping update", guid);
            return Ok(current);
        }
        self.collection
            .update_entity_properties(user, guid, properties)
            .await
    }

    /// Delete the entity. When `validating_property` is given the entity's
    /// property of that name must hold the given value.
    pub async fn delete_entity(
        &self,
        user: &UserContext,
        guid: &str,
        entity_type_name: &str,
        validating_property: Option<(&str, &str)>,
    ) -> OmrsResult<Removal<EntityDetail>> {
        const METHOD: &str = "delete_entity";
        let entity = self
            .typed_entity(user, guid, "guid", entity_type_name, METHOD)
            .await?;
        if let Some((property_name, expected)) = validating_property {
            let actual = entity.properties.get(property_name).and_then(|value| value.as_str());
            if actual != Some(expected) {
                return Err(OmrsError::invalid_parameter(
                    property_name,
                    METHOD,
                    format!("entity {} does not have {} '{}'", guid, property_name, expected),
                ));
            }
        }
        self.collection.delete_entity(user, guid).await
    }

    pub async fn purge_entity(&self, user: &UserContext, guid: &str, entity_type_name: &str) -> OmrsResult<()> {
        let summary = self
            .collection
            .get_entity_summary(user, guid)
            .await
            .map_err(|e| Self::expecting(e, entity_type_name))?;
        self.check_type(&summary, "guid", entity_type_name, "purge_entity")?;
        self.collection.purge_entity(user, guid).await
    }

    /// Create an entity and link it to the anchor (anchor at end 1). The
    /// relationship is only created once the entity exists.
    pub async fn create_attached_entity(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        attached: AttachedEntity,
    ) -> OmrsResult<Guid> {
        self.typed_entity(user, anchor_guid, "anchor_guid", anchor_type_name, "create_attached_entity")
            .await?;

        let entity_guid = self
            .create_entity(user, &attached.entity_type_guid, attached.properties, attached.classifications)
            .await?;
        self.collection
            .add_relationship(
                user,
                &attached.relationship_type_guid,
                attached.relationship_properties,
                anchor_guid,
                &entity_guid,
                None,
            )
            .await?;
        Ok(entity_guid)
    }

    /// Remove the anchor's unique attached entity of a relationship type
    /// together with the linking relationship
    pub async fn delete_attached_entity(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
        attached_type_name: &str,
    ) -> OmrsResult<Option<Guid>> {
        const METHOD: &str = "delete_attached_entity";
        let Some(relationship) = self
            .get_unique_relationship_by_type(user, anchor_guid, anchor_type_name, relationship_type_guid)
            .await?
        else {
            return Ok(None);
        };
        let attached_guid = relationship.other_end(anchor_guid).header.guid.clone();
        let attached = self
            .typed_entity(user, &attached_guid, "attached_guid", attached_type_name, METHOD)
            .await?;

        self.collection
            .delete_relationship(user, relationship.guid())
            .await?;
        self.collection.delete_entity(user, attached.guid()).await?;
        Ok(Some(attached_guid))
    }

    /// Delete the entity when nothing links to it any more. Returns `None`
    /// when the entity is still in use.
    pub async fn delete_entity_on_last_use(
        &self,
        user: &UserContext,
        guid: &str,
        entity_type_name: &str,
    ) -> OmrsResult<Option<Removal<EntityDetail>>> {
        self.typed_entity(user, guid, "guid", entity_type_name, "delete_entity_on_last_use")
            .await?;
        let relationships = self
            .collection
            .get_relationships_for_entity(
                user,
                guid,
                RelationshipQuery::default().with_paging(Paging::first(LAST_USE_PAGE_SIZE)),
            )
            .await?;
        if !relationships.is_empty() {
            log::debug!("Entity {} still has {} relationship(s)", guid, relationships.len());
            return Ok(None);
        }
        self.collection.delete_entity(user, guid).await.map(Some)
    }

    /// Entities whose `property_names` match `name` exactly (any of them)
    pub async fn get_entities_by_name(
        &self,
        user: &UserContext,
        name: &str,
        property_names: &[&str],
        entity_type_guid: Option<&str>,
        paging: Paging,
    ) -> OmrsResult<Vec<EntityDetail>> {
        let query = EntityPropertyQuery {
            entity_type_guid: entity_type_guid.map(str::to_string),
            ..EntityPropertyQuery::default()
        }
        .matching(exact_name_properties(name, property_names), MatchCriteria::Any)
        .with_paging(paging);
        self.collection.find_entities_by_property(user, query).await
    }

    /// `None` when nothing matches; `AmbiguousEntityName` when more than
    /// one entity does
    pub async fn get_unique_entity_by_name(
        &self,
        user: &UserContext,
        name: &str,
        property_names: &[&str],
        entity_type_guid: &str,
        entity_type_name: &str,
    ) -> OmrsResult<Option<EntityDetail>> {
        let mut entities = self
            .get_entities_by_name(
                user,
                name,
                property_names,
                Some(entity_type_guid),
                Paging::first(UNIQUE_NAME_PAGE_SIZE),
            )
            .await?;
        if entities.len() > 1 {
            return Err(OmrsError::AmbiguousEntityName {
                name: name.to_string(),
                parameter: "name".to_string(),
                type_name: entity_type_name.to_string(),
                entity_guids: entities.iter().map(|entity| entity.header.guid.clone()).collect(),
                method: "get_unique_entity_by_name".to_string(),
            });
        }
        Ok(entities.pop())
    }

    pub async fn get_entities_by_type(
        &self,
        user: &UserContext,
        entity_type_guid: &str,
        paging: Paging,
    ) -> OmrsResult<Vec<EntityDetail>> {
        self.collection
            .find_entities_by_property(user, EntityPropertyQuery::for_type(entity_type_guid).with_paging(paging))
            .await
    }

    /// Entities at the far end of the anchor's relationships of a type.
    /// Ends only known as proxies are skipped.
    pub async fn get_entities_for_relationship_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        relationship_type_guid: &str,
        paging: Paging,
    ) -> OmrsResult<Vec<EntityDetail>> {
        let relationships = self
            .relationships_of_type(user, anchor_guid, relationship_type_guid, paging)
            .await?;
        let mut entities = Vec::with_capacity(relationships.len());
        for relationship in &relationships {
            let far_end = relationship.other_end(anchor_guid).guid();
            match self.collection.get_entity_detail(user, far_end).await {
                Ok(entity) => entities.push(entity),
                Err(OmrsError::InstanceNotKnown { .. }) | Err(OmrsError::EntityProxyOnly { .. }) => {
                    log::debug!("Skipping relationship end {} with no local detail", far_end);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entities)
    }

    /// The single entity linked to the anchor by a relationship type
    pub async fn get_entity_for_relationship_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<Option<EntityDetail>> {
        match self
            .get_unique_relationship_by_type(user, anchor_guid, anchor_type_name, relationship_type_guid)
            .await?
        {
            Some(relationship) => {
                let far_end = relationship.other_end(anchor_guid).guid();
                self.collection.get_entity_detail(user, far_end).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Empty when the anchor has no relationships of the type
    pub async fn get_relationships_by_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<Vec<Relationship>> {
        self.get_paged_relationships_by_type(
            user,
            anchor_guid,
            anchor_type_name,
            relationship_type_guid,
            Paging::first(RELATIONSHIP_PAGE_SIZE),
        )
        .await
    }

    pub async fn get_paged_relationships_by_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
        paging: Paging,
    ) -> OmrsResult<Vec<Relationship>> {
        self.relationships_of_type(user, anchor_guid, relationship_type_guid, paging)
            .await
            .map_err(|e| Self::expecting(e, anchor_type_name))
    }

    /// Walks every page, so the count is not capped by the page size
    pub async fn count_attached_relationships_by_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<usize> {
        let mut count = 0;
        loop {
            let page = self
                .get_paged_relationships_by_type(
                    user,
                    anchor_guid,
                    anchor_type_name,
                    relationship_type_guid,
                    Paging::new(count, RELATIONSHIP_PAGE_SIZE),
                )
                .await?;
            count += page.len();
            if page.len() < RELATIONSHIP_PAGE_SIZE {
                return Ok(count);
            }
        }
    }

    /// Relationship of the type with `entity_one_guid` at end 1 and
    /// `entity_two_guid` at end 2
    pub async fn get_relationship_between_entities(
        &self,
        user: &UserContext,
        entity_one_guid: &str,
        entity_one_type_name: &str,
        entity_two_guid: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<Option<Relationship>> {
        let relationships = self
            .get_relationships_by_type(user, entity_one_guid, entity_one_type_name, relationship_type_guid)
            .await?;
        Ok(relationships.into_iter().find(|relationship| {
            relationship.end_one_guid() == entity_one_guid && relationship.end_two_guid() == entity_two_guid
        }))
    }

    /// `None` for no relationship, `AmbiguousRelationships` for more than one
    pub async fn get_unique_relationship_by_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<Option<Relationship>> {
        let mut relationships = self
            .get_relationships_by_type(user, anchor_guid, anchor_type_name, relationship_type_guid)
            .await?;
        if relationships.len() > 1 {
            let relationship_type = relationships[0].type_name().to_string();
            return Err(OmrsError::AmbiguousRelationships {
                anchor_guid: anchor_guid.to_string(),
                relationship_type,
                relationship_guids: relationships
                    .iter()
                    .map(|relationship| relationship.header.guid.clone())
                    .collect(),
                method: "get_unique_relationship_by_type".to_string(),
            });
        }
        Ok(relationships.pop())
    }

    // relationships

    /// Returns the new relationship's GUID
    pub async fn create_relationship(
        &self,
        user: &UserContext,
        relationship_type_guid: &str,
        entity_one_guid: &str,
        entity_two_guid: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<Guid> {
        let relationship = self
            .collection
            .add_relationship(
                user,
                relationship_type_guid,
                properties,
                entity_one_guid,
                entity_two_guid,
                Some(InstanceStatus::Active),
            )
            .await?;
        Ok(relationship.header.guid)
    }

    pub async fn delete_relationship(
        &self,
        user: &UserContext,
        guid: &str,
        relationship_type_name: &str,
    ) -> OmrsResult<Removal<Relationship>> {
        self.typed_relationship(user, guid, relationship_type_name, "delete_relationship")
            .await?;
        self.collection.delete_relationship(user, guid).await
    }

    pub async fn purge_relationship(&self, user: &UserContext, guid: &str, relationship_type_name: &str) -> OmrsResult<()> {
        self.typed_relationship(user, guid, relationship_type_name, "purge_relationship")
            .await?;
        self.collection.purge_relationship(user, guid).await
    }

    /// No-op when the entities are not linked
    pub async fn delete_relationship_between_entities(
        &self,
        user: &UserContext,
        relationship_type_guid: &str,
        entity_one_guid: &str,
        entity_one_type_name: &str,
        entity_two_guid: &str,
    ) -> OmrsResult<Option<Removal<Relationship>>> {
        match self
            .get_relationship_between_entities(
                user,
                entity_one_guid,
                entity_one_type_name,
                entity_two_guid,
                relationship_type_guid,
            )
            .await?
        {
            Some(relationship) => self
                .collection
                .delete_relationship(user, relationship.guid())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    pub async fn update_relationship_properties(
        &self,
        user: &UserContext,
        guid: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<Relationship> {
        self.collection
            .update_relationship_properties(user, guid, properties)
            .await
    }

    /// Keep at most one relationship of the type on each end, linking
    /// `entity_one_guid` to `entity_two_guid`. Relationships on either end
    /// that point anywhere else are deleted first.
    ///
    /// Only meaningful for relationship types whose ends are both 0..1;
    /// an end that legitimately holds many relationships of the type
    /// surfaces as `AmbiguousRelationships`.
    pub async fn update_unique_relationship_by_type(
        &self,
        user: &UserContext,
        entity_one_guid: &str,
        entity_one_type_name: &str,
        entity_two_guid: &str,
        entity_two_type_name: &str,
        relationship_type_guid: &str,
        properties: InstanceProperties,
    ) -> OmrsResult<Relationship> {
        let mut kept = None;
        for (anchor_guid, anchor_type_name) in [
            (entity_one_guid, entity_one_type_name),
            (entity_two_guid, entity_two_type_name),
        ] {
            let existing = self
                .get_unique_relationship_by_type(user, anchor_guid, anchor_type_name, relationship_type_guid)
                .await?;
            if let Some(relationship) = existing {
                if relationship.end_one_guid() == entity_one_guid && relationship.end_two_guid() == entity_two_guid {
                    kept = Some(relationship);
                } else {
                    log::info!(
                        "Replacing relationship {} between {} and {}",
                        relationship.guid(),
                        relationship.end_one_guid(),
                        relationship.end_two_guid()
                    );
                    self.collection
                        .delete_relationship(user, relationship.guid())
                        .await?;
                }
            }
        }

        match kept {
            Some(relationship) if relationship.properties == properties => Ok(relationship),
            Some(relationship) => {
                self.collection
                    .update_relationship_properties(user, relationship.guid(), properties)
                    .await
            }
            None => {
                self.collection
                    .add_relationship(
                        user,
                        relationship_type_guid,
                        properties,
                        entity_one_guid,
                        entity_two_guid,
                        Some(InstanceStatus::Active),
                    )
                    .await
            }
        }
    }

    /// Delete the anchor's unique relationship of the type, if it has one
    pub async fn remove_unique_relationship_by_type(
        &self,
        user: &UserContext,
        anchor_guid: &str,
        anchor_type_name: &str,
        relationship_type_guid: &str,
    ) -> OmrsResult<Option<Removal<Relationship>>> {
        match self
            .get_unique_relationship_by_type(user, anchor_guid, anchor_type_name, relationship_type_guid)
            .await?
        {
            Some(relationship) => self
                .collection
                .delete_relationship(user, relationship.guid())
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{
        AttributeTypeDef, CollectionIdentity, PrimitiveDefCategory, RelationshipEndCardinality,
        RelationshipEndDef, TypeDef, TypeDefAttribute,
    };
    use crate::store::{InMemoryStore, TypeRegistry};

    fn user() -> UserContext {
        UserContext::new("erin")
    }

    async fn handler() -> RepositoryHandler<InMemoryStore> {
        let collection = LocalMetadataCollection::new(
            CollectionIdentity::new("local-repo", "mc-local"),
            Arc::new(InMemoryStore::new()),
            Arc::new(TypeRegistry::new()),
        );
        let string = AttributeTypeDef::primitive("A-string", PrimitiveDefCategory::String);
        let asset = TypeDef::entity("T1", "Asset")
            .with_attribute(TypeDefAttribute::new("qualifiedName", &string))
            .with_attribute(TypeDefAttribute::new("name", &string));
        let comment = TypeDef::entity("T3", "Comment").with_attribute(TypeDefAttribute::new("text", &string));
        let attached = TypeDef::relationship(
            "R2",
            "AttachedComment",
            RelationshipEndDef {
                entity_type: asset.link(),
                attribute_name: "commentAnchor".to_string(),
                cardinality: RelationshipEndCardinality::AtMostOne,
            },
            RelationshipEndDef {
                entity_type: comment.link(),
                attribute_name: "comments".to_string(),
                cardinality: RelationshipEndCardinality::AnyNumber,
            },
        );
        collection.add_attribute_type_def(&user(), string).await.unwrap();
        for type_def in [asset, comment, attached] {
            collection.add_type_def(&user(), type_def).await.unwrap();
        }
        RepositoryHandler::new(Arc::new(collection))
    }

    fn asset(name: &str) -> InstanceProperties {
        InstanceProperties::new().with_string("qualifiedName", name)
    }

    fn comment(text: &str) -> AttachedEntity {
        AttachedEntity {
            entity_type_guid: "T3".to_string(),
            properties: InstanceProperties::new().with_string("text", text),
            classifications: Vec::new(),
            relationship_type_guid: "R2".to_string(),
            relationship_properties: InstanceProperties::new(),
        }
    }

    #[test]
    fn test_exact_name_properties_escape_patterns() {
        let properties = exact_name_properties("a.b", &["qualifiedName", "name"]);
        assert_eq!(properties.len(), 2);
        assert_eq!(properties.get("name").and_then(|v| v.as_str()), Some("a\\.b"));
    }

    #[tokio::test]
    async fn test_validate_entity_guid_checks_type() {
        let h = handler().await;
        let guid = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        h.validate_entity_guid(&user(), &guid, "Asset").await.unwrap();

        let wrong = h.validate_entity_guid(&user(), &guid, "Comment").await.unwrap_err();
        assert_eq!(wrong.kind(), ErrorKind::InvalidParameter);

        let missing = h.validate_entity_guid(&user(), "nope", "Asset").await.unwrap_err();
        assert!(matches!(missing, OmrsError::InstanceNotKnown { ref type_name, .. } if type_name == "Asset"));
        assert!(h.is_entity_known(&user(), "nope", "Asset").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attached_entity_lifecycle() {
        let h = handler().await;
        let anchor = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        let attached = h
            .create_attached_entity(&user(), &anchor, "Asset", comment("hello"))
            .await
            .unwrap();

        let found = h
            .get_entity_for_relationship_type(&user(), &anchor, "Asset", "R2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.header.guid, attached);

        let removed = h
            .delete_attached_entity(&user(), &anchor, "Asset", "R2", "Comment")
            .await
            .unwrap();
        assert_eq!(removed.as_deref(), Some(attached.as_str()));
        assert!(h.get_relationships_by_type(&user(), &anchor, "Asset", "R2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attached_entity_needs_anchor() {
        let h = handler().await;
        let err = h
            .create_attached_entity(&user(), "missing", "Asset", comment("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstanceNotKnown);
        assert_eq!(h.collection().store().entity_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_with_validating_property() {
        let h = handler().await;
        let guid = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        let err = h
            .delete_entity(&user(), &guid, "Asset", Some(("qualifiedName", "other")))
            .await
            .unwrap_err();
        assert_eq!(err.parameter(), Some("qualifiedName"));

        let removal = h
            .delete_entity(&user(), &guid, "Asset", Some(("qualifiedName", "a1")))
            .await
            .unwrap();
        assert!(!removal.is_purged());
    }

    #[tokio::test]
    async fn test_update_entity_skips_unchanged() {
        let h = handler().await;
        let guid = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        let same = h.update_entity(&user(), &guid, "Asset", asset("a1")).await.unwrap();
        assert_eq!(same.header.version, 1);
        let changed = h.update_entity(&user(), &guid, "Asset", asset("a2")).await.unwrap();
        assert_eq!(changed.header.version, 2);
    }

    #[tokio::test]
    async fn test_names_match_exactly() {
        let h = handler().await;
        h.create_entity(&user(), "T1", asset("a.1"), Vec::new()).await.unwrap();
        h.create_entity(&user(), "T1", asset("ab1"), Vec::new()).await.unwrap();

        let found = h
            .get_unique_entity_by_name(&user(), "a.1", &["qualifiedName", "name"], "T1", "Asset")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.properties.get("qualifiedName").and_then(|v| v.as_str()), Some("a.1"));
        assert!(h
            .get_unique_entity_by_name(&user(), "a", &["qualifiedName"], "T1", "Asset")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_count_walks_every_page() {
        let h = handler().await;
        let anchor = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        for i in 0..3 {
            h.create_attached_entity(&user(), &anchor, "Asset", comment(&format!("c{}", i)))
                .await
                .unwrap();
        }
        let count = h
            .count_attached_relationships_by_type(&user(), &anchor, "Asset", "R2")
            .await
            .unwrap();
        assert_eq!(count, 3);
        let page = h
            .get_paged_relationships_by_type(&user(), &anchor, "Asset", "R2", Paging::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);

        let deleted = h
            .remove_unique_relationship_by_type(&user(), &anchor, "Asset", "R2")
            .await
            .unwrap_err();
        assert_eq!(deleted.kind(), ErrorKind::AmbiguousRelationships);
    }

    #[tokio::test]
    async fn test_delete_relationship_between_unlinked_entities_is_noop() {
        let h = handler().await;
        let a = h.create_entity(&user(), "T1", asset("a1"), Vec::new()).await.unwrap();
        let c = h
            .create_entity(&user(), "T3", InstanceProperties::new(), Vec::new())
            .await
            .unwrap();
        assert!(h
            .delete_relationship_between_entities(&user(), "R2", &a, "Asset", &c)
            .await
            .unwrap()
            .is_none());

        h.create_relationship(&user(), "R2", &a, &c, InstanceProperties::new()).await.unwrap();
        let removal = h
            .delete_relationship_between_entities(&user(), "R2", &a, "Asset", &c)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(removal.instance().end_two_guid(), c);
    }
}
