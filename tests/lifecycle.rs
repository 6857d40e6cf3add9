use cohort_metadata_repo::events::{OutboundEvent, RecordingEventEmitter};
use cohort_metadata_repo::seed::{self, ASSET_GUID, CONFIDENTIALITY_GUID, STRING_GUID};
use cohort_metadata_repo::{
    AttributeTypeDef, CollectionIdentity, ErrorKind, InMemoryStore, InstanceProperties,
    InstancePropertyValue, InstanceStatus, LocalMetadataCollection, PrimitiveDefCategory, TypeDef,
    TypeDefAttribute, TypeRegistry, UserContext,
};
use std::sync::Arc;

const LOCAL_ID: &str = "mc-lifecycle";

async fn collection(soft_delete: bool) -> (LocalMetadataCollection<InMemoryStore>, Arc<RecordingEventEmitter>) {
    let events = Arc::new(RecordingEventEmitter::new());
    let collection = LocalMetadataCollection::new(
        CollectionIdentity::new("lifecycle", LOCAL_ID),
        Arc::new(InMemoryStore::new().with_soft_delete(soft_delete)),
        Arc::new(TypeRegistry::new()),
    )
    .with_emitter(events.clone());
    seed::load_seed_types(&collection).await.unwrap();
    events.take();
    (collection, events)
}

fn user() -> UserContext {
    UserContext::new("steward")
}

fn asset_properties(qualified_name: &str) -> InstanceProperties {
    InstanceProperties::new()
        .with("qualifiedName", InstancePropertyValue::string(qualified_name))
        .with("name", InstancePropertyValue::string("Sales ledger"))
}

#[tokio::test]
async fn test_delete_then_restore_keeps_content() {
    let (collection, _) = collection(true).await;
    let user = user();
    let entity = collection
        .add_entity(&user, ASSET_GUID, asset_properties("ledger"), Vec::new(), None)
        .await
        .unwrap();
    let guid = entity.header.guid.clone();
    let classified = collection
        .classify_entity(
            &user,
            &guid,
            "Confidentiality",
            InstanceProperties::new().with("level", InstancePropertyValue::int(3)),
        )
        .await
        .unwrap();

    let removal = collection.delete_entity(&user, &guid).await.unwrap();
    assert!(!removal.is_purged());
    assert_eq!(removal.instance().header.status, InstanceStatus::Deleted);

    let restored = collection.restore_entity(&user, &guid).await.unwrap();
    assert_eq!(restored.header.status, InstanceStatus::Active);
    assert_eq!(restored.properties, classified.properties);
    assert_eq!(restored.classifications.len(), 1);
    assert_eq!(restored.classifications[0].properties, classified.classifications[0].properties);
}

#[tokio::test]
async fn test_every_read_and_mutation_is_stamped_with_a_home() {
    let (collection, _) = collection(true).await;
    let user = user();
    let entity = collection
        .add_entity(&user, ASSET_GUID, asset_properties("stamped"), Vec::new(), None)
        .await
        .unwrap();
    assert_eq!(entity.header.metadata_collection_id.as_deref(), Some(LOCAL_ID));

    let guid = entity.header.guid.clone();
    let summary = collection.get_entity_summary(&user, &guid).await.unwrap();
    assert_eq!(summary.header.metadata_collection_id.as_deref(), Some(LOCAL_ID));

    let updated = collection
        .update_entity_status(&user, &guid, InstanceStatus::Deprecated)
        .await
        .unwrap();
    assert_eq!(updated.header.metadata_collection_id.as_deref(), Some(LOCAL_ID));
    assert_eq!(updated.header.updated_by.as_deref(), Some("steward"));
}

#[tokio::test]
async fn test_delete_without_soft_delete_is_terminal() {
    let (collection, events) = collection(false).await;
    let user = user();
    let entity = collection
        .add_entity(&user, ASSET_GUID, asset_properties("gone"), Vec::new(), None)
        .await
        .unwrap();
    let guid = entity.header.guid.clone();
    events.take();

    let removal = collection.delete_entity(&user, &guid).await.unwrap();
    assert!(removal.is_purged());

    let err = collection.get_entity_detail(&user, &guid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstanceNotKnown);
    let err = collection.restore_entity(&user, &guid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstanceNotKnown);

    let recorded = events.take();
    assert_eq!(recorded.len(), 1);
    assert!(matches!(recorded[0], OutboundEvent::Instance(_)));
}

#[tokio::test]
async fn test_type_round_trip_and_conflict() {
    let (collection, _) = collection(true).await;
    let user = user();
    let string = collection.get_attribute_type_def_by_guid(&user, STRING_GUID).unwrap();
    let glossary = TypeDef::entity("6f1b4c3e-glossary", "Glossary")
        .with_attribute(TypeDefAttribute::new("displayName", &string));

    collection.add_type_def(&user, glossary.clone()).await.unwrap();
    let fetched = collection.get_type_def_by_guid(&user, &glossary.guid).unwrap();
    assert_eq!(fetched, glossary);
    assert!(collection.verify_type_def(&user, &glossary).unwrap());

    let err = collection.add_type_def(&user, glossary.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeAlreadyKnown);

    let changed = glossary.with_description("A different shape");
    let err = collection.add_type_def(&user, changed).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeConflict);
}

#[tokio::test]
async fn test_type_with_instances_cannot_be_deleted() {
    let (collection, _) = collection(true).await;
    let user = user();
    collection
        .add_entity(&user, ASSET_GUID, asset_properties("in-use"), Vec::new(), None)
        .await
        .unwrap();

    let err = collection.delete_type_def(&user, ASSET_GUID, "Asset").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeInUse);
    assert!(collection.get_type_def_by_guid(&user, ASSET_GUID).is_ok());
}

#[tokio::test]
async fn test_classification_events_and_search() {
    let (collection, events) = collection(true).await;
    let user = user();
    let entity = collection
        .add_entity(&user, ASSET_GUID, asset_properties("secret"), Vec::new(), None)
        .await
        .unwrap();
    collection
        .add_entity(&user, ASSET_GUID, asset_properties("public"), Vec::new(), None)
        .await
        .unwrap();
    events.take();

    collection
        .classify_entity(&user, &entity.header.guid, "Confidentiality", InstanceProperties::new())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    let found = collection
        .find_entities_by_classification(&user, "Confidentiality", Default::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].header.guid, entity.header.guid);

    let err = collection
        .classify_entity(&user, &entity.header.guid, "Confidentiality", InstanceProperties::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClassificationError);
    assert!(collection.get_type_def_by_guid(&user, CONFIDENTIALITY_GUID).is_ok());
}

#[tokio::test]
async fn test_attribute_type_conflict_is_refused() {
    let (collection, _) = collection(true).await;
    let user = user();
    let clash = AttributeTypeDef::primitive(STRING_GUID, PrimitiveDefCategory::Long);
    let err = collection.add_attribute_type_def(&user, clash).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeConflict);
}

#[tokio::test]
async fn test_updates_after_renaming_the_entity_type() {
    let (collection, _) = collection(true).await;
    let user = user();
    let entity = collection
        .add_entity(&user, ASSET_GUID, asset_properties("ledger"), Vec::new(), None)
        .await
        .unwrap();

    collection
        .re_identify_type_def(&user, ASSET_GUID, "Asset", "asset-v2", "AssetV2")
        .await
        .unwrap();
    let updated = collection
        .update_entity_properties(&user, &entity.header.guid, asset_properties("ledger-v2"))
        .await
        .unwrap();
    assert_eq!(updated.header.instance_type.type_def_guid, "asset-v2");
    assert_eq!(updated.header.instance_type.type_def_name, "AssetV2");
    assert_eq!(updated.header.version, 2);

    let restored = collection.undo_entity_update(&user, &entity.header.guid).await.unwrap();
    assert_eq!(restored.header.instance_type.type_def_name, "AssetV2");
    assert_eq!(restored.properties, entity.properties);
}
