use crate::logic::LocalMetadataCollection;
use crate::model::{
    AttributeTypeDef, InstanceStatus, PrimitiveDefCategory, RelationshipEndCardinality,
    RelationshipEndDef, TypeDef, TypeDefAttribute, TypeDefGallery, UserContext,
};
use crate::store::MetadataStore;
use anyhow::{Context, Result};

pub const STRING_GUID: &str = "b34a64b9-554a-42b1-8f8a-7d5c2339f9c4";
pub const INT_GUID: &str = "7fc49104-fd3a-46c8-b6bf-f16b6074cd35";
pub const BOOLEAN_GUID: &str = "3863f010-611c-41fe-aaae-5d4d427f863b";
pub const DATE_GUID: &str = "1bef35ca-d4f9-48db-87c2-afce4649362d";

pub const REFERENCEABLE_GUID: &str = "a32316b8-dc8c-48c5-b12b-71c1b2a080bf";
pub const ASSET_GUID: &str = "896d14c2-7522-4f6c-8519-757711943fe6";
pub const PERSON_GUID: &str = "ac406bf8-e53e-49f1-9088-2af28bbbd285";
pub const COMMENT_GUID: &str = "1a226073-9c84-40e4-a422-fbddb9b84278";
pub const ASSET_OWNERSHIP_GUID: &str = "0ea3d7a8-3b5e-4b8b-a1a5-a5b6bf1ab0d1";
pub const ATTACHED_COMMENT_GUID: &str = "0d90501b-bf29-4621-a207-0c8c953bdac9";
pub const CONFIDENTIALITY_GUID: &str = "742ddb7d-9a4a-4eb5-8ac2-1d69953bd2b6";

/// Starter set of types so a fresh repository can hold assets, people and
/// comments without a separate type load
pub fn seed_gallery() -> TypeDefGallery {
    let string = AttributeTypeDef::primitive(STRING_GUID, PrimitiveDefCategory::String);
    let int = AttributeTypeDef::primitive(INT_GUID, PrimitiveDefCategory::Int);
    let boolean = AttributeTypeDef::primitive(BOOLEAN_GUID, PrimitiveDefCategory::Boolean);
    let date = AttributeTypeDef::primitive(DATE_GUID, PrimitiveDefCategory::Date);

    let referenceable = TypeDef::entity(REFERENCEABLE_GUID, "Referenceable")
        .with_description("An open metadata entity that has a unique identifier")
        .with_attribute(TypeDefAttribute::new("qualifiedName", &string).required().unique());
    let asset = TypeDef::entity(ASSET_GUID, "Asset")
        .with_super_type(&referenceable)
        .with_description("The description of an asset that needs to be catalogued and governed")
        .with_attribute(TypeDefAttribute::new("name", &string))
        .with_attribute(TypeDefAttribute::new("description", &string))
        .with_statuses(vec![
            InstanceStatus::Draft,
            InstanceStatus::Active,
            InstanceStatus::Deprecated,
            InstanceStatus::Deleted,
        ]);
    let person = TypeDef::entity(PERSON_GUID, "Person")
        .with_super_type(&referenceable)
        .with_attribute(TypeDefAttribute::new("name", &string))
        .with_attribute(TypeDefAttribute::new("isPublic", &boolean));
    let comment = TypeDef::entity(COMMENT_GUID, "Comment")
        .with_super_type(&referenceable)
        .with_attribute(TypeDefAttribute::new("text", &string))
        .with_attribute(TypeDefAttribute::new("commentType", &int));

    let asset_ownership = TypeDef::relationship(
        ASSET_OWNERSHIP_GUID,
        "AssetOwnership",
        RelationshipEndDef {
            entity_type: asset.link(),
            attribute_name: "ownedAssets".to_string(),
            cardinality: RelationshipEndCardinality::AnyNumber,
        },
        RelationshipEndDef {
            entity_type: person.link(),
            attribute_name: "owner".to_string(),
            cardinality: RelationshipEndCardinality::AtMostOne,
        },
    )
    .with_attribute(TypeDefAttribute::new("since", &date));
    let attached_comment = TypeDef::relationship(
        ATTACHED_COMMENT_GUID,
        "AttachedComment",
        RelationshipEndDef {
            entity_type: referenceable.link(),
            attribute_name: "commentAnchor".to_string(),
            cardinality: RelationshipEndCardinality::AtMostOne,
        },
        RelationshipEndDef {
            entity_type: comment.link(),
            attribute_name: "comments".to_string(),
            cardinality: RelationshipEndCardinality::AnyNumber,
        },
    );
    let confidentiality = TypeDef::classification(CONFIDENTIALITY_GUID, "Confidentiality")
        .with_valid_entity(&referenceable)
        .with_attribute(TypeDefAttribute::new("level", &int))
        .with_attribute(TypeDefAttribute::new("steward", &string));

    TypeDefGallery {
        attribute_type_defs: vec![string, int, boolean, date],
        // Dependents first; the gallery load defers them until their
        // super types and end types are known
        type_defs: vec![
            attached_comment,
            asset_ownership,
            confidentiality,
            asset,
            person,
            comment,
            referenceable,
        ],
    }
}

/// Register the starter types with the local collection as the system user
pub async fn load_seed_types<S: MetadataStore>(collection: &LocalMetadataCollection<S>) -> Result<usize> {
    log::info!("Loading starter types into {}", collection.identity().metadata_collection_id);
    let added = collection
        .add_type_def_gallery(&UserContext::system(), seed_gallery())
        .await
        .context("loading starter types")?;
    log::info!("Loaded {} starter types", added);
    Ok(added)
}
