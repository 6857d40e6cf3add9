use crate::model::{Guid, InstanceStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeDefCategory {
    #[default]
    Unknown,
    EntityDef,
    RelationshipDef,
    ClassificationDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeTypeDefCategory {
    #[default]
    Unknown,
    PrimitiveDef,
    CollectionDef,
    EnumDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveDefCategory {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionDefCategory {
    Map,
    Array,
    Struct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeCardinality {
    #[default]
    AtMostOne,
    ExactlyOne,
    AnyNumberUnordered,
    AnyNumberOrdered,
    AtLeastOneOrdered,
    AtLeastOneUnordered,
}

impl AttributeCardinality {
    /// Whether an instance must supply a value for the attribute
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            AttributeCardinality::ExactlyOne
                | AttributeCardinality::AtLeastOneOrdered
                | AttributeCardinality::AtLeastOneUnordered
        )
    }
}

/// Cardinality of one end of a relationship type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipEndCardinality {
    #[default]
    AnyNumber,
    AtMostOne,
}

/// Lightweight reference to a TypeDef
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDefLink {
    pub guid: Guid,
    pub name: String,
}

impl TypeDefLink {
    pub fn new(guid: impl Into<Guid>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
        }
    }
}

/// Reference to the AttributeTypeDef describing an attribute's values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeTypeLink {
    pub guid: Guid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefAttribute {
    pub attribute_name: String,
    pub attribute_type: AttributeTypeLink,
    #[serde(default)]
    pub cardinality: AttributeCardinality,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_indexable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TypeDefAttribute {
    pub fn new(name: impl Into<String>, attribute_type: &AttributeTypeDef) -> Self {
        Self {
            attribute_name: name.into(),
            attribute_type: AttributeTypeLink {
                guid: attribute_type.guid.clone(),
                name: attribute_type.name.clone(),
            },
            cardinality: AttributeCardinality::AtMostOne,
            is_unique: false,
            is_indexable: true,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.cardinality = AttributeCardinality::ExactlyOne;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEndDef {
    pub entity_type: TypeDefLink,
    pub attribute_name: String,
    #[serde(default)]
    pub cardinality: RelationshipEndCardinality,
}

/// Structural definition of an entity, relationship or classification type.
///
/// Relationship-only fields (`end_def1`, `end_def2`) and classification-only
/// fields (`valid_entity_defs`, `propagatable`) are ignored for other
/// categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub guid: Guid,
    pub name: String,
    #[serde(default)]
    pub category: TypeDefCategory,
    pub version: u64,
    #[serde(default)]
    pub version_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_type: Option<TypeDefLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub property_definitions: Vec<TypeDefAttribute>,
    #[serde(default = "default_valid_statuses")]
    pub valid_instance_statuses: Vec<InstanceStatus>,
    #[serde(default = "default_initial_status")]
    pub initial_status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_def1: Option<RelationshipEndDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_def2: Option<RelationshipEndDef>,
    #[serde(default)]
    pub valid_entity_defs: Vec<TypeDefLink>,
    #[serde(default)]
    pub propagatable: bool,
}

fn default_valid_statuses() -> Vec<InstanceStatus> {
    vec![InstanceStatus::Active, InstanceStatus::Deleted]
}

fn default_initial_status() -> InstanceStatus {
    InstanceStatus::Active
}

impl TypeDef {
    fn new(guid: impl Into<Guid>, name: impl Into<String>, category: TypeDefCategory) -> Self {
        let name = name.into();
        Self {
            guid: guid.into(),
            version_name: "1.0".to_string(),
            name,
            category,
            version: 1,
            super_type: None,
            description: None,
            property_definitions: Vec::new(),
            valid_instance_statuses: default_valid_statuses(),
            initial_status: default_initial_status(),
            end_def1: None,
            end_def2: None,
            valid_entity_defs: Vec::new(),
            propagatable: false,
        }
    }

    pub fn entity(guid: impl Into<Guid>, name: impl Into<String>) -> Self {
        Self::new(guid, name, TypeDefCategory::EntityDef)
    }

    pub fn relationship(
        guid: impl Into<Guid>,
        name: impl Into<String>,
        end1: RelationshipEndDef,
        end2: RelationshipEndDef,
    ) -> Self {
        let mut def = Self::new(guid, name, TypeDefCategory::RelationshipDef);
        def.end_def1 = Some(end1);
        def.end_def2 = Some(end2);
        def
    }

    pub fn classification(guid: impl Into<Guid>, name: impl Into<String>) -> Self {
        Self::new(guid, name, TypeDefCategory::ClassificationDef)
    }

    pub fn with_super_type(mut self, super_type: &TypeDef) -> Self {
        self.super_type = Some(super_type.link());
        self
    }

    pub fn with_attribute(mut self, attribute: TypeDefAttribute) -> Self {
        self.property_definitions.push(attribute);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<InstanceStatus>) -> Self {
        self.valid_instance_statuses = statuses;
        self
    }

    pub fn with_valid_entity(mut self, entity_type: &TypeDef) -> Self {
        self.valid_entity_defs.push(entity_type.link());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn link(&self) -> TypeDefLink {
        TypeDefLink::new(self.guid.clone(), self.name.clone())
    }

    /// Point every reference to `original_guid` (super type, relationship
    /// ends, valid entity types) at `link`
    pub fn relink(&mut self, original_guid: &str, link: &TypeDefLink) {
        let references = self
            .super_type
            .iter_mut()
            .chain(
                [self.end_def1.as_mut(), self.end_def2.as_mut()]
                    .into_iter()
                    .flatten()
                    .map(|end| &mut end.entity_type),
            )
            .chain(self.valid_entity_defs.iter_mut());
        for reference in references {
            if reference.guid == original_guid {
                *reference = link.clone();
            }
        }
    }

    pub fn relink_attribute_type(&mut self, original_guid: &str, renamed: &AttributeTypeDef) {
        for attribute in self.property_definitions.iter_mut() {
            if attribute.attribute_type.guid == original_guid {
                attribute.attribute_type.guid = renamed.guid.clone();
                attribute.attribute_type.name = renamed.name.clone();
            }
        }
    }

    pub fn summary(&self) -> TypeDefSummary {
        TypeDefSummary {
            guid: self.guid.clone(),
            name: self.name.clone(),
            category: self.category,
            version: self.version,
            version_name: self.version_name.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&TypeDefAttribute> {
        self.property_definitions
            .iter()
            .find(|attribute| attribute.attribute_name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumElementDef {
    pub ordinal: i32,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeTypeKind {
    PrimitiveDef {
        primitive_def_category: PrimitiveDefCategory,
    },
    CollectionDef {
        collection_def_category: CollectionDefCategory,
        #[serde(default)]
        argument_types: Vec<PrimitiveDefCategory>,
    },
    EnumDef {
        element_defs: Vec<EnumElementDef>,
        #[serde(skip_serializing_if = "Option::is_none")]
        default_value: Option<i32>,
    },
    #[serde(other)]
    Unknown,
}

/// Definition of a primitive, collection or enum attribute type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypeDef {
    pub guid: Guid,
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub version_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: AttributeTypeKind,
}

impl AttributeTypeDef {
    pub fn primitive(guid: impl Into<Guid>, category: PrimitiveDefCategory) -> Self {
        let name = match category {
            PrimitiveDefCategory::Boolean => "boolean",
            PrimitiveDefCategory::Int => "int",
            PrimitiveDefCategory::Long => "long",
            PrimitiveDefCategory::Float => "float",
            PrimitiveDefCategory::Double => "double",
            PrimitiveDefCategory::String => "string",
            PrimitiveDefCategory::Date => "date",
        };
        Self {
            guid: guid.into(),
            name: name.to_string(),
            version: 1,
            version_name: "1.0".to_string(),
            description: None,
            kind: AttributeTypeKind::PrimitiveDef {
                primitive_def_category: category,
            },
        }
    }

    pub fn enumeration(
        guid: impl Into<Guid>,
        name: impl Into<String>,
        element_defs: Vec<EnumElementDef>,
    ) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            version: 1,
            version_name: "1.0".to_string(),
            description: None,
            kind: AttributeTypeKind::EnumDef {
                element_defs,
                default_value: None,
            },
        }
    }

    pub fn category(&self) -> AttributeTypeDefCategory {
        match self.kind {
            AttributeTypeKind::PrimitiveDef { .. } => AttributeTypeDefCategory::PrimitiveDef,
            AttributeTypeKind::CollectionDef { .. } => AttributeTypeDefCategory::CollectionDef,
            AttributeTypeKind::EnumDef { .. } => AttributeTypeDefCategory::EnumDef,
            AttributeTypeKind::Unknown => AttributeTypeDefCategory::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefSummary {
    pub guid: Guid,
    pub name: String,
    pub category: TypeDefCategory,
    pub version: u64,
    pub version_name: String,
}

/// Additive change to a published TypeDef
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefPatch {
    pub type_def_guid: Guid,
    pub type_def_name: String,
    pub applies_to_version: u64,
    pub updated_to_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attributes to append to the existing property list
    #[serde(default)]
    pub property_definitions: Vec<TypeDefAttribute>,
    /// Replacement status list; must keep every existing status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_instance_statuses: Option<Vec<InstanceStatus>>,
}

/// Extends the valid values of an enum attribute type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefPatch {
    pub guid: Guid,
    pub name: String,
    pub applies_to_version: u64,
    pub updated_to_version: u64,
    pub element_defs: Vec<EnumElementDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefGallery {
    #[serde(default)]
    pub attribute_type_defs: Vec<AttributeTypeDef>,
    #[serde(default)]
    pub type_defs: Vec<TypeDef>,
}
