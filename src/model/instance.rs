use crate::model::{Guid, PrimitiveDefCategory, TypeDef, TypeDefCategory, TypeDefLink};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Draft,
    Prepared,
    Proposed,
    Approved,
    Rejected,
    Active,
    Deprecated,
    Other,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceProvenanceType {
    #[default]
    Unknown,
    LocalCohort,
    ExportArchive,
    ContentPack,
    DeregisteredRepository,
    Configuration,
    ExternalSource,
}

/// Type information carried by every instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub type_def_category: TypeDefCategory,
    pub type_def_guid: Guid,
    pub type_def_name: String,
    pub type_def_version: u64,
    /// Super types ordered from the immediate parent upwards
    #[serde(default)]
    pub type_def_super_types: Vec<TypeDefLink>,
    #[serde(default)]
    pub valid_status_list: Vec<InstanceStatus>,
    /// Attribute names, inherited ones included
    #[serde(default)]
    pub valid_instance_properties: Vec<String>,
}

impl InstanceType {
    pub fn link(&self) -> TypeDefLink {
        TypeDefLink::new(self.type_def_guid.clone(), self.type_def_name.clone())
    }

    pub fn is_type(&self, type_def: &TypeDef) -> bool {
        self.type_def_guid == type_def.guid && self.type_def_name == type_def.name
    }

    /// Follow a re-identified type, whether it is this type or one of its
    /// super types
    pub fn relink(&mut self, original_guid: &str, link: &TypeDefLink) {
        if self.type_def_guid == original_guid {
            self.type_def_guid = link.guid.clone();
            self.type_def_name = link.name.clone();
        }
        for super_type in self.type_def_super_types.iter_mut() {
            if super_type.guid == original_guid {
                *super_type = link.clone();
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeader {
    pub guid: Guid,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    #[serde(default)]
    pub instance_provenance_type: InstanceProvenanceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_collection_id: Option<Guid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_collection_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicated_by: Option<Guid>,
    pub version: u64,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_on_delete: Option<InstanceStatus>,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceHeader {
    pub fn new(guid: Guid, instance_type: InstanceType, status: InstanceStatus, user_id: &str) -> Self {
        Self {
            guid,
            instance_type,
            instance_provenance_type: InstanceProvenanceType::Unknown,
            metadata_collection_id: None,
            metadata_collection_name: None,
            replicated_by: None,
            version: 1,
            status,
            status_on_delete: None,
            created_by: user_id.to_string(),
            updated_by: None,
            create_time: Utc::now(),
            update_time: None,
        }
    }

    /// Bump the version and audit fields for a new revision
    pub fn touch(&mut self, user_id: &str) {
        self.version += 1;
        self.updated_by = Some(user_id.to_string());
        self.update_time = Some(Utc::now());
    }

    pub fn is_homed_at(&self, metadata_collection_id: &str) -> bool {
        self.metadata_collection_id.as_deref() == Some(metadata_collection_id)
    }
}

/// Access to the header shared by every instance view
pub trait InstanceAuditHeader {
    fn header(&self) -> &InstanceHeader;
    fn header_mut(&mut self) -> &mut InstanceHeader;

    fn guid(&self) -> &str {
        &self.header().guid
    }

    fn type_name(&self) -> &str {
        &self.header().instance_type.type_def_name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimitiveValue {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
}

impl PrimitiveValue {
    pub fn category(&self) -> PrimitiveDefCategory {
        match self {
            PrimitiveValue::Boolean(_) => PrimitiveDefCategory::Boolean,
            PrimitiveValue::Int(_) => PrimitiveDefCategory::Int,
            PrimitiveValue::Long(_) => PrimitiveDefCategory::Long,
            PrimitiveValue::Float(_) => PrimitiveDefCategory::Float,
            PrimitiveValue::Double(_) => PrimitiveDefCategory::Double,
            PrimitiveValue::String(_) => PrimitiveDefCategory::String,
            PrimitiveValue::Date(_) => PrimitiveDefCategory::Date,
        }
    }

    pub fn render(&self) -> String {
        match self {
            PrimitiveValue::Boolean(value) => value.to_string(),
            PrimitiveValue::Int(value) => value.to_string(),
            PrimitiveValue::Long(value) => value.to_string(),
            PrimitiveValue::Float(value) => value.to_string(),
            PrimitiveValue::Double(value) => value.to_string(),
            PrimitiveValue::String(value) => value.clone(),
            PrimitiveValue::Date(value) => value.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstancePropertyValue {
    Primitive {
        value: PrimitiveValue,
    },
    Enum {
        ordinal: i32,
        symbolic_name: String,
    },
    Array {
        values: Vec<InstancePropertyValue>,
    },
    Map {
        values: IndexMap<String, InstancePropertyValue>,
    },
    Struct {
        attributes: InstanceProperties,
    },
}

impl InstancePropertyValue {
    pub fn string(value: impl Into<String>) -> Self {
        InstancePropertyValue::Primitive {
            value: PrimitiveValue::String(value.into()),
        }
    }

    pub fn int(value: i32) -> Self {
        InstancePropertyValue::Primitive {
            value: PrimitiveValue::Int(value),
        }
    }

    pub fn boolean(value: bool) -> Self {
        InstancePropertyValue::Primitive {
            value: PrimitiveValue::Boolean(value),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InstancePropertyValue::Primitive {
                value: PrimitiveValue::String(value),
            } => Some(value),
            _ => None,
        }
    }

    /// Text used by free-text property searches
    pub fn render(&self) -> String {
        match self {
            InstancePropertyValue::Primitive { value } => value.render(),
            InstancePropertyValue::Enum { symbolic_name, .. } => symbolic_name.clone(),
            InstancePropertyValue::Array { values } => values
                .iter()
                .map(InstancePropertyValue::render)
                .collect::<Vec<_>>()
                .join(" "),
            InstancePropertyValue::Map { values } => values
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.render()))
                .collect::<Vec<_>>()
                .join(" "),
            InstancePropertyValue::Struct { attributes } => attributes
                .iter()
                .map(|(_, v)| v.render())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Ordered property name to value mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceProperties {
    properties: IndexMap<String, InstancePropertyValue>,
}

impl InstanceProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: InstancePropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(name, InstancePropertyValue::string(value))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: InstancePropertyValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&InstancePropertyValue> {
        self.properties.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<InstancePropertyValue> {
        self.properties.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstancePropertyValue)> {
        self.properties.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationOrigin {
    #[default]
    Assigned,
    Propagated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub name: String,
    #[serde(default)]
    pub origin: ClassificationOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_guid: Option<Guid>,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default = "active_status")]
    pub status: InstanceStatus,
    #[serde(default = "first_version")]
    pub version: u64,
    #[serde(default)]
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

fn active_status() -> InstanceStatus {
    InstanceStatus::Active
}

fn first_version() -> u64 {
    1
}

impl Classification {
    pub fn new(name: impl Into<String>, properties: InstanceProperties, user_id: &str) -> Self {
        Self {
            name: name.into(),
            origin: ClassificationOrigin::Assigned,
            origin_guid: None,
            properties,
            status: InstanceStatus::Active,
            version: 1,
            created_by: user_id.to_string(),
            updated_by: None,
            create_time: Some(Utc::now()),
            update_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub classifications: Vec<Classification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDetail {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub classifications: Vec<Classification>,
    #[serde(default)]
    pub properties: InstanceProperties,
}

impl EntityDetail {
    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            header: self.header.clone(),
            classifications: self.classifications.clone(),
        }
    }

    /// Stub of this entity for use as a relationship end
    pub fn proxy(&self) -> EntityProxy {
        let unique_properties = self
            .properties
            .iter()
            .filter(|(name, _)| name.as_str() == "qualifiedName")
            .fold(InstanceProperties::new(), |acc, (name, value)| {
                acc.with(name.clone(), value.clone())
            });
        EntityProxy {
            header: self.header.clone(),
            classifications: self.classifications.clone(),
            unique_properties,
        }
    }

    pub fn classification(&self, name: &str) -> Option<&Classification> {
        self.classifications.iter().find(|c| c.name == name)
    }
}

/// Header-only stand-in for an entity whose detail is held elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProxy {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub classifications: Vec<Classification>,
    #[serde(default)]
    pub unique_properties: InstanceProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub properties: InstanceProperties,
    pub entity_one_proxy: EntityProxy,
    pub entity_two_proxy: EntityProxy,
}

impl Relationship {
    pub fn end_one_guid(&self) -> &str {
        &self.entity_one_proxy.header.guid
    }

    pub fn end_two_guid(&self) -> &str {
        &self.entity_two_proxy.header.guid
    }

    pub fn is_attached_to(&self, entity_guid: &str) -> bool {
        self.end_one_guid() == entity_guid || self.end_two_guid() == entity_guid
    }

    /// The end that is not `anchor_guid`
    pub fn other_end(&self, anchor_guid: &str) -> &EntityProxy {
        if self.end_one_guid() == anchor_guid {
            &self.entity_two_proxy
        } else {
            &self.entity_one_proxy
        }
    }
}

macro_rules! impl_audit_header {
    ($($ty:ty),*) => {
        $(
            impl InstanceAuditHeader for $ty {
                fn header(&self) -> &InstanceHeader {
                    &self.header
                }

                fn header_mut(&mut self) -> &mut InstanceHeader {
                    &mut self.header
                }
            }
        )*
    };
}

impl_audit_header!(EntitySummary, EntityDetail, EntityProxy, Relationship);

/// Entity input model for creation; the storage engine assigns the GUID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub instance_type: InstanceType,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default)]
    pub classifications: Vec<Classification>,
    pub initial_status: InstanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelationship {
    pub instance_type: InstanceType,
    #[serde(default)]
    pub properties: InstanceProperties,
    pub entity_one_guid: Guid,
    pub entity_two_guid: Guid,
    pub initial_status: InstanceStatus,
}
