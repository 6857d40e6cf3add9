use crate::error::{OmrsError, OmrsResult};
use crate::model::{
    AttributeTypeKind, Classification, CollectionDefCategory, EntityProxy, EntitySummary,
    InstanceHeader, InstanceProperties, InstancePropertyValue, InstanceStatus, Paging,
    PrimitiveValue, TypeDef, TypeDefAttribute, TypeDefCategory, UserContext,
};
use crate::store::TypeRegistry;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;
const MAX_GUID_LENGTH: usize = 256;

/// Precondition checks shared by every collection operation.
///
/// Each check either returns normally or raises exactly one error carrying
/// the offending parameter and the calling method. None of them touch the
/// storage engine.
#[derive(Debug, Clone)]
pub struct RepositoryValidator {
    registry: Arc<TypeRegistry>,
    max_page_size: usize,
}

impl RepositoryValidator {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn validate_user_id(&self, user: &UserContext, method: &str) -> OmrsResult<()> {
        if user.id().trim().is_empty() {
            return Err(OmrsError::invalid_parameter("user_id", method, "a user id is required"));
        }
        Ok(())
    }

    pub fn validate_guid(&self, parameter: &str, guid: &str, method: &str) -> OmrsResult<()> {
        if guid.trim().is_empty() {
            return Err(OmrsError::invalid_parameter(parameter, method, "a GUID is required"));
        }
        if guid.len() > MAX_GUID_LENGTH {
            return Err(OmrsError::invalid_parameter(
                parameter,
                method,
                format!("GUID is longer than {} characters", MAX_GUID_LENGTH),
            ));
        }
        if guid.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(OmrsError::invalid_parameter(
                parameter,
                method,
                format!("GUID '{}' contains whitespace or control characters", guid),
            ));
        }
        Ok(())
    }

    pub fn validate_name(&self, parameter: &str, name: &str, method: &str) -> OmrsResult<()> {
        if name.trim().is_empty() {
            return Err(OmrsError::invalid_parameter(parameter, method, "a name is required"));
        }
        Ok(())
    }

    pub fn validate_type_def_ids(&self, guid: &str, name: &str, method: &str) -> OmrsResult<()> {
        self.validate_guid("type_def_guid", guid, method)?;
        self.validate_name("type_def_name", name, method)
    }

    /// Bound the page window; an unbounded request gets the maximum page
    pub fn bounded_paging(&self, paging: Paging, method: &str) -> OmrsResult<Paging> {
        if paging.page_size > self.max_page_size {
            return Err(OmrsError::invalid_parameter(
                "page_size",
                method,
                format!("page size {} exceeds the maximum of {}", paging.page_size, self.max_page_size),
            ));
        }
        let page_size = if paging.page_size == 0 {
            self.max_page_size
        } else {
            paging.page_size
        };
        Ok(Paging::new(paging.from_element, page_size))
    }

    pub fn validate_as_of_time(&self, as_of_time: Option<DateTime<Utc>>, method: &str) -> OmrsResult<()> {
        match as_of_time {
            Some(time) if time > Utc::now() => Err(OmrsError::invalid_parameter(
                "as_of_time",
                method,
                format!("{} is in the future", time.to_rfc3339()),
            )),
            _ => Ok(()),
        }
    }

    /// Match properties must be non-empty, named on the type (when one is
    /// given) and carry valid patterns for string values
    pub fn validate_match_properties(
        &self,
        type_def: Option<&TypeDef>,
        match_properties: Option<&InstanceProperties>,
        method: &str,
    ) -> OmrsResult<()> {
        let Some(match_properties) = match_properties else {
            return Ok(());
        };
        if match_properties.is_empty() {
            return Err(OmrsError::invalid_parameter(
                "match_properties",
                method,
                "match properties were supplied without any property",
            ));
        }

        let attributes = type_def.map(|def| self.attributes_by_name(def));
        for (name, value) in match_properties.iter() {
            if let (Some(attributes), Some(def)) = (&attributes, type_def) {
                if !attributes.contains_key(name.as_str()) {
                    return Err(OmrsError::property_error(name, &def.name, method, "not defined on the type"));
                }
            }
            if let Some(pattern) = value.as_str() {
                Regex::new(pattern).map_err(|e| {
                    OmrsError::invalid_parameter("match_properties", method, format!("'{}' is not a valid pattern: {}", pattern, e))
                })?;
            }
        }
        Ok(())
    }

    pub fn validate_search_criteria(&self, search_criteria: &str, method: &str) -> OmrsResult<()> {
        if search_criteria.is_empty() {
            return Err(OmrsError::invalid_parameter("search_criteria", method, "search criteria are required"));
        }
        Regex::new(search_criteria)
            .map(|_| ())
            .map_err(|e| OmrsError::invalid_parameter("search_criteria", method, e.to_string()))
    }

    /// Registered type of the expected category
    pub fn validate_type_for_category(
        &self,
        parameter: &str,
        type_def_guid: &str,
        category: TypeDefCategory,
        method: &str,
    ) -> OmrsResult<TypeDef> {
        self.validate_guid(parameter, type_def_guid, method)?;
        let type_def = self.registry.get_type_def_by_guid(type_def_guid, method)?;
        if type_def.category != category {
            return Err(OmrsError::invalid_parameter(
                parameter,
                method,
                format!("type {} is a {:?}, not a {:?}", type_def.name, type_def.category, category),
            ));
        }
        Ok(type_def)
    }

    pub fn validate_instance_status(&self, type_def: &TypeDef, status: InstanceStatus, method: &str) -> OmrsResult<()> {
        if status == InstanceStatus::Unknown || !type_def.valid_instance_statuses.contains(&status) {
            return Err(OmrsError::StatusNotSupported {
                status,
                type_name: type_def.name.clone(),
                method: method.to_string(),
            });
        }
        Ok(())
    }

    /// Status requested by a caller; DELETED is reachable only through delete
    pub fn validate_new_status(&self, type_def: &TypeDef, status: InstanceStatus, method: &str) -> OmrsResult<()> {
        if status == InstanceStatus::Deleted {
            return Err(OmrsError::StatusNotSupported {
                status,
                type_name: type_def.name.clone(),
                method: method.to_string(),
            });
        }
        self.validate_instance_status(type_def, status, method)
    }

    /// Every property must be an attribute of the type (inherited ones
    /// included) holding a value of the attribute's type. With
    /// `require_mandatory` set, required attributes must be present.
    pub fn validate_properties(
        &self,
        type_def: &TypeDef,
        properties: &InstanceProperties,
        require_mandatory: bool,
        method: &str,
    ) -> OmrsResult<()> {
        let attributes = self.attributes_by_name(type_def);

        for (name, value) in properties.iter() {
            let attribute = attributes
                .get(name.as_str())
                .ok_or_else(|| OmrsError::property_error(name, &type_def.name, method, "not defined on the type"))?;
            self.validate_property_value(type_def, attribute, value, method)?;
        }

        if require_mandatory {
            if let Some(missing) = attributes
                .values()
                .find(|attribute| attribute.cardinality.is_required() && !properties.contains(&attribute.attribute_name))
            {
                return Err(OmrsError::property_error(
                    &missing.attribute_name,
                    &type_def.name,
                    method,
                    "required property is missing",
                ));
            }
        }
        Ok(())
    }

    fn validate_property_value(
        &self,
        type_def: &TypeDef,
        attribute: &TypeDefAttribute,
        value: &InstancePropertyValue,
        method: &str,
    ) -> OmrsResult<()> {
        let attribute_type = self
            .registry
            .get_attribute_type_def_by_guid(&attribute.attribute_type.guid, method)?;
        let mismatch = |reason: String| OmrsError::property_error(&attribute.attribute_name, &type_def.name, method, reason);

        match (&attribute_type.kind, value) {
            (AttributeTypeKind::PrimitiveDef { primitive_def_category }, InstancePropertyValue::Primitive { value }) => {
                if value.category() != *primitive_def_category {
                    return Err(mismatch(format!(
                        "expected {:?}, found {:?}",
                        primitive_def_category,
                        value.category()
                    )));
                }
                Ok(())
            }
            (AttributeTypeKind::EnumDef { element_defs, .. }, InstancePropertyValue::Enum { ordinal, symbolic_name }) => {
                match element_defs.iter().find(|element| element.ordinal == *ordinal) {
                    Some(element) if element.value == *symbolic_name => Ok(()),
                    Some(element) => Err(mismatch(format!(
                        "ordinal {} is '{}', not '{}'",
                        ordinal, element.value, symbolic_name
                    ))),
                    None => Err(mismatch(format!("{} has no element with ordinal {}", attribute_type.name, ordinal))),
                }
            }
            (
                AttributeTypeKind::CollectionDef { collection_def_category, argument_types },
                collection,
            ) => {
                let elements: Vec<&InstancePropertyValue> = match (collection_def_category, collection) {
                    (CollectionDefCategory::Array, InstancePropertyValue::Array { values }) => values.iter().collect(),
                    (CollectionDefCategory::Map, InstancePropertyValue::Map { values }) => values.values().collect(),
                    (CollectionDefCategory::Struct, InstancePropertyValue::Struct { .. }) => return Ok(()),
                    _ => {
                        return Err(mismatch(format!("expected a {:?} collection", collection_def_category)));
                    }
                };
                let Some(argument_type) = argument_types.last() else {
                    return Ok(());
                };
                match elements.iter().find(|element| match element {
                    InstancePropertyValue::Primitive { value } => value.category() != *argument_type,
                    _ => true,
                }) {
                    Some(_) => Err(mismatch(format!("collection elements must be {:?}", argument_type))),
                    None => Ok(()),
                }
            }
            (kind, _) => Err(mismatch(format!("value does not fit {} attribute type {}", kind_label(kind), attribute_type.name))),
        }
    }

    /// Classification type for `classification_name`, checked against the
    /// entity's type
    pub fn validate_classification(
        &self,
        entity_type: &TypeDef,
        classification_name: &str,
        method: &str,
    ) -> OmrsResult<TypeDef> {
        self.validate_name("classification_name", classification_name, method)?;
        let classification_error = |reason: String| OmrsError::ClassificationError {
            classification: classification_name.to_string(),
            type_name: entity_type.name.clone(),
            method: method.to_string(),
            reason,
        };

        let classification_type = self
            .registry
            .get_type_def_by_name(classification_name, method)
            .map_err(|_| classification_error("classification type is not registered".to_string()))?;
        if classification_type.category != TypeDefCategory::ClassificationDef {
            return Err(classification_error(format!("{} is not a classification type", classification_name)));
        }

        let applies = classification_type.valid_entity_defs.is_empty()
            || classification_type
                .valid_entity_defs
                .iter()
                .any(|valid| self.registry.is_type_of(&entity_type.name, &valid.name));
        if !applies {
            return Err(classification_error(format!(
                "not valid for entities of type {}",
                entity_type.name
            )));
        }
        Ok(classification_type)
    }

    pub fn validate_classifications(
        &self,
        entity_type: &TypeDef,
        classifications: &[Classification],
        method: &str,
    ) -> OmrsResult<()> {
        let mut seen = HashSet::new();
        for classification in classifications {
            if !seen.insert(classification.name.as_str()) {
                return Err(OmrsError::ClassificationError {
                    classification: classification.name.clone(),
                    type_name: entity_type.name.clone(),
                    method: method.to_string(),
                    reason: "classification is listed more than once".to_string(),
                });
            }
            let classification_type = self.validate_classification(entity_type, &classification.name, method)?;
            self.validate_properties(&classification_type, &classification.properties, true, method)?;
        }
        Ok(())
    }

    /// Each end must be an entity of the type (or a subtype of the type)
    /// the relationship type declares for that end
    pub fn validate_relationship_ends(
        &self,
        relationship_type: &TypeDef,
        entity_one: &EntitySummary,
        entity_two: &EntitySummary,
        method: &str,
    ) -> OmrsResult<()> {
        let ends = [
            ("entity_one_guid", relationship_type.end_def1.as_ref(), entity_one),
            ("entity_two_guid", relationship_type.end_def2.as_ref(), entity_two),
        ];
        for (parameter, end_def, entity) in ends {
            let Some(end_def) = end_def else {
                return Err(OmrsError::InvalidType {
                    name: relationship_type.name.clone(),
                    method: method.to_string(),
                    reason: "relationship type is missing an end definition".to_string(),
                });
            };
            let entity_type_name = &entity.header.instance_type.type_def_name;
            if !self.registry.is_type_of(entity_type_name, &end_def.entity_type.name) {
                return Err(OmrsError::invalid_parameter(
                    parameter,
                    method,
                    format!(
                        "entity {} is a {}, but {} expects a {} at this end",
                        entity.header.guid, entity_type_name, relationship_type.name, end_def.entity_type.name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Proxies describe entities owned elsewhere
    pub fn validate_entity_proxy(&self, proxy: &EntityProxy, local_metadata_collection_id: &str, method: &str) -> OmrsResult<()> {
        self.validate_guid("entity_proxy", &proxy.header.guid, method)?;
        self.validate_type_for_category(
            "entity_proxy",
            &proxy.header.instance_type.type_def_guid,
            TypeDefCategory::EntityDef,
            method,
        )?;
        self.validate_reference_copy_home(&proxy.header, local_metadata_collection_id, method)
    }

    /// A reference copy must name a home, and that home must not be us
    pub fn validate_reference_copy_home(
        &self,
        header: &InstanceHeader,
        local_metadata_collection_id: &str,
        method: &str,
    ) -> OmrsResult<()> {
        match header.metadata_collection_id.as_deref() {
            None | Some("") => Err(OmrsError::invalid_parameter(
                "metadata_collection_id",
                method,
                format!("instance {} does not name its home collection", header.guid),
            )),
            Some(home) if home == local_metadata_collection_id => Err(OmrsError::HomeConflict {
                guid: header.guid.clone(),
                metadata_collection_id: home.to_string(),
                method: method.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    /// The instance must currently belong to `expected_home`
    pub fn validate_home(&self, header: &InstanceHeader, expected_home: &str, method: &str) -> OmrsResult<()> {
        self.validate_guid("home_metadata_collection_id", expected_home, method)?;
        if header.metadata_collection_id.as_deref() != Some(expected_home) {
            return Err(OmrsError::HomeConflict {
                guid: header.guid.clone(),
                metadata_collection_id: header.metadata_collection_id.clone().unwrap_or_default(),
                method: method.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_not_deleted(&self, header: &InstanceHeader, method: &str) -> OmrsResult<()> {
        if header.status == InstanceStatus::Deleted {
            return Err(OmrsError::invalid_parameter(
                "guid",
                method,
                format!("instance {} is deleted", header.guid),
            ));
        }
        Ok(())
    }

    pub fn validate_deleted(&self, header: &InstanceHeader, method: &str) -> OmrsResult<()> {
        if header.status != InstanceStatus::Deleted {
            return Err(OmrsError::InstanceNotDeleted {
                guid: header.guid.clone(),
                method: method.to_string(),
            });
        }
        Ok(())
    }

    /// The new type must share the category and accept the current
    /// properties and status
    pub fn validate_re_type(
        &self,
        current_type: &TypeDef,
        new_type: &TypeDef,
        header: &InstanceHeader,
        properties: &InstanceProperties,
        method: &str,
    ) -> OmrsResult<()> {
        if current_type.category != new_type.category {
            return Err(OmrsError::invalid_parameter(
                "new_type_def_guid",
                method,
                format!("cannot change a {:?} into a {:?}", current_type.category, new_type.category),
            ));
        }
        self.validate_properties(new_type, properties, true, method)?;
        self.validate_instance_status(new_type, header.status, method)
    }

    fn attributes_by_name(&self, type_def: &TypeDef) -> HashMap<String, TypeDefAttribute> {
        self.registry
            .get_all_attributes(type_def)
            .into_iter()
            .map(|attribute| (attribute.attribute_name.clone(), attribute))
            .collect()
    }
}

fn kind_label(kind: &AttributeTypeKind) -> &'static str {
    match kind {
        AttributeTypeKind::PrimitiveDef { .. } => "primitive",
        AttributeTypeKind::CollectionDef { .. } => "collection",
        AttributeTypeKind::EnumDef { .. } => "enum",
        AttributeTypeKind::Unknown => "unknown",
    }
}

/// Anchored pattern matching `value` literally, for exact-name searches
pub fn exact_match_pattern(value: &str) -> InstancePropertyValue {
    InstancePropertyValue::Primitive {
        value: PrimitiveValue::String(regex::escape(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{
        AttributeTypeDef, EnumElementDef, PrimitiveDefCategory, TypeDefAttribute,
    };

    fn registry() -> Arc<TypeRegistry> {
        let registry = TypeRegistry::new();
        let string = AttributeTypeDef::primitive("A-string", PrimitiveDefCategory::String);
        let criticality = AttributeTypeDef::enumeration(
            "A-criticality",
            "Criticality",
            vec![
                EnumElementDef { ordinal: 0, value: "Low".to_string(), description: None },
                EnumElementDef { ordinal: 1, value: "High".to_string(), description: None },
            ],
        );
        registry.add_attribute_type_def(string.clone()).unwrap();
        registry.add_attribute_type_def(criticality.clone()).unwrap();

        let referenceable = TypeDef::entity("T0", "Referenceable")
            .with_attribute(TypeDefAttribute::new("qualifiedName", &string).required().unique());
        let asset = TypeDef::entity("T1", "Asset")
            .with_super_type(&referenceable)
            .with_attribute(TypeDefAttribute::new("criticality", &criticality));
        let confidential = TypeDef::classification("C1", "Confidentiality").with_valid_entity(&asset);
        let person = TypeDef::entity("T2", "Person");
        registry.add_type_def(referenceable).unwrap();
        registry.add_type_def(asset).unwrap();
        registry.add_type_def(person).unwrap();
        registry.add_type_def(confidential).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_guid_format() {
        let validator = RepositoryValidator::new(registry());
        assert!(validator.validate_guid("guid", "T1", "m").is_ok());
        for bad in ["", "  ", "a b", "tab\there"] {
            let err = validator.validate_guid("guid", bad, "m").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
            assert_eq!(err.parameter(), Some("guid"));
        }
        let long = "x".repeat(MAX_GUID_LENGTH + 1);
        assert!(validator.validate_guid("guid", &long, "m").is_err());
    }

    #[test]
    fn test_paging_bounds() {
        let validator = RepositoryValidator::new(registry()).with_max_page_size(50);
        assert_eq!(validator.bounded_paging(Paging::unbounded(), "m").unwrap().page_size, 50);
        assert_eq!(validator.bounded_paging(Paging::new(5, 10), "m").unwrap(), Paging::new(5, 10));
        let err = validator.bounded_paging(Paging::first(51), "m").unwrap_err();
        assert_eq!(err.parameter(), Some("page_size"));
    }

    #[test]
    fn test_future_as_of_time_rejected() {
        let validator = RepositoryValidator::new(registry());
        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(validator.validate_as_of_time(Some(future), "m").is_err());
        assert!(validator.validate_as_of_time(Some(Utc::now()), "m").is_ok());
        assert!(validator.validate_as_of_time(None, "m").is_ok());
    }

    #[test]
    fn test_properties_against_inherited_attributes() {
        let registry = registry();
        let validator = RepositoryValidator::new(registry.clone());
        let asset = registry.get_type_def_by_name("Asset", "test").unwrap();

        let good = InstanceProperties::new()
            .with_string("qualifiedName", "a1")
            .with(
                "criticality",
                InstancePropertyValue::Enum { ordinal: 1, symbolic_name: "High".to_string() },
            );
        assert!(validator.validate_properties(&asset, &good, true, "m").is_ok());

        let missing = InstanceProperties::new();
        let err = validator.validate_properties(&asset, &missing, true, "m").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PropertyError);
        assert_eq!(err.parameter(), Some("qualifiedName"));
        assert!(validator.validate_properties(&asset, &missing, false, "m").is_ok());

        let undefined = InstanceProperties::new().with_string("colour", "red");
        assert_eq!(
            validator.validate_properties(&asset, &undefined, false, "m").unwrap_err().parameter(),
            Some("colour")
        );

        let wrong_type = InstanceProperties::new().with("qualifiedName", InstancePropertyValue::int(7));
        assert!(validator.validate_properties(&asset, &wrong_type, false, "m").is_err());

        let bad_enum = InstanceProperties::new().with(
            "criticality",
            InstancePropertyValue::Enum { ordinal: 5, symbolic_name: "Huge".to_string() },
        );
        assert!(validator.validate_properties(&asset, &bad_enum, false, "m").is_err());
    }

    #[test]
    fn test_status_rules() {
        let registry = registry();
        let validator = RepositoryValidator::new(registry.clone());
        let asset = registry.get_type_def_by_name("Asset", "test").unwrap();
        assert!(validator.validate_new_status(&asset, InstanceStatus::Active, "m").is_ok());
        assert_eq!(
            validator.validate_new_status(&asset, InstanceStatus::Draft, "m").unwrap_err().kind(),
            ErrorKind::StatusNotSupported
        );
        assert_eq!(
            validator.validate_new_status(&asset, InstanceStatus::Deleted, "m").unwrap_err().kind(),
            ErrorKind::StatusNotSupported
        );
    }

    #[test]
    fn test_classification_scope() {
        let registry = registry();
        let validator = RepositoryValidator::new(registry.clone());
        let asset = registry.get_type_def_by_name("Asset", "test").unwrap();
        let person = registry.get_type_def_by_name("Person", "test").unwrap();

        assert!(validator.validate_classification(&asset, "Confidentiality", "m").is_ok());
        assert_eq!(
            validator.validate_classification(&person, "Confidentiality", "m").unwrap_err().kind(),
            ErrorKind::ClassificationError
        );
        assert_eq!(
            validator.validate_classification(&asset, "Unheard", "m").unwrap_err().kind(),
            ErrorKind::ClassificationError
        );
    }

    #[test]
    fn test_reference_copy_home() {
        let registry = registry();
        let validator = RepositoryValidator::new(registry.clone());
        let asset = registry.get_type_def_by_name("Asset", "test").unwrap();
        let mut header = InstanceHeader::new("e1".to_string(), registry.instance_type_for(&asset), InstanceStatus::Active, "u");

        assert_eq!(
            validator.validate_reference_copy_home(&header, "local", "m").unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
        header.metadata_collection_id = Some("local".to_string());
        assert_eq!(
            validator.validate_reference_copy_home(&header, "local", "m").unwrap_err().kind(),
            ErrorKind::HomeConflict
        );
        header.metadata_collection_id = Some("remote".to_string());
        assert!(validator.validate_reference_copy_home(&header, "local", "m").is_ok());
    }

    #[test]
    fn test_match_properties_must_be_defined() {
        let registry = registry();
        let validator = RepositoryValidator::new(registry.clone());
        let asset = registry.get_type_def_by_name("Asset", "test").unwrap();

        let empty = InstanceProperties::new();
        assert!(validator.validate_match_properties(Some(&asset), Some(&empty), "m").is_err());

        let unknown = InstanceProperties::new().with_string("colour", "red");
        assert_eq!(
            validator.validate_match_properties(Some(&asset), Some(&unknown), "m").unwrap_err().kind(),
            ErrorKind::PropertyError
        );

        let bad_pattern = InstanceProperties::new().with_string("qualifiedName", "(");
        assert_eq!(
            validator.validate_match_properties(Some(&asset), Some(&bad_pattern), "m").unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );

        let exact = InstanceProperties::new().with("qualifiedName", exact_match_pattern("a.(1)"));
        assert!(validator.validate_match_properties(Some(&asset), Some(&exact), "m").is_ok());
    }
}
