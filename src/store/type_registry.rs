use crate::error::{OmrsError, OmrsResult};
use crate::model::{
    AttributeTypeDef, AttributeTypeDefCategory, AttributeTypeKind, CollectionDefCategory,
    EnumDefPatch, Guid, InstanceStatus, InstanceType, TypeDef, TypeDefAttribute,
    TypeDefCategory, TypeDefGallery, TypeDefLink, TypeDefPatch,
};
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use itertools::Itertools;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Immutable view of every registered definition
#[derive(Debug, Clone, Default)]
struct RegistrySnapshot {
    type_defs: IndexMap<Guid, TypeDef>,
    type_def_names: HashMap<String, Guid>,
    attribute_type_defs: IndexMap<Guid, AttributeTypeDef>,
    attribute_type_def_names: HashMap<String, Guid>,
}

/// Outcome of comparing a candidate definition with the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Known,
    New,
}

impl RegistrySnapshot {
    fn type_def_named(&self, name: &str) -> Option<&TypeDef> {
        self.type_def_names
            .get(name)
            .and_then(|guid| self.type_defs.get(guid))
    }

    fn attribute_type_def_named(&self, name: &str) -> Option<&AttributeTypeDef> {
        self.attribute_type_def_names
            .get(name)
            .and_then(|guid| self.attribute_type_defs.get(guid))
    }

    fn insert_type_def(&mut self, type_def: TypeDef) {
        self.type_def_names
            .insert(type_def.name.clone(), type_def.guid.clone());
        self.type_defs.insert(type_def.guid.clone(), type_def);
    }

    fn remove_type_def(&mut self, guid: &str) -> Option<TypeDef> {
        let removed = self.type_defs.shift_remove(guid)?;
        self.type_def_names.remove(&removed.name);
        Some(removed)
    }

    fn insert_attribute_type_def(&mut self, attribute_type_def: AttributeTypeDef) {
        self.attribute_type_def_names.insert(
            attribute_type_def.name.clone(),
            attribute_type_def.guid.clone(),
        );
        self.attribute_type_defs
            .insert(attribute_type_def.guid.clone(), attribute_type_def);
    }

    fn remove_attribute_type_def(&mut self, guid: &str) -> Option<AttributeTypeDef> {
        let removed = self.attribute_type_defs.shift_remove(guid)?;
        self.attribute_type_def_names.remove(&removed.name);
        Some(removed)
    }

    /// Super types from the immediate parent upwards
    fn super_types(&self, type_def: &TypeDef) -> Vec<TypeDefLink> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = type_def.super_type.clone();

        while let Some(link) = next {
            if !seen.insert(link.guid.clone()) {
                break;
            }
            next = self
                .type_defs
                .get(&link.guid)
                .and_then(|parent| parent.super_type.clone());
            chain.push(link);
        }
        chain
    }

    /// Attributes of the type and its super types, inherited ones first
    fn all_attributes(&self, type_def: &TypeDef) -> Vec<TypeDefAttribute> {
        let mut attributes: Vec<TypeDefAttribute> = self
            .super_types(type_def)
            .iter()
            .rev()
            .filter_map(|link| self.type_defs.get(&link.guid))
            .flat_map(|parent| parent.property_definitions.iter().cloned())
            .collect();
        attributes.extend(type_def.property_definitions.iter().cloned());
        attributes
    }

    fn is_type_of(&self, type_name: &str, super_type_name: &str) -> bool {
        if type_name == super_type_name {
            return self.type_def_names.contains_key(type_name);
        }
        match self.type_def_named(type_name) {
            Some(type_def) => self
                .super_types(type_def)
                .iter()
                .any(|link| link.name == super_type_name),
            None => false,
        }
    }

    fn registration_of_type_def(&self, type_def: &TypeDef, method: &str) -> OmrsResult<Registration> {
        if let Some(existing) = self.type_defs.get(&type_def.guid) {
            if existing == type_def {
                return Ok(Registration::Known);
            }
            let reason = if existing.name != type_def.name {
                format!("guid is already registered for type {}", existing.name)
            } else {
                format!(
                    "definition differs from registered version {}",
                    existing.version
                )
            };
            return Err(type_conflict(type_def, method, reason));
        }

        if let Some(guid) = self.type_def_names.get(&type_def.name) {
            return Err(type_conflict(
                type_def,
                method,
                format!("name is already registered with guid {}", guid),
            ));
        }

        Ok(Registration::New)
    }

    fn registration_of_attribute_type_def(
        &self,
        attribute_type_def: &AttributeTypeDef,
        method: &str,
    ) -> OmrsResult<Registration> {
        let conflict = |reason: String| OmrsError::TypeConflict {
            guid: attribute_type_def.guid.clone(),
            name: attribute_type_def.name.clone(),
            method: method.to_string(),
            reason,
        };

        if let Some(existing) = self.attribute_type_defs.get(&attribute_type_def.guid) {
            if existing == attribute_type_def {
                return Ok(Registration::Known);
            }
            return Err(if existing.name != attribute_type_def.name {
                conflict(format!(
                    "guid is already registered for attribute type {}",
                    existing.name
                ))
            } else {
                conflict(format!(
                    "definition differs from registered version {}",
                    existing.version
                ))
            });
        }

        if let Some(guid) = self.attribute_type_def_names.get(&attribute_type_def.name) {
            return Err(conflict(format!(
                "name is already registered with guid {}",
                guid
            )));
        }

        Ok(Registration::New)
    }

    fn check_type_def(&self, type_def: &TypeDef, method: &str) -> OmrsResult<()> {
        let invalid = |reason: String| OmrsError::InvalidType {
            name: type_def.name.clone(),
            method: method.to_string(),
            reason,
        };

        if type_def.guid.trim().is_empty() {
            return Err(invalid("guid is blank".to_string()));
        }
        if type_def.name.trim().is_empty() {
            return Err(invalid("name is blank".to_string()));
        }
        if type_def.category == TypeDefCategory::Unknown {
            return Err(invalid("category is missing".to_string()));
        }
        if type_def.version == 0 {
            return Err(invalid("version must be at least 1".to_string()));
        }

        let mut inherited = Vec::new();
        if let Some(link) = &type_def.super_type {
            let parent = self
                .type_defs
                .get(&link.guid)
                .ok_or_else(|| invalid(format!("super type {} is not registered", link.name)))?;
            if parent.name != link.name {
                return Err(invalid(format!(
                    "super type guid {} belongs to {}, not {}",
                    link.guid, parent.name, link.name
                )));
            }
            if parent.category != type_def.category {
                return Err(invalid(format!(
                    "super type {} is a {:?}",
                    parent.name, parent.category
                )));
            }
            if link.guid == type_def.guid
                || self
                    .super_types(parent)
                    .iter()
                    .any(|ancestor| ancestor.guid == type_def.guid)
            {
                return Err(invalid("super type chain is circular".to_string()));
            }
            inherited = self.all_attributes(parent);
        }

        let mut names: HashSet<&str> = inherited
            .iter()
            .map(|attribute| attribute.attribute_name.as_str())
            .collect();
        for attribute in &type_def.property_definitions {
            if attribute.attribute_name.trim().is_empty() {
                return Err(invalid("property list holds an attribute with no name".to_string()));
            }
            if !names.insert(attribute.attribute_name.as_str()) {
                return Err(invalid(format!(
                    "attribute {} is defined more than once",
                    attribute.attribute_name
                )));
            }
            match self.attribute_type_defs.get(&attribute.attribute_type.guid) {
                Some(attribute_type) if attribute_type.name == attribute.attribute_type.name => {}
                _ => {
                    return Err(invalid(format!(
                        "attribute {} refers to unknown attribute type {}",
                        attribute.attribute_name, attribute.attribute_type.name
                    )))
                }
            }
        }

        if type_def.valid_instance_statuses.is_empty() {
            return Err(invalid("no valid instance statuses".to_string()));
        }
        if type_def
            .valid_instance_statuses
            .contains(&InstanceStatus::Unknown)
        {
            return Err(invalid("UNKNOWN is not a valid instance status".to_string()));
        }
        if type_def.initial_status == InstanceStatus::Deleted
            || !type_def
                .valid_instance_statuses
                .contains(&type_def.initial_status)
        {
            return Err(invalid(format!(
                "initial status {:?} is not permitted",
                type_def.initial_status
            )));
        }

        match type_def.category {
            TypeDefCategory::RelationshipDef => {
                for end in [&type_def.end_def1, &type_def.end_def2] {
                    let end = end
                        .as_ref()
                        .ok_or_else(|| invalid("relationship end is missing".to_string()))?;
                    self.check_entity_link(&end.entity_type)
                        .map_err(|reason| invalid(reason))?;
                }
            }
            _ => {
                if type_def.end_def1.is_some() || type_def.end_def2.is_some() {
                    return Err(invalid("only relationship types have ends".to_string()));
                }
            }
        }

        if type_def.category == TypeDefCategory::ClassificationDef {
            for link in &type_def.valid_entity_defs {
                self.check_entity_link(link).map_err(|reason| invalid(reason))?;
            }
        } else if !type_def.valid_entity_defs.is_empty() {
            return Err(invalid("only classification types list valid entities".to_string()));
        }

        Ok(())
    }

    fn check_entity_link(&self, link: &TypeDefLink) -> Result<(), String> {
        match self.type_defs.get(&link.guid) {
            Some(entity_def)
                if entity_def.name == link.name
                    && entity_def.category == TypeDefCategory::EntityDef =>
            {
                Ok(())
            }
            _ => Err(format!("{} is not a registered entity type", link.name)),
        }
    }

    fn check_attribute_type_def(&self, attribute_type_def: &AttributeTypeDef, method: &str) -> OmrsResult<()> {
        let invalid = |reason: &str| OmrsError::InvalidType {
            name: attribute_type_def.name.clone(),
            method: method.to_string(),
            reason: reason.to_string(),
        };

        if attribute_type_def.guid.trim().is_empty() {
            return Err(invalid("guid is blank"));
        }
        if attribute_type_def.name.trim().is_empty() {
            return Err(invalid("name is blank"));
        }
        if attribute_type_def.version == 0 {
            return Err(invalid("version must be at least 1"));
        }

        match &attribute_type_def.kind {
            AttributeTypeKind::PrimitiveDef { .. } => Ok(()),
            AttributeTypeKind::CollectionDef {
                collection_def_category,
                argument_types,
            } => {
                let expected = match collection_def_category {
                    CollectionDefCategory::Array => Some(1),
                    CollectionDefCategory::Map => Some(2),
                    CollectionDefCategory::Struct => None,
                };
                match expected {
                    Some(count) if argument_types.len() != count => {
                        Err(invalid("collection has the wrong number of argument types"))
                    }
                    _ => Ok(()),
                }
            }
            AttributeTypeKind::EnumDef {
                element_defs,
                default_value,
            } => {
                if element_defs.is_empty() {
                    return Err(invalid("enum has no elements"));
                }
                if !element_defs.iter().map(|e| e.ordinal).all_unique() {
                    return Err(invalid("enum ordinals are not unique"));
                }
                if !element_defs.iter().map(|e| e.value.as_str()).all_unique() {
                    return Err(invalid("enum values are not unique"));
                }
                if let Some(default) = default_value {
                    if !element_defs.iter().any(|e| e.ordinal == *default) {
                        return Err(invalid("enum default is not one of its elements"));
                    }
                }
                Ok(())
            }
            AttributeTypeKind::Unknown => Err(invalid("category is missing")),
        }
    }

    fn existing_type_def(&self, guid: &str, name: &str, method: &str) -> OmrsResult<&TypeDef> {
        match self.type_defs.get(guid) {
            Some(type_def) if type_def.name == name => Ok(type_def),
            _ => Err(OmrsError::type_not_known(
                &format!("{} ({})", name, guid),
                method,
            )),
        }
    }

    fn existing_attribute_type_def(&self, guid: &str, name: &str, method: &str) -> OmrsResult<&AttributeTypeDef> {
        match self.attribute_type_defs.get(guid) {
            Some(attribute_type_def) if attribute_type_def.name == name => Ok(attribute_type_def),
            _ => Err(OmrsError::type_not_known(
                &format!("{} ({})", name, guid),
                method,
            )),
        }
    }

    fn patched_type_def(&self, patch: &TypeDefPatch, method: &str) -> OmrsResult<TypeDef> {
        let existing = self.existing_type_def(&patch.type_def_guid, &patch.type_def_name, method)?;
        let incompatible = |reason: String| OmrsError::IncompatiblePatch {
            guid: existing.guid.clone(),
            name: existing.name.clone(),
            method: method.to_string(),
            reason,
        };

        if patch.applies_to_version != existing.version {
            return Err(incompatible(format!(
                "patch applies to version {} but the registered version is {}",
                patch.applies_to_version, existing.version
            )));
        }
        if patch.updated_to_version <= patch.applies_to_version {
            return Err(incompatible(format!(
                "updated version {} does not follow {}",
                patch.updated_to_version, patch.applies_to_version
            )));
        }

        let mut names: HashSet<String> = self
            .all_attributes(existing)
            .into_iter()
            .map(|attribute| attribute.attribute_name)
            .collect();
        for attribute in &patch.property_definitions {
            if attribute.cardinality.is_required() {
                return Err(incompatible(format!(
                    "added attribute {} must be optional",
                    attribute.attribute_name
                )));
            }
            if !names.insert(attribute.attribute_name.clone()) {
                return Err(incompatible(format!(
                    "attribute {} already exists",
                    attribute.attribute_name
                )));
            }
            if !self
                .attribute_type_defs
                .contains_key(&attribute.attribute_type.guid)
            {
                return Err(incompatible(format!(
                    "attribute {} refers to unknown attribute type {}",
                    attribute.attribute_name, attribute.attribute_type.name
                )));
            }
        }

        let mut patched = existing.clone();
        if let Some(statuses) = &patch.valid_instance_statuses {
            if let Some(dropped) = existing
                .valid_instance_statuses
                .iter()
                .find(|status| !statuses.contains(status))
            {
                return Err(incompatible(format!("status {:?} would be removed", dropped)));
            }
            if statuses.contains(&InstanceStatus::Unknown) {
                return Err(incompatible("UNKNOWN is not a valid instance status".to_string()));
            }
            patched.valid_instance_statuses = statuses.clone();
        }

        patched.version = patch.updated_to_version;
        if let Some(version_name) = &patch.new_version_name {
            patched.version_name = version_name.clone();
        }
        if let Some(description) = &patch.description {
            patched.description = Some(description.clone());
        }
        patched
            .property_definitions
            .extend(patch.property_definitions.iter().cloned());
        Ok(patched)
    }

    fn patched_attribute_type_def(&self, patch: &EnumDefPatch, method: &str) -> OmrsResult<AttributeTypeDef> {
        let existing = self.existing_attribute_type_def(&patch.guid, &patch.name, method)?;
        let incompatible = |reason: &str| OmrsError::IncompatiblePatch {
            guid: existing.guid.clone(),
            name: existing.name.clone(),
            method: method.to_string(),
            reason: reason.to_string(),
        };

        let AttributeTypeKind::EnumDef {
            element_defs,
            default_value,
        } = &existing.kind
        else {
            return Err(incompatible("only enum attribute types can be patched"));
        };

        if patch.applies_to_version != existing.version {
            return Err(incompatible("patch does not apply to the registered version"));
        }
        if patch.updated_to_version <= patch.applies_to_version {
            return Err(incompatible("updated version does not follow the current one"));
        }
        let kept = element_defs.iter().all(|element| {
            patch
                .element_defs
                .iter()
                .any(|candidate| candidate.ordinal == element.ordinal && candidate.value == element.value)
        });
        if !kept {
            return Err(incompatible("patch removes or changes an existing enum element"));
        }
        if !patch.element_defs.iter().map(|e| e.ordinal).all_unique() {
            return Err(incompatible("enum ordinals are not unique"));
        }

        let mut patched = existing.clone();
        patched.version = patch.updated_to_version;
        patched.kind = AttributeTypeKind::EnumDef {
            element_defs: patch.element_defs.clone(),
            default_value: *default_value,
        };
        Ok(patched)
    }

    fn re_identified_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
        method: &str,
    ) -> OmrsResult<TypeDef> {
        let existing = self.existing_type_def(original_guid, original_name, method)?;
        let conflict = |reason: String| OmrsError::TypeConflict {
            guid: new_guid.to_string(),
            name: new_name.to_string(),
            method: method.to_string(),
            reason,
        };

        if new_guid != original_guid && self.type_defs.contains_key(new_guid) {
            return Err(conflict("new guid is already registered".to_string()));
        }
        if new_name != original_name && self.type_def_names.contains_key(new_name) {
            return Err(conflict("new name is already registered".to_string()));
        }

        let mut renamed = existing.clone();
        renamed.guid = new_guid.to_string();
        renamed.name = new_name.to_string();
        renamed.version += 1;
        Ok(renamed)
    }

    fn re_identified_attribute_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
        method: &str,
    ) -> OmrsResult<AttributeTypeDef> {
        let existing = self.existing_attribute_type_def(original_guid, original_name, method)?;
        let conflict = |reason: &str| OmrsError::TypeConflict {
            guid: new_guid.to_string(),
            name: new_name.to_string(),
            method: method.to_string(),
            reason: reason.to_string(),
        };

        if new_guid != original_guid && self.attribute_type_defs.contains_key(new_guid) {
            return Err(conflict("new guid is already registered"));
        }
        if new_name != original_name && self.attribute_type_def_names.contains_key(new_name) {
            return Err(conflict("new name is already registered"));
        }

        let mut renamed = existing.clone();
        renamed.guid = new_guid.to_string();
        renamed.name = new_name.to_string();
        renamed.version += 1;
        Ok(renamed)
    }

    fn deletable_type_def(&self, guid: &str, name: &str, method: &str) -> OmrsResult<TypeDef> {
        let existing = self.existing_type_def(guid, name, method)?;
        let referenced = self.type_defs.values().any(|other| {
            other.guid != guid
                && (other.super_type.as_ref().is_some_and(|link| link.guid == guid)
                    || [&other.end_def1, &other.end_def2]
                        .into_iter()
                        .flatten()
                        .any(|end| end.entity_type.guid == guid)
                    || other.valid_entity_defs.iter().any(|link| link.guid == guid))
        });
        if referenced {
            return Err(OmrsError::TypeInUse {
                guid: guid.to_string(),
                name: name.to_string(),
                method: method.to_string(),
            });
        }
        Ok(existing.clone())
    }

    fn deletable_attribute_type_def(&self, guid: &str, name: &str, method: &str) -> OmrsResult<AttributeTypeDef> {
        let existing = self.existing_attribute_type_def(guid, name, method)?;
        let referenced = self
            .type_defs
            .values()
            .flat_map(|type_def| type_def.property_definitions.iter())
            .any(|attribute| attribute.attribute_type.guid == guid);
        if referenced {
            return Err(OmrsError::TypeInUse {
                guid: guid.to_string(),
                name: name.to_string(),
                method: method.to_string(),
            });
        }
        Ok(existing.clone())
    }

    /// Point every link at `original_guid` to the re-identified type
    fn relink_type_def(&mut self, original_guid: &str, renamed: &TypeDef) {
        let link = renamed.link();
        for other in self.type_defs.values_mut() {
            other.relink(original_guid, &link);
        }
    }

    fn relink_attribute_type_def(&mut self, original_guid: &str, renamed: &AttributeTypeDef) {
        for type_def in self.type_defs.values_mut() {
            type_def.relink_attribute_type(original_guid, renamed);
        }
    }
}

fn type_conflict(type_def: &TypeDef, method: &str, reason: String) -> OmrsError {
    OmrsError::TypeConflict {
        guid: type_def.guid.clone(),
        name: type_def.name.clone(),
        method: method.to_string(),
        reason,
    }
}

/// Compile a type-name search. Plain names with `*`/`?` are globs,
/// anything else is a regular expression. Either way the whole name must match.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let is_glob = pattern
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '*' | '?' | '_' | '-' | ' '));
    let body = if is_glob {
        pattern
            .chars()
            .map(|c| match c {
                '*' => ".*".to_string(),
                '?' => ".".to_string(),
                other => regex::escape(&other.to_string()),
            })
            .collect::<String>()
    } else {
        pattern.to_string()
    };
    Regex::new(&format!("^(?:{})$", body))
}

/// Shared cache of type definitions.
///
/// Readers take a lock-free snapshot; writers are serialized and publish a
/// new snapshot once their change is complete.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    fn write<T>(&self, change: impl FnOnce(&mut RegistrySnapshot) -> OmrsResult<T>) -> OmrsResult<T> {
        let _guard = self.writer.lock();
        let mut next = RegistrySnapshot::clone(&self.snapshot.load());
        let result = change(&mut next)?;
        self.snapshot.store(Arc::new(next));
        Ok(result)
    }

    pub fn len(&self) -> usize {
        let snapshot = self.read();
        snapshot.type_defs.len() + snapshot.attribute_type_defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_type_def(&self, type_def: TypeDef) -> OmrsResult<()> {
        const METHOD: &str = "add_type_def";
        self.write(|snapshot| {
            match snapshot.registration_of_type_def(&type_def, METHOD)? {
                Registration::Known => Err(OmrsError::TypeAlreadyKnown {
                    guid: type_def.guid.clone(),
                    name: type_def.name.clone(),
                    method: METHOD.to_string(),
                }),
                Registration::New => {
                    snapshot.check_type_def(&type_def, METHOD)?;
                    log::info!("Registered type {} ({})", type_def.name, type_def.guid);
                    snapshot.insert_type_def(type_def);
                    Ok(())
                }
            }
        })
    }

    pub fn add_attribute_type_def(&self, attribute_type_def: AttributeTypeDef) -> OmrsResult<()> {
        const METHOD: &str = "add_attribute_type_def";
        self.write(|snapshot| {
            match snapshot.registration_of_attribute_type_def(&attribute_type_def, METHOD)? {
                Registration::Known => Err(OmrsError::TypeAlreadyKnown {
                    guid: attribute_type_def.guid.clone(),
                    name: attribute_type_def.name.clone(),
                    method: METHOD.to_string(),
                }),
                Registration::New => {
                    snapshot.check_attribute_type_def(&attribute_type_def, METHOD)?;
                    log::info!(
                        "Registered attribute type {} ({})",
                        attribute_type_def.name,
                        attribute_type_def.guid
                    );
                    snapshot.insert_attribute_type_def(attribute_type_def);
                    Ok(())
                }
            }
        })
    }

    /// Register a gallery, resolving super types and ends regardless of
    /// order. Definitions that are already registered unchanged are skipped.
    /// Returns the number of newly registered definitions.
    pub fn add_type_def_gallery(&self, gallery: TypeDefGallery) -> OmrsResult<usize> {
        const METHOD: &str = "add_type_def_gallery";
        self.write(|snapshot| {
            let mut added = 0;
            for attribute_type_def in gallery.attribute_type_defs {
                snapshot.check_attribute_type_def(&attribute_type_def, METHOD)?;
                if snapshot.registration_of_attribute_type_def(&attribute_type_def, METHOD)?
                    == Registration::New
                {
                    snapshot.insert_attribute_type_def(attribute_type_def);
                    added += 1;
                }
            }

            let mut pending = gallery.type_defs;
            while !pending.is_empty() {
                let before = pending.len();
                let mut deferred = Vec::new();
                let mut first_failure = None;
                for type_def in pending {
                    if snapshot.registration_of_type_def(&type_def, METHOD)? == Registration::Known {
                        continue;
                    }
                    match snapshot.check_type_def(&type_def, METHOD) {
                        Ok(()) => {
                            snapshot.insert_type_def(type_def);
                            added += 1;
                        }
                        Err(err) => {
                            first_failure.get_or_insert(err);
                            deferred.push(type_def);
                        }
                    }
                }
                if let Some(err) = first_failure {
                    if deferred.len() == before {
                        return Err(err);
                    }
                }
                pending = deferred;
            }
            Ok(added)
        })
    }

    /// True when an identical definition is registered, false when it is new
    pub fn verify_type_def(&self, type_def: &TypeDef) -> OmrsResult<bool> {
        const METHOD: &str = "verify_type_def";
        let snapshot = self.read();
        let registration = snapshot.registration_of_type_def(type_def, METHOD)?;
        if registration == Registration::New {
            snapshot.check_type_def(type_def, METHOD)?;
        }
        Ok(registration == Registration::Known)
    }

    pub fn verify_attribute_type_def(&self, attribute_type_def: &AttributeTypeDef) -> OmrsResult<bool> {
        const METHOD: &str = "verify_attribute_type_def";
        let snapshot = self.read();
        let registration = snapshot.registration_of_attribute_type_def(attribute_type_def, METHOD)?;
        if registration == Registration::New {
            snapshot.check_attribute_type_def(attribute_type_def, METHOD)?;
        }
        Ok(registration == Registration::Known)
    }

    pub fn get_type_def_by_guid(&self, guid: &str, method: &str) -> OmrsResult<TypeDef> {
        self.read()
            .type_defs
            .get(guid)
            .cloned()
            .ok_or_else(|| OmrsError::type_not_known(guid, method))
    }

    pub fn get_type_def_by_name(&self, name: &str, method: &str) -> OmrsResult<TypeDef> {
        self.read()
            .type_def_named(name)
            .cloned()
            .ok_or_else(|| OmrsError::type_not_known(name, method))
    }

    pub fn get_attribute_type_def_by_guid(&self, guid: &str, method: &str) -> OmrsResult<AttributeTypeDef> {
        self.read()
            .attribute_type_defs
            .get(guid)
            .cloned()
            .ok_or_else(|| OmrsError::type_not_known(guid, method))
    }

    pub fn get_attribute_type_def_by_name(&self, name: &str, method: &str) -> OmrsResult<AttributeTypeDef> {
        self.read()
            .attribute_type_def_named(name)
            .cloned()
            .ok_or_else(|| OmrsError::type_not_known(name, method))
    }

    pub fn get_all_types(&self) -> TypeDefGallery {
        let snapshot = self.read();
        TypeDefGallery {
            attribute_type_defs: snapshot.attribute_type_defs.values().cloned().collect(),
            type_defs: snapshot.type_defs.values().cloned().collect(),
        }
    }

    pub fn find_types_by_name(&self, pattern: &str) -> OmrsResult<TypeDefGallery> {
        let regex = wildcard_regex(pattern).map_err(|err| {
            OmrsError::invalid_parameter("name", "find_types_by_name", err.to_string())
        })?;
        let snapshot = self.read();
        Ok(TypeDefGallery {
            attribute_type_defs: snapshot
                .attribute_type_defs
                .values()
                .filter(|def| regex.is_match(&def.name))
                .cloned()
                .collect(),
            type_defs: snapshot
                .type_defs
                .values()
                .filter(|def| regex.is_match(&def.name))
                .cloned()
                .collect(),
        })
    }

    pub fn find_type_defs_by_category(&self, category: TypeDefCategory) -> Vec<TypeDef> {
        self.read()
            .type_defs
            .values()
            .filter(|def| def.category == category)
            .cloned()
            .collect()
    }

    pub fn find_attribute_type_defs_by_category(&self, category: AttributeTypeDefCategory) -> Vec<AttributeTypeDef> {
        self.read()
            .attribute_type_defs
            .values()
            .filter(|def| def.category() == category)
            .cloned()
            .collect()
    }

    /// Types that define, directly or by inheritance, every named property
    pub fn find_type_defs_by_property(&self, property_names: &[String]) -> Vec<TypeDef> {
        let snapshot = self.read();
        snapshot
            .type_defs
            .values()
            .filter(|def| {
                let names: HashSet<String> = snapshot
                    .all_attributes(def)
                    .into_iter()
                    .map(|attribute| attribute.attribute_name)
                    .collect();
                property_names.iter().all(|name| names.contains(name))
            })
            .cloned()
            .collect()
    }

    /// Free-text search over type names and descriptions
    pub fn search_for_type_defs(&self, search_criteria: &str) -> OmrsResult<Vec<TypeDef>> {
        let regex = Regex::new(search_criteria).map_err(|err| {
            OmrsError::invalid_parameter("search_criteria", "search_for_type_defs", err.to_string())
        })?;
        Ok(self
            .read()
            .type_defs
            .values()
            .filter(|def| {
                regex.is_match(&def.name)
                    || def
                        .description
                        .as_deref()
                        .is_some_and(|description| regex.is_match(description))
            })
            .cloned()
            .collect())
    }

    /// Preview of a patch, without changing the registry
    pub fn patch_type_def(&self, patch: &TypeDefPatch) -> OmrsResult<TypeDef> {
        self.read().patched_type_def(patch, "update_type_def")
    }

    pub fn update_type_def(&self, patch: &TypeDefPatch) -> OmrsResult<TypeDef> {
        self.write(|snapshot| {
            let patched = snapshot.patched_type_def(patch, "update_type_def")?;
            log::info!("Patched type {} to version {}", patched.name, patched.version);
            snapshot.insert_type_def(patched.clone());
            Ok(patched)
        })
    }

    pub fn patch_attribute_type_def(&self, patch: &EnumDefPatch) -> OmrsResult<AttributeTypeDef> {
        self.read()
            .patched_attribute_type_def(patch, "update_attribute_type_def")
    }

    pub fn update_attribute_type_def(&self, patch: &EnumDefPatch) -> OmrsResult<AttributeTypeDef> {
        self.write(|snapshot| {
            let patched = snapshot.patched_attribute_type_def(patch, "update_attribute_type_def")?;
            snapshot.insert_attribute_type_def(patched.clone());
            Ok(patched)
        })
    }

    pub fn check_re_identify_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<TypeDef> {
        self.read().re_identified_type_def(
            original_guid,
            original_name,
            new_guid,
            new_name,
            "re_identify_type_def",
        )
    }

    pub fn re_identify_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<TypeDef> {
        self.write(|snapshot| {
            let renamed = snapshot.re_identified_type_def(
                original_guid,
                original_name,
                new_guid,
                new_name,
                "re_identify_type_def",
            )?;
            snapshot.remove_type_def(original_guid);
            snapshot.relink_type_def(original_guid, &renamed);
            snapshot.insert_type_def(renamed.clone());
            log::info!(
                "Re-identified type {} ({}) as {} ({})",
                original_name,
                original_guid,
                new_name,
                new_guid
            );
            Ok(renamed)
        })
    }

    pub fn check_re_identify_attribute_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<AttributeTypeDef> {
        self.read().re_identified_attribute_type_def(
            original_guid,
            original_name,
            new_guid,
            new_name,
            "re_identify_attribute_type_def",
        )
    }

    pub fn re_identify_attribute_type_def(
        &self,
        original_guid: &str,
        original_name: &str,
        new_guid: &str,
        new_name: &str,
    ) -> OmrsResult<AttributeTypeDef> {
        self.write(|snapshot| {
            let renamed = snapshot.re_identified_attribute_type_def(
                original_guid,
                original_name,
                new_guid,
                new_name,
                "re_identify_attribute_type_def",
            )?;
            snapshot.remove_attribute_type_def(original_guid);
            snapshot.relink_attribute_type_def(original_guid, &renamed);
            snapshot.insert_attribute_type_def(renamed.clone());
            Ok(renamed)
        })
    }

    pub fn check_delete_type_def(&self, guid: &str, name: &str) -> OmrsResult<TypeDef> {
        self.read().deletable_type_def(guid, name, "delete_type_def")
    }

    pub fn delete_type_def(&self, guid: &str, name: &str) -> OmrsResult<TypeDef> {
        self.write(|snapshot| {
            let removed = snapshot.deletable_type_def(guid, name, "delete_type_def")?;
            snapshot.remove_type_def(guid);
            log::info!("Deleted type {} ({})", name, guid);
            Ok(removed)
        })
    }

    pub fn check_delete_attribute_type_def(&self, guid: &str, name: &str) -> OmrsResult<AttributeTypeDef> {
        self.read()
            .deletable_attribute_type_def(guid, name, "delete_attribute_type_def")
    }

    pub fn delete_attribute_type_def(&self, guid: &str, name: &str) -> OmrsResult<AttributeTypeDef> {
        self.write(|snapshot| {
            let removed = snapshot.deletable_attribute_type_def(guid, name, "delete_attribute_type_def")?;
            snapshot.remove_attribute_type_def(guid);
            Ok(removed)
        })
    }

    /// Whether `type_name` is `super_type_name` or inherits from it
    pub fn is_type_of(&self, type_name: &str, super_type_name: &str) -> bool {
        self.read().is_type_of(type_name, super_type_name)
    }

    pub fn super_types(&self, type_def: &TypeDef) -> Vec<TypeDefLink> {
        self.read().super_types(type_def)
    }

    pub fn get_all_attributes(&self, type_def: &TypeDef) -> Vec<TypeDefAttribute> {
        self.read().all_attributes(type_def)
    }

    pub fn instance_type_for(&self, type_def: &TypeDef) -> InstanceType {
        let snapshot = self.read();
        InstanceType {
            type_def_category: type_def.category,
            type_def_guid: type_def.guid.clone(),
            type_def_name: type_def.name.clone(),
            type_def_version: type_def.version,
            type_def_super_types: snapshot.super_types(type_def),
            valid_status_list: type_def.valid_instance_statuses.clone(),
            valid_instance_properties: snapshot
                .all_attributes(type_def)
                .into_iter()
                .map(|attribute| attribute.attribute_name)
                .collect(),
        }
    }
}
