use crate::model::{Guid, InstanceProperties, InstanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the supplied match properties combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriteria {
    #[default]
    All,
    Any,
    None,
}

impl MatchCriteria {
    /// Combine per-property outcomes into a single verdict
    pub fn evaluate(&self, outcomes: &[bool]) -> bool {
        match self {
            MatchCriteria::All => outcomes.iter().all(|matched| *matched),
            MatchCriteria::Any => outcomes.iter().any(|matched| *matched),
            MatchCriteria::None => !outcomes.iter().any(|matched| *matched),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequencingOrder {
    #[default]
    Any,
    Guid,
    CreationDateRecent,
    CreationDateOldest,
    LastUpdateRecent,
    LastUpdateOldest,
    PropertyAscending,
    PropertyDescending,
}

/// Page window; a `page_size` of 0 means "no limit"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Paging {
    #[serde(default)]
    pub from_element: usize,
    #[serde(default)]
    pub page_size: usize,
}

impl Paging {
    pub fn new(from_element: usize, page_size: usize) -> Self {
        Self {
            from_element,
            page_size,
        }
    }

    pub fn first(page_size: usize) -> Self {
        Self::new(0, page_size)
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.from_element);
        if self.page_size == 0 {
            iter.collect()
        } else {
            iter.take(self.page_size).collect()
        }
    }
}

/// Parameters for entity searches by property, classification or value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityPropertyQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_guid: Option<Guid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_properties: Option<InstanceProperties>,
    #[serde(default)]
    pub match_criteria: MatchCriteria,
    /// Only entities carrying every listed classification
    #[serde(default)]
    pub limit_results_by_classification: Vec<String>,
    /// Empty means "every status except DELETED"
    #[serde(default)]
    pub limit_results_by_status: Vec<InstanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencing_property: Option<String>,
    #[serde(default)]
    pub sequencing_order: SequencingOrder,
    #[serde(default)]
    pub paging: Paging,
}

impl EntityPropertyQuery {
    pub fn for_type(entity_type_guid: impl Into<Guid>) -> Self {
        Self {
            entity_type_guid: Some(entity_type_guid.into()),
            ..Self::default()
        }
    }

    pub fn matching(mut self, properties: InstanceProperties, criteria: MatchCriteria) -> Self {
        self.match_properties = Some(properties);
        self.match_criteria = criteria;
        self
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }
}

/// Parameters for relationship traversal from an entity
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type_guid: Option<Guid>,
    #[serde(default)]
    pub limit_results_by_status: Vec<InstanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequencing_order: SequencingOrder,
    #[serde(default)]
    pub paging: Paging,
}

impl RelationshipQuery {
    pub fn of_type(relationship_type_guid: impl Into<Guid>) -> Self {
        Self {
            relationship_type_guid: Some(relationship_type_guid.into()),
            ..Self::default()
        }
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }
}

/// Parameters for relationship searches by property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationshipPropertyQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type_guid: Option<Guid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_properties: Option<InstanceProperties>,
    #[serde(default)]
    pub match_criteria: MatchCriteria,
    #[serde(default)]
    pub limit_results_by_status: Vec<InstanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paging: Paging,
}

/// Status filter semantics shared by every search
pub fn status_visible(limit_results_by_status: &[InstanceStatus], status: InstanceStatus) -> bool {
    if limit_results_by_status.is_empty() {
        status != InstanceStatus::Deleted
    } else {
        limit_results_by_status.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_criteria() {
        assert!(MatchCriteria::All.evaluate(&[true, true]));
        assert!(!MatchCriteria::All.evaluate(&[true, false]));
        assert!(MatchCriteria::Any.evaluate(&[false, true]));
        assert!(!MatchCriteria::Any.evaluate(&[false, false]));
        assert!(MatchCriteria::None.evaluate(&[false, false]));
        assert!(!MatchCriteria::None.evaluate(&[true, false]));
    }

    #[test]
    fn test_paging_window() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Paging::new(2, 3).apply(items.clone()), vec![2, 3, 4]);
        assert_eq!(Paging::unbounded().apply(items.clone()).len(), 10);
        assert!(Paging::new(20, 5).apply(items).is_empty());
    }

    #[test]
    fn test_deleted_hidden_by_default() {
        assert!(status_visible(&[], InstanceStatus::Active));
        assert!(!status_visible(&[], InstanceStatus::Deleted));
        assert!(status_visible(&[InstanceStatus::Deleted], InstanceStatus::Deleted));
        assert!(!status_visible(&[InstanceStatus::Deleted], InstanceStatus::Active));
    }
}
