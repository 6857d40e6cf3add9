use crate::error::{OmrsError, OmrsResult};
use crate::store::{StoreError, StoreResult};

/// Converts storage engine failures into the repository error taxonomy.
pub struct RepositoryErrorHandler;

impl RepositoryErrorHandler {
    /// `type_name` names the expected type of a missing instance
    pub fn handle(error: StoreError, method: &str, type_name: Option<&str>) -> OmrsError {
        match error {
            StoreError::EntityNotKnown { guid } => {
                OmrsError::instance_not_known(&guid, type_name.unwrap_or("Entity"), method)
            }
            StoreError::RelationshipNotKnown { guid } => {
                OmrsError::instance_not_known(&guid, type_name.unwrap_or("Relationship"), method)
            }
            StoreError::TypeNotKnown { guid } => OmrsError::type_not_known(&guid, method),
            StoreError::EntityProxyOnly { guid } => OmrsError::EntityProxyOnly {
                guid,
                method: method.to_string(),
            },
            StoreError::NotAuthorized { user_id } => OmrsError::NotAuthorized {
                user_id,
                method: method.to_string(),
            },
            StoreError::FunctionNotSupported { function } => OmrsError::FunctionNotSupported {
                function,
                method: method.to_string(),
            },
            StoreError::NotDeleted { guid } => OmrsError::InstanceNotDeleted {
                guid,
                method: method.to_string(),
            },
            StoreError::NoPriorVersion { guid } => OmrsError::invalid_parameter(
                "guid",
                method,
                format!("instance {} has no earlier version to restore", guid),
            ),
            StoreError::GuidInUse { guid } => OmrsError::invalid_parameter(
                "new_guid",
                method,
                format!("GUID {} is already in use", guid),
            ),
            StoreError::Backend(cause) => {
                log::error!("Storage failure during {}: {:#}", method, cause);
                OmrsError::RepositoryUnavailable {
                    method: method.to_string(),
                    reason: format!("{:#}", cause),
                }
            }
        }
    }
}

/// Attach call context to a storage result
pub trait StoreResultExt<T> {
    fn for_call(self, method: &str) -> OmrsResult<T>;
    fn for_type(self, method: &str, type_name: &str) -> OmrsResult<T>;
}

impl<T> StoreResultExt<T> for StoreResult<T> {
    fn for_call(self, method: &str) -> OmrsResult<T> {
        self.map_err(|e| RepositoryErrorHandler::handle(e, method, None))
    }

    fn for_type(self, method: &str, type_name: &str) -> OmrsResult<T> {
        self.map_err(|e| RepositoryErrorHandler::handle(e, method, Some(type_name)))
    }
}
