use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique identifier of a type, entity, relationship or collection.
pub type Guid = String;

pub fn generate_guid() -> Guid {
    Uuid::new_v4().to_string()
}

/// Identity of the local repository, stamped onto instances and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIdentity {
    pub repository_name: String,
    pub metadata_collection_id: Guid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_collection_name: Option<String>,
    pub server_name: String,
    pub server_type: String,
    pub organization_name: String,
}

impl CollectionIdentity {
    pub fn new(repository_name: impl Into<String>, metadata_collection_id: impl Into<Guid>) -> Self {
        Self {
            repository_name: repository_name.into(),
            metadata_collection_id: metadata_collection_id.into(),
            metadata_collection_name: None,
            server_name: "local-server".to_string(),
            server_type: "Metadata Repository".to_string(),
            organization_name: "local".to_string(),
        }
    }

    pub fn with_server(
        mut self,
        server_name: impl Into<String>,
        server_type: impl Into<String>,
        organization_name: impl Into<String>,
    ) -> Self {
        self.server_name = server_name.into();
        self.server_type = server_type.into();
        self.organization_name = organization_name.into();
        self
    }

    pub fn is_local(&self, metadata_collection_id: &str) -> bool {
        self.metadata_collection_id == metadata_collection_id
    }
}
