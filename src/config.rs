use crate::logic::DEFAULT_MAX_PAGE_SIZE;
use crate::model::{generate_guid, CollectionIdentity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub repository: RepositoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Identity and behaviour of the local metadata collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    /// Generated at start-up when absent
    pub collection: Option<String>,
    /// Display name of the metadata collection
    pub label: Option<String>,
    pub server: String,
    pub kind: String,
    pub organization: String,
    pub pagesize: usize,
    pub softdelete: bool,
    /// Log every outbound event at INFO
    pub events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "local-repository".to_string(),
            collection: None,
            label: None,
            server: "cohort-server".to_string(),
            kind: "In-memory metadata repository".to_string(),
            organization: "default".to_string(),
            pagesize: DEFAULT_MAX_PAGE_SIZE,
            softdelete: true,
            events: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        config = config.add_source(config::File::with_name("config").required(false));

        // OMRS_SERVER_PORT, OMRS_REPOSITORY_COLLECTION, ...; keys are single words
        // because "_" separates nesting levels
        config = config.add_source(
            config::Environment::with_prefix("OMRS")
                .separator("_")
                .prefix_separator("_"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn identity(&self) -> CollectionIdentity {
        let repository = &self.repository;
        let metadata_collection_id = repository
            .collection
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| {
                let id = generate_guid();
                log::warn!("No metadata collection id configured; using {}", id);
                id
            });
        let mut identity = CollectionIdentity::new(repository.name.clone(), metadata_collection_id)
            .with_server(
                repository.server.clone(),
                repository.kind.clone(),
                repository.organization.clone(),
            );
        identity.metadata_collection_name = repository.label.clone();
        identity
    }
}
