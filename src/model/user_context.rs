use serde::{Deserialize, Serialize};

/// Identity of the caller, passed as the first argument of every operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: None,
        }
    }

    pub fn with_name(user_id: impl Into<String>, user_name: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name,
        }
    }

    /// Identity used for seed data and start-up type loading
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            user_name: Some("Repository Services".to_string()),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            user_name: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.user_id
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::anonymous()
    }
}
