//! Stored provider credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ApiKeyId;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    #[default]
    Active,
    Disabled,
}

/// Per-user credential for a named provider.
///
/// The secret never leaves the Provider Adapter Layer; `Debug` redacts it
/// so it cannot leak through logs.
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: String,
    /// Registered adapter name, matched exact-string.
    pub provider: String,
    /// Display label chosen by the user.
    pub name: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Optional endpoint override for self-hosted/compatible deployments.
    pub base_url: Option<String>,
    pub status: ApiKeyStatus,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("status", &self.status)
            .finish()
    }
}

impl ApiKey {
    pub fn is_active(&self) -> bool {
        self.status == ApiKeyStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let key = ApiKey {
            id: ApiKeyId::new(),
            user_id: "u1".into(),
            provider: "openai".into(),
            name: "default".into(),
            secret: "sk-super-secret".into(),
            base_url: None,
            status: ApiKeyStatus::Active,
            created_at: Utc::now(),
        };
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("sk-super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
