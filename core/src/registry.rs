use serde::{Deserialize, Deserializer};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::models::ApiDefinition;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry at '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed registry: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// The shape of registry.json, written by whoever administers the portal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub apis: Vec<ApiDefinition>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    pub username: String,
    #[serde(default, deserialize_with = "comma_list")]
    pub groups: Vec<String>,
}

impl Registry {
    // Reads the registry file. A missing file is an empty registry.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("No registry found at '{}', starting with stored definitions only", path.display());
            return Ok(Self::default());
        }

        // 1. Read the JSON file
        let content = fs::read_to_string(path).await.map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;

        // 2. Parse it
        let registry: Registry = serde_json::from_str(&content)?;

        // 3. Sanity check: definitions nobody can reach or that produce nothing
        for api in &registry.apis {
            if api.authorized_groups.is_empty() {
                tracing::warn!("API '{}' has no authorized groups and will never be offered", api.name);
            }
            if api.output_files.is_empty() {
                tracing::warn!("API '{}' declares no output files", api.name);
            }
        }

        Ok(registry)
    }

    /// Upserts every definition and user into the store.
    pub async fn sync(&self, store: &dyn Store) -> Result<(), RegistryError> {
        for api in &self.apis {
            store.upsert_api(api).await?;
        }
        for user in &self.users {
            store.upsert_user(&user.username, &user.groups).await?;
        }
        tracing::info!("Registry synced: {} APIs, {} users", self.apis.len(), self.users.len());
        Ok(())
    }
}

/// Accepts either `"a, b ,c"` or `["a", "b", "c"]`. Whitespace is stripped
/// and empty items are dropped.
pub fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Joined(String),
        Items(Vec<String>),
    }

    let items = match Raw::deserialize(deserializer)? {
        Raw::Joined(s) => split_list(&s),
        Raw::Items(v) => v.iter().flat_map(|s| split_list(s)).collect(),
    };
    Ok(items)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_lists_are_parsed_once() {
        let api: ApiDefinition = serde_json::from_str(
            r#"{
                "id": 7,
                "name": "blast",
                "command": "run.sh {1}",
                "num_input_params": 1,
                "output_files": "a.txt, b.txt,",
                "authorized_groups": ["staff", " research "]
            }"#,
        )
        .unwrap();

        assert_eq!(api.output_files, vec!["a.txt", "b.txt"]);
        assert_eq!(api.authorized_groups, vec!["staff", "research"]);
        assert_eq!(api.description, "");
    }

    #[tokio::test]
    async fn missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path().join("registry.json")).await.unwrap();
        assert!(registry.apis.is_empty());
        assert!(registry.users.is_empty());
    }

    #[tokio::test]
    async fn loads_apis_and_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{
                "apis": [{"id": 1, "name": "echo", "description": "Echo", "command": "echo {1}",
                          "num_input_params": 1, "output_files": "out.txt", "authorized_groups": "guest"}],
                "users": [{"username": "alice", "groups": "staff, research"}]
            }"#,
        )
        .unwrap();

        let registry = Registry::load(&path).await.unwrap();
        assert_eq!(registry.apis.len(), 1);
        assert_eq!(registry.users[0].groups, vec!["staff", "research"]);
    }

    #[tokio::test]
    async fn malformed_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Registry::load(&path).await, Err(RegistryError::Parse(_))));
    }
}
