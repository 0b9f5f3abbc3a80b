use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::DockerCredentials;

/// Credentials for a single registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl From<Credentials> for DockerCredentials {
    fn from(value: Credentials) -> Self {
        DockerCredentials {
            username: value.username,
            password: value.password,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryAuthError {
    #[error("failed to read registry auth file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse registry auth file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Registry authentication configuration: a map from a registry key (usually
/// the registry host, possibly with a scheme) to credentials.
///
/// Lookup substring-matches the image's registry host against the map keys,
/// so `https://registry.example.com/v1/` matches images pulled from
/// `registry.example.com`. Keys are iterated in sorted order, making the
/// first match deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RegistryAuth(BTreeMap<String, Credentials>);

impl RegistryAuth {
    /// Load the authentication map from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RegistryAuthError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Find credentials for the given image repo.
    ///
    /// Images without an explicit registry host (e.g. `nginx`) never match;
    /// those pulls go unauthenticated against the default registry.
    pub fn credentials_for(&self, repo: &str) -> Option<Credentials> {
        let (host, _) = repo.split_once('/')?;

        self.0
            .iter()
            .find(|(key, _)| key.contains(host))
            .map(|(_, creds)| creds.clone())
    }
}
