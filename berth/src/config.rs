use std::path::PathBuf;

use berth_state::Configuration;
use tracing::debug;

use crate::cli::Cli;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch configuration: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Where the configuration document comes from. A URL takes precedence over
/// the file path.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Url(String),
}

impl ConfigSource {
    pub fn from_cli(cli: &Cli) -> Self {
        match &cli.config_url {
            Some(url) => Self::Url(url.clone()),
            None => Self::File(cli.config_file.clone()),
        }
    }

    /// Fetch and parse the configuration document.
    pub async fn load(&self) -> Result<Configuration, LoadError> {
        let contents = match self {
            Self::File(path) => {
                debug!("loading configuration from {}", path.display());
                tokio::fs::read_to_string(path).await?
            }
            Self::Url(url) => {
                debug!("loading configuration from {url}");
                reqwest::get(url).await?.error_for_status()?.text().await?
            }
        };

        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("berth-config-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn a_yaml_file_parses_into_a_configuration() {
        let path = write_config(
            "good.yaml",
            r#"
            web:
              image: nginx
              tag: "1.25"
              hosts: [ALL]
            "#,
        );

        let cfg = ConfigSource::File(path).load().await.unwrap();
        assert!(cfg.contains("web"));
        assert_eq!(cfg.get("web").unwrap().image_ref(), "nginx:1.25");
    }

    #[tokio::test]
    async fn parse_errors_are_surfaced() {
        let path = write_config("bad.yaml", "web: [not, a, spec]");
        assert!(matches!(
            ConfigSource::File(path).load().await,
            Err(LoadError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_files_are_io_errors() {
        let source = ConfigSource::File(PathBuf::from("/nonexistent/containers.yaml"));
        assert!(matches!(source.load().await, Err(LoadError::Io(_))));
    }

    #[test]
    fn the_url_overrides_the_file() {
        use clap::Parser;

        let cli = crate::cli::Cli::parse_from([
            "berth",
            "--config-url",
            "https://example.com/containers.yaml",
        ]);
        assert!(matches!(ConfigSource::from_cli(&cli), ConfigSource::Url(_)));
    }
}
