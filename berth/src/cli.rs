use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn parse_minutes(s: &str) -> Result<Duration, ParseIntError> {
    let minutes: u64 = s.parse()?;
    Ok(Duration::from_secs(minutes * 60))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Hostname matched against the `hosts` field of container specs;
    /// defaults to the system hostname
    #[arg(long = "hostname", value_name = "name", env = "BERTH_HOSTNAME")]
    pub hostname: Option<String>,

    /// YAML file to load the container configuration from
    #[arg(
        long = "config-file",
        value_name = "path",
        env = "BERTH_CONFIG_FILE",
        default_value = "./containers.yaml"
    )]
    pub config_file: PathBuf,

    /// URL to fetch the configuration from (overrides --config-file)
    #[arg(long = "config-url", value_name = "url", env = "BERTH_CONFIG_URL")]
    pub config_url: Option<String>,

    /// Minutes to wait between configuration reloads
    #[arg(
        long = "config-interval",
        value_name = "minutes",
        value_parser = parse_minutes,
        env = "BERTH_CONFIG_INTERVAL",
        default_value = "10"
    )]
    pub config_interval: Duration,

    /// Fetch new images every N minutes
    #[arg(
        long = "refresh-interval",
        value_name = "minutes",
        value_parser = parse_minutes,
        env = "BERTH_REFRESH_INTERVAL",
        default_value = "30"
    )]
    pub refresh_interval: Duration,

    /// Also stop and remove containers and images this agent did not create
    #[arg(long = "manage-full-host", env = "BERTH_MANAGE_FULL_HOST")]
    pub manage_full_host: bool,

    /// Minutes a dead or unreferenced object must age before cleanup
    /// removes it
    #[arg(
        long = "cleanup-min-age",
        value_name = "minutes",
        value_parser = parse_minutes,
        env = "BERTH_CLEANUP_MIN_AGE",
        default_value = "60"
    )]
    pub cleanup_min_age: Duration,

    /// Engine endpoint, `unix:///...` or `tcp://...`; defaults to
    /// DOCKER_HOST or the local socket
    #[arg(long = "docker-host", value_name = "uri", env = "BERTH_DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Directory containing key.pem, cert.pem and ca.pem for TLS engine
    /// connections
    #[arg(
        long = "docker-cert-dir",
        value_name = "dir",
        env = "BERTH_DOCKER_CERT_DIR",
        requires = "docker_host"
    )]
    pub docker_cert_dir: Option<PathBuf>,

    /// JSON file mapping registry hosts to pull credentials
    #[arg(
        long = "registry-auth",
        value_name = "path",
        env = "BERTH_REGISTRY_AUTH"
    )]
    pub registry_auth: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Parser::parse()
}
