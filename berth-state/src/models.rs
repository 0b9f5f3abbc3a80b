use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deps::{self, CyclicDependency};

/// Sentinel `hosts` entry matching every agent.
pub(crate) const ALL_HOSTS: &str = "ALL";

/// Maps a container port to a host address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Container-side port spec, e.g. `80/tcp`
    pub container: String,
    /// Host side as `hostIP:hostPort`
    pub local: String,
}

/// Declarative description of a single container, keyed by its unique name
/// in the [Configuration].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Registry path of the image, without the tag
    pub image: String,

    #[serde(default = "defaults::tag")]
    pub tag: String,

    /// Argv override; empty means the image default
    #[serde(default)]
    pub command: Vec<String>,

    /// `KEY=VALUE` pairs
    #[serde(default)]
    pub environment: Vec<String>,

    /// Hostnames this spec applies to, or the `ALL` sentinel
    #[serde(default)]
    pub hosts: Vec<String>,

    /// `otherName[:alias]` dependency edges
    #[serde(default)]
    pub links: Vec<String>,

    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// `host:container[:mode]` bind strings
    #[serde(default)]
    pub volumes: Vec<String>,

    /// Labels merged into the created container's labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Kernel capabilities added to the container
    #[serde(default)]
    pub add_capabilities: Vec<String>,

    /// Cron expression (without seconds field); non-empty makes this a
    /// scheduled job instead of a long-running service
    #[serde(default)]
    pub start_times: String,

    /// `HH:MM-HH:MM` local-time windows during which updates may restart
    /// the container; empty means always
    #[serde(default)]
    pub update_times: Vec<String>,

    /// Seconds to wait for a graceful stop
    #[serde(default = "defaults::stop_timeout")]
    pub stop_timeout: u64,
}

mod defaults {
    pub(super) fn tag() -> String {
        "latest".to_string()
    }

    pub(super) fn stop_timeout() -> u64 {
        5
    }
}

impl ContainerSpec {
    /// Whether this spec applies to the given agent hostname.
    pub fn targets_host(&self, hostname: &str) -> bool {
        self.hosts.iter().any(|h| h == hostname || h == ALL_HOSTS)
    }

    /// The full `repo:tag` reference of the image to run.
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Scheduled jobs have a cron expression and terminate themselves.
    pub fn is_scheduled(&self) -> bool {
        !self.start_times.is_empty()
    }
}

/// The full declarative state for a deployment: container name to spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ContainerSpec>);

impl Configuration {
    pub fn get(&self, name: &str) -> Option<&ContainerSpec> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContainerSpec)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Container names sorted so every container comes after the containers
    /// its `links` point at.
    pub fn dependency_chain(&self) -> Result<Vec<String>, CyclicDependency> {
        deps::dependency_chain(self)
    }

    /// The `repo:tag` references of every spec targeting the given host.
    pub fn image_list(&self, hostname: &str) -> Vec<String> {
        self.0
            .values()
            .filter(|spec| spec.targets_host(hostname))
            .map(ContainerSpec::image_ref)
            .collect()
    }
}

impl FromIterator<(String, ContainerSpec)> for Configuration {
    fn from_iter<T: IntoIterator<Item = (String, ContainerSpec)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
