use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use tokio_stream::Stream;

use super::container::ContainerRecord;
use super::event::RuntimeEvent;
use super::image::ImageRecord;
use super::registry::Credentials;
use super::{Client, Result};

pub type EventStream = Pin<Box<dyn Stream<Item = RuntimeEvent> + Send>>;

/// One published container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Container-side port spec, e.g. `80/tcp`
    pub container: String,
    pub host_ip: String,
    pub host_port: String,
}

/// Engine-agnostic description of a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// `repo:tag` reference of the image to run
    pub image: String,
    /// Argv override; empty means the image default
    pub command: Vec<String>,
    /// `KEY=VALUE` pairs
    pub environment: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// `host:container[:mode]` bind strings
    pub binds: Vec<String>,
    /// Container-side mount points from the binds
    pub volumes: Vec<String>,
    pub links: Vec<String>,
    pub ports: Vec<PortMapping>,
    pub cap_add: Vec<String>,
}

fn some_if_any<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

impl From<CreateRequest> for ContainerCreateBody {
    fn from(request: CreateRequest) -> Self {
        let CreateRequest {
            image,
            command,
            environment,
            labels,
            binds,
            volumes,
            links,
            ports,
            cap_add,
        } = request;

        let exposed_ports = (!ports.is_empty()).then(|| {
            ports
                .iter()
                .map(|p| (p.container.clone(), HashMap::new()))
                .collect()
        });
        let port_bindings = (!ports.is_empty()).then(|| {
            ports
                .into_iter()
                .map(|p| {
                    (
                        p.container,
                        Some(vec![PortBinding {
                            host_ip: Some(p.host_ip),
                            host_port: Some(p.host_port),
                        }]),
                    )
                })
                .collect()
        });

        let host_config = HostConfig {
            binds: some_if_any(binds),
            links: some_if_any(links),
            privileged: Some(false),
            port_bindings,
            cap_add: some_if_any(cap_add),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(image),
            cmd: some_if_any(command),
            env: some_if_any(environment),
            labels: Some(labels.into_iter().collect()),
            volumes: (!volumes.is_empty())
                .then(|| volumes.into_iter().map(|v| (v, HashMap::new())).collect()),
            exposed_ports,
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// The operations the reconciliation core needs from a container engine.
///
/// Implemented by [`Client`] against a live engine; test code substitutes an
/// in-memory implementation.
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    async fn list_images(&self) -> Result<Vec<String>>;
    async fn list_containers(&self, all: bool) -> Result<Vec<String>>;
    async fn inspect_image(&self, id: &str) -> Result<ImageRecord>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord>;
    async fn pull_image(&self, repo: &str, tag: &str, creds: Option<Credentials>) -> Result<()>;
    async fn create_container(&self, name: &str, request: CreateRequest) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// Subscribe to the engine's event stream. The stream ending is fatal.
    fn events(&self) -> EventStream;
}

#[async_trait]
impl Runtime for Client {
    async fn list_images(&self) -> Result<Vec<String>> {
        self.image().list(true).await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<String>> {
        self.container().list(all).await
    }

    async fn inspect_image(&self, id: &str) -> Result<ImageRecord> {
        self.image().inspect(id).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
        self.container().inspect(id).await
    }

    async fn pull_image(&self, repo: &str, tag: &str, creds: Option<Credentials>) -> Result<()> {
        self.image().pull(repo, tag, creds.map(Into::into)).await
    }

    async fn create_container(&self, name: &str, request: CreateRequest) -> Result<String> {
        self.container().create(name, request).await
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.container().start(id).await
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        self.container().stop(id, timeout).await
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.container().remove(id, force).await
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.image().remove(id).await
    }

    fn events(&self) -> EventStream {
        self.subscribe()
    }
}
