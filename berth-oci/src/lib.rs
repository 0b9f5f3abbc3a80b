use std::path::Path;

use bollard::{API_DEFAULT_VERSION, Docker};

pub use bollard::auth::DockerCredentials;
pub use bollard::errors::Error as ConnectionError;

mod image;
pub use image::{Image, ImageRecord};

mod container;
pub use container::{Container, ContainerRecord, ContainerStatus};

mod event;
pub use event::{EventKind, RuntimeEvent};

mod registry;
pub use registry::{Credentials, RegistryAuth, RegistryAuthError};

mod runtime;
pub use runtime::{CreateRequest, EventStream, PortMapping, Runtime};

mod datetime;
pub use datetime::DateTime;

const CONNECT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Client(Docker);

impl Client {
    /// Connect to the engine based on the `DOCKER_HOST` environment variable.
    pub async fn connect() -> Result<Self> {
        let inner = Docker::connect_with_defaults().map_err(Error::Connect)?;
        Self::ping(inner).await
    }

    /// Connect to an explicit engine endpoint, `unix://...` or `tcp://...`.
    pub async fn connect_host(host: &str) -> Result<Self> {
        let inner = if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_unix(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
        }
        .map_err(Error::Connect)?;
        Self::ping(inner).await
    }

    /// Connect over TLS using `key.pem`, `cert.pem` and `ca.pem` from the
    /// given directory.
    pub async fn connect_with_tls(host: &str, cert_dir: &Path) -> Result<Self> {
        let inner = Docker::connect_with_ssl(
            host,
            &cert_dir.join("key.pem"),
            &cert_dir.join("cert.pem"),
            &cert_dir.join("ca.pem"),
            CONNECT_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )
        .map_err(Error::Connect)?;
        Self::ping(inner).await
    }

    // The `connect_*` constructors don't actually talk to the engine.
    // Do a /ping so a bad endpoint fails at startup instead of at the
    // first reconciliation tick.
    async fn ping(inner: Docker) -> Result<Self> {
        inner.ping().await.map_err(Error::Connect)?;
        Ok(Self(inner))
    }

    fn inner(&self) -> &Docker {
        &self.0
    }

    /// Exposes methods to work with images.
    #[inline]
    pub fn image(&self) -> Image<'_> {
        Image::new(self)
    }

    /// Exposes methods to work with containers.
    #[inline]
    pub fn container(&self) -> Container<'_> {
        Container::new(self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What can go wrong talking to the engine, one variant per operation the
/// reconciler performs. The sweeps log most of these and retry on the next
/// tick; only [`Error::CreateConflict`] changes control flow.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine endpoint could not be reached or did not answer a ping.
    #[error("failed to connect to engine: {0}")]
    Connect(#[source] ConnectionError),

    #[error("failed to list images: {0}")]
    ListImages(#[source] ConnectionError),

    #[error("failed to list containers: {0}")]
    ListContainers(#[source] ConnectionError),

    #[error("failed to inspect image {reference}: {source}")]
    InspectImage {
        reference: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to inspect container {id}: {source}")]
    InspectContainer {
        id: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to pull image {reference}: {source}")]
    PullImage {
        reference: String,
        #[source]
        source: ConnectionError,
    },

    /// The requested container name is taken, usually by a remnant the
    /// stale-container sweep has not reaped yet.
    #[error("container name {name} is already in use: {message}")]
    CreateConflict { name: String, message: String },

    #[error("failed to create container {name}: {source}")]
    CreateContainer {
        name: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to start container {id}: {source}")]
    StartContainer {
        id: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to stop container {id}: {source}")]
    StopContainer {
        id: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to remove container {id}: {source}")]
    RemoveContainer {
        id: String,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to remove image {id}: {source}")]
    RemoveImage {
        id: String,
        #[source]
        source: ConnectionError,
    },

    /// An inspect response was missing a field the agent cannot work
    /// without, or carried one it cannot parse.
    #[error("unusable container record from engine: {0}")]
    InvalidContainerRecord(&'static str),

    #[error("unusable image record from engine: {0}")]
    InvalidImageRecord(&'static str),
}

impl Error {
    /// Whether a create failed because the name is taken.
    pub fn is_create_conflict(&self) -> bool {
        matches!(self, Error::CreateConflict { .. })
    }
}
