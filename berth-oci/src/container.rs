use std::collections::HashMap;
use std::time::Duration;

use bollard::{
    models::ContainerCreateBody,
    query_parameters::{
        CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    secret::{ContainerInspectResponse, ContainerStateStatusEnum},
};
use serde::{Deserialize, Serialize};

use super::datetime::DateTime;
use super::runtime::CreateRequest;
use super::{Client, ConnectionError, Error, Result};

#[derive(Debug, Clone)]
pub struct Container<'a>(&'a Client);

impl<'a> Container<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Container<'_> {
    /// Returns the ids of the containers known to the engine.
    ///
    /// Use in combination with [`Container::inspect`] to get the container
    /// information.
    pub async fn list(&self, all: bool) -> Result<Vec<String>> {
        let opts = ListContainersOptions {
            all,
            ..Default::default()
        };

        let container_list = self
            .0
            .inner()
            .list_containers(Some(opts))
            .await
            .map_err(Error::ListContainers)?;

        Ok(container_list
            .into_iter()
            .flat_map(|c| c.id.into_iter())
            .collect())
    }

    /// Returns low-level information about a container.
    pub async fn inspect(&self, id: &str) -> Result<ContainerRecord> {
        let container_info = self
            .0
            .inner()
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|source| Error::InspectContainer {
                id: id.to_owned(),
                source,
            })?;

        container_info.try_into()
    }

    /// Create a container with the given name from a creation request.
    pub async fn create(&self, name: &str, request: CreateRequest) -> Result<String> {
        let options = Some(CreateContainerOptions {
            name: Some(name.to_owned()),
            platform: String::from(""),
        });

        let body: ContainerCreateBody = request.into();

        match self.0.inner().create_container(options, body).await {
            Ok(res) => Ok(res.id),
            // 409 means the name is taken; the caller reacts by sweeping
            // stale containers
            Err(ConnectionError::DockerResponseServerError {
                status_code: 409,
                message,
            }) => Err(Error::CreateConflict {
                name: name.to_owned(),
                message,
            }),
            Err(source) => Err(Error::CreateContainer {
                name: name.to_owned(),
                source,
            }),
        }
    }

    /// Start the container with the given id or name.
    pub async fn start(&self, id: &str) -> Result<()> {
        match self
            .0
            .inner()
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Ok(_) => Ok(()),
            // already running, ignore
            Err(ConnectionError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(source) => Err(Error::StartContainer {
                id: id.to_owned(),
                source,
            }),
        }
    }

    /// Ask the container to stop, waiting up to `timeout` before the engine
    /// kills it.
    pub async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let opts = StopContainerOptions {
            t: Some(timeout.as_secs() as i32),
            ..Default::default()
        };

        match self.0.inner().stop_container(id, Some(opts)).await {
            Ok(_) => Ok(()),
            // already stopped, ignore
            Err(ConnectionError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(source) => Err(Error::StopContainer {
                id: id.to_owned(),
                source,
            }),
        }
    }

    /// Remove a container. With `force`, a running container is killed first.
    pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        match self.0.inner().remove_container(id, Some(opts)).await {
            Ok(_) => Ok(()),
            // already gone, which is what we wanted
            Err(ConnectionError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(source) => Err(Error::RemoveContainer {
                id: id.to_owned(),
                source,
            }),
        }
    }
}

impl TryFrom<ContainerInspectResponse> for ContainerRecord {
    type Error = Error;

    fn try_from(value: ContainerInspectResponse) -> Result<Self> {
        let invalid = Error::InvalidContainerRecord;

        let id = value.id.ok_or(invalid("missing container id"))?;
        let image_id = value.image.ok_or(invalid("missing image id"))?;
        let name = value
            .name
            .ok_or(invalid("missing container name"))?
            .trim_start_matches('/')
            .to_owned();
        let labels = value
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        let created: DateTime = value
            .created
            .ok_or(invalid("missing creation date"))?
            .parse()
            .map_err(|_| invalid("creation date is not a valid timestamp"))?;

        let state = value.state.ok_or(invalid("missing container state"))?;
        let status = state.status.ok_or(invalid("missing container status"))?.into();
        let finished_at = state
            .finished_at
            .and_then(|t| t.parse::<DateTime>().ok())
            .filter(|t| !t.is_zero());

        Ok(Self {
            id,
            name,
            image_id,
            labels,
            status,
            created,
            finished_at,
        })
    }
}

/// The container runtime status. This is a simplified state over what the
/// engine returns.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    #[default]
    Created,
    Running,
    Stopped,
    Dead,
}

impl From<ContainerStateStatusEnum> for ContainerStatus {
    fn from(value: ContainerStateStatusEnum) -> Self {
        use ContainerStateStatusEnum::*;
        match value {
            EMPTY => ContainerStatus::Created,
            CREATED => ContainerStatus::Created,
            RUNNING => ContainerStatus::Running,
            PAUSED => ContainerStatus::Stopped,
            RESTARTING => ContainerStatus::Running,
            REMOVING => ContainerStatus::Stopped,
            EXITED => ContainerStatus::Stopped,
            DEAD => ContainerStatus::Dead,
        }
    }
}

/// What the engine knows about a single container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    /// The engine id of the container
    pub id: String,

    /// The name of the container, without the leading `/`
    pub name: String,

    /// The content-addressable id of the container's image
    pub image_id: String,

    /// Labels attached at creation time
    pub labels: HashMap<String, String>,

    /// The container runtime status
    pub status: ContainerStatus,

    /// Container creation date
    pub created: DateTime,

    /// When the container last exited, if it ever ran
    pub finished_at: Option<DateTime>,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}
