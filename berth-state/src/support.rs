//! In-memory engine used by the tests in this crate.
//!
//! `ScriptedRuntime` implements [`Runtime`] over plain maps, records every
//! mutating call and queues the events a real engine would emit, so tests
//! can drive full reconciliation ticks and then replay the event stream
//! into the store deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use berth_oci::{
    ConnectionError, ContainerRecord, ContainerStatus, CreateRequest, Credentials, Error,
    EventKind, EventStream, ImageRecord, RegistryAuth, Result, Runtime, RuntimeEvent,
};
use chrono::{Local, Utc};

use crate::models::{Configuration, ContainerSpec};
use crate::scheduler::Shared;

pub(crate) fn spec(image: &str, tag: &str) -> ContainerSpec {
    ContainerSpec {
        image: image.to_string(),
        tag: tag.to_string(),
        command: Vec::new(),
        environment: Vec::new(),
        hosts: vec!["ALL".to_string()],
        links: Vec::new(),
        ports: Vec::new(),
        volumes: Vec::new(),
        labels: Default::default(),
        add_capabilities: Vec::new(),
        start_times: String::new(),
        update_times: Vec::new(),
        stop_timeout: 5,
    }
}

/// The kind of error the daemon answers with when an object is missing.
fn not_found(message: String) -> ConnectionError {
    ConnectionError::DockerResponseServerError {
        status_code: 404,
        message,
    }
}

pub(crate) fn config(entries: &[(&str, ContainerSpec)]) -> Configuration {
    entries
        .iter()
        .map(|(name, spec)| (name.to_string(), spec.clone()))
        .collect()
}

pub(crate) fn container_record(id: &str, name: &str, image_id: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        name: name.to_string(),
        image_id: image_id.to_string(),
        labels: HashMap::new(),
        status: ContainerStatus::Created,
        created: Utc::now().into(),
        finished_at: None,
    }
}

pub(crate) fn image_record(id: &str, repo_tags: &[&str]) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        repo_tags: repo_tags.iter().map(|s| s.to_string()).collect(),
        created: Utc::now().into(),
    }
}

/// Every mutating engine call a test can assert on. Inspections and
/// listings are deliberately not recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    Pull { repo: String, tag: String },
    Create { name: String },
    Start { id: String },
    Stop { id: String, timeout: Duration },
    RemoveContainer { id: String },
    RemoveImage { id: String },
}

#[derive(Default)]
struct EngineState {
    containers: HashMap<String, ContainerRecord>,
    images: HashMap<String, ImageRecord>,
    next_container: u64,
    next_image: u64,
}

#[derive(Default)]
pub(crate) struct ScriptedRuntime {
    state: Mutex<EngineState>,
    calls: Mutex<Vec<EngineCall>>,
    events: Mutex<Vec<RuntimeEvent>>,
    fail_create_with: Mutex<Option<String>>,
}

impl ScriptedRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed_image(&self, id: &str, repo_tags: &[&str]) -> String {
        let record = image_record(id, repo_tags);
        self.state
            .lock()
            .unwrap()
            .images
            .insert(id.to_string(), record);
        id.to_string()
    }

    pub(crate) fn seed_container(&self, record: ContainerRecord) {
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(record.id.clone(), record);
    }

    pub(crate) fn set_container_status(&self, id: &str, status: ContainerStatus) {
        if let Some(record) = self.state.lock().unwrap().containers.get_mut(id) {
            record.status = status;
        }
    }

    /// Simulate a container exiting on its own, e.g. a finished cron job.
    pub(crate) fn exit_container(&self, id: &str) {
        if let Some(record) = self.state.lock().unwrap().containers.get_mut(id) {
            record.status = ContainerStatus::Stopped;
            record.finished_at = Some(Utc::now().into());
        }
        self.push_event(EventKind::Container, "die", id);
    }

    pub(crate) fn container(&self, id: &str) -> Option<ContainerRecord> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    pub(crate) fn container_named(&self, name: &str) -> Option<ContainerRecord> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Script the next create call to fail with a name conflict carrying
    /// the given daemon message.
    pub(crate) fn fail_next_create(&self, message: &str) {
        *self.fail_create_with.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub(crate) fn take_events(&self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn record_call(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn push_event(&self, kind: EventKind, action: &str, actor_id: &str) {
        self.events.lock().unwrap().push(RuntimeEvent {
            kind,
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            timestamp: 0,
        });
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn list_images(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().images.keys().cloned().collect())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .filter(|c| all || c.is_running())
            .map(|c| c.id.clone())
            .collect())
    }

    async fn inspect_image(&self, id: &str) -> Result<ImageRecord> {
        let state = self.state.lock().unwrap();
        state
            .images
            .get(id)
            .or_else(|| state.images.values().find(|i| i.has_repo_tag(id)))
            .cloned()
            .ok_or_else(|| Error::InspectImage {
                reference: id.to_string(),
                source: not_found(format!("no such image: {id}")),
            })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerRecord> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(id)
            .or_else(|| state.containers.values().find(|c| c.name == id))
            .cloned()
            .ok_or_else(|| Error::InspectContainer {
                id: id.to_string(),
                source: not_found(format!("no such container: {id}")),
            })
    }

    async fn pull_image(&self, repo: &str, tag: &str, _creds: Option<Credentials>) -> Result<()> {
        self.record_call(EngineCall::Pull {
            repo: repo.to_string(),
            tag: tag.to_string(),
        });

        let reference = format!("{repo}:{tag}");
        let id = {
            let mut state = self.state.lock().unwrap();
            match state.images.values().find(|i| i.has_repo_tag(&reference)) {
                Some(existing) => existing.id.clone(),
                None => {
                    state.next_image += 1;
                    let id = format!("sha256:img{:04}", state.next_image);
                    state.images.insert(id.clone(), ImageRecord {
                        id: id.clone(),
                        repo_tags: vec![reference],
                        created: Utc::now().into(),
                    });
                    id
                }
            }
        };

        self.push_event(EventKind::Image, "pull", &id);
        Ok(())
    }

    async fn create_container(&self, name: &str, request: CreateRequest) -> Result<String> {
        if let Some(message) = self.fail_create_with.lock().unwrap().take() {
            return Err(Error::CreateConflict {
                name: name.to_string(),
                message,
            });
        }

        let id = {
            let mut state = self.state.lock().unwrap();

            if state.containers.values().any(|c| c.name == name) {
                return Err(Error::CreateConflict {
                    name: name.to_string(),
                    message: format!(
                        "Conflict. The container name \"/{name}\" is already in use"
                    ),
                });
            }

            state.next_container += 1;
            let id = format!("ctr{:04}", state.next_container);

            let image_id = state
                .images
                .values()
                .find(|i| i.has_repo_tag(&request.image))
                .map(|i| i.id.clone())
                .unwrap_or_else(|| "sha256:unknown".to_string());

            state.containers.insert(id.clone(), ContainerRecord {
                id: id.clone(),
                name: name.to_string(),
                image_id,
                labels: request.labels.into_iter().collect(),
                status: ContainerStatus::Created,
                created: Utc::now().into(),
                finished_at: None,
            });
            id
        };

        self.record_call(EngineCall::Create {
            name: name.to_string(),
        });
        self.push_event(EventKind::Container, "create", &id);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record_call(EngineCall::Start { id: id.to_string() });

        let found = {
            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(id) {
                Some(record) => {
                    record.status = ContainerStatus::Running;
                    true
                }
                None => false,
            }
        };

        if !found {
            return Err(Error::StartContainer {
                id: id.to_string(),
                source: not_found(format!("no such container: {id}")),
            });
        }

        self.push_event(EventKind::Container, "start", id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        self.record_call(EngineCall::Stop {
            id: id.to_string(),
            timeout,
        });

        let stopped = {
            let mut state = self.state.lock().unwrap();
            match state.containers.get_mut(id) {
                Some(record) if record.is_running() => {
                    record.status = ContainerStatus::Stopped;
                    record.finished_at = Some(Utc::now().into());
                    true
                }
                _ => false,
            }
        };

        if stopped {
            self.push_event(EventKind::Container, "die", id);
            self.push_event(EventKind::Container, "stop", id);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.record_call(EngineCall::RemoveContainer { id: id.to_string() });

        let removed = {
            let mut state = self.state.lock().unwrap();
            match state.containers.get(id) {
                Some(record) if record.is_running() && !force => {
                    return Err(Error::RemoveContainer {
                        id: id.to_string(),
                        source: ConnectionError::DockerResponseServerError {
                            status_code: 409,
                            message: format!("cannot remove running container {id}"),
                        },
                    });
                }
                Some(_) => {
                    state.containers.remove(id);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.push_event(EventKind::Container, "destroy", id);
        }
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.record_call(EngineCall::RemoveImage { id: id.to_string() });

        if self.state.lock().unwrap().images.remove(id).is_some() {
            self.push_event(EventKind::Image, "delete", id);
        }
        Ok(())
    }

    fn events(&self) -> EventStream {
        Box::pin(futures_lite::stream::pending())
    }
}

/// A scripted runtime wired into scheduler state, ready for driving
/// individual sweep passes.
pub(crate) struct Harness {
    pub(crate) runtime: Arc<ScriptedRuntime>,
    pub(crate) shared: Arc<Shared>,
}

pub(crate) async fn harness(entries: &[(&str, ContainerSpec)]) -> Harness {
    harness_with_refresh(entries, Duration::from_secs(3600)).await
}

pub(crate) async fn harness_with_refresh(
    entries: &[(&str, ContainerSpec)],
    image_refresh_interval: Duration,
) -> Harness {
    let runtime = Arc::new(ScriptedRuntime::new());
    let shared = Arc::new(Shared::new(
        "node1".to_string(),
        Arc::clone(&runtime) as Arc<dyn Runtime>,
        RegistryAuth::default(),
        config(entries),
        image_refresh_interval,
    ));

    let cfg = shared.store.snapshot_config().await;
    shared.reschedule(&cfg, Local::now()).await;

    Harness { runtime, shared }
}

impl Harness {
    /// Replay the queued engine events into the store, the way the event
    /// listener would.
    pub(crate) async fn sync(&self) {
        for event in self.runtime.take_events() {
            let _ =
                crate::events::handle_event(self.runtime.as_ref(), &self.shared.store, &event)
                    .await;
        }
    }

    /// Run the initial inventory scan against the scripted engine.
    pub(crate) async fn scan(&self) {
        crate::events::initial_scan(self.runtime.as_ref(), &self.shared.store)
            .await
            .expect("initial scan against the scripted runtime");
        self.runtime.take_events();
    }
}
