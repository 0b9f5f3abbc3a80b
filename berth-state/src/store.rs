use std::collections::HashMap;

use berth_oci::{ContainerRecord, ImageRecord};
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::labels::{LABEL_CONFIG_HASH, LABEL_MANAGED, LABEL_SCHEDULED};
use crate::models::Configuration;

/// A container as last observed on the engine, with the classification the
/// agent derives from its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedContainer {
    pub record: ContainerRecord,

    /// The container carries the managed label, i.e. this agent created it
    pub is_managed: bool,

    /// The container carries the scheduled-job label
    pub is_scheduled: bool,

    /// The spec checksum recorded at creation time, if any
    pub config_hash: Option<String>,
}

impl From<ContainerRecord> for ObservedContainer {
    fn from(record: ContainerRecord) -> Self {
        let is_managed = record.labels.contains_key(LABEL_MANAGED);
        let is_scheduled = record.labels.contains_key(LABEL_SCHEDULED);
        let config_hash = record.labels.get(LABEL_CONFIG_HASH).cloned();

        Self {
            record,
            is_managed,
            is_scheduled,
            config_hash,
        }
    }
}

impl ObservedContainer {
    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_running(&self) -> bool {
        self.record.is_running()
    }
}

/// An image as last observed on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedImage {
    pub record: ImageRecord,

    /// When the agent last saw or pulled this image
    pub last_known_update: DateTime<Utc>,
}

/// In-memory cache of everything the agent knows about the host: the active
/// configuration plus the containers and images on the engine.
///
/// The store never calls the engine; event intake and the initial inventory
/// scan are the only writers of the observed maps. Each topic has its own
/// reader/writer lock. When more than one lock is held the acquisition order
/// is `config → containers → images`; no lock is held across an engine call
/// except the config read lock during graph-stop traversal.
#[derive(Debug, Default)]
pub struct StateStore {
    config: RwLock<Configuration>,
    containers: RwLock<HashMap<String, ObservedContainer>>,
    images: RwLock<HashMap<String, ObservedImage>>,
}

impl StateStore {
    pub fn new(initial: Configuration) -> Self {
        Self {
            config: RwLock::new(initial),
            ..Default::default()
        }
    }

    /// Read access to the active configuration. Holding the guard blocks
    /// configuration swaps.
    pub async fn config(&self) -> RwLockReadGuard<'_, Configuration> {
        self.config.read().await
    }

    /// A clone of the active configuration, for sweeps that must not hold
    /// the lock across engine calls. A config swap takes effect at the next
    /// snapshot; in-flight passes finish against the old one.
    pub async fn snapshot_config(&self) -> Configuration {
        self.config.read().await.clone()
    }

    /// Atomically replace the active configuration.
    pub async fn replace_config(&self, cfg: Configuration) {
        *self.config.write().await = cfg;
    }

    pub async fn upsert_container(&self, record: ContainerRecord) {
        let mut containers = self.containers.write().await;
        containers.insert(record.id.clone(), record.into());
    }

    pub async fn remove_container(&self, id: &str) {
        self.containers.write().await.remove(id);
    }

    pub async fn snapshot_containers(&self) -> Vec<ObservedContainer> {
        self.containers.read().await.values().cloned().collect()
    }

    /// Scan for a container by canonicalized name.
    pub async fn container_by_name(&self, name: &str) -> Option<ObservedContainer> {
        self.containers
            .read()
            .await
            .values()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Insert or refresh an image, stamping the time we saw it.
    pub async fn upsert_image(&self, record: ImageRecord) {
        let mut images = self.images.write().await;
        images.insert(
            record.id.clone(),
            ObservedImage {
                record,
                last_known_update: Utc::now(),
            },
        );
    }

    pub async fn remove_image(&self, id: &str) {
        self.images.write().await.remove(id);
    }

    pub async fn snapshot_images(&self) -> Vec<ObservedImage> {
        self.images.read().await.values().cloned().collect()
    }

    /// Scan for an image carrying the given `repo:tag` reference.
    pub async fn image_by_repo_tag(&self, reference: &str) -> Option<ObservedImage> {
        self.images
            .read()
            .await
            .values()
            .find(|i| i.record.has_repo_tag(reference))
            .cloned()
    }
}
