use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use berth_oci::{ContainerStatus, CreateRequest, PortMapping};
use chrono::{DateTime, Local, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deps;
use crate::labels::{LABEL_CONFIG_HASH, LABEL_MANAGED, LABEL_SCHEDULED};
use crate::models::{Configuration, ContainerSpec};
use crate::scheduler::Shared;

/// Containers without a spec get this long to shut down gracefully.
const UNEXPECTED_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Lower bound for per-spec stop timeouts.
const MIN_STOP_TIMEOUT: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub(crate) enum GraphStopError {
    #[error("no container configuration found for '{0}'")]
    UnknownSpec(String),

    #[error(transparent)]
    Runtime(#[from] berth_oci::Error),
}

fn within_grace(since: berth_oci::DateTime, min_age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(*since)
        .to_std()
        .map(|elapsed| elapsed < min_age)
        .unwrap_or(true)
}

impl Shared {
    /// One container manager sweep: the four passes run in fixed order and
    /// the next sweep only starts once this one has returned.
    pub(crate) async fn container_tick(self: Arc<Self>, now: DateTime<Local>) {
        self.remove_dead_containers(now).await;
        let _ = Arc::clone(&self).stop_unexpected_containers().await;
        let _ = Arc::clone(&self).stop_containers_with_updates(now).await;
        self.start_containers(now).await;
    }

    /// Pass (a): reap containers that are no longer running and no longer
    /// wanted.
    pub(crate) async fn remove_dead_containers(&self, now: DateTime<Local>) {
        let cleanup = *self.cleanup.read().await;
        let cfg = self.store.snapshot_config().await;
        let now = now.with_timezone(&Utc);

        for cont in self.store.snapshot_containers().await {
            if cont.is_running() {
                continue;
            }

            // newly created or newly deceased, don't bury yet
            if within_grace(cont.record.created, cleanup.min_age, now)
                || cont
                    .record
                    .finished_at
                    .map(|t| within_grace(t, cleanup.min_age, now))
                    .unwrap_or(false)
            {
                continue;
            }

            if !cont.is_managed && !cont.is_scheduled && !cleanup.active {
                // not one of ours, no permission to clean up
                continue;
            }

            if cfg.contains(cont.name()) {
                // still configured; removal belongs to the start pass
                continue;
            }

            if let Err(e) = self.runtime.remove_container(&cont.record.id, false).await {
                error!("unable to remove container {}: {e}", cont.name());
            }
        }
    }

    /// Pass (b): ask running containers without a spec to stop. Scheduled
    /// jobs are left alone, they terminate themselves.
    pub(crate) async fn stop_unexpected_containers(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let cleanup = *self.cleanup.read().await;
        let cfg = self.store.snapshot_config().await;
        let mut stops = Vec::new();

        for cont in self.store.snapshot_containers().await {
            if !cont.is_running() {
                continue;
            }

            if !cont.is_managed && !cleanup.active {
                // not ours, not the police
                continue;
            }

            if cont.is_scheduled {
                continue;
            }

            if cfg.contains(cont.name()) {
                continue;
            }

            info!(
                "stopping container {} as it is not expected to be running",
                cont.name()
            );
            let shared = Arc::clone(&self);
            stops.push(tokio::spawn(async move {
                if let Err(e) = shared
                    .runtime
                    .stop_container(&cont.record.id, UNEXPECTED_STOP_TIMEOUT)
                    .await
                {
                    error!("unable to stop container {}: {e}", cont.name());
                }
            }));
        }

        stops
    }

    /// Pass (c): stop running containers whose spec checksum or image has
    /// drifted, respecting update windows and stopping dependents first.
    pub(crate) async fn stop_containers_with_updates(
        self: Arc<Self>,
        now: DateTime<Local>,
    ) -> Vec<JoinHandle<()>> {
        let cfg = self.store.snapshot_config().await;
        let mut stops = Vec::new();

        for cont in self.store.snapshot_containers().await {
            if !cont.is_running() {
                continue;
            }

            let Some(spec) = cfg.get(cont.name()) else {
                continue;
            };

            match spec.update_allowed_at(now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(
                        "could not determine whether update is allowed for {}: {e}",
                        cont.name()
                    );
                    continue;
                }
            }

            let mut stop = false;

            if let Some(hash) = &cont.config_hash
                && *hash != spec.checksum()
            {
                info!("container {} has a configuration update", cont.name());
                stop = true;
            }

            if let Some(image) = self.store.image_by_repo_tag(&spec.image_ref()).await
                && image.record.id != cont.record.image_id
            {
                info!("container {} has a new image version", cont.name());
                stop = true;
            }

            if stop {
                let shared = Arc::clone(&self);
                let name = cont.name().to_owned();
                stops.push(tokio::spawn(async move {
                    if let Err(e) = shared.stop_container_graph(&name).await {
                        error!("unable to stop container {name}: {e}");
                    }
                }));
            }
        }

        stops
    }

    /// Stop a container and, first, everything that links to it. The config
    /// read guard is held for the whole traversal so the graph can't change
    /// underneath the recursion.
    pub(crate) async fn stop_container_graph(&self, name: &str) -> Result<(), GraphStopError> {
        let cfg = self.store.config().await;
        self.stop_graph(&cfg, name).await
    }

    fn stop_graph<'a>(
        &'a self,
        cfg: &'a Configuration,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), GraphStopError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(spec) = cfg.get(name) else {
                return Err(GraphStopError::UnknownSpec(name.to_owned()));
            };

            for dependent in deps::dependents_of(cfg, name) {
                self.stop_graph(cfg, &dependent).await?;
            }

            if let Some(cont) = self.store.container_by_name(name).await
                && cont.is_running()
            {
                let timeout = Duration::from_secs(spec.stop_timeout.max(MIN_STOP_TIMEOUT));
                self.runtime.stop_container(&cont.record.id, timeout).await?;
            }

            Ok(())
        })
    }

    /// Pass (d): walk the dependency chain and boot whatever should be
    /// running but isn't. Stopped remnants are removed before the fresh
    /// container is created.
    pub(crate) async fn start_containers(self: Arc<Self>, now: DateTime<Local>) {
        let cfg = self.store.snapshot_config().await;

        let chain = match cfg.dependency_chain() {
            Ok(chain) => chain,
            Err(e) => {
                error!("unable to get dependency chain: {e}");
                return;
            }
        };

        for name in chain {
            let Some(spec) = cfg.get(&name) else {
                continue;
            };

            let next_run = self.next_run_of(&name).await;
            if !spec.should_be_running(&self.hostname, next_run, now) {
                continue;
            }

            if let Some(cont) = self.store.container_by_name(&name).await {
                if cont.is_running() {
                    continue;
                }

                if let Err(e) = self.runtime.remove_container(&cont.record.id, false).await {
                    error!("unable to remove container {name}: {e}");
                    continue;
                }
            }

            if let Err(e) = Arc::clone(&self).boot_container(&name, spec).await {
                error!("unable to execute container {name}: {e}");
                continue;
            }

            self.record_started(&name, spec, now).await;
        }
    }

    /// Create and start a container from its spec, stamping the managed
    /// labels.
    pub(crate) async fn boot_container(
        self: Arc<Self>,
        name: &str,
        spec: &ContainerSpec,
    ) -> berth_oci::Result<()> {
        let checksum = spec.checksum();

        // spec labels first, the managed labels win on collision
        let mut labels = spec.labels.clone();
        labels.insert(LABEL_MANAGED.to_owned(), "true".to_owned());
        labels.insert(LABEL_CONFIG_HASH.to_owned(), checksum);
        if spec.is_scheduled() {
            labels.insert(LABEL_SCHEDULED.to_owned(), "true".to_owned());
        }

        let (volumes, binds) = parse_mounts(&spec.volumes);

        let mut ports = Vec::new();
        for port in &spec.ports {
            let Some((host_ip, host_port)) = port.local.rsplit_once(':') else {
                warn!(
                    "invalid port mapping '{}' for container {name}, expected hostIP:hostPort",
                    port.local
                );
                continue;
            };
            ports.push(PortMapping {
                container: port.container.clone(),
                host_ip: host_ip.to_owned(),
                host_port: host_port.to_owned(),
            });
        }

        let request = CreateRequest {
            image: spec.image_ref(),
            command: spec.command.clone(),
            environment: spec.environment.clone(),
            labels,
            binds,
            volumes,
            links: spec.links.clone(),
            ports,
            cap_add: spec.add_capabilities.clone(),
        };

        info!("creating container {name}");
        let id = match self.runtime.create_container(name, request).await {
            Ok(id) => id,
            Err(e) => {
                if e.is_create_conflict() {
                    let shared = Arc::clone(&self);
                    tokio::spawn(async move { shared.clean_stale_containers().await });
                }
                return Err(e);
            }
        };

        info!("starting container {name}");
        self.runtime.start_container(&id).await
    }

    /// Force-remove containers that are lying around dead, or that were
    /// created by the agent but never made it to running. Triggered in the
    /// background when a create runs into a name conflict.
    pub(crate) async fn clean_stale_containers(&self) {
        for cont in self.store.snapshot_containers().await {
            let reap = matches!(
                cont.record.status,
                ContainerStatus::Stopped | ContainerStatus::Dead
            ) || (cont.record.status == ContainerStatus::Created && cont.is_managed);

            if !reap {
                continue;
            }

            info!(
                "removing stale container {} ({:?})",
                cont.name(),
                cont.record.status
            );
            if let Err(e) = self.runtime.remove_container(&cont.record.id, true).await {
                error!("unable to remove container {}: {e}", cont.name());
            }
        }
    }
}

/// Split `host:container[:mode]` bind strings into the container-side mount
/// points and the bind list the engine expects. Malformed entries are
/// dropped with an error.
fn parse_mounts(mounts: &[String]) -> (Vec<String>, Vec<String>) {
    let mut volumes = Vec::new();
    let mut binds = Vec::new();

    for mount in mounts {
        if mount.is_empty() {
            continue;
        }

        let parts: Vec<&str> = mount.split(':').collect();
        if parts.len() != 2 && parts.len() != 3 {
            error!("invalid volume mount: {mount}");
            continue;
        }

        binds.push(mount.clone());
        volumes.push(parts[1].to_owned());
    }

    (volumes, binds)
}
