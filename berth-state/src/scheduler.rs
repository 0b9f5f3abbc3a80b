use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use berth_oci::{RegistryAuth, Runtime};
use chrono::{DateTime, Local, Utc};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::warn;

use crate::events;
use crate::models::{Configuration, ContainerSpec};
use crate::store::StateStore;

/// Both manager loops sweep once a minute.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const MAX_CONCURRENT_PULLS: usize = 10;
const ERROR_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The engine event stream ended; the agent can no longer track state.
    #[error("engine event listener loop ended")]
    ListenerLoopEnded,

    #[error("initial inventory scan failed: {0}")]
    InitialScan(#[source] berth_oci::Error),
}

/// Whether and how aggressively the agent garbage-collects objects it did
/// not create.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CleanupPolicy {
    pub(crate) active: bool,
    pub(crate) min_age: Duration,
}

/// State shared between the manager loops, the event listener and the
/// public [Scheduler] handle.
pub(crate) struct Shared {
    pub(crate) runtime: Arc<dyn Runtime>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) auth: RegistryAuth,
    pub(crate) hostname: String,
    pub(crate) image_refresh_interval: Duration,
    pub(crate) cleanup: RwLock<CleanupPolicy>,

    /// Next cron firing per scheduled container. Derived state, kept out of
    /// the specs so checksums and config equality stay pure.
    pub(crate) schedules: Mutex<HashMap<String, DateTime<Local>>>,

    /// `repo:tag` references with a pull currently in progress.
    pub(crate) pulls_in_flight: Mutex<HashSet<String>>,
    pub(crate) pull_slots: Arc<Semaphore>,
}

impl Shared {
    pub(crate) fn new(
        hostname: String,
        runtime: Arc<dyn Runtime>,
        auth: RegistryAuth,
        initial: Configuration,
        image_refresh_interval: Duration,
    ) -> Self {
        Self {
            runtime,
            store: Arc::new(StateStore::new(initial)),
            auth,
            hostname,
            image_refresh_interval,
            cleanup: RwLock::new(CleanupPolicy::default()),
            schedules: Mutex::new(HashMap::new()),
            pulls_in_flight: Mutex::new(HashSet::new()),
            pull_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_PULLS)),
        }
    }

    /// Recompute the next-run table for every scheduled spec in `cfg`.
    /// Specs with an unparseable expression get no entry and therefore
    /// never start.
    pub(crate) async fn reschedule(&self, cfg: &Configuration, now: DateTime<Local>) {
        let mut next_runs = HashMap::new();

        for (name, spec) in cfg.iter() {
            match spec.next_scheduled_run(now) {
                Ok(Some(at)) => {
                    next_runs.insert(name.clone(), at);
                }
                Ok(None) => {}
                Err(e) => warn!("container {name} will not be scheduled: {e}"),
            }
        }

        *self.schedules.lock().await = next_runs;
    }

    /// Advance a scheduled container's next run after a successful start.
    pub(crate) async fn record_started(
        &self,
        name: &str,
        spec: &ContainerSpec,
        now: DateTime<Local>,
    ) {
        match spec.next_scheduled_run(now) {
            Ok(Some(at)) => {
                self.schedules.lock().await.insert(name.to_owned(), at);
            }
            Ok(None) => {}
            Err(e) => warn!("unable to update next run for container {name}: {e}"),
        }
    }

    pub(crate) async fn next_run_of(&self, name: &str) -> Option<DateTime<Local>> {
        self.schedules.lock().await.get(name).copied()
    }

    pub(crate) async fn set_cleanup(&self, min_age: Duration) {
        *self.cleanup.write().await = CleanupPolicy {
            active: true,
            min_age,
        };
    }
}

/// Handle to a running reconciliation scheduler.
///
/// [`Scheduler::start`] scans the engine's inventory, subscribes to its
/// event stream and spawns the image and container manager loops. The
/// returned receiver surfaces unrecoverable faults; everything else is
/// logged and retried on the next sweep.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub async fn start(
        hostname: impl Into<String>,
        runtime: Arc<dyn Runtime>,
        auth: RegistryAuth,
        initial: Configuration,
        image_refresh_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<SchedulerError>), SchedulerError> {
        let shared = Arc::new(Shared::new(
            hostname.into(),
            runtime,
            auth,
            initial,
            image_refresh_interval,
        ));

        let cfg = shared.store.snapshot_config().await;
        shared.reschedule(&cfg, Local::now()).await;

        events::initial_scan(shared.runtime.as_ref(), &shared.store)
            .await
            .map_err(SchedulerError::InitialScan)?;

        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        tokio::spawn(events::run_listener(
            Arc::clone(&shared.runtime),
            Arc::clone(&shared.store),
            errors_tx,
        ));

        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut ticker = time::interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let _ = Arc::clone(&shared).image_tick(Utc::now()).await;
                }
            });
        }

        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut ticker = time::interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    Arc::clone(&shared).container_tick(Local::now()).await;
                }
            });
        }

        Ok((Self { shared }, errors_rx))
    }

    /// Swap the active configuration. Passes already in flight finish
    /// against the previous snapshot.
    pub async fn update_configuration(&self, cfg: Configuration) {
        self.shared.reschedule(&cfg, Local::now()).await;
        self.shared.store.replace_config(cfg).await;
    }

    /// Turn on full-host garbage collection: images nothing references and
    /// containers the agent did not create become eligible for removal once
    /// older than `min_age`.
    pub async fn enable_image_cleanup(&self, min_age: Duration) {
        self.shared.set_cleanup(min_age).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{self, EngineCall, ScriptedRuntime};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn start_scans_the_inventory_before_returning() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.seed_image("sha256:01", &["nginx:1.25"]);
        let mut web = support::container_record("c1", "web", "sha256:01");
        web.status = berth_oci::ContainerStatus::Running;
        runtime.seed_container(web);
        runtime.take_events();

        let cfg = support::config(&[("web", support::spec("nginx", "1.25"))]);
        let (scheduler, _errors) = Scheduler::start(
            "node1",
            Arc::clone(&runtime) as Arc<dyn Runtime>,
            RegistryAuth::default(),
            cfg,
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        assert!(
            scheduler
                .shared
                .store
                .image_by_repo_tag("nginx:1.25")
                .await
                .is_some()
        );
        assert!(
            scheduler
                .shared
                .store
                .container_by_name("web")
                .await
                .is_some()
        );
        // the scan must not issue any mutating engine calls
        assert_eq!(runtime.calls(), Vec::<EngineCall>::new());
    }

    #[tokio::test]
    async fn configuration_updates_replace_the_snapshot_and_schedules() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let (scheduler, _errors) = Scheduler::start(
            "node1",
            Arc::clone(&runtime) as Arc<dyn Runtime>,
            RegistryAuth::default(),
            support::config(&[]),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        let mut backup = support::spec("example/backup", "1");
        backup.start_times = "0 3 * * *".to_string();
        scheduler
            .update_configuration(support::config(&[("backup", backup)]))
            .await;

        assert!(scheduler.shared.store.snapshot_config().await.contains("backup"));
        assert!(scheduler.shared.next_run_of("backup").await.is_some());

        // swapping away drops the derived schedule entry
        scheduler.update_configuration(support::config(&[])).await;
        assert_eq!(scheduler.shared.next_run_of("backup").await, None);
    }

    #[tokio::test]
    async fn invalid_cron_expressions_leave_no_schedule_entry() {
        let mut bad = support::spec("x", "1");
        bad.start_times = "definitely not cron".to_string();
        let h = support::harness(&[("bad", bad)]).await;

        assert_eq!(h.shared.next_run_of("bad").await, None);
    }
}
