use std::sync::Arc;

use berth_oci::{EventKind, Runtime, RuntimeEvent};
use futures_lite::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::scheduler::SchedulerError;
use crate::store::StateStore;

/// One full inventory pass: every image and every container (including
/// stopped ones) is inspected and inserted into the store. Runs once at
/// bootstrap, before subscribing to events.
pub(crate) async fn initial_scan(
    runtime: &dyn Runtime,
    store: &StateStore,
) -> berth_oci::Result<()> {
    for id in runtime.list_images().await? {
        let record = runtime.inspect_image(&id).await?;
        store.upsert_image(record).await;
    }

    for id in runtime.list_containers(true).await? {
        let record = runtime.inspect_container(&id).await?;
        store.upsert_container(record).await;
    }

    Ok(())
}

/// Apply a single engine event to the store.
///
/// Containers are refreshed on every state-changing action and purged on
/// `destroy`; images are refreshed on `pull`/`tag` and purged on
/// `untag`/`delete`. Everything else is ignored.
pub(crate) async fn handle_event(
    runtime: &dyn Runtime,
    store: &StateStore,
    event: &RuntimeEvent,
) -> berth_oci::Result<()> {
    match event.kind {
        EventKind::Container => match event.action.as_str() {
            "create" | "start" | "stop" | "restart" | "kill" | "die" | "pause" | "unpause"
            | "rename" | "resize" | "oom" => {
                let record = runtime.inspect_container(&event.actor_id).await?;
                store.upsert_container(record).await;
            }
            "destroy" => store.remove_container(&event.actor_id).await,
            _ => {}
        },
        EventKind::Image => match event.action.as_str() {
            // for pulls the actor id is the image name; inspect resolves both
            "pull" | "tag" => {
                let record = runtime.inspect_image(&event.actor_id).await?;
                store.upsert_image(record).await;
            }
            "untag" | "delete" => store.remove_image(&event.actor_id).await,
            _ => {}
        },
        _ => {}
    }

    Ok(())
}

/// Consume the engine event stream until it ends. The stream ending means
/// the agent is blind, which is the one unrecoverable condition.
pub(crate) async fn run_listener(
    runtime: Arc<dyn Runtime>,
    store: Arc<StateStore>,
    errors: mpsc::Sender<SchedulerError>,
) {
    let mut events = runtime.events();

    while let Some(event) = events.next().await {
        debug!(
            kind = ?event.kind,
            action = %event.action,
            actor = %event.actor_id,
            "event received"
        );

        if let Err(e) = handle_event(runtime.as_ref(), store.as_ref(), &event).await {
            error!("unable to handle {:?} event: {e}", event.kind);
        }
    }

    let _ = errors.send(SchedulerError::ListenerLoopEnded).await;
}
