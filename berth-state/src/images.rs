use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::scheduler::Shared;
use crate::store::ObservedImage;

/// Untagged images get garbage-collected after an hour no matter what the
/// configured minimum age is.
const DANGLING_MIN_AGE: Duration = Duration::from_secs(3600);

fn elapsed_at_least(since: DateTime<Utc>, min: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .map(|elapsed| elapsed >= min)
        .unwrap_or(false)
}

fn display_name(image: &ObservedImage) -> &str {
    image
        .record
        .repo_tags
        .first()
        .map(String::as_str)
        .unwrap_or(&image.record.id)
}

impl Shared {
    /// One image manager sweep.
    ///
    /// Desired images (referenced by a spec targeting this host) are pulled
    /// when the cache has never seen them or when the last pull is older
    /// than the refresh interval; this is also what performs the initial
    /// pulls on the first post-boot tick. In full-host mode, images nothing
    /// references are garbage-collected once old enough.
    ///
    /// Pulls run in background tasks; the returned handles are only
    /// interesting to tests.
    pub(crate) async fn image_tick(self: Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let cfg = self.store.snapshot_config().await;
        let desired = cfg.image_list(&self.hostname);
        let cleanup = *self.cleanup.read().await;
        let images = self.store.snapshot_images().await;

        let mut pulls = Vec::new();

        for reference in &desired {
            let stale = match images.iter().find(|i| i.record.has_repo_tag(reference)) {
                Some(image) => {
                    elapsed_at_least(image.last_known_update, self.image_refresh_interval, now)
                }
                None => true,
            };

            if stale && let Some(handle) = Arc::clone(&self).spawn_pull(reference).await {
                pulls.push(handle);
            }
        }

        if cleanup.active {
            for image in &images {
                if image.record.repo_tags.iter().any(|t| desired.contains(t)) {
                    continue;
                }

                let min_age = if image.record.is_dangling() {
                    DANGLING_MIN_AGE
                } else {
                    cleanup.min_age
                };
                if !elapsed_at_least(*image.record.created, min_age, now) {
                    continue;
                }

                info!("removing unreferenced image {}", display_name(image));
                if let Err(e) = self.runtime.remove_image(&image.record.id).await {
                    error!("unable to delete image {}: {e}", image.record.id);
                }
            }
        }

        pulls
    }

    /// Kick off a background pull unless one is already running for the
    /// same reference.
    async fn spawn_pull(self: Arc<Self>, reference: &str) -> Option<JoinHandle<()>> {
        {
            let mut in_flight = self.pulls_in_flight.lock().await;
            if !in_flight.insert(reference.to_owned()) {
                debug!("image {reference} is already pulling, starting no new pull");
                return None;
            }
        }

        let (repo, tag) = split_reference(reference);
        let creds = self.auth.credentials_for(&repo);
        let reference = reference.to_owned();
        let shared = self;

        Some(tokio::spawn(async move {
            let Ok(_permit) = Arc::clone(&shared.pull_slots).acquire_owned().await else {
                return;
            };

            debug!("refreshing image {reference}");
            if let Err(e) = shared.runtime.pull_image(&repo, &tag, creds).await {
                error!("failed to pull image {reference}: {e}");
            }

            shared.pulls_in_flight.lock().await.remove(&reference);
        }))
    }
}

/// Split a `repo:tag` reference. The tag part never contains a slash, which
/// keeps registry ports (`registry:5000/app`) on the repo side.
fn split_reference(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_owned(), tag.to_owned()),
        _ => (reference.to_owned(), "latest".to_owned()),
    }
}
