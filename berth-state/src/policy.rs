use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveTime};
use cron::Schedule;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::models::{ContainerSpec, PortSpec};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid start_times expression '{expr}': {source}")]
    InvalidSchedule {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("invalid update_times window '{0}', expected HH:MM-HH:MM")]
    InvalidWindow(String),
}

/// The spec fields covered by the checksum, serialized in this declaration
/// order. `update_times` is deliberately absent: changing when updates are
/// allowed must not itself count as configuration drift.
#[derive(Serialize)]
struct ChecksumFields<'a> {
    image: &'a str,
    tag: &'a str,
    command: &'a [String],
    environment: &'a [String],
    hosts: &'a [String],
    links: &'a [String],
    ports: &'a [PortSpec],
    volumes: &'a [String],
    labels: &'a BTreeMap<String, String>,
    start_times: &'a str,
    stop_timeout: u64,
    add_capabilities: &'a [String],
}

impl ContainerSpec {
    /// Stable content hash over the declared fields, stored in the
    /// `cfghash` label at creation time. A mismatch with the active spec's
    /// checksum is what defines configuration drift.
    pub fn checksum(&self) -> String {
        let fields = ChecksumFields {
            image: &self.image,
            tag: &self.tag,
            command: &self.command,
            environment: &self.environment,
            hosts: &self.hosts,
            links: &self.links,
            ports: &self.ports,
            volumes: &self.volumes,
            labels: &self.labels,
            start_times: &self.start_times,
            stop_timeout: self.stop_timeout,
            add_capabilities: &self.add_capabilities,
        };

        let encoded =
            serde_json::to_vec(&fields).expect("container spec fields serialize to JSON");
        let digest = Sha256::digest(&encoded);

        digest.iter().fold(String::with_capacity(64), |mut hex, b| {
            let _ = write!(hex, "{b:02x}");
            hex
        })
    }

    /// Whether the container should be running on the given host at `now`.
    ///
    /// `next_run` is the derived next cron firing time for scheduled specs;
    /// `None` for a scheduled spec means the expression didn't parse, which
    /// keeps the job from ever starting.
    pub fn should_be_running(
        &self,
        hostname: &str,
        next_run: Option<DateTime<Local>>,
        now: DateTime<Local>,
    ) -> bool {
        if !self.targets_host(hostname) {
            return false;
        }

        if !self.is_scheduled() {
            return true;
        }

        match next_run {
            Some(at) => at <= now,
            None => false,
        }
    }

    /// The next firing time of `start_times` strictly after `after`, or
    /// `None` for unscheduled specs.
    ///
    /// The stored expression has no seconds field; cron jobs fire on the
    /// full minute, so a literal `0` seconds field is prepended.
    pub fn next_scheduled_run(
        &self,
        after: DateTime<Local>,
    ) -> Result<Option<DateTime<Local>>, PolicyError> {
        if !self.is_scheduled() {
            return Ok(None);
        }

        let schedule =
            Schedule::from_str(&format!("0 {}", self.start_times)).map_err(|source| {
                PolicyError::InvalidSchedule {
                    expr: self.start_times.clone(),
                    source,
                }
            })?;

        Ok(schedule.after(&after).next())
    }

    /// Whether configuration or image drift may restart this container at
    /// `now`. Empty `update_times` means always.
    pub fn update_allowed_at(&self, now: DateTime<Local>) -> Result<bool, PolicyError> {
        if self.update_times.is_empty() {
            return Ok(true);
        }

        let now = now.time();
        for window in &self.update_times {
            let (start, end) = parse_window(window)?;

            if end <= start {
                warn!("update window '{window}' can never match, end is not after start");
                continue;
            }

            if start < now && now < end {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

fn parse_window(window: &str) -> Result<(NaiveTime, NaiveTime), PolicyError> {
    let invalid = || PolicyError::InvalidWindow(window.to_string());

    let (start, end) = window.split_once('-').ok_or_else(invalid)?;
    let start = NaiveTime::parse_from_str(start, "%H:%M").map_err(|_| invalid())?;
    let end = NaiveTime::parse_from_str(end, "%H:%M").map_err(|_| invalid())?;

    Ok((start, end))
}
