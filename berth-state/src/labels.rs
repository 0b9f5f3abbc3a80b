/// Label marking a container as created by this agent.
pub const LABEL_MANAGED: &str = "io.luzifer.dockermanager.managed";

/// Label storing the spec checksum the container was created from.
pub const LABEL_CONFIG_HASH: &str = "io.luzifer.dockermanager.cfghash";

/// Label marking a container started from a cron schedule.
pub const LABEL_SCHEDULED: &str = "io.luzifer.dockermanager.scheduler";
