mod labels;
pub use labels::{LABEL_CONFIG_HASH, LABEL_MANAGED, LABEL_SCHEDULED};

mod models;
pub use models::{Configuration, ContainerSpec, PortSpec};

mod deps;
pub use deps::CyclicDependency;

mod policy;
pub use policy::PolicyError;

mod store;
pub use store::{ObservedContainer, ObservedImage, StateStore};

mod containers;
mod events;
mod images;

mod scheduler;
pub use scheduler::{Scheduler, SchedulerError};

#[cfg(test)]
mod support;
