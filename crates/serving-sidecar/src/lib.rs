//! Pure builders for the queue sidecar of serving Revisions.
//!
//! The entry point is [`queue::make_queue_container`], which combines
//!
//! - the resource requirements derived in [`resources`],
//! - the readiness probes translated in [`probe`] and
//! - the cluster [`config`]
//!
//! into the queue sidecar container of a [`revision::Revision`].

pub mod builder;
pub mod config;
pub mod constants;
pub mod kvp;
pub mod logging;
pub mod probe;
pub mod quantity;
pub mod queue;
pub mod resources;
pub mod revision;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;
