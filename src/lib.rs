//! Scale-to-zero activation proxy for a namespaced group of Deployments.
//!
//! Module map: [`config`] loads process configuration; [`orchestrator`]
//! wraps the Kubernetes API; [`activity_clock`] tracks per-namespace last
//! access; [`activation`] drives a group from zero to ready; [`reaper`]
//! scales idle groups back down; [`forward`] proxies to the primary
//! service; [`routes`] wires all of the above into an axum `Router`.

pub mod activation;
pub mod activity_clock;
pub mod config;
pub mod error;
pub mod forward;
pub mod orchestrator;
pub mod reaper;
pub mod routes;
