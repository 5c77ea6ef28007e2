//! harbormaster: a single-process control plane for services, worker nodes
//! and the container instances placed on them.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod metrics;
pub mod runtime;
