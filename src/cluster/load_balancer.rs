//! Load balancer - picks the container that serves a request for a service
//!
//! Only round-robin has a concrete behaviour: a uniform random pick among
//! running containers. The other strategies are accepted and reported, but
//! select exactly like round-robin and say so via `Selection::differentiated`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::container::Container;
use super::service::Service;

/// Errors that can occur while selecting a container
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadBalancerError {
    #[error("Service '{0}' has no containers")]
    NoContainers(String),

    #[error("Service '{0}' has no running containers")]
    NoRunningContainers(String),
}

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    IpHash,
}

impl LoadBalanceStrategy {
    /// Whether this strategy selects differently from round-robin
    pub fn is_differentiated(&self) -> bool {
        matches!(self, LoadBalanceStrategy::RoundRobin)
    }
}

/// Outcome of a selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub container: Container,
    pub strategy: LoadBalanceStrategy,
    /// False when the configured strategy fell back to round-robin
    pub differentiated: bool,
}

/// Container selection for incoming requests
#[derive(Debug, Clone, Default)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// Pick a running container of `service`
    pub fn select_container(&self, service: &Service) -> Result<Selection, LoadBalancerError> {
        self.select_container_with_rng(service, &mut rand::thread_rng())
    }

    /// Pick a running container using the given source of randomness
    pub fn select_container_with_rng<R: Rng + ?Sized>(
        &self,
        service: &Service,
        rng: &mut R,
    ) -> Result<Selection, LoadBalancerError> {
        if service.containers.is_empty() {
            return Err(LoadBalancerError::NoContainers(service.id.clone()));
        }

        let running: Vec<&Container> = service.containers.iter().filter(|c| c.is_running()).collect();
        if running.is_empty() {
            return Err(LoadBalancerError::NoRunningContainers(service.id.clone()));
        }

        let differentiated = self.strategy.is_differentiated();
        if !differentiated {
            debug!(
                service_id = %service.id,
                strategy = %self.strategy,
                "Strategy not differentiated, selecting as round_robin"
            );
        }

        let container = running[rng.gen_range(0..running.len())].clone();
        Ok(Selection {
            container,
            strategy: self.strategy,
            differentiated,
        })
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::LeastConnections => "least_connections",
            LoadBalanceStrategy::WeightedRoundRobin => "weighted_round_robin",
            LoadBalanceStrategy::IpHash => "ip_hash",
        };
        f.write_str(s)
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(LoadBalanceStrategy::RoundRobin),
            "least_connections" => Ok(LoadBalanceStrategy::LeastConnections),
            "weighted_round_robin" => Ok(LoadBalanceStrategy::WeightedRoundRobin),
            "ip_hash" => Ok(LoadBalanceStrategy::IpHash),
            other => Err(format!("unknown load balance strategy '{}'", other)),
        }
    }
}
