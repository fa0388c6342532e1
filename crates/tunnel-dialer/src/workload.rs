//! Workload resolution collaborators
//!
//! The dialer does not know how addresses map to workloads. A cluster
//! integration implements [`WorkloadLocator`] and [`ReadinessWaiter`] and
//! passes them to [`crate::TunnelDialer`].

use crate::context::DialContext;
use crate::error::BoxError;
use crate::target::TargetAddress;
use async_trait::async_trait;
use std::fmt;

/// The workload and container reachable at a target address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadIdentity {
    pub workload_id: String,
    pub container_id: String,
}

impl WorkloadIdentity {
    pub fn new(workload_id: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            workload_id: workload_id.into(),
            container_id: container_id.into(),
        }
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workload_id, self.container_id)
    }
}

/// Resolves a target address to the workload serving it
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkloadLocator: Send + Sync {
    async fn locate(
        &self,
        ctx: &DialContext,
        target: &TargetAddress,
    ) -> Result<WorkloadIdentity, BoxError>;
}

/// Waits until a workload's container can accept tunnel traffic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadinessWaiter: Send + Sync {
    /// May block up to the context's deadline
    async fn await_ready(
        &self,
        ctx: &DialContext,
        workload: &WorkloadIdentity,
    ) -> Result<(), BoxError>;
}
