//! Boundary to the remote resource service.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Circle, Resource};

/// Failure reported by a [`ResourceClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The service is shedding load (rate limit, quota). The current circle
    /// can be skipped and the sweep continued.
    #[error("remote overloaded: {0}")]
    Overload(String),
    /// Anything else: auth, network, unexpected responses.
    #[error("remote failure: {0}")]
    Fatal(String),
}

impl RemoteError {
    /// True for the skip-and-continue class.
    pub fn is_overload(&self) -> bool {
        matches!(self, RemoteError::Overload(_))
    }
}

/// Authenticated access to the remote resource service.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Resources currently known inside `circle`, in service order.
    async fn query(&self, circle: &Circle) -> Result<Vec<Resource>, RemoteError>;

    /// Claims `resource_id` for `claimant` (a user id).
    async fn claim(&self, resource_id: &str, claimant: &str, amount: u64) -> Result<(), RemoteError>;
}
