//! Live-status probing.
//!
//! A probe answers one question for one entity: is it live right now? It never
//! fails outward; every failure mode collapses to "not active".

mod http;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use http::HttpStatusProbe;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Active,
    Inactive,
    /// The source could not be reached or answered with an error.
    Unknown,
}

impl ActiveStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ActiveStatus::Active)
    }
}

impl fmt::Display for ActiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveStatus::Active => write!(f, "live"),
            ActiveStatus::Inactive => write!(f, "offline"),
            ActiveStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Queries an external status source for one entity.
pub trait StatusProbe: Send + Sync {
    fn probe(&self, entity: &str) -> impl Future<Output = ActiveStatus> + Send;
}

impl<P: StatusProbe> StatusProbe for Arc<P> {
    fn probe(&self, entity: &str) -> impl Future<Output = ActiveStatus> + Send {
        (**self).probe(entity)
    }
}
