//! Routing error types

use thiserror::Error;

/// Errors raised by route discovery and table maintenance
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// No path exists between the two devices
    #[error("No route from {from} to {to}")]
    NoRoute { from: String, to: String },

    /// Route discovery started from a device that is not part of the mesh
    #[error("Device {0} is not part of the mesh")]
    NotInMesh(String),

    /// Invalid route state
    #[error("Invalid route state: {0}")]
    InvalidRouteState(String),
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;
