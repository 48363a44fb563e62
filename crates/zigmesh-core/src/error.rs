//! Error types for zigmesh

use thiserror::Error;

/// Top-level error type for the core crate
#[derive(Debug, Error)]
pub enum ZigmeshError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

/// Errors related to device addressing
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Address {0} is reserved")]
    Reserved(String),
}

/// Errors related to the application packet header
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("Payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Payload size {requested} is smaller than the {minimum}-byte header")]
    PayloadTooSmall { requested: usize, minimum: usize },

    #[error("Origination time does not fit the header: {0} us")]
    TimestampOverflow(u128),
}
