//! # Zigmesh Core
//!
//! Core types, network-layer primitives, and errors shared by the zigmesh
//! workspace.
//!
//! The network layer itself (formation, discovery, association, routing)
//! sits behind the [`NetworkLayer`] trait. Scenario code only issues
//! [`NwkRequest`]s and reacts to the [`NwkNotification`]s the layer raises,
//! so the same bootstrap logic runs against the in-process stand-in stack
//! and against hand-built test doubles.
//!
//! ## Key Types
//!
//! - [`DeviceId`], [`ExtendedAddress`], [`ShortAddress`]: device identity and addressing
//! - [`NwkRequest`] / [`NwkConfirm`] / [`DataIndication`]: request/confirm primitives
//! - [`SequencedPacket`]: the 16-byte application header carried in every data frame
//! - [`RouteLookup`]: next-hop queries used for route tracing

pub mod error;
pub mod packet;
pub mod primitives;
pub mod traits;
pub mod types;

// Re-export main types
pub use error::*;
pub use packet::*;
pub use primitives::*;
pub use traits::*;
pub use types::*;
