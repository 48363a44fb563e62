//! Core traits for zigmesh
//!
//! - [`RouteLookup`]: next-hop queries against a device's routing state
//! - [`NetworkLayer`]: the request/confirm surface of a mesh network layer

use std::time::Duration;

use crate::primitives::{NwkNotification, NwkRequest};
use crate::types::{DeviceId, ShortAddress};

/// Result of asking a device for its next hop toward a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteStep {
    /// Next hop, or [`ShortAddress::NO_ROUTE`]
    pub next_hop: ShortAddress,
    /// Whether the next hop is a direct radio neighbour
    pub neighbor: bool,
}

impl RouteStep {
    pub fn unreachable() -> Self {
        Self {
            next_hop: ShortAddress::NO_ROUTE,
            neighbor: false,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.next_hop == ShortAddress::NO_ROUTE
    }
}

/// Next-hop lookup, answered by the device's own routing layer
pub trait RouteLookup {
    /// Ask `device` for its next hop toward `destination`
    fn find_route(&self, device: DeviceId, destination: ShortAddress) -> RouteStep;
}

/// A notification the network layer wants delivered after `after`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delayed<T> {
    pub after: Duration,
    pub item: T,
}

impl<T> Delayed<T> {
    pub fn new(after: Duration, item: T) -> Self {
        Self { after, item }
    }
}

/// Request/confirm surface of a mesh network layer
///
/// Requests never block. Whatever the layer has to say in return comes
/// back as delayed notifications that the caller schedules on its own
/// timeline.
pub trait NetworkLayer: RouteLookup {
    /// Submit a request at virtual time `now`
    fn submit(&mut self, request: NwkRequest, now: Duration) -> Vec<Delayed<NwkNotification>>;

    /// Network address currently held by `device`, if it joined
    fn network_address(&self, device: DeviceId) -> Option<ShortAddress>;

    /// Human-readable neighbour and routing tables of `device`
    fn table_dump(&self, _device: DeviceId) -> Option<String> {
        None
    }
}
