//! # Zigmesh Routing
//!
//! Per-device routing state for the mesh network layer.
//!
//! ## Core Components
//!
//! - [`RoutingTable`]: next-hop entries per destination, with staleness in
//!   virtual time
//! - [`NeighborTable`]: devices within radio range, with their relationship,
//!   depth and link quality
//! - [`shortest_path`]: breadth-first route discovery over the joined devices
//! - [`RouteDiscoveryTable`]: route requests in flight, until they expire
//!
//! ## Route Lookup
//!
//! A device answers "where do I send a frame for `dest`?" in two steps:
//!
//! 1. **NEIGHBOUR**: if `dest` is in the neighbour table, send it directly
//! 2. **ROUTE**: otherwise use the cached next hop from the routing table
//!
//! When neither applies the answer is the `FF:FF` no-route sentinel, and the
//! network layer must run route discovery first.

pub mod discovery;
pub mod error;
pub mod neighbor;
pub mod route_discovery;
pub mod table;

// Re-export main types
pub use discovery::shortest_path;
pub use error::{RoutingError, RoutingResult};
pub use neighbor::{NeighborEntry, NeighborTable, Relationship};
pub use route_discovery::{ROUTE_DISCOVERY_TIME, RouteDiscoveryEntry, RouteDiscoveryTable};
pub use table::{RouteEntry, RouteStatus, RoutingTable};

use zigmesh_core::{RouteStep, ShortAddress};

/// Resolve the next hop toward `destination` from a device's own tables
pub fn lookup(
    neighbors: &NeighborTable,
    routes: &RoutingTable,
    destination: ShortAddress,
) -> RouteStep {
    if neighbors.contains(destination) {
        return RouteStep {
            next_hop: destination,
            neighbor: true,
        };
    }

    match routes.next_hop(destination) {
        Some(next_hop) => RouteStep {
            next_hop,
            neighbor: false,
        },
        None => RouteStep::unreachable(),
    }
}
