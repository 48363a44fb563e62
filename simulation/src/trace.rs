//! Route inspector
//!
//! Follows next-hop decisions from a source address to a destination,
//! asking each visited device's own routing layer where to go next. The walk
//! is bounded by the number of registered devices, so a routing loop is
//! reported instead of spinning forever.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use zigmesh_core::{DeviceId, ExtendedAddress, RouteLookup, ShortAddress};

use crate::registry::TopologyRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("No device holds network address {0}")]
    UnknownAddress(ShortAddress),

    #[error("Routing loop detected after {hops} hops (limit {limit})")]
    RoutingLoop { hops: usize, limit: usize },
}

/// One visited device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceHop {
    /// 1-based position in the trace
    pub index: usize,
    pub device: DeviceId,
    pub short: ShortAddress,
    pub extended: ExtendedAddress,
    pub next_hop: ShortAddress,
    pub neighbor: bool,
}

impl fmt::Display for TraceHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. Node {} [{} | {}]: ",
            self.index, self.device, self.short, self.extended
        )?;
        if self.next_hop == ShortAddress::NO_ROUTE {
            write!(f, "Destination Unreachable")
        } else if self.neighbor {
            write!(f, "NextHop [{}] (*Neighbor)", self.next_hop)
        } else {
            write!(f, "NextHop [{}]", self.next_hop)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOutcome {
    Reached,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTrace {
    pub source: ShortAddress,
    pub destination: ShortAddress,
    pub hops: Vec<TraceHop>,
    pub outcome: TraceOutcome,
    /// Registered owner of the destination address, if any
    pub destination_device: Option<DeviceId>,
    /// Virtual time of the trace, when run inside a simulation
    pub at: Option<Duration>,
}

impl RouteTrace {
    /// Visited devices, ending with the destination when it was reached
    pub fn path(&self) -> Vec<DeviceId> {
        let mut path: Vec<DeviceId> = self.hops.iter().map(|hop| hop.device).collect();
        if self.outcome == TraceOutcome::Reached {
            if let Some(destination) = self.destination_device {
                if path.last() != Some(&destination) {
                    path.push(destination);
                }
            }
        }
        path
    }

    pub fn is_reached(&self) -> bool {
        self.outcome == TraceOutcome::Reached
    }
}

impl fmt::Display for RouteTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.at {
            Some(at) => writeln!(
                f,
                "Time {:.3}s | Traceroute to destination [{}]:",
                at.as_secs_f64(),
                self.destination
            )?,
            None => writeln!(f, "Traceroute to destination [{}]:", self.destination)?,
        }
        for hop in &self.hops {
            writeln!(f, "{hop}")?;
        }
        Ok(())
    }
}

/// Trace the route from `source` to `destination`
pub fn trace_route(
    registry: &TopologyRegistry,
    routes: &impl RouteLookup,
    source: ShortAddress,
    destination: ShortAddress,
) -> Result<RouteTrace, TraceError> {
    let limit = registry.len();
    let mut hops = Vec::new();
    let mut current = source;

    let outcome = loop {
        if current == destination {
            break TraceOutcome::Reached;
        }
        if hops.len() >= limit {
            warn!(
                source = %source,
                destination = %destination,
                hops = hops.len(),
                "Routing loop detected"
            );
            return Err(TraceError::RoutingLoop {
                hops: hops.len(),
                limit,
            });
        }

        let device = registry
            .by_short(current)
            .ok_or(TraceError::UnknownAddress(current))?;
        let step = routes.find_route(device.id, destination);
        hops.push(TraceHop {
            index: hops.len() + 1,
            device: device.id,
            short: current,
            extended: device.extended,
            next_hop: step.next_hop,
            neighbor: step.neighbor,
        });

        if step.is_unreachable() {
            break TraceOutcome::Unreachable;
        }
        current = step.next_hop;
    };

    debug!(
        source = %source,
        destination = %destination,
        hops = hops.len(),
        ?outcome,
        "Route traced"
    );
    Ok(RouteTrace {
        source,
        destination,
        hops,
        outcome,
        destination_device: registry.by_short(destination).map(|device| device.id),
        at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use zigmesh_core::{Position, RouteStep};

    /// Fixed next-hop table: (device, destination) -> step
    struct StaticRoutes(HashMap<(DeviceId, ShortAddress), RouteStep>);

    impl RouteLookup for StaticRoutes {
        fn find_route(&self, device: DeviceId, destination: ShortAddress) -> RouteStep {
            self.0
                .get(&(device, destination))
                .copied()
                .unwrap_or_else(RouteStep::unreachable)
        }
    }

    fn chain(n: u16) -> TopologyRegistry {
        let mut registry =
            TopologyRegistry::from_positions(&vec![Position::default(); n as usize]).unwrap();
        for i in 0..n {
            registry
                .assign_network_address(DeviceId(u32::from(i)), ShortAddress(i * 0x100))
                .unwrap();
        }
        registry
    }

    fn step(next: u16, neighbor: bool) -> RouteStep {
        RouteStep {
            next_hop: ShortAddress(next),
            neighbor,
        }
    }

    #[test]
    fn test_chain_trace() {
        let registry = chain(4);
        let dst = ShortAddress(0x300);
        let routes = StaticRoutes(HashMap::from([
            ((DeviceId(0), dst), step(0x100, false)),
            ((DeviceId(1), dst), step(0x200, false)),
            ((DeviceId(2), dst), step(0x300, true)),
        ]));

        let trace = trace_route(&registry, &routes, ShortAddress(0), dst).unwrap();
        assert!(trace.is_reached());
        assert_eq!(trace.hops.len(), 3);
        assert_eq!(
            trace.path(),
            vec![DeviceId(0), DeviceId(1), DeviceId(2), DeviceId(3)]
        );

        let rendered = trace.to_string();
        assert!(rendered.contains("1. Node 0 [00:00 | 00:00:00:00:00:00:CA:FE]: NextHop [01:00]"));
        assert!(rendered.contains("3. Node 2 [02:00 | 00:00:00:00:00:00:00:02]: NextHop [03:00] (*Neighbor)"));
    }

    #[test]
    fn test_unreachable() {
        let registry = chain(3);
        let routes = StaticRoutes(HashMap::new());
        let trace = trace_route(&registry, &routes, ShortAddress(0), ShortAddress(0x200)).unwrap();
        assert_eq!(trace.outcome, TraceOutcome::Unreachable);
        assert_eq!(trace.path(), vec![DeviceId(0)]);
        assert!(trace.to_string().contains("Destination Unreachable"));
    }

    #[test]
    fn test_trace_to_self_is_empty() {
        let registry = chain(2);
        let routes = StaticRoutes(HashMap::new());
        let trace = trace_route(&registry, &routes, ShortAddress(0x100), ShortAddress(0x100)).unwrap();
        assert!(trace.hops.is_empty());
        assert_eq!(trace.path(), vec![DeviceId(1)]);
    }

    #[test]
    fn test_routing_loop_is_detected() {
        let registry = chain(4);
        let dst = ShortAddress(0x300);
        // 0 -> 1 -> 2 -> 0 never reaches 3
        let routes = StaticRoutes(HashMap::from([
            ((DeviceId(0), dst), step(0x100, true)),
            ((DeviceId(1), dst), step(0x200, true)),
            ((DeviceId(2), dst), step(0x000, false)),
        ]));

        assert_eq!(
            trace_route(&registry, &routes, ShortAddress(0), dst),
            Err(TraceError::RoutingLoop { hops: 4, limit: 4 })
        );
    }

    #[test]
    fn test_unknown_address() {
        let registry = chain(2);
        let dst = ShortAddress(0x100);
        let routes = StaticRoutes(HashMap::from([((DeviceId(0), dst), step(0x4242, false))]));
        assert_eq!(
            trace_route(&registry, &routes, ShortAddress(0), dst),
            Err(TraceError::UnknownAddress(ShortAddress(0x4242)))
        );
    }
}
