//! Stress tests for zigmesh-routing
//!
//! These tests exercise the routing components on large tables and graphs.

use std::time::{Duration, Instant};

use zigmesh_core::{DeviceType, ExtendedAddress, ShortAddress};
use zigmesh_routing::{
    NeighborEntry, NeighborTable, Relationship, RouteEntry, RoutingTable, lookup, shortest_path,
};

#[test]
fn test_routing_table_throughput() {
    const ROUTE_COUNT: u16 = 10_000;

    let mut table = RoutingTable::new(Duration::from_secs(300));
    let start = Instant::now();

    for i in 1..=ROUTE_COUNT {
        let next_hop = ShortAddress(i % 16 + 1);
        table.insert(
            RouteEntry::new(ShortAddress(i), next_hop, u32::from(i % 10) + 1),
            Duration::from_millis(u64::from(i)),
        );
    }
    println!("Inserted {} routes in {:?}", ROUTE_COUNT, start.elapsed());

    assert_eq!(table.len(), ROUTE_COUNT as usize);
    let found = (1..=ROUTE_COUNT)
        .filter(|i| table.next_hop(ShortAddress(*i)).is_some())
        .count();
    assert_eq!(found, ROUTE_COUNT as usize);

    // Everything installed in the first 5 seconds goes stale at t=305s + epsilon
    let pruned = table.prune_stale(Duration::from_millis(305_001));
    assert_eq!(pruned, 5_000);
    assert_eq!(table.len(), 5_000);
}

#[test]
fn test_shortest_path_on_large_grid() {
    const SIDE: u32 = 60;

    let neighbors = |n: u32| {
        let (x, y) = (n % SIDE, n / SIDE);
        let mut out = Vec::with_capacity(4);
        if y > 0 {
            out.push(n - SIDE);
        }
        if x > 0 {
            out.push(n - 1);
        }
        if x + 1 < SIDE {
            out.push(n + 1);
        }
        if y + 1 < SIDE {
            out.push(n + SIDE);
        }
        out
    };

    let start = Instant::now();
    let path = shortest_path(0, SIDE * SIDE - 1, neighbors).unwrap();
    println!("Grid {}x{} path found in {:?}", SIDE, SIDE, start.elapsed());

    // Manhattan distance plus the start node
    assert_eq!(path.len() as u32, 2 * (SIDE - 1) + 1);
    assert_eq!(path.first(), Some(&0));
    assert_eq!(path.last(), Some(&(SIDE * SIDE - 1)));
}

#[test]
fn test_lookup_with_many_neighbors() {
    let mut neighbors = NeighborTable::new();
    for addr in 1..=500u16 {
        neighbors.upsert(NeighborEntry {
            network_address: ShortAddress(addr),
            extended_address: ExtendedAddress(u64::from(addr)),
            device_type: DeviceType::Router,
            relationship: if addr == 1 {
                Relationship::Parent
            } else {
                Relationship::Sibling
            },
            depth: 2,
            link_quality: (addr % 256) as u8,
            permit_joining: true,
        });
    }

    let mut routes = RoutingTable::default();
    routes.insert(
        RouteEntry::new(ShortAddress(0x4000), ShortAddress(250), 4),
        Duration::ZERO,
    );

    assert_eq!(neighbors.len(), 500);
    assert_eq!(
        neighbors.parent().map(|p| p.network_address),
        Some(ShortAddress(1))
    );
    assert!(lookup(&neighbors, &routes, ShortAddress(499)).neighbor);
    assert_eq!(
        lookup(&neighbors, &routes, ShortAddress(0x4000)).next_hop,
        ShortAddress(250)
    );
    assert!(lookup(&neighbors, &routes, ShortAddress(0x5000)).is_unreachable());
}
