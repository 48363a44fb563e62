//! Routing table for caching next hops
//!
//! The [`RoutingTable`] holds one entry per destination network address.
//! Entries are installed by route discovery and refreshed whenever a frame
//! is forwarded along them.
//!
//! Routes have a staleness timeout measured in virtual time - after this
//! period without a refresh the route should be rediscovered.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::debug;
use zigmesh_core::ShortAddress;

use crate::error::{RoutingError, RoutingResult};

/// Status of a routing table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Active,
    DiscoveryUnderway,
    Inactive,
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteStatus::Active => write!(f, "ACTIVE"),
            RouteStatus::DiscoveryUnderway => write!(f, "DISCOVERY_UNDERWAY"),
            RouteStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// A single route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: ShortAddress,
    pub next_hop: ShortAddress,
    /// Hops remaining from this device to the destination
    pub hop_count: u32,
    pub status: RouteStatus,
    /// Virtual time of the last install or refresh
    pub installed_at: Duration,
}

impl RouteEntry {
    pub fn new(destination: ShortAddress, next_hop: ShortAddress, hop_count: u32) -> Self {
        Self {
            destination,
            next_hop,
            hop_count,
            status: RouteStatus::Active,
            installed_at: Duration::ZERO,
        }
    }
}

/// Cached routing table of one device
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: BTreeMap<ShortAddress, RouteEntry>,
    /// Duration after which routes are considered stale
    stale_timeout: Duration,
}

impl RoutingTable {
    /// Create a new routing table with the given stale timeout
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            routes: BTreeMap::new(),
            stale_timeout,
        }
    }

    /// Insert or update the route to a destination at virtual time `now`
    pub fn insert(&mut self, mut entry: RouteEntry, now: Duration) {
        entry.installed_at = now;
        self.routes.insert(entry.destination, entry);
    }

    /// Get the route to a destination
    pub fn get(&self, destination: ShortAddress) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    /// Next hop toward an active destination
    pub fn next_hop(&self, destination: ShortAddress) -> Option<ShortAddress> {
        self.routes
            .get(&destination)
            .filter(|entry| entry.status == RouteStatus::Active)
            .map(|entry| entry.next_hop)
    }

    /// Remove the route to a destination
    pub fn remove(&mut self, destination: ShortAddress) -> Option<RouteEntry> {
        self.routes.remove(&destination)
    }

    /// Mark a route as being rediscovered
    pub fn begin_discovery(&mut self, destination: ShortAddress) -> RoutingResult<()> {
        let entry = self.routes.get_mut(&destination).ok_or_else(|| {
            RoutingError::InvalidRouteState(format!("no entry for {destination}"))
        })?;
        entry.status = RouteStatus::DiscoveryUnderway;
        Ok(())
    }

    /// Refresh a route after a frame was forwarded along it
    pub fn confirm(&mut self, destination: ShortAddress, now: Duration) {
        if let Some(entry) = self.routes.get_mut(&destination) {
            entry.installed_at = now;
            entry.status = RouteStatus::Active;
        }
    }

    /// Check if the route to a destination is stale
    ///
    /// A missing route counts as stale.
    pub fn is_stale(&self, destination: ShortAddress, now: Duration) -> bool {
        match self.routes.get(&destination) {
            None => true,
            Some(entry) => now.saturating_sub(entry.installed_at) > self.stale_timeout,
        }
    }

    /// Drop all stale routes, returning how many were removed
    pub fn prune_stale(&mut self, now: Duration) -> usize {
        let before = self.routes.len();
        let timeout = self.stale_timeout;
        self.routes
            .retain(|_, entry| now.saturating_sub(entry.installed_at) <= timeout);

        let pruned = before - self.routes.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.routes.len(), "Pruned stale routes");
        }
        pruned
    }

    /// Get the number of cached routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Clear all routes
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Entries in ascending destination order
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        // Default 5 minute stale timeout
        Self::new(Duration::from_secs(300))
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<14}{:<22}{:<14}{:<6}", "Destination", "Status", "Next hop", "Hops")?;
        for entry in self.routes.values() {
            writeln!(
                f,
                "{:<14}{:<22}{:<14}{:<6}",
                entry.destination.to_string(),
                entry.status.to_string(),
                entry.next_hop.to_string(),
                entry.hop_count
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: u16, next_hop: u16, hop_count: u32) -> RouteEntry {
        RouteEntry::new(ShortAddress(dest), ShortAddress(next_hop), hop_count)
    }

    #[test]
    fn test_insert_and_get() {
        let mut table = RoutingTable::default();
        table.insert(route(0x30, 0x20, 2), Duration::from_secs(1));

        let entry = table.get(ShortAddress(0x30)).unwrap();
        assert_eq!(entry.next_hop, ShortAddress(0x20));
        assert_eq!(entry.hop_count, 2);
        assert_eq!(entry.installed_at, Duration::from_secs(1));
        assert_eq!(table.next_hop(ShortAddress(0x30)), Some(ShortAddress(0x20)));
    }

    #[test]
    fn test_remove() {
        let mut table = RoutingTable::default();
        table.insert(route(0x30, 0x20, 2), Duration::ZERO);
        assert!(table.remove(ShortAddress(0x30)).is_some());
        assert!(table.get(ShortAddress(0x30)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_staleness() {
        let mut table = RoutingTable::new(Duration::from_secs(10));
        table.insert(route(0x30, 0x20, 2), Duration::from_secs(5));

        assert!(!table.is_stale(ShortAddress(0x30), Duration::from_secs(15)));
        assert!(table.is_stale(ShortAddress(0x30), Duration::from_secs(16)));
        assert!(table.is_stale(ShortAddress(0x99), Duration::ZERO));
    }

    #[test]
    fn test_prune_stale() {
        let mut table = RoutingTable::new(Duration::from_secs(10));
        table.insert(route(0x30, 0x20, 2), Duration::from_secs(0));
        table.insert(route(0x40, 0x20, 3), Duration::from_secs(20));

        assert_eq!(table.prune_stale(Duration::from_secs(25)), 1);
        assert!(table.get(ShortAddress(0x30)).is_none());
        assert!(table.get(ShortAddress(0x40)).is_some());
    }

    #[test]
    fn test_confirm_refreshes() {
        let mut table = RoutingTable::new(Duration::from_secs(10));
        table.insert(route(0x30, 0x20, 2), Duration::ZERO);
        table.confirm(ShortAddress(0x30), Duration::from_secs(8));
        assert!(!table.is_stale(ShortAddress(0x30), Duration::from_secs(15)));
    }

    #[test]
    fn test_discovery_underway_hides_next_hop() {
        let mut table = RoutingTable::default();
        table.insert(route(0x30, 0x20, 2), Duration::ZERO);
        table.begin_discovery(ShortAddress(0x30)).unwrap();
        assert_eq!(table.next_hop(ShortAddress(0x30)), None);

        table.confirm(ShortAddress(0x30), Duration::from_secs(1));
        assert_eq!(table.next_hop(ShortAddress(0x30)), Some(ShortAddress(0x20)));

        assert!(table.begin_discovery(ShortAddress(0x99)).is_err());
    }

    #[test]
    fn test_render_lists_entries() {
        let mut table = RoutingTable::default();
        table.insert(route(0x30, 0x20, 2), Duration::ZERO);
        let rendered = table.to_string();
        assert!(rendered.contains("00:30"));
        assert!(rendered.contains("ACTIVE"));
        assert!(rendered.contains("00:20"));
    }
}
