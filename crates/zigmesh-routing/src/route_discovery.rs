//! Route discovery table
//!
//! One entry per route request a device originated or relayed, keyed by
//! `(request id, originator)`. Entries carry the path cost so far and the
//! residual cost to the target, and are dropped once their expiry passes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::trace;
use zigmesh_core::ShortAddress;

/// Lifetime of a route discovery entry
pub const ROUTE_DISCOVERY_TIME: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDiscoveryEntry {
    pub request_id: u8,
    /// Device that originated the request
    pub source: ShortAddress,
    /// Previous hop the request arrived from
    pub sender: ShortAddress,
    pub forward_cost: u8,
    pub residual_cost: u8,
    pub expires_at: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RouteDiscoveryTable {
    entries: BTreeMap<(u8, ShortAddress), RouteDiscoveryEntry>,
}

impl RouteDiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request; a repeat of the same request replaces the entry
    pub fn insert(&mut self, entry: RouteDiscoveryEntry) {
        trace!(
            request_id = entry.request_id,
            source = %entry.source,
            sender = %entry.sender,
            "Route discovery entry recorded"
        );
        self.entries.insert((entry.request_id, entry.source), entry);
    }

    pub fn get(&self, request_id: u8, source: ShortAddress) -> Option<&RouteDiscoveryEntry> {
        self.entries.get(&(request_id, source))
    }

    /// Drop entries whose expiry is at or before `now`; returns how many
    pub fn purge(&mut self, now: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteDiscoveryEntry> {
        self.entries.values()
    }
}

impl fmt::Display for RouteDiscoveryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12}{:<16}{:<16}{:<14}{:<15}{}",
            "Request id", "Source", "Sender", "Forward cost", "Residual cost", "Expires"
        )?;
        for entry in self.entries.values() {
            writeln!(
                f,
                "{:<12}{:<16}{:<16}{:<14}{:<15}{:.3}s",
                entry.request_id,
                entry.source.to_string(),
                entry.sender.to_string(),
                entry.forward_cost,
                entry.residual_cost,
                entry.expires_at.as_secs_f64()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(request_id: u8, source: u16, expires_secs: u64) -> RouteDiscoveryEntry {
        RouteDiscoveryEntry {
            request_id,
            source: ShortAddress(source),
            sender: ShortAddress(source),
            forward_cost: 1,
            residual_cost: 2,
            expires_at: Duration::from_secs(expires_secs),
        }
    }

    #[test]
    fn test_repeat_request_replaces_entry() {
        let mut table = RouteDiscoveryTable::new();
        table.insert(entry(1, 0x10, 5));
        table.insert(entry(1, 0x10, 9));
        table.insert(entry(1, 0x20, 5));

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(1, ShortAddress(0x10)).unwrap().expires_at,
            Duration::from_secs(9)
        );
    }

    #[test]
    fn test_purge_drops_expired() {
        let mut table = RouteDiscoveryTable::new();
        table.insert(entry(1, 0x10, 5));
        table.insert(entry(2, 0x10, 15));

        assert_eq!(table.purge(Duration::from_secs(5)), 1);
        assert!(table.get(1, ShortAddress(0x10)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_display_lists_entries() {
        let mut table = RouteDiscoveryTable::new();
        table.insert(entry(7, 0x10, 18));
        let rendered = table.to_string();
        assert!(rendered.starts_with("Request id"));
        assert!(rendered.contains("18.000s"));
        assert_eq!(rendered.lines().count(), 2);
    }
}
