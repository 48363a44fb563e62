//! Neighbour table
//!
//! Devices within radio range that are part of the mesh, keyed by network
//! address.

use std::collections::BTreeMap;
use std::fmt;

use zigmesh_core::{DeviceType, ExtendedAddress, ShortAddress};

/// Relationship of a neighbour to the owning device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Parent,
    Child,
    Sibling,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Parent => write!(f, "PARENT"),
            Relationship::Child => write!(f, "CHILD"),
            Relationship::Sibling => write!(f, "SIBLING"),
        }
    }
}

/// A neighbour table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub network_address: ShortAddress,
    pub extended_address: ExtendedAddress,
    pub device_type: DeviceType,
    pub relationship: Relationship,
    /// Tree depth of the neighbour (coordinator = 0)
    pub depth: u8,
    pub link_quality: u8,
    pub permit_joining: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    entries: BTreeMap<ShortAddress, NeighborEntry>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a neighbour, or update it in place
    ///
    /// An existing parent or child relationship is never downgraded to
    /// sibling.
    pub fn upsert(&mut self, mut entry: NeighborEntry) {
        if let Some(existing) = self.entries.get(&entry.network_address) {
            if entry.relationship == Relationship::Sibling {
                entry.relationship = existing.relationship;
            }
        }
        self.entries.insert(entry.network_address, entry);
    }

    pub fn get(&self, address: ShortAddress) -> Option<&NeighborEntry> {
        self.entries.get(&address)
    }

    pub fn contains(&self, address: ShortAddress) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn remove(&mut self, address: ShortAddress) -> Option<NeighborEntry> {
        self.entries.remove(&address)
    }

    /// The neighbour this device joined through, if any
    pub fn parent(&self) -> Option<&NeighborEntry> {
        self.entries
            .values()
            .find(|entry| entry.relationship == Relationship::Parent)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
        self.entries.values()
    }
}

impl fmt::Display for NeighborTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<26}{:<10}{:<12}{:<10}{:<6}{:<6}{:<5}",
            "Neighbor IEEE addr", "Nwk addr", "Device type", "Relation", "Depth", "LQI", "PJ"
        )?;
        for entry in self.entries.values() {
            let device_type = match entry.device_type {
                DeviceType::Router => "ROUTER",
                DeviceType::EndDevice => "END_DEV",
            };
            writeln!(
                f,
                "{:<26}{:<10}{:<12}{:<10}{:<6}{:<6}{:<5}",
                entry.extended_address.to_string(),
                entry.network_address.to_string(),
                device_type,
                entry.relationship.to_string(),
                entry.depth,
                entry.link_quality,
                if entry.permit_joining { "1" } else { "0" }
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: u16, relationship: Relationship) -> NeighborEntry {
        NeighborEntry {
            network_address: ShortAddress(addr),
            extended_address: ExtendedAddress(u64::from(addr) + 1),
            device_type: DeviceType::Router,
            relationship,
            depth: 1,
            link_quality: 180,
            permit_joining: true,
        }
    }

    #[test]
    fn test_upsert_keeps_parent_relationship() {
        let mut table = NeighborTable::new();
        table.upsert(entry(0x0000, Relationship::Parent));

        let mut refreshed = entry(0x0000, Relationship::Sibling);
        refreshed.link_quality = 90;
        table.upsert(refreshed);

        let parent = table.parent().unwrap();
        assert_eq!(parent.network_address, ShortAddress(0x0000));
        assert_eq!(parent.link_quality, 90);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_contains_and_remove() {
        let mut table = NeighborTable::new();
        table.upsert(entry(0x1234, Relationship::Child));
        assert!(table.contains(ShortAddress(0x1234)));
        assert!(table.remove(ShortAddress(0x1234)).is_some());
        assert!(table.is_empty());
        assert!(table.parent().is_none());
    }

    #[test]
    fn test_render_lists_entries() {
        let mut table = NeighborTable::new();
        table.upsert(entry(0x1234, Relationship::Child));
        let rendered = table.to_string();
        assert!(rendered.contains("12:34"));
        assert!(rendered.contains("CHILD"));
        assert!(rendered.contains("180"));
    }
}
