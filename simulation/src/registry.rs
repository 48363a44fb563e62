//! Topology registry
//!
//! Identity, addressing and role of every mesh device, with constant-time
//! lookup by network address and by extended address.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use zigmesh_core::{DeviceId, ExtendedAddress, Position, Role, ShortAddress};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Network address {address} is already held by device {owner}")]
    AddressInUse {
        address: ShortAddress,
        owner: DeviceId,
    },

    #[error("Extended address {0} is already registered")]
    DuplicateExtended(ExtendedAddress),
}

/// A simulated mesh device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub extended: ExtendedAddress,
    /// Assigned on a successful join; `None` until then
    pub short: Option<ShortAddress>,
    pub role: Role,
    pub position: Position,
}

impl Device {
    pub fn is_joined(&self) -> bool {
        self.short.is_some() && self.role != Role::Unjoined
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologyRegistry {
    devices: Vec<Device>,
    by_short: HashMap<ShortAddress, DeviceId>,
    by_extended: HashMap<ExtendedAddress, DeviceId>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from device positions
    ///
    /// The first position belongs to the coordinator, which gets the
    /// well-known coordinator address; the rest are allocated sequentially.
    pub fn from_positions(positions: &[Position]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (i, position) in positions.iter().enumerate() {
            if i == 0 {
                registry.add_device(ExtendedAddress::COORDINATOR, Role::Coordinator, *position)?;
            } else {
                let extended = ExtendedAddress::allocate(i as u32 - 1);
                registry.add_device(extended, Role::Unjoined, *position)?;
            }
        }
        Ok(registry)
    }

    /// Register a device and return its id
    pub fn add_device(
        &mut self,
        extended: ExtendedAddress,
        role: Role,
        position: Position,
    ) -> Result<DeviceId, RegistryError> {
        if self.by_extended.contains_key(&extended) {
            return Err(RegistryError::DuplicateExtended(extended));
        }

        let id = DeviceId(self.devices.len() as u32);
        self.devices.push(Device {
            id,
            extended,
            short: None,
            role,
            position,
        });
        self.by_extended.insert(extended, id);
        Ok(id)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.index())
    }

    /// Device currently holding a network address
    pub fn by_short(&self, address: ShortAddress) -> Option<&Device> {
        self.by_short.get(&address).and_then(|id| self.get(*id))
    }

    pub fn by_extended(&self, address: ExtendedAddress) -> Option<&Device> {
        self.by_extended.get(&address).and_then(|id| self.get(*id))
    }

    /// Network address of a device, if it has one
    pub fn short_address(&self, id: DeviceId) -> Option<ShortAddress> {
        self.get(id).and_then(|device| device.short)
    }

    /// Record the network address handed to a device
    ///
    /// A rejoin replaces the previous address.
    pub fn assign_network_address(
        &mut self,
        id: DeviceId,
        address: ShortAddress,
    ) -> Result<(), RegistryError> {
        if let Some(owner) = self.by_short.get(&address) {
            if *owner != id {
                return Err(RegistryError::AddressInUse {
                    address,
                    owner: *owner,
                });
            }
        }

        let device = self
            .devices
            .get_mut(id.index())
            .ok_or(RegistryError::UnknownDevice(id))?;
        if let Some(previous) = device.short.replace(address) {
            self.by_short.remove(&previous);
        }
        self.by_short.insert(address, id);
        debug!(device = %id, address = %address, "Network address assigned");
        Ok(())
    }

    pub fn set_role(&mut self, id: DeviceId, role: Role) -> Result<(), RegistryError> {
        let device = self
            .devices
            .get_mut(id.index())
            .ok_or(RegistryError::UnknownDevice(id))?;
        device.role = role;
        Ok(())
    }

    /// The device that forms the network
    pub fn coordinator(&self) -> Option<&Device> {
        self.devices
            .iter()
            .find(|device| device.role == Role::Coordinator)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.devices.iter().map(|device| device.position).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(n: usize) -> TopologyRegistry {
        let positions: Vec<Position> = (0..n)
            .map(|i| Position::new(i as f64, 0.0, 0.0))
            .collect();
        TopologyRegistry::from_positions(&positions).unwrap()
    }

    #[test]
    fn test_from_positions_assigns_identities() {
        let registry = registry(3);
        assert_eq!(registry.len(), 3);

        let coordinator = registry.coordinator().unwrap();
        assert_eq!(coordinator.id, DeviceId(0));
        assert_eq!(coordinator.extended, ExtendedAddress::COORDINATOR);

        let second = registry.get(DeviceId(1)).unwrap();
        assert_eq!(second.extended.to_string(), "00:00:00:00:00:00:00:01");
        assert_eq!(second.role, Role::Unjoined);
        assert!(second.short.is_none());
        assert!(!second.is_joined());
    }

    #[test]
    fn test_lookup_by_short_address() {
        let mut registry = registry(3);
        registry
            .assign_network_address(DeviceId(2), ShortAddress(0x1234))
            .unwrap();

        assert_eq!(registry.by_short(ShortAddress(0x1234)).unwrap().id, DeviceId(2));
        assert!(registry.by_short(ShortAddress(0x9999)).is_none());
        assert_eq!(
            registry.by_extended(ExtendedAddress::COORDINATOR).unwrap().id,
            DeviceId(0)
        );
    }

    #[test]
    fn test_rejoin_replaces_address() {
        let mut registry = registry(2);
        registry
            .assign_network_address(DeviceId(1), ShortAddress(0x1111))
            .unwrap();
        registry
            .assign_network_address(DeviceId(1), ShortAddress(0x2222))
            .unwrap();

        assert!(registry.by_short(ShortAddress(0x1111)).is_none());
        assert_eq!(registry.short_address(DeviceId(1)), Some(ShortAddress(0x2222)));
    }

    #[test]
    fn test_address_conflicts_are_rejected() {
        let mut registry = registry(3);
        registry
            .assign_network_address(DeviceId(1), ShortAddress(0x1111))
            .unwrap();
        assert_eq!(
            registry.assign_network_address(DeviceId(2), ShortAddress(0x1111)),
            Err(RegistryError::AddressInUse {
                address: ShortAddress(0x1111),
                owner: DeviceId(1)
            })
        );
        assert_eq!(
            registry.assign_network_address(DeviceId(9), ShortAddress(0x3333)),
            Err(RegistryError::UnknownDevice(DeviceId(9)))
        );
    }

    #[test]
    fn test_duplicate_extended_rejected() {
        let mut registry = TopologyRegistry::new();
        registry
            .add_device(ExtendedAddress(7), Role::Unjoined, Position::default())
            .unwrap();
        assert!(registry
            .add_device(ExtendedAddress(7), Role::Unjoined, Position::default())
            .is_err());
    }
}
