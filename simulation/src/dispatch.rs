//! Handler registry
//!
//! Maps each device to the notification kinds it handles. The simulation
//! consults the registry before routing a confirm or indication to the
//! orchestrator or the QoS collector; anything a device never subscribed to
//! is logged and dropped.

use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use zigmesh_core::{DeviceId, PrimitiveKind};

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    subscriptions: HashMap<DeviceId, BTreeSet<PrimitiveKind>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator: formation, route discovery and inbound data
    pub fn coordinator(&mut self, device: DeviceId) {
        self.subscribe(
            device,
            [
                PrimitiveKind::NetworkFormation,
                PrimitiveKind::RouteDiscovery,
                PrimitiveKind::DataIndication,
            ],
        );
    }

    /// Router candidate: discovery, join, router start, route discovery and inbound data
    pub fn router(&mut self, device: DeviceId) {
        self.subscribe(
            device,
            [
                PrimitiveKind::NetworkDiscovery,
                PrimitiveKind::Join,
                PrimitiveKind::StartRouter,
                PrimitiveKind::RouteDiscovery,
                PrimitiveKind::DataIndication,
            ],
        );
    }

    pub fn subscribe(&mut self, device: DeviceId, kinds: impl IntoIterator<Item = PrimitiveKind>) {
        let entry = self.subscriptions.entry(device).or_default();
        for kind in kinds {
            if entry.insert(kind) {
                trace!(device = %device, ?kind, "Handler registered");
            }
        }
    }

    pub fn unsubscribe(&mut self, device: DeviceId, kind: PrimitiveKind) -> bool {
        self.subscriptions
            .get_mut(&device)
            .map(|kinds| kinds.remove(&kind))
            .unwrap_or(false)
    }

    /// Whether `device` handles notifications of `kind`
    pub fn accepts(&self, device: DeviceId, kind: PrimitiveKind) -> bool {
        self.subscriptions
            .get(&device)
            .map(|kinds| kinds.contains(&kind))
            .unwrap_or(false)
    }

    pub fn kinds(&self, device: DeviceId) -> impl Iterator<Item = PrimitiveKind> + '_ {
        self.subscriptions
            .get(&device)
            .into_iter()
            .flat_map(|kinds| kinds.iter().copied())
    }

    pub fn device_count(&self) -> usize {
        self.subscriptions.len()
    }
}
