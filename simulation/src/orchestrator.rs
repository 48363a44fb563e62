//! Bootstrap orchestrator
//!
//! Drives the coordinator from cold start to a formed network, and every
//! other device through discovery, join and router start. Handlers never
//! touch the network layer directly: each returns the follow-up request, if
//! any, and the caller submits it at the current virtual time.
//!
//! ```text
//! router:      NotStarted -> Discovering -> Joining -> Joined (-> promoted)
//!                                 |            |
//!                                 +--> Failed <+
//! coordinator: NotStarted -> Forming -> Formed | Failed
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use derive_more::Display;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use zigmesh_core::{
    CapabilityInfo, DeviceId, DiscoveryParams, FormationParams, JoinParams, NetworkDescriptor,
    NwkRequest, NwkStatus, Role, ShortAddress,
};

use crate::config::DiscoveryFailurePolicy;
use crate::registry::{RegistryError, TopologyRegistry};

/// Conditions that stop a run
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Network formation failed with status {status}")]
    FormationFailed { status: NwkStatus },

    #[error("Network discovery failed on device {device} with status {status}")]
    DiscoveryFailed { device: DeviceId, status: NwkStatus },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Join progress of a non-coordinator device
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinState {
    NotStarted,
    Discovering,
    Joining,
    Joined,
    Failed,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    NotStarted,
    Forming,
    Formed,
    Failed,
}

/// Why a device ended up in [`JoinState::Failed`]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    #[display("discovery failed ({_0})")]
    Discovery(NwkStatus),
    #[display("join failed ({_0})")]
    Join(NwkStatus),
}

/// Observable bootstrap status of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub state: JoinState,
    /// Router start confirmed
    pub promoted: bool,
    pub failure: Option<FailureReason>,
    pub network_address: Option<ShortAddress>,
    pub joined_at: Option<Duration>,
}

impl DeviceStatus {
    fn new() -> Self {
        Self {
            state: JoinState::NotStarted,
            promoted: false,
            failure: None,
            network_address: None,
            joined_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    coordinator: DeviceId,
    coordinator_state: CoordinatorState,
    devices: BTreeMap<DeviceId, DeviceStatus>,
    /// Devices that must join before the network is ready
    required: usize,
    joined: usize,
    ready_at: Option<Duration>,
    failure_policy: DiscoveryFailurePolicy,
}

impl Orchestrator {
    pub fn new(
        coordinator: DeviceId,
        routers: impl IntoIterator<Item = DeviceId>,
        failure_policy: DiscoveryFailurePolicy,
    ) -> Self {
        let devices: BTreeMap<_, _> = routers
            .into_iter()
            .filter(|device| *device != coordinator)
            .map(|device| (device, DeviceStatus::new()))
            .collect();

        Self {
            coordinator,
            coordinator_state: CoordinatorState::NotStarted,
            required: devices.len(),
            devices,
            joined: 0,
            ready_at: None,
            failure_policy,
        }
    }

    /// Orchestrator for every device of a registry
    pub fn for_registry(
        registry: &TopologyRegistry,
        failure_policy: DiscoveryFailurePolicy,
    ) -> Option<Self> {
        let coordinator = registry.coordinator()?.id;
        Some(Self::new(
            coordinator,
            registry.devices().map(|device| device.id),
            failure_policy,
        ))
    }

    /// Formation request for the coordinator; issued at most once
    pub fn form_network(&mut self, params: FormationParams) -> Option<NwkRequest> {
        if self.coordinator_state != CoordinatorState::NotStarted {
            warn!(state = %self.coordinator_state, "Formation already requested");
            return None;
        }

        self.coordinator_state = CoordinatorState::Forming;
        info!(device = %self.coordinator, mask = %params.channel_mask, "Forming network");
        Some(NwkRequest::NetworkFormation {
            device: self.coordinator,
            params,
        })
    }

    /// Discovery request for `device`; issued at most once per device
    pub fn discover_networks(
        &mut self,
        device: DeviceId,
        params: DiscoveryParams,
    ) -> Option<NwkRequest> {
        let Some(status) = self.devices.get_mut(&device) else {
            warn!(device = %device, "Discovery requested for unknown device");
            return None;
        };
        if status.state != JoinState::NotStarted {
            warn!(device = %device, state = %status.state, "Discovery already started");
            return None;
        }

        status.state = JoinState::Discovering;
        debug!(device = %device, mask = %params.channel_mask, "Discovering networks");
        Some(NwkRequest::NetworkDiscovery { device, params })
    }

    pub fn on_formation_confirm(
        &mut self,
        registry: &mut TopologyRegistry,
        status: NwkStatus,
        now: Duration,
    ) -> Result<(), BootstrapError> {
        if self.coordinator_state != CoordinatorState::Forming {
            warn!(state = %self.coordinator_state, %status, "Unexpected formation confirm ignored");
            return Ok(());
        }

        info!(%status, "NlmeNetworkFormationConfirm");
        if !status.is_success() {
            self.coordinator_state = CoordinatorState::Failed;
            return Err(BootstrapError::FormationFailed { status });
        }

        self.coordinator_state = CoordinatorState::Formed;
        registry.assign_network_address(self.coordinator, ShortAddress::COORDINATOR)?;
        registry.set_role(self.coordinator, Role::Coordinator)?;

        // A lone coordinator is ready as soon as the network exists
        if self.required == 0 {
            self.mark_ready(now);
        }
        Ok(())
    }

    /// Handle a discovery confirm, returning the join request on success
    ///
    /// A successful confirm that lists no network counts as `NoNetworks`.
    pub fn on_discovery_confirm(
        &mut self,
        device: DeviceId,
        status: NwkStatus,
        networks: &[NetworkDescriptor],
    ) -> Result<Option<NwkRequest>, BootstrapError> {
        let policy = self.failure_policy;
        let Some(entry) = self.devices.get_mut(&device) else {
            warn!(device = %device, "Discovery confirm for unknown device ignored");
            return Ok(None);
        };
        if entry.state != JoinState::Discovering {
            warn!(device = %device, state = %entry.state, "Unexpected discovery confirm ignored");
            return Ok(None);
        }

        let chosen = match networks.first() {
            Some(network) if status.is_success() => network,
            _ => {
                let status = if status.is_success() {
                    NwkStatus::NoNetworks
                } else {
                    status
                };
                entry.state = JoinState::Failed;
                entry.failure = Some(FailureReason::Discovery(status));
                warn!(device = %device, %status, "Unable to discover networks");

                return match policy {
                    DiscoveryFailurePolicy::Abort => {
                        Err(BootstrapError::DiscoveryFailed { device, status })
                    }
                    DiscoveryFailurePolicy::Continue => Ok(None),
                };
            }
        };

        info!(device = %device, found = networks.len(), "Network discovery confirm received");
        for network in networks {
            debug!(device = %device, %network, "Network found");
        }

        entry.state = JoinState::Joining;
        Ok(Some(NwkRequest::Join {
            device,
            params: JoinParams {
                ext_pan_id: chosen.ext_pan_id,
                capability: CapabilityInfo::router(),
            },
        }))
    }

    /// Handle a join confirm, returning the router start request on success
    pub fn on_join_confirm(
        &mut self,
        registry: &mut TopologyRegistry,
        device: DeviceId,
        status: NwkStatus,
        network_address: Option<ShortAddress>,
        now: Duration,
    ) -> Result<Option<NwkRequest>, BootstrapError> {
        let Some(entry) = self.devices.get_mut(&device) else {
            warn!(device = %device, "Join confirm for unknown device ignored");
            return Ok(None);
        };
        if entry.state != JoinState::Joining {
            warn!(device = %device, state = %entry.state, "Unexpected join confirm ignored");
            return Ok(None);
        }

        let address = match network_address {
            Some(address) if status.is_success() => address,
            _ => {
                let status = if status.is_success() {
                    NwkStatus::StartupFailure
                } else {
                    status
                };
                entry.state = JoinState::Failed;
                entry.failure = Some(FailureReason::Join(status));
                warn!(device = %device, %status, "The device FAILED to join the network");
                return Ok(None);
            }
        };

        entry.state = JoinState::Joined;
        entry.network_address = Some(address);
        entry.joined_at = Some(now);
        registry.assign_network_address(device, address)?;
        registry.set_role(device, Role::Router)?;
        info!(
            device = %device,
            address = %address,
            time = ?now,
            "The device joined the network SUCCESSFULLY"
        );

        self.joined += 1;
        if self.joined >= self.required {
            self.mark_ready(now);
        }

        Ok(Some(NwkRequest::StartRouter { device }))
    }

    pub fn on_start_router_confirm(&mut self, device: DeviceId, status: NwkStatus) {
        match self.devices.get_mut(&device) {
            Some(entry) if entry.state == JoinState::Joined => {
                entry.promoted = status.is_success();
                if status.is_success() {
                    debug!(device = %device, "Router started");
                } else {
                    warn!(device = %device, %status, "Router start failed");
                }
            }
            _ => warn!(device = %device, %status, "Unexpected router start confirm ignored"),
        }
    }

    pub fn on_route_discovery_confirm(&self, device: DeviceId, status: NwkStatus) {
        info!(device = %device, %status, "NlmeRouteDiscoveryConfirm");
    }

    fn mark_ready(&mut self, now: Duration) {
        if self.ready_at.is_none() {
            self.ready_at = Some(now);
            info!(joined = self.joined, time = ?now, "Network ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_at.is_some()
    }

    /// Virtual time at which the network became ready
    pub fn ready_at(&self) -> Option<Duration> {
        self.ready_at
    }

    pub fn coordinator(&self) -> DeviceId {
        self.coordinator
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator_state
    }

    pub fn join_state(&self, device: DeviceId) -> Option<JoinState> {
        self.devices.get(&device).map(|status| status.state)
    }

    pub fn status(&self, device: DeviceId) -> Option<&DeviceStatus> {
        self.devices.get(&device)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (DeviceId, &DeviceStatus)> {
        self.devices.iter().map(|(id, status)| (*id, status))
    }

    pub fn joined_count(&self) -> usize {
        self.joined
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Devices that gave up, with the reason
    pub fn failed_devices(&self) -> Vec<(DeviceId, FailureReason)> {
        self.devices
            .iter()
            .filter_map(|(id, status)| status.failure.map(|reason| (*id, reason)))
            .collect()
    }
}
