//! Network-layer request/confirm primitives
//!
//! These mirror the NLME/NLDE service primitives of a mesh network layer.
//! Requests are issued by scenario code; confirms and indications are raised
//! asynchronously by the network layer and routed back to the device that
//! issued the request.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{ChannelMask, DeviceId, ExtendedPanId, PanId, ShortAddress};

/// Status code carried by every confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NwkStatus {
    Success,
    InvalidParameter,
    InvalidRequest,
    NotPermitted,
    NoNetworks,
    RouteDiscoveryFailed,
    RouteError,
    StartupFailure,
}

impl NwkStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for NwkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotPermitted => "NOT_PERMITTED",
            Self::NoNetworks => "NO_NETWORKS",
            Self::RouteDiscoveryFailed => "ROUTE_DISCOVERY_FAILED",
            Self::RouteError => "ROUTE_ERROR",
            Self::StartupFailure => "STARTUP_FAILURE",
        };
        f.write_str(name)
    }
}

/// A network found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub ext_pan_id: ExtendedPanId,
    pub logical_channel: u8,
    pub pan_id: PanId,
    pub stack_profile: u8,
    pub permit_joining: bool,
}

impl fmt::Display for NetworkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExtPanID: {} CH: {} PanID: {} Stack profile: {}",
            self.ext_pan_id, self.logical_channel, self.pan_id, self.stack_profile
        )
    }
}

/// Parameters of a network formation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormationParams {
    pub channel_mask: ChannelMask,
    pub scan_duration: u8,
    pub beacon_order: u8,
    pub superframe_order: u8,
}

impl Default for FormationParams {
    fn default() -> Self {
        Self {
            channel_mask: ChannelMask::ALL_CHANNELS,
            scan_duration: 0,
            // 15/15 = non-beacon mode
            beacon_order: 15,
            superframe_order: 15,
        }
    }
}

/// Parameters of a network discovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryParams {
    pub channel_mask: ChannelMask,
    pub scan_duration: u8,
}

/// Device type requested in the join capability field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Router,
    EndDevice,
}

/// Capability information sent with an association join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub device_type: DeviceType,
    pub allocate_address: bool,
}

impl CapabilityInfo {
    /// Router-capable joiner asking the parent for a network address
    pub fn router() -> Self {
        Self {
            device_type: DeviceType::Router,
            allocate_address: true,
        }
    }
}

/// Parameters of a join (association) request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    pub ext_pan_id: ExtendedPanId,
    pub capability: CapabilityInfo,
}

/// Parameters of a data request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataParams {
    pub destination: ShortAddress,
    pub handle: u8,
    /// Let the network layer discover a route when none is cached
    pub discover_route: bool,
    pub payload: Bytes,
}

/// Requests issued against the network layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwkRequest {
    NetworkFormation {
        device: DeviceId,
        params: FormationParams,
    },
    NetworkDiscovery {
        device: DeviceId,
        params: DiscoveryParams,
    },
    Join {
        device: DeviceId,
        params: JoinParams,
    },
    StartRouter {
        device: DeviceId,
    },
    RouteDiscovery {
        device: DeviceId,
        destination: ShortAddress,
    },
    Data {
        device: DeviceId,
        params: DataParams,
    },
}

impl NwkRequest {
    /// The device issuing the request
    pub fn device(&self) -> DeviceId {
        match self {
            Self::NetworkFormation { device, .. }
            | Self::NetworkDiscovery { device, .. }
            | Self::Join { device, .. }
            | Self::StartRouter { device }
            | Self::RouteDiscovery { device, .. }
            | Self::Data { device, .. } => *device,
        }
    }

    /// Primitive name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::NetworkFormation { .. } => "NlmeNetworkFormationRequest",
            Self::NetworkDiscovery { .. } => "NlmeNetworkDiscoveryRequest",
            Self::Join { .. } => "NlmeJoinRequest",
            Self::StartRouter { .. } => "NlmeStartRouterRequest",
            Self::RouteDiscovery { .. } => "NlmeRouteDiscoveryRequest",
            Self::Data { .. } => "NldeDataRequest",
        }
    }
}

/// Confirms raised asynchronously in answer to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwkConfirm {
    NetworkFormation {
        status: NwkStatus,
    },
    NetworkDiscovery {
        status: NwkStatus,
        networks: Vec<NetworkDescriptor>,
    },
    Join {
        status: NwkStatus,
        network_address: Option<ShortAddress>,
        ext_pan_id: Option<ExtendedPanId>,
    },
    StartRouter {
        status: NwkStatus,
    },
    RouteDiscovery {
        status: NwkStatus,
    },
}

impl NwkConfirm {
    pub fn status(&self) -> NwkStatus {
        match self {
            Self::NetworkFormation { status }
            | Self::NetworkDiscovery { status, .. }
            | Self::Join { status, .. }
            | Self::StartRouter { status }
            | Self::RouteDiscovery { status } => *status,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::NetworkFormation { .. } => PrimitiveKind::NetworkFormation,
            Self::NetworkDiscovery { .. } => PrimitiveKind::NetworkDiscovery,
            Self::Join { .. } => PrimitiveKind::Join,
            Self::StartRouter { .. } => PrimitiveKind::StartRouter,
            Self::RouteDiscovery { .. } => PrimitiveKind::RouteDiscovery,
        }
    }
}

/// Inbound application data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIndication {
    pub source: ShortAddress,
    pub destination: ShortAddress,
    pub payload: Bytes,
    /// Link quality of the last hop; `u8` bounds it to 0..=255
    pub link_quality: u8,
}

/// Anything the network layer raises towards a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NwkNotification {
    Confirm {
        device: DeviceId,
        confirm: NwkConfirm,
    },
    Indication {
        device: DeviceId,
        indication: DataIndication,
    },
}

impl NwkNotification {
    pub fn device(&self) -> DeviceId {
        match self {
            Self::Confirm { device, .. } | Self::Indication { device, .. } => *device,
        }
    }

    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Confirm { confirm, .. } => confirm.kind(),
            Self::Indication { .. } => PrimitiveKind::DataIndication,
        }
    }
}

/// Notification kinds a device can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    NetworkFormation,
    NetworkDiscovery,
    Join,
    StartRouter,
    RouteDiscovery,
    DataIndication,
}
