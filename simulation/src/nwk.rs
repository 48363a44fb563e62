//! In-process stand-in for the mesh network layer
//!
//! [`SimulatedNwk`] answers every [`NwkRequest`] with the confirms and
//! indications a real stack would raise, delayed by plausible scan, join and
//! forwarding times. Reachability comes from a [`RadioMap`]; every random
//! draw (PAN id, address allocation, loss, duplicates) uses one seeded
//! [`StdRng`], so a run is fully determined by its seed.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, trace, warn};

use zigmesh_core::{
    ChannelMask, DataIndication, DataParams, Delayed, DeviceId, DeviceType, DiscoveryParams,
    ExtendedAddress, ExtendedPanId, FormationParams, JoinParams, NetworkDescriptor, NetworkLayer,
    NwkConfirm, NwkNotification, NwkRequest, NwkStatus, PanId, RouteLookup, RouteStep,
    ShortAddress,
};
use zigmesh_routing::{
    NeighborEntry, NeighborTable, ROUTE_DISCOVERY_TIME, Relationship, RouteDiscoveryEntry,
    RouteDiscoveryTable, RouteEntry, RoutingTable, shortest_path,
};

use crate::config::{NwkConfig, secs};
use crate::registry::TopologyRegistry;
use crate::topology::RadioMap;

/// One base superframe: 960 symbols of 16 us
const BASE_SUPERFRAME: Duration = Duration::from_micros(15_360);
/// Association request, response and data poll
const JOIN_DELAY: Duration = Duration::from_millis(48);
const START_ROUTER_DELAY: Duration = Duration::from_millis(1);
/// Airtime of one byte at 250 kbit/s
const BYTE_AIRTIME: Duration = Duration::from_micros(32);
const MAX_SCAN_EXPONENT: u8 = 14;
const ADDRESS_ATTEMPTS: usize = 64;
const STACK_PROFILE: u8 = 2;

/// Time spent scanning `channels` channels at the given scan duration
pub fn scan_time(channels: usize, scan_duration: u8) -> Duration {
    let exponent = scan_duration.min(MAX_SCAN_EXPONENT);
    BASE_SUPERFRAME * ((1u32 << exponent) + 1) * channels as u32
}

/// Per-device network-layer state
#[derive(Debug, Clone)]
struct NwkDevice {
    extended: ExtendedAddress,
    short: Option<ShortAddress>,
    /// Coordinator, or a joined device that started as router
    router_started: bool,
    depth: u8,
    neighbors: NeighborTable,
    routes: RoutingTable,
    discoveries: RouteDiscoveryTable,
    /// Last route request id this device originated
    request_id: u8,
}

impl NwkDevice {
    fn is_joined(&self) -> bool {
        self.short.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct NetworkInfo {
    ext_pan_id: ExtendedPanId,
    pan_id: PanId,
    channel: u8,
}

/// Counters kept by the stand-in network layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct NwkStats {
    pub requests: u64,
    pub confirms: u64,
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub frames_duplicated: u64,
    pub frames_unroutable: u64,
    pub route_discoveries: u64,
    pub routes_installed: u64,
}

/// Seeded stand-in network layer
#[derive(Debug)]
pub struct SimulatedNwk {
    radio: RadioMap,
    devices: Vec<NwkDevice>,
    network: Option<NetworkInfo>,
    by_short: HashMap<ShortAddress, DeviceId>,
    per_hop_latency: Duration,
    loss_rate: f64,
    duplicate_rate: f64,
    rng: StdRng,
    stats: NwkStats,
}

impl SimulatedNwk {
    pub fn new(
        radio: RadioMap,
        extended: Vec<ExtendedAddress>,
        config: &NwkConfig,
        seed: u64,
    ) -> Self {
        let stale_timeout = secs(config.route_stale_timeout);
        let devices = extended
            .into_iter()
            .map(|extended| NwkDevice {
                extended,
                short: None,
                router_started: false,
                depth: 0,
                neighbors: NeighborTable::new(),
                routes: RoutingTable::new(stale_timeout),
                discoveries: RouteDiscoveryTable::new(),
                request_id: 0,
            })
            .collect();

        Self {
            radio,
            devices,
            network: None,
            by_short: HashMap::new(),
            per_hop_latency: secs(config.per_hop_latency),
            loss_rate: config.loss_rate,
            duplicate_rate: config.duplicate_rate,
            rng: StdRng::seed_from_u64(seed),
            stats: NwkStats::default(),
        }
    }

    /// Build the layer for every device of a registry
    pub fn from_registry(registry: &TopologyRegistry, config: &NwkConfig, seed: u64) -> Self {
        let radio = RadioMap::new(registry.positions(), config.radio_range);
        let extended = registry.devices().map(|device| device.extended).collect();
        Self::new(radio, extended, config, seed)
    }

    pub fn radio(&self) -> &RadioMap {
        &self.radio
    }

    pub fn stats(&self) -> &NwkStats {
        &self.stats
    }

    pub fn neighbor_table(&self, device: DeviceId) -> Option<&NeighborTable> {
        self.devices.get(device.index()).map(|d| &d.neighbors)
    }

    pub fn routing_table(&self, device: DeviceId) -> Option<&RoutingTable> {
        self.devices.get(device.index()).map(|d| &d.routes)
    }

    /// Tree depth of a joined device
    pub fn depth(&self, device: DeviceId) -> Option<u8> {
        self.devices
            .get(device.index())
            .filter(|d| d.is_joined())
            .map(|d| d.depth)
    }

    fn confirm(
        &mut self,
        device: DeviceId,
        after: Duration,
        confirm: NwkConfirm,
    ) -> Vec<Delayed<NwkNotification>> {
        self.stats.confirms += 1;
        vec![Delayed::new(
            after,
            NwkNotification::Confirm { device, confirm },
        )]
    }

    fn form(&mut self, device: DeviceId, params: FormationParams) -> Vec<Delayed<NwkNotification>> {
        let channels = params.channel_mask.channel_count();
        // Energy-detect scan followed by an active scan
        let delay = scan_time(channels, params.scan_duration) * 2;

        let channel = match params.channel_mask.lowest() {
            Some(channel) if self.network.is_none() => channel,
            _ => {
                warn!(device = %device, mask = %params.channel_mask, "Network formation rejected");
                return self.confirm(
                    device,
                    delay,
                    NwkConfirm::NetworkFormation {
                        status: NwkStatus::InvalidRequest,
                    },
                );
            }
        };

        let pan_id = PanId(self.rng.random_range(1..0xFFFF));
        let Some(state) = self.devices.get_mut(device.index()) else {
            return self.confirm(
                device,
                delay,
                NwkConfirm::NetworkFormation {
                    status: NwkStatus::InvalidParameter,
                },
            );
        };
        state.short = Some(ShortAddress::COORDINATOR);
        state.router_started = true;
        state.depth = 0;
        let ext_pan_id = ExtendedPanId::from(state.extended);

        self.by_short.insert(ShortAddress::COORDINATOR, device);
        self.network = Some(NetworkInfo {
            ext_pan_id,
            pan_id,
            channel,
        });
        debug!(
            device = %device,
            ext_pan_id = %ext_pan_id,
            pan_id = %pan_id,
            channel,
            "Network formed"
        );

        self.confirm(
            device,
            delay,
            NwkConfirm::NetworkFormation {
                status: NwkStatus::Success,
            },
        )
    }

    fn discover(
        &mut self,
        device: DeviceId,
        params: DiscoveryParams,
    ) -> Vec<Delayed<NwkNotification>> {
        let delay = scan_time(params.channel_mask.channel_count(), params.scan_duration);

        if params.channel_mask.is_empty() || device.index() >= self.devices.len() {
            return self.confirm(
                device,
                delay,
                NwkConfirm::NetworkDiscovery {
                    status: NwkStatus::InvalidParameter,
                    networks: Vec::new(),
                },
            );
        }

        let networks = self.visible_networks(device, params.channel_mask);
        let status = if networks.is_empty() {
            NwkStatus::NoNetworks
        } else {
            NwkStatus::Success
        };
        trace!(device = %device, found = networks.len(), "Discovery scan complete");

        self.confirm(device, delay, NwkConfirm::NetworkDiscovery { status, networks })
    }

    /// Networks advertised by formed neighbours on channels in `mask`
    fn visible_networks(&self, device: DeviceId, mask: ChannelMask) -> Vec<NetworkDescriptor> {
        let Some(network) = self.network else {
            return Vec::new();
        };
        if !mask.contains(network.channel) {
            return Vec::new();
        }

        let advertised = self
            .radio
            .neighbors(device)
            .any(|n| self.devices[n.index()].router_started);
        if !advertised {
            return Vec::new();
        }

        vec![NetworkDescriptor {
            ext_pan_id: network.ext_pan_id,
            logical_channel: network.channel,
            pan_id: network.pan_id,
            stack_profile: STACK_PROFILE,
            permit_joining: true,
        }]
    }

    /// Best parent for `device`: lowest depth, then best link, then lowest id
    fn choose_parent(&self, device: DeviceId) -> Option<DeviceId> {
        self.radio
            .neighbors(device)
            .filter(|n| self.devices[n.index()].router_started)
            .min_by_key(|n| {
                (
                    self.devices[n.index()].depth,
                    Reverse(self.radio.link_quality(device, *n)),
                    *n,
                )
            })
    }

    fn allocate_address(&mut self) -> Option<ShortAddress> {
        for _ in 0..ADDRESS_ATTEMPTS {
            let candidate = ShortAddress(self.rng.random_range(1..0xFFF8));
            if !self.by_short.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        (1..0xFFF8)
            .map(ShortAddress)
            .find(|candidate| !self.by_short.contains_key(candidate))
    }

    fn join(&mut self, device: DeviceId, params: JoinParams) -> Vec<Delayed<NwkNotification>> {
        let rejected = |status| NwkConfirm::Join {
            status,
            network_address: None,
            ext_pan_id: None,
        };

        let Some(network) = self.network.filter(|n| n.ext_pan_id == params.ext_pan_id) else {
            return self.confirm(device, JOIN_DELAY, rejected(NwkStatus::NotPermitted));
        };
        if device.index() >= self.devices.len() {
            return self.confirm(device, JOIN_DELAY, rejected(NwkStatus::InvalidParameter));
        }
        let Some(parent) = self.choose_parent(device) else {
            return self.confirm(device, JOIN_DELAY, rejected(NwkStatus::NotPermitted));
        };
        let Some(address) = self.allocate_address() else {
            return self.confirm(device, JOIN_DELAY, rejected(NwkStatus::NotPermitted));
        };

        // A rejoin gives up the old address
        if let Some(previous) = self.devices[device.index()].short.replace(address) {
            self.by_short.remove(&previous);
        }
        self.by_short.insert(address, device);
        self.devices[device.index()].depth = self.devices[parent.index()].depth.saturating_add(1);
        self.link_neighbors(device, parent);

        debug!(
            device = %device,
            address = %address,
            parent = %parent,
            depth = self.devices[device.index()].depth,
            "Association complete"
        );

        self.confirm(
            device,
            JOIN_DELAY,
            NwkConfirm::Join {
                status: NwkStatus::Success,
                network_address: Some(address),
                ext_pan_id: Some(network.ext_pan_id),
            },
        )
    }

    /// Enter a freshly joined device into the neighbour tables of every
    /// joined device in range, and those devices into its own
    fn link_neighbors(&mut self, device: DeviceId, parent: DeviceId) {
        let in_range: Vec<DeviceId> = self
            .radio
            .neighbors(device)
            .filter(|n| self.devices[n.index()].is_joined())
            .collect();

        for other in in_range {
            let (to_other, to_device) = if other == parent {
                (Relationship::Parent, Relationship::Child)
            } else {
                (Relationship::Sibling, Relationship::Sibling)
            };
            let lqi = self.radio.link_quality(device, other);

            let entry = self.neighbor_entry(other, to_other, lqi);
            if let Some(entry) = entry {
                self.devices[device.index()].neighbors.upsert(entry);
            }
            let entry = self.neighbor_entry(device, to_device, lqi);
            if let Some(entry) = entry {
                self.devices[other.index()].neighbors.upsert(entry);
            }
        }
    }

    fn neighbor_entry(
        &self,
        of: DeviceId,
        relationship: Relationship,
        link_quality: u8,
    ) -> Option<NeighborEntry> {
        let state = self.devices.get(of.index())?;
        Some(NeighborEntry {
            network_address: state.short?,
            extended_address: state.extended,
            device_type: DeviceType::Router,
            relationship,
            depth: state.depth,
            link_quality,
            permit_joining: state.router_started,
        })
    }

    fn start_router(&mut self, device: DeviceId) -> Vec<Delayed<NwkNotification>> {
        let status = match self.devices.get_mut(device.index()) {
            Some(state) if state.is_joined() => {
                state.router_started = true;
                NwkStatus::Success
            }
            _ => NwkStatus::InvalidRequest,
        };
        self.confirm(device, START_ROUTER_DELAY, NwkConfirm::StartRouter { status })
    }

    /// Shortest path over joined devices, both endpoints included
    fn joined_path(&self, from: DeviceId, to: DeviceId) -> Option<Vec<DeviceId>> {
        let joined = |id: DeviceId| {
            self.devices
                .get(id.index())
                .map(NwkDevice::is_joined)
                .unwrap_or(false)
        };
        if !joined(from) || !joined(to) {
            return None;
        }
        shortest_path(from, to, |n| {
            self.radio.neighbors(n).filter(|m| joined(*m)).collect::<Vec<_>>()
        })
        .ok()
    }

    /// Install forward and reverse routes along `path`, refreshing the ones
    /// that already exist
    fn install_path(&mut self, path: &[DeviceId], now: Duration) {
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return;
        };
        let (Some(source), Some(destination)) = (
            self.devices[first.index()].short,
            self.devices[last.index()].short,
        ) else {
            return;
        };

        let hops = path.len() - 1;
        for i in 0..path.len() {
            if i < hops {
                let next = self.devices[path[i + 1].index()].short;
                self.install_route(path[i], destination, next, (hops - i) as u32, now);
            }
            if i > 0 {
                let previous = self.devices[path[i - 1].index()].short;
                self.install_route(path[i], source, previous, i as u32, now);
            }
        }
    }

    /// Record the route request that found `path` in the discovery table of
    /// every device along it
    fn record_discovery(&mut self, path: &[DeviceId], now: Duration) {
        let Some(first) = path.first() else {
            return;
        };
        let originator = &mut self.devices[first.index()];
        let Some(source) = originator.short else {
            return;
        };
        originator.request_id = originator.request_id.wrapping_add(1);
        let request_id = originator.request_id;

        let hops = path.len() - 1;
        for (i, device) in path.iter().enumerate() {
            let sender = match i {
                0 => Some(source),
                _ => self.devices[path[i - 1].index()].short,
            };
            let Some(sender) = sender else {
                continue;
            };
            self.devices[device.index()]
                .discoveries
                .insert(RouteDiscoveryEntry {
                    request_id,
                    source,
                    sender,
                    forward_cost: u8::try_from(i).unwrap_or(u8::MAX),
                    residual_cost: u8::try_from(hops - i).unwrap_or(u8::MAX),
                    expires_at: now + ROUTE_DISCOVERY_TIME,
                });
        }
    }

    fn install_route(
        &mut self,
        device: DeviceId,
        destination: ShortAddress,
        next_hop: Option<ShortAddress>,
        hop_count: u32,
        now: Duration,
    ) {
        let Some(next_hop) = next_hop else {
            return;
        };
        let state = &mut self.devices[device.index()];
        if state.neighbors.contains(destination) {
            return;
        }
        let current = state.routes.get(destination).map(|entry| entry.next_hop);
        if current == Some(next_hop) && !state.routes.is_stale(destination, now) {
            state.routes.confirm(destination, now);
        } else {
            state
                .routes
                .insert(RouteEntry::new(destination, next_hop, hop_count), now);
            self.stats.routes_installed += 1;
            trace!(
                device = %device,
                destination = %destination,
                next_hop = %next_hop,
                hop_count,
                "Route installed"
            );
        }
    }

    fn discover_route(
        &mut self,
        device: DeviceId,
        destination: ShortAddress,
        now: Duration,
    ) -> Vec<Delayed<NwkNotification>> {
        self.stats.route_discoveries += 1;
        let target = self.by_short.get(&destination).copied();
        let path = target.and_then(|target| self.joined_path(device, target));

        match path {
            Some(path) => {
                let hops = (path.len() - 1) as u32;
                self.install_path(&path, now);
                self.record_discovery(&path, now);
                // Request out, reply back
                let delay = self.per_hop_latency * hops * 2;
                self.confirm(
                    device,
                    delay,
                    NwkConfirm::RouteDiscovery {
                        status: NwkStatus::Success,
                    },
                )
            }
            None => self.confirm(
                device,
                self.per_hop_latency,
                NwkConfirm::RouteDiscovery {
                    status: NwkStatus::RouteDiscoveryFailed,
                },
            ),
        }
    }

    fn transmit(
        &mut self,
        device: DeviceId,
        params: DataParams,
        now: Duration,
    ) -> Vec<Delayed<NwkNotification>> {
        let source = self.devices.get(device.index()).and_then(|d| d.short);
        let target = self.by_short.get(&params.destination).copied();
        let (Some(source), Some(target)) = (source, target) else {
            self.stats.frames_unroutable += 1;
            warn!(
                device = %device,
                destination = %params.destination,
                "Data request dropped: endpoint not in the network"
            );
            return Vec::new();
        };

        let Some(path) = self.joined_path(device, target) else {
            self.stats.frames_unroutable += 1;
            debug!(device = %device, destination = %params.destination, "No route for data");
            return Vec::new();
        };

        if params.discover_route {
            let installed = self.stats.routes_installed;
            self.install_path(&path, now);
            if self.stats.routes_installed > installed {
                self.record_discovery(&path, now);
            }
        }

        let hops = (path.len() - 1) as u32;
        let link_quality = match path.as_slice() {
            [.., previous, last] => self.radio.link_quality(*previous, *last),
            _ => u8::MAX,
        };

        if self.loss_rate > 0.0 && self.rng.random::<f64>() < self.loss_rate {
            self.stats.frames_lost += 1;
            debug!(device = %device, destination = %params.destination, "Frame lost");
            return Vec::new();
        }

        let airtime = BYTE_AIRTIME * params.payload.len() as u32;
        let delay = (self.per_hop_latency + airtime) * hops;
        let indication = NwkNotification::Indication {
            device: target,
            indication: DataIndication {
                source,
                destination: params.destination,
                payload: params.payload,
                link_quality,
            },
        };
        self.stats.frames_delivered += 1;

        let mut delivered = vec![Delayed::new(delay, indication.clone())];
        if self.duplicate_rate > 0.0 && self.rng.random::<f64>() < self.duplicate_rate {
            // Retransmission after a lost acknowledgement
            self.stats.frames_duplicated += 1;
            delivered.push(Delayed::new(delay + self.per_hop_latency, indication));
        }
        delivered
    }
}

impl RouteLookup for SimulatedNwk {
    fn find_route(&self, device: DeviceId, destination: ShortAddress) -> RouteStep {
        match self.devices.get(device.index()) {
            Some(state) => zigmesh_routing::lookup(&state.neighbors, &state.routes, destination),
            None => RouteStep::unreachable(),
        }
    }
}

impl NetworkLayer for SimulatedNwk {
    fn submit(&mut self, request: NwkRequest, now: Duration) -> Vec<Delayed<NwkNotification>> {
        self.stats.requests += 1;
        trace!(request = request.name(), device = %request.device(), "Request submitted");
        for state in &mut self.devices {
            state.discoveries.purge(now);
        }

        match request {
            NwkRequest::NetworkFormation { device, params } => self.form(device, params),
            NwkRequest::NetworkDiscovery { device, params } => self.discover(device, params),
            NwkRequest::Join { device, params } => self.join(device, params),
            NwkRequest::StartRouter { device } => self.start_router(device),
            NwkRequest::RouteDiscovery {
                device,
                destination,
            } => self.discover_route(device, destination, now),
            NwkRequest::Data { device, params } => self.transmit(device, params, now),
        }
    }

    fn network_address(&self, device: DeviceId) -> Option<ShortAddress> {
        self.devices.get(device.index()).and_then(|d| d.short)
    }

    fn table_dump(&self, device: DeviceId) -> Option<String> {
        let state = self.devices.get(device.index())?;
        let mut out = String::new();
        let address = state
            .short
            .map(|short| short.to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let _ = writeln!(out, "[{} | {}] Neighbor table", address, state.extended);
        let _ = write!(out, "{}", state.neighbors);
        let _ = writeln!(out, "[{} | {}] Routing table", address, state.extended);
        let _ = write!(out, "{}", state.routes);
        let _ = writeln!(out, "[{} | {}] Route discovery table", address, state.extended);
        let _ = write!(out, "{}", state.discoveries);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use zigmesh_core::{CapabilityInfo, Position};

    use crate::topology::LayoutBuilder;

    fn empty_data(device: DeviceId, destination: ShortAddress) -> NwkRequest {
        NwkRequest::Data {
            device,
            params: DataParams {
                destination,
                handle: 0,
                discover_route: true,
                payload: Bytes::new(),
            },
        }
    }

    fn layer(positions: Vec<Position>) -> SimulatedNwk {
        let extended = (0..positions.len())
            .map(|i| {
                if i == 0 {
                    ExtendedAddress::COORDINATOR
                } else {
                    ExtendedAddress::allocate(i as u32 - 1)
                }
            })
            .collect();
        SimulatedNwk::new(
            RadioMap::new(positions, 25.0),
            extended,
            &NwkConfig::default(),
            7,
        )
    }

    fn confirm_of(out: &[Delayed<NwkNotification>]) -> &NwkConfirm {
        match &out[0].item {
            NwkNotification::Confirm { confirm, .. } => confirm,
            other => panic!("expected a confirm, got {other:?}"),
        }
    }

    fn discovery() -> DiscoveryParams {
        DiscoveryParams {
            channel_mask: ChannelMask(0x0000_7800),
            scan_duration: 2,
        }
    }

    /// Form, then discover, join and start every other device in order
    fn bootstrap(nwk: &mut SimulatedNwk) {
        let now = Duration::ZERO;
        nwk.submit(
            NwkRequest::NetworkFormation {
                device: DeviceId(0),
                params: FormationParams::default(),
            },
            now,
        );
        for i in 1..nwk.devices.len() as u32 {
            let device = DeviceId(i);
            let out = nwk.submit(
                NwkRequest::NetworkDiscovery {
                    device,
                    params: discovery(),
                },
                now,
            );
            let NwkConfirm::NetworkDiscovery { networks, .. } = confirm_of(&out).clone() else {
                panic!("expected discovery confirm");
            };
            nwk.submit(
                NwkRequest::Join {
                    device,
                    params: JoinParams {
                        ext_pan_id: networks[0].ext_pan_id,
                        capability: CapabilityInfo::router(),
                    },
                },
                now,
            );
            nwk.submit(NwkRequest::StartRouter { device }, now);
        }
    }

    #[test]
    fn test_scan_time() {
        assert_eq!(scan_time(1, 0), Duration::from_micros(30_720));
        assert_eq!(scan_time(4, 2), Duration::from_micros(15_360 * 5 * 4));
    }

    #[test]
    fn test_formation_takes_coordinator_address() {
        let mut nwk = layer(LayoutBuilder::new(3).circle(10.0));
        let out = nwk.submit(
            NwkRequest::NetworkFormation {
                device: DeviceId(0),
                params: FormationParams::default(),
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::Success);
        assert_eq!(nwk.network_address(DeviceId(0)), Some(ShortAddress::COORDINATOR));
        assert_eq!(nwk.network.map(|n| n.channel), Some(11));

        // Only one network per run
        let out = nwk.submit(
            NwkRequest::NetworkFormation {
                device: DeviceId(1),
                params: FormationParams::default(),
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::InvalidRequest);
    }

    #[test]
    fn test_formation_rejects_empty_mask() {
        let mut nwk = layer(LayoutBuilder::new(2).circle(10.0));
        let params = FormationParams {
            channel_mask: ChannelMask(0),
            ..FormationParams::default()
        };
        let out = nwk.submit(
            NwkRequest::NetworkFormation {
                device: DeviceId(0),
                params,
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::InvalidRequest);
    }

    #[test]
    fn test_discovery_without_network() {
        let mut nwk = layer(LayoutBuilder::new(2).circle(10.0));
        let out = nwk.submit(
            NwkRequest::NetworkDiscovery {
                device: DeviceId(1),
                params: discovery(),
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::NoNetworks);
        assert_eq!(out[0].after, scan_time(4, 2));
    }

    #[test]
    fn test_join_out_of_range_is_not_permitted() {
        let mut nwk = layer(LayoutBuilder::new(3).line(20.0));
        nwk.submit(
            NwkRequest::NetworkFormation {
                device: DeviceId(0),
                params: FormationParams::default(),
            },
            Duration::ZERO,
        );
        let ext_pan_id = ExtendedPanId::from(ExtendedAddress::COORDINATOR);
        let out = nwk.submit(
            NwkRequest::Join {
                device: DeviceId(2),
                params: JoinParams {
                    ext_pan_id,
                    capability: CapabilityInfo::router(),
                },
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::NotPermitted);
        assert_eq!(nwk.network_address(DeviceId(2)), None);
    }

    #[test]
    fn test_bootstrap_assigns_unique_addresses() {
        let mut nwk = layer(LayoutBuilder::new(6).circle(10.0));
        bootstrap(&mut nwk);

        let mut addresses: Vec<_> = (0..6)
            .map(|i| nwk.network_address(DeviceId(i)).unwrap())
            .collect();
        assert!(addresses[1..].iter().all(|a| a.is_assignable()));
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 6);

        // Everything in range of the coordinator joins it directly
        assert!(
            (1..6).all(|i| nwk.depth(DeviceId(i)) == Some(1)),
            "all devices should be children of the coordinator"
        );
        let parent = nwk.neighbor_table(DeviceId(3)).unwrap().parent().unwrap();
        assert_eq!(parent.network_address, ShortAddress::COORDINATOR);
    }

    #[test]
    fn test_chain_routes_and_lookup() {
        let mut nwk = layer(LayoutBuilder::new(4).line(20.0));
        bootstrap(&mut nwk);
        assert_eq!(nwk.depth(DeviceId(3)), Some(3));

        let destination = nwk.network_address(DeviceId(3)).unwrap();
        let out = nwk.submit(empty_data(DeviceId(0), destination), Duration::from_secs(10));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item.device(), DeviceId(3));
        assert_eq!(out[0].after, Duration::from_millis(15));

        let first = nwk.find_route(DeviceId(0), destination);
        assert_eq!(first.next_hop, nwk.network_address(DeviceId(1)).unwrap());
        assert!(!first.neighbor);

        let last = nwk.find_route(DeviceId(2), destination);
        assert_eq!(last.next_hop, destination);
        assert!(last.neighbor);

        // Reverse route toward the source was installed as well
        let back = nwk.find_route(DeviceId(3), ShortAddress::COORDINATOR);
        assert_eq!(back.next_hop, nwk.network_address(DeviceId(2)).unwrap());

        assert!(nwk.find_route(DeviceId(0), ShortAddress(0x4242)).is_unreachable());
    }

    #[test]
    fn test_route_discovery_confirm() {
        let mut nwk = layer(LayoutBuilder::new(3).line(20.0));
        bootstrap(&mut nwk);
        let destination = nwk.network_address(DeviceId(2)).unwrap();

        let out = nwk.submit(
            NwkRequest::RouteDiscovery {
                device: DeviceId(0),
                destination,
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::Success);
        assert_eq!(out[0].after, Duration::from_millis(20));

        let out = nwk.submit(
            NwkRequest::RouteDiscovery {
                device: DeviceId(0),
                destination: ShortAddress(0x4242),
            },
            Duration::ZERO,
        );
        assert_eq!(confirm_of(&out).status(), NwkStatus::RouteDiscoveryFailed);
    }

    #[test]
    fn test_lossy_and_duplicating_links() {
        let config = NwkConfig {
            loss_rate: 1.0,
            ..NwkConfig::default()
        };
        let positions = LayoutBuilder::new(2).line(5.0);
        let extended = vec![ExtendedAddress::COORDINATOR, ExtendedAddress::allocate(0)];
        let radio = RadioMap::new(positions.clone(), 25.0);
        let mut nwk = SimulatedNwk::new(radio, extended.clone(), &config, 1);
        bootstrap(&mut nwk);
        let out = nwk.submit(empty_data(DeviceId(1), ShortAddress::COORDINATOR), Duration::ZERO);
        assert!(out.is_empty());
        assert_eq!(nwk.stats().frames_lost, 1);

        let config = NwkConfig {
            duplicate_rate: 1.0,
            ..NwkConfig::default()
        };
        let mut nwk = SimulatedNwk::new(RadioMap::new(positions, 25.0), extended, &config, 1);
        bootstrap(&mut nwk);
        let out = nwk.submit(empty_data(DeviceId(1), ShortAddress::COORDINATOR), Duration::ZERO);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].item, out[1].item);
        assert!(out[1].after > out[0].after);
    }

    #[test]
    fn test_table_dump() {
        let mut nwk = layer(LayoutBuilder::new(3).line(20.0));
        bootstrap(&mut nwk);
        let dump = nwk.table_dump(DeviceId(1)).unwrap();
        assert!(dump.contains("Neighbor table"));
        assert!(dump.contains("PARENT"));
        assert!(dump.contains("CHILD"));
        assert!(dump.contains("Route discovery table"));
        assert!(nwk.table_dump(DeviceId(9)).is_none());
    }

    #[test]
    fn test_route_discovery_table_records_path() {
        let mut nwk = layer(LayoutBuilder::new(4).line(20.0));
        bootstrap(&mut nwk);
        let destination = nwk.network_address(DeviceId(3)).unwrap();
        let relay = nwk.network_address(DeviceId(1)).unwrap();
        let now = Duration::from_secs(5);

        nwk.submit(
            NwkRequest::RouteDiscovery {
                device: DeviceId(0),
                destination,
            },
            now,
        );

        let entry = nwk.devices[2]
            .discoveries
            .get(1, ShortAddress::COORDINATOR)
            .copied()
            .unwrap();
        assert_eq!(entry.sender, relay);
        assert_eq!(entry.forward_cost, 2);
        assert_eq!(entry.residual_cost, 1);
        assert_eq!(entry.expires_at, now + ROUTE_DISCOVERY_TIME);
        assert_eq!(nwk.devices[3].discoveries.len(), 1);

        let dump = nwk.table_dump(DeviceId(2)).unwrap();
        let section = dump.split("Route discovery table").nth(1).unwrap();
        assert!(section.contains(&relay.to_string()));

        // Cached routes need no new request; the old one expires
        nwk.submit(empty_data(DeviceId(0), destination), now + ROUTE_DISCOVERY_TIME);
        assert!(nwk.devices.iter().all(|d| d.discoveries.is_empty()));
    }
}
