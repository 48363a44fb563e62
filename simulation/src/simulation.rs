//! Discrete-event simulation engine
//!
//! Ties the pieces of a run together on one virtual timeline:
//! - the orchestrator brings the mesh up through formation, discovery, join
//!   and router start
//! - the data exchange sends sequenced frames once the network is ready
//! - the QoS collector deduplicates and accounts inbound frames
//! - the route inspector and table dumps run after the first send
//! - constant-rate Wi-Fi flows feed the flow monitor
//!
//! Every handler runs to completion. Follow-up requests raised by a handler
//! are scheduled at the current time, behind anything already queued there.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use zigmesh_core::{
    DeviceId, DiscoveryParams, NetworkLayer, NwkConfirm, NwkNotification, NwkRequest,
    PacketError, Role,
};

use crate::config::{ConfigError, ScenarioConfig, secs};
use crate::dispatch::HandlerRegistry;
use crate::exchange::{DataExchange, SendOutcome};
use crate::flow::{
    FiveTuple, FlowId, FlowMonitor, OnOffApplication, UDP, access_point_address, station_address,
};
use crate::nwk::SimulatedNwk;
use crate::orchestrator::{BootstrapError, Orchestrator};
use crate::qos::{DeliveryOutcome, QosCollector};
use crate::registry::{RegistryError, TopologyRegistry};
use crate::report::SimulationReport;
use crate::scheduler::Scheduler;
use crate::topology::coexistence_layout;
use crate::trace::{RouteTrace, trace_route};

/// First ephemeral port handed to station sources
const STATION_PORT_BASE: u16 = 49153;
/// Floor of a periodic send; virtual time must advance between sends
const MIN_SEND_INTERVAL: Duration = Duration::from_nanos(1);
/// Keeps Wi-Fi loss draws independent of the mesh layer's
const WIFI_SEED_SALT: u64 = 0x5749_4649;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Topology has no coordinator")]
    MissingCoordinator,
}

/// Everything that can happen on the timeline
#[derive(Debug, Clone)]
pub enum Event {
    FormNetwork,
    DiscoverNetworks {
        device: DeviceId,
    },
    /// Submit a request to the network layer
    Request(NwkRequest),
    /// Deliver a confirm or indication raised by the network layer
    Notification(NwkNotification),
    PeriodicSend {
        source: DeviceId,
        destination: DeviceId,
        interval: Duration,
        /// Successful sends left; unbounded when `None`
        remaining: Option<u32>,
    },
    SendOnce {
        source: DeviceId,
        destination: DeviceId,
    },
    RouteDiscovery {
        device: DeviceId,
        destination: DeviceId,
    },
    TraceRoute {
        source: DeviceId,
        destination: DeviceId,
    },
    DumpTables {
        device: DeviceId,
    },
    WifiTx {
        app: usize,
    },
    WifiRx {
        flow: FlowId,
        bytes: u32,
        sent_at: Duration,
    },
}

/// Neighbour and routing tables of a device at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDump {
    pub at: Duration,
    pub device: DeviceId,
    pub text: String,
}

/// Engine counters
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub requests_submitted: u64,
    pub notifications_delivered: u64,
    pub notifications_unhandled: u64,
    pub packets_sent: u64,
    pub sends_skipped: u64,
    pub duplicates_dropped: u64,
    pub malformed_dropped: u64,
    pub trace_errors: u64,
    pub wifi_tx: u64,
    pub wifi_rx: u64,
    pub wifi_lost: u64,
}

pub struct Simulation<N: NetworkLayer = SimulatedNwk> {
    config: ScenarioConfig,
    scheduler: Scheduler<Event>,
    registry: TopologyRegistry,
    handlers: HandlerRegistry,
    orchestrator: Orchestrator,
    exchange: DataExchange,
    qos: QosCollector,
    nwk: N,
    monitor: FlowMonitor,
    wifi_apps: Vec<OnOffApplication>,
    wifi_rng: StdRng,
    traces: Vec<RouteTrace>,
    table_dumps: Vec<TableDump>,
    diagnostics_scheduled: bool,
    scenario_scheduled: bool,
    stats: SimStats,
}

impl Simulation<SimulatedNwk> {
    /// Build the coexistence topology described by `config` over the
    /// stand-in network layer
    pub fn new(config: ScenarioConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let layout = coexistence_layout(
            config.n_zigbee as usize,
            config.wifi.stations as usize,
            config.layout,
        );
        let registry = TopologyRegistry::from_positions(&layout.mesh)?;
        let nwk = SimulatedNwk::from_registry(&registry, &config.nwk, config.seed);
        Self::with_network(config, registry, nwk)
    }
}

impl<N: NetworkLayer> Simulation<N> {
    /// Build a simulation over any network layer
    pub fn with_network(
        config: ScenarioConfig,
        registry: TopologyRegistry,
        nwk: N,
    ) -> Result<Self, SimulationError> {
        let orchestrator = Orchestrator::for_registry(&registry, config.discovery_failure)
            .ok_or(SimulationError::MissingCoordinator)?;

        let mut handlers = HandlerRegistry::new();
        for device in registry.devices() {
            if device.role == Role::Coordinator {
                handlers.coordinator(device.id);
            } else {
                handlers.router(device.id);
            }
        }

        let exchange = DataExchange::from_config(&config.traffic)?;
        let wifi_apps = wifi_applications(&config);
        let wifi_rng = StdRng::seed_from_u64(config.seed ^ WIFI_SEED_SALT);

        Ok(Self {
            config,
            scheduler: Scheduler::new(),
            registry,
            handlers,
            orchestrator,
            exchange,
            qos: QosCollector::new(),
            nwk,
            monitor: FlowMonitor::new(),
            wifi_apps,
            wifi_rng,
            traces: Vec::new(),
            table_dumps: Vec::new(),
            diagnostics_scheduled: false,
            scenario_scheduled: false,
            stats: SimStats::default(),
        })
    }

    /// Schedule the control-plane sequence, the application traffic and the
    /// Wi-Fi sources described by the configuration
    pub fn schedule_scenario(&mut self) {
        if self.scenario_scheduled {
            return;
        }
        self.scenario_scheduled = true;

        self.scheduler
            .schedule_at(secs(self.config.form_at), Event::FormNetwork);

        let routers: Vec<DeviceId> = self
            .orchestrator
            .statuses()
            .map(|(device, _)| device)
            .collect();
        for device in routers {
            let at = self.config.discovery_time(device.0);
            self.scheduler
                .schedule_at(at, Event::DiscoverNetworks { device });
        }

        let start = secs(self.config.traffic.start);
        let interval = secs(self.config.traffic.interval);
        let source = DeviceId(self.config.traffic.source);
        let destination = DeviceId(self.config.destination());
        let budget = self.config.traffic.max_packets;
        self.schedule_periodic_send(start, source, destination, interval, budget);

        for (app, application) in self.wifi_apps.iter().enumerate() {
            if application.interval().is_some() {
                self.scheduler
                    .schedule_at(application.start, Event::WifiTx { app });
            }
        }
        debug!(pending = self.scheduler.len(), "Scenario scheduled");
    }

    pub fn schedule_periodic_send(
        &mut self,
        at: Duration,
        source: DeviceId,
        destination: DeviceId,
        interval: Duration,
        budget: Option<u32>,
    ) {
        self.scheduler.schedule_at(
            at,
            Event::PeriodicSend {
                source,
                destination,
                interval: interval.max(MIN_SEND_INTERVAL),
                remaining: budget,
            },
        );
    }

    pub fn schedule_send_once(&mut self, at: Duration, source: DeviceId, destination: DeviceId) {
        self.scheduler
            .schedule_at(at, Event::SendOnce { source, destination });
    }

    pub fn schedule_route_discovery(
        &mut self,
        at: Duration,
        device: DeviceId,
        destination: DeviceId,
    ) {
        self.scheduler.schedule_at(
            at,
            Event::RouteDiscovery {
                device,
                destination,
            },
        );
    }

    pub fn schedule_trace(&mut self, at: Duration, source: DeviceId, destination: DeviceId) {
        self.scheduler
            .schedule_at(at, Event::TraceRoute { source, destination });
    }

    /// Inject an arbitrary event
    pub fn schedule(&mut self, at: Duration, event: Event) {
        self.scheduler.schedule_at(at, event);
    }

    /// Process the next event; returns `false` when the queue is empty
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        let Some((now, event)) = self.scheduler.pop() else {
            return Ok(false);
        };
        trace!(time = ?now, ?event, "Event");
        self.handle(event, now)?;
        Ok(true)
    }

    /// Process every event up to and including `end`, then move the clock to `end`
    pub fn run_until(&mut self, end: Duration) -> Result<(), SimulationError> {
        while let Some(at) = self.scheduler.peek_time() {
            if at > end {
                break;
            }
            self.step()?;
        }
        self.scheduler.advance_to(end);
        Ok(())
    }

    /// Run the configured scenario to its stop time and report
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        self.schedule_scenario();
        let end = secs(self.config.simulation_time);
        self.run_until(end)?;
        info!(
            time = ?self.now(),
            events = self.scheduler.processed(),
            joined = self.orchestrator.joined_count(),
            required = self.orchestrator.required(),
            "Simulation complete"
        );
        Ok(self.report())
    }

    /// Final statistics at the current virtual time
    pub fn report(&self) -> SimulationReport {
        SimulationReport::collect(
            &self.monitor,
            self.config.wifi.port,
            &self.qos,
            &self.orchestrator,
            &self.registry,
            self.now(),
        )
        .with_events_processed(self.scheduler.processed())
    }

    fn handle(&mut self, event: Event, now: Duration) -> Result<(), SimulationError> {
        match event {
            Event::FormNetwork => {
                if let Some(request) = self.orchestrator.form_network(self.config.formation) {
                    self.submit(request, now);
                }
            }
            Event::DiscoverNetworks { device } => {
                let params = DiscoveryParams {
                    channel_mask: self.config.discovery_mask,
                    scan_duration: self.config.discovery_scan_duration,
                };
                if let Some(request) = self.orchestrator.discover_networks(device, params) {
                    self.submit(request, now);
                }
            }
            Event::Request(request) => self.submit(request, now),
            Event::Notification(notification) => self.on_notification(notification, now)?,
            Event::PeriodicSend {
                source,
                destination,
                interval,
                remaining,
            } => self.on_periodic_send(source, destination, interval, remaining, now)?,
            Event::SendOnce {
                source,
                destination,
            } => {
                self.send(source, destination, now)?;
            }
            Event::RouteDiscovery {
                device,
                destination,
            } => match self.registry.short_address(destination) {
                Some(address) => self.submit(
                    NwkRequest::RouteDiscovery {
                        device,
                        destination: address,
                    },
                    now,
                ),
                None => warn!(
                    device = %device,
                    destination = %destination,
                    "Route discovery skipped: destination unassigned"
                ),
            },
            Event::TraceRoute {
                source,
                destination,
            } => self.on_trace(source, destination, now),
            Event::DumpTables { device } => self.on_dump(device, now),
            Event::WifiTx { app } => self.on_wifi_tx(app, now),
            Event::WifiRx {
                flow,
                bytes,
                sent_at,
            } => {
                self.stats.wifi_rx += 1;
                self.monitor.record_rx(flow, bytes, sent_at, now);
            }
        }
        Ok(())
    }

    /// Hand a request to the network layer and schedule what it raises
    fn submit(&mut self, request: NwkRequest, now: Duration) {
        self.stats.requests_submitted += 1;
        debug!(request = request.name(), device = %request.device(), "Submitting request");
        for delayed in self.nwk.submit(request, now) {
            self.scheduler
                .schedule_in(delayed.after, Event::Notification(delayed.item));
        }
    }

    /// Queue a follow-up request behind everything already due now
    fn submit_now(&mut self, request: NwkRequest) {
        self.scheduler.schedule_in(Duration::ZERO, Event::Request(request));
    }

    fn on_notification(
        &mut self,
        notification: NwkNotification,
        now: Duration,
    ) -> Result<(), SimulationError> {
        let device = notification.device();
        let kind = notification.kind();
        if !self.handlers.accepts(device, kind) {
            self.stats.notifications_unhandled += 1;
            warn!(device = %device, ?kind, "No handler registered, notification dropped");
            return Ok(());
        }
        self.stats.notifications_delivered += 1;

        match notification {
            NwkNotification::Confirm { device, confirm } => match confirm {
                NwkConfirm::NetworkFormation { status } => {
                    self.orchestrator
                        .on_formation_confirm(&mut self.registry, status, now)?;
                }
                NwkConfirm::NetworkDiscovery { status, networks } => {
                    if let Some(request) =
                        self.orchestrator
                            .on_discovery_confirm(device, status, &networks)?
                    {
                        self.submit_now(request);
                    }
                }
                NwkConfirm::Join {
                    status,
                    network_address,
                    ..
                } => {
                    if let Some(request) = self.orchestrator.on_join_confirm(
                        &mut self.registry,
                        device,
                        status,
                        network_address,
                        now,
                    )? {
                        self.submit_now(request);
                    }
                }
                NwkConfirm::StartRouter { status } => {
                    self.orchestrator.on_start_router_confirm(device, status);
                }
                NwkConfirm::RouteDiscovery { status } => {
                    self.orchestrator.on_route_discovery_confirm(device, status);
                }
            },
            NwkNotification::Indication { device, indication } => {
                debug!(
                    device = %device,
                    source = %indication.source,
                    size = indication.payload.len(),
                    link_quality = indication.link_quality,
                    "NldeDataIndication"
                );
                let outcome = self.qos.on_data_indication(
                    device,
                    &indication.payload,
                    indication.link_quality,
                    now,
                );
                match outcome {
                    DeliveryOutcome::Duplicate { .. } => self.stats.duplicates_dropped += 1,
                    DeliveryOutcome::Malformed(_) => self.stats.malformed_dropped += 1,
                    DeliveryOutcome::Accepted { .. } | DeliveryOutcome::ClockAnomaly { .. } => {}
                }
            }
        }
        Ok(())
    }

    /// One send attempt; returns whether a frame went out
    fn send(
        &mut self,
        source: DeviceId,
        destination: DeviceId,
        now: Duration,
    ) -> Result<bool, SimulationError> {
        let ready = self.orchestrator.is_ready();
        let outcome =
            self.exchange
                .send(source, destination, &self.registry, ready, &mut self.qos, now)?;

        match outcome {
            SendOutcome::Sent { request, .. } => {
                self.stats.packets_sent += 1;
                self.submit_now(request);
                self.schedule_diagnostics(source, destination, now);
                Ok(true)
            }
            SendOutcome::NotReady | SendOutcome::DestinationUnassigned => {
                self.stats.sends_skipped += 1;
                Ok(false)
            }
        }
    }

    fn on_periodic_send(
        &mut self,
        source: DeviceId,
        destination: DeviceId,
        interval: Duration,
        remaining: Option<u32>,
        now: Duration,
    ) -> Result<(), SimulationError> {
        if remaining == Some(0) {
            return Ok(());
        }
        let sent = self.send(source, destination, now)?;
        let remaining = if sent {
            remaining.map(|left| left.saturating_sub(1))
        } else {
            remaining
        };

        if remaining == Some(0) {
            info!(source = %source, destination = %destination, "Packet budget exhausted");
            return Ok(());
        }
        if self.exchange.should_reschedule(self.orchestrator.is_ready()) {
            self.scheduler.schedule_in(
                interval.max(MIN_SEND_INTERVAL),
                Event::PeriodicSend {
                    source,
                    destination,
                    interval,
                    remaining,
                },
            );
        } else {
            debug!(source = %source, "Periodic send stopped: network not ready");
        }
        Ok(())
    }

    /// Trace and table dump relative to the first successful send
    fn schedule_diagnostics(&mut self, source: DeviceId, destination: DeviceId, now: Duration) {
        if self.diagnostics_scheduled {
            return;
        }
        self.diagnostics_scheduled = true;

        if let Some(delay) = self.config.diagnostics.trace_delay {
            self.scheduler
                .schedule_at(now + secs(delay), Event::TraceRoute { source, destination });
        }
        if let Some(delay) = self.config.diagnostics.dump_delay {
            self.scheduler
                .schedule_at(now + secs(delay), Event::DumpTables { device: source });
        }
    }

    fn on_trace(&mut self, source: DeviceId, destination: DeviceId, now: Duration) {
        let (Some(from), Some(to)) = (
            self.registry.short_address(source),
            self.registry.short_address(destination),
        ) else {
            self.stats.trace_errors += 1;
            warn!(
                source = %source,
                destination = %destination,
                "Trace skipped: endpoint has no address"
            );
            return;
        };

        match trace_route(&self.registry, &self.nwk, from, to) {
            Ok(mut trace) => {
                trace.at = Some(now);
                info!("\n{trace}");
                self.traces.push(trace);
            }
            Err(e) => {
                self.stats.trace_errors += 1;
                warn!(source = %source, destination = %destination, error = %e, "Trace failed");
            }
        }
    }

    fn on_dump(&mut self, device: DeviceId, now: Duration) {
        match self.nwk.table_dump(device) {
            Some(text) => {
                info!(device = %device, "\n{text}");
                self.table_dumps.push(TableDump {
                    at: now,
                    device,
                    text,
                });
            }
            None => debug!(device = %device, "Network layer has no tables to dump"),
        }
    }

    fn on_wifi_tx(&mut self, app: usize, now: Duration) {
        let Some(application) = self.wifi_apps.get(app).copied() else {
            return;
        };
        let Some(interval) = application.interval() else {
            return;
        };
        if !application.is_active(now) {
            return;
        }

        let flow = self.monitor.classify(application.tuple);
        self.monitor.record_tx(flow, application.packet_size, now);
        self.stats.wifi_tx += 1;

        let loss_rate = self.config.wifi.loss_rate;
        if loss_rate > 0.0 && self.wifi_rng.random::<f64>() < loss_rate {
            self.monitor.record_lost(flow);
            self.stats.wifi_lost += 1;
        } else {
            self.scheduler.schedule_in(
                secs(self.config.wifi.latency),
                Event::WifiRx {
                    flow,
                    bytes: application.packet_size,
                    sent_at: now,
                },
            );
        }

        if application.is_active(now + interval) {
            self.scheduler.schedule_in(interval, Event::WifiTx { app });
        }
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn registry(&self) -> &TopologyRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn exchange(&self) -> &DataExchange {
        &self.exchange
    }

    pub fn qos(&self) -> &QosCollector {
        &self.qos
    }

    pub fn network(&self) -> &N {
        &self.nwk
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn monitor(&self) -> &FlowMonitor {
        &self.monitor
    }

    pub fn traces(&self) -> &[RouteTrace] {
        &self.traces
    }

    pub fn table_dumps(&self) -> &[TableDump] {
        &self.table_dumps
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }
}

/// One constant-rate source per station, towards the access point's sink
fn wifi_applications(config: &ScenarioConfig) -> Vec<OnOffApplication> {
    (0..config.wifi.stations)
        .map(|i| OnOffApplication {
            tuple: FiveTuple {
                source: station_address(i),
                destination: access_point_address(),
                protocol: UDP,
                source_port: STATION_PORT_BASE.saturating_add(i as u16),
                destination_port: config.wifi.port,
            },
            packet_size: config.wifi.packet_size,
            data_rate_bps: config.wifi.data_rate_bps,
            start: secs(config.wifi.start),
            stop: secs(config.simulation_time),
        })
        .collect()
}
