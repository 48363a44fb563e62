//! End-to-end bootstrap and delivery scenarios
//!
//! Each test drives a full run on the simulated network layer and checks
//! what the orchestrator, the QoS collector and the route inspector saw.

use std::time::Duration;

use bytes::Bytes;
use zigmesh_core::{
    DataIndication, NwkNotification, RouteLookup, RouteStep, SequencedPacket, ShortAddress,
};
use zigmesh_logging::init_testing;
use zigmesh_simulation::config::secs;
use zigmesh_simulation::scenarios::chain_config;
use zigmesh_simulation::{
    BootstrapError, DeliveryOutcome, DeviceId, DiscoveryFailurePolicy, Event, JoinState,
    LayoutKind, QosAccumulator, QosCollector, ScenarioConfig, Simulation, SimulationError,
    TraceError, TraceOutcome, trace_route,
};

/// Default topology without Wi-Fi load
fn mesh_only() -> ScenarioConfig {
    init_testing();
    let mut config = ScenarioConfig::default();
    config.wifi.data_rate_bps = 0;
    config
}

fn frame(source: u32, sequence: u32, origin: Duration) -> Bytes {
    SequencedPacket::new(DeviceId(source), sequence, origin)
        .encode(32, 0)
        .unwrap()
}

#[test]
fn test_staggered_joins_reach_ready_once() {
    let mut config = mesh_only();
    // Routers 1..=4 discover at 3, 4, 5 and 6 seconds
    config.discover_base = 2.0;
    config.discover_step = 1.0;
    config.simulation_time = 10.0;

    let mut sim = Simulation::new(config).unwrap();
    sim.schedule_scenario();

    let mut transitions = 0;
    let mut was_ready = false;
    while sim.step().unwrap() {
        let ready = sim.orchestrator().is_ready();
        assert!(!(was_ready && !ready), "readiness reverted");
        if ready && !was_ready {
            transitions += 1;
        }
        was_ready = ready;
        if sim.now() > secs(10.0) {
            break;
        }
    }

    assert_eq!(transitions, 1);
    for device in 1..=4 {
        assert_eq!(
            sim.orchestrator().join_state(DeviceId(device)),
            Some(JoinState::Joined),
            "device {device} not joined"
        );
    }
    let ready_at = sim.orchestrator().ready_at().unwrap();
    assert!(ready_at > secs(6.0) && ready_at <= secs(10.0));
}

#[test]
fn test_bounded_periodic_send() {
    let mut config = mesh_only();
    config.traffic.destination = Some(1);
    config.traffic.interval = 0.5;
    config.traffic.max_packets = Some(10);
    config.simulation_time = 30.0;

    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();

    let accumulator = sim.qos().accumulator(DeviceId(1)).unwrap();
    assert_eq!(accumulator.sent, 10);

    let sequences: Vec<u32> = sim.exchange().sent().iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());

    // Every send happened after readiness, half a second apart
    let ready_at = sim.orchestrator().ready_at().unwrap();
    let times: Vec<Duration> = sim.exchange().sent().iter().map(|p| p.at).collect();
    assert!(times[0] >= ready_at);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(500));
    }
}

#[test]
fn test_duplicate_delivery_counted_once() {
    let mut collector = QosCollector::new();
    let destination = DeviceId(2);
    let payload = frame(1, 5, secs(8.0));

    collector.record_sent(destination);
    let first = collector.on_data_indication(destination, &payload, 200, secs(8.1));
    let second = collector.on_data_indication(destination, &payload, 200, secs(8.2));

    assert!(first.is_accepted());
    assert_eq!(
        second,
        DeliveryOutcome::Duplicate {
            source: DeviceId(1),
            sequence: 5
        }
    );
    assert_eq!(collector.accumulator(destination).unwrap().received, 1);
    assert_eq!(collector.counters().duplicates, 1);
}

#[test]
fn test_duplicate_indications_through_the_engine() {
    let mut config = mesh_only();
    config.simulation_time = 15.0;
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();

    let destination = DeviceId(2);
    let indication = DataIndication {
        source: sim.registry().short_address(DeviceId(1)).unwrap(),
        destination: sim.registry().short_address(destination).unwrap(),
        payload: frame(1, 5, secs(15.0)),
        link_quality: 180,
    };
    for _ in 0..2 {
        sim.schedule(
            secs(15.5),
            Event::Notification(NwkNotification::Indication {
                device: destination,
                indication: indication.clone(),
            }),
        );
    }
    sim.run_until(secs(16.0)).unwrap();

    let accumulator = sim.qos().accumulator(destination).unwrap();
    assert_eq!(accumulator.received, 1);
    assert!(sim.qos().has_seen(destination, DeviceId(1), 5));
}

#[test]
fn test_short_payload_is_dropped() {
    let mut collector = QosCollector::new();
    let destination = DeviceId(3);
    collector.record_sent(destination);
    let before = collector.accumulator(destination).unwrap().clone();

    let outcome = collector.on_data_indication(destination, &[0u8; 10], 255, secs(9.0));

    assert!(matches!(outcome, DeliveryOutcome::Malformed(_)));
    assert_eq!(collector.accumulator(destination).unwrap(), &before);
    assert_eq!(collector.counters().malformed, 1);
}

#[test]
fn test_chain_trace_visits_every_hop() {
    init_testing();
    let mut sim = Simulation::new(chain_config(4)).unwrap();
    sim.run().unwrap();
    assert!(sim.orchestrator().is_ready());

    let source = sim.registry().short_address(DeviceId(0)).unwrap();
    let destination = sim.registry().short_address(DeviceId(3)).unwrap();
    let trace = trace_route(sim.registry(), sim.network(), source, destination).unwrap();

    assert_eq!(trace.outcome, TraceOutcome::Reached);
    let path = trace.path();
    assert_eq!(path, vec![DeviceId(0), DeviceId(1), DeviceId(2), DeviceId(3)]);
    assert_eq!(path.last().copied(), trace.destination_device);

    // The diagnostic trace scheduled after the first send agrees
    assert_eq!(sim.traces()[0].path(), path);
}

#[test]
fn test_sequence_numbers_increase_across_destinations() {
    let mut config = mesh_only();
    config.traffic.max_packets = Some(3);
    config.simulation_time = 20.0;
    let mut sim = Simulation::new(config).unwrap();
    for (i, destination) in [1, 2, 3, 1, 4].into_iter().enumerate() {
        sim.schedule_send_once(
            secs(12.0 + i as f64 * 0.25),
            DeviceId(0),
            DeviceId(destination),
        );
    }
    sim.run().unwrap();

    let sent = sim.exchange().sent();
    assert_eq!(sent.len(), 8);
    for pair in sent.windows(2) {
        assert!(pair[1].sequence > pair[0].sequence);
    }
}

#[test]
fn test_pdr_without_sends_is_zero() {
    let accumulator = QosAccumulator::default();
    assert_eq!(accumulator.pdr(), 0.0);
    assert_eq!(accumulator.average_delay(), Duration::ZERO);

    let mut config = mesh_only();
    config.nwk.loss_rate = 0.4;
    config.nwk.duplicate_rate = 0.3;
    config.simulation_time = 40.0;
    let report = Simulation::new(config).unwrap().run().unwrap();
    for row in &report.qos {
        assert!((0.0..=1.0).contains(&row.pdr), "pdr {} out of bounds", row.pdr);
        assert!(row.received <= row.sent);
    }
}

/// The coordinator forwards to one router, every other device back to it
struct Looping(ShortAddress);

impl RouteLookup for Looping {
    fn find_route(&self, device: DeviceId, _destination: ShortAddress) -> RouteStep {
        let next_hop = if device == DeviceId(0) {
            self.0
        } else {
            ShortAddress::COORDINATOR
        };
        RouteStep {
            next_hop,
            neighbor: true,
        }
    }
}

#[test]
fn test_trace_reports_routing_loop() {
    init_testing();
    let mut sim = Simulation::new(chain_config(4)).unwrap();
    sim.schedule_scenario();
    sim.run_until(secs(10.0)).unwrap();
    assert!(sim.orchestrator().is_ready());
    let registry = sim.registry();
    let router = registry.short_address(DeviceId(1)).unwrap();
    let destination = registry.short_address(DeviceId(3)).unwrap();

    let result = trace_route(
        registry,
        &Looping(router),
        ShortAddress::COORDINATOR,
        destination,
    );
    assert_eq!(
        result.unwrap_err(),
        TraceError::RoutingLoop {
            hops: registry.len(),
            limit: registry.len()
        }
    );
}

#[test]
fn test_unreachable_device_aborts_run() {
    let mut config = mesh_only();
    config.n_zigbee = 3;
    config.layout = LayoutKind::Line { spacing: 100.0 };
    config.discovery_failure = DiscoveryFailurePolicy::Abort;

    let result = Simulation::new(config).unwrap().run();
    assert!(matches!(
        result,
        Err(SimulationError::Bootstrap(BootstrapError::DiscoveryFailed {
            device: DeviceId(1),
            ..
        }))
    ));
}

#[test]
fn test_unreachable_device_is_reported_when_continuing() {
    let mut config = mesh_only();
    config.n_zigbee = 3;
    config.layout = LayoutKind::Line { spacing: 100.0 };

    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();

    assert!(!sim.orchestrator().is_ready());
    assert_eq!(report.unjoined.len(), 2);
    assert_eq!(sim.exchange().sent().len(), 0);
}

#[test]
fn test_config_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.json");

    let mut config = chain_config(6);
    config.seed = 42;
    config.save(&path).unwrap();

    let loaded = ScenarioConfig::load(&path).unwrap();
    assert_eq!(loaded.n_zigbee, 6);
    assert_eq!(loaded.seed, 42);
    assert_eq!(loaded.layout, LayoutKind::Line { spacing: 20.0 });
    assert_eq!(loaded.destination(), 5);
}
