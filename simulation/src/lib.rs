//! # zigmesh simulation
//!
//! Bootstrap orchestration for a Zigbee-style mesh sharing its band with
//! Wi-Fi traffic, on a discrete-event timeline.
//!
//! ## Overview
//!
//! One coordinator forms the network; every other device discovers it, joins
//! through the best visible parent and starts as a router. Once all routers
//! have joined the network is *ready* and application traffic begins:
//!
//! - **Sequenced frames**: a 16-byte header (source, sequence, origin time)
//!   followed by padding up to the configured size
//! - **QoS accounting**: per-destination delivery ratio, delay and link
//!   quality, with `(source, sequence)` deduplication
//! - **Route inspection**: hop-by-hop next-hop trace with loop detection
//! - **Coexistence load**: constant-rate UDP flows from Wi-Fi stations to
//!   an access point, tallied per five-tuple
//!
//! ## Architecture
//!
//! - **Config** (`config.rs`): scenario parameters, JSON load/save, validation
//! - **Scheduler** (`scheduler.rs`): virtual clock and ordered event queue
//! - **Registry** (`registry.rs`): device identities and address lookups
//! - **Topology** (`topology.rs`): device placement and the radio graph
//! - **Nwk** (`nwk.rs`): simulated network layer answering requests with
//!   delayed confirms and data indications
//! - **Dispatch** (`dispatch.rs`): which notifications each device handles
//! - **Orchestrator** (`orchestrator.rs`): the join state machine
//! - **Exchange / QoS / Trace**: application traffic and diagnostics
//! - **Flow / Report**: Wi-Fi flow monitor and end-of-run report
//! - **Simulation** (`simulation.rs`): the engine tying it all together
//! - **Scenarios** (`scenarios.rs`): ready-made runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use zigmesh_simulation::*;
//!
//! let config = ScenarioConfig {
//!     n_zigbee: 4,
//!     simulation_time: 20.0,
//!     ..Default::default()
//! };
//!
//! let mut sim = Simulation::new(config)?;
//! let report = sim.run()?;
//!
//! assert!(sim.orchestrator().is_ready());
//! println!("{report}");
//! ```

pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod flow;
pub mod nwk;
pub mod orchestrator;
pub mod qos;
pub mod registry;
pub mod report;
pub mod scenarios;
pub mod scheduler;
pub mod simulation;
pub mod topology;
pub mod trace;

// Re-export main types
pub use config::{
    ConfigError, DiagnosticsConfig, DiscoveryFailurePolicy, LayoutKind, NwkConfig,
    ReschedulePolicy, ScenarioConfig, TrafficConfig, WifiConfig,
};
pub use dispatch::HandlerRegistry;
pub use exchange::{DataExchange, SendOutcome, SentPacket};
pub use flow::{FiveTuple, FlowId, FlowMonitor, FlowStats, OnOffApplication};
pub use nwk::{NwkStats, SimulatedNwk};
pub use orchestrator::{
    BootstrapError, CoordinatorState, DeviceStatus, FailureReason, JoinState, Orchestrator,
};
pub use qos::{DeliveryCounters, DeliveryOutcome, QosAccumulator, QosCollector};
pub use registry::{Device, RegistryError, TopologyRegistry};
pub use report::{FlowReport, QosReport, SimulationReport};
pub use scheduler::Scheduler;
pub use simulation::{Event, SimStats, Simulation, SimulationError, TableDump};
pub use topology::{Layout, LayoutBuilder, RadioMap};
pub use trace::{RouteTrace, TraceError, TraceHop, TraceOutcome, trace_route};

pub use zigmesh_core::{DeviceId, ExtendedAddress, Position, ShortAddress};
