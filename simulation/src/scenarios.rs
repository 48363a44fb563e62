//! Pre-defined scenarios
//!
//! - Coexistence: a coordinator and routers on a circle around a Wi-Fi
//!   access point, two stations loading the channel
//! - Chain: routers on a line where only adjacent devices hear each other,
//!   so every frame crosses the whole chain

use std::time::{Duration, Instant};

use tracing::info;

use crate::config::{LayoutKind, ScenarioConfig};
use crate::report::SimulationReport;
use crate::simulation::{Simulation, SimulationError};
use crate::topology::{Layout, coexistence_layout};

/// A finished run
pub struct ScenarioRun {
    pub simulation: Simulation,
    pub report: SimulationReport,
    /// Wall-clock time spent in the event loop
    pub elapsed: Duration,
}

/// Log the configuration the way a run records it
pub fn log_configuration(config: &ScenarioConfig) {
    info!("zigmesh coexistence - configuration:");
    info!("> nZigbee: {}", config.n_zigbee);
    info!("> seed: {}", config.seed);
    info!("> simulationTime: {}", config.simulation_time);
    info!("> layout: {:?}", config.layout);
    info!("> wifiStations: {}", config.wifi.stations);
    info!("> wifiDataRate: {} bps", config.wifi.data_rate_bps);
    info!("> wifiPacketSize: {}", config.wifi.packet_size);
    info!("> radioRange: {} m", config.nwk.radio_range);
    info!(
        "> traffic: {} -> {} every {}s from {}s",
        config.traffic.source,
        config.destination(),
        config.traffic.interval,
        config.traffic.start
    );
}

pub fn log_positions(layout: &Layout) {
    info!("[AP] Node 0 position: {}", layout.access_point);
    for (i, position) in layout.stations.iter().enumerate() {
        info!("[STA] Node {} position: {}", i + 1, position);
    }
    for (i, position) in layout.mesh.iter().enumerate() {
        info!("[ZB] Node {} position: {}", i, position);
    }
}

/// Run any configuration end to end
pub fn run_scenario(config: ScenarioConfig) -> Result<ScenarioRun, SimulationError> {
    log_configuration(&config);
    let layout = coexistence_layout(
        config.n_zigbee as usize,
        config.wifi.stations as usize,
        config.layout,
    );
    log_positions(&layout);

    let mut simulation = Simulation::new(config)?;
    let started = Instant::now();
    let report = simulation.run()?;
    let elapsed = started.elapsed();
    info!(elapsed = ?elapsed, "Simulation time elapsed");

    let report = report.with_nwk_stats(simulation.network().stats().clone());
    Ok(ScenarioRun {
        simulation,
        report,
        elapsed,
    })
}

pub fn run_coexistence_scenario(config: ScenarioConfig) -> Result<ScenarioRun, SimulationError> {
    info!("=== Running coexistence scenario ===");
    run_scenario(config)
}

/// Configuration of a chain of `devices` routers 20 m apart with a 25 m range
pub fn chain_config(devices: u32) -> ScenarioConfig {
    let mut config = ScenarioConfig {
        n_zigbee: devices,
        layout: LayoutKind::Line { spacing: 20.0 },
        simulation_time: 30.0,
        ..ScenarioConfig::default()
    };
    config.nwk.radio_range = 25.0;
    config.wifi.stations = 0;
    config.traffic.start = f64::from(devices) + 4.0;
    config
}

pub fn run_chain_scenario(devices: u32) -> Result<ScenarioRun, SimulationError> {
    info!("=== Running chain scenario ({devices} devices) ===");
    let run = run_scenario(chain_config(devices))?;

    println!("{}", run.simulation.network().radio().visualize());
    for trace in run.simulation.traces() {
        let path: Vec<String> = trace.path().iter().map(ToString::to_string).collect();
        println!("Path: {}", path.join(" -> "));
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zigmesh_core::DeviceId;

    #[test]
    fn test_chain_scenario_traces_every_hop() {
        let run = run_chain_scenario(4).unwrap();
        let traces = run.simulation.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(
            traces[0].path(),
            vec![DeviceId(0), DeviceId(1), DeviceId(2), DeviceId(3)]
        );
        assert!(run.report.nwk.is_some());
    }

    #[test]
    fn test_chain_config_is_valid() {
        let config = chain_config(6);
        config.validate().unwrap();
        assert_eq!(config.destination(), 5);
        assert_eq!(config.traffic.start, 10.0);
    }
}
