//! Statistics reporter
//!
//! Turns the flow monitor, the QoS collector and the orchestrator's final
//! state into one [`SimulationReport`], printable as tables or exportable as
//! JSON.

use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use zigmesh_core::{DeviceId, ShortAddress};

use crate::flow::{FlowId, FlowMonitor, FlowStats, UDP};
use crate::nwk::NwkStats;
use crate::orchestrator::{FailureReason, JoinState, Orchestrator};
use crate::qos::{DeliveryCounters, QosAccumulator, QosCollector};
use crate::registry::TopologyRegistry;

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}

/// Received bits per second over the active part of a flow, in Mbit/s
///
/// When the first transmission and the last reception coincide the run's
/// end time bounds the flow instead; a flow that received nothing has zero
/// throughput.
pub fn throughput_mbps(stats: &FlowStats, now: Duration) -> f64 {
    let (Some(first_tx), Some(last_rx)) = (stats.first_tx, stats.last_rx) else {
        return 0.0;
    };
    if stats.rx_bytes == 0 {
        return 0.0;
    }

    let mut duration = last_rx.saturating_sub(first_tx);
    if duration.is_zero() {
        duration = now.saturating_sub(first_tx);
    }
    if duration.is_zero() {
        return 0.0;
    }
    stats.rx_bytes as f64 * 8.0 / (duration.as_secs_f64() * 1e6)
}

/// One row of the Wi-Fi flow table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowReport {
    pub flow_id: FlowId,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub pdr: f64,
    pub throughput_mbps: f64,
    pub avg_delay_ms: f64,
    pub jitter_ms: f64,
}

impl FlowReport {
    pub fn new(
        flow_id: FlowId,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        stats: &FlowStats,
        now: Duration,
    ) -> Self {
        let pdr = if stats.tx_packets == 0 {
            0.0
        } else {
            stats.rx_packets as f64 / stats.tx_packets as f64
        };
        let avg_delay_ms = if stats.rx_packets == 0 {
            0.0
        } else {
            millis(stats.delay_sum) / stats.rx_packets as f64
        };
        let jitter_ms = if stats.rx_packets > 1 {
            millis(stats.jitter_sum) / (stats.rx_packets - 1) as f64
        } else {
            0.0
        };

        Self {
            flow_id,
            source,
            destination,
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
            rx_bytes: stats.rx_bytes,
            lost_packets: stats.lost_packets,
            pdr,
            throughput_mbps: throughput_mbps(stats, now),
            avg_delay_ms,
            jitter_ms,
        }
    }
}

/// One row of the mesh QoS table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QosReport {
    pub destination: DeviceId,
    pub address: Option<ShortAddress>,
    pub sent: u64,
    pub received: u64,
    pub pdr: f64,
    pub avg_delay_ms: f64,
    pub avg_link_quality: f64,
}

impl QosReport {
    pub fn new(destination: DeviceId, address: Option<ShortAddress>, acc: &QosAccumulator) -> Self {
        Self {
            destination,
            address,
            sent: acc.sent,
            received: acc.received,
            pdr: acc.pdr(),
            avg_delay_ms: millis(acc.average_delay()),
            avg_link_quality: acc.average_link_quality(),
        }
    }
}

/// A device that never obtained a network address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnjoinedDevice {
    pub device: DeviceId,
    pub state: Option<JoinState>,
    pub failure: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Virtual time at which the report was taken (seconds)
    pub end_time_s: f64,
    pub ready_at_s: Option<f64>,
    pub wifi_port: u16,
    pub flows: Vec<FlowReport>,
    pub qos: Vec<QosReport>,
    pub unjoined: Vec<UnjoinedDevice>,
    pub delivery: DeliveryCounters,
    pub nwk: Option<NwkStats>,
    pub events_processed: u64,
}

impl SimulationReport {
    /// Gather the final statistics of a run
    pub fn collect(
        monitor: &FlowMonitor,
        wifi_port: u16,
        qos: &QosCollector,
        orchestrator: &Orchestrator,
        registry: &TopologyRegistry,
        now: Duration,
    ) -> Self {
        let flows = monitor
            .stats()
            .filter_map(|(id, stats)| {
                let tuple = monitor.find_flow(id)?;
                (tuple.protocol == UDP && tuple.destination_port == wifi_port)
                    .then(|| FlowReport::new(id, tuple.source, tuple.destination, stats, now))
            })
            .collect();

        let qos_rows = qos
            .accumulators()
            .map(|(device, acc)| QosReport::new(device, registry.short_address(device), acc))
            .collect();

        let unjoined = registry
            .devices()
            .filter(|device| device.short.is_none())
            .map(|device| {
                let status = orchestrator.status(device.id);
                UnjoinedDevice {
                    device: device.id,
                    state: status.map(|s| s.state),
                    failure: status.and_then(|s| s.failure),
                }
            })
            .collect();

        Self {
            end_time_s: now.as_secs_f64(),
            ready_at_s: orchestrator.ready_at().map(|at| at.as_secs_f64()),
            wifi_port,
            flows,
            qos: qos_rows,
            unjoined,
            delivery: qos.counters(),
            nwk: None,
            events_processed: 0,
        }
    }

    pub fn with_nwk_stats(mut self, stats: NwkStats) -> Self {
        self.nwk = Some(stats);
        self
    }

    pub fn with_events_processed(mut self, events: u64) -> Self {
        self.events_processed = events;
        self
    }

    pub fn qos_for(&self, destination: DeviceId) -> Option<&QosReport> {
        self.qos.iter().find(|row| row.destination == destination)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        fs::write(path, self.to_json()?)
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== WiFi Flow Statistics (port = {}) =====", self.wifi_port)?;
        if self.flows.is_empty() {
            writeln!(f, "  (no flows)")?;
        }
        for flow in &self.flows {
            writeln!(f, "Flow ID: {}", flow.flow_id)?;
            writeln!(
                f,
                "    Source        = {}    Destination = {}",
                flow.source, flow.destination
            )?;
            writeln!(
                f,
                "    Tx Packets    = {}    Rx Packets    = {}",
                flow.tx_packets, flow.rx_packets
            )?;
            writeln!(f, "    Lost Packets  = {}", flow.lost_packets)?;
            writeln!(f, "    PDR           = {:.3}", flow.pdr)?;
            writeln!(f, "    Throughput    = {:.2} Mbps", flow.throughput_mbps)?;
            writeln!(
                f,
                "    Avg Delay     = {:.3} ms    Jitter = {:.3} ms",
                flow.avg_delay_ms, flow.jitter_ms
            )?;
        }
        writeln!(f, "===============================================")?;

        writeln!(f)?;
        writeln!(f, "===== Mesh QoS Summary =====")?;
        writeln!(
            f,
            "{:<8}{:<10}{:>8}{:>10}{:>8}{:>14}{:>10}",
            "Dest", "Address", "Sent", "Received", "PDR", "AvgDelay(ms)", "AvgLQI"
        )?;
        for row in &self.qos {
            let address = row
                .address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "--:--".to_string());
            writeln!(
                f,
                "{:<8}{:<10}{:>8}{:>10}{:>8.3}{:>14.3}{:>10.1}",
                row.destination.to_string(),
                address,
                row.sent,
                row.received,
                row.pdr,
                row.avg_delay_ms,
                row.avg_link_quality
            )?;
        }

        if !self.unjoined.is_empty() {
            writeln!(f)?;
            writeln!(f, "===== Unjoined devices =====")?;
            for device in &self.unjoined {
                let state = device
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());
                match device.failure {
                    Some(reason) => writeln!(f, "Node {}: {} ({})", device.device, state, reason)?,
                    None => writeln!(f, "Node {}: {}", device.device, state)?,
                }
            }
        }
        Ok(())
    }
}
