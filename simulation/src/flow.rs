//! Flow monitor and constant-rate Wi-Fi traffic
//!
//! Stations send UDP datagrams to the access point at a fixed rate. The
//! monitor classifies every datagram by five-tuple and keeps per-flow
//! counters, in the shape the statistics reporter expects.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Serialize;
use tracing::trace;

/// IP protocol number of UDP
pub const UDP: u8 = 17;

/// Opaque flow identifier, assigned in classification order from 1
pub type FlowId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FiveTuple {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} (proto {})",
            self.source, self.source_port, self.destination, self.destination_port, self.protocol
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub delay_sum: Duration,
    pub jitter_sum: Duration,
    pub first_tx: Option<Duration>,
    pub last_rx: Option<Duration>,
    #[serde(skip)]
    pub(crate) last_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct FlowMonitor {
    flows: BTreeMap<FlowId, FlowStats>,
    classifier: BTreeMap<FiveTuple, FlowId>,
    tuples: BTreeMap<FlowId, FiveTuple>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flow id of a five-tuple, creating the flow on first sight
    pub fn classify(&mut self, tuple: FiveTuple) -> FlowId {
        if let Some(id) = self.classifier.get(&tuple) {
            return *id;
        }
        let id = self.classifier.len() as FlowId + 1;
        self.classifier.insert(tuple, id);
        self.tuples.insert(id, tuple);
        self.flows.insert(id, FlowStats::default());
        trace!(flow = id, %tuple, "New flow");
        id
    }

    pub fn record_tx(&mut self, flow: FlowId, bytes: u32, now: Duration) {
        if let Some(stats) = self.flows.get_mut(&flow) {
            stats.tx_packets += 1;
            stats.tx_bytes += u64::from(bytes);
            stats.first_tx.get_or_insert(now);
        }
    }

    pub fn record_rx(&mut self, flow: FlowId, bytes: u32, sent_at: Duration, now: Duration) {
        if let Some(stats) = self.flows.get_mut(&flow) {
            let delay = now.saturating_sub(sent_at);
            stats.rx_packets += 1;
            stats.rx_bytes += u64::from(bytes);
            stats.delay_sum += delay;
            if let Some(previous) = stats.last_delay {
                stats.jitter_sum += delay.abs_diff(previous);
            }
            stats.last_delay = Some(delay);
            stats.last_rx = Some(now);
        }
    }

    pub fn record_lost(&mut self, flow: FlowId) {
        if let Some(stats) = self.flows.get_mut(&flow) {
            stats.lost_packets += 1;
        }
    }

    /// Five-tuple behind a flow id
    pub fn find_flow(&self, flow: FlowId) -> Option<FiveTuple> {
        self.tuples.get(&flow).copied()
    }

    pub fn stats(&self) -> impl Iterator<Item = (FlowId, &FlowStats)> {
        self.flows.iter().map(|(id, stats)| (*id, stats))
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

/// Constant-rate UDP source on a station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnOffApplication {
    pub tuple: FiveTuple,
    pub packet_size: u32,
    pub data_rate_bps: u64,
    pub start: Duration,
    pub stop: Duration,
}

impl OnOffApplication {
    /// Time between two datagrams, or `None` when the source is disabled
    pub fn interval(&self) -> Option<Duration> {
        if self.data_rate_bps == 0 || self.packet_size == 0 {
            return None;
        }
        let bits = u128::from(self.packet_size) * 8;
        let nanos = bits * 1_000_000_000 / u128::from(self.data_rate_bps);
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX).max(1);
        Some(Duration::from_nanos(nanos))
    }

    pub fn is_active(&self, now: Duration) -> bool {
        now >= self.start && now < self.stop
    }
}

/// Address of the access point
pub fn access_point_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1)
}

/// Address of station `index` (0-based)
pub fn station_address(index: u32) -> Ipv4Addr {
    let host = 2 + index;
    Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + host)
}
