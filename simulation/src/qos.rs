//! Delivery deduplication and QoS accounting
//!
//! Every inbound frame is parsed, checked against the sequence numbers the
//! destination already saw from that source, and only then accounted.
//! Duplicates, malformed frames and frames stamped in the future are
//! counted separately and never touch the per-destination accumulators.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace, warn};

use zigmesh_core::{DeviceId, PacketError, SequencedPacket};

/// Per-destination delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QosAccumulator {
    pub sent: u64,
    pub received: u64,
    pub cumulative_delay: Duration,
    pub cumulative_link_quality: u64,
}

impl QosAccumulator {
    /// Packet delivery ratio; 0 when nothing was sent
    pub fn pdr(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.received as f64 / self.sent as f64
        }
    }

    /// Mean one-way delay of accepted frames
    pub fn average_delay(&self) -> Duration {
        if self.received == 0 {
            Duration::ZERO
        } else {
            self.cumulative_delay.div_f64(self.received as f64)
        }
    }

    pub fn average_link_quality(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.cumulative_link_quality as f64 / self.received as f64
        }
    }
}

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Accepted {
        source: DeviceId,
        sequence: u32,
        delay: Duration,
    },
    Duplicate {
        source: DeviceId,
        sequence: u32,
    },
    Malformed(PacketError),
    /// Origin time lies after the receive time
    ClockAnomaly {
        source: DeviceId,
        sequence: u32,
        origin: Duration,
    },
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounters {
    pub accepted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub clock_anomalies: u64,
}

#[derive(Debug, Clone, Default)]
pub struct QosCollector {
    /// (destination, source) -> sequence numbers already delivered
    seen: HashMap<(DeviceId, DeviceId), HashSet<u32>>,
    accumulators: BTreeMap<DeviceId, QosAccumulator>,
    counters: DeliveryCounters,
}

impl QosCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame handed to the network layer for `destination`
    pub fn record_sent(&mut self, destination: DeviceId) {
        self.accumulators.entry(destination).or_default().sent += 1;
    }

    /// Process a data indication received by `destination` at `now`
    pub fn on_data_indication(
        &mut self,
        destination: DeviceId,
        payload: &[u8],
        link_quality: u8,
        now: Duration,
    ) -> DeliveryOutcome {
        let packet = match SequencedPacket::parse(payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.malformed += 1;
                warn!(destination = %destination, error = %e, "Dropping malformed frame");
                return DeliveryOutcome::Malformed(e);
            }
        };
        let SequencedPacket {
            source,
            sequence,
            origin,
        } = packet;

        let seen = self.seen.entry((destination, source)).or_default();
        if seen.contains(&sequence) {
            self.counters.duplicates += 1;
            debug!(destination = %destination, source = %source, sequence, "Duplicate frame dropped");
            return DeliveryOutcome::Duplicate { source, sequence };
        }

        let Some(delay) = now.checked_sub(origin) else {
            self.counters.clock_anomalies += 1;
            warn!(
                destination = %destination,
                source = %source,
                sequence,
                origin = ?origin,
                now = ?now,
                "Frame originates in the future, not accounted"
            );
            return DeliveryOutcome::ClockAnomaly {
                source,
                sequence,
                origin,
            };
        };

        seen.insert(sequence);
        let accumulator = self.accumulators.entry(destination).or_default();
        accumulator.received += 1;
        accumulator.cumulative_delay += delay;
        accumulator.cumulative_link_quality += u64::from(link_quality);
        self.counters.accepted += 1;
        trace!(
            destination = %destination,
            source = %source,
            sequence,
            delay = ?delay,
            link_quality,
            size = payload.len(),
            "Frame accepted"
        );

        DeliveryOutcome::Accepted {
            source,
            sequence,
            delay,
        }
    }

    pub fn accumulator(&self, destination: DeviceId) -> Option<&QosAccumulator> {
        self.accumulators.get(&destination)
    }

    /// Accumulators in ascending destination order
    pub fn accumulators(&self) -> impl Iterator<Item = (DeviceId, &QosAccumulator)> {
        self.accumulators.iter().map(|(id, acc)| (*id, acc))
    }

    pub fn counters(&self) -> DeliveryCounters {
        self.counters
    }

    /// Whether `destination` already accepted `sequence` from `source`
    pub fn has_seen(&self, destination: DeviceId, source: DeviceId, sequence: u32) -> bool {
        self.seen
            .get(&(destination, source))
            .map(|set| set.contains(&sequence))
            .unwrap_or(false)
    }
}
