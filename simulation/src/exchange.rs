//! Data exchange service
//!
//! Builds sequenced application frames and turns them into data requests.
//! Sequence numbers are shared by every source/destination pair of a run,
//! so they strictly increase in send order.

use std::time::Duration;

use tracing::{debug, warn};

use zigmesh_core::{DataParams, DeviceId, HEADER_LEN, NwkRequest, PacketError, SequencedPacket};

use crate::config::{ReschedulePolicy, TrafficConfig};
use crate::qos::QosCollector;
use crate::registry::TopologyRegistry;

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { request: NwkRequest, sequence: u32 },
    /// The network is not ready yet; nothing was sent
    NotReady,
    /// The destination has no network address yet; nothing was sent
    DestinationUnassigned,
}

/// A frame handed to the network layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub source: DeviceId,
    pub destination: DeviceId,
    pub sequence: u32,
    pub at: Duration,
}

#[derive(Debug, Clone)]
pub struct DataExchange {
    next_sequence: u32,
    payload_size: usize,
    fill: u8,
    policy: ReschedulePolicy,
    handle: u8,
    log: Vec<SentPacket>,
}

impl DataExchange {
    pub fn new(
        payload_size: usize,
        fill: u8,
        policy: ReschedulePolicy,
    ) -> Result<Self, PacketError> {
        if payload_size < HEADER_LEN {
            return Err(PacketError::PayloadTooSmall {
                requested: payload_size,
                minimum: HEADER_LEN,
            });
        }

        Ok(Self {
            next_sequence: 0,
            payload_size,
            fill,
            policy,
            handle: 0,
            log: Vec::new(),
        })
    }

    pub fn from_config(traffic: &TrafficConfig) -> Result<Self, PacketError> {
        Self::new(traffic.payload_size, traffic.fill_byte, traffic.reschedule)
    }

    /// Build the next data request from `source` to `destination`
    ///
    /// Counts the frame as sent for the destination only when a request is
    /// actually produced.
    pub fn send(
        &mut self,
        source: DeviceId,
        destination: DeviceId,
        registry: &TopologyRegistry,
        ready: bool,
        qos: &mut QosCollector,
        now: Duration,
    ) -> Result<SendOutcome, PacketError> {
        if !ready {
            debug!(source = %source, destination = %destination, "Network not ready, send skipped");
            return Ok(SendOutcome::NotReady);
        }

        let Some(address) = registry.short_address(destination) else {
            warn!(destination = %destination, "Destination has no network address, send skipped");
            return Ok(SendOutcome::DestinationUnassigned);
        };

        let sequence = self.next_sequence;
        let payload =
            SequencedPacket::new(source, sequence, now).encode(self.payload_size, self.fill)?;
        self.next_sequence += 1;
        self.handle = self.handle.wrapping_add(1);

        qos.record_sent(destination);
        self.log.push(SentPacket {
            source,
            destination,
            sequence,
            at: now,
        });
        debug!(
            source = %source,
            destination = %destination,
            address = %address,
            sequence,
            size = payload.len(),
            "NldeDataRequest"
        );

        let request = NwkRequest::Data {
            device: source,
            params: DataParams {
                destination: address,
                handle: self.handle,
                discover_route: true,
                payload,
            },
        };
        Ok(SendOutcome::Sent { request, sequence })
    }

    /// Whether a periodic send should re-arm after an attempt
    pub fn should_reschedule(&self, ready: bool) -> bool {
        match self.policy {
            ReschedulePolicy::Always => true,
            ReschedulePolicy::WhenReady => ready,
        }
    }

    /// Every frame sent so far, in send order
    pub fn sent(&self) -> &[SentPacket] {
        &self.log
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zigmesh_core::{Position, ShortAddress};

    fn registry() -> TopologyRegistry {
        let mut registry = TopologyRegistry::from_positions(&[Position::default(); 3]).unwrap();
        registry
            .assign_network_address(DeviceId(0), ShortAddress::COORDINATOR)
            .unwrap();
        registry
            .assign_network_address(DeviceId(2), ShortAddress(0x2222))
            .unwrap();
        registry
    }

    #[test]
    fn test_rejects_small_payload() {
        assert!(matches!(
            DataExchange::new(8, 0, ReschedulePolicy::Always),
            Err(PacketError::PayloadTooSmall { requested: 8, .. })
        ));
    }

    #[test]
    fn test_sequence_is_shared_across_pairs() {
        let registry = registry();
        let mut qos = QosCollector::new();
        let mut exchange = DataExchange::new(20, 0xEE, ReschedulePolicy::Always).unwrap();

        let pairs = [(0, 2), (2, 0), (0, 2)];
        for (i, (src, dst)) in pairs.into_iter().enumerate() {
            let outcome = exchange
                .send(DeviceId(src), DeviceId(dst), &registry, true, &mut qos, Duration::ZERO)
                .unwrap();
            match outcome {
                SendOutcome::Sent { sequence, request } => {
                    assert_eq!(sequence, i as u32);
                    let NwkRequest::Data { params, .. } = request else {
                        panic!("expected data request");
                    };
                    assert!(params.discover_route);
                    assert_eq!(params.payload.len(), 20);
                    assert_eq!(params.payload[HEADER_LEN..], [0xEE; 4]);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(qos.accumulator(DeviceId(2)).unwrap().sent, 2);
        assert_eq!(qos.accumulator(DeviceId(0)).unwrap().sent, 1);
        assert_eq!(exchange.sent().len(), 3);
    }

    #[test]
    fn test_skips_when_not_ready_or_unassigned() {
        let registry = registry();
        let mut qos = QosCollector::new();
        let mut exchange = DataExchange::new(16, 0, ReschedulePolicy::WhenReady).unwrap();

        let outcome = exchange
            .send(DeviceId(0), DeviceId(2), &registry, false, &mut qos, Duration::ZERO)
            .unwrap();
        assert_eq!(outcome, SendOutcome::NotReady);
        assert!(!exchange.should_reschedule(false));

        let outcome = exchange
            .send(DeviceId(0), DeviceId(1), &registry, true, &mut qos, Duration::ZERO)
            .unwrap();
        assert_eq!(outcome, SendOutcome::DestinationUnassigned);

        assert_eq!(exchange.next_sequence(), 0);
        assert!(qos.accumulator(DeviceId(1)).is_none());
    }
}
