//! Device placement and radio reachability
//!
//! Provides layouts for the mesh devices and the Wi-Fi nodes:
//! - Circle: mesh devices evenly spaced around the access point
//! - Line: mesh devices in a row, only adjacent devices in range
//!
//! [`RadioMap`] turns positions into a neighbour graph using a fixed radio
//! range, and derives a link quality from distance.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use zigmesh_core::{DeviceId, Position};

use crate::config::LayoutKind;

/// Positions of every node in a coexistence run
#[derive(Debug, Clone)]
pub struct Layout {
    pub access_point: Position,
    pub stations: Vec<Position>,
    /// Mesh devices; index 0 is the coordinator
    pub mesh: Vec<Position>,
}

/// Builder for mesh device layouts
pub struct LayoutBuilder {
    device_count: usize,
}

impl LayoutBuilder {
    /// Create a builder for the given number of mesh devices
    pub fn new(device_count: usize) -> Self {
        Self { device_count }
    }

    /// Devices evenly spaced on a circle at 1 m height
    pub fn circle(self, radius: f64) -> Vec<Position> {
        (0..self.device_count)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / self.device_count as f64;
                Position::new(radius * angle.cos(), radius * angle.sin(), 1.0)
            })
            .collect()
    }

    /// Devices on the x axis, `spacing` metres apart, at 1 m height
    pub fn line(self, spacing: f64) -> Vec<Position> {
        (0..self.device_count)
            .map(|i| Position::new(i as f64 * spacing, 0.0, 1.0))
            .collect()
    }

    /// Build whichever layout the configuration asks for
    pub fn build(self, kind: LayoutKind) -> Vec<Position> {
        match kind {
            LayoutKind::Circle { radius } => self.circle(radius),
            LayoutKind::Line { spacing } => self.line(spacing),
        }
    }
}

/// Access point at the origin, stations alternating at +/-5 m, mesh as configured
pub fn coexistence_layout(mesh_devices: usize, stations: usize, kind: LayoutKind) -> Layout {
    let stations = (0..stations)
        .map(|i| {
            let side = if i % 2 == 0 { 1.0 } else { -1.0 };
            let ring = (i / 2) as f64 + 1.0;
            Position::new(side * 5.0 * ring, 0.0, 1.2)
        })
        .collect();

    Layout {
        access_point: Position::new(0.0, 0.0, 1.5),
        stations,
        mesh: LayoutBuilder::new(mesh_devices).build(kind),
    }
}

/// Neighbour graph derived from positions and a radio range
#[derive(Debug, Clone)]
pub struct RadioMap {
    positions: Vec<Position>,
    range: f64,
    adjacency: BTreeMap<DeviceId, BTreeSet<DeviceId>>,
}

impl RadioMap {
    pub fn new(positions: Vec<Position>, range: f64) -> Self {
        let mut adjacency: BTreeMap<DeviceId, BTreeSet<DeviceId>> = (0..positions.len())
            .map(|i| (DeviceId(i as u32), BTreeSet::new()))
            .collect();

        for i in 0..positions.len() {
            for j in (i + 1)..positions.len() {
                if positions[i].distance_to(&positions[j]) <= range {
                    let (a, b) = (DeviceId(i as u32), DeviceId(j as u32));
                    adjacency.entry(a).or_default().insert(b);
                    adjacency.entry(b).or_default().insert(a);
                }
            }
        }

        Self {
            positions,
            range,
            adjacency,
        }
    }

    /// Devices within range of `device`, in ascending id order
    pub fn neighbors(&self, device: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        self.adjacency
            .get(&device)
            .into_iter()
            .flat_map(|neighbors| neighbors.iter().copied())
    }

    pub fn in_range(&self, a: DeviceId, b: DeviceId) -> bool {
        self.adjacency
            .get(&a)
            .map(|neighbors| neighbors.contains(&b))
            .unwrap_or(false)
    }

    pub fn distance(&self, a: DeviceId, b: DeviceId) -> Option<f64> {
        let pa = self.positions.get(a.index())?;
        let pb = self.positions.get(b.index())?;
        Some(pa.distance_to(pb))
    }

    /// Link quality between two devices, 255 when co-located, 0 at the edge of range
    pub fn link_quality(&self, a: DeviceId, b: DeviceId) -> u8 {
        self.distance(a, b)
            .map(|distance| link_quality(distance, self.range))
            .unwrap_or(0)
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn device_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of radio links
    pub fn link_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Print a simple ASCII visualization of the radio graph
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Radio Topology:\n");
        output.push_str(&format!("  Devices: {}\n", self.device_count()));
        output.push_str(&format!("  Links: {}\n", self.link_count()));
        output.push_str(&format!("  Range: {:.1} m\n\n", self.range));

        for (device, neighbors) in &self.adjacency {
            let position = self.positions[device.index()];
            let neighbor_str: Vec<String> = neighbors
                .iter()
                .map(|n| format!("{}({})", n, self.link_quality(*device, *n)))
                .collect();
            output.push_str(&format!(
                "  {} [{}] -> [{}]\n",
                device,
                position,
                neighbor_str.join(", ")
            ));
        }
        output
    }
}

/// Link quality for a link of `distance` metres with the given radio range
pub fn link_quality(distance: f64, range: f64) -> u8 {
    if range <= 0.0 || !distance.is_finite() {
        return 0;
    }
    let quality = 255.0 * (1.0 - distance / range);
    quality.round().clamp(0.0, 255.0) as u8
}
