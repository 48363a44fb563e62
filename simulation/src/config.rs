//! Scenario configuration
//!
//! Everything a run needs is captured in one [`ScenarioConfig`], which can
//! be loaded from and saved to JSON. Times are plain seconds so config files
//! stay readable; use [`secs`] to turn them into virtual-time durations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zigmesh_core::{ChannelMask, FormationParams, HEADER_LEN};

/// Errors raised while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Payload size {size} is smaller than the {minimum}-byte header")]
    PayloadTooSmall { size: usize, minimum: usize },

    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config format error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Convert a configured number of seconds into virtual time
///
/// Negative or non-finite values collapse to zero; [`ScenarioConfig::validate`]
/// rejects them up front.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// What to do when a device's network discovery fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscoveryFailurePolicy {
    /// Stop the whole run
    Abort,
    /// Mark the device failed and keep going
    #[default]
    Continue,
}

/// Whether a periodic send re-arms itself while the network is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReschedulePolicy {
    /// Always re-arm, so a late-forming network is not starved
    #[default]
    Always,
    /// Stop the periodic send the first time it finds the network not ready
    WhenReady,
}

/// Placement of the mesh devices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutKind {
    /// Evenly spaced on a circle around the access point
    Circle { radius: f64 },
    /// On a straight line, coordinator at one end
    Line { spacing: f64 },
}

impl Default for LayoutKind {
    fn default() -> Self {
        Self::Circle { radius: 10.0 }
    }
}

/// Application traffic between two mesh devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Sending device
    pub source: u32,
    /// Receiving device; the last device when unset
    pub destination: Option<u32>,
    /// First send attempt (seconds)
    pub start: f64,
    /// Send period (seconds)
    pub interval: f64,
    /// Stop after this many successful sends
    pub max_packets: Option<u32>,
    /// Bytes per data frame, header included
    pub payload_size: usize,
    /// Byte used to pad the frame after the header
    pub fill_byte: u8,
    pub reschedule: ReschedulePolicy,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            source: 0,
            destination: None,
            start: 8.0,
            interval: 1.0,
            max_packets: None,
            payload_size: 100,
            fill_byte: 0,
            reschedule: ReschedulePolicy::Always,
        }
    }
}

/// Route trace and table dump, relative to the first successful send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Trace the route this long after the first send (seconds)
    pub trace_delay: Option<f64>,
    /// Dump the source's tables this long after the first send (seconds)
    pub dump_delay: Option<f64>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            trace_delay: Some(3.0),
            dump_delay: Some(4.0),
        }
    }
}

/// Parameters of the stand-in network layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NwkConfig {
    /// Maximum distance between two devices that hear each other (metres)
    pub radio_range: f64,
    /// Processing and access delay added per hop (seconds)
    pub per_hop_latency: f64,
    /// Probability that a data frame is lost end to end
    pub loss_rate: f64,
    /// Probability that a delivered frame is delivered a second time
    pub duplicate_rate: f64,
    /// Age after which a cached route is rediscovered (seconds)
    pub route_stale_timeout: f64,
}

impl Default for NwkConfig {
    fn default() -> Self {
        Self {
            radio_range: 25.0,
            per_hop_latency: 0.005,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            route_stale_timeout: 300.0,
        }
    }
}

/// Constant-rate UDP traffic from the Wi-Fi stations to the access point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub stations: u32,
    /// Offered load per station; 0 disables Wi-Fi traffic
    pub data_rate_bps: u64,
    pub packet_size: u32,
    /// Sink port on the access point
    pub port: u16,
    /// Traffic start (seconds)
    pub start: f64,
    /// One-way delivery latency (seconds)
    pub latency: f64,
    pub loss_rate: f64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            stations: 2,
            data_rate_bps: 1_000_000,
            packet_size: 1472,
            port: 5000,
            start: 1.0,
            latency: 0.0005,
            loss_rate: 0.0,
        }
    }
}

/// Complete description of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Number of mesh devices, coordinator included
    pub n_zigbee: u32,
    /// Seed for every random draw in the run
    pub seed: u64,
    /// Stop time (seconds)
    pub simulation_time: f64,
    pub layout: LayoutKind,
    /// Formation request time (seconds)
    pub form_at: f64,
    /// Device `i` starts discovery at `discover_base + i * discover_step`
    pub discover_base: f64,
    pub discover_step: f64,
    pub formation: FormationParams,
    pub discovery_mask: ChannelMask,
    pub discovery_scan_duration: u8,
    pub discovery_failure: DiscoveryFailurePolicy,
    pub traffic: TrafficConfig,
    pub diagnostics: DiagnosticsConfig,
    pub nwk: NwkConfig,
    pub wifi: WifiConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            n_zigbee: 5,
            seed: 1,
            simulation_time: 60.0,
            layout: LayoutKind::default(),
            form_at: 1.0,
            discover_base: 3.0,
            discover_step: 1.0,
            formation: FormationParams::default(),
            // Channels 11-14
            discovery_mask: ChannelMask(0x0000_7800),
            discovery_scan_duration: 2,
            discovery_failure: DiscoveryFailurePolicy::Continue,
            traffic: TrafficConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            nwk: NwkConfig::default(),
            wifi: WifiConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Receiving device of the application traffic
    pub fn destination(&self) -> u32 {
        self.traffic
            .destination
            .unwrap_or_else(|| self.n_zigbee.saturating_sub(1))
    }

    /// Discovery start time of device `index`
    pub fn discovery_time(&self, index: u32) -> Duration {
        secs(self.discover_base + f64::from(index) * self.discover_step)
    }

    /// Check every value before a run is built from this configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_zigbee < 2 {
            return Err(ConfigError::invalid(
                "n_zigbee",
                "need a coordinator and at least one router",
            ));
        }

        check_interval("simulation_time", self.simulation_time)?;
        check_time("form_at", self.form_at)?;
        check_time("discover_base", self.discover_base)?;
        check_time("discover_step", self.discover_step)?;

        match self.layout {
            LayoutKind::Circle { radius } => check_positive("layout.radius", radius)?,
            LayoutKind::Line { spacing } => check_positive("layout.spacing", spacing)?,
        }

        if self.formation.channel_mask.is_empty() {
            return Err(ConfigError::invalid("formation.channel_mask", "selects no channel"));
        }
        if self.discovery_mask.is_empty() {
            return Err(ConfigError::invalid("discovery_mask", "selects no channel"));
        }

        let traffic = &self.traffic;
        if traffic.payload_size < HEADER_LEN {
            return Err(ConfigError::PayloadTooSmall {
                size: traffic.payload_size,
                minimum: HEADER_LEN,
            });
        }
        check_time("traffic.start", traffic.start)?;
        check_interval("traffic.interval", traffic.interval)?;
        if traffic.source >= self.n_zigbee {
            return Err(ConfigError::invalid(
                "traffic.source",
                format!("device {} does not exist", traffic.source),
            ));
        }
        let destination = self.destination();
        if destination >= self.n_zigbee {
            return Err(ConfigError::invalid(
                "traffic.destination",
                format!("device {destination} does not exist"),
            ));
        }
        if destination == traffic.source {
            return Err(ConfigError::invalid(
                "traffic.destination",
                "must differ from the source",
            ));
        }

        if let Some(delay) = self.diagnostics.trace_delay {
            check_time("diagnostics.trace_delay", delay)?;
        }
        if let Some(delay) = self.diagnostics.dump_delay {
            check_time("diagnostics.dump_delay", delay)?;
        }

        check_positive("nwk.radio_range", self.nwk.radio_range)?;
        check_time("nwk.per_hop_latency", self.nwk.per_hop_latency)?;
        check_time("nwk.route_stale_timeout", self.nwk.route_stale_timeout)?;
        check_probability("nwk.loss_rate", self.nwk.loss_rate)?;
        check_probability("nwk.duplicate_rate", self.nwk.duplicate_rate)?;

        if self.wifi.data_rate_bps > 0 && self.wifi.packet_size == 0 {
            return Err(ConfigError::invalid("wifi.packet_size", "must be positive"));
        }
        check_time("wifi.start", self.wifi.start)?;
        check_time("wifi.latency", self.wifi.latency)?;
        check_probability("wifi.loss_rate", self.wifi.loss_rate)?;

        Ok(())
    }
}

/// A non-negative time that converts to virtual time without overflow
fn check_time(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not a valid time")))
    }
}

/// A time that stays above zero once converted to virtual time
fn check_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    check_time(field, value)?;
    if secs(value).is_zero() {
        return Err(ConfigError::invalid(
            field,
            format!("{value} rounds to zero virtual time"),
        ));
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} must be positive")))
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is outside 0..=1")))
    }
}
