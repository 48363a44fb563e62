//! Device identity and addressing
//!
//! Every simulated device has three identities:
//!
//! - [`DeviceId`]: stable index assigned at topology setup
//! - [`ExtendedAddress`]: 64-bit IEEE address, unique and immutable
//! - [`ShortAddress`]: 16-bit network address, assigned by a successful join

use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// Stable identity of a simulated device
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("{_0}")]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Position of this device in registry order
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 64-bit IEEE extended address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtendedAddress(pub u64);

impl ExtendedAddress {
    /// Well-known address given to the coordinator (`00:00:00:00:00:00:CA:FE`)
    pub const COORDINATOR: Self = Self(0xCAFE);

    /// Sequentially allocated address, starting at `00:00:00:00:00:00:00:01`
    pub fn allocate(n: u32) -> Self {
        Self(u64::from(n) + 1)
    }
}

impl fmt::Display for ExtendedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.to_be_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl FromStr for ExtendedAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 8 {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }

        let mut value = 0u64;
        for part in parts {
            if part.len() != 2 {
                return Err(AddressError::InvalidFormat(s.to_string()));
            }
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| AddressError::InvalidFormat(s.to_string()))?;
            value = (value << 8) | u64::from(byte);
        }
        Ok(Self(value))
    }
}

/// 16-bit network address assigned on join
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// The coordinator always owns address `00:00`
    pub const COORDINATOR: Self = Self(0x0000);

    /// Sentinel returned by route lookups when no route exists (`FF:FF`)
    pub const NO_ROUTE: Self = Self(0xFFFF);

    /// First address of the reserved broadcast block
    const RESERVED_START: u16 = 0xFFF8;

    /// Whether the address falls in the broadcast/reserved block
    pub fn is_reserved(self) -> bool {
        self.0 >= Self::RESERVED_START
    }

    /// Whether the address may be handed to a joining device
    pub fn is_assignable(self) -> bool {
        self != Self::COORDINATOR && !self.is_reserved()
    }

    /// Validate an address that is about to be assigned
    pub fn checked(value: u16) -> Result<Self, AddressError> {
        let addr = Self(value);
        if addr.is_assignable() {
            Ok(addr)
        } else {
            Err(AddressError::Reserved(addr.to_string()))
        }
    }
}

impl fmt::Display for ShortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [hi, lo] = self.0.to_be_bytes();
        write!(f, "{hi:02X}:{lo:02X}")
    }
}

/// 16-bit PAN identifier
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("0x{:04x}", _0)]
pub struct PanId(pub u16);

/// 64-bit extended PAN identifier
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("0x{:x}", _0)]
pub struct ExtendedPanId(pub u64);

impl From<ExtendedAddress> for ExtendedPanId {
    fn from(addr: ExtendedAddress) -> Self {
        Self(addr.0)
    }
}

/// Bitmap of 2.4 GHz channels (bit `n` set = channel `n` selected)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelMask(pub u32);

impl ChannelMask {
    /// Channels 11 through 26
    pub const ALL_CHANNELS: Self = Self(0x07FF_F800);

    /// First channel of the 2.4 GHz band
    pub const FIRST_CHANNEL: u8 = 11;

    /// Last channel of the 2.4 GHz band
    pub const LAST_CHANNEL: u8 = 26;

    /// Iterate selected channels in ascending order
    pub fn channels(self) -> impl Iterator<Item = u8> {
        (Self::FIRST_CHANNEL..=Self::LAST_CHANNEL).filter(move |ch| (self.0 & (1u32 << *ch)) != 0)
    }

    /// Number of selected channels
    pub fn channel_count(self) -> usize {
        self.channels().count()
    }

    /// Whether no usable channel is selected
    pub fn is_empty(self) -> bool {
        self.channel_count() == 0
    }

    /// Whether the given channel is selected
    pub fn contains(self, channel: u8) -> bool {
        self.channels().any(|ch| ch == channel)
    }

    /// Lowest selected channel
    pub fn lowest(self) -> Option<u8> {
        self.channels().next()
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Role of a device in the mesh
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Role {
    /// The single device that forms the network
    Coordinator,
    /// Joined device that relays traffic and accepts joiners
    Router,
    /// Not (yet) a member of the network
    Unjoined,
}

/// Fixed device position in metres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x={:.2} y={:.2} z={:.2}", self.x, self.y, self.z)
    }
}
