//! Primary advertising channels and the active-channel set.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the three BLE primary advertising channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AdvChannel {
    Ch37,
    Ch38,
    Ch39,
}

impl AdvChannel {
    pub const ALL: [Self; 3] = [Self::Ch37, Self::Ch38, Self::Ch39];

    /// BLE channel index.
    pub const fn index(self) -> u8 {
        match self {
            Self::Ch37 => 37,
            Self::Ch38 => 38,
            Self::Ch39 => 39,
        }
    }

    /// Centre frequency in MHz.
    pub const fn mhz(self) -> u16 {
        match self {
            Self::Ch37 => 2402,
            Self::Ch38 => 2426,
            Self::Ch39 => 2480,
        }
    }

    /// Frequency register value (MHz above 2379).
    pub const fn frequency_register(self) -> u8 {
        (self.mhz() - 2379) as u8
    }

    /// Whitening LFSR seed: the channel index.
    pub const fn whitening_init(self) -> u8 {
        self.index()
    }

    pub const fn bit(self) -> u8 {
        match self {
            Self::Ch37 => ChannelMap::CH37,
            Self::Ch38 => ChannelMap::CH38,
            Self::Ch39 => ChannelMap::CH39,
        }
    }

    pub fn from_frequency_register(freq: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.frequency_register() == freq)
    }
}

impl TryFrom<u8> for AdvChannel {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        match index {
            37 => Ok(Self::Ch37),
            38 => Ok(Self::Ch38),
            39 => Ok(Self::Ch39),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Non-empty subset of {37, 38, 39}, iterated in ascending frequency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap(u8);

impl ChannelMap {
    pub const CH37: u8 = 0x01;
    pub const CH38: u8 = 0x02;
    pub const CH39: u8 = 0x04;
    pub const ALL: Self = Self(Self::CH37 | Self::CH38 | Self::CH39);

    /// Reject empty masks and bits outside the three channels.
    pub const fn from_bits(bits: u8) -> Result<Self> {
        if bits == 0 || bits & !Self::ALL.0 != 0 {
            Err(Error::InvalidArgument)
        } else {
            Ok(Self(bits))
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn count(self) -> u8 {
        self.0.count_ones() as u8
    }

    pub const fn contains(self, channel: AdvChannel) -> bool {
        self.0 & channel.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = AdvChannel> {
        AdvChannel::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    pub fn first(self) -> AdvChannel {
        self.iter().next().unwrap_or(AdvChannel::Ch37)
    }

    /// The next active channel above `current`, if the event continues.
    pub fn next_after(self, current: AdvChannel) -> Option<AdvChannel> {
        self.iter().find(|c| *c > current)
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self::ALL
    }
}
