//! Stack and application configuration.
//!
//! Defaults reproduce the shipped TempSensor build. Both structs can be
//! persisted to the flash info page with [`postcard`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::TaskId;
use crate::phy::{ChannelMap, TxPower};
use crate::scheduler::validate_interval;
use crate::ticks;

/// How the per-channel transmissions of one advertising event are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketSpacing {
    /// The radio interrupt re-triggers TX right after each packet.
    BackToBack,
    /// The scheduler issues each hop `packet_interval` ticks apart.
    Interval,
}

/// Where the device address comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    /// Static random address derived from the die ID.
    StaticRandom,
    /// Public address read from flash by the board crate.
    Public([u8; 6]),
}

/// miniBLE stack configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBleConfig {
    // --- Address ---
    pub address: AddressSource,

    // --- Advertising timing ---
    pub packet_spacing: PacketSpacing,
    /// Ticks between hops in [`PacketSpacing::Interval`] mode.
    pub packet_interval: u32,
    /// Add a pseudo-random delay after each advertising event.
    pub pseudo_random_delay: bool,
    /// Fixed part of the pseudo-random delay, ticks.
    pub adv_delay_margin: u32,

    // --- Power ---
    /// Use PM2 between events and calibrate the RC oscillator on wake.
    pub power_saving: bool,

    // --- Defaults ---
    /// Interval every task starts with at init.
    pub default_interval: u32,
    /// TXPOWER register value programmed at init.
    pub tx_power: u8,
    /// Prepend the `02 01 06` flags AD structure to every payload.
    pub advertise_flags: bool,
}

impl MiniBleConfig {
    /// Compare-register lead time the scheduler keeps.
    pub const fn schedule_margin(&self) -> u32 {
        if self.power_saving { 20 } else { 15 }
    }

    pub fn validate(&self) -> Result<()> {
        let margin = self.schedule_margin();
        if self.packet_interval <= margin {
            return Err(Error::Config("packet interval inside scheduling margin"));
        }
        // Two hops must fit before the shortest legal advertising interval.
        if self.packet_interval * 2 + margin >= ticks::ADV_INTERVAL_MIN {
            return Err(Error::Config("packet interval too long for three channels"));
        }
        if self.adv_delay_margin + u32::from(u8::MAX) > ticks::INTERVAL_10_MS {
            return Err(Error::Config("advertising delay exceeds 10 ms"));
        }
        if validate_interval(TaskId::DataAcquisition, self.default_interval).is_err() {
            return Err(Error::Config("default interval out of range"));
        }
        if !TxPower::is_valid_level(self.tx_power) {
            return Err(Error::Config("tx power bias bits missing"));
        }
        if let AddressSource::Public(bytes) = self.address {
            if bytes == [0xFF; 6] {
                return Err(Error::Config("public address is all ones"));
            }
        }
        Ok(())
    }

    /// Serialise into `buf` for the flash info page.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
        Ok(postcard::to_slice(self, buf)?)
    }

    /// Decode and validate a stored configuration.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for MiniBleConfig {
    fn default() -> Self {
        Self {
            address: AddressSource::StaticRandom,

            packet_spacing: PacketSpacing::BackToBack,
            packet_interval: ticks::INTERVAL_9_MS,
            pseudo_random_delay: true,
            adv_delay_margin: 38,

            power_saving: false,

            default_interval: ticks::INTERVAL_100_MS,
            tx_power: TxPower::Plus4Dbm.level(),
            advertise_flags: false,
        }
    }
}

/// Temperature beacon application settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Advertising interval, ticks.
    pub adv_interval: u32,
    pub channels: ChannelMap,
    pub tx_power: u8,
    /// Delay before the first measurement, ticks.
    pub first_measurement: u32,
    /// Sensor conversion time between start and read, ticks.
    pub conversion_time: u32,
    /// Period between measurements, ticks.
    pub measure_interval: u32,
    /// Company identifier placed in the manufacturer-specific AD structure.
    pub manufacturer_id: u16,
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<()> {
        if validate_interval(TaskId::Advertise, self.adv_interval).is_err() {
            return Err(Error::Config("advertising interval outside BLE range"));
        }
        for interval in [self.first_measurement, self.conversion_time, self.measure_interval] {
            if validate_interval(TaskId::DataAcquisition, interval).is_err() {
                return Err(Error::Config("measurement timing out of range"));
            }
        }
        if self.conversion_time >= self.measure_interval {
            return Err(Error::Config("conversion slower than measure interval"));
        }
        if !TxPower::is_valid_level(self.tx_power) {
            return Err(Error::Config("tx power bias bits missing"));
        }
        Ok(())
    }

    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
        Ok(postcard::to_slice(self, buf)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let config: Self = postcard::from_bytes(bytes)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            adv_interval: ticks::INTERVAL_10_SEC,
            channels: ChannelMap::ALL,
            tx_power: TxPower::Plus4Dbm.level(),
            first_measurement: ticks::INTERVAL_10_MS,
            conversion_time: ticks::INTERVAL_200_MS,
            measure_interval: ticks::INTERVAL_1_MIN,
            manufacturer_id: 0xCAFE,
        }
    }
}
