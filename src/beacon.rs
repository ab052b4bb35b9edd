//! Temperature beacon: the TempSensor application on top of the miniBLE API.
//!
//! ```text
//!   DAQ tick ──▶ Measure ──(start conversion, DAQ = conversion time)──▶ ReadSensor
//!      ▲                                                                   │
//!      └──(read, update payload, seq += 1, DAQ = measure interval)─────────┘
//! ```
//!
//! The first reading is broadcast immediately instead of waiting for the
//! next advertising tick.

use log::{debug, info};

use crate::config::BeaconConfig;
use crate::error::{Error, Result};
use crate::events::{EventMask, TaskId};
use crate::minible::MiniBle;
use crate::ports::{ClockPort, CpuPort, RadioPort, SleepTimerPort};

/// Advertising payload length the beacon uses.
pub const ADV_DATA_LEN: usize = 27;

/// First of the four address characters in the local name.
pub const NAME_ID_OFFSET: usize = 10;

/// Sequence number; temperature and battery follow big-endian.
pub const READING_OFFSET: usize = 21;

/// Sensor access the beacon needs. Board crates wrap the 1-Wire
/// thermometer and the ADC behind this.
pub trait BeaconSensors {
    /// Power the thermometer and start a conversion.
    fn start_measurement(&mut self);

    /// Raw conversion result; powers the thermometer down.
    fn temperature_raw(&mut self) -> u16;

    /// Supply voltage, 10-bit ADC reading of VDD/3.
    fn battery_raw(&mut self) -> u16;
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The 27-byte advertising payload.
///
/// ```text
///  0  02 01 06                      flags
///  3  0A 09 'T' 'e' 'm' 'p' ' ' id  complete local name
/// 14  03 FF mfg_hi mfg_lo           manufacturer specific
/// 18  07 16 00 seq tH tL vH vL      service data (reading)
/// 26  00                            padding
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvData([u8; ADV_DATA_LEN]);

impl AdvData {
    /// Template with the name suffix taken from the last four hex digits
    /// of the device address.
    pub fn new(address_hex: &str, manufacturer_id: u16) -> Self {
        let [mfg_hi, mfg_lo] = manufacturer_id.to_be_bytes();
        let mut data = [
            0x02, 0x01, 0x06, //
            0x0A, 0x09, b'T', b'e', b'm', b'p', b' ', b'0', b'0', b'0', b'0', //
            0x03, 0xFF, mfg_hi, mfg_lo, //
            0x07, 0x16, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
            0x00,
        ];
        if let Some(id) = address_hex.as_bytes().get(8..12) {
            data[NAME_ID_OFFSET..NAME_ID_OFFSET + 4].copy_from_slice(id);
        }
        Self(data)
    }

    pub fn set_reading(&mut self, sequence: u8, temperature: u16, battery: u16) {
        let [t_hi, t_lo] = temperature.to_be_bytes();
        let [v_hi, v_lo] = battery.to_be_bytes();
        self.0[READING_OFFSET..READING_OFFSET + 5].copy_from_slice(&[sequence, t_hi, t_lo, v_hi, v_lo]);
    }

    pub fn sequence(&self) -> u8 {
        self.0[READING_OFFSET]
    }

    pub fn temperature(&self) -> u16 {
        u16::from_be_bytes([self.0[READING_OFFSET + 1], self.0[READING_OFFSET + 2]])
    }

    pub fn battery(&self) -> u16 {
        u16::from_be_bytes([self.0[READING_OFFSET + 3], self.0[READING_OFFSET + 4]])
    }

    /// Four characters after "Temp ".
    pub fn name_id(&self) -> &[u8] {
        &self.0[NAME_ID_OFFSET..NAME_ID_OFFSET + 4]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconState {
    /// Next DAQ tick starts a conversion.
    Measure,
    /// Next DAQ tick reads the finished conversion.
    ReadSensor,
}

pub struct TempBeacon<S> {
    sensors: S,
    config: BeaconConfig,
    state: BeaconState,
    adv: Option<AdvData>,
    sequence: u8,
    first_sent: bool,
}

impl<S: BeaconSensors> TempBeacon<S> {
    pub fn new(sensors: S, config: BeaconConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sensors,
            config,
            state: BeaconState::Measure,
            adv: None,
            sequence: 0,
            first_sent: false,
        })
    }

    pub fn state(&self) -> BeaconState {
        self.state
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Payload currently loaded; `None` before [`start`](Self::start).
    pub fn adv_data(&self) -> Option<&AdvData> {
        self.adv.as_ref()
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    /// Load the template payload, program intervals and channels, and
    /// enable advertising and data acquisition. `ble` must be initialised.
    pub fn start<R, T, C, P>(&mut self, ble: &MiniBle<R, T, C, P>) -> Result<()>
    where
        R: RadioPort,
        T: SleepTimerPort,
        C: ClockPort,
        P: CpuPort,
    {
        let address = ble.device_address().ok_or(Error::InvalidAddress)?;
        let adv = AdvData::new(&address.to_hex(), self.config.manufacturer_id);
        ble.set_advertising_data(adv.as_bytes())?;
        self.adv = Some(adv);
        self.state = BeaconState::Measure;
        self.sequence = 0;
        self.first_sent = false;

        ble.set_output_power(self.config.tx_power)?;
        ble.set_task_interval(TaskId::Advertise, self.config.adv_interval, true)?;
        ble.set_task_interval(TaskId::DataAcquisition, self.config.first_measurement, true)?;
        ble.set_advertising_channels(self.config.channels.bits())?;

        ble.enable_task(TaskId::Advertise)?;
        ble.enable_task(TaskId::DataAcquisition)?;
        info!("Beacon: started as Temp {}", core::str::from_utf8(adv.name_id()).unwrap_or("????"));
        Ok(())
    }

    /// Handle the events returned by one `wait_for_next_event`.
    pub fn on_events<R, T, C, P>(&mut self, ble: &MiniBle<R, T, C, P>, events: EventMask) -> Result<()>
    where
        R: RadioPort,
        T: SleepTimerPort,
        C: ClockPort,
        P: CpuPort,
    {
        if events.contains(TaskId::DataAcquisition) {
            self.acquire(ble)?;
        }
        Ok(())
    }

    /// One main-loop iteration: sleep until the next event and handle it.
    pub fn poll<R, T, C, P>(&mut self, ble: &MiniBle<R, T, C, P>) -> Result<EventMask>
    where
        R: RadioPort,
        T: SleepTimerPort,
        C: ClockPort,
        P: CpuPort,
    {
        let events = ble.wait_for_next_event();
        self.on_events(ble, events)?;
        Ok(events)
    }

    fn acquire<R, T, C, P>(&mut self, ble: &MiniBle<R, T, C, P>) -> Result<()>
    where
        R: RadioPort,
        T: SleepTimerPort,
        C: ClockPort,
        P: CpuPort,
    {
        match self.state {
            BeaconState::Measure => {
                self.sensors.start_measurement();
                ble.set_task_interval(TaskId::DataAcquisition, self.config.conversion_time, true)?;
                self.state = BeaconState::ReadSensor;
            }
            BeaconState::ReadSensor => {
                let temperature = self.sensors.temperature_raw();
                let battery = self.sensors.battery_raw();
                self.sequence = self.sequence.wrapping_add(1);

                let adv = self.adv.get_or_insert_with(|| AdvData::new("", self.config.manufacturer_id));
                adv.set_reading(self.sequence, temperature, battery);

                // DAQ can share a tick with ADV; never swap the payload mid-event.
                ble.wait_for_advertising_event();
                ble.set_advertising_data(adv.as_bytes())?;

                if !self.first_sent {
                    self.first_sent = true;
                    ble.send_advertising_data()?;
                }
                ble.set_task_interval(TaskId::DataAcquisition, self.config.measure_interval, true)?;
                self.state = BeaconState::Measure;
                debug!("Beacon: reading {} temp {:#06X} vbat {}", self.sequence, temperature, battery);
            }
        }
        Ok(())
    }
}
