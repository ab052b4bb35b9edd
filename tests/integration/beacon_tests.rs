//! The temperature beacon application running on the simulated stack.

use minible::beacon::{ADV_DATA_LEN, BeaconSensors, BeaconState, READING_OFFSET, TempBeacon};
use minible::sim::SimChip;
use minible::ticks::{INTERVAL_10_MS, INTERVAL_10_SEC, INTERVAL_200_MS};
use minible::{AdvChannel, BeaconConfig, Error, EventMask, MiniBleConfig, TaskId};

use crate::harness;

#[derive(Default)]
struct FakeSensors {
    started: u32,
    reads: u32,
}

impl BeaconSensors for FakeSensors {
    fn start_measurement(&mut self) {
        self.started += 1;
    }

    fn temperature_raw(&mut self) -> u16 {
        self.reads += 1;
        0x0191
    }

    fn battery_raw(&mut self) -> u16 {
        0x02F3
    }
}

#[test]
fn first_reading_is_broadcast_immediately() {
    let (chip, ble) = harness::default_stack();
    let mut beacon = TempBeacon::new(FakeSensors::default(), BeaconConfig::default()).unwrap();
    beacon.start(&ble).unwrap();
    assert_eq!(beacon.state(), BeaconState::Measure);
    assert_eq!(beacon.adv_data().unwrap().name_id(), b"2211");
    assert_eq!(ble.advertising_data().len(), ADV_DATA_LEN);

    // Measurement starts after the first-measurement delay.
    let events = beacon.poll(&ble).unwrap();
    assert_eq!(events, EventMask::from(TaskId::DataAcquisition));
    assert_eq!(chip.now(), u64::from(INTERVAL_10_MS));
    assert_eq!(beacon.state(), BeaconState::ReadSensor);
    assert_eq!(beacon.sensors().started, 1);
    assert!(chip.transmissions().is_empty());

    // The reading lands one conversion time later and goes out at once.
    let read_at = u64::from(INTERVAL_10_MS + INTERVAL_200_MS);
    beacon.poll(&ble).unwrap();
    assert_eq!(beacon.state(), BeaconState::Measure);
    assert_eq!(beacon.sequence(), 1);
    assert_eq!(beacon.sensors().reads, 1);

    let log = chip.transmissions();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].at, read_at);
    let reading = &log[0].adv_data()[READING_OFFSET..READING_OFFSET + 5];
    assert_eq!(reading, [1, 0x01, 0x91, 0x02, 0xF3]);
    assert!(log.iter().all(|tx| tx.adv_data() == log[0].adv_data()));
}

#[test]
fn scheduled_advertising_follows_the_reading() {
    let (chip, ble) = harness::default_stack();
    let mut beacon = TempBeacon::new(FakeSensors::default(), BeaconConfig::default()).unwrap();
    beacon.start(&ble).unwrap();

    beacon.poll(&ble).unwrap();
    beacon.poll(&ble).unwrap();
    // The DAQ reschedule restarts the schedule once the event is over.
    let restart = chip.now();

    while chip.transmissions().len() < 6 || !chip.radio_idle() {
        beacon.poll(&ble).unwrap();
    }

    let log = chip.transmissions();
    let adv_events = harness::group_events(&log, AdvChannel::Ch37);
    assert_eq!(adv_events.len(), 2);
    assert_eq!(adv_events[1][0].at, restart + u64::from(INTERVAL_10_SEC));
    assert_eq!(adv_events[1][0].adv_data(), adv_events[0][0].adv_data());
    assert_eq!(adv_events[1][0].tx_power, BeaconConfig::default().tx_power);

    // No further measurement before the minute is up.
    assert_eq!(beacon.sensors().started, 1);
    assert_eq!(beacon.state(), BeaconState::Measure);
}

#[test]
fn non_daq_events_are_ignored() {
    let (_, ble) = harness::default_stack();
    let mut beacon = TempBeacon::new(FakeSensors::default(), BeaconConfig::default()).unwrap();
    beacon.start(&ble).unwrap();
    beacon.on_events(&ble, EventMask::from(TaskId::Advertise)).unwrap();
    beacon.on_events(&ble, EventMask::EMPTY).unwrap();
    assert_eq!(beacon.state(), BeaconState::Measure);
    assert_eq!(beacon.sensors().started, 0);
}

#[test]
fn invalid_config_is_rejected() {
    let config = BeaconConfig {
        conversion_time: BeaconConfig::default().measure_interval,
        ..BeaconConfig::default()
    };
    assert!(matches!(TempBeacon::new(FakeSensors::default(), config), Err(Error::Config(_))));
}

#[test]
fn start_requires_an_initialised_stack() {
    let chip = SimChip::new();
    let (radio, timer, clock, cpu) = chip.ports();
    let ble = minible::MiniBle::new(radio, timer, clock, cpu, MiniBleConfig::default()).unwrap();
    let mut beacon = TempBeacon::new(FakeSensors::default(), BeaconConfig::default()).unwrap();
    assert_eq!(beacon.start(&ble).err(), Some(Error::InvalidAddress));
    assert!(beacon.adv_data().is_none());
}
