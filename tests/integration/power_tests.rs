//! Power-mode selection and RC oscillator calibration.

use minible::ports::PowerMode;
use minible::sim::SimChip;
use minible::ticks::{INTERVAL_1_SEC, INTERVAL_100_MS};
use minible::{AdvChannel, MiniBleConfig, TaskId};

use crate::harness;

fn power_saving() -> MiniBleConfig {
    MiniBleConfig {
        power_saving: true,
        ..MiniBleConfig::default()
    }
}

#[test]
fn default_config_never_enters_pm2() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();
    harness::run_until(&chip, &ble, u64::from(INTERVAL_1_SEC) * 2 + 400);

    assert_eq!(chip.power_mode_entries(PowerMode::Sleep), 0);
    assert!(chip.power_mode_entries(PowerMode::Idle) > 0);
    assert_eq!(chip.transmissions().len(), 6);
}

#[test]
fn power_saving_sleeps_between_events() {
    let (chip, ble) = harness::build(SimChip::new(), power_saving());
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();

    let end = u64::from(INTERVAL_1_SEC) * 3 + u64::from(INTERVAL_1_SEC) / 2;
    let events = harness::run_until(&chip, &ble, end);
    assert_eq!(harness::count(&events, TaskId::Advertise), 3);

    // PM2 between events, PM0 while a packet is on air.
    assert!(chip.power_mode_entries(PowerMode::Sleep) >= 3);
    assert!(chip.power_mode_entries(PowerMode::Idle) > 0);
    assert!(chip.radio_enabled());

    let log = chip.transmissions();
    assert_eq!(log.len(), 9);
    let adv_events = harness::group_events(&log, AdvChannel::Ch37);
    for event in &adv_events {
        let channels: Vec<_> = event.iter().filter_map(|tx| tx.channel()).collect();
        assert_eq!(channels, [AdvChannel::Ch37, AdvChannel::Ch38, AdvChannel::Ch39]);
    }
    assert_eq!(ble.stats().packets_sent, 9);
}

#[test]
fn power_saving_runs_calibration_across_one_wake() {
    let (chip, ble) = harness::build(SimChip::new(), power_saving());
    ble.set_task_interval(TaskId::Calibration, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::DataAcquisition).unwrap();
    ble.enable_task(TaskId::Calibration).unwrap();

    while !ble.wait_for_next_event().contains(TaskId::Calibration) {}
    assert!(chip.lf_auto_calibration());
    assert_eq!(chip.lf_calibrations(), 1);

    // The next wakeup switches automatic calibration off again.
    let events = ble.wait_for_next_event();
    assert!(events.contains(TaskId::DataAcquisition));
    assert!(!chip.lf_auto_calibration());
    assert_eq!(chip.lf_calibrations(), 1);

    let stats = ble.stats();
    assert_eq!(stats.calibrations, 1);
    assert_eq!(stats.deferred_calibrations, 0);
}

#[test]
fn calibration_without_power_saving_is_one_shot() {
    let (chip, ble) = harness::default_stack();
    ble.enable_task(TaskId::Calibration).unwrap();
    let events = harness::run_until(&chip, &ble, u64::from(INTERVAL_100_MS) * 3);
    assert_eq!(harness::count(&events, TaskId::Calibration), 3);
    assert_eq!(chip.lf_calibrations(), 3);
    assert!(!chip.lf_auto_calibration());
}
