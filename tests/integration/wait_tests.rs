//! Blocking waits on the one-shot WAIT task.

use embedded_hal::delay::DelayNs;
use minible::ticks::{INTERVAL_1_SEC, INTERVAL_100_MS, INTERVAL_200_MS, INTERVAL_MAX};
use minible::ports::PowerMode;
use minible::{AdvChannel, BleDelay, Error, EventMask, TaskId};

use crate::harness;

/// Scheduling margin of the default configuration.
const MARGIN: u32 = 15;

#[test]
fn wait_keeps_other_tasks_on_cadence() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();
    ble.enable_task(TaskId::DataAcquisition).unwrap();

    let first = ble.wait_for_next_event();
    assert_eq!(first, EventMask::from(TaskId::DataAcquisition));
    let t0 = chip.now();
    assert_eq!(t0, u64::from(INTERVAL_100_MS));

    ble.wait(INTERVAL_200_MS).unwrap();
    let elapsed = chip.now() - t0;
    assert!(elapsed >= u64::from(INTERVAL_200_MS), "returned after {elapsed}");
    assert!(elapsed <= u64::from(INTERVAL_200_MS + MARGIN));
    assert!(!ble.task(TaskId::Wait).enabled);

    // The DAQ ticks that fired during the wait are reported at once.
    let carried = ble.wait_for_next_event();
    assert!(carried.contains(TaskId::DataAcquisition));
    assert!(!carried.contains(TaskId::Wait));
    assert_eq!(chip.now(), t0 + elapsed);

    // And the DAQ cadence continues from where it was.
    let next = ble.wait_for_next_event();
    assert_eq!(next, EventMask::from(TaskId::DataAcquisition));
    assert_eq!(chip.now(), u64::from(INTERVAL_100_MS) * 4);

    harness::run_until(&chip, &ble, u64::from(INTERVAL_1_SEC) * 2 + 400);
    let adv_events = harness::group_events(&chip.transmissions(), AdvChannel::Ch37);
    assert_eq!(adv_events.len(), 2);
    assert_eq!(adv_events[0][0].at, u64::from(INTERVAL_1_SEC));
}

#[test]
fn wait_on_a_stopped_scheduler_leaves_it_stopped() {
    let (chip, ble) = harness::default_stack();
    chip.advance(500);
    ble.wait(INTERVAL_100_MS).unwrap();
    assert_eq!(chip.now(), 500 + u64::from(INTERVAL_100_MS));
    assert!(!ble.is_running());
    assert!(!chip.timer_interrupt_enabled());
    assert!(chip.transmissions().is_empty());
}

#[test]
fn wait_rejects_out_of_range_durations() {
    let (_, ble) = harness::default_stack();
    assert_eq!(ble.wait(0), Err(Error::InvalidArgument));
    assert_eq!(ble.wait(INTERVAL_MAX), Err(Error::InvalidArgument));
    assert!(!ble.is_running());
}

#[test]
fn short_wait_spins_instead_of_sleeping() {
    let (chip, ble) = harness::default_stack();
    ble.wait(8).unwrap();
    assert_eq!(chip.now(), 8);
    assert_eq!(chip.power_mode_entries(PowerMode::Idle), 0);
    assert_eq!(chip.compare_margin_violations(), 0);
    assert!(!chip.timer_interrupt_enabled());
}

#[test]
fn waits_on_a_stopped_scheduler_never_end_early() {
    let (chip, ble) = harness::default_stack();
    for duration in 1..=MARGIN + 5 {
        let before = chip.now();
        ble.wait(duration).unwrap();
        let took = chip.now() - before;
        assert!(took >= u64::from(duration), "wait({duration}) took {took}");
        assert!(!ble.is_running());
    }
    assert_eq!(chip.compare_margin_violations(), 0);
}

#[test]
fn waits_on_a_running_scheduler_never_end_early() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();
    chip.advance(1_000);

    for duration in 1..=MARGIN + 5 {
        let before = chip.now();
        ble.wait(duration).unwrap();
        let took = chip.now() - before;
        assert!(took >= u64::from(duration), "wait({duration}) took {took}");
        assert!(ble.is_running());
        assert!(!ble.task(TaskId::Wait).enabled);
    }

    // A sub-margin DelayNs call is counted out as well.
    let mut delay = BleDelay::new(&ble);
    let before = chip.now();
    delay.delay_us(300);
    assert!(chip.now() - before >= 10);
    assert_eq!(chip.compare_margin_violations(), 0);
    assert!(chip.transmissions().is_empty());
}

#[test]
fn delay_ms_sleeps_through_the_stack() {
    let (chip, ble) = harness::default_stack();
    let mut delay = BleDelay::new(&ble);
    delay.delay_ms(10);
    assert_eq!(chip.now(), 327);

    // Sub-millisecond delays round up to whole ticks.
    delay.delay_us(100);
    let now = chip.now();
    assert!((331..=332).contains(&now), "now {now}");
    assert!(!ble.is_running());
    assert_eq!(chip.compare_margin_violations(), 0);
}
