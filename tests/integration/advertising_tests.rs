//! Advertising events on air: channel order, cadence, payload framing.

use minible::sim::{DEFAULT_TX_DURATION, SimChip};
use minible::ticks::{INTERVAL_1_SEC, INTERVAL_9_MS, INTERVAL_10_MS, INTERVAL_10_SEC};
use minible::{AdvChannel, ChannelMap, Error, MiniBleConfig, PacketSpacing, TaskId};

use crate::harness::{self, PAYLOAD};

// ── Back-to-back events ───────────────────────────────────────

#[test]
fn ten_second_advertising_with_one_second_daq() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_10_SEC, false).unwrap();
    ble.set_task_interval(TaskId::DataAcquisition, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();
    ble.enable_task(TaskId::DataAcquisition).unwrap();

    let end = u64::from(INTERVAL_1_SEC) * 35 + u64::from(INTERVAL_1_SEC) / 2;
    let events = harness::run_until(&chip, &ble, end);

    assert_eq!(harness::count(&events, TaskId::DataAcquisition), 35);
    assert_eq!(harness::count(&events, TaskId::Advertise), 3);

    let log = chip.transmissions();
    assert_eq!(log.len(), 9);
    let adv_events = harness::group_events(&log, AdvChannel::Ch37);
    assert_eq!(adv_events.len(), 3);

    for event in &adv_events {
        let channels: Vec<_> = event.iter().filter_map(|tx| tx.channel()).collect();
        assert_eq!(channels, [AdvChannel::Ch37, AdvChannel::Ch38, AdvChannel::Ch39]);
        assert_eq!(event[1].at - event[0].at, u64::from(DEFAULT_TX_DURATION));
        assert_eq!(event[2].at - event[1].at, u64::from(DEFAULT_TX_DURATION));
    }

    assert_eq!(adv_events[0][0].at, u64::from(INTERVAL_10_SEC));
    for pair in adv_events.windows(2) {
        let gap = pair[1][0].at - pair[0][0].at;
        let min = u64::from(INTERVAL_10_SEC) + 38;
        assert!(gap >= min && gap <= min + 255, "gap {gap}");
        assert!(gap <= u64::from(INTERVAL_10_SEC + INTERVAL_10_MS));
    }

    let stats = ble.stats();
    assert_eq!(stats.adv_events, 3);
    assert_eq!(stats.packets_sent, 9);
    assert_eq!(stats.skipped_advertisements, 0);
    assert_eq!(chip.compare_margin_violations(), 0);
}

#[test]
fn pdu_carries_address_and_payload() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();
    harness::run_until(&chip, &ble, u64::from(INTERVAL_1_SEC) + 100);

    let address = ble.device_address().unwrap();
    let log = chip.transmissions();
    assert_eq!(log.len(), 3);
    for tx in &log {
        assert_eq!(tx.frame[0], 0x42);
        assert_eq!(usize::from(tx.frame[1]), 6 + PAYLOAD.len());
        assert_eq!(tx.adv_address(), address.bytes());
        assert_eq!(tx.adv_data(), PAYLOAD);
        assert_eq!(tx.whitening_init, tx.channel().unwrap().index());
        assert_eq!(tx.tx_power, 0xE5);
    }
}

#[test]
fn static_random_address_has_top_bits_set() {
    let chip = SimChip::new().with_unique_id([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let (_, ble) = harness::build(chip, MiniBleConfig::default());
    let address = ble.device_address().unwrap();
    assert_eq!(address.bytes(), [0x01, 0x02, 0x03, 0x04, 0x05, 0xC6]);
    assert_eq!(address.to_hex().as_str(), "C60504030201");
}

#[test]
fn flags_structure_is_prepended_when_configured() {
    let config = MiniBleConfig {
        advertise_flags: true,
        ..MiniBleConfig::default()
    };
    let (chip, ble) = harness::build(SimChip::new(), config);
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();

    let log = chip.transmissions();
    assert_eq!(log.len(), 3);
    assert_eq!(&log[0].adv_data()[..3], &[0x02, 0x01, 0x06]);
    assert_eq!(&log[0].adv_data()[3..], PAYLOAD);
}

#[test]
fn channel_subset_is_walked_in_order() {
    let (chip, ble) = harness::default_stack();
    ble.set_advertising_channels(ChannelMap::CH37 | ChannelMap::CH39).unwrap();
    assert_eq!(ble.advertising_channels().count(), 2);

    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();
    let channels: Vec<_> = chip.transmissions().iter().filter_map(|tx| tx.channel()).collect();
    assert_eq!(channels, [AdvChannel::Ch37, AdvChannel::Ch39]);

    // Parked back on the first channel for the next event.
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();
    assert_eq!(chip.transmissions()[2].channel(), Some(AdvChannel::Ch37));
}

#[test]
fn single_channel_event() {
    let (chip, ble) = harness::default_stack();
    ble.set_advertising_channels(ChannelMap::CH38).unwrap();
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();
    let log = chip.transmissions();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].channel(), Some(AdvChannel::Ch38));
}

// ── Argument validation ───────────────────────────────────────

#[test]
fn rejects_bad_arguments() {
    let (_, ble) = harness::default_stack();
    assert_eq!(ble.set_advertising_data(&[0u8; 28]), Err(Error::InvalidArgument));
    assert_eq!(ble.set_advertising_channels(0), Err(Error::InvalidArgument));
    assert_eq!(ble.set_advertising_channels(0x08), Err(Error::InvalidArgument));
    assert_eq!(ble.set_output_power(0xE0), Err(Error::InvalidArgument));
    assert_eq!(ble.advertising_channels(), ChannelMap::ALL);
    assert_eq!(ble.advertising_data().as_slice(), PAYLOAD);
}

#[test]
fn output_power_is_applied_to_next_packet() {
    let (chip, ble) = harness::default_stack();
    ble.set_output_power(0x25).unwrap();
    assert_eq!(ble.output_power(), 0x25);
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();
    assert!(chip.transmissions().iter().all(|tx| tx.tx_power == 0x25));
}

#[test]
fn payload_is_locked_while_event_is_on_air() {
    let (chip, ble) = harness::default_stack();
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();

    // The timer interrupt starts the event and returns before the radio
    // has finished the first channel.
    while !ble.wait_for_next_event().contains(TaskId::Advertise) {}
    assert_eq!(ble.set_advertising_data(&[1, 2, 3]), Err(Error::RadioBusy));
    assert_eq!(ble.send_advertising_data(), Err(Error::RadioBusy));
    assert_eq!(ble.set_output_power(0x05), Err(Error::RadioBusy));

    ble.wait_for_advertising_event();
    ble.set_advertising_data(&[1, 2, 3]).unwrap();

    let first_event: Vec<_> = chip.transmissions();
    assert_eq!(first_event.len(), 3);
    assert!(first_event.iter().all(|tx| tx.adv_data() == PAYLOAD));

    harness::run_until(&chip, &ble, chip.now() + u64::from(INTERVAL_1_SEC) + 400);
    let log = chip.transmissions();
    assert_eq!(log.len(), 6);
    assert!(log[3..].iter().all(|tx| tx.adv_data() == [1, 2, 3]));
}

#[test]
fn immediate_send_runs_outside_the_schedule() {
    let (chip, ble) = harness::default_stack();
    assert!(!ble.is_running());
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();

    let log = chip.transmissions();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].at, 0);
    assert_eq!(ble.stats().adv_events, 1);
    assert!(!ble.is_running());
}

// ── Scheduler-spaced hops ─────────────────────────────────────

#[test]
fn interval_spacing_spreads_hops() {
    let config = MiniBleConfig {
        packet_spacing: PacketSpacing::Interval,
        ..MiniBleConfig::default()
    };
    let (chip, ble) = harness::build(SimChip::new(), config);
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();

    let end = u64::from(INTERVAL_1_SEC) * 3 + u64::from(INTERVAL_1_SEC) / 2;
    let events = harness::run_until(&chip, &ble, end);
    // One ADV event per interval, not one per hop.
    assert_eq!(harness::count(&events, TaskId::Advertise), 3);

    let log = chip.transmissions();
    let adv_events = harness::group_events(&log, AdvChannel::Ch37);
    assert_eq!(adv_events.len(), 3);
    for event in &adv_events {
        assert_eq!(event.len(), 3);
        assert_eq!(event[1].at - event[0].at, u64::from(INTERVAL_9_MS));
        assert_eq!(event[2].at - event[1].at, u64::from(INTERVAL_9_MS));
    }
    for pair in adv_events.windows(2) {
        let gap = pair[1][0].at - pair[0][0].at;
        let min = u64::from(INTERVAL_1_SEC) + 38;
        assert!(gap >= min && gap <= min + 255, "gap {gap}");
    }
}

#[test]
fn interval_spacing_abandons_event_on_disable() {
    let config = MiniBleConfig {
        packet_spacing: PacketSpacing::Interval,
        ..MiniBleConfig::default()
    };
    let (chip, ble) = harness::build(SimChip::new(), config);
    ble.set_task_interval(TaskId::Advertise, INTERVAL_1_SEC, false).unwrap();
    ble.enable_task(TaskId::Advertise).unwrap();

    while !ble.wait_for_next_event().contains(TaskId::Advertise) {}
    ble.disable_task(TaskId::Advertise);
    assert!(!ble.is_running());

    // Only the first hop went out; the radio is parked on channel 37 again.
    chip.advance(u64::from(INTERVAL_1_SEC));
    ble.service_interrupts();
    assert_eq!(chip.transmissions().len(), 1);
    assert_eq!(chip.tuned_channel(), Some(AdvChannel::Ch37));
    // Stopped scheduler: the immediate event runs its hops back to back.
    ble.send_advertising_data().unwrap();
    ble.wait_for_advertising_event();
    let log = chip.transmissions();
    assert_eq!(log.len(), 4);
    assert_eq!(log[1].channel(), Some(AdvChannel::Ch37));
    assert_eq!(log[2].at - log[1].at, u64::from(DEFAULT_TX_DURATION));
}
