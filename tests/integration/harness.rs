//! Shared helpers for driving a simulated stack.

use minible::sim::{SimChip, SimMiniBle, Transmission};
use minible::{AdvChannel, EventMask, MiniBleConfig};

pub const PAYLOAD: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// A chip plus an initialised stack with [`PAYLOAD`] loaded.
pub fn build(chip: SimChip, config: MiniBleConfig) -> (SimChip, SimMiniBle) {
    let ble = chip.build(config).expect("stack init");
    ble.set_advertising_data(&PAYLOAD).expect("payload");
    (chip, ble)
}

pub fn default_stack() -> (SimChip, SimMiniBle) {
    build(SimChip::new(), MiniBleConfig::default())
}

/// Run the main loop until the next timer wakeup would land past `until`
/// and the radio is idle, returning every non-empty event mask with the
/// tick it was returned at. Virtual time stops short of `until`.
pub fn run_until(chip: &SimChip, ble: &SimMiniBle, until: u64) -> Vec<(u64, EventMask)> {
    let mut seen = Vec::new();
    loop {
        let next_wakeup = chip.now() + u64::from(ble.time_until_next_event()) + 1;
        if chip.radio_idle() && (!ble.is_running() || next_wakeup > until) {
            break;
        }
        let events = ble.wait_for_next_event();
        if !events.is_empty() {
            seen.push((chip.now(), events));
        }
    }
    seen
}

/// Split the log into advertising events: a new event starts whenever the
/// first active channel comes round again.
pub fn group_events(log: &[Transmission], first: AdvChannel) -> Vec<Vec<Transmission>> {
    let mut events: Vec<Vec<Transmission>> = Vec::new();
    for tx in log {
        if tx.channel() == Some(first) || events.is_empty() {
            events.push(Vec::new());
        }
        if let Some(current) = events.last_mut() {
            current.push(tx.clone());
        }
    }
    events
}

pub fn count(events: &[(u64, EventMask)], task: minible::TaskId) -> usize {
    events.iter().filter(|(_, m)| m.contains(task)).count()
}
