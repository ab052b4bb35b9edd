//! Sleep-timer tick domain.
//!
//! The sleep timer is a 24-bit free-running counter clocked from the
//! calibrated 32 kHz RC oscillator (32 753 ticks per second). Every interval
//! in the stack is expressed in these ticks and must stay below
//! [`TICK_MAX`], which is also the wraparound point (~8.5 minutes).

/// Largest value the 24-bit counter can hold.
pub const TICK_MAX: u32 = 0x00FF_FFFF;

/// Calibrated RC oscillator rate.
pub const TICKS_PER_SECOND: u32 = 32_753;

pub const INTERVAL_1_MS: u32 = 32;
pub const INTERVAL_2_MS: u32 = 65;
pub const INTERVAL_4_MS: u32 = 131;
pub const INTERVAL_9_MS: u32 = 294;
pub const INTERVAL_10_MS: u32 = 327;
pub const INTERVAL_20_MS: u32 = 655;
pub const INTERVAL_100_MS: u32 = 3_275;
pub const INTERVAL_200_MS: u32 = 6_550;
pub const INTERVAL_1_SEC: u32 = 32_753;
pub const INTERVAL_10_SEC: u32 = 327_530;
pub const INTERVAL_10_24_SEC: u32 = 335_391;
pub const INTERVAL_1_MIN: u32 = 1_965_180;
pub const INTERVAL_MAX: u32 = TICK_MAX;

/// Shortest interval any task may use.
pub const INTERVAL_MIN: u32 = INTERVAL_1_MS;

/// Legal BLE advertising interval range for the advertise task.
pub const ADV_INTERVAL_MIN: u32 = INTERVAL_100_MS;
pub const ADV_INTERVAL_MAX: u32 = INTERVAL_10_24_SEC;

/// Ticks elapsed from `prev` to `now` across at most one wraparound.
///
/// Always in `0..=TICK_MAX`.
#[inline]
pub const fn elapsed(prev: u32, now: u32) -> u32 {
    let prev = prev & TICK_MAX;
    let now = now & TICK_MAX;
    if now >= prev {
        now - prev
    } else {
        (TICK_MAX - prev) + now + 1
    }
}

/// Ticks left from `now` until the counter reaches `target`, not counting
/// the matching tick itself. Zero once `target` is reached.
#[inline]
pub const fn remaining(now: u32, target: u32) -> u32 {
    let now = now & TICK_MAX;
    let target = target & TICK_MAX;
    if now > target {
        TICK_MAX - now + target
    } else if now == target {
        0
    } else {
        target - now - 1
    }
}

/// `base + offset` in the 24-bit domain.
#[inline]
pub const fn add(base: u32, offset: u32) -> u32 {
    base.wrapping_add(offset) & TICK_MAX
}

/// Convert milliseconds to ticks, rounding down.
pub const fn from_millis(ms: u32) -> u32 {
    ((ms as u64 * TICKS_PER_SECOND as u64) / 1_000) as u32
}

/// Convert nanoseconds to ticks, rounding up so a delay never ends early.
pub const fn from_nanos_ceil(ns: u32) -> u32 {
    let ticks = (ns as u64 * TICKS_PER_SECOND as u64).div_ceil(1_000_000_000);
    ticks as u32
}

/// Convert ticks to milliseconds, rounding down.
pub const fn to_millis(ticks: u32) -> u32 {
    ((ticks as u64 * 1_000) / TICKS_PER_SECOND as u64) as u32
}
