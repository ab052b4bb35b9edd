//! `embedded-hal` delay backed by the scheduler's one-shot wait.
//!
//! Sensor drivers written against [`DelayNs`] sleep through the stack, so
//! advertising keeps its cadence while they block.

use embedded_hal::delay::DelayNs;
use log::warn;

use crate::minible::MiniBle;
use crate::ports::{ClockPort, CpuPort, RadioPort, SleepTimerPort};
use crate::ticks;

/// Longest single wait issued for `delay_ms`, well inside the 24-bit range.
const MAX_CHUNK_MS: u32 = 60_000;

pub struct BleDelay<'a, R, T, C, P> {
    ble: &'a MiniBle<R, T, C, P>,
}

impl<'a, R, T, C, P> BleDelay<'a, R, T, C, P> {
    pub fn new(ble: &'a MiniBle<R, T, C, P>) -> Self {
        Self { ble }
    }
}

impl<R, T, C, P> BleDelay<'_, R, T, C, P>
where
    R: RadioPort,
    T: SleepTimerPort,
    C: ClockPort,
    P: CpuPort,
{
    /// Sub-tick delays round up to one tick.
    fn wait_ticks(&mut self, ticks: u32) {
        if let Err(e) = self.ble.wait(ticks.max(1)) {
            warn!("Delay: wait of {} ticks refused: {}", ticks, e);
        }
    }
}

impl<R, T, C, P> DelayNs for BleDelay<'_, R, T, C, P>
where
    R: RadioPort,
    T: SleepTimerPort,
    C: ClockPort,
    P: CpuPort,
{
    fn delay_ns(&mut self, ns: u32) {
        self.wait_ticks(ticks::from_nanos_ceil(ns));
    }

    fn delay_ms(&mut self, mut ms: u32) {
        while ms > 0 {
            let chunk = ms.min(MAX_CHUNK_MS);
            self.wait_ticks(ticks::from_millis(chunk));
            ms -= chunk;
        }
    }
}
