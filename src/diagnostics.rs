//! Runtime counters collected from the PHY and the scheduler.
//!
//! Snapshots are taken on demand with [`MiniBle::stats`] and can be
//! serialised for a debug UART or a production-test readout.
//!
//! [`MiniBle::stats`]: crate::MiniBle::stats

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Packets put on air, test packets included.
    pub packets_sent: u32,
    /// Advertising events that ran to their last channel.
    pub adv_events: u32,
    /// Sleep-timer interrupts serviced.
    pub wakeups: u32,
    pub calibrations: u32,
    /// Calibrations moved away from radio activity.
    pub deferred_calibrations: u32,
    /// Advertising ticks dropped because a transmission was still in flight.
    pub skipped_advertisements: u32,
}

impl Diagnostics {
    /// Average packets per completed event; zero before the first event.
    pub fn packets_per_event(&self) -> u32 {
        self.packets_sent.checked_div(self.adv_events).unwrap_or(0)
    }

    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8]> {
        Ok(postcard::to_slice(self, buf)?)
    }
}
