//! Task identifiers, the fired-event bitmask and the ISR ↔ main-loop flags.
//!
//! Events are produced by the sleep-timer and radio interrupts and consumed
//! by the main loop through [`MiniBle::wait_for_next_event`].
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Sleep timer  │────▶│ pending EventMask │────▶│  Main loop   │
//! │ ISR          │     │ (critical section)│     │  (consumer)  │
//! ├──────────────┤     ├───────────────────┤     │              │
//! │ Radio ISR    │────▶│ Signals (atomics) │◀────│ spin / sleep │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! [`MiniBle::wait_for_next_event`]: crate::MiniBle::wait_for_next_event

use core::sync::atomic::{AtomicBool, Ordering};

/// The four fixed scheduler slots, in the priority order they are serviced
/// within one timer interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskId {
    /// Start an advertising event.
    Advertise       = 0,
    /// Application data acquisition; runs in the main loop.
    DataAcquisition = 1,
    /// 32 kHz RC oscillator calibration.
    Calibration     = 2,
    /// One-shot delay backing [`MiniBle::wait`](crate::MiniBle::wait).
    Wait            = 3,
}

impl TaskId {
    pub const COUNT: usize = 4;
    pub const ALL: [Self; Self::COUNT] = [
        Self::Advertise,
        Self::DataAcquisition,
        Self::Calibration,
        Self::Wait,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of tasks that fired since the main loop last looked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, task: TaskId) -> bool {
        self.0 & task.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, task: TaskId) {
        self.0 |= task.bit();
    }

    pub fn remove(&mut self, task: TaskId) {
        self.0 &= !task.bit();
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = TaskId> {
        TaskId::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl From<TaskId> for EventMask {
    fn from(task: TaskId) -> Self {
        Self(task.bit())
    }
}

// ── Spin-waited flags ─────────────────────────────────────────
//
// Plain loads and stores only: the 8051-class and thumbv6m targets have no
// atomic read-modify-write, so any RMW goes through a critical section.

/// Flags shared between the interrupts and the main loop.
#[derive(Debug)]
pub struct Signals {
    /// No advertising event is mid-hop.
    adv_event_done: AtomicBool,
    /// No transmission is in flight.
    adv_tx_done: AtomicBool,
    /// The WAIT task fired.
    wait_complete: AtomicBool,
    /// Main loop is about to enter a power mode; cleared by every ISR.
    sleep_armed: AtomicBool,
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            adv_event_done: AtomicBool::new(true),
            adv_tx_done: AtomicBool::new(true),
            wait_complete: AtomicBool::new(false),
            sleep_armed: AtomicBool::new(false),
        }
    }

    pub fn adv_event_done(&self) -> bool {
        self.adv_event_done.load(Ordering::Acquire)
    }

    pub fn set_adv_event_done(&self, done: bool) {
        self.adv_event_done.store(done, Ordering::Release);
    }

    pub fn tx_done(&self) -> bool {
        self.adv_tx_done.load(Ordering::Acquire)
    }

    pub fn set_tx_done(&self, done: bool) {
        self.adv_tx_done.store(done, Ordering::Release);
    }

    pub fn wait_complete(&self) -> bool {
        self.wait_complete.load(Ordering::Acquire)
    }

    pub fn set_wait_complete(&self, complete: bool) {
        self.wait_complete.store(complete, Ordering::Release);
    }

    pub fn arm_sleep(&self) {
        self.sleep_armed.store(true, Ordering::Release);
    }

    pub fn disarm_sleep(&self) {
        self.sleep_armed.store(false, Ordering::Release);
    }

    /// The flag handed to [`CpuPort::enter`](crate::ports::CpuPort::enter).
    pub fn sleep_flag(&self) -> &AtomicBool {
        &self.sleep_armed
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}
