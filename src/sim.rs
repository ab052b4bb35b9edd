//! Host simulator implementing the four ports over a virtual tick clock.
//!
//! Time only moves when the CPU waits: [`CpuPort::enter`] jumps to the next
//! hardware event, [`CpuPort::relax`] steps one tick and the ISR latency
//! option delays every dispatch. Everything the radio puts on air is logged
//! as a [`Transmission`] so tests can assert on channel order and timing.
//!
//! ```text
//!   SimChip ──┬── SimRadio  (LLE, FIFO, TX completion, DTM repeat)
//!             ├── SimTimer  (24-bit counter, compare → flag)
//!             ├── SimClock  (LFSR RNG, calibration counters)
//!             └── SimCpu    (power modes, interrupt delivery, halt)
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::MiniBleConfig;
use crate::error::{Fault, Result};
use crate::minible::MiniBle;
use crate::phy::AdvChannel;
use crate::ports::{
    ClockPort, CpuPort, EndCause, Interrupt, PhyConfig, PowerMode, RadioCommand, RadioIrq, RadioPort, SleepTimerPort,
};

const COUNTER_SPAN: u64 = 1 << 24;
const COUNTER_MASK: u64 = COUNTER_SPAN - 1;

/// Air time of one advertising packet, ticks (~370 µs).
pub const DEFAULT_TX_DURATION: u32 = 12;

/// Timer-2 period between direct-test packets (1.25 ms).
pub const DTM_REPEAT_PERIOD: u32 = 41;

/// Compares armed closer than this to the counter may be missed on silicon.
const MIN_COMPARE_LEAD: u64 = 5;

/// The simulated instance the tests drive.
pub type SimMiniBle = MiniBle<SimRadio, SimTimer, SimClock, SimCpu>;

// ═══════════════════════════════════════════════════════════════
//  Transmission log
// ═══════════════════════════════════════════════════════════════

/// One packet the radio put on air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Absolute start tick.
    pub at: u64,
    pub frequency: u8,
    pub whitening_init: u8,
    pub tx_power: u8,
    /// Sent with the direct-test configuration.
    pub test_mode: bool,
    /// FIFO entry without its length prefix.
    pub frame: Vec<u8>,
}

impl Transmission {
    pub fn channel(&self) -> Option<AdvChannel> {
        AdvChannel::from_frequency_register(self.frequency)
    }

    /// AdvA, LSB first. Empty for test packets.
    pub fn adv_address(&self) -> &[u8] {
        if self.test_mode { &[] } else { self.frame.get(2..8).unwrap_or(&[]) }
    }

    /// Everything after AdvA (flags AD included when enabled).
    pub fn adv_data(&self) -> &[u8] {
        if self.test_mode { &[] } else { self.frame.get(8..).unwrap_or(&[]) }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Shared chip state
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct TimerState {
    /// Absolute tick of the next compare match.
    hit_at: Option<u64>,
    irq_enabled: bool,
    flag: bool,
    margin_violations: u32,
}

#[derive(Debug)]
struct RadioState {
    lle_enabled: bool,
    irq_enabled: bool,
    irq_mask: RadioIrq,
    flags: RadioIrq,
    /// CPU-side interrupt request.
    line: bool,
    end_cause: EndCause,
    injected_cause: Option<EndCause>,
    config: Option<PhyConfig>,
    frequency: u8,
    whitening_init: u8,
    tx_power: u8,
    fifo: Vec<u8>,
    /// A complete entry is in the FIFO and has not been sent yet.
    packet_ready: bool,
    tx_started: u64,
    busy_until: Option<u64>,
    ignored_strobes: u32,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            lle_enabled: false,
            irq_enabled: false,
            irq_mask: RadioIrq::NONE,
            flags: RadioIrq::NONE,
            line: false,
            end_cause: EndCause::Undefined,
            injected_cause: None,
            config: None,
            frequency: 0,
            whitening_init: 0,
            tx_power: 0,
            fifo: Vec::new(),
            packet_ready: false,
            tx_started: 0,
            busy_until: None,
            ignored_strobes: 0,
        }
    }
}

#[derive(Debug)]
struct ClockState {
    lfsr: u16,
    fixed_random: Option<u8>,
    unique_id: [u8; 6],
    calibrations: u32,
    auto_calibration: bool,
}

#[derive(Debug, Default)]
struct CpuState {
    priorities_configured: bool,
    idle_entries: u32,
    sleep_entries: u32,
}

#[derive(Debug)]
struct SimCore {
    now: u64,
    tx_duration: u32,
    isr_latency: u32,
    timer: TimerState,
    radio: RadioState,
    clock: ClockState,
    cpu: CpuState,
    transmissions: Vec<Transmission>,
}

impl SimCore {
    fn counter(&self) -> u32 {
        (self.now & COUNTER_MASK) as u32
    }

    fn repeating(&self) -> bool {
        self.radio.config.is_some_and(|c| c.timer_repeat)
    }

    // ── Event processing ──────────────────────────────────────

    fn next_event(&self, include_disabled_timer: bool) -> Option<u64> {
        let timer = self.timer.hit_at.filter(|_| include_disabled_timer || self.timer.irq_enabled);
        match (timer, self.radio.busy_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Move the clock to `target`, firing every hardware event on the way.
    fn advance_to(&mut self, target: u64) {
        while let Some(at) = self.next_event(true).filter(|at| *at <= target) {
            self.now = at;
            if self.timer.hit_at == Some(at) {
                self.timer.flag = true;
                self.timer.hit_at = Some(at + COUNTER_SPAN);
            }
            if self.radio.busy_until == Some(at) {
                self.complete_tx();
            }
        }
        self.now = self.now.max(target);
    }

    fn start_tx(&mut self) {
        let radio = &mut self.radio;
        if !radio.lle_enabled || radio.busy_until.is_some() {
            radio.ignored_strobes += 1;
            return;
        }
        radio.tx_started = self.now;
        radio.busy_until = Some(self.now + u64::from(self.tx_duration));
    }

    /// Log the FIFO entry as sent, if there is one to send.
    fn capture(&mut self, started: u64) -> bool {
        let radio = &mut self.radio;
        if !radio.packet_ready {
            return false;
        }
        radio.packet_ready = false;
        self.transmissions.push(Transmission {
            at: started,
            frequency: radio.frequency,
            whitening_init: radio.whitening_init,
            tx_power: radio.tx_power,
            test_mode: radio.config.is_some_and(|c| c.timer_repeat),
            frame: radio.fifo.get(1..).unwrap_or(&[]).to_vec(),
        });
        true
    }

    fn complete_tx(&mut self) {
        let started = self.radio.tx_started;
        let transmitted = self.capture(started);

        if self.repeating() {
            // Timer-driven: the next packet starts one period after this one.
            if transmitted {
                self.radio.flags = self.radio.flags.union(RadioIrq::TX_DONE);
            }
            let next = started + u64::from(DTM_REPEAT_PERIOD);
            self.radio.tx_started = next;
            self.radio.busy_until = Some(next + u64::from(self.tx_duration));
        } else {
            let radio = &mut self.radio;
            radio.busy_until = None;
            radio.flags = radio.flags.union(RadioIrq::TASK_DONE);
            if transmitted {
                radio.flags = radio.flags.union(RadioIrq::TX_DONE);
                radio.end_cause = radio.injected_cause.take().unwrap_or(EndCause::Ok);
            } else {
                radio.end_cause = EndCause::TxUnderflow;
            }
        }
        self.raise_radio_line();
    }

    fn raise_radio_line(&mut self) {
        if self.radio.flags.0 & self.radio.irq_mask.0 != 0 {
            self.radio.line = true;
        }
    }

    fn stop_radio(&mut self, graceful: bool) {
        let radio = &mut self.radio;
        if radio.busy_until.take().is_none() {
            return;
        }
        if graceful {
            radio.flags = radio.flags.union(RadioIrq::TASK_DONE);
            radio.end_cause = EndCause::Aborted;
            self.raise_radio_line();
        }
    }

    fn write_fifo(&mut self, byte: u8) {
        let radio = &mut self.radio;
        radio.fifo.push(byte);
        if radio.fifo.len() == usize::from(radio.fifo[0]) + 1 {
            radio.packet_ready = true;
        }
    }

    // ── Interrupt delivery ────────────────────────────────────

    /// Radio outranks the sleep timer.
    fn deliverable(&self) -> Option<Interrupt> {
        if self.radio.irq_enabled && self.radio.line {
            Some(Interrupt::Radio)
        } else if self.timer.irq_enabled && self.timer.flag {
            Some(Interrupt::SleepTimer)
        } else {
            None
        }
    }

    fn random_byte(&mut self) -> u8 {
        if let Some(byte) = self.clock.fixed_random {
            return byte;
        }
        // CRC-16 LFSR, x^16 + x^15 + x^2 + 1.
        let mut s = self.clock.lfsr;
        for _ in 0..8 {
            let msb = s & 0x8000 != 0;
            s <<= 1;
            if msb {
                s ^= 0x8005;
            }
        }
        self.clock.lfsr = s;
        (s >> 8) as u8
    }
}

// ═══════════════════════════════════════════════════════════════
//  Chip handle
// ═══════════════════════════════════════════════════════════════

/// A simulated CC2543. Clone-free: hand out the port handles once via
/// [`ports`](Self::ports) or [`build`](Self::build) and keep the chip for
/// inspection.
pub struct SimChip {
    core: Rc<RefCell<SimCore>>,
}

impl SimChip {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start the clock at an absolute tick (useful for wraparound tests).
    pub fn starting_at(tick: u64) -> Self {
        Self {
            core: Rc::new(RefCell::new(SimCore {
                now: tick,
                tx_duration: DEFAULT_TX_DURATION,
                isr_latency: 0,
                timer: TimerState::default(),
                radio: RadioState::default(),
                clock: ClockState {
                    lfsr: 0xACE1,
                    fixed_random: None,
                    unique_id: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
                    calibrations: 0,
                    auto_calibration: false,
                },
                cpu: CpuState::default(),
                transmissions: Vec::new(),
            })),
        }
    }

    pub fn with_unique_id(self, id: [u8; 6]) -> Self {
        self.core.borrow_mut().clock.unique_id = id;
        self
    }

    pub fn with_tx_duration(self, ticks: u32) -> Self {
        self.core.borrow_mut().tx_duration = ticks;
        self
    }

    /// Delay every interrupt dispatch by `ticks`.
    pub fn with_isr_latency(self, ticks: u32) -> Self {
        self.core.borrow_mut().isr_latency = ticks;
        self
    }

    /// Make every RNG read return `byte`.
    pub fn with_fixed_random(self, byte: u8) -> Self {
        self.core.borrow_mut().clock.fixed_random = Some(byte);
        self
    }

    pub fn ports(&self) -> (SimRadio, SimTimer, SimClock, SimCpu) {
        (
            SimRadio { core: Rc::clone(&self.core) },
            SimTimer { core: Rc::clone(&self.core) },
            SimClock { core: Rc::clone(&self.core) },
            SimCpu { core: Rc::clone(&self.core) },
        )
    }

    /// Construct and initialise a stack on this chip.
    pub fn build(&self, config: MiniBleConfig) -> Result<SimMiniBle> {
        let (radio, timer, clock, cpu) = self.ports();
        let ble = MiniBle::new(radio, timer, clock, cpu, config)?;
        ble.init()?;
        Ok(ble)
    }

    // ── Inspection ────────────────────────────────────────────

    /// Absolute tick count since the simulation epoch.
    pub fn now(&self) -> u64 {
        self.core.borrow().now
    }

    /// What the 24-bit counter reads.
    pub fn counter(&self) -> u32 {
        self.core.borrow().counter()
    }

    /// Let time pass without the CPU running; interrupts stay pending.
    pub fn advance(&self, ticks: u64) {
        let mut core = self.core.borrow_mut();
        let target = core.now + ticks;
        core.advance_to(target);
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        self.core.borrow().transmissions.clone()
    }

    pub fn take_transmissions(&self) -> Vec<Transmission> {
        core::mem::take(&mut self.core.borrow_mut().transmissions)
    }

    /// Report `cause` instead of success when the next packet finishes.
    pub fn inject_end_cause(&self, cause: EndCause) {
        self.core.borrow_mut().radio.injected_cause = Some(cause);
    }

    /// Compares armed fewer than five ticks ahead of the counter.
    pub fn compare_margin_violations(&self) -> u32 {
        self.core.borrow().timer.margin_violations
    }

    pub fn timer_interrupt_enabled(&self) -> bool {
        self.core.borrow().timer.irq_enabled
    }

    pub fn radio_enabled(&self) -> bool {
        self.core.borrow().radio.lle_enabled
    }

    pub fn radio_idle(&self) -> bool {
        self.core.borrow().radio.busy_until.is_none()
    }

    /// Advertising channel the radio is tuned to, if any.
    pub fn tuned_channel(&self) -> Option<AdvChannel> {
        AdvChannel::from_frequency_register(self.core.borrow().radio.frequency)
    }

    /// TX strobes dropped because the engine was off or busy.
    pub fn ignored_strobes(&self) -> u32 {
        self.core.borrow().radio.ignored_strobes
    }

    pub fn power_mode_entries(&self, mode: PowerMode) -> u32 {
        let cpu = &self.core.borrow().cpu;
        match mode {
            PowerMode::Idle => cpu.idle_entries,
            PowerMode::Sleep => cpu.sleep_entries,
        }
    }

    pub fn interrupt_priorities_configured(&self) -> bool {
        self.core.borrow().cpu.priorities_configured
    }

    pub fn lf_calibrations(&self) -> u32 {
        self.core.borrow().clock.calibrations
    }

    pub fn lf_auto_calibration(&self) -> bool {
        self.core.borrow().clock.auto_calibration
    }
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Port handles
// ═══════════════════════════════════════════════════════════════

pub struct SimRadio {
    core: Rc<RefCell<SimCore>>,
}

impl RadioPort for SimRadio {
    fn is_enabled(&self) -> bool {
        self.core.borrow().radio.lle_enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        let mut core = self.core.borrow_mut();
        if !enabled {
            core.stop_radio(false);
        }
        core.radio.lle_enabled = enabled;
    }

    fn is_idle(&self) -> bool {
        self.core.borrow().radio.busy_until.is_none()
    }

    fn is_transceiving(&self) -> bool {
        self.core.borrow().radio.busy_until.is_some()
    }

    fn strobe(&mut self, command: RadioCommand) {
        let mut core = self.core.borrow_mut();
        match command {
            RadioCommand::Tx => core.start_tx(),
            RadioCommand::Stop => core.stop_radio(true),
            RadioCommand::Shutdown => core.stop_radio(false),
            RadioCommand::TxFifoReset => {
                core.radio.fifo.clear();
                core.radio.packet_ready = false;
            }
            RadioCommand::TxFifoRetry => {
                let complete = core.radio.fifo.first().is_some_and(|len| core.radio.fifo.len() == usize::from(*len) + 1);
                core.radio.packet_ready = complete;
            }
        }
    }

    fn irq_flags(&self) -> RadioIrq {
        self.core.borrow().radio.flags
    }

    fn clear_irq_flags(&mut self, flags: RadioIrq) {
        let radio = &mut self.core.borrow_mut().radio;
        radio.flags = RadioIrq(radio.flags.0 & !flags.0);
    }

    fn clear_interrupt(&mut self) {
        self.core.borrow_mut().radio.line = false;
    }

    fn set_irq_mask(&mut self, mask: RadioIrq) {
        self.core.borrow_mut().radio.irq_mask = mask;
    }

    fn set_irq_enabled(&mut self, enabled: bool) {
        self.core.borrow_mut().radio.irq_enabled = enabled;
    }

    fn end_cause(&self) -> EndCause {
        self.core.borrow().radio.end_cause
    }

    fn set_end_cause(&mut self, cause: EndCause) {
        self.core.borrow_mut().radio.end_cause = cause;
    }

    fn clear_ram(&mut self) {
        let radio = &mut self.core.borrow_mut().radio;
        radio.frequency = 0;
        radio.whitening_init = 0;
    }

    fn configure(&mut self, config: &PhyConfig) {
        self.core.borrow_mut().radio.config = Some(*config);
    }

    fn frequency(&self) -> u8 {
        self.core.borrow().radio.frequency
    }

    fn set_frequency(&mut self, freq: u8) {
        self.core.borrow_mut().radio.frequency = freq;
    }

    fn set_whitening_init(&mut self, init: u8) {
        self.core.borrow_mut().radio.whitening_init = init;
    }

    fn write_fifo(&mut self, byte: u8) {
        self.core.borrow_mut().write_fifo(byte);
    }

    fn tx_power(&self) -> u8 {
        self.core.borrow().radio.tx_power
    }

    fn set_tx_power(&mut self, level: u8) {
        self.core.borrow_mut().radio.tx_power = level;
    }
}

pub struct SimTimer {
    core: Rc<RefCell<SimCore>>,
}

impl SleepTimerPort for SimTimer {
    fn count(&mut self) -> u32 {
        self.core.borrow().counter()
    }

    fn count_instant(&self) -> u32 {
        self.core.borrow().counter()
    }

    fn set_compare(&mut self, value: u32) {
        let mut core = self.core.borrow_mut();
        let value = u64::from(value) & COUNTER_MASK;
        let lead = match value.wrapping_sub(core.now & COUNTER_MASK) & COUNTER_MASK {
            0 => COUNTER_SPAN,
            lead => lead,
        };
        if lead < MIN_COMPARE_LEAD {
            core.timer.margin_violations += 1;
        }
        core.timer.hit_at = Some(core.now + lead);
    }

    fn set_interrupt_enabled(&mut self, enabled: bool) {
        self.core.borrow_mut().timer.irq_enabled = enabled;
    }

    fn interrupt_pending(&self) -> bool {
        self.core.borrow().timer.flag
    }

    fn clear_interrupt(&mut self) {
        self.core.borrow_mut().timer.flag = false;
    }

    fn trigger_interrupt(&mut self) {
        self.core.borrow_mut().timer.flag = true;
    }
}

pub struct SimClock {
    core: Rc<RefCell<SimCore>>,
}

impl ClockPort for SimClock {
    fn wait_clock_stable(&mut self) {}

    fn start_lf_calibration(&mut self) {
        self.core.borrow_mut().clock.calibrations += 1;
    }

    fn set_lf_calibration(&mut self, enabled: bool) {
        let clock = &mut self.core.borrow_mut().clock;
        if enabled && !clock.auto_calibration {
            clock.calibrations += 1;
        }
        clock.auto_calibration = enabled;
    }

    fn seed_random(&mut self, seed: u16) {
        // An all-zero LFSR never leaves zero.
        self.core.borrow_mut().clock.lfsr = if seed == 0 { 1 } else { seed };
    }

    fn random_byte(&mut self) -> u8 {
        self.core.borrow_mut().random_byte()
    }

    fn unique_id(&self) -> [u8; 6] {
        self.core.borrow().clock.unique_id
    }
}

pub struct SimCpu {
    core: Rc<RefCell<SimCore>>,
}

impl CpuPort for SimCpu {
    fn enter(&mut self, mode: PowerMode, armed: &AtomicBool) {
        let mut core = self.core.borrow_mut();
        if !armed.load(Ordering::Acquire) {
            return;
        }
        match mode {
            PowerMode::Idle => core.cpu.idle_entries += 1,
            PowerMode::Sleep => {
                assert!(
                    !core.radio.lle_enabled && core.radio.busy_until.is_none(),
                    "PM2 entered with the radio active"
                );
                core.cpu.sleep_entries += 1;
            }
        }
        while core.deliverable().is_none() {
            let Some(at) = core.next_event(false) else {
                panic!("power mode entered with no wake source");
            };
            core.advance_to(at);
        }
    }

    fn relax(&mut self) {
        let mut core = self.core.borrow_mut();
        let next = core.now + 1;
        core.advance_to(next);
    }

    fn take_interrupt(&mut self) -> Option<Interrupt> {
        let mut core = self.core.borrow_mut();
        let irq = core.deliverable()?;
        if core.isr_latency > 0 {
            let target = core.now + u64::from(core.isr_latency);
            core.advance_to(target);
        }
        Some(irq)
    }

    fn configure_interrupt_priorities(&mut self) {
        self.core.borrow_mut().cpu.priorities_configured = true;
    }

    fn halt(&mut self, fault: Fault) -> ! {
        panic!("halted: {fault}");
    }
}
