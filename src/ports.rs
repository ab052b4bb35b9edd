//! Port traits: the register-access boundary between the stack and the chip.
//!
//! ```text
//!   MiniBle ──▶ Phy ──▶ RadioPort        (LLE, FIFO, frequency, power)
//!      │
//!      ├──────▶ Scheduler ──▶ SleepTimerPort   (24-bit counter + compare)
//!      ├──────▶ ClockPort                (32 kHz calibration, RNG, die ID)
//!      └──────▶ CpuPort                  (power modes, IRQ priorities, halt)
//! ```
//!
//! Each peripheral has exactly one owning handle. The PHY owns the radio and
//! the scheduler owns the sleep timer, so neither can poke the other's
//! registers; the scheduler asks the PHY to start a transmission.
//!
//! Board support crates implement these over the CC254x SFRs. The host
//! simulator in [`sim`](crate::sim) implements them over a virtual clock.

use core::sync::atomic::AtomicBool;

use crate::error::Fault;

// ───────────────────────────────────────────────────────────────
// Interrupt sources
// ───────────────────────────────────────────────────────────────

/// The fixed set of interrupt vectors the stack services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Sleep-timer compare match (scheduler tick).
    SleepTimer,
    /// Radio "task done" / "TX done" (higher priority).
    Radio,
}

// ───────────────────────────────────────────────────────────────
// Radio port
// ───────────────────────────────────────────────────────────────

/// Link-layer engine command strobes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand {
    /// Start the configured transmit task.
    Tx,
    /// Graceful stop of the running task.
    Stop,
    /// Immediate abort.
    Shutdown,
    /// Discard the TX FIFO contents.
    TxFifoReset,
    /// Re-arm the last transmitted FIFO entry for another transmission.
    TxFifoRetry,
}

/// Radio interrupt flag bits (RFIRQF1 layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioIrq(pub u8);

impl RadioIrq {
    pub const NONE: Self = Self(0);
    pub const TASK_DONE: Self = Self(1 << 1);
    pub const TX_DONE: Self = Self(1 << 5);
    pub const ALL: Self = Self(0xFF);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// How the last link-layer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
    /// Cleared by software before a task runs.
    Undefined,
    /// Task completed normally.
    Ok,
    /// Task aborted by `Shutdown`.
    Aborted,
    /// TX started with no packet in the FIFO.
    TxUnderflow,
    /// Any other hardware-reported cause.
    Other(u8),
}

impl EndCause {
    /// Raw cause code as reported by the link-layer engine.
    pub const fn code(self) -> u8 {
        match self {
            Self::Undefined => 0xFF,
            Self::Ok => 0x00,
            Self::Aborted => 0x05,
            Self::TxUnderflow => 0x2A,
            Self::Other(code) => code,
        }
    }
}

/// Fixed protocol settings programmed by PHY init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyConfig {
    pub sync_word: u32,
    pub sync_word_bits: u8,
    pub crc_len: u8,
    pub crc_init: u32,
    pub crc_poly: u32,
    pub whitening: bool,
    /// Over-the-air bit order (FRMCTRL0).
    pub lsb_first: bool,
    /// Number of link-layer address bytes after the sync word.
    pub address_bytes: u8,
    /// Keep the FIFO entry after TX so `TxFifoRetry` can resend it.
    pub reuse_payload: bool,
    /// Repeat the task on every timer-2 event instead of once per command.
    pub timer_repeat: bool,
    /// 1 Mbps, 250 kHz deviation.
    pub modem_ctrl0: u8,
    /// One leading preamble byte, sync word LSB first.
    pub modem_ctrl2: u8,
    pub tx_filter: u8,
}

impl PhyConfig {
    /// BLE advertising on the primary channels.
    pub const ADVERTISING: Self = Self {
        sync_word: 0x8E89_BED6,
        sync_word_bits: 32,
        crc_len: 3,
        crc_init: 0x0055_5555,
        crc_poly: 0x0006_5B00,
        whitening: true,
        lsb_first: true,
        address_bytes: 0,
        reuse_payload: true,
        timer_repeat: false,
        modem_ctrl0: 0x04,
        modem_ctrl2: 0x00,
        tx_filter: 0x07,
    };

    /// Direct test mode transmitter (LE test packets).
    pub const DIRECT_TEST: Self = Self {
        sync_word: 0x7176_4129,
        whitening: false,
        lsb_first: false,
        timer_repeat: true,
        ..Self::ADVERTISING
    };
}

/// Register-level access to the 2.4 GHz transceiver and its link-layer engine.
pub trait RadioPort {
    /// Link-layer engine clock/enable (LLECTRL).
    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);

    /// The link-layer engine is not running a task.
    fn is_idle(&self) -> bool;

    /// The transceiver is actively sending or receiving (RFSTAT).
    fn is_transceiving(&self) -> bool;

    fn strobe(&mut self, command: RadioCommand);

    fn irq_flags(&self) -> RadioIrq;
    fn clear_irq_flags(&mut self, flags: RadioIrq);
    /// Clear the CPU-side radio interrupt request (S1CON).
    fn clear_interrupt(&mut self);
    fn set_irq_mask(&mut self, mask: RadioIrq);
    fn set_irq_enabled(&mut self, enabled: bool);

    fn end_cause(&self) -> EndCause;
    fn set_end_cause(&mut self, cause: EndCause);

    /// Zero the radio-local RAM (PRF).
    fn clear_ram(&mut self);

    /// Program the fixed protocol configuration.
    fn configure(&mut self, config: &PhyConfig);

    /// Frequency register value, MHz above 2379.
    fn frequency(&self) -> u8;
    fn set_frequency(&mut self, freq: u8);
    fn set_whitening_init(&mut self, init: u8);

    fn write_fifo(&mut self, byte: u8);

    fn tx_power(&self) -> u8;
    fn set_tx_power(&mut self, level: u8);
}

// ───────────────────────────────────────────────────────────────
// Sleep timer port
// ───────────────────────────────────────────────────────────────

/// The 24-bit free-running sleep timer and its single compare channel.
pub trait SleepTimerPort {
    /// Read the counter after waiting for the low-speed clock edge, so the
    /// value is consistent with what the compare logic sees.
    fn count(&mut self) -> u32;

    /// Read the counter without synchronisation.
    fn count_instant(&self) -> u32;

    fn set_compare(&mut self, value: u32);

    fn set_interrupt_enabled(&mut self, enabled: bool);
    fn interrupt_pending(&self) -> bool;
    fn clear_interrupt(&mut self);
    /// Raise the interrupt from software.
    fn trigger_interrupt(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// System clock control, 32 kHz RC calibration, RNG and die identity.
pub trait ClockPort {
    /// Block until a pending system-clock source switch has completed.
    fn wait_clock_stable(&mut self);

    /// Run one ~2 ms calibration of the 32 kHz RC oscillator.
    fn start_lf_calibration(&mut self);

    /// Calibrate the RC oscillator automatically on every wake from PM2.
    fn set_lf_calibration(&mut self, enabled: bool);

    fn seed_random(&mut self, seed: u16);
    fn random_byte(&mut self) -> u8;

    /// Factory-programmed unique die identifier, LSB first.
    fn unique_id(&self) -> [u8; 6];
}

// ───────────────────────────────────────────────────────────────
// CPU port
// ───────────────────────────────────────────────────────────────

/// CPU power modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// PM0: CPU halted, 32 MHz crystal running.
    Idle,
    /// PM2: crystal and digital core powered down, sleep timer running.
    Sleep,
}

/// Core control: power modes, interrupt priorities and the fatal path.
pub trait CpuPort {
    /// Enter `mode`. Implementations must re-check `armed` with interrupts
    /// masked immediately before the sleep instruction and return without
    /// sleeping when it has been cleared by an interrupt.
    fn enter(&mut self, mode: PowerMode, armed: &AtomicBool);

    /// Spin hint used by bounded busy-waits.
    fn relax(&mut self);

    /// Take the next interrupt awaiting service.
    ///
    /// Vectored hardware dispatches interrupts itself and returns `None`.
    /// Polled platforms and the simulator hand them back here so
    /// [`MiniBle`](crate::MiniBle) can route them.
    fn take_interrupt(&mut self) -> Option<Interrupt>;

    /// Radio above sleep timer.
    fn configure_interrupt_priorities(&mut self);

    /// Stop the device after an unrecoverable fault.
    fn halt(&mut self, fault: Fault) -> !;
}
