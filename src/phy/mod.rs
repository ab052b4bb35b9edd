//! Radio PHY: owns the transceiver, loads advertising packets and walks the
//! active channels inside the radio completion interrupt.
//!
//! ```text
//!   scheduler ADV tick ──▶ start_tx() ──▶ [TX ch37] ──▶ IRQ: next = ch38
//!                                                        │ retry FIFO
//!                         back-to-back: TX from IRQ ◀────┤
//!                         interval:     TX from scheduler┘
//!   ... last channel ──▶ IRQ: event done, restore first channel
//! ```

mod channel;
pub mod pdu;

pub use channel::{AdvChannel, ChannelMap};

use log::{trace, warn};

use crate::address::DeviceAddress;
use crate::config::PacketSpacing;
use crate::error::{Error, Fault, Result};
use crate::events::Signals;
use crate::ports::{EndCause, PhyConfig, RadioCommand, RadioIrq, RadioPort};
use pdu::{FifoFrame, MAX_PAYLOAD};

/// Polls of the task-done flag after a graceful stop before aborting.
const STOP_POLL_LIMIT: u32 = 10_000;

/// Supported TXPOWER register settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxPower {
    Plus4Dbm   = 0xE5,
    Plus0Dbm   = 0xA5,
    Minus6Dbm  = 0x65,
    Minus12Dbm = 0x45,
    Minus15Dbm = 0x25,
    Minus20Dbm = 0x05,
}

impl TxPower {
    /// Bias-control bits that every TXPOWER value must carry.
    const BIAS_BITS: u8 = 0x05;

    pub const fn level(self) -> u8 {
        self as u8
    }

    pub const fn is_valid_level(level: u8) -> bool {
        level & Self::BIAS_BITS == Self::BIAS_BITS
    }
}

/// Which interrupt routine the radio vector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyMode {
    Broadcast,
    DirectTest,
}

/// Radio PHY state plus the owning radio handle.
pub struct Phy<R> {
    radio: R,
    channels: ChannelMap,
    address: Option<DeviceAddress>,
    advertise_flags: bool,
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
    mode: PhyMode,
    packets_sent: u32,
    adv_events: u32,
}

impl<R: RadioPort> Phy<R> {
    pub fn new(radio: R, advertise_flags: bool) -> Self {
        Self {
            radio,
            channels: ChannelMap::ALL,
            address: None,
            advertise_flags,
            payload: heapless::Vec::new(),
            mode: PhyMode::Broadcast,
            packets_sent: 0,
            adv_events: 0,
        }
    }

    /// Force the radio idle and wipe every piece of radio-local state.
    pub fn reset(&mut self) {
        self.radio.set_irq_enabled(false);

        if self.radio.is_enabled() && !self.radio.is_idle() {
            self.radio.strobe(RadioCommand::Stop);
            if !self.poll_task_done() {
                warn!("PHY: graceful stop timed out, aborting");
                self.radio.strobe(RadioCommand::Shutdown);
            }
        }

        self.radio.clear_irq_flags(RadioIrq::ALL);
        self.radio.clear_interrupt();
        self.radio.strobe(RadioCommand::TxFifoReset);
        self.radio.clear_ram();
        self.radio.set_end_cause(EndCause::Undefined);
    }

    fn poll_task_done(&self) -> bool {
        for _ in 0..STOP_POLL_LIMIT {
            if self.radio.irq_flags().contains(RadioIrq::TASK_DONE) {
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }

    /// Reset and program the BLE advertising configuration.
    pub fn init(&mut self, tx_power: u8) {
        self.reset();
        self.radio.configure(&PhyConfig::ADVERTISING);
        self.radio.set_tx_power(tx_power);
        self.radio.set_enabled(true);
        self.radio.set_irq_mask(RadioIrq::TASK_DONE);
        self.radio.set_irq_enabled(true);
        self.mode = PhyMode::Broadcast;
        self.program_channel(self.channels.first());
    }

    pub fn set_address(&mut self, address: DeviceAddress) {
        self.address = Some(address);
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn set_channel(&mut self, channel: AdvChannel) -> Result<()> {
        if self.radio.is_transceiving() {
            return Err(Error::RadioBusy);
        }
        self.program_channel(channel);
        Ok(())
    }

    fn program_channel(&mut self, channel: AdvChannel) {
        self.radio.set_frequency(channel.frequency_register());
        self.radio.set_whitening_init(channel.whitening_init());
    }

    /// Replace the active set and park the radio on its first channel.
    pub fn set_channels(&mut self, channels: ChannelMap) -> Result<()> {
        self.set_channel(channels.first())?;
        self.channels = channels;
        Ok(())
    }

    pub fn channels(&self) -> ChannelMap {
        self.channels
    }

    /// Frame `payload` and write it into a freshly reset TX FIFO.
    pub fn load_packet(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::InvalidArgument);
        }
        if !self.radio.is_idle() {
            return Err(Error::RadioBusy);
        }
        let address = self.address.ok_or(Error::InvalidAddress)?;
        let frame = pdu::adv_nonconn_ind(&address, payload, self.advertise_flags)?;

        self.radio.strobe(RadioCommand::TxFifoReset);
        self.write_frame(&frame);
        self.payload.clear();
        let _ = self.payload.extend_from_slice(payload);
        Ok(())
    }

    fn write_frame(&mut self, frame: &FifoFrame) {
        for byte in frame {
            self.radio.write_fifo(*byte);
        }
    }

    /// Last payload handed to [`load_packet`](Self::load_packet).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_output_power(&mut self, level: u8, signals: &Signals) -> Result<()> {
        if !TxPower::is_valid_level(level) {
            return Err(Error::InvalidArgument);
        }
        if !signals.tx_done() {
            return Err(Error::RadioBusy);
        }
        self.radio.set_tx_power(level);
        Ok(())
    }

    pub fn output_power(&self) -> u8 {
        self.radio.tx_power()
    }

    /// The timer interrupt can run before the main loop has re-enabled the
    /// link-layer engine after PM2; TX needs it clocked.
    pub fn start_tx(&mut self) {
        if !self.radio.is_enabled() {
            self.radio.set_enabled(true);
        }
        self.radio.strobe(RadioCommand::Tx);
    }

    /// Link-layer engine finished whatever it was doing.
    pub fn is_idle(&self) -> bool {
        self.radio.is_idle()
    }

    /// Gate the link-layer engine around deep sleep.
    pub fn set_lle_enabled(&mut self, enabled: bool) {
        self.radio.set_enabled(enabled);
    }

    pub fn mode(&self) -> PhyMode {
        self.mode
    }

    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    pub fn adv_events(&self) -> u32 {
        self.adv_events
    }

    // ═══════════════════════════════════════════════════════════════
    //  Radio interrupt
    // ═══════════════════════════════════════════════════════════════

    pub fn on_interrupt(&mut self, signals: &Signals, spacing: PacketSpacing) -> core::result::Result<(), Fault> {
        match self.mode {
            PhyMode::Broadcast => self.on_broadcast_interrupt(signals, spacing),
            PhyMode::DirectTest => self.on_test_interrupt(),
        }
    }

    fn on_broadcast_interrupt(&mut self, signals: &Signals, spacing: PacketSpacing) -> core::result::Result<(), Fault> {
        let flags = self.radio.irq_flags();
        self.radio.clear_interrupt();

        let mut retransmit = false;
        if flags.contains(RadioIrq::TASK_DONE) {
            let cause = self.radio.end_cause();
            if cause != EndCause::Ok {
                return Err(Fault::RadioTaskFailed(cause.code()));
            }

            if flags.contains(RadioIrq::TX_DONE) {
                self.packets_sent = self.packets_sent.wrapping_add(1);
                let current = AdvChannel::from_frequency_register(self.radio.frequency());
                if let Some(next) = current.and_then(|c| self.channels.next_after(c)) {
                    self.program_channel(next);
                    retransmit = true;
                }
            }
            self.radio.clear_irq_flags(RadioIrq::TASK_DONE.union(RadioIrq::TX_DONE));
            self.radio.set_end_cause(EndCause::Undefined);
        }

        // The FIFO entry is released after every TX; re-arm it unconditionally.
        self.radio.strobe(RadioCommand::TxFifoRetry);

        if retransmit {
            match spacing {
                PacketSpacing::BackToBack => {
                    signals.set_tx_done(false);
                    self.radio.strobe(RadioCommand::Tx);
                }
                PacketSpacing::Interval => signals.set_tx_done(true),
            }
        } else {
            self.program_channel(self.channels.first());
            signals.set_tx_done(true);
            signals.set_adv_event_done(true);
            self.adv_events = self.adv_events.wrapping_add(1);
            trace!("PHY: advertising event {} complete", self.adv_events);
        }

        signals.disarm_sleep();
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    //  Direct test mode
    // ═══════════════════════════════════════════════════════════════

    /// Reconfigure for an LE transmitter test and start repeating `frame`.
    pub fn enter_test_mode(&mut self, freq: u8, frame: &FifoFrame) {
        self.reset();
        self.radio.configure(&PhyConfig::DIRECT_TEST);
        self.write_frame(frame);
        self.radio.set_frequency(freq);
        self.radio.set_enabled(true);
        self.radio.set_irq_mask(RadioIrq::TX_DONE);
        self.radio.set_irq_enabled(true);
        self.mode = PhyMode::DirectTest;
        self.radio.strobe(RadioCommand::Tx);
    }

    /// Each test packet needs the FIFO re-armed before the next timer event.
    fn on_test_interrupt(&mut self) -> core::result::Result<(), Fault> {
        let flags = self.radio.irq_flags();
        self.radio.clear_interrupt();
        if !flags.contains(RadioIrq::TX_DONE) {
            return Err(Fault::TestModeInterrupt);
        }
        self.radio.clear_irq_flags(RadioIrq::TX_DONE);
        self.radio.strobe(RadioCommand::TxFifoRetry);
        self.packets_sent = self.packets_sent.wrapping_add(1);
        Ok(())
    }

    /// Leave test mode and restore the broadcast configuration, reloading
    /// the last advertising payload.
    pub fn exit_test_mode(&mut self, tx_power: u8) -> Result<()> {
        let payload = self.payload.clone();
        self.init(tx_power);
        if self.address.is_some() {
            self.load_packet(&payload)?;
        }
        Ok(())
    }
}
