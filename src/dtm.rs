//! Direct Test Mode over the 2-wire UART interface.
//!
//! Command words are two bytes, most significant first:
//!
//! ```text
//!   byte 0: [cmd:2][freq:6]      byte 1: [len:6][type:2]
//!   cmd 0 RESET · 1 RECEIVER_TEST · 2 TRANSMITTER_TEST · 3 TEST_END
//! ```
//!
//! Every command answers with the status event `[0x00, status]`.

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::minible::MiniBle;
use crate::phy::pdu::FifoFrame;
use crate::ports::{ClockPort, CpuPort, RadioPort, SleepTimerPort};

/// Number of LE RF channels a test may use.
pub const NUM_RF_CHANNELS: u8 = 40;

/// Longest LE test packet payload.
pub const MAX_PAYLOAD_LEN: u8 = 37;

/// First 37 bytes of the PRBS9 sequence (x^9 + x^5 + 1, all-ones seed).
pub const PRBS9: [u8; MAX_PAYLOAD_LEN as usize] = [
    0xFF, 0xC1, 0xFB, 0xE8, 0x4C, 0x90, 0x72, 0x8B, 0xE7, 0xB3, 0x51, 0x89, 0x63, 0xAB, 0x23, 0x23, 0x02, 0x84, 0x18,
    0x72, 0xAA, 0x61, 0x2F, 0x3B, 0x51, 0xA8, 0xE5, 0x37, 0x49, 0xFB, 0xC9, 0xCA, 0x0C, 0x18, 0x53, 0x2C, 0xFD,
];

/// Test packet payload patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    Prbs9 = 0,
    /// `11110000`
    Nibbles = 1,
    /// `10101010`
    Alternating = 2,
}

impl PayloadType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Prbs9),
            1 => Some(Self::Nibbles),
            2 => Some(Self::Alternating),
            _ => None,
        }
    }
}

/// Decoded command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmCommand {
    Reset,
    ReceiverTest { frequency: u8 },
    TransmitterTest { frequency: u8, length: u8, payload: PayloadType },
    TestEnd,
}

impl DtmCommand {
    /// Decode and range-check a command word. Parameters of commands other
    /// than the transmitter test are ignored.
    pub fn decode(word: [u8; 2]) -> Result<Self> {
        let frequency = word[0] & 0x3F;
        let length = (word[1] >> 2) & 0x3F;
        match word[0] >> 6 {
            0 => Ok(Self::Reset),
            1 => Ok(Self::ReceiverTest { frequency }),
            2 => {
                let payload = PayloadType::from_bits(word[1] & 0x03).ok_or(Error::InvalidArgument)?;
                if frequency >= NUM_RF_CHANNELS || length > MAX_PAYLOAD_LEN {
                    return Err(Error::InvalidArgument);
                }
                Ok(Self::TransmitterTest { frequency, length, payload })
            }
            _ => Ok(Self::TestEnd),
        }
    }
}

/// Status byte of the command-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DtmStatus {
    Success = 0,
    Failure = 1,
}

impl DtmStatus {
    pub const fn event(self) -> [u8; 2] {
        [0x00, self as u8]
    }
}

/// Frequency register for LE channel index `frequency` (2402 + 2·f MHz).
pub const fn frequency_register(frequency: u8) -> u8 {
    (frequency << 1) + 23
}

/// FIFO entry for one test packet: `[len + 2, type, len, payload…]`.
pub fn test_packet(length: u8, payload: PayloadType) -> Result<FifoFrame> {
    if length > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidArgument);
    }
    let len = usize::from(length);
    let mut frame = FifoFrame::new();
    let _ = frame.push(length + 2);
    let _ = frame.push(payload as u8);
    let _ = frame.push(length);
    match payload {
        PayloadType::Prbs9 => {
            let _ = frame.extend_from_slice(&PRBS9[..len]);
        }
        PayloadType::Nibbles => frame.extend((0..len).map(|_| 0xF0)),
        PayloadType::Alternating => frame.extend((0..len).map(|_| 0xAA)),
    }
    Ok(frame)
}

impl<R, T, C, P> MiniBle<R, T, C, P>
where
    R: RadioPort,
    T: SleepTimerPort,
    C: ClockPort,
    P: CpuPort,
{
    /// Execute one DTM command word and return the status event to send
    /// back over the UART.
    pub fn dtm_command(&self, word: [u8; 2]) -> [u8; 2] {
        let status = match DtmCommand::decode(word) {
            Ok(command) => self.run_dtm(command),
            Err(_) => {
                warn!("DTM: rejected command {:02X}{:02X}", word[0], word[1]);
                DtmStatus::Failure
            }
        };
        status.event()
    }

    fn run_dtm(&self, command: DtmCommand) -> DtmStatus {
        debug!("DTM: {:?}", command);
        match command {
            DtmCommand::Reset | DtmCommand::TestEnd => match self.end_test() {
                Ok(()) => DtmStatus::Success,
                Err(_) => DtmStatus::Failure,
            },
            DtmCommand::ReceiverTest { .. } => DtmStatus::Failure,
            DtmCommand::TransmitterTest { frequency, length, payload } => match test_packet(length, payload) {
                Ok(frame) => {
                    self.start_test_transmitter(frequency_register(frequency), &frame);
                    DtmStatus::Success
                }
                Err(_) => DtmStatus::Failure,
            },
        }
    }

    /// Test packets sent since the last PHY init.
    pub fn dtm_packets_sent(&self) -> u32 {
        self.test_packets_sent()
    }
}
