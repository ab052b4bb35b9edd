//! ADV_NONCONN_IND framing as written into the TX FIFO.
//!
//! ```text
//!  FIFO entry:  [fifo_len] [header] [pdu_len] [AdvA x6] [flags x3]? [AdvData ≤27]
//!                            └──── over the air, then CRC-24 ────┘
//! ```
//!
//! `fifo_len` counts every byte after itself; `pdu_len` is the BLE PDU
//! length field (AdvA plus AdvData).

use crate::address::DeviceAddress;
use crate::error::{Error, Result};

/// Largest caller payload the PHY accepts.
pub const MAX_PAYLOAD: usize = 27;

/// LE General Discoverable, BR/EDR not supported.
pub const FLAGS_AD: [u8; 3] = [0x02, 0x01, 0x06];

const ADV_ADDRESS_LEN: usize = 6;
const PDU_HEADER_LEN: usize = 2;

/// One FIFO entry including its length prefix.
pub type FifoFrame = heapless::Vec<u8, 40>;

/// Frame `payload` for transmission from `address`.
pub fn adv_nonconn_ind(address: &DeviceAddress, payload: &[u8], with_flags: bool) -> Result<FifoFrame> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::InvalidArgument);
    }
    let flags: &[u8] = if with_flags { &FLAGS_AD } else { &[] };
    let pdu_len = ADV_ADDRESS_LEN + flags.len() + payload.len();

    let mut frame = FifoFrame::new();
    // Capacity covers the worst case, so the pushes below cannot fail.
    let _ = frame.push((PDU_HEADER_LEN + pdu_len) as u8);
    let _ = frame.push(address.kind().pdu_header());
    let _ = frame.push(pdu_len as u8);
    let _ = frame.extend_from_slice(&address.bytes());
    let _ = frame.extend_from_slice(flags);
    let _ = frame.extend_from_slice(payload);
    Ok(frame)
}
