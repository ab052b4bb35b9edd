//! Device address derivation and formatting.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether the advertised address is a public (IEEE) or random address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    Public,
    Random,
}

impl AddressKind {
    /// ADV_NONCONN_IND header byte: PDU type 0x2, TxAdd set for random.
    pub const fn pdu_header(self) -> u8 {
        match self {
            Self::Public => 0x02,
            Self::Random => 0x42,
        }
    }
}

/// 48-bit device address, stored LSB first as it goes over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    bytes: [u8; 6],
    kind: AddressKind,
}

impl DeviceAddress {
    const INVALID: [u8; 6] = [0xFF; 6];

    /// Static random address from the die ID: the two top bits are forced
    /// to `11` as the Bluetooth Core requires for static addresses.
    pub fn static_random(unique_id: [u8; 6]) -> Result<Self> {
        let mut bytes = unique_id;
        bytes[5] |= 0xC0;
        Self::new(bytes, AddressKind::Random)
    }

    pub fn public(bytes: [u8; 6]) -> Result<Self> {
        Self::new(bytes, AddressKind::Public)
    }

    fn new(bytes: [u8; 6], kind: AddressKind) -> Result<Self> {
        if bytes == Self::INVALID {
            return Err(Error::InvalidAddress);
        }
        Ok(Self { bytes, kind })
    }

    pub const fn bytes(&self) -> [u8; 6] {
        self.bytes
    }

    pub const fn kind(&self) -> AddressKind {
        self.kind
    }

    /// RNG seed: the two least significant address bytes.
    pub const fn random_seed(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    /// Twelve uppercase hex digits, most significant byte first.
    pub fn to_hex(&self) -> heapless::String<12> {
        let mut s = heapless::String::new();
        for byte in self.bytes.iter().rev() {
            let _ = core::fmt::Write::write_fmt(&mut s, format_args!("{byte:02X}"));
        }
        s
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [b0, b1, b2, b3, b4, b5] = self.bytes;
        write!(f, "{b5:02X}:{b4:02X}:{b3:02X}:{b2:02X}:{b1:02X}:{b0:02X}")
    }
}
