//! Error types for the miniBLE stack.
//!
//! Recoverable errors are returned to the caller as [`Error`]. The fatal
//! class ([`Fault`]) is never returned: it is logged and handed to
//! [`CpuPort::halt`](crate::ports::CpuPort::halt), because continuing with
//! corrupted timing would leave the device asleep forever.

use core::fmt;

// ---------------------------------------------------------------------------
// Recoverable errors
// ---------------------------------------------------------------------------

/// Every fallible API call funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Out-of-range interval, malformed channel mask, payload too long or
    /// bad power level.
    InvalidArgument,
    /// A transmission may be in flight.
    RadioBusy,
    /// The scheduler was asked to start with no task enabled.
    AllEventsDisabled,
    /// The derived or supplied device address is the reserved all-ones value.
    InvalidAddress,
    /// Configuration is invalid or could not be decoded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::RadioBusy => write!(f, "radio busy"),
            Self::AllEventsDisabled => write!(f, "all events disabled"),
            Self::InvalidAddress => write!(f, "invalid device address"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(_: postcard::Error) -> Self {
        Self::Config("postcard encoding failed")
    }
}

// ---------------------------------------------------------------------------
// Fatal faults
// ---------------------------------------------------------------------------

/// Unrecoverable conditions. The device halts (or resets) on any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The radio completion interrupt saw a task end cause other than OK.
    RadioTaskFailed(u8),
    /// Enabled tasks exist but none has a countdown inside the timer range.
    NoWakeupScheduled,
    /// The sleep timer fired with no task enabled.
    NoTaskEnabled,
    /// An advertising event did not finish within the spin bound.
    AdvertisingStalled,
    /// Unexpected radio interrupt while in direct test mode.
    TestModeInterrupt,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RadioTaskFailed(cause) => write!(f, "radio task ended with cause {cause:#04x}"),
            Self::NoWakeupScheduled => write!(f, "no valid wakeup scheduled"),
            Self::NoTaskEnabled => write!(f, "sleep timer fired with no task enabled"),
            Self::AdvertisingStalled => write!(f, "advertising event stalled"),
            Self::TestModeInterrupt => write!(f, "unexpected radio interrupt in test mode"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
