//! miniBLE: a broadcast-only Bluetooth Low Energy stack for the CC2543.
//!
//! A sleep-timer driven scheduler wakes the device for four fixed tasks,
//! the radio PHY sends one non-connectable advertising PDU per active
//! channel, and the main loop sleeps in [`MiniBle::wait_for_next_event`]
//! between them. Register access goes through the traits in [`ports`];
//! [`sim`] implements them on the host for tests.
//!
//! `no_std` on bare-metal targets.

#![cfg_attr(target_os = "none", no_std)]

pub mod address;
pub mod beacon;
pub mod config;
pub mod delay;
pub mod diagnostics;
pub mod dtm;
pub mod events;
pub mod phy;
pub mod ports;
pub mod scheduler;
pub mod ticks;

#[cfg(not(target_os = "none"))]
pub mod sim;

mod error;
mod minible;

pub use address::{AddressKind, DeviceAddress};
pub use config::{AddressSource, BeaconConfig, MiniBleConfig, PacketSpacing};
pub use delay::BleDelay;
pub use diagnostics::Diagnostics;
pub use error::{Error, Fault, Result};
pub use events::{EventMask, TaskId};
pub use minible::MiniBle;
pub use phy::{AdvChannel, ChannelMap, TxPower};
