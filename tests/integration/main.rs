//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises one part of the stack against the host
//! simulator in `minible::sim`. Virtual time only advances while the stack
//! sleeps or spins, so multi-second schedules run instantly.

mod advertising_tests;
mod beacon_tests;
mod harness;
mod power_tests;
mod wait_tests;
