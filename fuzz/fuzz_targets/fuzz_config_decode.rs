//! Fuzz target: flash-persisted configuration decoding
//!
//! Whatever sits in the info page, decoding must either fail cleanly or
//! yield a configuration that passes validation and re-encodes.
//!
//! cargo fuzz run fuzz_config_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use minible::{BeaconConfig, MiniBleConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = MiniBleConfig::decode(data) {
        assert!(config.validate().is_ok());
        let mut buf = [0u8; 64];
        let encoded = config.encode(&mut buf).expect("valid config fits");
        assert_eq!(MiniBleConfig::decode(encoded), Ok(config));
    }

    if let Ok(config) = BeaconConfig::decode(data) {
        assert!(config.validate().is_ok());
        let mut buf = [0u8; 64];
        let encoded = config.encode(&mut buf).expect("valid config fits");
        assert_eq!(BeaconConfig::decode(encoded), Ok(config));
    }
});
