//! Fuzz target: `adv_nonconn_ind`
//!
//! Frames arbitrary payloads from arbitrary addresses and checks the
//! length fields against the bytes actually produced.
//!
//! cargo fuzz run fuzz_adv_pdu

#![no_main]

use libfuzzer_sys::fuzz_target;
use minible::DeviceAddress;
use minible::phy::pdu::{MAX_PAYLOAD, adv_nonconn_ind};

fuzz_target!(|data: &[u8]| {
    let Some((head, payload)) = data.split_first_chunk::<7>() else {
        return;
    };
    let [flags, id @ ..] = *head;
    let Ok(address) = DeviceAddress::static_random(id) else {
        return;
    };

    match adv_nonconn_ind(&address, payload, flags & 1 != 0) {
        Ok(frame) => {
            assert!(payload.len() <= MAX_PAYLOAD);
            assert_eq!(usize::from(frame[0]), frame.len() - 1);
            assert_eq!(usize::from(frame[2]), frame.len() - 3);
            assert_eq!(&frame[3..9], &address.bytes());
            assert!(frame.ends_with(payload));
        }
        Err(_) => assert!(payload.len() > MAX_PAYLOAD),
    }
});
