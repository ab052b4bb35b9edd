//! Fuzz target: `DtmCommand::decode` and test-packet framing
//!
//! Any two-byte command word must decode without panicking, and every
//! transmitter test that decodes must frame into a FIFO entry whose length
//! prefix matches its contents.
//!
//! cargo fuzz run fuzz_dtm_command

#![no_main]

use libfuzzer_sys::fuzz_target;
use minible::dtm::{DtmCommand, MAX_PAYLOAD_LEN, NUM_RF_CHANNELS, frequency_register, test_packet};

fuzz_target!(|data: &[u8]| {
    for word in data.chunks_exact(2) {
        let word = [word[0], word[1]];
        if let Ok(DtmCommand::TransmitterTest { frequency, length, payload }) = DtmCommand::decode(word) {
            assert!(frequency < NUM_RF_CHANNELS);
            assert!(length <= MAX_PAYLOAD_LEN);
            assert!(frequency_register(frequency) <= 101);

            let frame = test_packet(length, payload).expect("decoded length is in range");
            assert_eq!(usize::from(frame[0]), frame.len() - 1);
        }
    }
});
