#![no_main]

use std::io::Cursor;

use libfuzzer_sys::fuzz_target;

use httpdisk::cache::Payload;

fuzz_target!(|data: &[u8]| {
    let mut reader = Cursor::new(data);
    if let Ok(payload) = Payload::deserialize(&mut reader) {
        // anything that parses must re-serialize and parse back to itself
        let mut bytes = Vec::new();
        payload.serialize(&mut bytes).expect("serialize");
        let reparsed = Payload::deserialize(&mut Cursor::new(bytes)).expect("reparse");
        assert_eq!(reparsed.status, payload.status);
        assert_eq!(reparsed.body, payload.body);
    }

    let mut reader = Cursor::new(data);
    let _ = Payload::peek_status(&mut reader);
});
