//! Fuzz target for stored cursor decoding.
//!
//! Whatever sits in the cursor store, decoding either fails cleanly or yields
//! a cursor whose fingerprint decodes again.

#![no_main]

use index_sync_engine::cursor::{Cursor, KeyCursor, TimestampCursor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(cursor) = serde_json::from_str::<TimestampCursor>(data) {
        if let Ok(json) = cursor.fingerprint() {
            let again: TimestampCursor = serde_json::from_str(&json).unwrap();
            assert_eq!(again.id, cursor.id);
        }
    }

    if let Ok(cursor) = serde_json::from_str::<KeyCursor>(data) {
        let json = cursor.fingerprint().unwrap();
        let again: KeyCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(again, cursor);
    }
});
