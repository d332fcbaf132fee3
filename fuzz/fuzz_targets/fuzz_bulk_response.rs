//! Fuzz target for bulk response classification.
//!
//! This tests that classification never panics on arbitrary input and that
//! an all-accepted verdict never hides a failed item.

#![no_main]

use index_sync_engine::bulk::{classify, item_failures, BulkOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(response) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Should never panic
    let outcome = classify(&response);
    let failures = item_failures(&response);

    if let Some(failures) = failures {
        match outcome {
            BulkOutcome::AllAccepted => assert!(failures.is_empty()),
            BulkOutcome::PartiallyIgnorable => {
                assert!(!failures.is_empty());
                assert!(failures.iter().all(|f| f.ignorable));
            }
            BulkOutcome::Failed => {}
        }
    }
});
