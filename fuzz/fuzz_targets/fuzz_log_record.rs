// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fuzz target for log record decoding.
//!
//! Arbitrary field values must either decode into an event or be rejected,
//! never panic. A decoded event always names a document.

#![no_main]

use change_indexer::{LogPosition, LogRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (Option<String>, Option<String>, Option<String>, Option<String>)| {
    let (op, namespace, document_id, alternate_id) = data;
    let record = LogRecord {
        op,
        namespace,
        document_id,
        alternate_id,
    };

    if let Ok(event) = record.into_event(LogPosition::new(1, 0)) {
        assert!(!event.document_id().is_empty());
        let namespace = event.namespace.as_str();
        assert!(!namespace.starts_with('.'));
        assert!(namespace.contains('.'));
    }
});
