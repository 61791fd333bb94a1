// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fuzz target for log position parsing.
//!
//! Parsing must never panic, and anything that parses must print back to a
//! form that parses to the same position.

#![no_main]

use change_indexer::LogPosition;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (a, b) = data;

    let pa = a.parse::<LogPosition>().ok();
    let pb = b.parse::<LogPosition>().ok();

    if let Some(p) = pa {
        assert_eq!(p.to_string().parse::<LogPosition>(), Ok(p));
    }

    // Lag never underflows
    if let (Some(pa), Some(pb)) = (pa, pb) {
        let _ = pa.lag_ms(&pb);
        let _ = pb.lag_ms(&pa);
        assert_eq!(pa.cmp(&pb).reverse(), pb.cmp(&pa));
    }
});
