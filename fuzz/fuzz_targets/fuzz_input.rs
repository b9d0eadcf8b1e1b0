// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sift::classifier::{interpret_reply, normalize_file_name, strip_counters};

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    file_name: &'a str,
    reply: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    let once = strip_counters(input.file_name);
    assert_eq!(strip_counters(&once), once);

    let normalized = normalize_file_name(input.file_name);
    assert_eq!(strip_counters(&normalized), normalized);

    let _ = interpret_reply(input.reply);
});
