// SPDX-License-Identifier: Apache-2.0

use rand::Rng;

/// 16 lowercase hex digits, the span/transaction guid format.
pub fn new_guid() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

/// 32 lowercase hex digits, the trace id format.
pub fn new_trace_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
