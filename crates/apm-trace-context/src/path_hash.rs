// SPDX-License-Identifier: Apache-2.0

//! Path-hash bookkeeping for cross-application correlation.
//!
//! The accumulation function is load-bearing: peers assert the exact hex
//! digests, so the digest-tail mixing below must not be "improved".

use std::collections::BTreeSet;

use md5::{Digest, Md5};

use crate::error::ContextError;

const ALTERNATE_PATH_HASH_MAX_COUNT: usize = 10;

/// `rotl32(referring, 1) ^ u32_be(md5(app ";" name)[12..16])`.
///
/// Absent names hash as the literal string `null` to stay byte-compatible
/// with peers.
pub fn calculate_path_hash(
    app_name: Option<&str>,
    transaction_name: Option<&str>,
    referring_path_hash: Option<u32>,
) -> u32 {
    let referring = referring_path_hash.unwrap_or(0);
    referring.rotate_left(1) ^ name_hash(app_name, transaction_name)
}

pub fn int_to_hex(hash: u32) -> String {
    format!("{hash:08x}")
}

pub fn hex_to_int(hex: &str) -> Result<u32, ContextError> {
    u32::from_str_radix(hex, 16).map_err(|_| ContextError::MalformedJson(hex.to_string()))
}

fn name_hash(app_name: Option<&str>, transaction_name: Option<&str>) -> u32 {
    let identifier = format!(
        "{};{}",
        app_name.unwrap_or("null"),
        transaction_name.unwrap_or("null")
    );
    let digest = Md5::digest(identifier.as_bytes());
    u32::from_be_bytes([digest[12], digest[13], digest[14], digest[15]])
}

/// Bounded set of path hashes seen under previous transaction names.
///
/// Holds at most ten entries; rendering excludes the hash of the current
/// name and joins the rest sorted, which is the ordering peers assert.
#[derive(Debug, Default)]
pub struct AlternatePathHashes {
    hashes: BTreeSet<String>,
}

impl AlternatePathHashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hash for the (new) current name. Full sets stay as-is.
    pub fn record(&mut self, path_hash: u32) {
        if self.hashes.len() < ALTERNATE_PATH_HASH_MAX_COUNT {
            self.hashes.insert(int_to_hex(path_hash));
        }
    }

    /// Comma-joined sorted hex hashes, excluding the current name's hash.
    /// `None` when nothing but the current hash was ever recorded.
    pub fn render(&self, current_path_hash: u32) -> Option<String> {
        let current = int_to_hex(current_path_hash);
        let joined = self
            .hashes
            .iter()
            .filter(|hash| **hash != current)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hex vectors asserted by peer implementations.
    #[test]
    fn test_known_vectors() {
        assert_eq!(int_to_hex(calculate_path_hash(None, None, None)), "3ff723aa");
        assert_eq!(
            int_to_hex(calculate_path_hash(
                None,
                Some("WebTransaction/Servlet/ExternalCallServlet"),
                None
            )),
            "8cb0bd6a"
        );
        assert_eq!(
            int_to_hex(calculate_path_hash(
                None,
                Some("WebTransaction/Servlet/ExternalCallServlet"),
                Some(hex_to_int("834f4c33").unwrap())
            )),
            "8a2e250d"
        );
    }

    #[test]
    fn test_referring_hash_rotates() {
        let base = calculate_path_hash(Some("App"), Some("Name"), None);
        let with_referrer = calculate_path_hash(Some("App"), Some("Name"), Some(0x8000_0000));
        // rotl32(0x80000000, 1) == 1
        assert_eq!(with_referrer, base ^ 1);
    }

    #[test]
    fn test_alternate_hashes_cap_and_exclude_current() {
        let mut alternates = AlternatePathHashes::new();
        let mut hashes = Vec::new();
        for i in 0..12 {
            let hash = calculate_path_hash(Some("App"), Some(&format!("name-{i}")), None);
            alternates.record(hash);
            hashes.push(hash);
        }
        assert_eq!(alternates.len(), 10);

        // The 12th name never made it into the set, so nothing is excluded.
        let rendered = alternates.render(hashes[11]).unwrap();
        let parts: Vec<&str> = rendered.split(',').collect();
        assert_eq!(parts.len(), 10);
        let mut sorted = parts.clone();
        sorted.sort_unstable();
        assert_eq!(parts, sorted);

        // A current name that is in the set is excluded from the rendering.
        let rendered = alternates.render(hashes[0]).unwrap();
        assert_eq!(rendered.split(',').count(), 9);
        assert!(!rendered.contains(&int_to_hex(hashes[0])));
    }

    #[test]
    fn test_render_empty() {
        let alternates = AlternatePathHashes::new();
        assert_eq!(alternates.render(0x1234_5678), None);
    }
}
