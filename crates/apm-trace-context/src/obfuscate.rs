// SPDX-License-Identifier: Apache-2.0

//! Legacy header obfuscation: XOR against a cycling key, then base64.
//! Deobfuscation is the same operation in reverse order.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ContextError;

pub fn obfuscate(text: &str, key: &str) -> Result<String, ContextError> {
    Ok(STANDARD.encode(xor_with_key(text.as_bytes(), key)?))
}

pub fn deobfuscate(encoded: &str, key: &str) -> Result<String, ContextError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ContextError::MalformedBase64)?;
    let clear = xor_with_key(&bytes, key)?;
    String::from_utf8(clear).map_err(|e| ContextError::MalformedJson(e.to_string()))
}

fn xor_with_key(input: &[u8], key: &str) -> Result<Vec<u8>, ContextError> {
    let key = key.as_bytes();
    if key.is_empty() {
        return Err(ContextError::EmptyObfuscationKey);
    }
    Ok(input
        .iter()
        .zip(key.iter().cycle())
        .map(|(byte, key_byte)| byte ^ key_byte)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let obfuscated = obfuscate("{\"guid\":\"abc123\"}", "d67afc830dab717fd163bfcb0b8b88423e9a1a3b").unwrap();
        let clear = deobfuscate(&obfuscated, "d67afc830dab717fd163bfcb0b8b88423e9a1a3b").unwrap();
        assert_eq!(clear, "{\"guid\":\"abc123\"}");
    }

    #[test]
    fn test_key_shorter_than_payload_cycles() {
        let obfuscated = obfuscate("a longer piece of text than the key", "k").unwrap();
        assert_eq!(
            deobfuscate(&obfuscated, "k").unwrap(),
            "a longer piece of text than the key"
        );
    }

    #[test]
    fn test_empty_key_is_an_error() {
        assert!(matches!(
            obfuscate("payload", ""),
            Err(ContextError::EmptyObfuscationKey)
        ));
    }

    #[test]
    fn test_bad_base64_is_an_error() {
        assert!(matches!(
            deobfuscate("!!not base64!!", "key"),
            Err(ContextError::MalformedBase64)
        ));
    }
}
