//! Shared helpers used across components: binary detection, lossy text decoding with a
//! configurable fallback encoding, and monotonic timestamp generation.

use std::time::{SystemTime, UNIX_EPOCH};

use encoding_rs::Encoding;
use memchr::memchr;

/// Decide whether `prefix` (the first `binary_detection_prefix` bytes of a file, per
/// `IngestConfig`) looks binary: a null byte anywhere in the sampled prefix (§4.E step 2).
pub fn looks_binary(prefix: &[u8]) -> bool {
    memchr(0, prefix).is_some()
}

/// Decode `bytes` as UTF-8; if that fails, decode with `fallback_encoding_label` (an
/// `encoding_rs`-recognized label, e.g. `"windows-1252"`) using lossy replacement rather than
/// refusing outright (§4.G `diff`).
pub fn decode_text_lossy(bytes: &[u8], fallback_encoding_label: &str) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    let encoding = Encoding::for_label(fallback_encoding_label.as_bytes())
        .unwrap_or(encoding_rs::WINDOWS_1252);
    let (decoded, _, _) = encoding.decode(bytes);
    decoded.into_owned()
}

/// Current wall-clock time in milliseconds, used for `Version::timestamp`, `Branch::created_at`
/// and `Tag::created_at`. A thin wrapper so call sites never reach for `SystemTime` directly.
/// A clock set before the Unix epoch saturates to 0 rather than panicking.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_null_byte_in_prefix() {
        assert!(looks_binary(b"hello\0world"));
        assert!(!looks_binary(b"hello world"));
    }

    #[test]
    fn decodes_valid_utf8_directly() {
        assert_eq!(decode_text_lossy("héllo".as_bytes(), "windows-1252"), "héllo");
    }

    #[test]
    fn falls_back_on_invalid_utf8() {
        // 0xE9 is 'é' in windows-1252 but not valid standalone UTF-8.
        let bytes = [0x68, 0x65, 0xE9];
        let decoded = decode_text_lossy(&bytes, "windows-1252");
        assert!(decoded.contains('é'));
    }

    #[test]
    fn timestamps_are_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
