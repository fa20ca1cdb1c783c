//! Notification payloads exchanged between peers.
//!
//! These byte formats are interop-mandated: `READY` for liveness, `DESCS:`
//! carrying a serialized descriptor blob, `P:` carrying an ASCII decimal
//! progress count, and `K:` carrying a key/value pair when the notification
//! substrate doubles as the metadata channel. Parsing is lenient: payloads
//! that do not match a prefix are simply not that message.

use bytes::Bytes;

pub const READY: &[u8] = b"READY";
const DESCS_PREFIX: &[u8] = b"DESCS:";
const PROGRESS_PREFIX: &[u8] = b"P:";
const KV_PREFIX: &[u8] = b"K:";

pub fn is_ready(payload: &[u8]) -> bool {
    payload == READY
}

pub fn encode_descs(blob: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(DESCS_PREFIX.len() + blob.len());
    out.extend_from_slice(DESCS_PREFIX);
    out.extend_from_slice(blob);
    Bytes::from(out)
}

/// Strip the `DESCS:` prefix, returning the raw descriptor blob.
pub fn parse_descs(payload: &[u8]) -> Option<&[u8]> {
    payload.strip_prefix(DESCS_PREFIX)
}

pub fn encode_progress(count: u64) -> Bytes {
    Bytes::from(format!("P:{count}"))
}

/// Parse a `P:<count>` progress acknowledgement.
pub fn parse_progress(payload: &[u8]) -> Option<u64> {
    let digits = payload.strip_prefix(PROGRESS_PREFIX)?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Encode a key/value notification: `K:<key>:<blob>`.
///
/// Keys must not contain `:` so the receiver can split unambiguously.
pub fn encode_kv(key: &str, blob: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(KV_PREFIX.len() + key.len() + 1 + blob.len());
    out.extend_from_slice(KV_PREFIX);
    out.extend_from_slice(key.as_bytes());
    out.push(b':');
    out.extend_from_slice(blob);
    Bytes::from(out)
}

/// Parse a `K:<key>:<blob>` notification into its key and value.
pub fn parse_kv(payload: &[u8]) -> Option<(String, Bytes)> {
    let rest = payload.strip_prefix(KV_PREFIX)?;
    let sep = rest.iter().position(|&b| b == b':')?;
    let key = std::str::from_utf8(&rest[..sep]).ok()?;
    Some((key.to_string(), Bytes::copy_from_slice(&rest[sep + 1..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_exact_bytes() {
        assert_eq!(READY, b"READY");
        assert!(is_ready(b"READY"));
        assert!(!is_ready(b"READY!"));
        assert!(!is_ready(b"ready"));
    }

    #[test]
    fn descs_roundtrip_keeps_blob_opaque() {
        // Blobs may contain any bytes, including the prefix itself.
        let blob = b"\x00\x01DESCS:\xff";
        let encoded = encode_descs(blob);
        assert_eq!(parse_descs(&encoded), Some(&blob[..]));
        assert!(parse_descs(b"READY").is_none());
    }

    #[test]
    fn progress_roundtrip() {
        assert_eq!(encode_progress(0).as_ref(), b"P:0");
        assert_eq!(encode_progress(1000).as_ref(), b"P:1000");
        assert_eq!(parse_progress(b"P:42"), Some(42));
        assert_eq!(parse_progress(b"P:"), None);
        assert_eq!(parse_progress(b"P:abc"), None);
        assert_eq!(parse_progress(b"Q:42"), None);
    }

    #[test]
    fn kv_roundtrip() {
        let encoded = encode_kv("sender_metadata", b"blob:with:colons");
        let (key, blob) = parse_kv(&encoded).expect("parse");
        assert_eq!(key, "sender_metadata");
        assert_eq!(blob.as_ref(), b"blob:with:colons");
    }

    #[test]
    fn kv_rejects_malformed() {
        assert!(parse_kv(b"K:no_separator").is_none());
        assert!(parse_kv(b"P:5").is_none());
    }
}
