//! Hash computation for message identity
//!
//! Every tracked message is keyed by the keccak256 digest of its raw envelope
//! bytes. The same digest is what the attestation service indexes attestations by,
//! so the hex form doubles as the lookup path segment.

use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Identity key for a raw envelope: lowercase hex of keccak256, without `0x`
pub fn lookup_id(raw_envelope: &[u8]) -> String {
    hex::encode(keccak256(raw_envelope))
}

/// Topic0 of `MessageSent(bytes)`
pub fn message_sent_topic() -> [u8; 32] {
    keccak256(b"MessageSent(bytes)")
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode a hex string with or without a `0x` prefix
pub fn decode_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256() {
        let result = keccak256(b"hello");
        assert_eq!(
            bytes32_to_hex(&result),
            "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_message_sent_topic() {
        assert_eq!(
            bytes32_to_hex(&message_sent_topic()),
            "0x8c5261668696ce22758910d05bab8f186d6eb247ceac2af2e82c7dc17669b036"
        );
    }

    #[test]
    fn test_lookup_id_is_deterministic() {
        let raw = vec![7u8; 248];
        assert_eq!(lookup_id(&raw), lookup_id(&raw.clone()));
        assert_eq!(lookup_id(&raw).len(), 64);
        assert!(!lookup_id(&raw).starts_with("0x"));
    }

    #[test]
    fn test_lookup_id_changes_with_content() {
        let mut raw = vec![7u8; 248];
        let before = lookup_id(&raw);
        raw[200] = 8;
        assert_ne!(before, lookup_id(&raw));
    }

    #[test]
    fn test_decode_hex_prefix_optional() {
        assert_eq!(decode_hex("0xdead").unwrap(), vec![0xde, 0xad]);
        assert_eq!(decode_hex("dead").unwrap(), vec![0xde, 0xad]);
        assert!(decode_hex("0xzz").is_err());
    }
}
