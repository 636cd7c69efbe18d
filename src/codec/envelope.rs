//! CCTP message envelope
//!
//! Layout (big-endian, fixed header of 116 bytes):
//!
//! ```text
//! | version u32 | sourceDomain u32 | destinationDomain u32 | nonce u64 |
//! | sender bytes32 | recipient bytes32 | destinationCaller bytes32 | messageBody ... |
//! ```

use super::{read_u32, read_u64, read_word, DecodeError};

const VERSION_INDEX: usize = 0;
const SOURCE_DOMAIN_INDEX: usize = 4;
const DESTINATION_DOMAIN_INDEX: usize = 8;
const NONCE_INDEX: usize = 12;
const SENDER_INDEX: usize = 20;
const RECIPIENT_INDEX: usize = 52;
const DESTINATION_CALLER_INDEX: usize = 84;
const MESSAGE_BODY_INDEX: usize = 116;

/// Decoded cross-chain envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u32,
    pub source_domain: u32,
    pub destination_domain: u32,
    pub nonce: u64,
    pub sender: [u8; 32],
    pub recipient: [u8; 32],
    /// All zeros when any caller may receive the message
    pub destination_caller: [u8; 32],
    pub message_body: Vec<u8>,
}

impl Envelope {
    /// Minimum length of an envelope with an empty body
    pub const HEADER_LEN: usize = MESSAGE_BODY_INDEX;

    pub fn parse(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < Self::HEADER_LEN {
            return Err(DecodeError::MalformedMessage(format!(
                "envelope too short: expected at least {} bytes, got {}",
                Self::HEADER_LEN,
                raw.len()
            )));
        }

        Ok(Self {
            version: read_u32(raw, VERSION_INDEX),
            source_domain: read_u32(raw, SOURCE_DOMAIN_INDEX),
            destination_domain: read_u32(raw, DESTINATION_DOMAIN_INDEX),
            nonce: read_u64(raw, NONCE_INDEX),
            sender: read_word(raw, SENDER_INDEX),
            recipient: read_word(raw, RECIPIENT_INDEX),
            destination_caller: read_word(raw, DESTINATION_CALLER_INDEX),
            message_body: raw[MESSAGE_BODY_INDEX..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::envelope_bytes;

    #[test]
    fn test_parse_header_fields() {
        let mut caller = [0u8; 32];
        caller[31] = 9;
        let raw = envelope_bytes(3, 4, 0x0102030405060708, caller, b"body");
        let envelope = Envelope::parse(&raw).unwrap();

        assert_eq!(envelope.version, 0);
        assert_eq!(envelope.source_domain, 3);
        assert_eq!(envelope.destination_domain, 4);
        assert_eq!(envelope.nonce, 0x0102030405060708);
        assert_eq!(envelope.sender, [0x11; 32]);
        assert_eq!(envelope.recipient, [0x22; 32]);
        assert_eq!(envelope.destination_caller, caller);
        assert_eq!(envelope.message_body, b"body".to_vec());
    }

    #[test]
    fn test_header_only_envelope_has_empty_body() {
        let raw = envelope_bytes(0, 4, 1, [0u8; 32], &[]);
        assert_eq!(raw.len(), Envelope::HEADER_LEN);
        assert!(Envelope::parse(&raw).unwrap().message_body.is_empty());
    }

    #[test]
    fn test_truncated_envelope_rejected() {
        let raw = envelope_bytes(0, 4, 1, [0u8; 32], &[]);
        let err = Envelope::parse(&raw[..115]).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage(_)));
    }
}
