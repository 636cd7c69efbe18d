//! CCTP message decoding
//!
//! Three layers, outermost first:
//!
//! 1. [`event`]: the ABI-encoded `MessageSent(bytes message)` log data
//! 2. [`envelope`]: the fixed-layout cross-chain envelope carried in `message`
//! 3. [`payload`]: the envelope body, which is exactly one of a burn or a
//!    metadata (forward) message
//!
//! Decoding is pure. Anything that fails here is dropped by the watcher and
//! never retried.

pub mod envelope;
pub mod event;
pub mod payload;

use thiserror::Error;

pub use envelope::Envelope;
pub use event::decode_message_sent_data;
pub use payload::{BurnMessage, MetadataMessage, Payload};

use crate::hash::lookup_id;

/// Errors produced while decoding a MessageSent log
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The log data is not a valid ABI encoding of a single `bytes` value
    #[error("malformed MessageSent event data: {0}")]
    MalformedEvent(String),
    /// The envelope or its body does not match any known layout
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

/// A fully decoded message, ready to become a tracked message state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// keccak256 of `raw`, hex encoded
    pub lookup_id: String,
    /// Raw envelope bytes exactly as emitted by the source chain
    pub raw: Vec<u8>,
    pub envelope: Envelope,
    pub payload: Payload,
}

/// Decode raw envelope bytes into envelope and payload
pub fn decode_message(raw: &[u8]) -> Result<DecodedMessage, DecodeError> {
    let envelope = Envelope::parse(raw)?;
    let payload = Payload::parse(&envelope.message_body)?;
    Ok(DecodedMessage {
        lookup_id: lookup_id(raw),
        raw: raw.to_vec(),
        envelope,
        payload,
    })
}

/// Decode a MessageSent log's data section end to end
pub fn decode_log_data(data: &[u8]) -> Result<DecodedMessage, DecodeError> {
    let raw = decode_message_sent_data(data)?;
    decode_message(&raw)
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_be_bytes(buf)
}

pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(buf)
}

pub(crate) fn read_word(bytes: &[u8], at: usize) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&bytes[at..at + 32]);
    buf
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::MessageKind;

    #[test]
    fn test_decode_burn_end_to_end() {
        let raw = envelope_bytes(0, 4, 42, [0u8; 32], &burn_body(1_000_000));
        let decoded = decode_log_data(&abi_encode_bytes(&raw)).unwrap();

        assert_eq!(decoded.raw, raw);
        assert_eq!(decoded.envelope.source_domain, 0);
        assert_eq!(decoded.envelope.destination_domain, 4);
        assert_eq!(decoded.envelope.nonce, 42);
        assert_eq!(decoded.payload.kind(), MessageKind::Mint);
        assert_eq!(decoded.lookup_id, lookup_id(&raw));
    }

    #[test]
    fn test_decode_forward_end_to_end() {
        let raw = envelope_bytes(0, 4, 43, [0u8; 32], &metadata_body(5, b"memo"));
        let decoded = decode_log_data(&abi_encode_bytes(&raw)).unwrap();

        assert_eq!(decoded.payload.kind(), MessageKind::Forward);
        assert_eq!(
            decoded.payload.forwarding_channel().as_deref(),
            Some("channel-5")
        );
    }

    #[test]
    fn test_decode_twice_yields_same_lookup_id() {
        let raw = envelope_bytes(1, 4, 7, [0u8; 32], &burn_body(5));
        let first = decode_message(&raw).unwrap();
        let second = decode_message(&raw).unwrap();
        assert_eq!(first.lookup_id, second.lookup_id);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unrecognised_body_is_malformed() {
        let raw = envelope_bytes(0, 4, 1, [0u8; 32], &[1, 2, 3]);
        let err = decode_message(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedMessage(_)));
    }
}
