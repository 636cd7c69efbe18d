//! Envelope body variants
//!
//! A body is disambiguated by trying each layout in a fixed order: burn first,
//! then metadata. The first layout that parses decides the message kind.

use alloy::primitives::U256;

use super::{read_u32, read_u64, read_word, DecodeError};
use crate::types::MessageKind;

/// Direct mint instruction (TokenMessenger burn message)
///
/// ```text
/// | version u32 | burnToken bytes32 | mintRecipient bytes32 | amount uint256 | messageSender bytes32 |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnMessage {
    pub version: u32,
    pub burn_token: [u8; 32],
    pub mint_recipient: [u8; 32],
    pub amount: U256,
    pub message_sender: [u8; 32],
}

impl BurnMessage {
    pub const LEN: usize = 132;

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() != Self::LEN {
            return Err(DecodeError::MalformedMessage(format!(
                "burn message must be {} bytes, got {}",
                Self::LEN,
                body.len()
            )));
        }

        Ok(Self {
            version: read_u32(body, 0),
            burn_token: read_word(body, 4),
            mint_recipient: read_word(body, 36),
            amount: U256::from_be_slice(&body[68..100]),
            message_sender: read_word(body, 100),
        })
    }
}

/// Forwarding instruction: mint, then route onward over an IBC channel
///
/// ```text
/// | nonce u64 | sender bytes32 | channel u64 | destinationBech32Prefix bytes32 |
/// | destinationRecipient bytes32 | memo ... |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataMessage {
    pub nonce: u64,
    pub sender: [u8; 32],
    pub channel: u64,
    pub destination_bech32_prefix: [u8; 32],
    pub destination_recipient: [u8; 32],
    pub memo: Vec<u8>,
}

impl MetadataMessage {
    pub const MIN_LEN: usize = 112;

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() < Self::MIN_LEN {
            return Err(DecodeError::MalformedMessage(format!(
                "metadata message must be at least {} bytes, got {}",
                Self::MIN_LEN,
                body.len()
            )));
        }

        Ok(Self {
            nonce: read_u64(body, 0),
            sender: read_word(body, 8),
            channel: read_u64(body, 40),
            destination_bech32_prefix: read_word(body, 48),
            destination_recipient: read_word(body, 80),
            memo: body[112..].to_vec(),
        })
    }

    /// Channel identifier as used in the whitelist, e.g. `channel-5`
    pub fn channel_id(&self) -> String {
        format!("channel-{}", self.channel)
    }
}

/// Decoded envelope body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Burn(BurnMessage),
    Metadata(MetadataMessage),
}

impl Payload {
    /// Burn is tried before metadata; the first successful layout wins
    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if let Ok(burn) = BurnMessage::parse(body) {
            return Ok(Payload::Burn(burn));
        }
        if let Ok(metadata) = MetadataMessage::parse(body) {
            return Ok(Payload::Metadata(metadata));
        }
        Err(DecodeError::MalformedMessage(format!(
            "body of {} bytes is neither a burn nor a metadata message",
            body.len()
        )))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Burn(_) => MessageKind::Mint,
            Payload::Metadata(_) => MessageKind::Forward,
        }
    }

    /// Forwarding channel for metadata messages, `None` for burns
    pub fn forwarding_channel(&self) -> Option<String> {
        match self {
            Payload::Burn(_) => None,
            Payload::Metadata(m) => Some(m.channel_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::{burn_body, metadata_body};

    #[test]
    fn test_parse_burn() {
        let burn = BurnMessage::parse(&burn_body(1_500_000)).unwrap();
        assert_eq!(burn.burn_token, [0x33; 32]);
        assert_eq!(burn.mint_recipient, [0x44; 32]);
        assert_eq!(burn.amount, U256::from(1_500_000u64));
        assert_eq!(burn.message_sender, [0x55; 32]);
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = MetadataMessage::parse(&metadata_body(3, b"hello")).unwrap();
        assert_eq!(metadata.nonce, 9);
        assert_eq!(metadata.channel, 3);
        assert_eq!(metadata.channel_id(), "channel-3");
        assert_eq!(metadata.destination_recipient, [0x77; 32]);
        assert_eq!(metadata.memo, b"hello".to_vec());
    }

    #[test]
    fn test_burn_takes_precedence_over_metadata() {
        // A 132-byte body satisfies both layouts; burn must win
        let body = burn_body(1);
        assert!(MetadataMessage::parse(&body).is_ok());
        assert!(matches!(Payload::parse(&body).unwrap(), Payload::Burn(_)));
    }

    #[test]
    fn test_metadata_when_not_burn_sized() {
        let payload = Payload::parse(&metadata_body(7, b"")).unwrap();
        assert_eq!(payload.kind(), MessageKind::Forward);
        assert_eq!(payload.forwarding_channel().as_deref(), Some("channel-7"));
    }

    #[test]
    fn test_short_body_matches_nothing() {
        assert!(Payload::parse(&[0u8; 111]).is_err());
    }
}
