//! Destination-caller address encoding
//!
//! CCTP stores addresses as 32-byte words. For 20-byte account addresses the
//! value is left-padded with zeros:
//!
//! ```text
//! | Padding (12 bytes, zero) | Raw Address (20 bytes) |
//! ```
//!
//! An all-zero word means "any caller may receive this message".

/// Returns true if the 32-byte word is all zeros
pub fn is_zero(word: &[u8; 32]) -> bool {
    word.iter().all(|b| *b == 0)
}

/// Left-pad a 20-byte address into a 32-byte word
pub fn encode_destination_caller(address: &[u8; 20]) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address);
    word
}

/// Take the significant last 20 bytes of a left-padded word
pub fn decode_destination_caller(word: &[u8; 32]) -> [u8; 20] {
    let mut address = [0u8; 20];
    address.copy_from_slice(&word[12..]);
    address
}

/// Encode raw 20 bytes to a bech32 address with given prefix
#[cfg(test)]
pub fn encode_bech32_address(bytes: &[u8; 20], hrp: &str) -> eyre::Result<String> {
    use bech32::{ToBase32, Variant};

    let encoded = bech32::encode(hrp, bytes.to_base32(), Variant::Bech32)
        .map_err(|e| eyre::eyre!("Failed to encode bech32: {}", e))?;
    Ok(encoded)
}
