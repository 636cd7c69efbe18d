//! MessageSent event data
//!
//! `event MessageSent(bytes message)` has no indexed fields, so the whole
//! message lives in the log data as one ABI-encoded dynamic `bytes`:
//!
//! ```text
//! word 0: offset to the bytes (0x20)
//! word 1: length
//! ...   : data, right-padded to a 32-byte boundary
//! ```

use super::DecodeError;

const WORD: usize = 32;

/// Extract the raw `message` bytes from MessageSent log data
pub fn decode_message_sent_data(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let offset = read_usize_word(data, 0)?;
    if offset != WORD {
        return Err(DecodeError::MalformedEvent(format!(
            "unexpected bytes offset {}",
            offset
        )));
    }

    let len = read_usize_word(data, offset)?;
    let start = offset + WORD;
    let end = start
        .checked_add(len)
        .ok_or_else(|| DecodeError::MalformedEvent("length overflow".to_string()))?;

    if end > data.len() {
        return Err(DecodeError::MalformedEvent(format!(
            "declared length {} exceeds available {} bytes",
            len,
            data.len().saturating_sub(start)
        )));
    }

    Ok(data[start..end].to_vec())
}

/// Read a uint256 word that must fit in usize
fn read_usize_word(data: &[u8], at: usize) -> Result<usize, DecodeError> {
    let word = data.get(at..at + WORD).ok_or_else(|| {
        DecodeError::MalformedEvent(format!("truncated at byte {} of {}", at, data.len()))
    })?;

    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(DecodeError::MalformedEvent(
            "word does not fit in 64 bits".to_string(),
        ));
    }

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[WORD - 8..]);
    usize::try_from(u64::from_be_bytes(buf))
        .map_err(|_| DecodeError::MalformedEvent("word exceeds usize".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_support::abi_encode_bytes;

    #[test]
    fn test_decode_unpadded_and_padded_lengths() {
        for len in [0usize, 1, 31, 32, 33, 248] {
            let message: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let data = abi_encode_bytes(&message);
            assert_eq!(decode_message_sent_data(&data).unwrap(), message);
        }
    }

    #[test]
    fn test_rejects_bad_offset() {
        let mut data = abi_encode_bytes(b"abc");
        data[31] = 0x40;
        assert!(decode_message_sent_data(&data).is_err());
    }

    #[test]
    fn test_rejects_length_beyond_data() {
        let mut data = abi_encode_bytes(b"abc");
        data[63] = 200;
        let err = decode_message_sent_data(&data).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedEvent(_)));
    }

    #[test]
    fn test_rejects_truncated_header() {
        assert!(decode_message_sent_data(&[0u8; 40]).is_err());
        assert!(decode_message_sent_data(&[]).is_err());
    }
}
