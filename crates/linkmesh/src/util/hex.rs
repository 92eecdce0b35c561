//! Hex codec for pre-shared keys.

/// Error returned by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("odd hex length {0}")]
    OddLength(usize),
    #[error("invalid hex digit {0:?} at {1}")]
    InvalidDigit(char, usize),
}

/// Lowercase hex encoding.
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a hex string (either case).
pub fn decode(s: &str) -> Result<Vec<u8>, HexError> {
    if s.len() % 2 != 0 {
        return Err(HexError::OddLength(s.len()));
    }
    let digit = |i: usize, c: u8| {
        (c as char)
            .to_digit(16)
            .map(|d| d as u8)
            .ok_or(HexError::InvalidDigit(c as char, i))
    };
    s.as_bytes()
        .chunks_exact(2)
        .enumerate()
        .map(|(i, pair)| -> Result<u8, HexError> {
            Ok(digit(2 * i, pair[0])? << 4 | digit(2 * i + 1, pair[1])?)
        })
        .collect()
}
