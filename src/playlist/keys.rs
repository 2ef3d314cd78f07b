//! Key and IV parsing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;

use crate::error::{Error, Result};

/// AES-128 key/IV length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Parse a user-supplied key.
///
/// Accepts 32 hex characters (optionally `0x`-prefixed) or a 24-character
/// base64 string ending in `==`.
pub fn parse_key(input: &str) -> Result<[u8; BLOCK_LEN]> {
    let input = input.trim();
    let hex_body = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if is_hex_block(hex_body) {
        return decode_hex_block(hex_body);
    }

    if input.len() == 24 && input.ends_with("==") {
        let bytes = BASE64
            .decode(input)
            .map_err(|e| Error::InvalidKey(format!("bad base64 key: {}", e)))?;
        return to_block(&bytes);
    }

    Err(Error::InvalidKey(format!(
        "key must be 32 hex chars or 24 base64 chars, got {} chars",
        input.len()
    )))
}

/// Parse an IV written as 32 hex characters (optionally `0x`-prefixed).
pub fn parse_iv(input: &str) -> Result<[u8; BLOCK_LEN]> {
    let input = input.trim();
    let body = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    if !is_hex_block(body) {
        return Err(Error::InvalidKey(format!("IV must be 32 hex chars: {}", input)));
    }
    decode_hex_block(body)
}

/// IV used when neither the task nor the playlist supplies one.
///
/// The sequence number is written big-endian, so for `sn < 256` the IV is
/// fifteen zero bytes followed by `sn`.
pub fn default_iv(sn: u64) -> [u8; BLOCK_LEN] {
    (sn as u128).to_be_bytes()
}

/// Convert raw key bytes into a block.
pub fn to_block(bytes: &[u8]) -> Result<[u8; BLOCK_LEN]> {
    <[u8; BLOCK_LEN]>::try_from(bytes).map_err(|_| {
        Error::InvalidKey(format!(
            "expected {} bytes of key material, got {}",
            BLOCK_LEN,
            bytes.len()
        ))
    })
}

fn is_hex_block(s: &str) -> bool {
    Regex::new(r"^[0-9a-fA-F]{32}$")
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

fn decode_hex_block(s: &str) -> Result<[u8; BLOCK_LEN]> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
    to_block(&bytes)
}
