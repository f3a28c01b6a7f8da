use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::state::{Address, Word};

pub fn parse_address(input: &str) -> CoordinatorResult<Address> {
    Address::from_str(input.trim())
        .map_err(|_| CoordinatorError::InvalidAddress(input.to_string()))
}

/// Parses a non-negative decimal amount. Signs, separators and anything that
/// overflows `u128` are rejected.
pub fn parse_amount(input: &str) -> CoordinatorResult<u128> {
    let digits = input.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoordinatorError::InvalidAmount(input.to_string()));
    }
    digits
        .parse::<u128>()
        .map_err(|_| CoordinatorError::InvalidAmount(input.to_string()))
}

/// Parses a comma separated list of words. Each word is either a decimal
/// integer or a `0x` prefixed hex string of at most 64 digits, stored big-endian.
pub fn parse_payload(input: &str) -> CoordinatorResult<Vec<Word>> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    input.split(',').map(|part| parse_word(part.trim())).collect()
}

fn parse_word(part: &str) -> CoordinatorResult<Word> {
    let invalid = || CoordinatorError::InvalidPayload(part.to_string());
    let mut word = [0u8; 32];

    if let Some(digits) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        if digits.is_empty() || digits.len() > 64 {
            return Err(invalid());
        }
        let padded = format!("{digits:0>64}");
        hex::decode_to_slice(padded, &mut word).map_err(|_| invalid())?;
        return Ok(word);
    }

    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value = part.parse::<u128>().map_err(|_| invalid())?;
    word[16..].copy_from_slice(&value.to_be_bytes());
    Ok(word)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
