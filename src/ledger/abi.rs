//! Minimal ABI encoding for the ERC-20 / ERC-4626 surface the hub touches.
//!
//! Only static argument types (address, uint256) are ever encoded; decoding
//! handles uint256, address, uint8 and string (including the legacy bytes32
//! string some older tokens return from `symbol()`).

use num_bigint::BigUint;

use crate::error::LedgerError;
use crate::models::Address;

/// 4-byte function selectors, hex without 0x.
pub mod selectors {
    pub const TOTAL_ASSETS: &str = "01e1d114";
    pub const TOTAL_SUPPLY: &str = "18160ddd";
    pub const PRICE_PER_SHARE: &str = "99530b06";
    pub const CONVERT_TO_ASSETS: &str = "07a2d13a";
    pub const BALANCE_OF: &str = "70a08231";
    pub const ASSET: &str = "38d52e0f";
    pub const SYMBOL: &str = "95d89b41";
    pub const DECIMALS: &str = "313ce567";
    pub const DRAGON_ROUTER: &str = "bd3c12e1";
    pub const ALLOWANCE: &str = "dd62ed3e";
    pub const APPROVE: &str = "095ea7b3";
    pub const DEPOSIT: &str = "6e553f65";
    pub const WITHDRAW: &str = "b460af94";
}

const WORD: usize = 32;

/// A static ABI argument.
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    Address(&'a Address),
    Uint(&'a BigUint),
}

/// 0x-prefixed calldata for `selector(args...)`.
pub fn encode_call(selector: &str, args: &[Token<'_>]) -> String {
    let mut out = String::with_capacity(2 + 8 + args.len() * 64);
    out.push_str("0x");
    out.push_str(selector);
    for arg in args {
        match arg {
            Token::Address(a) => out.push_str(&format!("{:0>64}", hex::encode(a.as_bytes()))),
            Token::Uint(v) => out.push_str(&format!("{:0>64}", v.to_str_radix(16))),
        }
    }
    out
}

fn word(data: &[u8], index: usize) -> Result<&[u8], LedgerError> {
    let start = index * WORD;
    data.get(start..start + WORD).ok_or_else(|| {
        LedgerError::Decode(format!(
            "return data too short: {} bytes, need word {}",
            data.len(),
            index
        ))
    })
}

pub fn decode_uint(data: &[u8]) -> Result<BigUint, LedgerError> {
    Ok(BigUint::from_bytes_be(word(data, 0)?))
}

pub fn decode_address(data: &[u8]) -> Result<Address, LedgerError> {
    let w = word(data, 0)?;
    if w[..12].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("address word has dirty high bytes".into()));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&w[12..]);
    Ok(Address::from_bytes(out))
}

pub fn decode_u8(data: &[u8]) -> Result<u8, LedgerError> {
    let w = word(data, 0)?;
    if w[..31].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("uint8 out of range".into()));
    }
    Ok(w[31])
}

pub fn decode_string(data: &[u8]) -> Result<String, LedgerError> {
    // bytes32-returning tokens
    if data.len() == WORD {
        let end = data.iter().position(|b| *b == 0).unwrap_or(WORD);
        return String::from_utf8(data[..end].to_vec())
            .map_err(|e| LedgerError::Decode(format!("bytes32 string not utf-8: {}", e)));
    }

    let offset = usize_from_word(word(data, 0)?)?;
    let body_start = offset
        .checked_add(WORD)
        .ok_or_else(|| LedgerError::Decode("string offset overflows".into()))?;
    let len_word = data
        .get(offset..body_start)
        .ok_or_else(|| LedgerError::Decode("string offset out of bounds".into()))?;
    let len = usize_from_word(len_word)?;
    let body_end = body_start
        .checked_add(len)
        .ok_or_else(|| LedgerError::Decode("string length overflows".into()))?;
    let body = data
        .get(body_start..body_end)
        .ok_or_else(|| LedgerError::Decode("string length out of bounds".into()))?;
    String::from_utf8(body.to_vec())
        .map_err(|e| LedgerError::Decode(format!("string not utf-8: {}", e)))
}

fn usize_from_word(w: &[u8]) -> Result<usize, LedgerError> {
    if w[..24].iter().any(|b| *b != 0) {
        return Err(LedgerError::Decode("offset/length too large".into()));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&w[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

/// Decode a 0x-prefixed hex string from a JSON-RPC result.
pub fn decode_hex(result: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(result.trim().trim_start_matches("0x"))
        .map_err(|e| LedgerError::Decode(format!("invalid hex in result: {}", e)))
}
