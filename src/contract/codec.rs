//! Conversion between JSON values and ABI tokens
//!
//! Inputs are lenient: integers may be JSON numbers, decimal strings or
//! `0x` hex strings (signed ones with a leading `-`), and must fit the
//! declared width. Outputs render integers as decimal strings so values
//! above 2^53 survive JSON consumers.

use crate::error::{GatewayError, GatewayResult};

use ethers::abi::{ParamType, Token};
use ethers::types::{Address, I256, U256};
use ethers::utils::to_checksum;
use serde_json::Value;

/// Encode one JSON argument as a token of type `kind`
pub fn tokenize(kind: &ParamType, value: &Value) -> GatewayResult<Token> {
    match kind {
        ParamType::Address => parse_address(value).map(Token::Address),
        ParamType::Uint(bits) => parse_uint(value, *bits).map(Token::Uint),
        ParamType::Int(bits) => parse_int(value, *bits).map(Token::Int),
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(Token::Bool(*b)),
            Value::String(s) if s == "true" => Ok(Token::Bool(true)),
            Value::String(s) if s == "false" => Ok(Token::Bool(false)),
            other => Err(mismatch("bool", other)),
        },
        ParamType::String => match value {
            Value::String(s) => Ok(Token::String(s.clone())),
            other => Err(mismatch("string", other)),
        },
        ParamType::Bytes => parse_hex(value).map(Token::Bytes),
        ParamType::FixedBytes(size) => {
            let bytes = parse_hex(value)?;
            if bytes.len() != *size {
                return Err(GatewayError::Validation(format!(
                    "Expected bytes{} but got {} bytes",
                    size,
                    bytes.len()
                )));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => {
            let items = as_array(value, "array")?;
            items
                .iter()
                .map(|item| tokenize(inner, item))
                .collect::<GatewayResult<Vec<_>>>()
                .map(Token::Array)
        }
        ParamType::FixedArray(inner, size) => {
            let items = as_array(value, "fixed array")?;
            if items.len() != *size {
                return Err(GatewayError::Validation(format!(
                    "Expected {} array elements but got {}",
                    size,
                    items.len()
                )));
            }
            items
                .iter()
                .map(|item| tokenize(inner, item))
                .collect::<GatewayResult<Vec<_>>>()
                .map(Token::FixedArray)
        }
        ParamType::Tuple(kinds) => {
            let items = as_array(value, "tuple")?;
            if items.len() != kinds.len() {
                return Err(GatewayError::Validation(format!(
                    "Expected {} tuple fields but got {}",
                    kinds.len(),
                    items.len()
                )));
            }
            kinds
                .iter()
                .zip(items)
                .map(|(kind, item)| tokenize(kind, item))
                .collect::<GatewayResult<Vec<_>>>()
                .map(Token::Tuple)
        }
    }
}

/// Encode a full argument list against the declared parameter types
pub fn tokenize_all(kinds: &[ParamType], values: &[Value]) -> GatewayResult<Vec<Token>> {
    if kinds.len() != values.len() {
        return Err(GatewayError::Validation(format!(
            "Expected {} arguments but got {}",
            kinds.len(),
            values.len()
        )));
    }
    kinds
        .iter()
        .zip(values)
        .map(|(kind, value)| tokenize(kind, value))
        .collect()
}

/// Render a decoded token as JSON
pub fn detokenize(token: &Token) -> Value {
    match token {
        Token::Address(address) => Value::String(to_checksum(address, None)),
        Token::Uint(value) => Value::String(value.to_string()),
        Token::Int(raw) => Value::String(I256::from_raw(*raw).to_string()),
        Token::Bool(b) => Value::Bool(*b),
        Token::String(s) => Value::String(s.clone()),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => {
            Value::String(format!("0x{}", hex::encode(bytes)))
        }
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(detokenize).collect())
        }
    }
}

/// A single output is returned bare; several come back as an array
pub fn detokenize_outputs(tokens: &[Token]) -> Value {
    match tokens {
        [] => Value::Null,
        [single] => detokenize(single),
        many => Value::Array(many.iter().map(detokenize).collect()),
    }
}

/// Drop a leading `0x` or `0X`
pub fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

/// Parse a `0x`-prefixed (or bare) hex address
pub fn parse_address_str(raw: &str) -> GatewayResult<Address> {
    let digits = strip_hex_prefix(raw.trim());
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(GatewayError::Validation(format!(
            "Invalid address: {}",
            raw
        )));
    }
    digits
        .parse::<Address>()
        .map_err(|e| GatewayError::Validation(format!("Invalid address {}: {}", raw, e)))
}

/// Decode a hex string, with or without `0x`
pub fn parse_hex_str(raw: &str) -> GatewayResult<Vec<u8>> {
    let digits = strip_hex_prefix(raw.trim());
    hex::decode(digits).map_err(|e| GatewayError::Validation(format!("Invalid hex data: {}", e)))
}

fn parse_address(value: &Value) -> GatewayResult<Address> {
    match value {
        Value::String(s) => parse_address_str(s),
        other => Err(mismatch("address", other)),
    }
}

fn parse_hex(value: &Value) -> GatewayResult<Vec<u8>> {
    match value {
        Value::String(s) => parse_hex_str(s),
        other => Err(mismatch("hex bytes", other)),
    }
}

fn parse_uint(value: &Value, bits: usize) -> GatewayResult<U256> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => parse_magnitude(s.trim()),
        _ => None,
    };
    let parsed = parsed.ok_or_else(|| mismatch("unsigned integer", value))?;

    if parsed.bits() > bits {
        return Err(out_of_range(&format!("uint{}", bits), value));
    }
    Ok(parsed)
}

/// Signed integers are range-checked on sign and magnitude, then stored as
/// 256-bit two's complement
fn parse_int(value: &Value, bits: usize) -> GatewayResult<U256> {
    let parsed = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some((i < 0, U256::from(i.unsigned_abs()))),
            None => n.as_u64().map(|u| (false, U256::from(u))),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix('-') {
                Some(rest) => parse_magnitude(rest).map(|m| (true, m)),
                None => parse_magnitude(s.strip_prefix('+').unwrap_or(s)).map(|m| (false, m)),
            }
        }
        _ => None,
    };
    let (negative, magnitude) = parsed.ok_or_else(|| mismatch("signed integer", value))?;

    // intN holds [-2^(N-1), 2^(N-1))
    let limit = U256::one() << bits.saturating_sub(1);
    let in_range = if negative {
        magnitude <= limit
    } else {
        magnitude < limit
    };
    if !in_range {
        return Err(out_of_range(&format!("int{}", bits), value));
    }

    if negative {
        Ok((!magnitude).overflowing_add(U256::one()).0)
    } else {
        Ok(magnitude)
    }
}

/// Unsigned decimal or `0x` hex digits
fn parse_magnitude(s: &str) -> Option<U256> {
    let digits = strip_hex_prefix(s);
    if digits.len() != s.len() {
        U256::from_str_radix(digits, 16).ok()
    } else {
        U256::from_dec_str(s).ok()
    }
}

fn as_array<'a>(value: &'a Value, what: &str) -> GatewayResult<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| mismatch(what, value))
}

fn mismatch(expected: &str, got: &Value) -> GatewayError {
    GatewayError::Validation(format!("Expected {} argument, got {}", expected, got))
}

fn out_of_range(kind: &str, got: &Value) -> GatewayError {
    GatewayError::Validation(format!("Argument {} does not fit in {}", got, kind))
}
