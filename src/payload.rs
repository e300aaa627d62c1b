// Command payloads before they hit the wire
//
// A PayloadSpec is what actions.json describes for a key: a string, an integer,
// a list of byte values, or a mixed list of tokens ("0xFF", 2, "RUN", ...).
// Encoding is pure and total; anything we can't represent is rejected when the
// payload is built, never at send time.

use serde_json::Value;

/// Error types for payload construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Unsupported payload type: {found}")]
    UnsupportedPayloadType { found: String },
}

/// Data of a single command, prior to framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSpec {
    /// UTF-8 text, sent as is
    Text(String),
    /// Single byte, only the low 8 bits are kept
    Integer(i64),
    /// Byte values, each masked to 8 bits
    ByteSequence(Vec<i64>),
    /// Mixed tokens; strings that look like a hex byte become that byte
    MixedList(Vec<PayloadSpec>),
}

impl PayloadSpec {
    /// Encode into the payload core bytes (no header, no line ending)
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            PayloadSpec::Text(s) => out.extend_from_slice(s.as_bytes()),
            PayloadSpec::Integer(n) => out.push(mask(*n)),
            PayloadSpec::ByteSequence(xs) => out.extend(xs.iter().map(|&x| mask(x))),
            PayloadSpec::MixedList(items) => {
                for item in items {
                    match item {
                        PayloadSpec::Text(s) => match parse_hex_byte(s) {
                            Some(b) => out.push(b),
                            None => out.extend_from_slice(s.as_bytes()),
                        },
                        other => other.encode_into(out),
                    }
                }
            }
        }
    }

    /// Build from a JSON value as found in actions.json
    ///
    /// Accepts a string, an integer, an array of integers, or an array of
    /// mixed string/integer/array tokens. Floats, booleans, null and objects
    /// are rejected.
    pub fn from_json(value: &Value) -> Result<Self, PayloadError> {
        match value {
            Value::String(s) => Ok(PayloadSpec::Text(s.clone())),
            Value::Number(_) => json_integer(value).map(PayloadSpec::Integer),
            Value::Array(items) => {
                if items.iter().all(|v| v.is_i64() || v.is_u64()) {
                    let bytes = items.iter().map(json_integer).collect::<Result<_, _>>()?;
                    Ok(PayloadSpec::ByteSequence(bytes))
                } else {
                    let tokens = items.iter().map(Self::from_json).collect::<Result<_, _>>()?;
                    Ok(PayloadSpec::MixedList(tokens))
                }
            }
            other => Err(unsupported(other)),
        }
    }
}

impl From<&str> for PayloadSpec {
    fn from(s: &str) -> Self {
        PayloadSpec::Text(s.to_string())
    }
}

fn mask(n: i64) -> u8 {
    (n & 0xFF) as u8
}

fn json_integer(value: &Value) -> Result<i64, PayloadError> {
    value
        .as_i64()
        // u64 beyond i64::MAX: only the low byte matters anyway
        .or_else(|| value.as_u64().map(|n| (n & 0xFF) as i64))
        .ok_or_else(|| unsupported(value))
}

fn unsupported(value: &Value) -> PayloadError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "non-integer number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    PayloadError::UnsupportedPayloadType {
        found: found.to_string(),
    }
}

/// Parse a single hex byte token: "0xFF", "0x5" or bare two-digit "FF"
pub fn parse_hex_byte(token: &str) -> Option<u8> {
    let digits = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(rest) if (1..=2).contains(&rest.len()) => rest,
        Some(_) => return None,
        None if token.len() == 2 => token,
        None => return None,
    };
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}
