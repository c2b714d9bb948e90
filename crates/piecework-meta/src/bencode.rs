//! Bencode values and codec.
//!
//! The encoder always writes canonical form: dictionary keys in ascending
//! byte order, integers without leading zeros. The decoder is strict and
//! accepts canonical form only, so `encode(decode(b)?) == b` for every input
//! it accepts. That is what lets an info hash be recomputed from a decoded
//! manifest.

use std::collections::BTreeMap;
use thiserror::Error;

/// Nesting limit for lists and dictionaries
pub const MAX_DEPTH: usize = 64;

/// A bencoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `i<n>e`
    Int(i64),
    /// `<len>:<bytes>`
    Bytes(Vec<u8>),
    /// `l<values>e`
    List(Vec<Value>),
    /// `d<key><value>...e`, keys sorted
    Dict(BTreeMap<Vec<u8>, Value>),
}

/// Decoding failures, each with the byte offset it was detected at
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended inside a value
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// A value started with a byte that opens no bencode type
    #[error("invalid prefix byte 0x{byte:02x} at offset {offset}")]
    InvalidPrefix {
        /// The offending byte
        byte: u8,
        /// Where it was found
        offset: usize,
    },

    /// Malformed or non-canonical integer
    #[error("invalid integer at offset {0}")]
    InvalidInt(usize),

    /// Malformed or non-canonical byte string length
    #[error("invalid byte string length at offset {0}")]
    InvalidLength(usize),

    /// Dictionary key that is not a byte string
    #[error("dictionary key is not a byte string at offset {0}")]
    InvalidKey(usize),

    /// Dictionary keys out of order or repeated
    #[error("dictionary key out of order at offset {0}")]
    UnsortedKey(usize),

    /// Bytes left over after the top-level value
    #[error("trailing data at offset {0}")]
    TrailingData(usize),

    /// Lists and dictionaries nested deeper than [`MAX_DEPTH`]
    #[error("nesting deeper than {MAX_DEPTH} at offset {0}")]
    TooDeep(usize),
}

impl Value {
    /// Byte string from UTF-8 text
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::Bytes(s.as_ref().as_bytes().to_vec())
    }

    /// Empty dictionary
    #[must_use]
    pub fn dict() -> Self {
        Self::Dict(BTreeMap::new())
    }

    /// Integer payload
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Byte string payload
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string payload as UTF-8
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// List payload
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary payload
    #[must_use]
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Look up `key` if this is a dictionary
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|map| map.get(key.as_bytes()))
    }

    /// Insert into a dictionary; no-op for other variants
    pub fn insert(&mut self, key: &str, value: Value) {
        if let Self::Dict(map) = self {
            map.insert(key.as_bytes().to_vec(), value);
        }
    }

    /// Encode to canonical bencode
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Append the canonical encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Self::Bytes(bytes) => encode_bytes(bytes, out),
            Self::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Self::Dict(map) => {
                out.push(b'd');
                for (key, value) in map {
                    encode_bytes(key, out);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Decode exactly one value spanning all of `data`.
///
/// # Errors
///
/// Returns a [`DecodeError`] for malformed or non-canonical input, or if
/// bytes follow the value.
pub fn decode(data: &[u8]) -> Result<Value, DecodeError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;
    if decoder.pos != data.len() {
        return Err(DecodeError::TrailingData(decoder.pos));
    }
    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, DecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(DecodeError::UnexpectedEof(self.pos))
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        match self.peek()? {
            b'i' => self.int().map(Value::Int),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            b'l' => {
                self.enter(depth)?;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.enter(depth)?;
                let mut map = BTreeMap::new();
                let mut last: Option<Vec<u8>> = None;
                while self.peek()? != b'e' {
                    let key_at = self.pos;
                    if !self.peek()?.is_ascii_digit() {
                        return Err(DecodeError::InvalidKey(key_at));
                    }
                    let key = self.bytes()?;
                    if last.as_ref().is_some_and(|prev| *prev >= key) {
                        return Err(DecodeError::UnsortedKey(key_at));
                    }
                    let value = self.value(depth + 1)?;
                    last = Some(key.clone());
                    map.insert(key, value);
                }
                self.pos += 1;
                Ok(Value::Dict(map))
            }
            byte => Err(DecodeError::InvalidPrefix {
                byte,
                offset: self.pos,
            }),
        }
    }

    /// Step past a container opener, enforcing the depth limit
    fn enter(&mut self, depth: usize) -> Result<(), DecodeError> {
        if depth >= MAX_DEPTH {
            return Err(DecodeError::TooDeep(self.pos));
        }
        self.pos += 1;
        Ok(())
    }

    fn int(&mut self) -> Result<i64, DecodeError> {
        let start = self.pos;
        let body = start + 1;
        let end = self.data[body..]
            .iter()
            .position(|&b| b == b'e')
            .map(|i| body + i)
            .ok_or(DecodeError::UnexpectedEof(self.data.len()))?;
        let digits = &self.data[body..end];

        let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
        let canonical = match magnitude {
            [] => false,
            [b'0'] => magnitude.len() == digits.len(),
            [b'0', ..] => false,
            _ => magnitude.iter().all(u8::is_ascii_digit),
        };
        if !canonical {
            return Err(DecodeError::InvalidInt(start));
        }
        let value = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(DecodeError::InvalidInt(start))?;
        self.pos = end + 1;
        Ok(value)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let colon = self.data[start..]
            .iter()
            .position(|&b| !b.is_ascii_digit())
            .map(|i| start + i)
            .ok_or(DecodeError::UnexpectedEof(self.data.len()))?;
        let digits = &self.data[start..colon];
        if self.data[colon] != b':' || digits.is_empty() || (digits.len() > 1 && digits[0] == b'0')
        {
            return Err(DecodeError::InvalidLength(start));
        }
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(DecodeError::InvalidLength(start))?;
        let body = colon + 1;
        let end = body
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof(self.data.len()))?;
        self.pos = end;
        Ok(self.data[body..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i-7e").unwrap(), Value::Int(-7));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
        assert_eq!(decode(b"4:spam").unwrap(), Value::string("spam"));
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_decode_containers() {
        let list = decode(b"l4:spam4:eggse").unwrap();
        assert_eq!(
            list,
            Value::List(vec![Value::string("spam"), Value::string("eggs")])
        );

        let dict = decode(b"d3:cow3:moo4:spami3ee").unwrap();
        assert_eq!(dict.get("cow").and_then(Value::as_str), Some("moo"));
        assert_eq!(dict.get("spam").and_then(Value::as_int), Some(3));
        assert!(dict.get("missing").is_none());
    }

    #[test]
    fn test_encode_sorts_keys() {
        let mut dict = Value::dict();
        dict.insert("zeta", Value::Int(1));
        dict.insert("alpha", Value::string("x"));
        assert_eq!(dict.encode(), b"d5:alpha1:x4:zetai1ee");
    }

    #[test]
    fn test_canonical_input_reencodes_identically() {
        let input: &[u8] = b"d8:announce3:url4:infod6:lengthi10e4:name1:aee";
        assert_eq!(decode(input).unwrap().encode(), input);
    }

    #[test]
    fn test_rejects_non_canonical_integers() {
        assert_eq!(decode(b"i-0e"), Err(DecodeError::InvalidInt(0)));
        assert_eq!(decode(b"i01e"), Err(DecodeError::InvalidInt(0)));
        assert_eq!(decode(b"ie"), Err(DecodeError::InvalidInt(0)));
        assert_eq!(decode(b"i-e"), Err(DecodeError::InvalidInt(0)));
        assert_eq!(decode(b"i1x2e"), Err(DecodeError::InvalidInt(0)));
        assert_eq!(decode(b"i+5e"), Err(DecodeError::InvalidInt(0)));
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert_eq!(decode(b"03:abc"), Err(DecodeError::InvalidLength(0)));
        assert_eq!(decode(b"3x"), Err(DecodeError::InvalidLength(0)));
        assert_eq!(decode(b"5:abc"), Err(DecodeError::UnexpectedEof(5)));
        assert!(decode(b"99999999999999999999999:a").is_err());
    }

    #[test]
    fn test_rejects_bad_dicts() {
        assert_eq!(decode(b"di1e1:ae"), Err(DecodeError::InvalidKey(1)));
        assert_eq!(
            decode(b"d1:bi1e1:ai2ee"),
            Err(DecodeError::UnsortedKey(7))
        );
        assert_eq!(
            decode(b"d1:ai1e1:ai2ee"),
            Err(DecodeError::UnsortedKey(7))
        );
    }

    #[test]
    fn test_rejects_structure_errors() {
        assert_eq!(decode(b""), Err(DecodeError::UnexpectedEof(0)));
        assert_eq!(decode(b"l"), Err(DecodeError::UnexpectedEof(1)));
        assert_eq!(decode(b"i1ei2e"), Err(DecodeError::TrailingData(3)));
        assert_eq!(
            decode(b"x"),
            Err(DecodeError::InvalidPrefix { byte: b'x', offset: 0 })
        );
    }

    #[test]
    fn test_depth_limit() {
        let mut deep = vec![b'l'; MAX_DEPTH + 1];
        deep.extend(vec![b'e'; MAX_DEPTH + 1]);
        assert!(matches!(decode(&deep), Err(DecodeError::TooDeep(_))));

        let mut ok = vec![b'l'; MAX_DEPTH];
        ok.extend(vec![b'e'; MAX_DEPTH]);
        assert!(decode(&ok).is_ok());
    }
}
