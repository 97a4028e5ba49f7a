//! AMF0 decoding, limited to the value types RTMP commands carry.

use thiserror::Error;

/// AMF0 type markers.
mod marker {
    pub const NUMBER: u8 = 0x00;
    pub const BOOLEAN: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const OBJECT: u8 = 0x03;
    pub const NULL: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const ECMA_ARRAY: u8 = 0x08;
    pub const OBJECT_END: u8 = 0x09;
    pub const STRICT_ARRAY: u8 = 0x0a;
    pub const DATE: u8 = 0x0b;
    pub const LONG_STRING: u8 = 0x0c;
}

/// Nesting limit for objects and arrays.
const MAX_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Amf0Error {
    #[error("truncated at offset {offset} (need {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("unsupported type marker {0:#04x}")]
    UnsupportedMarker(u8),

    #[error("nesting deeper than {MAX_DEPTH}")]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
    /// Milliseconds since the epoch; the timezone field is ignored.
    Date(f64),
}

impl Amf0Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => {
                props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

/// Decode consecutive values until the input is exhausted.
pub fn decode_all(data: &[u8]) -> Result<Vec<Amf0Value>, Amf0Error> {
    let mut reader = Amf0Reader::new(data);
    let mut values = Vec::new();
    while !reader.is_empty() {
        values.push(reader.read_value()?);
    }
    Ok(values)
}

pub struct Amf0Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Amf0Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_value(&mut self) -> Result<Amf0Value, Amf0Error> {
        self.value(0)
    }

    fn value(&mut self, depth: usize) -> Result<Amf0Value, Amf0Error> {
        if depth > MAX_DEPTH {
            return Err(Amf0Error::TooDeep);
        }
        let marker = self.u8()?;
        match marker {
            marker::NUMBER => Ok(Amf0Value::Number(self.f64()?)),
            marker::BOOLEAN => Ok(Amf0Value::Boolean(self.u8()? != 0)),
            marker::STRING => {
                let len = self.u16()? as usize;
                Ok(Amf0Value::String(self.string(len)?))
            }
            marker::LONG_STRING => {
                let len = self.u32()? as usize;
                Ok(Amf0Value::String(self.string(len)?))
            }
            marker::OBJECT => Ok(Amf0Value::Object(self.properties(depth)?)),
            marker::NULL => Ok(Amf0Value::Null),
            marker::UNDEFINED => Ok(Amf0Value::Undefined),
            marker::ECMA_ARRAY => {
                // Count is only a hint; the end marker terminates
                self.u32()?;
                Ok(Amf0Value::EcmaArray(self.properties(depth)?))
            }
            marker::STRICT_ARRAY => {
                let count = self.u32()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Amf0Value::StrictArray(items))
            }
            marker::DATE => {
                let millis = self.f64()?;
                self.take(2)?;
                Ok(Amf0Value::Date(millis))
            }
            other => Err(Amf0Error::UnsupportedMarker(other)),
        }
    }

    /// Key/value pairs up to an empty key followed by the end marker.
    fn properties(&mut self, depth: usize) -> Result<Vec<(String, Amf0Value)>, Amf0Error> {
        let mut props = Vec::new();
        loop {
            let len = self.u16()? as usize;
            if len == 0 {
                if self.data.get(self.pos) == Some(&marker::OBJECT_END) {
                    self.pos += 1;
                    return Ok(props);
                }
                // Some encoders omit the end marker on the last object
                if self.is_empty() {
                    return Ok(props);
                }
            }
            let key = self.string(len)?;
            let value = self.value(depth + 1)?;
            props.push((key, value));
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Amf0Error> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let bytes = &self.data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(Amf0Error::Truncated {
                offset: self.pos,
                needed: n - (self.data.len() - self.pos),
            }),
        }
    }

    fn u8(&mut self) -> Result<u8, Amf0Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Amf0Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Amf0Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, Amf0Error> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }

    fn string(&mut self, len: usize) -> Result<String, Amf0Error> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

/// AMF0 encoding helpers for building test payloads.
#[cfg(test)]
pub(crate) mod encode {
    use super::marker;

    pub fn string(out: &mut Vec<u8>, s: &str) {
        out.push(marker::STRING);
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    pub fn number(out: &mut Vec<u8>, n: f64) {
        out.push(marker::NUMBER);
        out.extend_from_slice(&n.to_be_bytes());
    }

    pub fn null(out: &mut Vec<u8>) {
        out.push(marker::NULL);
    }

    /// Object whose values are all strings.
    pub fn object(out: &mut Vec<u8>, props: &[(&str, &str)]) {
        out.push(marker::OBJECT);
        for (key, value) in props {
            out.extend_from_slice(&(key.len() as u16).to_be_bytes());
            out.extend_from_slice(key.as_bytes());
            string(out, value);
        }
        out.extend_from_slice(&[0, 0, marker::OBJECT_END]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Scalars in sequence
    #[test]
    fn test_decode_scalars() {
        let mut data = Vec::new();
        encode::string(&mut data, "connect");
        encode::number(&mut data, 1.0);
        encode::null(&mut data);
        data.extend_from_slice(&[marker::BOOLEAN, 1, marker::UNDEFINED]);

        let values = decode_all(&data).unwrap();
        assert_eq!(
            values,
            vec![
                Amf0Value::String("connect".to_string()),
                Amf0Value::Number(1.0),
                Amf0Value::Null,
                Amf0Value::Boolean(true),
                Amf0Value::Undefined,
            ]
        );
    }

    // Test 2: Object property lookup
    #[test]
    fn test_decode_object() {
        let mut data = Vec::new();
        encode::object(&mut data, &[("app", "live"), ("tcUrl", "rtmp://example/live")]);

        let value = Amf0Reader::new(&data).read_value().unwrap();
        assert_eq!(value.get("app").and_then(Amf0Value::as_str), Some("live"));
        assert_eq!(
            value.get("tcUrl").and_then(Amf0Value::as_str),
            Some("rtmp://example/live")
        );
        assert!(value.get("missing").is_none());
    }

    // Test 3: ECMA array with nested object and long string
    #[test]
    fn test_decode_ecma_array() {
        let mut data = vec![marker::ECMA_ARRAY, 0, 0, 0, 2];
        data.extend_from_slice(&[0, 1, b'n']);
        let mut inner = Vec::new();
        encode::object(&mut inner, &[("k", "v")]);
        data.extend_from_slice(&inner);
        data.extend_from_slice(&[0, 1, b's', marker::LONG_STRING, 0, 0, 0, 3]);
        data.extend_from_slice(b"abc");
        data.extend_from_slice(&[0, 0, marker::OBJECT_END]);

        let value = Amf0Reader::new(&data).read_value().unwrap();
        let nested = value.get("n").unwrap();
        assert_eq!(nested.get("k").and_then(Amf0Value::as_str), Some("v"));
        assert_eq!(value.get("s").and_then(Amf0Value::as_str), Some("abc"));
    }

    // Test 4: Truncated and unknown input is an error, not a panic
    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_all(&[marker::STRING, 0, 10, b'a']),
            Err(Amf0Error::Truncated { .. })
        ));
        assert_eq!(decode_all(&[0x11]), Err(Amf0Error::UnsupportedMarker(0x11)));
        assert!(matches!(
            decode_all(&[marker::NUMBER, 0, 0]),
            Err(Amf0Error::Truncated { .. })
        ));
    }

    // Test 5: Deep nesting is rejected
    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..(MAX_DEPTH + 2) {
            data.extend_from_slice(&[marker::STRICT_ARRAY, 0, 0, 0, 1]);
        }
        data.push(marker::NULL);
        assert_eq!(decode_all(&data), Err(Amf0Error::TooDeep));
    }
}
