//! Parameter encoding
//!
//! Multi-byte integers are little endian. Variable-length parameters take
//! their element count from the numeric parameter right before them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Wire representation of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    U8,
    U16,
    U32,
    /// 64-bit IEEE address, `0x`-prefixed hex string in JSON
    IeeeAddr,
    /// Byte array sized by the preceding numeric parameter
    Buffer,
    /// Array of u16 sized by the preceding numeric parameter
    ListU16,
    /// Every remaining byte
    Rest,
}

/// Named parameter of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamType,
}

pub const fn p(name: &'static str, kind: ParamType) -> Param {
    Param { name, kind }
}

fn uint_arg(param: &Param, value: Option<&Value>, max: u64) -> Result<u64> {
    let value = value.ok_or_else(|| ProtocolError::invalid_argument(param.name, "missing"))?;
    let n = value
        .as_u64()
        .ok_or_else(|| ProtocolError::invalid_argument(param.name, "expected unsigned integer"))?;
    if n > max {
        return Err(ProtocolError::invalid_argument(
            param.name,
            format!("{} exceeds {}", n, max),
        ));
    }
    Ok(n)
}

fn array_arg(param: &Param, value: Option<&Value>, max: u64) -> Result<Vec<u64>> {
    let value = value.ok_or_else(|| ProtocolError::invalid_argument(param.name, "missing"))?;
    let items = value
        .as_array()
        .ok_or_else(|| ProtocolError::invalid_argument(param.name, "expected array"))?;
    items
        .iter()
        .map(|item| uint_arg(param, Some(item), max))
        .collect()
}

fn ieee_arg(param: &Param, value: Option<&Value>) -> Result<u64> {
    let value = value.ok_or_else(|| ProtocolError::invalid_argument(param.name, "missing"))?;
    let text = value
        .as_str()
        .ok_or_else(|| ProtocolError::invalid_argument(param.name, "expected hex string"))?;
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 16 {
        return Err(ProtocolError::invalid_argument(
            param.name,
            "expected up to 16 hex digits",
        ));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ProtocolError::invalid_argument(param.name, e.to_string()))
}

fn check_count(param: &Param, expected: Option<u64>, actual: usize) -> Result<()> {
    match expected {
        Some(n) if n as usize != actual => Err(ProtocolError::invalid_argument(
            param.name,
            format!("length {} does not match count {}", actual, n),
        )),
        _ => Ok(()),
    }
}

/// Encode an argument object into a payload
pub fn encode(params: &[Param], args: &Map<String, Value>) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    let mut count: Option<u64> = None;

    for param in params {
        let value = args.get(param.name);
        let mut next_count = None;
        match param.kind {
            ParamType::U8 => {
                let n = uint_arg(param, value, u8::MAX as u64)?;
                buf.put_u8(n as u8);
                next_count = Some(n);
            },
            ParamType::U16 => {
                let n = uint_arg(param, value, u16::MAX as u64)?;
                buf.put_u16_le(n as u16);
                next_count = Some(n);
            },
            ParamType::U32 => {
                let n = uint_arg(param, value, u32::MAX as u64)?;
                buf.put_u32_le(n as u32);
            },
            ParamType::IeeeAddr => buf.put_u64_le(ieee_arg(param, value)?),
            ParamType::Buffer | ParamType::Rest => {
                let bytes = array_arg(param, value, u8::MAX as u64)?;
                if param.kind == ParamType::Buffer {
                    check_count(param, count, bytes.len())?;
                }
                buf.extend(bytes.into_iter().map(|b| b as u8));
            },
            ParamType::ListU16 => {
                let items = array_arg(param, value, u16::MAX as u64)?;
                check_count(param, count, items.len())?;
                for item in items {
                    buf.put_u16_le(item as u16);
                }
            },
        }
        count = next_count;
    }

    Ok(buf.freeze())
}

fn need(param: &Param, cursor: &[u8], needed: usize) -> Result<()> {
    if cursor.remaining() < needed {
        return Err(ProtocolError::PayloadTooShort {
            param: param.name.to_string(),
            needed,
            available: cursor.remaining(),
        });
    }
    Ok(())
}

/// Decode a payload into a result object
pub fn decode(params: &[Param], payload: &[u8]) -> Result<Map<String, Value>> {
    let mut cursor = payload;
    let mut out = Map::new();
    let mut count: Option<usize> = None;

    for param in params {
        let mut next_count = None;
        let value = match param.kind {
            ParamType::U8 => {
                need(param, cursor, 1)?;
                let n = cursor.get_u8();
                next_count = Some(n as usize);
                Value::from(n)
            },
            ParamType::U16 => {
                need(param, cursor, 2)?;
                let n = cursor.get_u16_le();
                next_count = Some(n as usize);
                Value::from(n)
            },
            ParamType::U32 => {
                need(param, cursor, 4)?;
                Value::from(cursor.get_u32_le())
            },
            ParamType::IeeeAddr => {
                need(param, cursor, 8)?;
                Value::from(format!("0x{:016x}", cursor.get_u64_le()))
            },
            ParamType::Buffer => {
                let n = count.unwrap_or(cursor.remaining());
                need(param, cursor, n)?;
                let bytes: Vec<Value> = cursor[..n].iter().map(|&b| Value::from(b)).collect();
                cursor.advance(n);
                Value::Array(bytes)
            },
            ParamType::ListU16 => {
                let n = count.unwrap_or(0);
                need(param, cursor, n * 2)?;
                Value::Array((0..n).map(|_| Value::from(cursor.get_u16_le())).collect())
            },
            ParamType::Rest => {
                let bytes = cursor.iter().map(|&b| Value::from(b)).collect();
                let n = cursor.remaining();
                cursor.advance(n);
                Value::Array(bytes)
            },
        };
        out.insert(param.name.to_string(), value);
        count = next_count;
    }

    if cursor.has_remaining() {
        return Err(ProtocolError::TrailingBytes(cursor.remaining()));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NV_WRITE: &[Param] = &[
        p("id", ParamType::U16),
        p("offset", ParamType::U8),
        p("len", ParamType::U8),
        p("value", ParamType::Buffer),
    ];

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_encode_nv_write() {
        let args = obj(json!({"id": 0x0003, "offset": 0, "len": 1, "value": [0x55]}));
        let payload = encode(NV_WRITE, &args).unwrap();
        assert_eq!(&payload[..], &[0x03, 0x00, 0x00, 0x01, 0x55]);
    }

    #[test]
    fn test_encode_missing_argument() {
        let args = obj(json!({"id": 3, "offset": 0}));
        let err = encode(NV_WRITE, &args).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidArgument { ref param, .. } if param == "len"));
    }

    #[test]
    fn test_encode_out_of_range() {
        let args = obj(json!({"id": 70000, "offset": 0, "len": 0, "value": []}));
        assert!(encode(NV_WRITE, &args).is_err());
    }

    #[test]
    fn test_encode_buffer_length_mismatch() {
        let args = obj(json!({"id": 3, "offset": 0, "len": 2, "value": [1]}));
        assert!(encode(NV_WRITE, &args).is_err());
    }

    #[test]
    fn test_ieee_address_roundtrip_format() {
        let params = &[p("extaddress", ParamType::IeeeAddr)];
        let args = obj(json!({"extaddress": "0x00124b0001020304"}));
        let payload = encode(params, &args).unwrap();
        assert_eq!(
            &payload[..],
            &[0x04, 0x03, 0x02, 0x01, 0x00, 0x4b, 0x12, 0x00]
        );

        let decoded = decode(params, &payload).unwrap();
        assert_eq!(decoded["extaddress"], json!("0x00124b0001020304"));
    }

    #[test]
    fn test_decode_counted_list() {
        let params = &[
            p("status", ParamType::U8),
            p("num", ParamType::U8),
            p("list", ParamType::ListU16),
        ];
        let decoded = decode(params, &[0x00, 0x02, 0x34, 0x12, 0x78, 0x56]).unwrap();
        assert_eq!(decoded["num"], json!(2));
        assert_eq!(decoded["list"], json!([0x1234, 0x5678]));
    }

    #[test]
    fn test_decode_short_payload() {
        let params = &[p("capabilities", ParamType::U16)];
        let err = decode(params, &[0x79]).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooShort { needed: 2, available: 1, .. }));
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let params = &[p("status", ParamType::U8)];
        assert!(matches!(
            decode(params, &[0x00, 0x01]),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_decode_rest_takes_everything() {
        let params = &[p("status", ParamType::U8), p("data", ParamType::Rest)];
        let decoded = decode(params, &[0x00, 0xAA, 0xBB]).unwrap();
        assert_eq!(decoded["data"], json!([0xAA, 0xBB]));
    }
}
