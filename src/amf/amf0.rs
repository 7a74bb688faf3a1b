//! AMF0 encoder and decoder
//!
//! AMF0 is the original Action Message Format used in Flash/RTMP.
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (16-bit index)
//! 0x08 - ECMA Array (associative array)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (dense array)
//! 0x0B - Date (timezone + double)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0F - XML Document
//! 0x10 - Typed Object (class name + properties)
//! ```
//!
//! Decoding returns the number of bytes consumed alongside the value so
//! callers can walk a buffer of concatenated values. Any marker outside the
//! table above is a hard error: skipping an unknown value would
//! desynchronize the rest of the stream.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::AmfError;

use super::value::Amf0Value;

// AMF0 type markers
const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_REFERENCE: u8 = 0x07;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;
const MARKER_XML_DOCUMENT: u8 = 0x0F;
const MARKER_TYPED_OBJECT: u8 = 0x10;

/// Decode a single AMF0 value, returning the value and the number of bytes
/// consumed from the front of `buf`.
pub fn decode_one(buf: &[u8]) -> Result<(Amf0Value, usize), AmfError> {
    let marker = *buf.first().ok_or(AmfError::UnexpectedEof)?;
    match marker {
        MARKER_NUMBER => {
            let n = read_f64(buf, 1)?;
            Ok((Amf0Value::Number(n), 9))
        }
        MARKER_BOOLEAN => {
            let b = *buf.get(1).ok_or(AmfError::UnexpectedEof)?;
            Ok((Amf0Value::Boolean(b != 0), 2))
        }
        MARKER_STRING => {
            let (s, n) = read_utf8(buf, 1)?;
            Ok((Amf0Value::String(s), 1 + n))
        }
        MARKER_OBJECT => {
            let (props, n) = decode_properties(&buf[1..])?;
            Ok((Amf0Value::Object(props), 1 + n))
        }
        MARKER_NULL => Ok((Amf0Value::Null, 1)),
        MARKER_UNDEFINED => Ok((Amf0Value::Undefined, 1)),
        MARKER_REFERENCE => {
            let index = read_u16(buf, 1)?;
            Ok((Amf0Value::Reference(index), 3))
        }
        MARKER_ECMA_ARRAY => {
            // The 32-bit element count is advisory; properties are terminated
            // by the object end marker like a plain object.
            if buf.len() < 5 {
                return Err(AmfError::UnexpectedEof);
            }
            let (props, n) = decode_properties(&buf[5..])?;
            Ok((Amf0Value::EcmaArray(props), 5 + n))
        }
        MARKER_STRICT_ARRAY => {
            let count = read_u32(buf, 1)? as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            let mut pos = 5;
            for _ in 0..count {
                let (value, n) = decode_one(&buf[pos..])?;
                items.push(value);
                pos += n;
            }
            Ok((Amf0Value::StrictArray(items), pos))
        }
        MARKER_DATE => {
            // Marker, 16-bit timezone (ignored), 64-bit double
            let ts = read_f64(buf, 3)?;
            Ok((Amf0Value::Date(ts), 11))
        }
        MARKER_LONG_STRING => {
            let (s, n) = read_utf8_long(buf, 1)?;
            Ok((Amf0Value::String(s), 1 + n))
        }
        MARKER_XML_DOCUMENT => {
            let (s, n) = read_utf8(buf, 1)?;
            Ok((Amf0Value::XmlDocument(s), 1 + n))
        }
        MARKER_TYPED_OBJECT => {
            let (class_name, n) = read_utf8(buf, 1)?;
            let (properties, m) = decode_properties(&buf[1 + n..])?;
            Ok((
                Amf0Value::TypedObject {
                    class_name,
                    properties,
                },
                1 + n + m,
            ))
        }
        other => Err(AmfError::UnsupportedType(other)),
    }
}

/// Decode every value in the buffer, in order.
pub fn decode_all(buf: &[u8]) -> Result<Vec<Amf0Value>, AmfError> {
    let mut values = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let (value, n) = decode_one(&buf[pos..])?;
        values.push(value);
        pos += n;
    }
    Ok(values)
}

/// Encode a single AMF0 value.
///
/// Fails for [`Amf0Value::TypedObject`]: typed-object encoding is
/// intentionally unsupported and callers must not rely on round-tripping it.
pub fn encode_one(value: &Amf0Value) -> Result<Bytes, AmfError> {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a sequence of values into one buffer.
pub fn encode_all(values: &[Amf0Value]) -> Result<Bytes, AmfError> {
    let mut buf = BytesMut::with_capacity(128);
    for value in values {
        encode_into(value, &mut buf)?;
    }
    Ok(buf.freeze())
}

fn encode_into(value: &Amf0Value, buf: &mut BytesMut) -> Result<(), AmfError> {
    match value {
        Amf0Value::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        // Integers share the number marker; the split exists only for
        // encoder-side dispatch and the bytes are identical.
        Amf0Value::Integer(i) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*i as f64);
        }
        Amf0Value::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(if *b { 1 } else { 0 });
        }
        Amf0Value::String(s) => {
            if s.len() > 0xFFFF {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
            } else {
                buf.put_u8(MARKER_STRING);
                buf.put_u16(s.len() as u16);
            }
            buf.put_slice(s.as_bytes());
        }
        Amf0Value::Object(props) => {
            buf.put_u8(MARKER_OBJECT);
            encode_properties(props, buf)?;
        }
        Amf0Value::Null => buf.put_u8(MARKER_NULL),
        Amf0Value::Undefined => buf.put_u8(MARKER_UNDEFINED),
        Amf0Value::Reference(index) => {
            buf.put_u8(MARKER_REFERENCE);
            buf.put_u16(*index);
        }
        Amf0Value::EcmaArray(props) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(props.len() as u32);
            encode_properties(props, buf)?;
        }
        Amf0Value::StrictArray(items) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(items.len() as u32);
            for item in items {
                encode_into(item, buf)?;
            }
        }
        Amf0Value::Date(ts) => {
            buf.put_u8(MARKER_DATE);
            buf.put_i16(0); // timezone, always zero
            buf.put_f64(*ts);
        }
        Amf0Value::XmlDocument(s) => {
            buf.put_u8(MARKER_XML_DOCUMENT);
            buf.put_u16(s.len() as u16);
            buf.put_slice(s.as_bytes());
        }
        Amf0Value::TypedObject { .. } => return Err(AmfError::TypedObjectEncoding),
    }
    Ok(())
}

/// Decode untyped key/value pairs up to and including the object end marker.
///
/// Returns the properties and the bytes consumed. An empty key that is not
/// followed by the end marker is tolerated as an implicit terminator; some
/// producers omit the final 0x09.
fn decode_properties(buf: &[u8]) -> Result<(Vec<(String, Amf0Value)>, usize), AmfError> {
    let mut props = Vec::new();
    let mut pos = 0;
    loop {
        match buf.get(pos) {
            None => return Err(AmfError::UnexpectedEof),
            Some(&MARKER_OBJECT_END) => break,
            Some(_) => {}
        }
        let (key, n) = read_ustring(buf, pos)?;
        pos += n;
        if buf.get(pos) == Some(&MARKER_OBJECT_END) {
            pos += 1;
            break;
        }
        if key.is_empty() {
            break;
        }
        let (value, n) = decode_one(&buf[pos..])?;
        props.push((key, value));
        pos += n;
    }
    Ok((props, pos))
}

fn encode_properties(props: &[(String, Amf0Value)], buf: &mut BytesMut) -> Result<(), AmfError> {
    for (key, value) in props {
        write_ustring(key, buf);
        encode_into(value, buf)?;
    }
    buf.put_u16(0); // empty key
    buf.put_u8(MARKER_OBJECT_END);
    Ok(())
}

/// Read a UTF-8 string with a 16-bit length prefix and no type marker.
fn read_ustring(buf: &[u8], pos: usize) -> Result<(String, usize), AmfError> {
    let len = read_u16(buf, pos)? as usize;
    let start = pos + 2;
    let bytes = buf
        .get(start..start + len)
        .ok_or(AmfError::UnexpectedEof)?;
    let s = std::str::from_utf8(bytes).map_err(|_| AmfError::InvalidUtf8)?;
    Ok((s.to_string(), 2 + len))
}

fn write_ustring(s: &str, buf: &mut BytesMut) {
    buf.put_u16(s.len().min(0xFFFF) as u16);
    buf.put_slice(&s.as_bytes()[..s.len().min(0xFFFF)]);
}

/// Read a marker-adjacent UTF-8 string (16-bit length at `pos`).
fn read_utf8(buf: &[u8], pos: usize) -> Result<(String, usize), AmfError> {
    read_ustring(buf, pos)
}

/// Read a UTF-8 string with a 32-bit length prefix.
fn read_utf8_long(buf: &[u8], pos: usize) -> Result<(String, usize), AmfError> {
    let len = read_u32(buf, pos)? as usize;
    let start = pos + 4;
    let bytes = buf
        .get(start..start + len)
        .ok_or(AmfError::UnexpectedEof)?;
    let s = std::str::from_utf8(bytes).map_err(|_| AmfError::InvalidUtf8)?;
    Ok((s.to_string(), 4 + len))
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, AmfError> {
    let bytes = buf.get(pos..pos + 2).ok_or(AmfError::UnexpectedEof)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, AmfError> {
    let bytes = buf.get(pos..pos + 4).ok_or(AmfError::UnexpectedEof)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_f64(buf: &[u8], pos: usize) -> Result<f64, AmfError> {
    let bytes = buf.get(pos..pos + 8).ok_or(AmfError::UnexpectedEof)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(f64::from_be_bytes(raw))
}
