// Helper functions for reading and writing JDWP data types

use crate::protocol::{JdwpError, JdwpResult};
use crate::types::{tags, Location, ObjectId, Value};
use bytes::{Buf, BufMut};

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    if buf.remaining() < 4 {
        return Err(JdwpError::Protocol(
            "Not enough data for string length".to_string(),
        ));
    }

    let len = buf.get_u32() as usize;

    if buf.remaining() < len {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for string: expected {}, got {}",
            len,
            buf.remaining()
        )));
    }

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

/// Write a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    if buf.remaining() < 1 {
        return Err(JdwpError::Protocol("Not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

/// Read a i32
pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    if buf.remaining() < 4 {
        return Err(JdwpError::Protocol("Not enough data for i32".to_string()));
    }
    Ok(buf.get_i32())
}

/// Read a u32
pub fn read_u32(buf: &mut &[u8]) -> JdwpResult<u32> {
    if buf.remaining() < 4 {
        return Err(JdwpError::Protocol("Not enough data for u32".to_string()));
    }
    Ok(buf.get_u32())
}

/// Read a u64
pub fn read_u64(buf: &mut &[u8]) -> JdwpResult<u64> {
    if buf.remaining() < 8 {
        return Err(JdwpError::Protocol("Not enough data for u64".to_string()));
    }
    Ok(buf.get_u64())
}

/// Read a location (type tag + class id + method id + bytecode index)
pub fn read_location(buf: &mut &[u8]) -> JdwpResult<Location> {
    let type_tag = read_u8(buf)?;
    let class_id = read_u64(buf)?;
    let method_id = read_u64(buf)?;
    let index = read_u64(buf)?;

    Ok(Location {
        type_tag,
        class_id,
        method_id,
        index,
    })
}

/// Read a tagged value (tag byte followed by tag-dependent data)
pub fn read_tagged_value(buf: &mut &[u8]) -> JdwpResult<Value> {
    let tag = read_u8(buf)?;
    read_value_with_tag(tag, buf)
}

/// Read the data of a value whose tag is already known
pub fn read_value_with_tag(tag: u8, buf: &mut &[u8]) -> JdwpResult<Value> {
    match tag {
        tags::BYTE => Ok(Value::Byte(buf.get_i8())),
        tags::CHAR => Ok(Value::Char(buf.get_u16())),
        tags::DOUBLE => Ok(Value::Double(buf.get_f64())),
        tags::FLOAT => Ok(Value::Float(buf.get_f32())),
        tags::INT => Ok(Value::Int(buf.get_i32())),
        tags::LONG => Ok(Value::Long(buf.get_i64())),
        tags::SHORT => Ok(Value::Short(buf.get_i16())),
        tags::BOOLEAN => Ok(Value::Boolean(buf.get_u8() != 0)),
        tags::VOID => Ok(Value::Void),
        // Object family: L, s, t, g, l, c, [
        tags::OBJECT
        | tags::STRING
        | tags::THREAD
        | tags::THREAD_GROUP
        | tags::CLASS_LOADER
        | tags::CLASS_OBJECT
        | tags::ARRAY => {
            let id = read_u64(buf)?;
            Ok(Value::Object { tag, id })
        }
        _ => Err(JdwpError::Protocol(format!("Unknown value tag: {}", tag))),
    }
}

/// Read a tagged object reference; returns `None` for the null reference.
pub fn read_tagged_object_id(buf: &mut &[u8]) -> JdwpResult<Option<(u8, ObjectId)>> {
    let tag = read_u8(buf)?;
    let id = read_u64(buf)?;
    if id == 0 {
        Ok(None)
    } else {
        Ok(Some((tag, id)))
    }
}

/// Write a tagged value (tag byte + data)
pub fn write_tagged_value(buf: &mut Vec<u8>, value: &Value) {
    buf.put_u8(value.tag());
    write_untagged_value(buf, value);
}

/// Write a value without its tag byte (the receiver knows the type)
pub fn write_untagged_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Byte(v) => buf.put_i8(*v),
        Value::Char(v) => buf.put_u16(*v),
        Value::Short(v) => buf.put_i16(*v),
        Value::Int(v) => buf.put_i32(*v),
        Value::Long(v) => buf.put_i64(*v),
        Value::Float(v) => buf.put_f32(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::Void => {}
        Value::Object { id, .. } => buf.put_u64(*id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "Ljava/lang/String;");
        let mut slice = buf.as_slice();
        assert_eq!(read_string(&mut slice).unwrap(), "Ljava/lang/String;");
        assert!(slice.is_empty());
    }

    #[test]
    fn test_string_truncated() {
        let mut buf = Vec::new();
        write_string(&mut buf, "hello");
        let mut slice = &buf[..6];
        assert!(read_string(&mut slice).is_err());
    }

    #[test]
    fn test_tagged_value_round_trip() {
        let values = [
            Value::Int(-42),
            Value::Boolean(true),
            Value::Long(1 << 40),
            Value::Object {
                tag: tags::STRING,
                id: 0x1234,
            },
        ];
        for value in values {
            let mut buf = Vec::new();
            write_tagged_value(&mut buf, &value);
            let mut slice = buf.as_slice();
            assert_eq!(read_tagged_value(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn test_null_tagged_object() {
        let mut buf = Vec::new();
        buf.put_u8(tags::OBJECT);
        buf.put_u64(0);
        let mut slice = buf.as_slice();
        assert_eq!(read_tagged_object_id(&mut slice).unwrap(), None);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let buf = [0xFFu8, 0, 0, 0, 0];
        let mut slice = &buf[..];
        assert!(read_tagged_value(&mut slice).is_err());
    }
}
