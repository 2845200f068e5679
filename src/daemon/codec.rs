//! Operation log and snapshot binary encoding.
//!
//! Log entry framing: `version: u64 LE | timestamp_ms: i64 LE |
//! session_id_len: u16 LE | session_id | op`. An operation is a kind byte
//! followed by its body; compound is kind 0 with a `u32` count of sub-ops.
//! Bodies are canonical: fixed field order, `u32`-length-prefixed UTF-8
//! strings, IEEE-754 LE doubles, and object children in sorted key order.
//! Inverse data follows the forward fields of each body, with one presence
//! byte per optional field.
//!
//! Snapshots share the data-value encoding, prefixed by
//! `(model_id, version: u64 LE, timestamp_ms: i64 LE)`.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::{
    AppliedDiscreteOperation, AppliedOperation, ArrayValue, BooleanValue, DataValue, DateValue,
    DoubleValue, ModelId, NullValue, ObjectValue, SessionId, StringValue, ValueId,
};

use super::store::{ModelOperation, Snapshot};

const KIND_COMPOUND: u8 = 0;
const KIND_STRING_INSERT: u8 = 1;
const KIND_STRING_REMOVE: u8 = 2;
const KIND_STRING_SET: u8 = 3;
const KIND_ARRAY_INSERT: u8 = 4;
const KIND_ARRAY_REMOVE: u8 = 5;
const KIND_ARRAY_REPLACE: u8 = 6;
const KIND_ARRAY_MOVE: u8 = 7;
const KIND_ARRAY_SET: u8 = 8;
const KIND_OBJECT_ADD_PROPERTY: u8 = 9;
const KIND_OBJECT_SET_PROPERTY: u8 = 10;
const KIND_OBJECT_REMOVE_PROPERTY: u8 = 11;
const KIND_OBJECT_SET: u8 = 12;
const KIND_NUMBER_ADD: u8 = 13;
const KIND_NUMBER_SET: u8 = 14;
const KIND_BOOLEAN_SET: u8 = 15;
const KIND_DATE_SET: u8 = 16;

const TAG_OBJECT: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_BOOLEAN: u8 = 5;
const TAG_DATE: u8 = 6;
const TAG_NULL: u8 = 7;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CodecError {
    #[error("encoded entry truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("unknown operation kind {kind}")]
    UnknownKind { kind: u8 },
    #[error("unknown value tag {tag}")]
    UnknownTag { tag: u8 },
    #[error("invalid encoded entry: {reason}")]
    Invalid { reason: String },
}

pub fn encode_operation(entry: &ModelOperation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&entry.version.to_le_bytes());
    buf.extend_from_slice(&entry.timestamp.to_le_bytes());
    let session = entry.session_id.as_str().as_bytes();
    buf.extend_from_slice(&(session.len() as u16).to_le_bytes());
    buf.extend_from_slice(session);
    write_applied(&mut buf, &entry.op);
    buf
}

/// Entries carry no model id on disk; the store supplies the id it keyed
/// the entry under.
pub fn decode_operation(model_id: &ModelId, bytes: &[u8]) -> Result<ModelOperation, CodecError> {
    let mut offset = 0usize;
    let version = read_u64(bytes, &mut offset)?;
    let timestamp = read_i64(bytes, &mut offset)?;
    let session_len = read_u16(bytes, &mut offset)? as usize;
    let session_raw = take(bytes, &mut offset, session_len)?;
    let session_id = SessionId::new(utf8(session_raw)?).map_err(|err| CodecError::Invalid {
        reason: err.to_string(),
    })?;
    let op = read_applied(bytes, &mut offset)?;
    finish(bytes, offset)?;
    Ok(ModelOperation {
        model_id: model_id.clone(),
        version,
        timestamp,
        session_id,
        op,
    })
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    write_string_u16(&mut buf, snapshot.model_id.as_str());
    buf.extend_from_slice(&snapshot.version.to_le_bytes());
    buf.extend_from_slice(&snapshot.timestamp.to_le_bytes());
    write_value(&mut buf, &DataValue::Object(snapshot.root.clone()));
    buf
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    let mut offset = 0usize;
    let model_raw = read_string_u16(bytes, &mut offset)?;
    let model_id = ModelId::new(model_raw).map_err(|err| CodecError::Invalid {
        reason: err.to_string(),
    })?;
    let version = read_u64(bytes, &mut offset)?;
    let timestamp = read_i64(bytes, &mut offset)?;
    let root = match read_value(bytes, &mut offset)? {
        DataValue::Object(obj) => obj,
        other => {
            return Err(CodecError::Invalid {
                reason: format!("snapshot root must be an object, got {}", other.type_name()),
            });
        }
    };
    finish(bytes, offset)?;
    Ok(Snapshot {
        model_id,
        version,
        timestamp,
        root,
    })
}

fn write_applied(buf: &mut Vec<u8>, op: &AppliedOperation) {
    match op {
        AppliedOperation::Compound(ops) => {
            buf.push(KIND_COMPOUND);
            buf.extend_from_slice(&(ops.len() as u32).to_le_bytes());
            for sub in ops {
                write_discrete(buf, sub);
            }
        }
        AppliedOperation::Discrete(op) => write_discrete(buf, op),
    }
}

fn read_applied(bytes: &[u8], offset: &mut usize) -> Result<AppliedOperation, CodecError> {
    let kind = peek_u8(bytes, offset)?;
    if kind == KIND_COMPOUND {
        *offset += 1;
        let count = read_u32(bytes, offset)? as usize;
        let mut ops = Vec::with_capacity(count);
        for _ in 0..count {
            ops.push(read_discrete(bytes, offset)?);
        }
        Ok(AppliedOperation::Compound(ops))
    } else {
        Ok(AppliedOperation::Discrete(read_discrete(bytes, offset)?))
    }
}

fn write_discrete(buf: &mut Vec<u8>, op: &AppliedDiscreteOperation) {
    use AppliedDiscreteOperation::*;
    match op {
        StringInsert {
            vid,
            no_op,
            index,
            value,
        } => {
            write_header(buf, KIND_STRING_INSERT, vid, *no_op);
            write_u32(buf, *index);
            write_string(buf, value);
        }
        StringRemove {
            vid,
            no_op,
            index,
            value,
        } => {
            write_header(buf, KIND_STRING_REMOVE, vid, *no_op);
            write_u32(buf, *index);
            write_string(buf, value);
        }
        StringSet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_STRING_SET, vid, *no_op);
            write_string(buf, value);
            write_string(buf, old_value);
        }
        ArrayInsert {
            vid,
            no_op,
            index,
            value,
        } => {
            write_header(buf, KIND_ARRAY_INSERT, vid, *no_op);
            write_u32(buf, *index);
            write_value(buf, value);
        }
        ArrayRemove {
            vid,
            no_op,
            index,
            old_value,
        } => {
            write_header(buf, KIND_ARRAY_REMOVE, vid, *no_op);
            write_u32(buf, *index);
            write_value(buf, old_value);
        }
        ArrayReplace {
            vid,
            no_op,
            index,
            value,
            old_value,
        } => {
            write_header(buf, KIND_ARRAY_REPLACE, vid, *no_op);
            write_u32(buf, *index);
            write_value(buf, value);
            write_value(buf, old_value);
        }
        ArrayMove {
            vid,
            no_op,
            from_index,
            to_index,
        } => {
            write_header(buf, KIND_ARRAY_MOVE, vid, *no_op);
            write_u32(buf, *from_index);
            write_u32(buf, *to_index);
        }
        ArraySet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_ARRAY_SET, vid, *no_op);
            write_value_seq(buf, value);
            write_value_seq(buf, old_value);
        }
        ObjectAddProperty {
            vid,
            no_op,
            property,
            value,
            old_value,
        } => {
            write_header(buf, KIND_OBJECT_ADD_PROPERTY, vid, *no_op);
            write_string(buf, property);
            write_value(buf, value);
            write_opt_value(buf, old_value);
        }
        ObjectSetProperty {
            vid,
            no_op,
            property,
            value,
            old_value,
        } => {
            write_header(buf, KIND_OBJECT_SET_PROPERTY, vid, *no_op);
            write_string(buf, property);
            write_value(buf, value);
            write_opt_value(buf, old_value);
        }
        ObjectRemoveProperty {
            vid,
            no_op,
            property,
            old_value,
        } => {
            write_header(buf, KIND_OBJECT_REMOVE_PROPERTY, vid, *no_op);
            write_string(buf, property);
            write_value(buf, old_value);
        }
        ObjectSet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_OBJECT_SET, vid, *no_op);
            write_value_map(buf, value);
            write_value_map(buf, old_value);
        }
        NumberAdd { vid, no_op, value } => {
            write_header(buf, KIND_NUMBER_ADD, vid, *no_op);
            write_f64(buf, *value);
        }
        NumberSet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_NUMBER_SET, vid, *no_op);
            write_f64(buf, *value);
            write_f64(buf, *old_value);
        }
        BooleanSet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_BOOLEAN_SET, vid, *no_op);
            buf.push(*value as u8);
            buf.push(*old_value as u8);
        }
        DateSet {
            vid,
            no_op,
            value,
            old_value,
        } => {
            write_header(buf, KIND_DATE_SET, vid, *no_op);
            buf.extend_from_slice(&value.to_le_bytes());
            buf.extend_from_slice(&old_value.to_le_bytes());
        }
    }
}

fn read_discrete(
    bytes: &[u8],
    offset: &mut usize,
) -> Result<AppliedDiscreteOperation, CodecError> {
    use AppliedDiscreteOperation::*;
    let kind = read_u8(bytes, offset)?;
    let vid = read_vid(bytes, offset)?;
    let no_op = read_bool(bytes, offset)?;
    match kind {
        KIND_STRING_INSERT => Ok(StringInsert {
            vid,
            no_op,
            index: read_u32(bytes, offset)? as usize,
            value: read_string(bytes, offset)?,
        }),
        KIND_STRING_REMOVE => Ok(StringRemove {
            vid,
            no_op,
            index: read_u32(bytes, offset)? as usize,
            value: read_string(bytes, offset)?,
        }),
        KIND_STRING_SET => Ok(StringSet {
            vid,
            no_op,
            value: read_string(bytes, offset)?,
            old_value: read_string(bytes, offset)?,
        }),
        KIND_ARRAY_INSERT => Ok(ArrayInsert {
            vid,
            no_op,
            index: read_u32(bytes, offset)? as usize,
            value: read_value(bytes, offset)?,
        }),
        KIND_ARRAY_REMOVE => Ok(ArrayRemove {
            vid,
            no_op,
            index: read_u32(bytes, offset)? as usize,
            old_value: read_value(bytes, offset)?,
        }),
        KIND_ARRAY_REPLACE => Ok(ArrayReplace {
            vid,
            no_op,
            index: read_u32(bytes, offset)? as usize,
            value: read_value(bytes, offset)?,
            old_value: read_value(bytes, offset)?,
        }),
        KIND_ARRAY_MOVE => Ok(ArrayMove {
            vid,
            no_op,
            from_index: read_u32(bytes, offset)? as usize,
            to_index: read_u32(bytes, offset)? as usize,
        }),
        KIND_ARRAY_SET => Ok(ArraySet {
            vid,
            no_op,
            value: read_value_seq(bytes, offset)?,
            old_value: read_value_seq(bytes, offset)?,
        }),
        KIND_OBJECT_ADD_PROPERTY => Ok(ObjectAddProperty {
            vid,
            no_op,
            property: read_string(bytes, offset)?,
            value: read_value(bytes, offset)?,
            old_value: read_opt_value(bytes, offset)?,
        }),
        KIND_OBJECT_SET_PROPERTY => Ok(ObjectSetProperty {
            vid,
            no_op,
            property: read_string(bytes, offset)?,
            value: read_value(bytes, offset)?,
            old_value: read_opt_value(bytes, offset)?,
        }),
        KIND_OBJECT_REMOVE_PROPERTY => Ok(ObjectRemoveProperty {
            vid,
            no_op,
            property: read_string(bytes, offset)?,
            old_value: read_value(bytes, offset)?,
        }),
        KIND_OBJECT_SET => Ok(ObjectSet {
            vid,
            no_op,
            value: read_value_map(bytes, offset)?,
            old_value: read_value_map(bytes, offset)?,
        }),
        KIND_NUMBER_ADD => Ok(NumberAdd {
            vid,
            no_op,
            value: read_f64(bytes, offset)?,
        }),
        KIND_NUMBER_SET => Ok(NumberSet {
            vid,
            no_op,
            value: read_f64(bytes, offset)?,
            old_value: read_f64(bytes, offset)?,
        }),
        KIND_BOOLEAN_SET => Ok(BooleanSet {
            vid,
            no_op,
            value: read_bool(bytes, offset)?,
            old_value: read_bool(bytes, offset)?,
        }),
        KIND_DATE_SET => Ok(DateSet {
            vid,
            no_op,
            value: read_i64(bytes, offset)?,
            old_value: read_i64(bytes, offset)?,
        }),
        other => Err(CodecError::UnknownKind { kind: other }),
    }
}

fn write_value(buf: &mut Vec<u8>, value: &DataValue) {
    match value {
        DataValue::Object(obj) => {
            buf.push(TAG_OBJECT);
            write_string(buf, obj.vid.as_str());
            write_u32(buf, obj.children.len());
            for (key, child) in &obj.children {
                write_string(buf, key);
                write_value(buf, child);
            }
        }
        DataValue::Array(arr) => {
            buf.push(TAG_ARRAY);
            write_string(buf, arr.vid.as_str());
            write_u32(buf, arr.children.len());
            for child in &arr.children {
                write_value(buf, child);
            }
        }
        DataValue::String(v) => {
            buf.push(TAG_STRING);
            write_string(buf, v.vid.as_str());
            write_string(buf, &v.value);
        }
        DataValue::Double(v) => {
            buf.push(TAG_DOUBLE);
            write_string(buf, v.vid.as_str());
            write_f64(buf, v.value);
        }
        DataValue::Boolean(v) => {
            buf.push(TAG_BOOLEAN);
            write_string(buf, v.vid.as_str());
            buf.push(v.value as u8);
        }
        DataValue::Date(v) => {
            buf.push(TAG_DATE);
            write_string(buf, v.vid.as_str());
            buf.extend_from_slice(&v.value.to_le_bytes());
        }
        DataValue::Null(v) => {
            buf.push(TAG_NULL);
            write_string(buf, v.vid.as_str());
        }
    }
}

fn read_value(bytes: &[u8], offset: &mut usize) -> Result<DataValue, CodecError> {
    let tag = read_u8(bytes, offset)?;
    let vid = read_vid(bytes, offset)?;
    match tag {
        TAG_OBJECT => {
            let count = read_u32(bytes, offset)? as usize;
            let mut children = BTreeMap::new();
            for _ in 0..count {
                let key = read_string(bytes, offset)?;
                children.insert(key, read_value(bytes, offset)?);
            }
            Ok(DataValue::Object(ObjectValue { vid, children }))
        }
        TAG_ARRAY => {
            let count = read_u32(bytes, offset)? as usize;
            let mut children = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                children.push(read_value(bytes, offset)?);
            }
            Ok(DataValue::Array(ArrayValue { vid, children }))
        }
        TAG_STRING => Ok(DataValue::String(StringValue {
            vid,
            value: read_string(bytes, offset)?,
        })),
        TAG_DOUBLE => Ok(DataValue::Double(DoubleValue {
            vid,
            value: read_f64(bytes, offset)?,
        })),
        TAG_BOOLEAN => Ok(DataValue::Boolean(BooleanValue {
            vid,
            value: read_bool(bytes, offset)?,
        })),
        TAG_DATE => Ok(DataValue::Date(DateValue {
            vid,
            value: read_i64(bytes, offset)?,
        })),
        TAG_NULL => Ok(DataValue::Null(NullValue { vid })),
        other => Err(CodecError::UnknownTag { tag: other }),
    }
}

fn write_header(buf: &mut Vec<u8>, kind: u8, vid: &ValueId, no_op: bool) {
    buf.push(kind);
    write_string(buf, vid.as_str());
    buf.push(no_op as u8);
}

fn write_value_seq(buf: &mut Vec<u8>, values: &[DataValue]) {
    write_u32(buf, values.len());
    for value in values {
        write_value(buf, value);
    }
}

fn read_value_seq(bytes: &[u8], offset: &mut usize) -> Result<Vec<DataValue>, CodecError> {
    let count = read_u32(bytes, offset)? as usize;
    let mut values = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        values.push(read_value(bytes, offset)?);
    }
    Ok(values)
}

fn write_value_map(buf: &mut Vec<u8>, values: &BTreeMap<String, DataValue>) {
    write_u32(buf, values.len());
    for (key, value) in values {
        write_string(buf, key);
        write_value(buf, value);
    }
}

fn read_value_map(
    bytes: &[u8],
    offset: &mut usize,
) -> Result<BTreeMap<String, DataValue>, CodecError> {
    let count = read_u32(bytes, offset)? as usize;
    let mut values = BTreeMap::new();
    for _ in 0..count {
        let key = read_string(bytes, offset)?;
        values.insert(key, read_value(bytes, offset)?);
    }
    Ok(values)
}

fn write_opt_value(buf: &mut Vec<u8>, value: &Option<DataValue>) {
    match value {
        Some(value) => {
            buf.push(1);
            write_value(buf, value);
        }
        None => buf.push(0),
    }
}

fn read_opt_value(bytes: &[u8], offset: &mut usize) -> Result<Option<DataValue>, CodecError> {
    if read_bool(bytes, offset)? {
        Ok(Some(read_value(bytes, offset)?))
    } else {
        Ok(None)
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len());
    buf.extend_from_slice(s.as_bytes());
}

fn write_string_u16(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_u32(buf: &mut Vec<u8>, value: usize) {
    buf.extend_from_slice(&(value as u32).to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn read_vid(bytes: &[u8], offset: &mut usize) -> Result<ValueId, CodecError> {
    let raw = read_string(bytes, offset)?;
    ValueId::new(raw).map_err(|err| CodecError::Invalid {
        reason: err.to_string(),
    })
}

fn read_string(bytes: &[u8], offset: &mut usize) -> Result<String, CodecError> {
    let len = read_u32(bytes, offset)? as usize;
    let raw = take(bytes, offset, len)?;
    utf8(raw)
}

fn read_string_u16(bytes: &[u8], offset: &mut usize) -> Result<String, CodecError> {
    let len = read_u16(bytes, offset)? as usize;
    let raw = take(bytes, offset, len)?;
    utf8(raw)
}

fn utf8(raw: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::Invalid {
        reason: "string is not valid UTF-8".to_string(),
    })
}

fn peek_u8(bytes: &[u8], offset: &usize) -> Result<u8, CodecError> {
    bytes
        .get(*offset)
        .copied()
        .ok_or(CodecError::Truncated { offset: *offset })
}

fn read_u8(bytes: &[u8], offset: &mut usize) -> Result<u8, CodecError> {
    let slice = take(bytes, offset, 1)?;
    Ok(slice[0])
}

fn read_bool(bytes: &[u8], offset: &mut usize) -> Result<bool, CodecError> {
    Ok(read_u8(bytes, offset)? != 0)
}

fn read_u16(bytes: &[u8], offset: &mut usize) -> Result<u16, CodecError> {
    let slice = take(bytes, offset, 2)?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], offset: &mut usize) -> Result<u32, CodecError> {
    let slice = take(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], offset: &mut usize) -> Result<u64, CodecError> {
    let slice = take(bytes, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Ok(u64::from_le_bytes(raw))
}

fn read_i64(bytes: &[u8], offset: &mut usize) -> Result<i64, CodecError> {
    let slice = take(bytes, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Ok(i64::from_le_bytes(raw))
}

fn read_f64(bytes: &[u8], offset: &mut usize) -> Result<f64, CodecError> {
    let slice = take(bytes, offset, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Ok(f64::from_le_bytes(raw))
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8], CodecError> {
    let end = offset
        .checked_add(len)
        .ok_or(CodecError::Truncated { offset: *offset })?;
    if end > bytes.len() {
        return Err(CodecError::Truncated { offset: *offset });
    }
    let slice = &bytes[*offset..end];
    *offset = end;
    Ok(slice)
}

fn finish(bytes: &[u8], offset: usize) -> Result<(), CodecError> {
    if offset != bytes.len() {
        return Err(CodecError::Invalid {
            reason: format!(
                "entry has {} trailing bytes after offset {offset}",
                bytes.len() - offset
            ),
        });
    }
    Ok(())
}
