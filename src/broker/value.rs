//! Topic values and the binary value frame codec.
//!
//! A value travels on the wire as a MessagePack array
//! `[id, timestamp_us, type_id, value]`; a binary WebSocket frame carries any
//! number of these arrays back to back. `id` is a pubuid when a client sends a
//! value and a topic id when the server sends one.

use std::fmt;
use std::io::Cursor;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

pub const TYPE_BOOLEAN: u8 = 0;
pub const TYPE_DOUBLE: u8 = 1;
pub const TYPE_INT: u8 = 2;
pub const TYPE_FLOAT: u8 = 3;
pub const TYPE_STRING: u8 = 4;
pub const TYPE_RAW: u8 = 5;
pub const TYPE_BOOLEAN_ARRAY: u8 = 16;
pub const TYPE_DOUBLE_ARRAY: u8 = 17;
pub const TYPE_INT_ARRAY: u8 = 18;
pub const TYPE_FLOAT_ARRAY: u8 = 19;
pub const TYPE_STRING_ARRAY: u8 = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Double(f64),
    Int(i64),
    Float(f32),
    String(String),
    Raw(Vec<u8>),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f32>),
    StringArray(Vec<String>),
}

impl Value {
    pub fn type_id(&self) -> u8 {
        match self {
            Value::Boolean(_) => TYPE_BOOLEAN,
            Value::Double(_) => TYPE_DOUBLE,
            Value::Int(_) => TYPE_INT,
            Value::Float(_) => TYPE_FLOAT,
            Value::String(_) => TYPE_STRING,
            Value::Raw(_) => TYPE_RAW,
            Value::BooleanArray(_) => TYPE_BOOLEAN_ARRAY,
            Value::DoubleArray(_) => TYPE_DOUBLE_ARRAY,
            Value::IntArray(_) => TYPE_INT_ARRAY,
            Value::FloatArray(_) => TYPE_FLOAT_ARRAY,
            Value::StringArray(_) => TYPE_STRING_ARRAY,
        }
    }

    /// The type string a publisher would normally declare for this value.
    pub fn type_str(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Double(_) => "double",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Raw(_) => "raw",
            Value::BooleanArray(_) => "boolean[]",
            Value::DoubleArray(_) => "double[]",
            Value::IntArray(_) => "int[]",
            Value::FloatArray(_) => "float[]",
            Value::StringArray(_) => "string[]",
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Boolean(v) => serializer.serialize_bool(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Raw(v) => serializer.serialize_bytes(v),
            Value::BooleanArray(v) => v.serialize(serializer),
            Value::DoubleArray(v) => v.serialize(serializer),
            Value::IntArray(v) => v.serialize(serializer),
            Value::FloatArray(v) => v.serialize(serializer),
            Value::StringArray(v) => v.serialize(serializer),
        }
    }
}

/// A value together with its source timestamp in microseconds.
///
/// A timestamp of 0 means "unset"; the broker stamps such values with its own
/// clock when they are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedValue {
    pub value: Value,
    pub time: i64,
}

impl TimestampedValue {
    pub fn new(value: Value, time: i64) -> Self {
        Self { value, time }
    }
}

/// One `[id, timestamp, type, value]` entry of a binary frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFrame {
    pub id: i64,
    pub time: i64,
    pub value: Value,
}

impl Serialize for ValueFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.id)?;
        tuple.serialize_element(&self.time)?;
        tuple.serialize_element(&self.value.type_id())?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for ValueFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_seq(FrameVisitor)
    }
}

struct FrameVisitor;

const FRAME_EXPECTED: &str = "a [id, timestamp, type, value] array";

fn element<'de, A, T>(seq: &mut A, index: usize) -> std::result::Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::invalid_length(index, &FRAME_EXPECTED))
}

impl<'de> Visitor<'de> for FrameVisitor {
    type Value = ValueFrame;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(FRAME_EXPECTED)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<ValueFrame, A::Error> {
        let id: i64 = element(&mut seq, 0)?;
        let time: i64 = element(&mut seq, 1)?;
        let type_id: u8 = element(&mut seq, 2)?;
        let value = match type_id {
            TYPE_BOOLEAN => Value::Boolean(element(&mut seq, 3)?),
            TYPE_DOUBLE => Value::Double(element(&mut seq, 3)?),
            TYPE_INT => Value::Int(element(&mut seq, 3)?),
            TYPE_FLOAT => Value::Float(element(&mut seq, 3)?),
            TYPE_STRING => Value::String(element(&mut seq, 3)?),
            TYPE_RAW => Value::Raw(element::<_, RawBytes>(&mut seq, 3)?.0),
            TYPE_BOOLEAN_ARRAY => Value::BooleanArray(element(&mut seq, 3)?),
            TYPE_DOUBLE_ARRAY => Value::DoubleArray(element(&mut seq, 3)?),
            TYPE_INT_ARRAY => Value::IntArray(element(&mut seq, 3)?),
            TYPE_FLOAT_ARRAY => Value::FloatArray(element(&mut seq, 3)?),
            TYPE_STRING_ARRAY => Value::StringArray(element(&mut seq, 3)?),
            other => {
                return Err(de::Error::custom(format!("unknown value type {other}")));
            }
        };
        Ok(ValueFrame { id, time, value })
    }
}

/// MessagePack `bin` payload; also accepts an array of bytes.
struct RawBytes(Vec<u8>);

impl<'de> Deserialize<'de> for RawBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RawVisitor;

        impl<'de> Visitor<'de> for RawVisitor {
            type Value = RawBytes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("binary data")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<RawBytes, E> {
                Ok(RawBytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<RawBytes, E> {
                Ok(RawBytes(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<RawBytes, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(RawBytes(bytes))
            }
        }

        deserializer.deserialize_bytes(RawVisitor)
    }
}

/// Encodes frames back to back into one binary payload.
pub fn encode_value_frames(frames: &[ValueFrame]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(frames.len() * 16);
    for frame in frames {
        rmp_serde::encode::write(&mut buf, frame)?;
    }
    Ok(buf)
}

/// Decodes every frame in a binary payload.
pub fn decode_value_frames(data: &[u8]) -> Result<Vec<ValueFrame>> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(data));
    let mut frames = Vec::new();
    while (de.get_ref().position() as usize) < data.len() {
        frames.push(ValueFrame::deserialize(&mut de)?);
    }
    Ok(frames)
}
