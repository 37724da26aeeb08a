//! Runtime shape dispatch for [`ValueOut::object`](crate::ValueOut::object).
//!
//! Rules are tried in order and the first match wins:
//!
//! | # | shape                     | types                                                        | written as                |
//! |---|---------------------------|--------------------------------------------------------------|---------------------------|
//! | 1 | raw byte block            | `Vec<u8>`                                                    | `raw_bytes`               |
//! | 2 | null                      | `None`                                                       | `text(None)`              |
//! | 3 | mapping                   | `BTreeMap`/`HashMap` of `String` to `String` or `Box<dyn Any>` | `map`                   |
//! | 4 | boxed primitive           | `i8 bool char i16 i32 i64 f64 f32 u8 u16 u32`                | matching primitive        |
//! | 5 | structured value          | `Box<dyn Marshallable>`, `Arc<dyn Marshallable>`             | `typed_marshallable`      |
//! | 6 | error                     | `Throwable`, `Box<dyn Error + Send + Sync>`                  | `throwable`               |
//! | 7 | byte block as value       | `Bytes`, `BytesMut`                                          | `bytes`                   |
//! | 8 | text                      | `String`, `&'static str`, `Box<str>`                         | `text`                    |
//! | 9 | enum                      | `Box<dyn Scalar>`                                            | `typed_scalar`            |
//! | 10| string array              | `Box<[String]>`, `Box<[&'static str]>`                       | sequence of text          |
//! | 11| collection                | string `Vec`/`VecDeque`/sets, `Vec<Box<dyn Any>>`, primitive `Vec`s | sequence of text    |
//! | 12| serialized lambda         | `SerializedLambda`                                           | typed object              |
//! | 13| object array              | `Box<[Box<dyn Any>]>`                                        | sequence, per element     |
//! | 14| wire value                | `WireValue`                                                  | `value`                   |
//!
//! Empty collections of any element type write an empty sequence; non-empty
//! collections of anything but text are rejected with `UnsupportedOperation`.
//! Anything else is an `IllegalState` naming the type.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::error::Error;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::out::ValueOut;
use crate::value::{Marshallable, Scalar, SerializedLambda, Throwable, WireValue};

pub(crate) enum Shape<'a> {
    RawBytes(&'a [u8]),
    Map(Vec<(&'a dyn Any, &'a dyn Any)>),
    Int8(i8),
    Bool(bool),
    Char(char),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Float32(f32),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Marshallable(&'a dyn Marshallable),
    Throwable(Cow<'a, Throwable>),
    Bytes(&'a [u8]),
    Text(&'a str),
    Scalar(&'a dyn Scalar),
    Strings(Vec<&'a str>),
    Lambda(&'a SerializedLambda),
    Objects(&'a [Box<dyn Any>]),
    Value(&'a WireValue),
}

type Rule = fn(&dyn Any) -> Option<Result<Shape<'_>>>;

const RULES: &[(&str, Rule)] = &[
    ("raw bytes", raw_bytes),
    ("map", map),
    ("primitive", primitive),
    ("marshallable", marshallable),
    ("throwable", throwable),
    ("byte block", byte_block),
    ("text", text),
    ("scalar", scalar),
    ("string array", string_array),
    ("collection", collection),
    ("serialized lambda", lambda),
    ("object array", object_array),
    ("wire value", wire_value),
];

pub(crate) fn classify<'a>(value: &'a dyn Any, type_name: &str) -> Result<Shape<'a>> {
    for (_, rule) in RULES {
        if let Some(shape) = rule(value) {
            return shape;
        }
    }
    Err(WireError::IllegalState(format!(
        "type={type_name} is not supported by the object writer"
    )))
}

/// Whether a map key or value is one of the shapes a map may hold.
pub(crate) fn is_map_element(value: &dyn Any) -> bool {
    matches!(
        classify(value, ""),
        Ok(Shape::Int8(_)
            | Shape::Bool(_)
            | Shape::Char(_)
            | Shape::Int16(_)
            | Shape::Int32(_)
            | Shape::Int64(_)
            | Shape::Float64(_)
            | Shape::Float32(_)
            | Shape::UInt8(_)
            | Shape::UInt16(_)
            | Shape::UInt32(_)
            | Shape::Text(_)
            | Shape::Marshallable(_)
            | Shape::Lambda(_))
    )
}

pub(crate) fn write_object<V: ValueOut + ?Sized>(
    out: &mut V,
    value: Option<&dyn Any>,
    type_name: &str,
) -> Result<()> {
    let Some(value) = value else {
        return out.text(None);
    };
    match classify(value, type_name)? {
        Shape::RawBytes(bytes) => out.raw_bytes(bytes),
        Shape::Map(entries) => out.map(&entries),
        Shape::Int8(v) => out.int8(v),
        Shape::Bool(v) => out.bool(v),
        Shape::Char(v) => {
            let mut utf8 = [0u8; 4];
            out.text(Some(&*v.encode_utf8(&mut utf8)))
        }
        Shape::Int16(v) => out.int16(v),
        Shape::Int32(v) => out.int32(v),
        Shape::Int64(v) => out.int64(v),
        Shape::Float64(v) => out.float64(v),
        Shape::Float32(v) => out.float32(v),
        Shape::UInt8(v) => out.uint8(v),
        Shape::UInt16(v) => out.uint16(v),
        Shape::UInt32(v) => out.uint32(v),
        Shape::Marshallable(object) => out.typed_marshallable(Some(object)),
        Shape::Throwable(throwable) => out.throwable(&throwable),
        Shape::Bytes(bytes) => out.bytes(bytes),
        Shape::Text(text) => out.text(Some(text)),
        Shape::Scalar(scalar) => out.typed_scalar(scalar),
        Shape::Strings(items) => out.sequence(&mut |seq| {
            for item in &items {
                seq.text(Some(*item))?;
            }
            Ok(())
        }),
        Shape::Lambda(lambda) => out.typed_marshallable(Some(lambda as &dyn Marshallable)),
        Shape::Objects(items) => out.sequence(&mut |seq| {
            for item in items {
                write_object(seq, Some(&**item), "object array element")?;
            }
            Ok(())
        }),
        Shape::Value(value) => out.value(value),
    }
}

fn raw_bytes(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    value
        .downcast_ref::<Vec<u8>>()
        .map(|bytes| Ok(Shape::RawBytes(bytes)))
}

fn map(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    fn text_entries<'a>(
        entries: impl Iterator<Item = (&'a String, &'a String)>,
    ) -> Shape<'a> {
        Shape::Map(
            entries
                .map(|(k, v)| (k as &dyn Any, v as &dyn Any))
                .collect(),
        )
    }
    fn any_entries<'a>(
        entries: impl Iterator<Item = (&'a String, &'a Box<dyn Any>)>,
    ) -> Shape<'a> {
        Shape::Map(entries.map(|(k, v)| (k as &dyn Any, &**v)).collect())
    }

    if let Some(m) = value.downcast_ref::<BTreeMap<String, String>>() {
        return Some(Ok(text_entries(m.iter())));
    }
    if let Some(m) = value.downcast_ref::<HashMap<String, String>>() {
        return Some(Ok(text_entries(m.iter())));
    }
    if let Some(m) = value.downcast_ref::<BTreeMap<String, Box<dyn Any>>>() {
        return Some(Ok(any_entries(m.iter())));
    }
    if let Some(m) = value.downcast_ref::<HashMap<String, Box<dyn Any>>>() {
        return Some(Ok(any_entries(m.iter())));
    }
    None
}

macro_rules! downcast_copy {
    ($value:expr, $($ty:ty => $shape:ident),+ $(,)?) => {
        $(
            if let Some(v) = $value.downcast_ref::<$ty>() {
                return Some(Ok(Shape::$shape(*v)));
            }
        )+
    };
}

fn primitive(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    downcast_copy!(value,
        i8 => Int8,
        bool => Bool,
        char => Char,
        i16 => Int16,
        i32 => Int32,
        i64 => Int64,
        f64 => Float64,
        f32 => Float32,
        u8 => UInt8,
        u16 => UInt16,
        u32 => UInt32,
    );
    None
}

fn marshallable(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(object) = value.downcast_ref::<Box<dyn Marshallable>>() {
        return Some(Ok(Shape::Marshallable(object.as_ref())));
    }
    if let Some(object) = value.downcast_ref::<Arc<dyn Marshallable>>() {
        return Some(Ok(Shape::Marshallable(object.as_ref())));
    }
    None
}

fn throwable(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(throwable) = value.downcast_ref::<Throwable>() {
        return Some(Ok(Shape::Throwable(Cow::Borrowed(throwable))));
    }
    if let Some(err) = value.downcast_ref::<Box<dyn Error + Send + Sync>>() {
        let captured = Throwable::new("std::error::Error", Some(err.to_string()));
        return Some(Ok(Shape::Throwable(Cow::Owned(captured))));
    }
    None
}

fn byte_block(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(bytes) = value.downcast_ref::<Bytes>() {
        return Some(Ok(Shape::Bytes(bytes)));
    }
    if let Some(bytes) = value.downcast_ref::<BytesMut>() {
        return Some(Ok(Shape::Bytes(bytes)));
    }
    None
}

fn text(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(text) = value.downcast_ref::<String>() {
        return Some(Ok(Shape::Text(text)));
    }
    if let Some(text) = value.downcast_ref::<&'static str>() {
        return Some(Ok(Shape::Text(text)));
    }
    if let Some(text) = value.downcast_ref::<Box<str>>() {
        return Some(Ok(Shape::Text(text)));
    }
    None
}

fn scalar(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    value
        .downcast_ref::<Box<dyn Scalar>>()
        .map(|scalar| Ok(Shape::Scalar(scalar.as_ref())))
}

fn string_array(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(items) = value.downcast_ref::<Box<[String]>>() {
        return Some(Ok(Shape::Strings(items.iter().map(String::as_str).collect())));
    }
    if let Some(items) = value.downcast_ref::<Box<[&'static str]>>() {
        return Some(Ok(Shape::Strings(items.to_vec())));
    }
    None
}

macro_rules! primitive_collection {
    ($value:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Some(items) = $value.downcast_ref::<Vec<$ty>>() {
                return Some(non_text_collection(items.is_empty(), stringify!($ty)));
            }
        )+
    };
}

fn collection(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    if let Some(items) = value.downcast_ref::<Vec<String>>() {
        return Some(Ok(Shape::Strings(items.iter().map(String::as_str).collect())));
    }
    if let Some(items) = value.downcast_ref::<Vec<&'static str>>() {
        return Some(Ok(Shape::Strings(items.clone())));
    }
    if let Some(items) = value.downcast_ref::<VecDeque<String>>() {
        return Some(Ok(Shape::Strings(items.iter().map(String::as_str).collect())));
    }
    if let Some(items) = value.downcast_ref::<BTreeSet<String>>() {
        return Some(Ok(Shape::Strings(items.iter().map(String::as_str).collect())));
    }
    if let Some(items) = value.downcast_ref::<HashSet<String>>() {
        return Some(Ok(Shape::Strings(items.iter().map(String::as_str).collect())));
    }
    if let Some(items) = value.downcast_ref::<Vec<Box<dyn Any>>>() {
        let texts: Option<Vec<&str>> = items
            .iter()
            .map(|item| match classify(&**item, "") {
                Ok(Shape::Text(text)) => Some(text),
                _ => None,
            })
            .collect();
        return Some(match texts {
            Some(texts) => Ok(Shape::Strings(texts)),
            None => Err(unsupported_collection("Box<dyn Any>")),
        });
    }
    primitive_collection!(value, bool, i8, i16, i32, i64, u16, u32, u64, f32, f64, char);
    None
}

fn non_text_collection<'a>(empty: bool, element: &str) -> Result<Shape<'a>> {
    if empty {
        Ok(Shape::Strings(Vec::new()))
    } else {
        Err(unsupported_collection(element))
    }
}

fn unsupported_collection(element: &str) -> WireError {
    WireError::UnsupportedOperation(format!(
        "collections of {element} are not supported, only collections of text"
    ))
}

fn lambda(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    value
        .downcast_ref::<SerializedLambda>()
        .map(|lambda| Ok(Shape::Lambda(lambda)))
}

fn object_array(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    value
        .downcast_ref::<Box<[Box<dyn Any>]>>()
        .map(|items| Ok(Shape::Objects(items)))
}

fn wire_value(value: &dyn Any) -> Option<Result<Shape<'_>>> {
    value
        .downcast_ref::<WireValue>()
        .map(|value| Ok(Shape::Value(value)))
}
