//! Typed property values.

use std::fmt;

use bytes::Bytes;
use repo_time::Time;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ids::NodeId;
use crate::names::Name;
use crate::path::Path;

/// The declared type of a property or value.
///
/// `Undefined` is legal only in property definitions, where it means "any
/// type"; a stored value always has a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyType {
    /// Any type (definitions only).
    Undefined,
    /// UTF-8 text.
    String,
    /// An opaque byte sequence.
    Binary,
    /// A 64-bit signed integer.
    Long,
    /// A 64-bit float.
    Double,
    /// A boolean.
    Boolean,
    /// A wall-clock instant.
    Date,
    /// A qualified name.
    Name,
    /// An absolute item path.
    Path,
    /// A link to a referenceable node.
    Reference,
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "UNDEFINED",
            Self::String => "STRING",
            Self::Binary => "BINARY",
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Name => "NAME",
            Self::Path => "PATH",
            Self::Reference => "REFERENCE",
        };
        write!(f, "{s}")
    }
}

/// The identity of an externally stored binary payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Allocate a fresh blob identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the canonical hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A BINARY payload: small payloads are held inline, large ones by reference
/// into the blob substore.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryValue {
    /// The bytes themselves.
    Inline(Bytes),
    /// A handle into the blob substore.
    External {
        /// Blob identity in the substore.
        id: BlobId,
        /// Payload length in bytes.
        size: u64,
    },
}

impl BinaryValue {
    /// Payload length in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Inline(b) => b.len() as u64,
            Self::External { size, .. } => *size,
        }
    }
}

/// A typed scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ValueRepr", into = "ValueRepr")]
pub enum Value {
    /// STRING.
    String(String),
    /// BINARY.
    Binary(BinaryValue),
    /// LONG.
    Long(i64),
    /// DOUBLE.
    Double(f64),
    /// BOOLEAN.
    Boolean(bool),
    /// DATE.
    Date(Time),
    /// NAME.
    Name(Name),
    /// PATH.
    Path(Path),
    /// REFERENCE.
    Reference(NodeId),
}

impl Value {
    /// The concrete type of this value.
    pub fn ty(&self) -> PropertyType {
        match self {
            Self::String(_) => PropertyType::String,
            Self::Binary(_) => PropertyType::Binary,
            Self::Long(_) => PropertyType::Long,
            Self::Double(_) => PropertyType::Double,
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Date(_) => PropertyType::Date,
            Self::Name(_) => PropertyType::Name,
            Self::Path(_) => PropertyType::Path,
            Self::Reference(_) => PropertyType::Reference,
        }
    }

    /// Parse a value of type `ty` from its canonical text form.
    ///
    /// `Undefined` yields a STRING value. BINARY accepts `hex:…` (raw bytes),
    /// `blob:<id>/<len>` (external handle) or plain text (UTF-8 bytes).
    pub fn from_text(ty: PropertyType, text: &str) -> Result<Self, ValueFormatError> {
        let parse_err = || ValueFormatError::Parse {
            ty,
            text: text.to_string(),
        };
        Ok(match ty {
            PropertyType::Undefined | PropertyType::String => Self::String(text.to_string()),
            PropertyType::Binary => {
                if let Some(hex) = text.strip_prefix("hex:") {
                    Self::Binary(BinaryValue::Inline(Bytes::from(
                        hex_decode(hex).ok_or_else(parse_err)?,
                    )))
                } else if let Some(rest) = text.strip_prefix("blob:") {
                    let (id, size) = rest.split_once('/').ok_or_else(parse_err)?;
                    Self::Binary(BinaryValue::External {
                        id: BlobId::parse(id).map_err(|_| parse_err())?,
                        size: size.parse().map_err(|_| parse_err())?,
                    })
                } else {
                    Self::Binary(BinaryValue::Inline(Bytes::from(text.as_bytes().to_vec())))
                }
            }
            PropertyType::Long => Self::Long(text.parse().map_err(|_| parse_err())?),
            PropertyType::Double => Self::Double(text.parse().map_err(|_| parse_err())?),
            PropertyType::Boolean => Self::Boolean(text.parse().map_err(|_| parse_err())?),
            PropertyType::Date => Self::Date(Time::from_rfc3339(text).map_err(|_| parse_err())?),
            PropertyType::Name => {
                Self::Name(Name::from_expanded(text).map_err(|_| parse_err())?)
            }
            PropertyType::Path => {
                // expanded display form: /{uri}a/{uri}b[2]
                Self::Path(parse_expanded_path(text).ok_or_else(parse_err)?)
            }
            PropertyType::Reference => {
                Self::Reference(NodeId::parse(text).map_err(|_| parse_err())?)
            }
        })
    }

    /// The canonical text form, inverse of [`Value::from_text`].
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Binary(BinaryValue::Inline(b)) => format!("hex:{}", hex_encode(b)),
            Self::Binary(BinaryValue::External { id, size }) => format!("blob:{id}/{size}"),
            Self::Long(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Boolean(v) => v.to_string(),
            Self::Date(t) => t.to_rfc3339(),
            Self::Name(n) => n.to_string(),
            Self::Path(p) => p.to_string(),
            Self::Reference(id) => id.to_string(),
        }
    }

    /// Convert this value to `target`, applying the standard lexical rules.
    pub fn coerce(&self, target: PropertyType) -> Result<Self, ValueFormatError> {
        let from = self.ty();
        if target == PropertyType::Undefined || target == from {
            return Ok(self.clone());
        }
        let conversion_err = || ValueFormatError::Conversion { from, to: target };
        match (self, target) {
            // anything has a string form; binary uses its raw bytes
            (Self::Binary(BinaryValue::Inline(b)), PropertyType::String) => {
                String::from_utf8(b.to_vec())
                    .map(Self::String)
                    .map_err(|_| conversion_err())
            }
            (Self::Binary(BinaryValue::External { .. }), PropertyType::String) => {
                Err(ValueFormatError::ExternalBinary)
            }
            (_, PropertyType::String) => Ok(Self::String(self.to_text())),

            // from string, parse; binary takes the raw bytes
            (Self::String(s), PropertyType::Binary) => Ok(Self::Binary(BinaryValue::Inline(
                Bytes::from(s.as_bytes().to_vec()),
            ))),
            (Self::String(s), _) => Value::from_text(target, s)
                .map_err(|_| conversion_err()),

            // numeric widening/narrowing
            (Self::Long(v), PropertyType::Double) => Ok(Self::Double(*v as f64)),
            (Self::Double(v), PropertyType::Long) => {
                if v.is_finite() {
                    Ok(Self::Long(*v as i64))
                } else {
                    Err(conversion_err())
                }
            }

            // DATE ↔ LONG is milliseconds since the epoch
            (Self::Date(t), PropertyType::Long) => Ok(Self::Long(t.timestamp_nanos() / 1_000_000)),
            (Self::Long(v), PropertyType::Date) => {
                Ok(Self::Date(Time::from_timestamp_nanos(
                    v.checked_mul(1_000_000).ok_or_else(conversion_err)?,
                )))
            }

            _ => Err(conversion_err()),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

fn parse_expanded_path(s: &str) -> Option<Path> {
    let rest = s.strip_prefix('/')?;
    if rest.is_empty() {
        return Some(Path::root());
    }
    let mut path = Path::root();
    // namespace URIs may contain `/`, so split on `/{` boundaries rather than
    // every slash
    let mut steps = Vec::new();
    let mut current = String::new();
    let mut chars = rest.chars().peekable();
    let mut depth = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.checked_sub(1)?;
                current.push(c);
            }
            '/' if depth == 0 => {
                steps.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
        if chars.peek().is_none() {
            steps.push(std::mem::take(&mut current));
        }
    }
    for step in steps {
        let (name_part, index) = match step.split_once('[') {
            Some((name_part, idx)) => {
                let idx: u32 = idx.strip_suffix(']')?.parse().ok()?;
                if idx < 1 {
                    return None;
                }
                (name_part.to_string(), idx)
            }
            None => (step, 1),
        };
        let name = Name::from_expanded(&name_part).ok()?;
        path = path.child(crate::path::PathElement::with_index(name, index));
    }
    Some(path)
}

/// The text-tagged wire form of a [`Value`], used by the definition codec.
#[derive(Debug, Serialize, Deserialize)]
struct ValueRepr {
    #[serde(rename = "type")]
    ty: PropertyType,
    value: String,
}

impl From<Value> for ValueRepr {
    fn from(v: Value) -> Self {
        Self {
            ty: v.ty(),
            value: v.to_text(),
        }
    }
}

impl TryFrom<ValueRepr> for Value {
    type Error = ValueFormatError;

    fn try_from(repr: ValueRepr) -> Result<Self, Self::Error> {
        Self::from_text(repr.ty, &repr.value)
    }
}

/// A value could not be produced in the required type.
#[derive(Debug, Error)]
pub enum ValueFormatError {
    /// No conversion exists between the two types.
    #[error("cannot convert {from} value to {to}")]
    Conversion {
        /// Source type.
        from: PropertyType,
        /// Target type.
        to: PropertyType,
    },

    /// The text form does not parse as the requested type.
    #[error("cannot parse {ty} value from {text:?}")]
    Parse {
        /// Requested type.
        ty: PropertyType,
        /// Offending text.
        text: String,
    },

    /// The operation needs the payload bytes of an externally stored binary.
    #[error("binary value is stored externally")]
    ExternalBinary,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::names::NS_SYS_URI;

    #[test]
    fn text_round_trips() {
        let values = [
            Value::String("hi".into()),
            Value::Binary(BinaryValue::Inline(Bytes::from_static(b"\x00\xffpayload"))),
            Value::Binary(BinaryValue::External {
                id: BlobId::random(),
                size: 512,
            }),
            Value::Long(-42),
            Value::Boolean(true),
            Value::Date(Time::from_timestamp_nanos(123_000_000)),
            Value::Name(Name::new(NS_SYS_URI, "created")),
            Value::Reference(NodeId::random()),
        ];
        for v in values {
            let text = v.to_text();
            assert_eq!(Value::from_text(v.ty(), &text).unwrap(), v, "text {text:?}");
        }
    }

    #[test]
    fn path_value_text_round_trips() {
        let path = Path::root()
            .child(crate::path::PathElement::new(Name::unqualified("a")))
            .child(crate::path::PathElement::with_index(
                Name::new(NS_SYS_URI, "content"),
                2,
            ));
        let v = Value::Path(path);
        assert_eq!(Value::from_text(PropertyType::Path, &v.to_text()).unwrap(), v);
    }

    #[test]
    fn serde_round_trips() {
        let v = Value::Name(Name::new(NS_SYS_URI, "base"));
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"NAME","value":"{urn:canopy:sys:1.0}base"}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), v);
    }

    #[test]
    fn string_coercions() {
        let v = Value::Long(17);
        assert_eq!(v.coerce(PropertyType::String).unwrap(), Value::String("17".into()));
        assert_eq!(
            Value::String("17".into()).coerce(PropertyType::Long).unwrap(),
            Value::Long(17)
        );
        assert_eq!(
            Value::String("x".into()).coerce(PropertyType::Double).unwrap_err().to_string(),
            "cannot convert STRING value to DOUBLE"
        );
    }

    #[test]
    fn binary_string_coercions_use_raw_bytes() {
        let v = Value::String("payload".into());
        let b = v.coerce(PropertyType::Binary).unwrap();
        assert_matches!(
            &b,
            Value::Binary(BinaryValue::Inline(bytes)) if &bytes[..] == b"payload"
        );
        assert_eq!(b.coerce(PropertyType::String).unwrap(), v);
    }

    #[test]
    fn date_long_coercions() {
        let t = Time::from_timestamp(10, 500_000_000).unwrap();
        let ms = Value::Date(t).coerce(PropertyType::Long).unwrap();
        assert_eq!(ms, Value::Long(10_500));
        assert_eq!(ms.coerce(PropertyType::Date).unwrap(), Value::Date(t));
    }

    #[test]
    fn incompatible_coercions_fail() {
        assert_matches!(
            Value::Boolean(true).coerce(PropertyType::Reference),
            Err(ValueFormatError::Conversion { .. })
        );
        assert_matches!(
            Value::Reference(NodeId::random()).coerce(PropertyType::Long),
            Err(ValueFormatError::Conversion { .. })
        );
    }

    #[test]
    fn undefined_target_is_identity() {
        let v = Value::Boolean(false);
        assert_eq!(v.coerce(PropertyType::Undefined).unwrap(), v);
    }
}
