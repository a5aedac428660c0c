//! PDF object model.
//!
//! Objects are parsed from the input document, inspected by the signing
//! components, and re-serialized (with modifications) into incremental updates.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary payload shared by `Object::Dictionary` and `Object::Stream`.
pub type Dict = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (without the leading /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dict),
    /// Stream (dictionary + raw, still-encoded data)
    Stream {
        /// Stream dictionary
        dict: Dict,
        /// Stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl From<ObjectRef> for Object {
    fn from(r: ObjectRef) -> Self {
        Object::Reference(r)
    }
}

impl Object {
    /// Shorthand for a name object.
    pub fn name(s: &str) -> Object {
        Object::Name(s.to_string())
    }

    /// Text string: ASCII stays as-is, anything else becomes UTF-16BE with a BOM.
    pub fn text(s: &str) -> Object {
        if s.is_ascii() {
            return Object::String(s.as_bytes().to_vec());
        }
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend(s.encode_utf16().flat_map(|unit| unit.to_be_bytes()));
        Object::String(bytes)
    }

    /// Build a dictionary object from key/value pairs.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an Integer or Real.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Decode stream data using the filters named in the stream dictionary.
    ///
    /// Returns `Error::InvalidObjectType` for anything that is not a stream.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict
                    .get("Filter")
                    .map(extract_filter_names)
                    .unwrap_or_default();

                if filters.is_empty() {
                    return Ok(data.to_vec());
                }

                let params = extract_decode_params(dict.get("DecodeParms"));
                crate::decoders::decode_stream_with_params(data, &filters, params.as_ref())
            },
            _ => Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: self.type_name().to_string(),
            }),
        }
    }
}

/// The Filter entry is either a single Name or an Array of Names.
fn extract_filter_names(filter_obj: &Object) -> Vec<String> {
    match filter_obj {
        Object::Name(name) => vec![name.clone()],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|obj| obj.as_name().map(|s| s.to_string()))
            .collect(),
        _ => vec![],
    }
}

/// Extract predictor parameters from a DecodeParms dictionary (or the first
/// dictionary of a DecodeParms array).
pub(crate) fn extract_decode_params(
    params_obj: Option<&Object>,
) -> Option<crate::decoders::DecodeParams> {
    let dict = match params_obj? {
        Object::Dictionary(d) => d,
        Object::Array(arr) => arr.iter().filter_map(|obj| obj.as_dict()).next()?,
        _ => return None,
    };

    let int_or = |key: &str, default: i64| {
        dict.get(key)
            .and_then(|obj| obj.as_integer())
            .unwrap_or(default)
    };

    Some(crate::decoders::DecodeParams {
        predictor: int_or("Predictor", 1),
        columns: int_or("Columns", 1) as usize,
        colors: int_or("Colors", 1) as usize,
        bits_per_component: int_or("BitsPerComponent", 8) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_object_accessors() {
        assert_eq!(Object::Integer(42).as_integer(), Some(42));
        assert_eq!(Object::name("Type").as_name(), Some("Type"));
        assert_eq!(Object::text("abc").as_string(), Some(&b"abc"[..]));
        assert!(Object::Integer(1).as_name().is_none());
    }

    #[test]
    fn test_text_non_ascii_is_utf16() {
        assert_eq!(Object::text("é").as_string(), Some(&[0xFE, 0xFF, 0x00, 0xE9][..]));
    }

    #[test]
    fn test_as_number_accepts_int_and_real() {
        assert_eq!(Object::Integer(612).as_number(), Some(612.0));
        assert_eq!(Object::Real(0.5).as_number(), Some(0.5));
        assert_eq!(Object::Null.as_number(), None);
    }

    #[test]
    fn test_stream_dict_access() {
        let mut dict = HashMap::new();
        dict.insert("Length".to_string(), Object::Integer(3));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"abc"),
        };
        assert_eq!(stream.as_dict().and_then(|d| d.get("Length")), Some(&Object::Integer(3)));
        assert_eq!(stream.type_name(), "Stream");
    }

    #[test]
    fn test_object_ref_display() {
        assert_eq!(ObjectRef::new(12, 0).to_string(), "12 0 R");
    }

    #[test]
    fn test_dict_builder() {
        let obj = Object::dict(vec![("Type", Object::name("Sig"))]);
        assert_eq!(obj.as_dict().and_then(|d| d.get("Type")), Some(&Object::name("Sig")));
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let stream = Object::Stream {
            dict: HashMap::new(),
            data: bytes::Bytes::from_static(b"BT ET"),
        };
        assert_eq!(stream.decode_stream_data().unwrap(), b"BT ET");
    }

    #[test]
    fn test_decode_stream_flate() {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"q 1 0 0 1 0 0 cm Q").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from(compressed),
        };
        assert_eq!(stream.decode_stream_data().unwrap(), b"q 1 0 0 1 0 0 cm Q");
    }

    #[test]
    fn test_decode_non_stream_fails() {
        let err = Object::Integer(1).decode_stream_data().unwrap_err();
        assert!(matches!(err, Error::InvalidObjectType { .. }));
    }

    #[test]
    fn test_extract_filter_names_array() {
        let filters = Object::Array(vec![Object::name("ASCIIHexDecode"), Object::name("FlateDecode")]);
        assert_eq!(extract_filter_names(&filters), vec!["ASCIIHexDecode", "FlateDecode"]);
    }

    #[test]
    fn test_extract_decode_params_defaults() {
        let params = extract_decode_params(Some(&Object::dict(vec![
            ("Predictor", Object::Integer(12)),
            ("Columns", Object::Integer(5)),
        ])))
        .unwrap();
        assert_eq!(params.predictor, 12);
        assert_eq!(params.columns, 5);
        assert_eq!(params.colors, 1);
        assert_eq!(params.bits_per_component, 8);
    }
}
