//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! The decoded stream starts with `/N` pairs of integers (object number, offset
//! relative to `/First`), followed by the objects themselves:
//!
//! ```text
//! 10 0 11 15
//! << /Type /Page ... >>   % object 10 at First + 0
//! [ 1 2 3 ]               % object 11 at First + 15
//! ```

use crate::error::{Error, Result};
use crate::lexer::{Token, token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream into a map of object number to object.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            });
        },
    };

    if let Some(kind) = dict.get("Type").and_then(|t| t.as_name()) {
        if kind != "ObjStm" {
            return Err(Error::InvalidPdf(format!("expected /Type /ObjStm, got /{}", kind)));
        }
    }

    let count = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|&n| n >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N".to_string()))?
        as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|&f| f >= 0)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First".to_string()))?
        as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::InvalidPdf(format!(
            "object stream /First {} beyond decoded length {}",
            first,
            data.len()
        )));
    }

    let pairs = parse_pairs(&data[..first], count)?;
    let mut objects = HashMap::with_capacity(pairs.len());
    for (id, relative) in pairs {
        let Some(body) = data.get(first + relative..) else {
            log::warn!("object {} offset {} lies outside its object stream", id, relative);
            continue;
        };
        match parse_object(body) {
            Ok((_, obj)) => {
                objects.insert(id, obj);
            },
            Err(e) => log::warn!("failed to parse object {} in object stream: {:?}", id, e),
        }
    }

    Ok(objects)
}

fn parse_pairs(mut header: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    for i in 0..count {
        let (rest, id) = match token(header) {
            Ok((rest, Token::Integer(v))) if v >= 0 => (rest, v as u32),
            _ => {
                return Err(Error::ParseError {
                    offset: 0,
                    reason: format!("object stream pair {}: bad object number", i),
                });
            },
        };
        let (rest, offset) = match token(rest) {
            Ok((rest, Token::Integer(v))) if v >= 0 => (rest, v as usize),
            _ => {
                return Err(Error::ParseError {
                    offset: 0,
                    reason: format!("object stream pair {}: bad offset", i),
                });
            },
        };
        pairs.push((id, offset));
        header = rest;
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dict;
    use bytes::Bytes;

    fn objstm(n: i64, first: i64, body: &[u8]) -> Object {
        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(first));
        Object::Stream {
            dict,
            data: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_parse_two_objects() {
        let body = b"10 0 11 13 << /A 1 >>   [1 2]";
        let objects = parse_object_stream(&objstm(2, 11, body)).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[&10].as_dict().unwrap()["A"].as_integer(), Some(1));
        assert_eq!(objects[&11].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_n_is_error() {
        let mut obj = objstm(1, 0, b"");
        if let Object::Stream { dict, .. } = &mut obj {
            dict.remove("N");
        }
        assert!(parse_object_stream(&obj).is_err());
    }

    #[test]
    fn test_first_beyond_data_is_error() {
        assert!(parse_object_stream(&objstm(1, 500, b"1 0 5")).is_err());
    }

    #[test]
    fn test_wrong_type_is_error() {
        let mut obj = objstm(0, 0, b"");
        if let Object::Stream { dict, .. } = &mut obj {
            dict.insert("Type".to_string(), Object::name("XRef"));
        }
        assert!(parse_object_stream(&obj).is_err());
    }

    #[test]
    fn test_non_stream_is_error() {
        assert!(matches!(
            parse_object_stream(&Object::Integer(3)),
            Err(Error::InvalidObjectType { .. })
        ));
    }
}
