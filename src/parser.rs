//! PDF object parser.
//!
//! Combines lexer tokens into complete objects using recursive descent:
//! composite types (arrays, dictionaries) parse their members recursively, and
//! an integer followed by `<gen> R` becomes an indirect reference.
//!
//! All parsing functions return nom's `IResult`; [`parse_indirect_object_at`]
//! wraps the common "N G obj ... endobj at this offset" case in a crate `Result`.

use crate::error::{Error, Result};
use crate::lexer::{Token, token};
use crate::object::{Dict, Object, ObjectRef};
use nom::IResult;

/// Nesting limit for arrays and dictionaries.
const MAX_NESTING: usize = 256;

fn nom_error(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Decode escape sequences in PDF literal strings.
///
/// Handles `\n \r \t \b \f \( \) \\`, octal `\ddd` (1-3 digits) and
/// backslash-newline continuations. Unknown escapes keep the backslash.
///
/// ```
/// # use pdf_seal::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)\\101"), b"a(b)A");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }

        let escaped = raw[i + 1];
        let simple = match escaped {
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'b' => Some(8),
            b'f' => Some(12),
            b'(' | b')' | b'\\' => Some(escaped),
            _ => None,
        };
        if let Some(byte) = simple {
            result.push(byte);
            i += 2;
            continue;
        }

        match escaped {
            b'\n' => i += 2,
            b'\r' => {
                i += 2;
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let digits = raw[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|d| (b'0'..=b'7').contains(*d))
                    .count();
                let value = raw[i + 1..i + 1 + digits]
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                result.push((value & 0xFF) as u8);
                i += 1 + digits;
            },
            _ => {
                result.push(b'\\');
                i += 1;
            },
        }
    }

    result
}

/// Decode a hex string body to bytes. Whitespace is ignored and an odd final
/// digit is padded with 0.
///
/// ```
/// # use pdf_seal::parser::decode_hex;
/// assert_eq!(decode_hex(b"48 65 6C 6C 6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"7").unwrap(), vec![0x70]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .copied()
        .collect();

    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char)
                .to_digit(16)
                .ok_or_else(|| Error::Decode(format!("invalid hex digit {:#04x}", pair[0])))?;
            let lo = match pair.get(1) {
                Some(&c) => (c as char)
                    .to_digit(16)
                    .ok_or_else(|| Error::Decode(format!("invalid hex digit {:#04x}", c)))?,
                None => 0,
            };
            Ok((hi * 16 + lo) as u8)
        })
        .collect()
}

/// Parse a PDF object from input bytes.
///
/// ```
/// use pdf_seal::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Kids [3 0 R 4 0 R] /Count 2 >>").unwrap();
/// assert_eq!(obj.as_dict().unwrap()["Count"].as_integer(), Some(2));
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_nested(input, 0)
}

fn parse_object_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            if let Ok((after_gen, Token::Integer(generation))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if i >= 0 && (0..=u16::MAX as i64).contains(&generation) {
                        let r = ObjectRef::new(i as u32, generation as u16);
                        return Ok((after_r, Object::Reference(r)));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(raw) => Ok((input, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => match decode_hex(raw) {
            Ok(bytes) => Ok((input, Object::String(bytes))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => parse_array(input, depth),
        Token::DictStart => {
            let (remaining, dict) = parse_dictionary(input, depth)?;
            match token(remaining) {
                Ok((stream_input, Token::StreamStart)) => {
                    let (rest, data) = parse_stream_data(stream_input, &dict)?;
                    Ok((
                        rest,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::copy_from_slice(data),
                        },
                    ))
                },
                _ => Ok((remaining, Object::Dictionary(dict))),
            }
        },
        _ => Err(nom_error(input, nom::error::ErrorKind::Tag)),
    }
}

/// Stream data after the `stream` keyword, which must be followed by CRLF or LF.
///
/// A direct integer `/Length` is trusted when `endstream` follows it; otherwise
/// the data runs up to the next `endstream` keyword (minus one end-of-line).
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dict) -> IResult<&'a [u8], &'a [u8]> {
    let input = if let Some(rest) = input.strip_prefix(b"\r\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\n") {
        rest
    } else if let Some(rest) = input.strip_prefix(b"\r") {
        log::warn!("stream keyword followed by a lone CR; accepting");
        rest
    } else {
        input
    };

    let declared = dict
        .get("Length")
        .and_then(|o| o.as_integer())
        .filter(|&len| len >= 0 && (len as usize) <= input.len())
        .map(|len| len as usize);

    if let Some(length) = declared {
        if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
            return Ok((rest, &input[..length]));
        }
        log::debug!("stream /Length {} does not reach endstream; scanning", length);
    }

    let pos = find_endstream(input).ok_or_else(|| nom_error(input, nom::error::ErrorKind::Eof))?;
    let mut data = &input[..pos];
    if let Some(trimmed) = data.strip_suffix(b"\r\n") {
        data = trimmed;
    } else if let Some(trimmed) = data.strip_suffix(b"\n").or_else(|| data.strip_suffix(b"\r")) {
        data = trimmed;
    }
    Ok((&input[pos + b"endstream".len()..], data))
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input
        .windows(keyword.len())
        .position(|window| window == keyword)
}

/// `[ obj1 obj2 ... ]`
fn parse_array(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut objects = Vec::new();
    let mut remaining = input;

    loop {
        let (after, tok) = token(remaining)?;
        if tok == Token::ArrayEnd {
            return Ok((after, Object::Array(objects)));
        }
        let (after, obj) = parse_object_nested(remaining, depth + 1)?;
        objects.push(obj);
        remaining = after;
    }
}

/// `<< /Key value ... >>`. Keys must be names; a `null` value drops the key.
fn parse_dictionary(input: &[u8], depth: usize) -> IResult<&[u8], Dict> {
    let mut dict = Dict::new();
    let mut remaining = input;

    loop {
        let (after, tok) = token(remaining)?;
        match tok {
            Token::DictEnd => return Ok((after, dict)),
            Token::Name(key) => {
                let (after, value) = parse_object_nested(after, depth + 1)?;
                if value != Object::Null {
                    dict.insert(key, value);
                }
                remaining = after;
            },
            _ => return Err(nom_error(remaining, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Parse `N G obj <object> endobj`, returning the reference and the object.
///
/// A missing `endobj` is tolerated (logged), as many writers emit it sloppily.
pub fn parse_indirect_object(input: &[u8]) -> IResult<&[u8], (ObjectRef, Object)> {
    let (input, id) = match token(input)? {
        (rest, Token::Integer(id)) if id >= 0 => (rest, id as u32),
        _ => return Err(nom_error(input, nom::error::ErrorKind::Digit)),
    };
    let (input, generation) = match token(input)? {
        (rest, Token::Integer(g)) if (0..=u16::MAX as i64).contains(&g) => (rest, g as u16),
        _ => return Err(nom_error(input, nom::error::ErrorKind::Digit)),
    };
    let input = match token(input)? {
        (rest, Token::ObjStart) => rest,
        _ => return Err(nom_error(input, nom::error::ErrorKind::Tag)),
    };

    let (input, object) = parse_object(input)?;
    let input = match token(input) {
        Ok((rest, Token::ObjEnd)) => rest,
        _ => {
            log::warn!("object {} {} is missing endobj", id, generation);
            input
        },
    };

    Ok((input, (ObjectRef::new(id, generation), object)))
}

/// Parse the indirect object starting at `offset` in `data`.
pub fn parse_indirect_object_at(data: &[u8], offset: usize) -> Result<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or(Error::UnexpectedEof)?;
    parse_indirect_object(slice)
        .map(|(_, parsed)| parsed)
        .map_err(|e| Error::ParseError {
            offset,
            reason: format!("indirect object: {:?}", e.map(|inner| inner.code)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_decoding() {
        assert_eq!(decode_literal_string_escapes(b"line\\nbreak"), b"line\nbreak");
        assert_eq!(decode_literal_string_escapes(b"\\247"), vec![0xA7]);
        assert_eq!(decode_literal_string_escapes(b"\\0053"), b"\x053");
        assert_eq!(decode_literal_string_escapes(b"a\\\nb"), b"ab");
        assert_eq!(decode_literal_string_escapes(b"\\q"), b"\\q");
        assert_eq!(decode_literal_string_escapes(b"end\\"), b"end\\");
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex(b"4G").is_err());
        assert_eq!(decode_hex(b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_reference_vs_integers() {
        let (_, obj) = parse_object(b"[1 0 R 2 3]").unwrap();
        let arr = obj.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0], Object::Reference(ObjectRef::new(1, 0)));
        assert_eq!(arr[1], Object::Integer(2));
        assert_eq!(arr[2], Object::Integer(3));
    }

    #[test]
    fn test_nested_dictionary() {
        let (_, obj) =
            parse_object(b"<< /Type /Page /MediaBox [0 0 612 792] /Res << /F << /F1 5 0 R >> >> >>")
                .unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict["Type"].as_name(), Some("Page"));
        assert_eq!(dict["MediaBox"].as_array().unwrap().len(), 4);
        let fonts = dict["Res"].as_dict().unwrap()["F"].as_dict().unwrap();
        assert_eq!(fonts["F1"].as_reference(), Some(ObjectRef::new(5, 0)));
    }

    #[test]
    fn test_null_value_drops_key() {
        let (_, obj) = parse_object(b"<< /A null /B 1 >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert!(!dict.contains_key("A"));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_unclosed_array_fails() {
        assert!(parse_object(b"[1 2").is_err());
    }

    #[test]
    fn test_stream_with_length() {
        let input = b"<< /Length 5 >>\nstream\nhello\nendstream";
        let (rest, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"hello"),
            other => panic!("expected stream, got {:?}", other),
        }
        assert!(rest.is_empty());
    }

    #[test]
    fn test_stream_with_indirect_length_scans() {
        let input = b"<< /Length 9 0 R >>\r\nstream\r\nBT ET\r\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"BT ET"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_wrong_length_scans() {
        let input = b"<< /Length 2 >>\nstream\nabcdef\nendstream";
        let (_, obj) = parse_object(input).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abcdef"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_indirect_object() {
        let data = b"junk 4 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n";
        let (r, obj) = parse_indirect_object_at(data, 5).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        assert_eq!(obj.as_dict().unwrap()["Type"].as_name(), Some("Catalog"));
    }

    #[test]
    fn test_indirect_object_bad_offset() {
        let data = b"1 0 obj 5 endobj";
        assert!(matches!(parse_indirect_object_at(data, 100), Err(Error::UnexpectedEof)));
        assert!(matches!(parse_indirect_object_at(data, 2), Err(Error::ParseError { offset: 2, .. })));
    }

    #[test]
    fn test_signature_contents_placeholder() {
        let mut input = b"<< /Contents <".to_vec();
        input.extend(std::iter::repeat_n(b'0', 64));
        input.extend_from_slice(b"> >>");
        let (_, obj) = parse_object(&input).unwrap();
        assert_eq!(obj.as_dict().unwrap()["Contents"].as_string().unwrap().len(), 32);
    }
}
