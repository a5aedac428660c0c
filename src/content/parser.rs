//! Content stream parser.
//!
//! Content streams use postfix notation: operands come before the operator.
//!
//! ```text
//! BT
//!   /F1 12 Tf
//!   100 700 Td
//!   (Signature of the Candidate) Tj
//! ET
//! ```
//!
//! Parsing is lenient. A byte that starts neither an operand nor an operator
//! is skipped, so a damaged stream still yields the operations around the
//! damage.

use crate::object::Object;
use crate::parser::parse_object;
use nom::IResult;
use nom::bytes::complete::take_while1;
use nom::character::complete::multispace0;

/// One operator with its operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operator keyword, e.g. `Tj` or `cm`
    pub operator: String,
    /// Operands in stream order
    pub operands: Vec<Object>,
}

impl Operation {
    /// Operand `index` as a number.
    pub fn number(&self, index: usize) -> Option<f32> {
        self.operands.get(index).and_then(Object::as_number).map(|v| v as f32)
    }

    /// All six operands of `cm` / `Tm`.
    pub fn matrix(&self) -> Option<[f32; 6]> {
        let mut values = [0f32; 6];
        for (i, slot) in values.iter_mut().enumerate() {
            *slot = self.number(i)?;
        }
        Some(values)
    }
}

/// Parse a decoded content stream into operations.
///
/// Inline images (`BI … ID … EI`) are skipped whole and produce no operation.
///
/// ```
/// use pdf_seal::content::parse_content_stream;
///
/// let ops = parse_content_stream(b"BT /F1 12 Tf 100 700 Td (Hello) Tj ET");
/// let names: Vec<_> = ops.iter().map(|op| op.operator.as_str()).collect();
/// assert_eq!(names, ["BT", "Tf", "Td", "Tj", "ET"]);
/// ```
pub fn parse_content_stream(data: &[u8]) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut input = data;

    while !input.is_empty() {
        if let Ok((rest, _)) = multispace0::<&[u8], nom::error::Error<&[u8]>>(input) {
            input = rest;
        }
        if input.is_empty() {
            break;
        }

        match parse_operation(input) {
            Ok((rest, Some(op))) => {
                operations.push(op);
                input = rest;
            },
            Ok((rest, None)) => input = rest,
            Err(_) => input = &input[1..],
        }
    }

    log::trace!("parsed {} content stream operations", operations.len());
    operations
}

/// One operation, or `None` for a skipped inline image.
fn parse_operation(input: &[u8]) -> IResult<&[u8], Option<Operation>> {
    let mut operands = Vec::new();
    let mut remaining = input;

    loop {
        let (inp, _) = multispace0(remaining)?;
        remaining = inp;
        if remaining.is_empty() {
            return Err(nom::Err::Error(nom::error::Error::new(
                remaining,
                nom::error::ErrorKind::Eof,
            )));
        }
        if remaining[0] == b'%' {
            let end = remaining
                .iter()
                .position(|&c| c == b'\n' || c == b'\r')
                .unwrap_or(remaining.len());
            remaining = &remaining[end..];
            continue;
        }

        if is_operator_start(remaining[0]) {
            let (rest, name) = parse_operator_name(remaining)?;
            // true/false/null are operands, not operators
            match name {
                "true" | "false" | "null" => {},
                "BI" => return Ok((skip_inline_image(rest), None)),
                _ => {
                    return Ok((
                        rest,
                        Some(Operation {
                            operator: name.to_string(),
                            operands,
                        }),
                    ));
                },
            }
        }

        let (inp, obj) = parse_object(remaining)?;
        operands.push(obj);
        remaining = inp;
    }
}

fn is_operator_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'\'' || byte == b'"' || byte == b'*'
}

fn parse_operator_name(input: &[u8]) -> IResult<&[u8], &str> {
    let (rest, name_bytes) =
        take_while1(|c: u8| c.is_ascii_alphanumeric() || c == b'\'' || c == b'"' || c == b'*')(input)?;
    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))?;
    Ok((rest, name))
}

/// Skip past the `EI` that ends an inline image whose `BI` was just consumed.
///
/// The image data is binary, so `EI` only counts when surrounded by whitespace.
fn skip_inline_image(input: &[u8]) -> &[u8] {
    let data_start = find_keyword(input, b"ID", 0).map(|pos| pos + 3).unwrap_or(input.len());
    match find_keyword(input, b"EI", data_start) {
        Some(pos) => &input[(pos + 2).min(input.len())..],
        None => &input[input.len()..],
    }
}

/// Position of `keyword` at or after `from`, delimited by whitespace (or the
/// start and end of input).
fn find_keyword(input: &[u8], keyword: &[u8], from: usize) -> Option<usize> {
    let bounded = |c: Option<&u8>| c.map_or(true, |c| c.is_ascii_whitespace());
    (from..input.len().saturating_sub(keyword.len() - 1)).find(|&pos| {
        input[pos..].starts_with(keyword)
            && bounded(pos.checked_sub(1).and_then(|p| input.get(p)))
            && bounded(input.get(pos + keyword.len()))
    })
}
