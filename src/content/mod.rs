//! PDF content stream parsing.
//!
//! Page content is read only to locate text (see `appearance`); it is never
//! rewritten.

mod parser;

pub use parser::{Operation, parse_content_stream};
