//! PDF writing primitives.
//!
//! Nothing here rewrites an existing file. Signing and stamping both append to
//! the original bytes:
//!
//! ```text
//! modified objects + stamp content
//!     ↓
//! [ContentStreamBuilder] (overlay operators → content stream bytes)
//!     ↓
//! [IncrementalUpdate] (new objects + xref section + trailer with /Prev)
//!     ↓
//! [ObjectSerializer] (deterministic object bytes)
//!     ↓
//! original bytes ++ update
//! ```

mod content_stream;
mod image_handler;
mod incremental;
mod object_serializer;

pub use content_stream::{ContentStreamBuilder, ContentStreamOp};
pub use image_handler::{ImageData, ImageError};
pub use incremental::{IncrementalUpdate, WrittenUpdate};
pub use object_serializer::ObjectSerializer;
