//! Incremental updates.
//!
//! An incremental update appends new or replaced objects after the existing
//! bytes, followed by a cross-reference section and trailer that chain back to
//! the previous section through `/Prev`. The original bytes are never touched,
//! so they remain a prefix of the output.
//!
//! The new section mirrors the previous one: a classic `xref` table after a
//! classic table, an uncompressed `/Type /XRef` stream after an xref stream.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::ObjectSerializer;
use crate::xref::XRefKind;
use std::collections::BTreeMap;

/// Body of one appended object.
#[derive(Debug, Clone)]
enum Body {
    /// Serialized by [`ObjectSerializer`]
    Object(Object),
    /// Pre-formatted bytes, written verbatim between `obj` and `endobj`
    Raw(Vec<u8>),
}

/// Builder for one incremental update of a document.
#[derive(Debug, Clone)]
pub struct IncrementalUpdate {
    prev_startxref: u64,
    xref_kind: XRefKind,
    trailer: Dict,
    next_id: u32,
    objects: BTreeMap<u32, (u16, Option<Body>)>,
}

/// Result of [`IncrementalUpdate::write`].
#[derive(Debug, Clone)]
pub struct WrittenUpdate {
    /// Original bytes followed by the appended update
    pub bytes: Vec<u8>,
    /// Offset of the first appended byte
    pub update_start: usize,
    /// Offset of the new cross-reference section
    pub xref_offset: usize,
    body_offsets: BTreeMap<u32, usize>,
}

impl WrittenUpdate {
    /// Absolute offset of the first body byte of an appended object (just after
    /// `N G obj\n`).
    pub fn body_offset(&self, id: u32) -> Option<usize> {
        self.body_offsets.get(&id).copied()
    }
}

impl IncrementalUpdate {
    /// Start an update on top of `doc`'s newest revision.
    pub fn new(doc: &PdfDocument) -> Self {
        let trailer = ["Root", "Info", "ID"]
            .iter()
            .filter_map(|key| doc.trailer().get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();

        Self {
            prev_startxref: doc.startxref(),
            xref_kind: doc.xref_kind(),
            trailer,
            next_id: doc.next_object_id(),
            objects: BTreeMap::new(),
        }
    }

    /// Reserve a fresh object number without giving it a body yet.
    pub fn allocate(&mut self) -> ObjectRef {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, (0, None));
        ObjectRef::new(id, 0)
    }

    /// Add a new object and return its reference.
    pub fn add(&mut self, obj: Object) -> ObjectRef {
        let r = self.allocate();
        self.set(r, obj);
        r
    }

    /// Set the body of an allocated object, or replace an existing object of the
    /// base document with a new version.
    pub fn set(&mut self, r: ObjectRef, obj: Object) {
        self.objects.insert(r.id, (r.gen, Some(Body::Object(obj))));
    }

    /// Like [`set`](Self::set) with bytes that are written verbatim.
    pub fn set_raw(&mut self, r: ObjectRef, body: Vec<u8>) {
        self.objects.insert(r.id, (r.gen, Some(Body::Raw(body))));
    }

    /// True when nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the update to `base`.
    ///
    /// Fails if an allocated object never received a body.
    pub fn write(self, base: &[u8]) -> Result<WrittenUpdate> {
        let serializer = ObjectSerializer::new();
        let mut out = Vec::with_capacity(base.len() + 4096);
        out.extend_from_slice(base);
        if !base.ends_with(b"\n") && !base.ends_with(b"\r") {
            out.push(b'\n');
        }
        let update_start = out.len();

        let mut entries: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
        let mut body_offsets = BTreeMap::new();

        for (id, (generation, body)) in &self.objects {
            let body = body.as_ref().ok_or_else(|| {
                Error::InvalidPdf(format!("object {} was allocated but never written", id))
            })?;
            entries.insert(*id, (*generation, out.len()));
            out.extend_from_slice(format!("{} {} obj\n", id, generation).as_bytes());
            body_offsets.insert(*id, out.len());
            match body {
                Body::Object(obj) => out.extend_from_slice(&serializer.serialize(obj)),
                Body::Raw(raw) => out.extend_from_slice(raw),
            }
            out.extend_from_slice(b"\nendobj\n");
        }

        let mut trailer = self.trailer.clone();
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_startxref as i64));

        let xref_offset = out.len();
        match self.xref_kind {
            XRefKind::Table => {
                trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
                write_xref_table(&mut out, &entries);
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&serializer.serialize(&Object::Dictionary(trailer)));
                out.push(b'\n');
            },
            XRefKind::Stream => {
                let stream_id = self.next_id;
                entries.insert(stream_id, (0, xref_offset));
                trailer.insert("Size".to_string(), Object::Integer(stream_id as i64 + 1));
                let stream = xref_stream(trailer, &entries);
                out.extend_from_slice(
                    &serializer.serialize_indirect(ObjectRef::new(stream_id, 0), &stream),
                );
            },
        }
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "appended incremental update: {} objects, {} bytes, {:?} xref at {}",
            self.objects.len(),
            out.len() - update_start,
            self.xref_kind,
            xref_offset
        );

        Ok(WrittenUpdate {
            bytes: out,
            update_start,
            xref_offset,
            body_offsets,
        })
    }
}

/// Consecutive object numbers grouped as (first, count).
fn subsections(ids: impl Iterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for id in ids {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == id => *count += 1,
            _ => runs.push((id, 1)),
        }
    }
    runs
}

fn write_xref_table(out: &mut Vec<u8>, entries: &BTreeMap<u32, (u16, usize)>) {
    out.extend_from_slice(b"xref\n");
    let runs = subsections(entries.keys().copied());
    for (first, count) in runs {
        out.extend_from_slice(format!("{} {}\n", first, count).as_bytes());
        for id in first..first + count {
            if let Some((generation, offset)) = entries.get(&id) {
                // Each entry is exactly 20 bytes
                out.extend_from_slice(format!("{:010} {:05} n \n", offset, generation).as_bytes());
            }
        }
    }
}

/// Uncompressed xref stream with `/W [1 n 2]`, n wide enough for the largest offset.
fn xref_stream(mut dict: Dict, entries: &BTreeMap<u32, (u16, usize)>) -> Object {
    let max_offset = entries.values().map(|(_, off)| *off).max().unwrap_or(0) as u64;
    let offset_width = (1..=8usize)
        .find(|w| *w >= 4 && (*w == 8 || max_offset < 1u64 << (8 * *w)))
        .unwrap_or(8);

    let mut data = Vec::with_capacity(entries.len() * (3 + offset_width));
    for (generation, offset) in entries.values() {
        data.push(1u8);
        data.extend_from_slice(&(*offset as u64).to_be_bytes()[8 - offset_width..]);
        data.extend_from_slice(&generation.to_be_bytes());
    }

    let index = subsections(entries.keys().copied())
        .into_iter()
        .flat_map(|(first, count)| [Object::Integer(first as i64), Object::Integer(count as i64)])
        .collect();

    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(offset_width as i64),
            Object::Integer(2),
        ]),
    );
    dict.insert("Index".to_string(), Object::Array(index));

    Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xref::{XRefEntry, find_xref_offset, parse_xref};

    fn minimal_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        let o2 = pdf.len();
        pdf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n");
        let x = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 3\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R /ID [<AA> <BB>] >>\nstartxref\n{}\n%%EOF",
                o1, o2, x
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_subsections() {
        assert_eq!(subsections([1, 2, 3, 7, 9, 10].into_iter()), vec![(1, 3), (7, 1), (9, 2)]);
        assert!(subsections(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_append_preserves_prefix_and_chains() {
        let base = minimal_pdf();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let added = update.add(Object::dict(vec![("Marker", Object::Integer(1))]));
        assert_eq!(added, ObjectRef::new(3, 0));
        update.set(ObjectRef::new(2, 0), Object::dict(vec![
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(vec![])),
            ("Count", Object::Integer(0)),
        ]));
        let written = update.write(&base).unwrap();

        assert!(written.bytes.starts_with(&base));
        assert_eq!(written.update_start, base.len() + 1);

        let mut reparsed = PdfDocument::from_bytes(written.bytes.clone()).unwrap();
        assert_eq!(reparsed.startxref() as usize, written.xref_offset);
        assert_eq!(reparsed.trailer()["Prev"].as_integer(), Some(doc.startxref() as i64));
        assert_eq!(reparsed.trailer()["Size"].as_integer(), Some(4));
        assert!(reparsed.trailer().contains_key("ID"));
        let marker = reparsed.load_dict(added).unwrap();
        assert_eq!(marker["Marker"].as_integer(), Some(1));
    }

    #[test]
    fn test_raw_body_offsets() {
        let base = minimal_pdf();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let r = update.allocate();
        update.set_raw(r, b"<< /Raw true >>".to_vec());
        let written = update.write(&base).unwrap();
        let at = written.body_offset(r.id).unwrap();
        assert!(written.bytes[at..].starts_with(b"<< /Raw true >>"));
    }

    #[test]
    fn test_unwritten_allocation_fails() {
        let base = minimal_pdf();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        update.allocate();
        assert!(update.write(&base).is_err());
    }

    #[test]
    fn test_xref_stream_follows_xref_stream() {
        let base = minimal_pdf();
        let doc = PdfDocument::from_bytes(base.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        update.xref_kind = XRefKind::Stream;
        let r = update.add(Object::Integer(42));
        let written = update.write(&base).unwrap();

        let offset = find_xref_offset(&written.bytes).unwrap();
        let (table, kind) = parse_xref(&written.bytes, offset).unwrap();
        assert_eq!(kind, XRefKind::Stream);
        assert!(matches!(table.get(r.id), Some(XRefEntry::InUse { .. })));
        // The stream's own entry
        assert!(matches!(table.get(r.id + 1), Some(XRefEntry::InUse { offset: o, .. }) if *o == offset));
        assert!(table.get(1).is_some());
    }
}
