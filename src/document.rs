//! In-memory PDF document.
//!
//! [`PdfDocument`] reads a complete PDF held in a [`bytes::Bytes`] buffer and
//! gives the signing components what they need to append an incremental
//! update: the trailer and last xref section, object loading (including objects
//! inside object streams), and the page tree with inherited attributes.

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Dict, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object_at;
use crate::xref::{CrossRefTable, XRefEntry, XRefKind, find_xref_offset, parse_xref};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// Maximum recursion depth for object resolution and page-tree walks.
const MAX_RECURSION_DEPTH: u32 = 100;

/// Page attributes that may be inherited from `/Pages` ancestors.
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// Letter size, used when a page has no usable `/MediaBox`.
const DEFAULT_MEDIA_BOX: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 612.0,
    height: 792.0,
};

/// A leaf of the page tree.
#[derive(Debug, Clone)]
pub struct Page {
    /// Reference of the page object
    pub reference: ObjectRef,
    /// Page dictionary exactly as stored
    pub dict: Dict,
    /// Inheritable attributes collected from ancestors
    pub inherited: Dict,
}

impl Page {
    /// Look up an attribute on the page, falling back to inherited values for
    /// the inheritable keys.
    pub fn attribute(&self, key: &str) -> Option<&Object> {
        self.dict.get(key).or_else(|| self.inherited.get(key))
    }
}

/// Geometry of one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    /// Media box
    pub media_box: Rect,
    /// Crop box if specified
    pub crop_box: Option<Rect>,
    /// Rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
}

/// PDF document parsed from memory.
///
/// ```no_run
/// use pdf_seal::document::PdfDocument;
///
/// let bytes = std::fs::read("report.pdf")?;
/// let mut doc = PdfDocument::from_bytes(bytes)?;
/// println!("{} pages", doc.page_count()?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    xref: CrossRefTable,
    xref_kind: XRefKind,
    startxref: u64,
    object_cache: HashMap<ObjectRef, Object>,
    objstm_cache: HashMap<u32, HashMap<u32, Object>>,
    resolving: HashSet<ObjectRef>,
    depth: u32,
    pages: Option<Vec<Page>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("xref_entries", &self.xref.len())
            .field("xref_kind", &self.xref_kind)
            .field("startxref", &self.startxref)
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Parse the header, the last `startxref` and the whole xref chain.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;
        let startxref = find_xref_offset(&data)?;
        let (xref, xref_kind) = parse_xref(&data, startxref)?;

        if !xref.trailer().contains_key("Root") {
            return Err(Error::InvalidPdf("trailer has no /Root".to_string()));
        }

        log::debug!(
            "loaded PDF {}.{}: {} bytes, {} xref entries, last section {:?} at {}",
            version.0,
            version.1,
            data.len(),
            xref.len(),
            xref_kind,
            startxref
        );

        Ok(Self {
            data,
            version,
            xref,
            xref_kind,
            startxref,
            object_cache: HashMap::new(),
            objstm_cache: HashMap::new(),
            resolving: HashSet::new(),
            depth: 0,
            pages: None,
        })
    }

    /// The complete input bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Newest trailer dictionary.
    pub fn trailer(&self) -> &Dict {
        self.xref.trailer()
    }

    /// Offset of the last cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Kind of the last cross-reference section.
    pub fn xref_kind(&self) -> XRefKind {
        self.xref_kind
    }

    /// True when the trailer carries an `/Encrypt` dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.trailer().contains_key("Encrypt")
    }

    /// First object number that is free for new objects.
    pub fn next_object_id(&self) -> u32 {
        let size = self
            .trailer()
            .get("Size")
            .and_then(|s| s.as_integer())
            .filter(|&s| s > 0)
            .unwrap_or(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Reference to the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|r| r.as_reference())
            .ok_or_else(|| Error::InvalidPdf("/Root is not a reference".to_string()))
    }

    /// The document catalog dictionary.
    pub fn catalog(&mut self) -> Result<Dict> {
        let root = self.catalog_ref()?;
        self.load_dict(root)
    }

    /// Load an indirect object, using the cache and guarding against cycles.
    pub fn load_object(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&obj_ref) {
            return Ok(cached.clone());
        }
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }
        if !self.resolving.insert(obj_ref) {
            return Err(Error::CircularReference(obj_ref));
        }

        self.depth += 1;
        let result = self.load_uncached(obj_ref);
        self.depth -= 1;
        self.resolving.remove(&obj_ref);

        let object = result?;
        self.object_cache.insert(obj_ref, object.clone());
        Ok(object)
    }

    fn load_uncached(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(obj_ref.id)
            .copied()
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry {
            XRefEntry::Free => Ok(Object::Null),
            XRefEntry::InUse { offset, .. } => {
                let (found, object) = parse_indirect_object_at(&self.data, offset as usize)?;
                if found.id != obj_ref.id {
                    return Err(Error::ParseError {
                        offset: offset as usize,
                        reason: format!("expected object {}, found {}", obj_ref, found),
                    });
                }
                self.resolve_stream_length(object)
            },
            XRefEntry::Compressed { stream_id, index } => {
                log::debug!("object {} is #{} in object stream {}", obj_ref, index, stream_id);
                if !self.objstm_cache.contains_key(&stream_id) {
                    let stream = self.load_object(ObjectRef::new(stream_id, 0))?;
                    let objects = parse_object_stream(&stream)?;
                    self.objstm_cache.insert(stream_id, objects);
                }
                self.objstm_cache
                    .get(&stream_id)
                    .and_then(|objects| objects.get(&obj_ref.id))
                    .cloned()
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
            },
        }
    }

    /// Streams whose `/Length` is an indirect reference were cut at `endstream`
    /// by the parser; re-cut them with the real length when it is available.
    fn resolve_stream_length(&mut self, object: Object) -> Result<Object> {
        let Object::Stream { mut dict, data } = object else {
            return Ok(object);
        };
        if let Some(length_ref) = dict.get("Length").and_then(|l| l.as_reference()) {
            if let Ok(Object::Integer(length)) = self.load_object(length_ref) {
                let length = length.max(0) as usize;
                let data = if length <= data.len() {
                    data.slice(..length)
                } else {
                    data
                };
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                return Ok(Object::Stream { dict, data });
            }
        }
        Ok(Object::Stream { dict, data })
    }

    /// Follow a reference (if `obj` is one); direct objects are returned as-is.
    pub fn resolve(&mut self, obj: &Object) -> Result<Object> {
        match obj {
            Object::Reference(r) => self.load_object(*r),
            other => Ok(other.clone()),
        }
    }

    /// Load an object that must be a dictionary (or a stream's dictionary).
    pub fn load_dict(&mut self, obj_ref: ObjectRef) -> Result<Dict> {
        let object = self.load_object(obj_ref)?;
        match object {
            Object::Dictionary(d) => Ok(d),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// All pages in document order.
    pub fn pages(&mut self) -> Result<&[Page]> {
        if self.pages.is_none() {
            let catalog = self.catalog()?;
            let root = catalog
                .get("Pages")
                .and_then(|p| p.as_reference())
                .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

            let mut pages = Vec::new();
            let mut visited = HashSet::new();
            self.collect_pages(root, &Dict::new(), &mut visited, &mut pages, 0)?;
            log::debug!("page tree holds {} pages", pages.len());
            self.pages = Some(pages);
        }
        Ok(self.pages.as_deref().unwrap_or_default())
    }

    fn collect_pages(
        &mut self,
        node_ref: ObjectRef,
        inherited: &Dict,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<Page>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }
        if !visited.insert(node_ref) {
            log::warn!("page tree revisits {}; skipping", node_ref);
            return Ok(());
        }

        let node = self.load_dict(node_ref)?;
        let is_leaf = match node.get("Type").and_then(|t| t.as_name()) {
            Some("Page") => true,
            Some("Pages") => false,
            _ => !node.contains_key("Kids"),
        };

        if is_leaf {
            pages.push(Page {
                reference: node_ref,
                dict: node,
                inherited: inherited.clone(),
            });
            return Ok(());
        }

        // Child values override ancestors
        let mut scope = inherited.clone();
        for key in INHERITABLE {
            if let Some(value) = node.get(key) {
                scope.insert(key.to_string(), value.clone());
            }
        }

        let kids = match node.get("Kids") {
            Some(kids) => self.resolve(kids)?,
            None => return Err(Error::InvalidPdf(format!("pages node {} has no /Kids", node_ref))),
        };
        for kid in kids.as_array().map(Vec::as_slice).unwrap_or_default() {
            match kid.as_reference() {
                Some(kid_ref) => self.collect_pages(kid_ref, &scope, visited, pages, depth + 1)?,
                None => log::warn!("ignoring direct object in /Kids of {}", node_ref),
            }
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&mut self) -> Result<usize> {
        Ok(self.pages()?.len())
    }

    /// Page at `index` (0-based).
    pub fn page(&mut self, index: usize) -> Result<Page> {
        let pages = self.pages()?;
        let count = pages.len();
        pages.get(index).cloned().ok_or_else(|| {
            Error::InvalidPdf(format!("page index {} out of range ({} pages)", index, count))
        })
    }

    /// Geometry of the page at `index`, with inherited and indirect values resolved.
    pub fn page_info(&mut self, index: usize) -> Result<PageInfo> {
        let page = self.page(index)?;
        let media_box = match page.attribute("MediaBox").cloned() {
            Some(obj) => self.rect_from(&obj)?.unwrap_or(DEFAULT_MEDIA_BOX),
            None => DEFAULT_MEDIA_BOX,
        };
        let crop_box = match page.attribute("CropBox").cloned() {
            Some(obj) => self.rect_from(&obj)?,
            None => None,
        };
        let rotation = match page.attribute("Rotate").cloned() {
            Some(obj) => self.resolve(&obj)?.as_integer().unwrap_or(0) as i32,
            None => 0,
        };
        Ok(PageInfo {
            media_box,
            crop_box,
            rotation,
        })
    }

    fn rect_from(&mut self, obj: &Object) -> Result<Option<Rect>> {
        let resolved = self.resolve(obj)?;
        let Some(arr) = resolved.as_array() else {
            return Ok(None);
        };
        let mut values = [0f32; 4];
        for (slot, item) in values.iter_mut().zip(arr) {
            match self.resolve(item)?.as_number() {
                Some(v) => *slot = v as f32,
                None => return Ok(None),
            }
        }
        if arr.len() < 4 {
            return Ok(None);
        }
        Ok(Some(Rect::from_points(values[0], values[1], values[2], values[3])))
    }

    /// Effective `/Resources` dictionary of a page (inherited and dereferenced).
    pub fn page_resources(&mut self, index: usize) -> Result<Dict> {
        let page = self.page(index)?;
        match page.attribute("Resources").cloned() {
            Some(obj) => match self.resolve(&obj)? {
                Object::Dictionary(d) => Ok(d),
                _ => Ok(Dict::new()),
            },
            None => Ok(Dict::new()),
        }
    }

    /// Decoded, concatenated content streams of a page.
    pub fn page_content(&mut self, index: usize) -> Result<Vec<u8>> {
        let page = self.page(index)?;
        let Some(contents) = page.dict.get("Contents").cloned() else {
            return Ok(Vec::new());
        };

        let streams = match self.resolve(&contents)? {
            Object::Array(items) => items,
            single => vec![single],
        };

        let mut combined = Vec::new();
        for item in streams {
            let stream = self.resolve(&item)?;
            combined.extend_from_slice(&stream.decode_stream_data()?);
            combined.push(b'\n');
        }
        Ok(combined)
    }
}

/// Validate the `%PDF-M.m` header and return the version.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let header = data
        .get(..8)
        .ok_or_else(|| Error::InvalidHeader("file too short".to_string()))?;
    if &header[..5] != b"%PDF-" {
        return Err(Error::InvalidHeader(String::from_utf8_lossy(&header[..5]).into_owned()));
    }

    let (major, dot, minor) = (header[5], header[6], header[7]);
    if dot != b'.' || !major.is_ascii_digit() || !minor.is_ascii_digit() {
        return Err(Error::InvalidHeader(String::from_utf8_lossy(header).into_owned()));
    }

    let (major, minor) = (major - b'0', minor - b'0');
    if major > 2 || major == 0 {
        return Err(Error::UnsupportedVersion(format!("{}.{}", major, minor)));
    }
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two pages under a Pages node that carries MediaBox and Resources.
    fn two_page_pdf() -> Vec<u8> {
        let objects: Vec<String> = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".into(),
            "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 595 842] /Resources << /ProcSet [/PDF] >> >>".into(),
            "<< /Type /Page /Parent 2 0 R /Contents 5 0 R >>".into(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 300 400] /Contents [5 0 R 6 0 R] >>".into(),
            "<< /Length 5 >>\nstream\nBT ET\nendstream".into(),
            "<< /Length 7 0 R >>\nstream\nq Q\nendstream".into(),
            "3".into(),
        ];
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header(b"%PDF-1.7\n").unwrap(), (1, 7));
        assert_eq!(parse_header(b"%PDF-2.0\n").unwrap(), (2, 0));
        assert!(matches!(parse_header(b"%PDF-9.1\n"), Err(Error::UnsupportedVersion(_))));
        assert!(matches!(parse_header(b"PK\x03\x04zipfile"), Err(Error::InvalidHeader(_))));
        assert!(matches!(parse_header(b"%PDF"), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_pages_and_inheritance() {
        let mut doc = PdfDocument::from_bytes(two_page_pdf()).unwrap();
        assert_eq!(doc.page_count().unwrap(), 2);
        assert_eq!(doc.page(0).unwrap().reference, ObjectRef::new(3, 0));

        let first = doc.page_info(0).unwrap();
        assert_eq!(first.media_box, Rect::new(0.0, 0.0, 595.0, 842.0));
        let second = doc.page_info(1).unwrap();
        assert_eq!(second.media_box, Rect::new(0.0, 0.0, 300.0, 400.0));

        assert!(doc.page_resources(0).unwrap().contains_key("ProcSet"));
        assert!(doc.page(5).is_err());
    }

    #[test]
    fn test_page_content_concatenates_and_resolves_length() {
        let mut doc = PdfDocument::from_bytes(two_page_pdf()).unwrap();
        assert_eq!(doc.page_content(0).unwrap(), b"BT ET\n");
        assert_eq!(doc.page_content(1).unwrap(), b"BT ET\nq Q\n");
    }

    #[test]
    fn test_trailer_queries() {
        let doc = PdfDocument::from_bytes(two_page_pdf()).unwrap();
        assert_eq!(doc.next_object_id(), 8);
        assert_eq!(doc.xref_kind(), XRefKind::Table);
        assert_eq!(doc.catalog_ref().unwrap(), ObjectRef::new(1, 0));
        assert!(!doc.is_encrypted());
        assert_eq!(doc.version(), (1, 4));
    }

    #[test]
    fn test_missing_object() {
        let mut doc = PdfDocument::from_bytes(two_page_pdf()).unwrap();
        assert!(matches!(doc.load_object(ObjectRef::new(99, 0)), Err(Error::ObjectNotFound(99, 0))));
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(PdfDocument::from_bytes(b"hello world, not a pdf".to_vec()).is_err());
    }
}
