//! Appearance request and result types.

use crate::geometry::Rect;
use crate::writer::ImageError;
use bytes::Bytes;

/// A stamp box on one page, in page user space (points, origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRegion {
    /// 0-based page index
    pub page_index: usize,
    /// Left edge
    pub x: f32,
    /// Bottom edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl PageRegion {
    /// Region on `page_index` with its lower-left corner at (x, y).
    pub fn new(page_index: usize, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            page_index,
            x,
            y,
            width,
            height,
        }
    }

    /// The box as a [`Rect`].
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        [self.x, self.y, self.width, self.height].iter().all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// How an image is scaled into its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Keep the aspect ratio and centre the image
    #[default]
    Fit,
    /// Fill the region exactly
    Stretch,
}

/// Pages that receive a stamp when regions are chosen automatically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageSelection {
    /// Every page
    #[default]
    All,
    /// The first page only
    First,
    /// The listed 0-based pages
    Pages(Vec<usize>),
}

/// Automatic placement: anchor search with a bottom-right fallback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefaultPlacement {
    /// Pages to stamp
    pub pages: PageSelection,
    /// Phrases to look for; the configured phrases when empty
    pub anchors: Vec<String>,
}

/// What to draw and where.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppearanceSpec {
    /// Encoded raster (PNG, JPEG or TIFF)
    pub image: Option<Bytes>,
    /// Text drawn in Helvetica
    pub text: Option<String>,
    /// Explicit regions
    pub placements: Vec<PageRegion>,
    /// Image scaling
    pub fit: FitPolicy,
    /// Used when `placements` is empty
    pub default_placement: Option<DefaultPlacement>,
}

impl AppearanceSpec {
    /// Empty spec; add content and placement with the `with_*` methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw this image.
    pub fn with_image(mut self, image: impl Into<Bytes>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Draw this text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Add an explicit region.
    pub fn with_placement(mut self, region: PageRegion) -> Self {
        self.placements.push(region);
        self
    }

    /// Set the image scaling.
    pub fn with_fit(mut self, fit: FitPolicy) -> Self {
        self.fit = fit;
        self
    }

    /// Place automatically on `pages`.
    pub fn with_default_placement(mut self, pages: PageSelection) -> Self {
        self.default_placement = Some(DefaultPlacement {
            pages,
            anchors: Vec::new(),
        });
        self
    }

    /// Problem that makes this spec unusable, if any. Page indices are checked
    /// against the document later.
    pub fn problem(&self) -> Option<String> {
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        if self.image.is_none() && !has_text {
            return Some("appearance has neither image nor text".to_string());
        }
        if self.placements.is_empty() && self.default_placement.is_none() {
            return Some("appearance has no placement".to_string());
        }
        if let Some(region) = self.placements.iter().find(|r| !r.is_well_formed()) {
            return Some(format!("region {:?} must have finite coordinates and a positive size", region));
        }
        if let Some(DefaultPlacement {
            pages: PageSelection::Pages(pages),
            ..
        }) = &self.default_placement
        {
            if pages.is_empty() {
                return Some("page selection is empty".to_string());
            }
        }
        None
    }
}

/// PDF bytes with a visual stamp applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppearedDocument(Bytes);

impl AppearedDocument {
    pub(crate) fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// The stamped file.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The stamped file, without copying.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for AppearedDocument {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<AppearedDocument> for Bytes {
    fn from(doc: AppearedDocument) -> Self {
        doc.0
    }
}

/// Appearance failure.
#[derive(Debug, thiserror::Error)]
pub enum AppearanceError {
    /// The image could not be decoded or has no pixels
    #[error("Bad image: {0}")]
    BadImage(#[from] ImageError),

    /// A region or page selection names a page the document does not have
    #[error("Page {index} out of range (document has {count} pages)")]
    InvalidPage {
        /// Requested page
        index: usize,
        /// Pages in the document
        count: usize,
    },

    /// Nothing to draw, or nowhere to draw it
    #[error("Empty appearance: {0}")]
    EmptySpec(String),

    /// The document could not be read or updated
    #[error("Document error: {0}")]
    Document(#[from] crate::error::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_requires_content() {
        let spec = AppearanceSpec::new().with_placement(PageRegion::new(0, 10.0, 10.0, 50.0, 20.0));
        assert!(spec.problem().is_some());
        assert!(spec.with_text("Approved").problem().is_none());
    }

    #[test]
    fn test_problem_requires_placement() {
        let spec = AppearanceSpec::new().with_text("Approved");
        assert_eq!(spec.problem().as_deref(), Some("appearance has no placement"));
        assert!(spec.with_default_placement(PageSelection::First).problem().is_none());
    }

    #[test]
    fn test_problem_rejects_degenerate_region() {
        let spec = AppearanceSpec::new()
            .with_text("x")
            .with_placement(PageRegion::new(0, 10.0, 10.0, 0.0, 20.0));
        assert!(spec.problem().is_some());

        let spec = AppearanceSpec::new()
            .with_text("x")
            .with_placement(PageRegion::new(0, f32::NAN, 10.0, 5.0, 20.0));
        assert!(spec.problem().is_some());
    }

    #[test]
    fn test_blank_text_counts_as_missing() {
        let spec = AppearanceSpec::new()
            .with_text("   ")
            .with_default_placement(PageSelection::All);
        assert!(spec.problem().is_some());
    }

    #[test]
    fn test_empty_page_list() {
        let spec = AppearanceSpec::new()
            .with_text("x")
            .with_default_placement(PageSelection::Pages(vec![]));
        assert_eq!(spec.problem().as_deref(), Some("page selection is empty"));
    }

    #[test]
    fn test_region_rect() {
        let region = PageRegion::new(2, 10.0, 20.0, 30.0, 40.0);
        assert_eq!(region.rect().top(), 60.0);
    }
}
