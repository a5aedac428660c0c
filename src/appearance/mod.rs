//! Visual signature stamps.
//!
//! A stamp is an image and/or a line of text drawn into a region of a page.
//! It is added as an incremental update: the page's `/Contents` becomes
//!
//! ```text
//! [ q-stream, original streams…, Q+overlay-stream ]
//! ```
//!
//! so the original content runs unchanged inside a saved graphics state and
//! the overlay draws in the default coordinate system afterwards. The page's
//! resources are copied with the stamp's image and font added under names
//! that are free on that page.
//!
//! When no explicit region is given, each selected page is searched for an
//! anchor phrase (see `anchor`); the stamp goes just above the phrase, or in
//! the bottom-right corner when the phrase is absent.

mod anchor;
mod cmap;
mod font;
mod types;

pub use types::{
    AppearanceError, AppearanceSpec, AppearedDocument, DefaultPlacement, FitPolicy, PageRegion,
    PageSelection,
};

use crate::config::AppearanceConfig;
use crate::document::PdfDocument;
use crate::error::Error;
use crate::geometry::Rect;
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::{ContentStreamBuilder, ImageData, IncrementalUpdate};
use bytes::Bytes;
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, AppearanceError>;

/// Line height as a multiple of the font size.
const LINE_SPACING: f32 = 1.2;

/// Renders stamps onto pages.
#[derive(Debug, Clone, Default)]
pub struct AppearanceRenderer {
    config: AppearanceConfig,
}

/// Objects shared by every stamped page of one update.
struct SharedResources {
    image: Option<(ObjectRef, ImageData)>,
    font: Option<ObjectRef>,
    open_state: ObjectRef,
}

impl AppearanceRenderer {
    /// Renderer with the given placement settings.
    pub fn new(config: AppearanceConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &AppearanceConfig {
        &self.config
    }

    /// Draw `spec` onto `document`.
    ///
    /// The input bytes are a prefix of the output, and the same input and spec
    /// always produce the same bytes.
    pub fn apply(&self, document: impl Into<Bytes>, spec: &AppearanceSpec) -> Result<AppearedDocument> {
        if let Some(problem) = spec.problem() {
            return Err(AppearanceError::EmptySpec(problem));
        }
        let base: Bytes = document.into();
        let image = spec.image.as_deref().map(ImageData::from_bytes).transpose()?;

        let mut doc = open_stampable(base.clone())?;
        let regions = self.resolve_regions(&mut doc, spec, image.as_ref())?;

        let mut by_page: BTreeMap<usize, Vec<PageRegion>> = BTreeMap::new();
        for region in regions {
            by_page.entry(region.page_index).or_default().push(region);
        }

        let mut update = IncrementalUpdate::new(&doc);
        let shared = SharedResources {
            image: image.map(|img| {
                let mask = img.soft_mask_xobject().map(|m| update.add(m));
                (update.add(img.xobject(mask)), img)
            }),
            font: stamp_text(spec).map(|_| update.add(font_resource())),
            open_state: update.add(stream(b"q\n".to_vec())),
        };

        for (page_index, regions) in &by_page {
            self.stamp_page(&mut doc, &mut update, &shared, *page_index, regions, spec)?;
        }

        let written = update.write(&base)?;
        log::info!(
            "stamped {} page(s), {} -> {} bytes",
            by_page.len(),
            base.len(),
            written.bytes.len()
        );
        Ok(AppearedDocument::new(Bytes::from(written.bytes)))
    }

    /// The regions `spec` resolves to on `document`, without drawing.
    pub fn placements(&self, document: impl Into<Bytes>, spec: &AppearanceSpec) -> Result<Vec<PageRegion>> {
        if let Some(problem) = spec.problem() {
            return Err(AppearanceError::EmptySpec(problem));
        }
        let image = spec.image.as_deref().map(ImageData::from_bytes).transpose()?;
        let mut doc = open_stampable(document.into())?;
        self.resolve_regions(&mut doc, spec, image.as_ref())
    }

    fn resolve_regions(
        &self,
        doc: &mut PdfDocument,
        spec: &AppearanceSpec,
        image: Option<&ImageData>,
    ) -> Result<Vec<PageRegion>> {
        let count = doc.page_count()?;
        let check = |index: usize| {
            if index < count {
                Ok(index)
            } else {
                Err(AppearanceError::InvalidPage { index, count })
            }
        };

        if !spec.placements.is_empty() {
            for region in &spec.placements {
                check(region.page_index)?;
            }
            return Ok(spec.placements.clone());
        }

        let Some(placement) = &spec.default_placement else {
            return Err(AppearanceError::EmptySpec("appearance has no placement".to_string()));
        };
        let pages: Vec<usize> = match &placement.pages {
            PageSelection::All => (0..count).collect(),
            PageSelection::First => vec![check(0)?],
            PageSelection::Pages(pages) => {
                let mut selected = Vec::with_capacity(pages.len());
                for &page in pages {
                    if !selected.contains(&page) {
                        selected.push(check(page)?);
                    }
                }
                selected
            },
        };

        let (width, height) = match image {
            Some(img) => (
                img.width as f32 * self.config.pixel_scale,
                img.height as f32 * self.config.pixel_scale,
            ),
            None => (self.config.default_box_width, self.config.default_box_height),
        };
        let phrases = if placement.anchors.is_empty() {
            &self.config.anchor_phrases
        } else {
            &placement.anchors
        };

        let mut regions = Vec::with_capacity(pages.len());
        for page_index in pages {
            let media_box = doc.page_info(page_index)?.media_box;
            let region = match self.anchor_region(doc, page_index, phrases, width, height) {
                Some(region) => region,
                None => {
                    log::warn!("no anchor phrase on page {}, using the bottom-right corner", page_index);
                    PageRegion::new(
                        page_index,
                        media_box.right() - self.config.margin - width,
                        media_box.bottom() + self.config.margin,
                        width,
                        height,
                    )
                },
            };
            regions.push(region);
        }
        Ok(regions)
    }

    fn anchor_region(
        &self,
        doc: &mut PdfDocument,
        page_index: usize,
        phrases: &[String],
        width: f32,
        height: f32,
    ) -> Option<PageRegion> {
        let content = match doc.page_content(page_index) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("cannot read content of page {}: {}", page_index, e);
                return None;
            },
        };
        let fonts = match doc.page_resources(page_index) {
            Ok(resources) => anchor::page_fonts(doc, &resources),
            Err(e) => {
                log::debug!("no fonts for page {}: {}", page_index, e);
                anchor::FontMap::new()
            },
        };
        let hit = anchor::find_anchor(&anchor::text_runs(&content, &fonts), phrases)?;
        log::debug!(
            "anchor on page {} at ({}, {})",
            page_index,
            hit.origin.x,
            hit.origin.y
        );
        Some(PageRegion::new(
            page_index,
            hit.origin.x,
            hit.origin.y + hit.height,
            width,
            height,
        ))
    }

    fn stamp_page(
        &self,
        doc: &mut PdfDocument,
        update: &mut IncrementalUpdate,
        shared: &SharedResources,
        page_index: usize,
        regions: &[PageRegion],
        spec: &AppearanceSpec,
    ) -> Result<()> {
        let page = doc.page(page_index)?;
        let mut resources = doc.page_resources(page_index)?;

        let image_name = match &shared.image {
            Some((image_ref, _)) => Some(add_resource(doc, &mut resources, "XObject", "SealIm", *image_ref)?),
            None => None,
        };
        let font_name = match shared.font {
            Some(font_ref) => Some(add_resource(doc, &mut resources, "Font", "SealF", font_ref)?),
            None => None,
        };

        let mut overlay = ContentStreamBuilder::new();
        overlay.restore_state();
        for region in regions {
            let image = shared
                .image
                .as_ref()
                .zip(image_name.as_deref())
                .map(|((_, data), name)| (name, data));
            let text = stamp_text(spec).zip(font_name.as_deref());
            self.draw_region(&mut overlay, region.rect(), image, text, spec.fit);
        }
        let overlay_ref = update.add(stream(overlay.build()));

        let mut contents = vec![Object::Reference(shared.open_state)];
        contents.extend(existing_contents(doc, page.dict.get("Contents"))?);
        contents.push(Object::Reference(overlay_ref));

        let mut page_dict = page.dict.clone();
        page_dict.insert("Contents".to_string(), Object::Array(contents));
        page_dict.insert("Resources".to_string(), Object::Dictionary(resources));
        update.set(page.reference, Object::Dictionary(page_dict));

        log::debug!("stamped {} region(s) on page {}", regions.len(), page_index);
        Ok(())
    }

    fn draw_region(
        &self,
        out: &mut ContentStreamBuilder,
        rect: Rect,
        image: Option<(&str, &ImageData)>,
        text: Option<(&str, &str)>,
        fit: FitPolicy,
    ) {
        let (image_area, text_area) = match (image.is_some(), text.is_some()) {
            (true, true) => {
                let band = rect.height * self.config.text_band_ratio;
                (
                    Some(Rect::new(rect.x, rect.y + band, rect.width, rect.height - band)),
                    Some(Rect::new(rect.x, rect.y, rect.width, band)),
                )
            },
            (true, false) => (Some(rect), None),
            (false, true) => (None, Some(rect)),
            (false, false) => (None, None),
        };

        out.save_state().clip_rect(rect.x, rect.y, rect.width, rect.height);
        if let (Some((name, data)), Some(area)) = (image, image_area) {
            let target = match fit {
                FitPolicy::Fit => area.fit_aspect(data.aspect_ratio()),
                FitPolicy::Stretch => area,
            };
            out.draw_image(name, target.x, target.y, target.width, target.height);
        }
        if let (Some((content, font_name)), Some(area)) = (text, text_area) {
            self.draw_text(out, area, content, font_name);
        }
        out.restore_state();
    }

    /// Centre the lines of `text` in `area`, shrinking the font to fit.
    fn draw_text(&self, out: &mut ContentStreamBuilder, area: Rect, text: &str, font_name: &str) {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            return;
        }
        let em_height = (font::ASCENT - font::DESCENT) / 1000.0;
        let block_factor = em_height + LINE_SPACING * (lines.len() - 1) as f32;
        let widest = lines.iter().map(|l| font::text_width(l, 1.0)).fold(0.0, f32::max);

        let mut size = self.config.font_size.min(area.height * 0.9 / block_factor);
        if widest > 0.0 {
            size = size.min(area.width * 0.95 / widest);
        }
        if !(size.is_finite() && size > 0.0) {
            return;
        }

        let block_height = size * block_factor;
        let first_baseline = area.y + (area.height + block_height) / 2.0 - font::ASCENT / 1000.0 * size;
        out.fill_gray(0.0);
        for (i, line) in lines.iter().enumerate() {
            let x = area.x + (area.width - font::text_width(line, size)) / 2.0;
            let y = first_baseline - i as f32 * LINE_SPACING * size;
            out.text_at(font_name, size, x, y, font::encode(line));
        }
    }
}

fn open_stampable(data: Bytes) -> Result<PdfDocument> {
    let doc = PdfDocument::from_bytes(data)?;
    if doc.is_encrypted() {
        return Err(Error::Unsupported("stamping encrypted documents".to_string()).into());
    }
    Ok(doc)
}

fn stamp_text(spec: &AppearanceSpec) -> Option<&str> {
    spec.text.as_deref().filter(|t| !t.trim().is_empty())
}

fn stream(data: Vec<u8>) -> Object {
    Object::Stream {
        dict: Dict::new(),
        data: Bytes::from(data),
    }
}

fn font_resource() -> Object {
    Object::dict(vec![
        ("Type", Object::name("Font")),
        ("Subtype", Object::name("Type1")),
        ("BaseFont", Object::name(font::BASE_FONT)),
        ("Encoding", Object::name("WinAnsiEncoding")),
    ])
}

/// Register `target` in `resources[category]` under the first free
/// `<prefix><n>` and return that name.
fn add_resource(
    doc: &mut PdfDocument,
    resources: &mut Dict,
    category: &str,
    prefix: &str,
    target: ObjectRef,
) -> Result<String> {
    let mut entries = match resources.get(category) {
        Some(obj) => match doc.resolve(obj)? {
            Object::Dictionary(d) => d,
            _ => Dict::new(),
        },
        None => Dict::new(),
    };
    let name = (1..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|candidate| !entries.contains_key(candidate))
        .unwrap_or_else(|| prefix.to_string());
    entries.insert(name.clone(), Object::Reference(target));
    resources.insert(category.to_string(), Object::Dictionary(entries));
    Ok(name)
}

/// The page's content streams as a list of references (or inline objects).
fn existing_contents(doc: &mut PdfDocument, contents: Option<&Object>) -> Result<Vec<Object>> {
    Ok(match contents {
        None => Vec::new(),
        Some(Object::Array(items)) => items.clone(),
        Some(Object::Reference(r)) => match doc.load_object(*r)? {
            Object::Array(items) => items,
            _ => vec![Object::Reference(*r)],
        },
        Some(other) => vec![other.clone()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_font_resource() {
        let font = font_resource();
        let dict = font.as_dict().unwrap();
        assert_eq!(dict["BaseFont"].as_name(), Some("Helvetica"));
        assert_eq!(dict["Encoding"].as_name(), Some("WinAnsiEncoding"));
    }

    #[test]
    fn test_draw_text_centred() {
        let renderer = AppearanceRenderer::default();
        let mut out = ContentStreamBuilder::new();
        renderer.draw_text(&mut out, Rect::new(0.0, 0.0, 200.0, 40.0), "OK", "SealF1");
        let content = String::from_utf8(out.build()).unwrap();

        // 9pt Helvetica "OK" is 13.005pt wide
        assert!(content.contains("/SealF1 9 Tf"));
        assert!(content.contains("1 0 0 1 93.4975 "));
        assert!(content.contains("(OK) Tj"));
    }

    #[test]
    fn test_draw_text_shrinks_to_width() {
        let renderer = AppearanceRenderer::default();
        let mut out = ContentStreamBuilder::new();
        renderer.draw_text(&mut out, Rect::new(0.0, 0.0, 20.0, 40.0), "A long line of text", "F");
        let content = String::from_utf8(out.build()).unwrap();
        assert!(!content.contains("/F 9 Tf"));
    }

    #[test]
    fn test_draw_region_with_image_and_text() {
        let renderer = AppearanceRenderer::default();
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([0, 0, 0]));
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let data = ImageData::from_bytes(png.get_ref()).unwrap();

        let mut out = ContentStreamBuilder::new();
        renderer.draw_region(
            &mut out,
            Rect::new(0.0, 0.0, 100.0, 100.0),
            Some(("SealIm1", &data)),
            Some(("Dr. Jane Doe", "SealF1")),
            FitPolicy::Fit,
        );
        let content = String::from_utf8(out.build()).unwrap();
        // image area is 100 x 70 above a 30pt band; 2:1 image fits as 100 x 50
        assert!(content.contains("100 0 0 50 0 40 cm"));
        assert!(content.contains("/SealIm1 Do"));
        assert!(content.contains("(Dr. Jane Doe) Tj"));
        assert!(content.starts_with("q\n0 0 100 100 re\nW\nn\n"));
    }

    #[test]
    fn test_draw_region_stretch() {
        let renderer = AppearanceRenderer::default();
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([0, 0, 0]));
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let data = ImageData::from_bytes(png.get_ref()).unwrap();

        let mut out = ContentStreamBuilder::new();
        renderer.draw_region(
            &mut out,
            Rect::new(10.0, 10.0, 60.0, 60.0),
            Some(("SealIm1", &data)),
            None,
            FitPolicy::Stretch,
        );
        let content = String::from_utf8(out.build()).unwrap();
        assert!(content.contains("60 0 0 60 10 10 cm"));
    }
}
