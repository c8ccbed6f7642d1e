//! PDF document model: open, count, normalise, build from an image, append.
//!
//! Everything here is synchronous and CPU-bound; async callers go through
//! `tokio::task::spawn_blocking`.
//!
//! ## Appending pages
//!
//! [`PdfAssembler`] renumbers each source document into a fresh id range,
//! copies every non-structural object, and re-parents the source pages under
//! one page tree. Attributes a page inherits from its old `Pages` ancestors
//! (`Resources`, `MediaBox`, `CropBox`, `Rotate`) are copied onto the page
//! first, because those ancestors are not carried over. Kids are recorded in
//! page order as they are appended, so the output order never depends on
//! object numbering.

use crate::error::PdfError;
use image::{DynamicImage, GenericImageView};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// A4 portrait, in points.
const A4: (f32, f32) = (595.0, 842.0);

/// Margin around embedded images, in points.
const IMAGE_MARGIN: f32 = 36.0;

/// Page attributes resolved through the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Bound on `Parent` hops, guarding against cyclic page trees.
const MAX_TREE_DEPTH: usize = 64;

/// Open PDF bytes, rejecting encrypted or page-less documents.
pub fn open(bytes: &[u8]) -> Result<Document, PdfError> {
    let doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        return Err(PdfError::Encrypted);
    }
    if doc.get_pages().is_empty() {
        return Err(PdfError::Empty);
    }
    Ok(doc)
}

/// Number of pages in a PDF.
pub fn page_count(bytes: &[u8]) -> Result<usize, PdfError> {
    Ok(open(bytes)?.get_pages().len())
}

/// Load and re-save a PDF in canonical form (renumbered, compressed).
pub fn normalize(bytes: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut doc = open(bytes)?;
    doc.renumber_objects();
    doc.compress();
    save(&mut doc)
}

/// Decode an image file and place it on a single page.
///
/// The format is sniffed from the content; the extension is only a hint.
pub fn image_file_to_pdf(path: &Path) -> Result<Vec<u8>, PdfError> {
    let img = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(image::ImageError::IoError)?
        .decode()?;
    image_to_pdf(&img)
}

/// Place an image on a single A4 page (landscape for wide images), scaled
/// down to fit inside the margins and centred. Alpha is flattened onto white.
pub fn image_to_pdf(img: &DynamicImage) -> Result<Vec<u8>, PdfError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PdfError::Empty);
    }

    let (page_w, page_h) = if width > height { (A4.1, A4.0) } else { A4 };
    let avail_w = page_w - 2.0 * IMAGE_MARGIN;
    let avail_h = page_h - 2.0 * IMAGE_MARGIN;
    let scale = (avail_w / width as f32).min(avail_h / height as f32).min(1.0);
    let draw_w = width as f32 * scale;
    let draw_h = height as f32 * scale;
    let x = (page_w - draw_w) / 2.0;
    let y = (page_h - draw_h) / 2.0;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_id = doc.add_object(Stream::new(
        Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(i64::from(width))),
            ("Height", Object::Integer(i64::from(height))),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
        ]),
        flatten_rgb(img),
    ));

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(draw_w),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(draw_h),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| PdfError::Save(format!("content stream: {e}")))?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content_bytes));

    let resources = Dictionary::from_iter([(
        "XObject",
        Object::Dictionary(Dictionary::from_iter([("Im0", Object::Reference(image_id))])),
    )]);

    let page_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Page".to_vec())),
        ("Parent", Object::Reference(pages_id)),
        ("Contents", Object::Reference(content_id)),
        ("Resources", Object::Dictionary(resources)),
        (
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_w),
                Object::Real(page_h),
            ]),
        ),
    ]));

    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(vec![Object::Reference(page_id)])),
            ("Count", Object::Integer(1)),
        ])),
    );

    let catalog_id = doc.add_object(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.compress();
    save(&mut doc)
}

/// RGB8 samples with any alpha channel composited onto white.
fn flatten_rgb(img: &DynamicImage) -> Vec<u8> {
    if !img.color().has_alpha() {
        return img.to_rgb8().into_raw();
    }
    let rgba = img.to_rgba8();
    let mut out = Vec::with_capacity(rgba.as_raw().len() / 4 * 3);
    for px in rgba.pixels() {
        let [r, g, b, a] = px.0;
        let a = u16::from(a);
        for c in [r, g, b] {
            out.push(((u16::from(c) * a + 255 * (255 - a)) / 255) as u8);
        }
    }
    out
}

fn save(doc: &mut Document) -> Result<Vec<u8>, PdfError> {
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| PdfError::Save(e.to_string()))?;
    Ok(out)
}

/// Accumulates pages from several documents into one.
pub struct PdfAssembler {
    document: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    next_id: u32,
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfAssembler {
    pub fn new() -> Self {
        Self {
            document: Document::with_version("1.5"),
            pages_id: (1, 0),
            kids: Vec::new(),
            next_id: 2,
        }
    }

    /// Pages appended so far.
    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Open `bytes` and append all of its pages at the current end.
    ///
    /// Returns the number of pages appended. On error nothing is appended.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<usize, PdfError> {
        let source = open(bytes)?;
        Ok(self.append(source))
    }

    /// Append every page of `source`, in its page order.
    pub fn append(&mut self, mut source: Document) -> usize {
        source.renumber_objects_with(self.next_id);
        self.next_id = source.max_id + 1;

        let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
        for &page_id in source.get_pages().values() {
            let Ok(dict) = source.get_object(page_id).and_then(Object::as_dict) else {
                continue;
            };
            let mut dict = dict.clone();
            for key in INHERITABLE {
                if !dict.has(key) {
                    if let Some(value) = inherited_attribute(&source, &dict, key) {
                        dict.set(key.to_vec(), value);
                    }
                }
            }
            pages.push((page_id, dict));
        }

        for (object_id, object) in source.objects {
            match object.type_name().unwrap_or(b"") {
                b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline" => {}
                _ => {
                    self.document.objects.insert(object_id, object);
                }
            }
        }

        let appended = pages.len();
        for (page_id, mut dict) in pages {
            dict.set("Parent", Object::Reference(self.pages_id));
            self.document
                .objects
                .insert(page_id, Object::Dictionary(dict));
            self.kids.push(page_id);
        }
        appended
    }

    /// Build the page tree and serialise the accumulated document.
    pub fn finish(mut self) -> Result<Vec<u8>, PdfError> {
        if self.kids.is_empty() {
            return Err(PdfError::Empty);
        }

        let count = self.kids.len() as i64;
        let kids = self.kids.iter().map(|&id| Object::Reference(id)).collect();
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(count)),
            ])),
        );

        let catalog_id = (self.next_id, 0);
        self.document.objects.insert(
            catalog_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Catalog".to_vec())),
                ("Pages", Object::Reference(self.pages_id)),
            ])),
        );
        self.document.trailer.set("Root", Object::Reference(catalog_id));
        self.document.max_id = self.next_id;

        self.document.renumber_objects();
        self.document.compress();
        save(&mut self.document)
    }
}

/// Walk `Parent` links looking for an inheritable attribute.
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(id) = parent {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return None;
        }
        let node = doc.get_object(id).and_then(Object::as_dict).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{Dictionary, Document, Object, Stream};

    /// A PDF whose pages have the given widths; height inherited from the tree.
    pub fn pdf_with_widths(widths: &[i64]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for &w in widths {
            let content_id = doc.add_object(Stream::new(Dictionary::new(), b"".to_vec()));
            let page_id = doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content_id)),
                (
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), Object::Integer(w), 792.into()]),
                ),
            ]));
            kids.push(Object::Reference(page_id));
        }
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(count)),
                ("Resources", Object::Dictionary(Dictionary::new())),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    pub fn page_widths(bytes: &[u8]) -> Vec<i64> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| {
                let page = doc.get_object(id).unwrap().as_dict().unwrap();
                let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
                mb[2].as_i64().unwrap()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{page_widths, pdf_with_widths};
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn page_count_of_multi_page_document() {
        assert_eq!(page_count(&pdf_with_widths(&[100, 200, 300])).unwrap(), 3);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(page_count(b"not a pdf"), Err(PdfError::Load(_))));
    }

    #[test]
    fn normalize_preserves_page_count() {
        let original = pdf_with_widths(&[100, 200]);
        let normalized = normalize(&original).unwrap();
        assert_eq!(page_count(&normalized).unwrap(), 2);
        assert_eq!(page_widths(&normalized), vec![100, 200]);
    }

    #[test]
    fn assembler_preserves_document_and_page_order() {
        let mut asm = PdfAssembler::new();
        assert_eq!(asm.append_bytes(&pdf_with_widths(&[100, 110])).unwrap(), 2);
        assert_eq!(asm.append_bytes(&pdf_with_widths(&[200])).unwrap(), 1);
        assert_eq!(asm.append_bytes(&pdf_with_widths(&[300, 310, 320])).unwrap(), 3);
        assert_eq!(asm.page_count(), 6);

        let merged = asm.finish().unwrap();
        assert_eq!(page_widths(&merged), vec![100, 110, 200, 300, 310, 320]);
    }

    #[test]
    fn assembler_copies_inherited_resources_onto_pages() {
        let mut asm = PdfAssembler::new();
        asm.append_bytes(&pdf_with_widths(&[100])).unwrap();
        let merged = asm.finish().unwrap();
        let doc = Document::load_mem(&merged).unwrap();
        let (_, &id) = doc.get_pages().iter().next().unwrap();
        let page = doc.get_object(id).unwrap().as_dict().unwrap();
        assert!(page.has(b"Resources"));
    }

    #[test]
    fn failed_append_leaves_assembler_untouched() {
        let mut asm = PdfAssembler::new();
        asm.append_bytes(&pdf_with_widths(&[100])).unwrap();
        assert!(asm.append_bytes(b"%PDF-1.5 truncated").is_err());
        assert_eq!(asm.page_count(), 1);
        assert_eq!(page_count(&asm.finish().unwrap()).unwrap(), 1);
    }

    #[test]
    fn empty_assembler_cannot_finish() {
        assert!(matches!(PdfAssembler::new().finish(), Err(PdfError::Empty)));
    }

    #[test]
    fn image_becomes_one_page() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([255, 0, 0, 128])));
        let pdf = image_to_pdf(&img).unwrap();
        assert_eq!(page_count(&pdf).unwrap(), 1);
    }

    #[test]
    fn wide_images_get_landscape_pages() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255])));
        let pdf = image_to_pdf(&img).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        let (_, &id) = doc.get_pages().iter().next().unwrap();
        let page = doc.get_object(id).unwrap().as_dict().unwrap();
        let mb = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(mb[2].as_float().unwrap(), 842.0);
    }

    #[test]
    fn alpha_is_flattened_onto_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
        assert_eq!(flatten_rgb(&img), vec![255, 255, 255]);
    }
}
