//! PDF object-model transforms via lopdf: merge, split and image-to-PDF.
//!
//! ## Why materialise inherited attributes?
//!
//! `MediaBox`, `CropBox`, `Resources` and `Rotate` may live on an ancestor
//! `Pages` node instead of the page itself. Both merge and split replace the
//! page tree, so each page first gets its own copy of whatever it inherited;
//! otherwise pages would lose their size and fonts once re-parented.
//!
//! All lopdf work is CPU-bound and runs under `spawn_blocking`.

use crate::config::{PageRange, SplitMode};
use crate::error::ToolifyError;
use crate::workspace::Upload;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Depth limit when walking `Parent` links; guards against cyclic trees.
const MAX_TREE_DEPTH: usize = 64;

/// A4 in PostScript points.
pub const A4: (f32, f32) = (595.28, 841.89);

const IMAGE_PAGE_MARGIN: f32 = 20.0;
const IMAGE_JPEG_QUALITY: u8 = 80;

// ── Page tree helpers ────────────────────────────────────────────────────

/// Copy inherited page attributes onto every page of `doc`.
pub fn materialize_inherited(doc: &mut Document) {
    for page_id in doc.get_pages().into_values() {
        let mut found = Vec::new();
        for key in INHERITABLE {
            let has_own = doc
                .get_dictionary(page_id)
                .map(|d| d.has(key))
                .unwrap_or(true);
            if has_own {
                continue;
            }
            if let Some(value) = inherited_attribute(doc, page_id, key) {
                found.push((key, value));
            }
        }
        if found.is_empty() {
            continue;
        }
        if let Ok(dict) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            for (key, value) in found {
                dict.set(key.to_vec(), value);
            }
        }
    }
}

fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc
        .get_dictionary(page_id)
        .ok()?
        .get(b"Parent")
        .and_then(Object::as_reference)
        .ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(current).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok()?;
    }
    None
}

/// Make `page_ids` (in order) the document's only pages under a fresh
/// `Pages` node and `Catalog`. Objects no longer reachable are left for
/// [`Document::prune_objects`].
pub fn rebuild_page_tree(doc: &mut Document, page_ids: &[ObjectId]) {
    let pages_id = doc.new_object_id();
    for &id in page_ids {
        if let Ok(dict) = doc.get_object_mut(id).and_then(Object::as_dict_mut) {
            dict.set("Parent", pages_id);
        }
    }
    let kids: Vec<Object> = page_ids.iter().map(|&id| Object::Reference(id)).collect();
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_ids.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
}

/// Keys that point back up or across the page tree. Following them would
/// drag every page of the source into each extracted part.
const BACK_LINKS: [&[u8]; 2] = [b"Parent", b"P"];

fn push_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| push_references(o, out)),
        Object::Dictionary(dict) => push_dict_references(dict, out),
        Object::Stream(stream) => push_dict_references(&stream.dict, out),
        _ => {}
    }
}

fn push_dict_references(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if !BACK_LINKS.contains(&key.as_slice()) {
            push_references(value, out);
        }
    }
}

/// Objects reachable from `roots` without following [`BACK_LINKS`].
fn reachable(doc: &Document, roots: &[ObjectId]) -> BTreeSet<ObjectId> {
    let mut seen = BTreeSet::new();
    let mut pending = roots.to_vec();
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Ok(object) = doc.get_object(id) {
            push_references(object, &mut pending);
        }
    }
    seen
}

/// A new document holding only `page_ids` (in order) and what they use.
///
/// Object ids are kept, so references inside the copied objects stay valid.
pub fn extract_pages(source: &Document, page_ids: &[ObjectId]) -> Document {
    let mut doc = Document::with_version(source.version.clone());
    for id in reachable(source, page_ids) {
        if let Ok(object) = source.get_object(id) {
            doc.objects.insert(id, object.clone());
        }
    }
    doc.max_id = source.max_id;
    rebuild_page_tree(&mut doc, page_ids);
    doc
}

/// Prune, compress and write `doc` to `path`.
pub fn save_document(doc: &mut Document, path: &Path) -> Result<(), ToolifyError> {
    doc.prune_objects();
    doc.compress();
    doc.save(path)
        .map(|_| ())
        .map_err(|e| ToolifyError::io("write PDF", std::io::Error::other(e.to_string())))
}

/// Add a page object (not yet in any tree) and return its id.
pub fn add_page(
    doc: &mut Document,
    size: (f32, f32),
    content: Vec<u8>,
    resources: Dictionary,
) -> ObjectId {
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), Object::Real(size.0), Object::Real(size.1)],
        "Resources" => resources,
        "Contents" => content_id,
    })
}

fn has_pdf_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"%PDF")
        .unwrap_or(false)
}

fn load(path: &Path, name: &str) -> Result<Document, ToolifyError> {
    if !has_pdf_magic(path) {
        return Err(ToolifyError::InvalidPdf {
            name: name.to_string(),
            detail: "missing %PDF header".into(),
        });
    }
    let doc = Document::load(path).map_err(|e| ToolifyError::InvalidPdf {
        name: name.to_string(),
        detail: e.to_string(),
    })?;
    if doc.get_pages().is_empty() {
        return Err(ToolifyError::InvalidPdf {
            name: name.to_string(),
            detail: "document has no pages".into(),
        });
    }
    Ok(doc)
}

async fn blocking<T, F>(what: &str, f: F) -> Result<T, ToolifyError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ToolifyError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolifyError::Internal(format!("{what} task panicked: {e}")))?
}

// ── Merge ────────────────────────────────────────────────────────────────

/// What a merge actually used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub pages: usize,
    pub merged_files: usize,
    pub skipped: Vec<String>,
}

/// Concatenate the pages of `inputs`, in order, into `output`.
///
/// Inputs that fail to parse are skipped with a warning. Fails with
/// [`ToolifyError::NothingToMerge`] only when no page at all was copied.
pub async fn merge(inputs: &[Upload], output: &Path) -> Result<MergeReport, ToolifyError> {
    let inputs: Vec<(String, PathBuf)> = inputs
        .iter()
        .map(|u| (u.original_name.clone(), u.path.clone()))
        .collect();
    let output = output.to_path_buf();
    blocking("Merge", move || merge_blocking(&inputs, &output)).await
}

fn merge_blocking(inputs: &[(String, PathBuf)], output: &Path) -> Result<MergeReport, ToolifyError> {
    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut page_ids = Vec::new();
    let mut objects = BTreeMap::new();
    let mut skipped = Vec::new();

    for (name, path) in inputs {
        let mut doc = match load(path, name) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping '{}' in merge: {}", name, e);
                skipped.push(name.clone());
                continue;
            }
        };
        materialize_inherited(&mut doc);
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages = doc.get_pages();
        debug!("Merging '{}': {} pages", name, pages.len());
        page_ids.extend(pages.into_values());
        objects.extend(doc.objects);
    }

    if page_ids.is_empty() {
        return Err(ToolifyError::NothingToMerge);
    }

    merged.objects = objects;
    merged.max_id = next_id - 1;
    rebuild_page_tree(&mut merged, &page_ids);
    save_document(&mut merged, output)?;

    let report = MergeReport {
        pages: page_ids.len(),
        merged_files: inputs.len() - skipped.len(),
        skipped,
    };
    info!(
        "Merged {} files into {} pages ({} skipped)",
        report.merged_files,
        report.pages,
        report.skipped.len()
    );
    Ok(report)
}

// ── Split ────────────────────────────────────────────────────────────────

/// One output document of a split: its download name and 1-indexed pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPart {
    pub name: String,
    pub pages: Vec<u32>,
}

/// Turn a split mode into concrete outputs for a document of `total` pages.
///
/// Ranges outside `1..=total` or with `start > end` are dropped silently;
/// an empty result is [`ToolifyError::NoValidRanges`].
pub fn plan_split(mode: &SplitMode, total: u32) -> Result<Vec<SplitPart>, ToolifyError> {
    let parts: Vec<SplitPart> = match mode {
        SplitMode::All => (1..=total)
            .map(|page| SplitPart {
                name: format!("page-{page}.pdf"),
                pages: vec![page],
            })
            .collect(),
        SplitMode::Ranges(ranges) => ranges
            .iter()
            .filter(|r| {
                let ok = r.is_valid_for(total);
                if !ok {
                    debug!("Ignoring range {}-{} (document has {} pages)", r.start, r.end, total);
                }
                ok
            })
            .map(|r: &PageRange| SplitPart {
                name: r.file_name(),
                pages: r.pages().collect(),
            })
            .collect(),
    };
    if parts.is_empty() {
        return Err(ToolifyError::NoValidRanges { total });
    }
    Ok(parts)
}

/// A split output written to disk.
#[derive(Debug, Clone)]
pub struct SplitOutput {
    pub name: String,
    pub path: PathBuf,
}

/// Split `input` into the documents described by `mode`, written to `out_dir`.
pub async fn split(
    input: &Upload,
    mode: SplitMode,
    out_dir: &Path,
) -> Result<Vec<SplitOutput>, ToolifyError> {
    let name = input.original_name.clone();
    let path = input.path.clone();
    let out_dir = out_dir.to_path_buf();
    blocking("Split", move || split_blocking(&path, &name, &mode, &out_dir)).await
}

fn split_blocking(
    path: &Path,
    name: &str,
    mode: &SplitMode,
    out_dir: &Path,
) -> Result<Vec<SplitOutput>, ToolifyError> {
    let mut source = load(path, name)?;
    materialize_inherited(&mut source);
    let pages = source.get_pages();
    let parts = plan_split(mode, pages.len() as u32)?;
    info!("Splitting '{}' ({} pages) into {} parts", name, pages.len(), parts.len());

    let mut outputs = Vec::with_capacity(parts.len());
    for (idx, part) in parts.into_iter().enumerate() {
        let ids: Vec<ObjectId> = part
            .pages
            .iter()
            .filter_map(|n| pages.get(n).copied())
            .collect();
        let mut doc = extract_pages(&source, &ids);
        // Names can repeat ("1-2,1-2"); disk paths must not.
        let file = out_dir.join(format!("part-{idx}.pdf"));
        save_document(&mut doc, &file)?;
        outputs.push(SplitOutput {
            name: part.name,
            path: file,
        });
    }
    Ok(outputs)
}

// ── Images to PDF ────────────────────────────────────────────────────────

/// Place each image on its own A4 page, scaled to fit and centred.
pub async fn images_to_pdf(images: &[Upload], output: &Path) -> Result<usize, ToolifyError> {
    let inputs: Vec<(String, PathBuf)> = images
        .iter()
        .map(|u| (u.original_name.clone(), u.path.clone()))
        .collect();
    let output = output.to_path_buf();
    blocking("Image to PDF", move || images_to_pdf_blocking(&inputs, &output)).await
}

fn images_to_pdf_blocking(
    inputs: &[(String, PathBuf)],
    output: &Path,
) -> Result<usize, ToolifyError> {
    let mut doc = Document::with_version("1.5");
    let mut page_ids = Vec::with_capacity(inputs.len());

    for (name, path) in inputs {
        let img = super::imaging::decode(path, name)?;
        let (w, h) = (img.width(), img.height());
        let jpeg = encode_jpeg(&img, IMAGE_JPEG_QUALITY).map_err(|e| ToolifyError::InvalidImage {
            name: name.clone(),
            detail: e.to_string(),
        })?;

        let xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => w as i64,
                "Height" => h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = doc.add_object(xobject);

        let (x, y, dw, dh) = fit_centered((w as f32, h as f32), A4, IMAGE_PAGE_MARGIN);
        let content = format!("q\n{dw:.2} 0 0 {dh:.2} {x:.2} {y:.2} cm\n/Im0 Do\nQ\n");
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        page_ids.push(add_page(&mut doc, A4, content.into_bytes(), resources));
        debug!("Placed '{}' ({}x{}) at {:.0}x{:.0} pt", name, w, h, dw, dh);
    }

    rebuild_page_tree(&mut doc, &page_ids);
    save_document(&mut doc, output)?;
    Ok(page_ids.len())
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf)
}

/// Scale `image` to the largest size that fits `page` inside `margin`,
/// centred; returns `(x, y, width, height)` in points.
fn fit_centered(image: (f32, f32), page: (f32, f32), margin: f32) -> (f32, f32, f32, f32) {
    let avail_w = page.0 - 2.0 * margin;
    let avail_h = page.1 - 2.0 * margin;
    let scale = (avail_w / image.0).min(avail_h / image.1);
    let (w, h) = (image.0 * scale, image.1 * scale);
    ((page.0 - w) / 2.0, (page.1 - h) / 2.0, w, h)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::PageRange;

    /// A PDF whose page `i` (1-indexed) has MediaBox width `100 * i`, with the
    /// MediaBox inherited from the root `Pages` node for page 1.
    pub(crate) fn sample_pdf(pages: u32) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut kids = Vec::new();
        for i in 1..=pages {
            let content = format!("BT /F1 24 Tf 20 20 Td (Page {i}) Tj ET").into_bytes();
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if i > 1 {
                page.set(
                    "MediaBox",
                    vec![0.into(), 0.into(), (100 * i as i64).into(), 500.into()],
                );
            }
            kids.push(Object::Reference(doc.add_object(page)));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 100.into(), 500.into()],
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    pub(crate) fn write_sample_pdf(dir: &Path, name: &str, pages: u32) -> Upload {
        let path = dir.join(name);
        sample_pdf(pages).save(&path).unwrap();
        Upload {
            storage_name: name.to_string(),
            original_name: name.to_string(),
            content_type: "application/pdf".into(),
            size: std::fs::metadata(&path).unwrap().len(),
            path,
        }
    }

    pub(crate) fn page_widths(path: &Path) -> Vec<i64> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| {
                let page = doc.get_dictionary(id).unwrap();
                let mbox = page.get(b"MediaBox").unwrap().as_array().unwrap();
                match &mbox[2] {
                    Object::Integer(n) => *n,
                    Object::Real(r) => *r as i64,
                    other => panic!("unexpected MediaBox entry {other:?}"),
                }
            })
            .collect()
    }

    #[test]
    fn plan_split_all_and_ranges() {
        let parts = plan_split(&SplitMode::All, 3).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].name, "page-3.pdf");
        assert_eq!(parts[2].pages, vec![3]);

        let ranges = PageRange::parse_list("1-2,4").unwrap();
        let parts = plan_split(&SplitMode::Ranges(ranges), 4).unwrap();
        assert_eq!(parts.iter().map(|p| p.pages.clone()).collect::<Vec<_>>(), vec![vec![1, 2], vec![4]]);

        let ranges = PageRange::parse_list("1-2,9").unwrap();
        let parts = plan_split(&SplitMode::Ranges(ranges), 4).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "pages-1-2.pdf");

        let ranges = PageRange::parse_list("5-9,3-1").unwrap();
        assert!(matches!(
            plan_split(&SplitMode::Ranges(ranges), 4),
            Err(ToolifyError::NoValidRanges { total: 4 })
        ));
    }

    #[test]
    fn fit_keeps_aspect_ratio_and_centres() {
        let (x, y, w, h) = fit_centered((1000.0, 500.0), (600.0, 800.0), 20.0);
        assert!((w - 560.0).abs() < 0.01);
        assert!((h - 280.0).abs() < 0.01);
        assert!((x - 20.0).abs() < 0.01);
        assert!((y - 260.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn merge_concatenates_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_sample_pdf(dir.path(), "a.pdf", 2);
        let b = write_sample_pdf(dir.path(), "b.pdf", 3);
        let out = dir.path().join("merged.pdf");

        let report = merge(&[a, b], &out).await.unwrap();
        assert_eq!(report.pages, 5);
        assert_eq!(page_widths(&out), vec![100, 200, 100, 200, 300]);
    }

    #[tokio::test]
    async fn merge_skips_garbage_and_fails_when_nothing_left() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_sample_pdf(dir.path(), "good.pdf", 2);
        let junk_path = dir.path().join("junk.pdf");
        std::fs::write(&junk_path, b"this is not a pdf").unwrap();
        let junk = Upload {
            original_name: "junk.pdf".into(),
            path: junk_path,
            ..good.clone()
        };
        let out = dir.path().join("merged.pdf");

        let report = merge(&[junk.clone(), good], &out).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.skipped, vec!["junk.pdf".to_string()]);

        let err = merge(&[junk.clone(), junk], &out).await.unwrap_err();
        assert!(matches!(err, ToolifyError::NothingToMerge));
    }

    #[tokio::test]
    async fn split_all_preserves_page_identity() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_sample_pdf(dir.path(), "src.pdf", 3);
        let outputs = split(&src, SplitMode::All, dir.path()).await.unwrap();
        assert_eq!(outputs.len(), 3);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.name, format!("page-{}.pdf", i + 1));
            assert_eq!(page_widths(&out.path), vec![100 * (i as i64 + 1)]);
        }
    }

    #[test]
    fn extracted_pages_carry_only_their_own_objects() {
        let mut source = sample_pdf(3);
        materialize_inherited(&mut source);
        let pages = source.get_pages();

        let part = extract_pages(&source, &[pages[&2]]);
        assert_eq!(part.get_pages().len(), 1);
        let contents: Vec<Vec<u8>> = part
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .map(|s| s.content.clone())
            .collect();
        assert_eq!(contents, vec![b"BT /F1 24 Tf 20 20 Td (Page 2) Tj ET".to_vec()]);
        // The page, its content stream, the shared font, and the new Pages and Catalog.
        assert_eq!(part.objects.len(), 5);

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("p2.pdf");
        let mut part = part;
        save_document(&mut part, &out).unwrap();
        assert_eq!(page_widths(&out), vec![200]);
    }

    #[tokio::test]
    async fn images_become_a4_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut uploads = Vec::new();
        for (i, (w, h)) in [(40u32, 20u32), (10, 30)].into_iter().enumerate() {
            let path = dir.path().join(format!("img{i}.png"));
            image::RgbaImage::from_pixel(w, h, image::Rgba([200, 10, 10, 128]))
                .save(&path)
                .unwrap();
            uploads.push(Upload {
                storage_name: format!("img{i}.png"),
                original_name: format!("img{i}.png"),
                content_type: "image/png".into(),
                size: 0,
                path,
            });
        }
        let out = dir.path().join("converted.pdf");
        assert_eq!(images_to_pdf(&uploads, &out).await.unwrap(), 2);
        assert_eq!(page_widths(&out), vec![595, 595]);
    }
}
