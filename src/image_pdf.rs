use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagePdfError {
    #[error("no valid images to convert")]
    NoImages,
    #[error("invalid image file '{name}': {reason}")]
    BadImage { name: String, reason: String },
    #[error("failed to build pdf: {0}")]
    Build(#[from] lopdf::Error),
    #[error("failed to write pdf: {0}")]
    Write(#[from] std::io::Error),
}

pub struct SourceImage {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ImagePdf {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// `<stem>.pdf` for one image, `images.pdf` for several.
pub fn output_name(names: &[String]) -> String {
    match names {
        [one] => {
            let stem = match one.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => one.as_str(),
            };
            if stem.trim().is_empty() {
                "image.pdf".to_string()
            } else {
                format!("{}.pdf", stem)
            }
        }
        _ => "images.pdf".to_string(),
    }
}

fn add_page(doc: &mut Document, pages_id: ObjectId, image: image::RgbImage) -> Result<ObjectId, ImagePdfError> {
    let (w, h) = image.dimensions();
    let (w, h) = (w as i64, h as i64);
    let mut pixels = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w,
            "Height" => h,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8_i64,
        },
        image.into_raw(),
    );
    pixels.compress()?;
    let image_id = doc.add_object(pixels);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                [w, 0, 0, h, 0, 0].into_iter().map(Object::Integer).collect(),
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => [0, 0, w, h].into_iter().map(Object::Integer).collect::<Vec<_>>(),
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    }))
}

/// One page per image, in order, sized to the image at 72 dpi. Empty
/// inputs are skipped; anything else that fails to decode is an error.
pub fn images_to_pdf(images: &[SourceImage]) -> Result<ImagePdf, ImagePdfError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for src in images {
        if src.bytes.is_empty() {
            continue;
        }
        let decoded = image::load_from_memory(&src.bytes).map_err(|e| ImagePdfError::BadImage {
            name: src.name.clone(),
            reason: e.to_string(),
        })?;
        let page_id = add_page(&mut doc, pages_id, decoded.to_rgb8())?;
        kids.push(page_id.into());
    }
    if kids.is_empty() {
        return Err(ImagePdfError::NoImages);
    }

    let pages = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(ImagePdf { bytes, pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([200, 30, 30, 128]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode png");
        out
    }

    fn source(name: &str, bytes: Vec<u8>) -> SourceImage {
        SourceImage {
            name: name.to_string(),
            bytes,
        }
    }

    #[test]
    fn pages_follow_input_order_and_size() {
        let pdf = images_to_pdf(&[source("a.png", png(40, 20)), source("b.png", png(10, 30))])
            .expect("pdf");
        assert_eq!(pdf.pages, 2);
        assert!(pdf.bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&pdf.bytes).expect("reload");
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let boxes: Vec<Vec<i64>> = pages
            .values()
            .map(|id| {
                let page = doc.get_dictionary(*id).expect("page");
                page.get(b"MediaBox")
                    .and_then(|b| b.as_array())
                    .expect("media box")
                    .iter()
                    .map(|v| v.as_i64().expect("int"))
                    .collect()
            })
            .collect();
        assert_eq!(boxes, vec![vec![0, 0, 40, 20], vec![0, 0, 10, 30]]);
    }

    #[test]
    fn empty_files_are_skipped_and_garbage_is_named() {
        let pdf = images_to_pdf(&[source("blank.png", Vec::new()), source("ok.png", png(2, 2))])
            .expect("pdf");
        assert_eq!(pdf.pages, 1);

        match images_to_pdf(&[source("notes.txt", b"not an image".to_vec())]) {
            Err(ImagePdfError::BadImage { name, .. }) => assert_eq!(name, "notes.txt"),
            other => panic!("unexpected {:?}", other.map(|p| p.pages)),
        }
        assert!(matches!(
            images_to_pdf(&[source("blank.png", Vec::new())]),
            Err(ImagePdfError::NoImages)
        ));
    }

    #[test]
    fn output_names() {
        assert_eq!(output_name(&["scan.page1.jpg".to_string()]), "scan.page1.pdf");
        assert_eq!(output_name(&["README".to_string()]), "README.pdf");
        assert_eq!(output_name(&["a.png".to_string(), "b.png".to_string()]), "images.pdf");
    }
}
