//! In-memory fixtures shared by the unit tests.

use image::{ImageFormat, Rgba, RgbaImage};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::io::Cursor;

#[derive(Default)]
pub struct PdfBuilder {
    pages: Vec<(f64, f64, String, Dictionary)>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, width: f64, height: f64, content: &str) -> Self {
        self.pages
            .push((width, height, content.to_string(), Dictionary::new()));
        self
    }

    pub fn page_with_xobjects(self, width: f64, height: f64, content: &str, xobjects: Dictionary) -> Self {
        self.page_with_resources(width, height, content, dictionary! { "XObject" => xobjects })
    }

    /// Resources by category (`XObject`, `Shading`, `Pattern`, ...); every
    /// entry is written as an indirect object.
    pub fn page_with_resources(mut self, width: f64, height: f64, content: &str, resources: Dictionary) -> Self {
        self.pages.push((width, height, content.to_string(), resources));
        self
    }

    pub fn build(self) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids: Vec<Object> = Vec::new();

        for (w, h, content, categories) in self.pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let mut resources = Dictionary::new();
            for (category, entries) in categories.iter() {
                let Ok(entries) = entries.as_dict() else {
                    continue;
                };
                let mut resolved = Dictionary::new();
                for (name, obj) in entries.iter() {
                    let id = doc.add_object(obj.clone());
                    resolved.set(name.clone(), Object::Reference(id));
                }
                resources.set(category.clone(), Object::Dictionary(resolved));
            }
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    pub fn build_bytes(self) -> Vec<u8> {
        let mut doc = self.build();
        let mut buf = Vec::new();
        doc.save_to(&mut buf).expect("save test pdf");
        buf
    }
}

/// Uncompressed DeviceRGB image XObject, rows top to bottom.
pub fn rgb_image_xobject(width: u32, height: u32, pixels: &[[u8; 3]]) -> Object {
    let data: Vec<u8> = pixels.iter().flatten().copied().collect();
    Object::Stream(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        data,
    ))
}

pub fn png_bytes(width: u32, height: u32, fill: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(fill));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("encode png");
    buf.into_inner()
}
