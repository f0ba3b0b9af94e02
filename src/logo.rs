use anyhow::{anyhow, Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, RgbaImage};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Write};

/// How the logo's colour channels are stored in the output PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Quality {
    #[default]
    Lossless,
    Jpeg(u8),
}

pub fn parse_quality(s: &str) -> Result<Quality> {
    if s == "lossless" {
        Ok(Quality::Lossless)
    } else {
        let q: u8 = s
            .parse()
            .map_err(|_| anyhow!("quality must be 'lossless' or a number 1-100"))?;
        if !(1..=100).contains(&q) {
            return Err(anyhow!("quality must be between 1 and 100"));
        }
        Ok(Quality::Jpeg(q))
    }
}

impl TryFrom<String> for Quality {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        parse_quality(&s)
    }
}

impl From<Quality> for String {
    fn from(q: Quality) -> String {
        q.to_string()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Lossless => f.write_str("lossless"),
            Quality::Jpeg(q) => write!(f, "{}", q),
        }
    }
}

/// A decoded logo, kept at its natural pixel size.
#[derive(Debug, Clone)]
pub struct LogoImage {
    image: RgbaImage,
}

/// A logo already written into a document as an image XObject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedLogo {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

impl LogoImage {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let image = image::load(Cursor::new(data), image::ImageFormat::Png)
            .or_else(|_| image::load(Cursor::new(data), image::ImageFormat::Jpeg))
            .or_else(|_| image::load_from_memory(data))
            .context("logo is not a readable PNG or JPEG image")?
            .into_rgba8();
        Self::from_rgba(image)
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("could not read logo {}", path.display()))?;
        Self::from_bytes(&data)
    }

    pub fn from_rgba(image: RgbaImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("logo image is empty"));
        }
        Ok(LogoImage { image })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn has_transparency(&self) -> bool {
        self.image.pixels().any(|p| p[3] < 255)
    }

    /// Writes the logo (and its soft mask, when it has transparency) into `doc`.
    pub fn embed(&self, doc: &mut Document, quality: Quality) -> Result<EmbeddedLogo> {
        let mut stream = self.encode_color(quality)?;
        if let Some(mask) = self.encode_alpha()? {
            let mask_id = doc.add_object(mask);
            stream.dict.set("SMask", Object::Reference(mask_id));
        }
        let (width, height) = self.dimensions();
        let id = doc.add_object(stream);
        Ok(EmbeddedLogo { id, width, height })
    }

    fn encode_color(&self, quality: Quality) -> Result<Stream> {
        let rgb = DynamicImage::ImageRgba8(self.image.clone()).into_rgb8();
        let (w, h) = rgb.dimensions();

        match quality {
            Quality::Lossless => {
                let compressed = deflate(rgb.as_raw())?;
                let dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => w as i64,
                    "Height" => h as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8_i64,
                    "Filter" => "FlateDecode",
                };
                Ok(Stream::new(dict, compressed))
            }
            Quality::Jpeg(q) => {
                let mut buf: Vec<u8> = Vec::new();
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, q);
                DynamicImage::ImageRgb8(rgb).write_with_encoder(encoder)?;

                let dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => w as i64,
                    "Height" => h as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8_i64,
                    "Filter" => "DCTDecode",
                };
                Ok(Stream::new(dict, buf))
            }
        }
    }

    fn encode_alpha(&self) -> Result<Option<Stream>> {
        if !self.has_transparency() {
            return Ok(None);
        }
        let (w, h) = self.dimensions();
        let alpha: Vec<u8> = self.image.pixels().map(|p| p[3]).collect();
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => w as i64,
            "Height" => h as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8_i64,
            "Filter" => "FlateDecode",
        };
        Ok(Some(Stream::new(dict, deflate(&alpha)?)))
    }
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;

    #[test]
    fn quality_parsing() {
        assert_eq!(parse_quality("lossless").unwrap(), Quality::Lossless);
        assert_eq!(parse_quality("85").unwrap(), Quality::Jpeg(85));
        assert!(parse_quality("0").is_err());
        assert!(parse_quality("best").is_err());
    }

    #[test]
    fn opaque_logo_has_no_soft_mask() {
        let logo = LogoImage::from_bytes(&png_bytes(4, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!(logo.dimensions(), (4, 2));
        let mut doc = Document::with_version("1.5");
        let embedded = logo.embed(&mut doc, Quality::Lossless).unwrap();
        let stream = doc.get_object(embedded.id).unwrap().as_stream().unwrap();
        assert!(stream.dict.get(b"SMask").is_err());
        assert_eq!(stream.dict.get(b"Width").unwrap().as_i64().unwrap(), 4);
        assert_eq!(doc.objects.len(), 1);
    }

    #[test]
    fn transparent_logo_gets_soft_mask() {
        let logo = LogoImage::from_bytes(&png_bytes(3, 3, [255, 0, 0, 128])).unwrap();
        let mut doc = Document::with_version("1.5");
        let embedded = logo.embed(&mut doc, Quality::Lossless).unwrap();
        let stream = doc.get_object(embedded.id).unwrap().as_stream().unwrap();
        let mask_id = stream.dict.get(b"SMask").unwrap().as_reference().unwrap();
        let mask = doc.get_object(mask_id).unwrap().as_stream().unwrap();
        assert_eq!(mask.dict.get(b"ColorSpace").unwrap().as_name_str().unwrap(), "DeviceGray");
    }

    #[test]
    fn jpeg_quality_uses_dct() {
        let logo = LogoImage::from_bytes(&png_bytes(16, 16, [0, 128, 255, 255])).unwrap();
        let mut doc = Document::with_version("1.5");
        let embedded = logo.embed(&mut doc, Quality::Jpeg(80)).unwrap();
        let stream = doc.get_object(embedded.id).unwrap().as_stream().unwrap();
        assert_eq!(stream.dict.get(b"Filter").unwrap().as_name_str().unwrap(), "DCTDecode");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(LogoImage::from_bytes(b"not an image at all").is_err());
    }
}
