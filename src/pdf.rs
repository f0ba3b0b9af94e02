use anyhow::{anyhow, Context, Result};
use flate2::read::ZlibDecoder;
use image::RgbImage;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::{Cursor, Read};

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Matrix { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Matrix::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Matrix::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Counter-clockwise rotation.
    pub fn rotate_degrees(deg: f64) -> Self {
        let (sin, cos) = deg.to_radians().sin_cos();
        Matrix::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// `self` applied first, then `rhs`.
    pub fn then(self, rhs: Matrix) -> Matrix {
        Matrix {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }

    pub fn from_object(obj: &Object) -> Option<Matrix> {
        let nums = number_array(obj)?;
        match nums[..] {
            [a, b, c, d, e, f] => Some(Matrix::new(a, b, c, d, e, f)),
            _ => None,
        }
    }

    /// Operands for a `cm` operator.
    pub fn to_operand_string(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            fmt_num(self.a),
            fmt_num(self.b),
            fmt_num(self.c),
            fmt_num(self.d),
            fmt_num(self.e),
            fmt_num(self.f)
        )
    }
}

/// Compact number formatting for content streams.
pub fn fmt_num(v: f64) -> String {
    let v = if v.abs() < 1e-9 { 0.0 } else { v };
    let s = format!("{:.4}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Page box in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl PageBox {
    pub const LETTER: PageBox = PageBox {
        x0: 0.0,
        y0: 0.0,
        x1: 612.0,
        y1: 792.0,
    };

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Object id of a 0-indexed page.
pub fn page_id(doc: &Document, index: usize) -> Result<ObjectId> {
    let pages = doc.get_pages();
    pages
        .get(&(index as u32 + 1))
        .copied()
        .ok_or_else(|| anyhow!("page index {} out of range (document has {} pages)", index, pages.len()))
}

pub fn page_count(doc: &Document) -> usize {
    doc.get_pages().len()
}

/// Looks up a page attribute, following the `/Parent` chain for inheritable keys.
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Result<Option<&'a Object>> {
    let mut current = page_id;
    for _ in 0..32 {
        let dict = doc
            .get_object(current)?
            .as_dict()
            .map_err(|_| anyhow!("page node {:?} is not a dictionary", current))?;
        if let Ok(value) = dict.get(key) {
            return Ok(Some(resolve(doc, value)?));
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => break,
        }
    }
    Ok(None)
}

pub fn page_box(doc: &Document, page_id: ObjectId) -> Result<PageBox> {
    let media_box = match inherited(doc, page_id, b"MediaBox")? {
        Some(obj) => obj,
        None => {
            log::warn!("page {:?} has no MediaBox, assuming US Letter", page_id);
            return Ok(PageBox::LETTER);
        }
    };
    let nums = number_array(media_box).ok_or_else(|| anyhow!("MediaBox is not a number array"))?;
    match nums[..] {
        [ax, ay, bx, by] => Ok(PageBox {
            x0: ax.min(bx),
            y0: ay.min(by),
            x1: ax.max(bx),
            y1: ay.max(by),
        }),
        _ => Err(anyhow!("MediaBox must have four entries, found {}", nums.len())),
    }
}

/// Effective resources of a page, owned so the caller may modify and write them back.
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    match inherited(doc, page_id, b"Resources")? {
        Some(obj) => as_dict(obj).cloned(),
        None => Ok(Dictionary::new()),
    }
}

pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object> {
    match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| anyhow!("reference {:?} not found: {}", id, e)),
        other => Ok(other),
    }
}

pub fn as_dict(obj: &Object) -> Result<&Dictionary> {
    match obj {
        Object::Dictionary(d) => Ok(d),
        Object::Stream(s) => Ok(&s.dict),
        other => Err(anyhow!("expected a dictionary, found {}", kind(other))),
    }
}

pub fn resolve_to_dict(doc: &Document, obj: &Object) -> Result<Dictionary> {
    as_dict(resolve(doc, obj)?).cloned()
}

fn kind(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "boolean",
        Object::Integer(_) => "integer",
        Object::Real(_) => "real",
        Object::Name(_) => "name",
        Object::String(..) => "string",
        Object::Array(_) => "array",
        Object::Dictionary(_) => "dictionary",
        Object::Stream(_) => "stream",
        Object::Reference(_) => "reference",
    }
}

pub fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

pub fn number_array(obj: &Object) -> Option<Vec<f64>> {
    match obj {
        Object::Array(items) => items.iter().map(obj_to_f64).collect(),
        _ => None,
    }
}

pub fn is_name(dict: &Dictionary, key: &[u8], expected: &str) -> bool {
    dict.get(key)
        .ok()
        .and_then(|v| v.as_name_str().ok())
        .map(|s| s == expected)
        .unwrap_or(false)
}

fn get_uint(dict: &Dictionary, key: &[u8]) -> Result<u32> {
    let val = dict.get(key)?;
    val.as_i64()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| anyhow!("expected a non-negative integer for /{}", String::from_utf8_lossy(key)))
}

/// Number of colour components of an image colour space.
pub fn color_components(doc: &Document, color_space: Option<&Object>) -> Result<u32> {
    let cs = match color_space {
        Some(obj) => resolve(doc, obj)?,
        None => return Err(anyhow!("image has no ColorSpace")),
    };
    match cs {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Ok(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Ok(3),
            b"DeviceCMYK" | b"CMYK" => Ok(4),
            other => Err(anyhow!("unsupported colour space {}", String::from_utf8_lossy(other))),
        },
        Object::Array(items) => {
            let family = items.first().and_then(|o| o.as_name_str().ok()).unwrap_or("");
            match family {
                "ICCBased" => {
                    let profile = items
                        .get(1)
                        .ok_or_else(|| anyhow!("ICCBased colour space without a profile"))?;
                    let dict = resolve_to_dict(doc, profile)?;
                    get_uint(&dict, b"N")
                }
                "CalGray" => Ok(1),
                "CalRGB" => Ok(3),
                other => Err(anyhow!("unsupported colour space {}", other)),
            }
        }
        other => Err(anyhow!("invalid ColorSpace {}", kind(other))),
    }
}

fn filter_name(doc: &Document, dict: &Dictionary) -> Result<String> {
    let filter = match dict.get(b"Filter") {
        Ok(f) => resolve(doc, f)?,
        Err(_) => return Ok(String::new()),
    };
    match filter {
        Object::Name(n) => Ok(String::from_utf8_lossy(n).into_owned()),
        Object::Array(items) if items.is_empty() => Ok(String::new()),
        Object::Array(items) if items.len() == 1 => Ok(items[0].as_name_str().unwrap_or("").to_string()),
        Object::Array(_) => Err(anyhow!("chained image filters are not supported")),
        other => Err(anyhow!("invalid Filter {}", kind(other))),
    }
}

/// Decodes an image XObject into RGB pixels.
pub fn decode_image(doc: &Document, stream: &Stream) -> Result<RgbImage> {
    let dict = &stream.dict;
    if dict.get(b"ImageMask").and_then(|m| m.as_bool()).unwrap_or(false) {
        return Err(anyhow!("stencil masks are not decoded"));
    }
    let w = get_uint(dict, b"Width")?;
    let h = get_uint(dict, b"Height")?;
    let filter = filter_name(doc, dict)?;

    if filter == "DCTDecode" {
        let img = image::load(Cursor::new(&stream.content), image::ImageFormat::Jpeg)
            .context("could not decode DCT image")?;
        return Ok(img.to_rgb8());
    }

    let bpc = dict.get(b"BitsPerComponent").ok().and_then(|b| b.as_i64().ok()).unwrap_or(8);
    if bpc != 8 {
        return Err(anyhow!("{} bits per component is not supported", bpc));
    }
    let components = color_components(doc, dict.get(b"ColorSpace").ok())?;
    let too_large = || anyhow!("image of {}x{} pixels is too large to decode", w, h);
    let expected_raw = (w as usize)
        .checked_mul(h as usize)
        .and_then(|n| n.checked_mul(components as usize))
        .ok_or_else(too_large)?;
    let expected_png = (w as usize)
        .checked_mul(components as usize)
        .and_then(|n| n.checked_add(1))
        .and_then(|n| n.checked_mul(h as usize))
        .ok_or_else(too_large)?;

    let data = match filter.as_str() {
        "FlateDecode" => {
            let mut decoder = ZlibDecoder::new(&stream.content[..]);
            let mut data = Vec::new();
            decoder
                .read_to_end(&mut data)
                .context("could not inflate FlateDecode image")?;
            data
        }
        "" => stream.content.clone(),
        other => return Err(anyhow!("unsupported image filter {}", other)),
    };

    let data = if data.len() == expected_png && data.len() != expected_raw {
        remove_png_predictor(&data, w, components)
    } else {
        data
    };
    if data.len() < expected_raw {
        return Err(anyhow!(
            "unexpected image size: {} bytes (expected {})",
            data.len(),
            expected_raw
        ));
    }

    let rgb: Vec<u8> = match components {
        1 => data[..expected_raw].iter().flat_map(|&g| [g, g, g]).collect(),
        3 => data[..expected_raw].to_vec(),
        4 => data[..expected_raw]
            .chunks_exact(4)
            .flat_map(|px| {
                let (r, g, b) = cmyk_to_rgb(
                    px[0] as f64 / 255.0,
                    px[1] as f64 / 255.0,
                    px[2] as f64 / 255.0,
                    px[3] as f64 / 255.0,
                );
                [(r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8]
            })
            .collect(),
        n => return Err(anyhow!("{} colour components are not supported", n)),
    };
    RgbImage::from_raw(w, h, rgb).ok_or_else(|| anyhow!("invalid image data"))
}

pub fn cmyk_to_rgb(c: f64, m: f64, y: f64, k: f64) -> (f64, f64, f64) {
    (
        (1.0 - c) * (1.0 - k),
        (1.0 - m) * (1.0 - k),
        (1.0 - y) * (1.0 - k),
    )
}

fn remove_png_predictor(data: &[u8], width: u32, components: u32) -> Vec<u8> {
    let stride = width as usize * components as usize;
    let row_len = stride + 1;
    let rows = data.len() / row_len;
    let comp = components as usize;

    let mut result = Vec::with_capacity(stride * rows);
    let mut prev_row = vec![0u8; stride];

    for r in 0..rows {
        let row = &data[r * row_len..r * row_len + row_len];
        let filter = row[0];
        let raw = &row[1..];
        let mut decoded = vec![0u8; stride];

        match filter {
            1 => {
                for i in 0..stride {
                    let a = if i >= comp { decoded[i - comp] } else { 0 };
                    decoded[i] = raw[i].wrapping_add(a);
                }
            }
            2 => {
                for i in 0..stride {
                    decoded[i] = raw[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                for i in 0..stride {
                    let a = if i >= comp { decoded[i - comp] as u16 } else { 0 };
                    let b = prev_row[i] as u16;
                    decoded[i] = raw[i].wrapping_add(((a + b) / 2) as u8);
                }
            }
            4 => {
                for i in 0..stride {
                    let a = if i >= comp { decoded[i - comp] } else { 0 };
                    let b = prev_row[i];
                    let c = if i >= comp { prev_row[i - comp] } else { 0 };
                    decoded[i] = raw[i].wrapping_add(paeth(a, b, c));
                }
            }
            _ => decoded.copy_from_slice(raw),
        }

        result.extend_from_slice(&decoded);
        prev_row = decoded;
    }

    result
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
