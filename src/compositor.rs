//! Draws the backing panel and the logo onto an existing page.
//!
//! Each of the two layers is built as an overlay (a content stream plus the
//! resources it names) and the overlays are merged onto the page in order,
//! panel first, so the logo is painted on top.

use crate::config::LogoConfig;
use crate::logo::EmbeddedLogo;
use crate::pdf::{self, fmt_num, Matrix, PageBox};
use crate::placement::{compute_placement, Placement, Rect};
use crate::sampler::Color;
use anyhow::{anyhow, Result};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

const BACKGROUND_GS: &str = "GSLogoBg";
const LOGO_XOBJECT: &str = "ImLogo";

/// Content for one layer and the resources it refers to, keyed by category
/// (`XObject`, `ExtGState`) and name.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub content: Vec<u8>,
    pub resources: Vec<(&'static str, String, Object)>,
}

/// Solid panel filled with the sampled colour.
pub fn background_overlay(rect: Rect, color: Color, opacity: f64, gs_name: &str) -> Overlay {
    let mut content = String::from("q\n");
    let mut resources = Vec::new();
    if opacity < 1.0 {
        content.push_str(&format!("/{} gs\n", gs_name));
        resources.push((
            "ExtGState",
            gs_name.to_string(),
            Object::Dictionary(dictionary! {
                "Type" => "ExtGState",
                "ca" => opacity,
            }),
        ));
    }
    content.push_str(&format!(
        "{} {} {} rg\n{} {} {} {} re\nf\nQ\n",
        fmt_num(color.r),
        fmt_num(color.g),
        fmt_num(color.b),
        fmt_num(rect.x),
        fmt_num(rect.y),
        fmt_num(rect.width),
        fmt_num(rect.height)
    ));
    Overlay {
        content: content.into_bytes(),
        resources,
    }
}

/// Maps the unit square onto `rect`, rotated counter-clockwise about its centre.
pub fn logo_matrix(rect: Rect, rotation: f64) -> Matrix {
    if rotation == 0.0 {
        return Matrix::scale(rect.width, rect.height).then(Matrix::translate(rect.x, rect.y));
    }
    let (cx, cy) = rect.center();
    Matrix::scale(rect.width, rect.height)
        .then(Matrix::translate(-rect.width / 2.0, -rect.height / 2.0))
        .then(Matrix::rotate_degrees(rotation))
        .then(Matrix::translate(cx, cy))
}

pub fn logo_overlay(rect: Rect, rotation: f64, image: ObjectId, name: &str) -> Overlay {
    let content = format!(
        "q\n{} cm\n/{} Do\nQ\n",
        logo_matrix(rect, rotation).to_operand_string(),
        name
    );
    Overlay {
        content: content.into_bytes(),
        resources: vec![("XObject", name.to_string(), Object::Reference(image))],
    }
}

/// Places the panel and logo on one page and returns where they went.
pub fn composite_page(
    doc: &mut Document,
    page_id: ObjectId,
    page: PageBox,
    logo: &EmbeddedLogo,
    color: Color,
    config: &LogoConfig,
) -> Result<Placement> {
    let placement = compute_placement((logo.width, logo.height), (page.width(), page.height()), config);
    let shift = |r: Rect| Rect {
        x: r.x + page.x0,
        y: r.y + page.y0,
        ..r
    };

    let resources = pdf::page_resources(doc, page_id)?;
    let gs_name = unique_name(doc, &resources, b"ExtGState", BACKGROUND_GS)?;
    let im_name = unique_name(doc, &resources, b"XObject", LOGO_XOBJECT)?;

    let overlays = [
        background_overlay(shift(placement.background), color, config.opacity, &gs_name),
        logo_overlay(shift(placement.logo), config.rotation, logo.id, &im_name),
    ];
    merge_overlays(doc, page_id, resources, &overlays)?;
    Ok(placement)
}

/// Merges overlays onto a page in the given order.
pub fn merge_overlays(
    doc: &mut Document,
    page_id: ObjectId,
    mut resources: Dictionary,
    overlays: &[Overlay],
) -> Result<()> {
    for overlay in overlays {
        for (category, name, object) in &overlay.resources {
            let mut sub = match resources.get(category.as_bytes()) {
                Ok(obj) => pdf::resolve_to_dict(doc, obj)?,
                Err(_) => Dictionary::new(),
            };
            sub.set(name.as_bytes(), object.clone());
            resources.set(*category, Object::Dictionary(sub));
        }
    }

    let mut page_dict = doc
        .get_object(page_id)?
        .as_dict()
        .map_err(|_| anyhow!("page {:?} is not a dictionary", page_id))?
        .clone();

    let existing: Vec<Object> = match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Stream(s)) => {
            let s = s.clone();
            vec![Object::Reference(doc.add_object(s))]
        }
        _ => Vec::new(),
    };

    let mut contents = Vec::with_capacity(existing.len() + overlays.len() + 2);
    if !existing.is_empty() {
        contents.push(content_ref(doc, b"q\n".to_vec()));
        contents.extend(existing);
        contents.push(content_ref(doc, b"\nQ\n".to_vec()));
    }
    for overlay in overlays {
        contents.push(content_ref(doc, overlay.content.clone()));
    }

    page_dict.set("Contents", Object::Array(contents));
    page_dict.set("Resources", Object::Dictionary(resources));
    doc.objects.insert(page_id, Object::Dictionary(page_dict));
    Ok(())
}

fn content_ref(doc: &mut Document, content: Vec<u8>) -> Object {
    Object::Reference(doc.add_object(Stream::new(Dictionary::new(), content)))
}

/// `base`, or `base` with a numeric suffix, not yet used in the resource category.
fn unique_name(doc: &Document, resources: &Dictionary, category: &[u8], base: &str) -> Result<String> {
    let taken = match resources.get(category) {
        Ok(obj) => pdf::resolve_to_dict(doc, obj)?,
        Err(_) => return Ok(base.to_string()),
    };
    let mut name = base.to_string();
    let mut n = 1;
    while taken.has(name.as_bytes()) {
        name = format!("{}{}", base, n);
        n += 1;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Position;
    use crate::logo::{LogoImage, Quality};
    use crate::sampler::sample_page_color;
    use crate::test_support::{png_bytes, rgb_image_xobject, PdfBuilder};
    use pretty_assertions::assert_eq;

    fn page_contents(doc: &Document, page_id: ObjectId) -> Vec<String> {
        let dict = doc.get_object(page_id).unwrap().as_dict().unwrap();
        dict.get(b"Contents")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|r| {
                let s = doc.get_object(r.as_reference().unwrap()).unwrap().as_stream().unwrap();
                String::from_utf8(s.content.clone()).unwrap()
            })
            .collect()
    }

    fn setup(content: &str) -> (Document, ObjectId, EmbeddedLogo) {
        let mut doc = PdfBuilder::new().page(612.0, 792.0, content).build();
        let logo = LogoImage::from_bytes(&png_bytes(200, 100, [0, 0, 0, 255])).unwrap();
        let embedded = logo.embed(&mut doc, Quality::Lossless).unwrap();
        let page_id = pdf::page_id(&doc, 0).unwrap();
        (doc, page_id, embedded)
    }

    #[test]
    fn background_then_logo_after_wrapped_page() {
        let (mut doc, page_id, logo) = setup("0 0 1 rg 0 0 10 10 re f");
        let placement = composite_page(
            &mut doc,
            page_id,
            PageBox::LETTER,
            &logo,
            Color::new(1.0, 0.5, 0.0),
            &LogoConfig::default(),
        )
        .unwrap();
        assert_eq!(placement.logo.width, 150.0);

        let contents = page_contents(&doc, page_id);
        assert_eq!(contents.len(), 5);
        assert_eq!(contents[0], "q\n");
        assert_eq!(contents[1], "0 0 1 rg 0 0 10 10 re f");
        assert_eq!(contents[2], "\nQ\n");
        assert_eq!(contents[3], "q\n1 0.5 0 rg\n422 0 190 115 re\nf\nQ\n");
        assert_eq!(contents[4], "q\n150 0 0 75 442 20 cm\n/ImLogo Do\nQ\n");
    }

    #[test]
    fn panel_paints_the_sampled_color() {
        let (mut doc, page_id, logo) = setup("");
        let config = LogoConfig {
            position: Position::TopRight,
            padding: 180.0,
            ..LogoConfig::default()
        };
        let color = Color::new(0.2, 0.6, 0.8);
        composite_page(&mut doc, page_id, PageBox::LETTER, &logo, color, &config).unwrap();
        // just right of the logo, inside the panel's 20pt margin
        let region = crate::config::SampleRegion {
            x: 612.0 - 180.0 + 5.0,
            y: 180.0,
            width: 5.0,
            height: 5.0,
        };
        let sampled = sample_page_color(&doc, 0, Some(region)).unwrap();
        assert!((sampled.g - 0.6).abs() < 0.01, "{:?}", sampled);
    }

    #[test]
    fn opacity_is_applied_to_the_panel() {
        let (mut doc, page_id, logo) = setup("");
        let config = LogoConfig {
            opacity: 0.25,
            ..LogoConfig::default()
        };
        composite_page(&mut doc, page_id, PageBox::LETTER, &logo, Color::WHITE, &config).unwrap();

        let contents = page_contents(&doc, page_id);
        assert!(contents[3].starts_with("q\n/GSLogoBg gs\n"));
        let resources = pdf::page_resources(&doc, page_id).unwrap();
        let gs = resources.get(b"ExtGState").unwrap().as_dict().unwrap();
        let ca = gs.get(b"GSLogoBg").unwrap().as_dict().unwrap().get(b"ca").unwrap();
        assert_eq!(pdf::obj_to_f64(ca), Some(0.25));
    }

    #[test]
    fn full_opacity_adds_no_graphics_state() {
        let overlay = background_overlay(
            Rect {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
            },
            Color::BLACK,
            1.0,
            BACKGROUND_GS,
        );
        assert!(overlay.resources.is_empty());
    }

    #[test]
    fn rotation_turns_logo_about_its_center() {
        let rect = Rect {
            x: 100.0,
            y: 200.0,
            width: 40.0,
            height: 20.0,
        };
        let m = logo_matrix(rect, 90.0);
        let (cx, cy) = m.apply(0.5, 0.5);
        assert!((cx - 120.0).abs() < 1e-9 && (cy - 210.0).abs() < 1e-9);
        // the image's bottom-left corner swings to the bottom-right after a quarter turn
        let (x, y) = m.apply(0.0, 0.0);
        assert!((x - 130.0).abs() < 1e-9 && (y - 190.0).abs() < 1e-9, "{:?}", (x, y));
        assert_eq!(logo_matrix(rect, 0.0), Matrix::new(40.0, 0.0, 0.0, 20.0, 100.0, 200.0));
    }

    #[test]
    fn existing_resource_names_are_not_clobbered() {
        let xobjects = lopdf::dictionary! { "ImLogo" => rgb_image_xobject(1, 1, &[[0, 0, 0]]) };
        let mut doc = PdfBuilder::new()
            .page_with_xobjects(612.0, 792.0, "", xobjects)
            .build();
        let logo = LogoImage::from_bytes(&png_bytes(10, 10, [0, 0, 0, 255]))
            .unwrap()
            .embed(&mut doc, Quality::Lossless)
            .unwrap();
        let page_id = pdf::page_id(&doc, 0).unwrap();
        composite_page(&mut doc, page_id, PageBox::LETTER, &logo, Color::WHITE, &LogoConfig::default()).unwrap();

        let resources = pdf::page_resources(&doc, page_id).unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert!(xobjects.has(b"ImLogo"));
        assert_eq!(xobjects.get(b"ImLogo1").unwrap().as_reference().unwrap(), logo.id);
    }

    #[test]
    fn page_box_origin_offsets_geometry() {
        let (mut doc, page_id, logo) = setup("");
        let shifted = PageBox {
            x0: 100.0,
            y0: 50.0,
            x1: 712.0,
            y1: 842.0,
        };
        composite_page(&mut doc, page_id, shifted, &logo, Color::WHITE, &LogoConfig::default()).unwrap();
        let contents = page_contents(&doc, page_id);
        assert_eq!(contents.last().unwrap(), "q\n150 0 0 75 542 70 cm\n/ImLogo Do\nQ\n");
    }
}
