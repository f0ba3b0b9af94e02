//! Background colour sampling.
//!
//! A small region of the page is rendered at 72 dpi onto white paper and the
//! pixels are averaged. Only what can paint a background is rendered: filled
//! paths (solid or shading patterns), `sh` shadings, image XObjects and the
//! form XObjects that contain them. Text, strokes and tiling patterns are
//! skipped.

use crate::config::SampleRegion;
use crate::pdf::{self, cmyk_to_rgb, obj_to_f64, Matrix, PageBox};
use crate::shading::{PatternFill, Shading};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Colour with channels normalised to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Color { r, g, b }
    }

    pub fn gray(v: f64) -> Self {
        Color::new(v, v, v)
    }

    fn to_pixel(self) -> Rgb<u8> {
        let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb([q(self.r), q(self.g), q(self.b)])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.to_pixel();
        write!(f, "#{:02x}{:02x}{:02x}", p[0], p[1], p[2])
    }
}

/// Opens the document at `path`, samples one page and closes it again.
pub fn sample_background_color(path: &Path, page_index: usize, region: Option<SampleRegion>) -> Result<Color> {
    let doc = Document::load(path).with_context(|| format!("could not open {}", path.display()))?;
    sample_page_color(&doc, page_index, region)
}

pub fn sample_page_color(doc: &Document, page_index: usize, region: Option<SampleRegion>) -> Result<Color> {
    let pixels = render_region(doc, page_index, region)?;
    Ok(average(&pixels))
}

/// Renders the sample region of a page; one pixel per point.
pub fn render_region(doc: &Document, page_index: usize, region: Option<SampleRegion>) -> Result<RgbImage> {
    let page_id = pdf::page_id(doc, page_index)?;
    let page = pdf::page_box(doc, page_id)?;
    let region = region.unwrap_or_else(|| SampleRegion::default_for_page(page.width()));
    let mut canvas = Canvas::new(page, region)?;

    let content = doc
        .get_page_content(page_id)
        .with_context(|| format!("could not read content of page {}", page_index))?;
    let resources = pdf::page_resources(doc, page_id)?;

    let mut renderer = Renderer {
        doc,
        canvas: &mut canvas,
        visited: HashSet::new(),
    };
    renderer.run(&content, &resources, GraphicsState::default())?;
    Ok(canvas.pixels)
}

fn average(pixels: &RgbImage) -> Color {
    let n = (pixels.width() * pixels.height()) as f64;
    let mut sum = [0.0f64; 3];
    for p in pixels.pixels() {
        for (s, v) in sum.iter_mut().zip(p.0) {
            *s += v as f64;
        }
    }
    Color::new(sum[0] / n / 255.0, sum[1] / n / 255.0, sum[2] / n / 255.0)
}

struct Canvas {
    pixels: RgbImage,
    /// User-space centre of every pixel, row-major.
    centers: Vec<(f64, f64)>,
    /// User-space bounds of the region: (x0, y0, x1, y1).
    bounds: (f64, f64, f64, f64),
}

impl Canvas {
    fn new(page: PageBox, region: SampleRegion) -> Result<Self> {
        let left = region.x.max(0.0);
        let top = region.y.max(0.0);
        let right = (region.x + region.width).min(page.width());
        let bottom = (region.y + region.height).min(page.height());
        if right <= left || bottom <= top {
            return Err(anyhow!(
                "sample region {:?} lies outside the {}x{} page",
                region,
                page.width(),
                page.height()
            ));
        }

        let w = ((right - left).ceil() as u32).max(1);
        let h = ((bottom - top).ceil() as u32).max(1);
        let mut centers = Vec::with_capacity((w * h) as usize);
        for py in 0..h {
            for px in 0..w {
                let x = (left + px as f64 + 0.5).min(right);
                let y = (top + py as f64 + 0.5).min(bottom);
                centers.push((page.x0 + x, page.y1 - y));
            }
        }

        Ok(Canvas {
            pixels: RgbImage::from_pixel(w, h, Color::WHITE.to_pixel()),
            centers,
            bounds: (page.x0 + left, page.y1 - bottom, page.x0 + right, page.y1 - top),
        })
    }

    fn blend(&mut self, index: usize, color: Rgb<u8>, alpha: f64) {
        let w = self.pixels.width();
        let (x, y) = (index as u32 % w, index as u32 / w);
        let dst = self.pixels.get_pixel_mut(x, y);
        if alpha >= 1.0 {
            *dst = color;
            return;
        }
        for c in 0..3 {
            let v = dst[c] as f64 * (1.0 - alpha) + color[c] as f64 * alpha;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    fn intersects(&self, min: (f64, f64), max: (f64, f64)) -> bool {
        let (x0, y0, x1, y1) = self.bounds;
        min.0 <= x1 && max.0 >= x0 && min.1 <= y1 && max.1 >= y0
    }
}

#[derive(Debug, Clone)]
enum Paint {
    Solid(Color),
    Pattern(Rc<PatternFill>),
    /// Fills that are not rendered, such as tiling patterns.
    Skip,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill: Paint,
    fill_alpha: f64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: Matrix::IDENTITY,
            fill: Paint::Solid(Color::BLACK),
            fill_alpha: 1.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FillRule {
    NonZero,
    EvenOdd,
}

struct Renderer<'a, 'c> {
    doc: &'a Document,
    canvas: &'c mut Canvas,
    visited: HashSet<ObjectId>,
}

impl Renderer<'_, '_> {
    fn run(&mut self, content: &[u8], resources: &Dictionary, initial: GraphicsState) -> Result<()> {
        let content = Content::decode(content).context("could not parse content stream")?;
        // Pattern space is the default space of the page or form being run.
        let base = initial.ctm;
        let mut state = initial;
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut path: Vec<Vec<(f64, f64)>> = Vec::new();

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(prev) = stack.pop() {
                        state = prev;
                    }
                }
                "cm" => {
                    if let Some(m) = op_matrix(op) {
                        state.ctm = m.then(state.ctm);
                    }
                }
                "scn" if matches!(op.operands.last(), Some(Object::Name(_))) => {
                    state.fill = self.pattern_paint(op, resources, base);
                }
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = op_color(op) {
                        state.fill = Paint::Solid(color);
                    }
                }
                "sh" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.paint_shading(name, resources, &state);
                    }
                }
                "gs" => {
                    if let Some(alpha) = self.ext_gstate_alpha(op, resources) {
                        state.fill_alpha = alpha;
                    }
                }
                "m" => {
                    if let Some([x, y]) = op_nums::<2>(op) {
                        path.push(vec![state.ctm.apply(x, y)]);
                    }
                }
                "l" => {
                    if let (Some([x, y]), Some(sub)) = (op_nums::<2>(op), path.last_mut()) {
                        sub.push(state.ctm.apply(x, y));
                    }
                }
                "c" | "v" | "y" => {
                    if let Some(sub) = path.last_mut() {
                        flatten_curve(op, state.ctm, sub);
                    }
                }
                "re" => {
                    if let Some([x, y, w, h]) = op_nums::<4>(op) {
                        let m = state.ctm;
                        path.push(vec![
                            m.apply(x, y),
                            m.apply(x + w, y),
                            m.apply(x + w, y + h),
                            m.apply(x, y + h),
                        ]);
                    }
                }
                "f" | "F" | "B" | "b" => {
                    self.fill(&path, FillRule::NonZero, &state);
                    path.clear();
                }
                "f*" | "B*" | "b*" => {
                    self.fill(&path, FillRule::EvenOdd, &state);
                    path.clear();
                }
                "n" | "S" | "s" => path.clear(),
                "Do" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.draw_xobject(name, resources, &state)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn fill(&mut self, path: &[Vec<(f64, f64)>], rule: FillRule, state: &GraphicsState) {
        let points = path.iter().flatten();
        let (mut min, mut max) = ((f64::MAX, f64::MAX), (f64::MIN, f64::MIN));
        for &(x, y) in points {
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
        if path.is_empty() || matches!(state.fill, Paint::Skip) || !self.canvas.intersects(min, max) {
            return;
        }
        for i in 0..self.canvas.centers.len() {
            let p = self.canvas.centers[i];
            let winding: i32 = path.iter().map(|sub| winding_number(sub, p)).sum();
            let inside = match rule {
                FillRule::NonZero => winding != 0,
                FillRule::EvenOdd => winding % 2 != 0,
            };
            if !inside {
                continue;
            }
            let color = match &state.fill {
                Paint::Solid(c) => Some(*c),
                Paint::Pattern(pattern) => pattern.color_at(p),
                Paint::Skip => None,
            };
            if let Some(color) = color {
                self.canvas.blend(i, color.to_pixel(), state.fill_alpha);
            }
        }
    }

    fn draw_xobject(&mut self, name: &[u8], resources: &Dictionary, state: &GraphicsState) -> Result<()> {
        let doc = self.doc;
        let xobjects = match resources.get(b"XObject") {
            Ok(obj) => pdf::resolve_to_dict(doc, obj)?,
            Err(_) => return Ok(()),
        };
        let Ok(Object::Reference(id)) = xobjects.get(name) else {
            return Ok(());
        };
        let id = *id;
        let stream = match doc.get_object(id) {
            Ok(Object::Stream(s)) => s,
            _ => return Ok(()),
        };

        if pdf::is_name(&stream.dict, b"Subtype", "Image") {
            self.draw_image(id, stream, state)
        } else if pdf::is_name(&stream.dict, b"Subtype", "Form") {
            if !self.visited.insert(id) {
                return Ok(());
            }
            let result = self.draw_form(stream, resources, state);
            self.visited.remove(&id);
            result
        } else {
            Ok(())
        }
    }

    fn draw_image(&mut self, id: ObjectId, stream: &Stream, state: &GraphicsState) -> Result<()> {
        let ctm = state.ctm;
        let corners = [ctm.apply(0.0, 0.0), ctm.apply(1.0, 0.0), ctm.apply(1.0, 1.0), ctm.apply(0.0, 1.0)];
        let min = corners.iter().fold((f64::MAX, f64::MAX), |a, p| (a.0.min(p.0), a.1.min(p.1)));
        let max = corners.iter().fold((f64::MIN, f64::MIN), |a, p| (a.0.max(p.0), a.1.max(p.1)));
        if !self.canvas.intersects(min, max) {
            return Ok(());
        }
        let Some(inverse) = ctm.invert() else {
            return Ok(());
        };

        let image = match pdf::decode_image(self.doc, stream) {
            Ok(img) => img,
            Err(e) => {
                log::debug!("skipping image {:?} while sampling: {}", id, e);
                return Ok(());
            }
        };
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(());
        }

        for i in 0..self.canvas.centers.len() {
            let (x, y) = self.canvas.centers[i];
            let (u, v) = inverse.apply(x, y);
            if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                continue;
            }
            let ix = ((u * w as f64) as u32).min(w - 1);
            let iy = (((1.0 - v) * h as f64) as u32).min(h - 1);
            let px = *image.get_pixel(ix, iy);
            self.canvas.blend(i, px, state.fill_alpha);
        }
        Ok(())
    }

    fn draw_form(&mut self, stream: &Stream, parent: &Dictionary, state: &GraphicsState) -> Result<()> {
        let matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(Matrix::from_object)
            .unwrap_or(Matrix::IDENTITY);
        let resources = match stream.dict.get(b"Resources") {
            Ok(obj) => pdf::resolve_to_dict(self.doc, obj)?,
            Err(_) => parent.clone(),
        };
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());

        let inner = GraphicsState {
            ctm: matrix.then(state.ctm),
            ..state.clone()
        };
        self.run(&content, &resources, inner)
    }

    /// Fill paint for `/Name scn` under a Pattern colour space.
    fn pattern_paint(&self, op: &Operation, resources: &Dictionary, base: Matrix) -> Paint {
        let Some(name) = op.operands.last().and_then(|o| o.as_name().ok()) else {
            return Paint::Skip;
        };
        match self.load_pattern(name, resources, base) {
            Ok(Some(fill)) => Paint::Pattern(Rc::new(fill)),
            Ok(None) => Paint::Skip,
            Err(e) => {
                log::debug!("skipping pattern /{} while sampling: {:#}", String::from_utf8_lossy(name), e);
                Paint::Skip
            }
        }
    }

    fn load_pattern(&self, name: &[u8], resources: &Dictionary, base: Matrix) -> Result<Option<PatternFill>> {
        let patterns = pdf::resolve_to_dict(self.doc, resources.get(b"Pattern")?)?;
        let pattern = pdf::resolve_to_dict(self.doc, patterns.get(name)?)?;
        if !matches!(pattern.get(b"PatternType").and_then(|t| t.as_i64()), Ok(2)) {
            return Ok(None);
        }
        let shading = Shading::from_object(self.doc, pattern.get(b"Shading")?)?;
        let matrix = pattern
            .get(b"Matrix")
            .ok()
            .and_then(Matrix::from_object)
            .unwrap_or(Matrix::IDENTITY);
        Ok(PatternFill::new(shading, matrix.then(base)))
    }

    /// `sh`: paints the shading over the whole region.
    fn paint_shading(&mut self, name: &[u8], resources: &Dictionary, state: &GraphicsState) {
        let shading = resources
            .get(b"Shading")
            .map_err(anyhow::Error::from)
            .and_then(|obj| pdf::resolve_to_dict(self.doc, obj))
            .and_then(|shadings| Ok(shadings.get(name)?.clone()))
            .and_then(|obj| Shading::from_object(self.doc, &obj));
        let shading = match shading {
            Ok(sh) => sh,
            Err(e) => {
                log::debug!("skipping shading /{} while sampling: {:#}", String::from_utf8_lossy(name), e);
                return;
            }
        };
        let Some(inverse) = state.ctm.invert() else {
            return;
        };
        for i in 0..self.canvas.centers.len() {
            let (x, y) = self.canvas.centers[i];
            if let Some(color) = shading.color_at(inverse.apply(x, y)) {
                self.canvas.blend(i, color.to_pixel(), state.fill_alpha);
            }
        }
    }

    fn ext_gstate_alpha(&self, op: &Operation, resources: &Dictionary) -> Option<f64> {
        let name = op.operands.first()?.as_name().ok()?;
        let states = pdf::resolve_to_dict(self.doc, resources.get(b"ExtGState").ok()?).ok()?;
        let gs = pdf::resolve_to_dict(self.doc, states.get(name).ok()?).ok()?;
        gs.get(b"ca").ok().and_then(obj_to_f64).map(|a| a.clamp(0.0, 1.0))
    }
}

fn op_nums<const N: usize>(op: &Operation) -> Option<[f64; N]> {
    if op.operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, obj) in out.iter_mut().zip(&op.operands) {
        *slot = obj_to_f64(obj)?;
    }
    Some(out)
}

fn op_matrix(op: &Operation) -> Option<Matrix> {
    op_nums::<6>(op).map(|[a, b, c, d, e, f]| Matrix::new(a, b, c, d, e, f))
}

fn op_color(op: &Operation) -> Option<Color> {
    let nums: Vec<f64> = op.operands.iter().filter_map(obj_to_f64).collect();
    match nums[..] {
        [v] => Some(Color::gray(v)),
        [r, g, b] => Some(Color::new(r, g, b)),
        [c, m, y, k] => {
            let (r, g, b) = cmyk_to_rgb(c, m, y, k);
            Some(Color::new(r, g, b))
        }
        _ => None,
    }
}

fn flatten_curve(op: &Operation, ctm: Matrix, sub: &mut Vec<(f64, f64)>) {
    let Some(&start) = sub.last() else {
        return;
    };
    let nums: Vec<f64> = op.operands.iter().filter_map(obj_to_f64).collect();
    let pts: Vec<(f64, f64)> = nums.chunks_exact(2).map(|c| ctm.apply(c[0], c[1])).collect();
    let (c1, c2, end) = match (op.operator.as_str(), &pts[..]) {
        ("c", [c1, c2, end]) => (*c1, *c2, *end),
        ("v", [c2, end]) => (start, *c2, *end),
        ("y", [c1, end]) => (*c1, *end, *end),
        _ => return,
    };
    const STEPS: usize = 8;
    for i in 1..=STEPS {
        let t = i as f64 / STEPS as f64;
        let mt = 1.0 - t;
        let a = mt * mt * mt;
        let b = 3.0 * mt * mt * t;
        let c = 3.0 * mt * t * t;
        let d = t * t * t;
        sub.push((
            a * start.0 + b * c1.0 + c * c2.0 + d * end.0,
            a * start.1 + b * c1.1 + c * c2.1 + d * end.1,
        ));
    }
}

/// Winding number of a closed polygon around `p`.
fn winding_number(poly: &[(f64, f64)], p: (f64, f64)) -> i32 {
    if poly.len() < 3 {
        return 0;
    }
    let mut wn = 0;
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        let cross = (b.0 - a.0) * (p.1 - a.1) - (p.0 - a.0) * (b.1 - a.1);
        if a.1 <= p.1 {
            if b.1 > p.1 && cross > 0.0 {
                wn += 1;
            }
        } else if b.1 <= p.1 && cross < 0.0 {
            wn -= 1;
        }
    }
    wn
}
