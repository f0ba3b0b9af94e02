//! Smooth shadings for the sampler.
//!
//! Axial (type 2) and radial (type 3) shadings are evaluated point by point
//! through sampled, exponential and stitching functions. Function-based and
//! mesh shadings are reduced to their `/Background` colour when they have one.

use crate::pdf::{self, cmyk_to_rgb, number_array, Matrix};
use crate::sampler::Color;
use anyhow::{anyhow, Context, Result};
use lopdf::{Dictionary, Document, Object};

const MAX_FUNCTION_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Shading {
    geometry: Geometry,
    function: Option<Function>,
    domain: (f64, f64),
    extend: (bool, bool),
    background: Option<Color>,
    bbox: Option<[f64; 4]>,
}

#[derive(Debug, Clone, Copy)]
enum Geometry {
    Axial {
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    },
    Radial {
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
    },
    Other,
}

impl Shading {
    /// Reads a shading dictionary (or mesh shading stream).
    pub fn from_object(doc: &Document, obj: &Object) -> Result<Self> {
        let dict = pdf::as_dict(pdf::resolve(doc, obj)?)?;
        let shading_type = dict
            .get(b"ShadingType")
            .ok()
            .and_then(|t| t.as_i64().ok())
            .ok_or_else(|| anyhow!("shading has no /ShadingType"))?;
        // Fails early on colour spaces the sampler cannot convert.
        pdf::color_components(doc, dict.get(b"ColorSpace").ok())?;

        let coords = dict.get(b"Coords").ok().and_then(number_array).unwrap_or_default();
        let geometry = match (shading_type, &coords[..]) {
            (2, &[x0, y0, x1, y1]) => Geometry::Axial { x0, y0, x1, y1 },
            (3, &[x0, y0, r0, x1, y1, r1]) => Geometry::Radial {
                x0,
                y0,
                r0,
                x1,
                y1,
                r1,
            },
            (2 | 3, _) => return Err(anyhow!("shading type {} has malformed /Coords", shading_type)),
            _ => Geometry::Other,
        };

        let function = match (geometry, dict.get(b"Function")) {
            (Geometry::Other, _) | (_, Err(_)) => None,
            (_, Ok(f)) => Some(Function::from_object(doc, f, 0).context("unreadable shading function")?),
        };
        if function.is_none() && !matches!(geometry, Geometry::Other) {
            return Err(anyhow!("shading type {} has no /Function", shading_type));
        }

        let extend = match dict.get(b"Extend").ok().and_then(|e| e.as_array().ok()) {
            Some(flags) if flags.len() == 2 => (
                flags[0].as_bool().unwrap_or(false),
                flags[1].as_bool().unwrap_or(false),
            ),
            _ => (false, false),
        };

        Ok(Shading {
            geometry,
            function,
            domain: pair(dict, b"Domain").unwrap_or((0.0, 1.0)),
            extend,
            background: dict
                .get(b"Background")
                .ok()
                .and_then(number_array)
                .and_then(|c| components_to_color(&c)),
            bbox: dict
                .get(b"BBox")
                .ok()
                .and_then(number_array)
                .and_then(|b| <[f64; 4]>::try_from(b).ok()),
        })
    }

    /// Colour the shading paints at `p`, a point in shading space.
    pub fn color_at(&self, p: (f64, f64)) -> Option<Color> {
        if let Some([x0, y0, x1, y1]) = self.bbox {
            if p.0 < x0.min(x1) || p.0 > x0.max(x1) || p.1 < y0.min(y1) || p.1 > y0.max(y1) {
                return None;
            }
        }
        let s = match self.geometry {
            Geometry::Axial { x0, y0, x1, y1 } => self.axial_param((x0, y0), (x1, y1), p)?,
            Geometry::Radial {
                x0,
                y0,
                r0,
                x1,
                y1,
                r1,
            } => self.radial_param((x0, y0, r0), (x1, y1, r1), p)?,
            Geometry::Other => return self.background,
        };
        let (t0, t1) = self.domain;
        let values = self.function.as_ref()?.eval(t0 + s * (t1 - t0))?;
        components_to_color(&values)
    }

    /// Paint used outside the shading's extent when it fills through a pattern.
    pub fn background(&self) -> Option<Color> {
        self.background
    }

    fn axial_param(&self, start: (f64, f64), end: (f64, f64), p: (f64, f64)) -> Option<f64> {
        let (dx, dy) = (end.0 - start.0, end.1 - start.1);
        let len2 = dx * dx + dy * dy;
        let s = if len2 == 0.0 {
            0.0
        } else {
            ((p.0 - start.0) * dx + (p.1 - start.1) * dy) / len2
        };
        self.extended(s)
    }

    /// Largest `s` whose circle passes through `p`.
    fn radial_param(&self, c0: (f64, f64, f64), c1: (f64, f64, f64), p: (f64, f64)) -> Option<f64> {
        let (cdx, cdy, dr) = (c1.0 - c0.0, c1.1 - c0.1, c1.2 - c0.2);
        let (pdx, pdy) = (p.0 - c0.0, p.1 - c0.1);
        let a = cdx * cdx + cdy * cdy - dr * dr;
        let b = -2.0 * (pdx * cdx + pdy * cdy + c0.2 * dr);
        let c = pdx * pdx + pdy * pdy - c0.2 * c0.2;

        let mut roots = Vec::with_capacity(2);
        if a.abs() < 1e-12 {
            if b.abs() > 1e-12 {
                roots.push(-c / b);
            }
        } else {
            let disc = b * b - 4.0 * a * c;
            if disc >= 0.0 {
                let sq = disc.sqrt();
                roots.push((-b + sq) / (2.0 * a));
                roots.push((-b - sq) / (2.0 * a));
            }
        }
        roots.sort_by(|x, y| y.total_cmp(x));
        roots
            .into_iter()
            .filter(|s| c0.2 + s * dr >= 0.0)
            .find_map(|s| self.extended(s))
    }

    fn extended(&self, s: f64) -> Option<f64> {
        if s < 0.0 {
            self.extend.0.then_some(0.0)
        } else if s > 1.0 {
            self.extend.1.then_some(1.0)
        } else {
            Some(s)
        }
    }
}

fn components_to_color(values: &[f64]) -> Option<Color> {
    let v = |i: usize| values[i].clamp(0.0, 1.0);
    match values.len() {
        1 => Some(Color::gray(v(0))),
        3 => Some(Color::new(v(0), v(1), v(2))),
        4 => {
            let (r, g, b) = cmyk_to_rgb(v(0), v(1), v(2), v(3));
            Some(Color::new(r, g, b))
        }
        _ => None,
    }
}

fn pair(dict: &Dictionary, key: &[u8]) -> Option<(f64, f64)> {
    match dict.get(key).ok().and_then(number_array)?[..] {
        [a, b, ..] => Some((a, b)),
        _ => None,
    }
}

fn pairs(dict: &Dictionary, key: &[u8]) -> Option<Vec<(f64, f64)>> {
    let nums = dict.get(key).ok().and_then(number_array)?;
    Some(nums.chunks_exact(2).map(|c| (c[0], c[1])).collect())
}

fn interpolate(x: f64, from: (f64, f64), to: (f64, f64)) -> f64 {
    if from.1 == from.0 {
        to.0
    } else {
        to.0 + (x - from.0) * (to.1 - to.0) / (from.1 - from.0)
    }
}

fn clip(x: f64, range: (f64, f64)) -> f64 {
    x.max(range.0.min(range.1)).min(range.0.max(range.1))
}

/// One-input PDF functions.
#[derive(Debug, Clone)]
enum Function {
    Sampled {
        domain: (f64, f64),
        encode: (f64, f64),
        decode: Vec<(f64, f64)>,
        size: usize,
        /// Sample values scaled to [0, 1], one per `decode` entry per sample.
        samples: Vec<f64>,
    },
    Exponential {
        domain: (f64, f64),
        c0: Vec<f64>,
        c1: Vec<f64>,
        n: f64,
    },
    Stitching {
        domain: (f64, f64),
        functions: Vec<Function>,
        bounds: Vec<f64>,
        encode: Vec<(f64, f64)>,
    },
    /// One single-output function per colour component.
    PerComponent(Vec<Function>),
}

impl Function {
    fn from_object(doc: &Document, obj: &Object, depth: usize) -> Result<Self> {
        if depth > MAX_FUNCTION_DEPTH {
            return Err(anyhow!("functions nested too deeply"));
        }
        let obj = pdf::resolve(doc, obj)?;
        if let Object::Array(items) = obj {
            let parts = items
                .iter()
                .map(|f| Function::from_object(doc, f, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Function::PerComponent(parts));
        }
        let dict = pdf::as_dict(obj)?;
        let domain = pair(dict, b"Domain").unwrap_or((0.0, 1.0));
        let function_type = dict
            .get(b"FunctionType")
            .ok()
            .and_then(|t| t.as_i64().ok())
            .ok_or_else(|| anyhow!("function has no /FunctionType"))?;

        match function_type {
            0 => {
                let Object::Stream(stream) = obj else {
                    return Err(anyhow!("sampled function is not a stream"));
                };
                let size = match dict.get(b"Size").ok().and_then(number_array).as_deref() {
                    Some(&[m]) if m >= 1.0 => m as usize,
                    _ => return Err(anyhow!("only one-input sampled functions are supported")),
                };
                let range = pairs(dict, b"Range").ok_or_else(|| anyhow!("sampled function has no /Range"))?;
                let bits = dict
                    .get(b"BitsPerSample")
                    .ok()
                    .and_then(|b| b.as_i64().ok())
                    .filter(|b| [1, 2, 4, 8, 12, 16, 24, 32].contains(b))
                    .ok_or_else(|| anyhow!("invalid /BitsPerSample"))? as u32;
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                let count = size
                    .checked_mul(range.len())
                    .ok_or_else(|| anyhow!("sampled function is too large"))?;
                let samples = read_samples(&data, bits, count)
                    .ok_or_else(|| anyhow!("sampled function has too little data"))?;
                let decode = pairs(dict, b"Decode").unwrap_or_else(|| range.clone());
                if decode.len() != range.len() {
                    return Err(anyhow!("sampled function /Decode does not match /Range"));
                }
                Ok(Function::Sampled {
                    domain,
                    encode: pair(dict, b"Encode").unwrap_or((0.0, (size - 1) as f64)),
                    decode,
                    size,
                    samples,
                })
            }
            2 => {
                let c0 = dict.get(b"C0").ok().and_then(number_array).unwrap_or_else(|| vec![0.0]);
                let c1 = dict.get(b"C1").ok().and_then(number_array).unwrap_or_else(|| vec![1.0]);
                if c0.len() != c1.len() {
                    return Err(anyhow!("exponential function /C0 and /C1 differ in length"));
                }
                let n = dict.get(b"N").ok().and_then(pdf::obj_to_f64).unwrap_or(1.0);
                Ok(Function::Exponential { domain, c0, c1, n })
            }
            3 => {
                let functions = dict
                    .get(b"Functions")
                    .ok()
                    .and_then(|f| f.as_array().ok())
                    .ok_or_else(|| anyhow!("stitching function has no /Functions"))?
                    .iter()
                    .map(|f| Function::from_object(doc, f, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                let bounds = dict.get(b"Bounds").ok().and_then(number_array).unwrap_or_default();
                let encode = pairs(dict, b"Encode").unwrap_or_default();
                if functions.is_empty() || bounds.len() + 1 != functions.len() || encode.len() != functions.len() {
                    return Err(anyhow!("stitching function has inconsistent /Bounds or /Encode"));
                }
                Ok(Function::Stitching {
                    domain,
                    functions,
                    bounds,
                    encode,
                })
            }
            other => Err(anyhow!("function type {} is not supported", other)),
        }
    }

    fn eval(&self, x: f64) -> Option<Vec<f64>> {
        match self {
            Function::Sampled {
                domain,
                encode,
                decode,
                size,
                samples,
            } => {
                let outputs = decode.len();
                let e = clip(interpolate(clip(x, *domain), *domain, *encode), (0.0, (*size - 1) as f64));
                let lo = e.floor() as usize;
                let hi = (lo + 1).min(size - 1);
                let frac = e - lo as f64;
                let values = (0..outputs)
                    .map(|j| {
                        let a = samples[lo * outputs + j];
                        let b = samples[hi * outputs + j];
                        let v = a + (b - a) * frac;
                        interpolate(v, (0.0, 1.0), decode[j])
                    })
                    .collect();
                Some(values)
            }
            Function::Exponential { domain, c0, c1, n } => {
                let xn = clip(x, *domain).powf(*n);
                Some(c0.iter().zip(c1).map(|(a, b)| a + xn * (b - a)).collect())
            }
            Function::Stitching {
                domain,
                functions,
                bounds,
                encode,
            } => {
                let x = clip(x, *domain);
                let i = bounds.iter().take_while(|&&b| x >= b).count();
                let lo = if i == 0 { domain.0 } else { bounds[i - 1] };
                let hi = bounds.get(i).copied().unwrap_or(domain.1);
                functions[i].eval(interpolate(x, (lo, hi), encode[i]))
            }
            Function::PerComponent(parts) => parts.iter().map(|f| f.eval(x)?.first().copied()).collect(),
        }
    }
}

/// Unpacks `count` big-endian samples of `bits` each, scaled to [0, 1].
fn read_samples(data: &[u8], bits: u32, count: usize) -> Option<Vec<f64>> {
    if count.checked_mul(bits as usize)? > data.len().checked_mul(8)? {
        return None;
    }
    let max = ((1u64 << bits) - 1) as f64;
    let mut out = Vec::with_capacity(count);
    let mut bit = 0usize;
    for _ in 0..count {
        let mut v: u64 = 0;
        for _ in 0..bits {
            let byte = data[bit / 8];
            v = (v << 1) | ((byte >> (7 - bit % 8)) & 1) as u64;
            bit += 1;
        }
        out.push(v as f64 / max);
    }
    Some(out)
}

/// A shading pattern installed as the fill colour.
#[derive(Debug, Clone)]
pub struct PatternFill {
    shading: Shading,
    /// Device space back to pattern space.
    inverse: Matrix,
}

impl PatternFill {
    /// `to_device` maps pattern space to the space the sampler paints in.
    pub fn new(shading: Shading, to_device: Matrix) -> Option<Self> {
        Some(PatternFill {
            shading,
            inverse: to_device.invert()?,
        })
    }

    pub fn color_at(&self, p: (f64, f64)) -> Option<Color> {
        let q = self.inverse.apply(p.0, p.1);
        self.shading.color_at(q).or(self.shading.background())
    }
}
