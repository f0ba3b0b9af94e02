use crate::logo::Quality;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_MAX_WIDTH: f64 = 150.0;
pub const DEFAULT_PADDING: f64 = 20.0;
/// Extra room added to each background dimension when none is configured (20 per side).
pub const DEFAULT_BG_MARGIN: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
    Center,
    Custom,
}

impl Position {
    pub const ALL: [Position; 6] = [
        Position::BottomRight,
        Position::BottomLeft,
        Position::TopRight,
        Position::TopLeft,
        Position::Center,
        Position::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::BottomRight => "bottom-right",
            Position::BottomLeft => "bottom-left",
            Position::TopRight => "top-right",
            Position::TopLeft => "top-left",
            Position::Center => "center",
            Position::Custom => "custom",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Position::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| {
                anyhow!(
                    "unknown position '{}' (expected one of: bottom-right, bottom-left, top-right, top-left, center, custom)",
                    s
                )
            })
    }
}

/// Region of a page to sample, in points, measured from the page's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SampleRegion {
    /// The 10x10 patch 200pt in from the right edge and 15pt below the top.
    pub fn default_for_page(page_width: f64) -> Self {
        SampleRegion {
            x: page_width - 200.0,
            y: 15.0,
            width: 10.0,
            height: 10.0,
        }
    }

    /// Finite corner, finite positive size.
    pub fn validate(&self) -> Result<()> {
        if !(self.x.is_finite() && self.y.is_finite()) {
            return Err(anyhow!("sample region x and y must be finite numbers"));
        }
        if !(self.width.is_finite() && self.width > 0.0 && self.height.is_finite() && self.height > 0.0) {
            return Err(anyhow!("sample region width and height must be positive"));
        }
        Ok(())
    }
}

impl FromStr for SampleRegion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| anyhow!("sample region must be four numbers: x,y,width,height"))?;
        match parts[..] {
            [x, y, width, height] => {
                let region = SampleRegion {
                    x,
                    y,
                    width,
                    height,
                };
                region.validate()?;
                Ok(region)
            }
            _ => Err(anyhow!("sample region must be four numbers: x,y,width,height")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub max_width: f64,
    pub position: Position,
    pub padding: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_height: Option<f64>,
    /// Opacity of the background panel, 0.0 to 1.0.
    pub opacity: f64,
    /// Counter-clockwise rotation of the logo in degrees.
    pub rotation: f64,
    /// Encoding of the embedded logo: `lossless` or a JPEG quality 1-100.
    pub quality: Quality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_region: Option<SampleRegion>,
}

impl Default for LogoConfig {
    fn default() -> Self {
        LogoConfig {
            width: None,
            height: None,
            max_width: DEFAULT_MAX_WIDTH,
            position: Position::default(),
            padding: DEFAULT_PADDING,
            x: None,
            y: None,
            bg_width: None,
            bg_height: None,
            opacity: 1.0,
            rotation: 0.0,
            quality: Quality::Lossless,
            sample_region: None,
        }
    }
}

impl LogoConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: LogoConfig = toml::from_str(s).context("invalid logo configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("could not serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("max_width", Some(self.max_width)),
            ("bg_width", self.bg_width),
            ("bg_height", self.bg_height),
        ];
        for (name, value) in positive {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(anyhow!("{} must be a positive number, got {}", name, v));
                }
            }
        }
        if !(self.padding.is_finite() && self.padding >= 0.0) {
            return Err(anyhow!("padding must be zero or positive, got {}", self.padding));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(anyhow!("opacity must be between 0 and 1, got {}", self.opacity));
        }
        if !self.rotation.is_finite() {
            return Err(anyhow!("rotation must be a finite number of degrees"));
        }
        for (name, value) in [("x", self.x), ("y", self.y)] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(anyhow!("{} must be a finite number, got {}", name, v));
                }
            }
        }
        if let Some(region) = &self.sample_region {
            region.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageSelection {
    #[default]
    All,
    /// 0-indexed page numbers.
    Pages(Vec<usize>),
}

impl PageSelection {
    pub fn is_all(&self) -> bool {
        matches!(self, PageSelection::All)
    }

    pub fn contains(&self, index: usize) -> bool {
        match self {
            PageSelection::All => true,
            PageSelection::Pages(pages) => pages.contains(&index),
        }
    }
}

impl FromStr for PageSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let mut pages = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let index: usize = part
                .parse()
                .map_err(|_| anyhow!("--pages must be 'all' or a comma list of page indices, got '{}'", part))?;
            if !pages.contains(&index) {
                pages.push(index);
            }
        }
        if pages.is_empty() {
            return Err(anyhow!("--pages must name at least one page"));
        }
        Ok(PageSelection::Pages(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn position_names_round_trip() {
        for p in Position::ALL {
            assert_eq!(p.as_str().parse::<Position>().unwrap(), p);
        }
        assert!("middle".parse::<Position>().is_err());
    }

    #[test]
    fn defaults_match_form_defaults() {
        let c = LogoConfig::default();
        assert_eq!(c.max_width, 150.0);
        assert_eq!(c.padding, 20.0);
        assert_eq!(c.position, Position::BottomRight);
        assert_eq!(c.opacity, 1.0);
        assert_eq!(c.rotation, 0.0);
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let c = LogoConfig::from_toml_str("width = 100.0\nposition = \"center\"\n").unwrap();
        assert_eq!(c.width, Some(100.0));
        assert_eq!(c.height, None);
        assert_eq!(c.position, Position::Center);
        assert_eq!(c.padding, 20.0);
    }

    #[test]
    fn toml_rejects_bad_values() {
        assert!(LogoConfig::from_toml_str("opacity = 1.5\n").is_err());
        assert!(LogoConfig::from_toml_str("quality = \"best\"\n").is_err());
        assert!(LogoConfig::from_toml_str("position = \"sideways\"\n").is_err());
    }

    #[test]
    fn dumped_config_parses_back() {
        let c = LogoConfig {
            position: Position::Custom,
            x: Some(10.0),
            y: Some(12.0),
            quality: Quality::Jpeg(90),
            ..LogoConfig::default()
        };
        let text = c.to_toml_string().unwrap();
        assert_eq!(LogoConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn page_selection_parsing() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!(
            "0, 2,2,5".parse::<PageSelection>().unwrap(),
            PageSelection::Pages(vec![0, 2, 5])
        );
        assert!("first".parse::<PageSelection>().is_err());
        assert!("".parse::<PageSelection>().is_err());
    }

    #[test]
    fn sample_region_parsing() {
        let r: SampleRegion = "5,6,7,8".parse().unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (5.0, 6.0, 7.0, 8.0));
        assert!("1,2,3".parse::<SampleRegion>().is_err());
        assert!("1,2,0,3".parse::<SampleRegion>().is_err());
        assert!("1,2,NaN,4".parse::<SampleRegion>().is_err());
        assert!("inf,2,3,4".parse::<SampleRegion>().is_err());
    }

    #[test]
    fn toml_sample_region_and_coordinates_are_checked() {
        let ok = "[sample_region]\nx = 1.0\ny = 2.0\nwidth = 3.0\nheight = 4.0\n";
        assert!(LogoConfig::from_toml_str(ok).is_ok());

        let flat = "[sample_region]\nx = 1.0\ny = 2.0\nwidth = 0.0\nheight = 4.0\n";
        assert!(LogoConfig::from_toml_str(flat).is_err());
        let nan = "[sample_region]\nx = 1.0\ny = 2.0\nwidth = nan\nheight = 4.0\n";
        assert!(LogoConfig::from_toml_str(nan).is_err());

        assert!(LogoConfig::from_toml_str("position = \"custom\"\nx = nan\ny = 3.0\n").is_err());
        assert!(LogoConfig::from_toml_str("position = \"custom\"\nx = 2.0\ny = -inf\n").is_err());
    }
}
