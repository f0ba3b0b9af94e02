//! The interactive side of the tool: smart form defaults and submission.

use crate::config::{LogoConfig, PageSelection, Position, DEFAULT_PADDING};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    #[default]
    Default,
    UserSet,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimension {
    pub value: f64,
    pub source: Source,
}

impl Dimension {
    fn default_of(value: f64) -> Self {
        Dimension {
            value,
            source: Source::Default,
        }
    }

    fn user(value: f64) -> Self {
        Dimension {
            value,
            source: Source::UserSet,
        }
    }

    pub fn is_user_set(&self) -> bool {
        self.source == Source::UserSet
    }
}

const DEFAULT_LOGO_SIDE: f64 = 100.0;

/// Width, height and background fields of the form with the defaults linked
/// to the uploaded logo's aspect ratio (width / height).
///
/// Logo dimensions follow each other through the aspect ratio. Background
/// dimensions track `logo + 2 * padding` until the user sets them.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDefaults {
    pub logo_width: Dimension,
    pub logo_height: Dimension,
    pub bg_width: Dimension,
    pub bg_height: Dimension,
    pub aspect: f64,
    pub padding: f64,
}

impl Default for FormDefaults {
    fn default() -> Self {
        FormDefaults {
            logo_width: Dimension::default_of(DEFAULT_LOGO_SIDE),
            logo_height: Dimension::default_of(DEFAULT_LOGO_SIDE),
            bg_width: Dimension::default_of(DEFAULT_LOGO_SIDE + 2.0 * DEFAULT_PADDING),
            bg_height: Dimension::default_of(DEFAULT_LOGO_SIDE + 2.0 * DEFAULT_PADDING),
            aspect: 1.0,
            padding: DEFAULT_PADDING,
        }
    }
}

impl FormDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logo of `width x height` pixels was uploaded.
    pub fn logo_loaded(&mut self, width: u32, height: u32) {
        self.aspect = if height == 0 {
            1.0
        } else {
            width as f64 / height as f64
        };

        if self.logo_width.is_user_set() {
            self.logo_height.value = (self.logo_width.value / self.aspect).trunc();
        } else if self.logo_height.is_user_set() {
            self.logo_width.value = (self.logo_height.value * self.aspect).trunc();
        } else {
            self.logo_width = Dimension::default_of(DEFAULT_LOGO_SIDE);
            self.logo_height = Dimension::default_of((DEFAULT_LOGO_SIDE / self.aspect).trunc());
        }
        self.refresh_background();
    }

    pub fn set_logo_width(&mut self, width: f64) {
        self.logo_width = Dimension::user(width);
        self.logo_height.value = (width / self.aspect).trunc();
        self.refresh_background();
    }

    pub fn set_logo_height(&mut self, height: f64) {
        self.logo_height = Dimension::user(height);
        self.logo_width.value = (height * self.aspect).trunc();
        self.refresh_background();
    }

    pub fn set_padding(&mut self, padding: f64) {
        self.padding = padding;
        self.refresh_background();
    }

    pub fn set_bg_width(&mut self, width: f64) {
        self.bg_width = Dimension::user(width);
    }

    pub fn set_bg_height(&mut self, height: f64) {
        self.bg_height = Dimension::user(height);
    }

    fn refresh_background(&mut self) {
        if !self.bg_width.is_user_set() {
            self.bg_width.value = self.logo_width.value + 2.0 * self.padding;
        }
        if !self.bg_height.is_user_set() {
            self.bg_height.value = self.logo_height.value + 2.0 * self.padding;
        }
    }

    /// The configuration the form submits.
    pub fn to_config(&self, position: Position, custom: Option<(f64, f64)>, opacity: f64, rotation: f64) -> LogoConfig {
        let (x, y) = match (position, custom) {
            (Position::Custom, Some((x, y))) => (Some(x), Some(y)),
            _ => (None, None),
        };
        LogoConfig {
            width: Some(self.logo_width.value),
            height: Some(self.logo_height.value),
            position,
            padding: self.padding,
            x,
            y,
            bg_width: Some(self.bg_width.value),
            bg_height: Some(self.bg_height.value),
            opacity,
            rotation,
            ..LogoConfig::default()
        }
    }
}

/// An uploaded file as received from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The processed document offered back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Please upload both a PDF document and a logo image.")]
    MissingUpload,

    #[error("An error occurred: {0:#}")]
    Processing(#[from] anyhow::Error),
}

pub fn output_file_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("document.pdf");
    format!("modified_{}", base)
}

/// Runs one submission of the form: both files are staged in temporary
/// files, processed, and the result read back. Every temporary file is gone
/// by the time this returns, whether processing succeeded or not.
#[cfg(not(target_arch = "wasm32"))]
pub fn submit(
    pdf: Option<&Upload>,
    logo: Option<&Upload>,
    selection: &PageSelection,
    config: &LogoConfig,
) -> Result<Download, SessionError> {
    let (Some(pdf), Some(logo)) = (pdf, logo) else {
        return Err(SessionError::MissingUpload);
    };
    staged::run(pdf, logo, selection, config).map_err(SessionError::Processing)
}

#[cfg(not(target_arch = "wasm32"))]
mod staged {
    use super::{output_file_name, Download, Upload};
    use crate::config::{LogoConfig, PageSelection};
    use crate::processor;
    use anyhow::{Context, Result};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn stage(upload: &Upload, suffix: &str) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("logo-placer-")
            .suffix(suffix)
            .tempfile()
            .context("could not create a temporary file")?;
        file.write_all(&upload.bytes)
            .with_context(|| format!("could not stage {}", upload.file_name))?;
        file.flush()?;
        Ok(file)
    }

    pub(super) fn run(
        pdf: &Upload,
        logo: &Upload,
        selection: &PageSelection,
        config: &LogoConfig,
    ) -> Result<Download> {
        let pdf_file = stage(pdf, ".pdf")?;
        let logo_file = stage(logo, ".png")?;
        let out_dir = tempfile::tempdir().context("could not create a temporary directory")?;

        let file_name = output_file_name(&pdf.file_name);
        let output_path = out_dir.path().join(&file_name);

        processor::process_pdf_with_logo(pdf_file.path(), &output_path, logo_file.path(), selection, config)?;
        let bytes = std::fs::read(&output_path)
            .with_context(|| format!("could not read back {}", output_path.display()))?;
        log::debug!("staged files for {} cleaned up", file_name);
        Ok(Download { file_name, bytes })
    }
}
