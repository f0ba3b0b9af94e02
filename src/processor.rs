use crate::compositor;
use crate::config::{LogoConfig, PageSelection};
use crate::logo::{EmbeddedLogo, LogoImage};
use crate::pdf;
use crate::placement::Placement;
use crate::sampler::{self, Color};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use lopdf::{Document, ObjectId};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPage {
    pub index: usize,
    pub color: Color,
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessReport {
    pub page_count: usize,
    pub pages: Vec<ProcessedPage>,
}

impl ProcessReport {
    pub fn processed(&self) -> usize {
        self.pages.len()
    }
}

/// Places the logo on the selected pages of `source` and returns the modified copy.
///
/// The panel colour is sampled from the first page. When every page is
/// selected, each later page is sampled again on its own; with an explicit
/// page list the first page's colour is used throughout.
pub fn process_document(
    source: &Document,
    logo: &LogoImage,
    selection: &PageSelection,
    config: &LogoConfig,
) -> Result<(Document, ProcessReport)> {
    config.validate()?;
    let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(anyhow!("the document has no pages"));
    }
    if let PageSelection::Pages(wanted) = selection {
        for &index in wanted.iter().filter(|&&i| i >= page_ids.len()) {
            warn!("page index {} is past the end of the document ({} pages), ignoring", index, page_ids.len());
        }
    }

    let mut output = source.clone();
    let mut embedded: Option<EmbeddedLogo> = None;
    let mut color = sampler::sample_page_color(source, 0, config.sample_region)
        .context("could not sample the background colour of the first page")?;
    let mut report = ProcessReport {
        page_count: page_ids.len(),
        pages: Vec::new(),
    };

    for (index, &page_id) in page_ids.iter().enumerate() {
        if !selection.contains(index) {
            continue;
        }
        if index > 0 && selection.is_all() {
            color = sampler::sample_page_color(source, index, config.sample_region)
                .with_context(|| format!("could not sample the background colour of page {}", index + 1))?;
        }

        let logo_ref = match embedded {
            Some(e) => e,
            None => {
                let e = logo.embed(&mut output, config.quality)?;
                embedded = Some(e);
                e
            }
        };
        let page_box = pdf::page_box(&output, page_id)?;
        let placement = compositor::composite_page(&mut output, page_id, page_box, &logo_ref, color, config)
            .with_context(|| format!("could not place the logo on page {}", index + 1))?;
        debug!(
            "page {}: background {} logo {:.1}x{:.1} at ({:.1}, {:.1})",
            index + 1,
            color,
            placement.logo.width,
            placement.logo.height,
            placement.logo.x,
            placement.logo.y
        );
        report.pages.push(ProcessedPage {
            index,
            color,
            placement,
        });
    }

    Ok((output, report))
}

/// In-memory variant: PDF and logo bytes in, modified PDF bytes out.
pub fn process_pdf_bytes(
    pdf_bytes: &[u8],
    logo_bytes: &[u8],
    selection: &PageSelection,
    config: &LogoConfig,
) -> Result<(Vec<u8>, ProcessReport)> {
    let source = Document::load_mem(pdf_bytes).context("could not read the PDF document")?;
    let logo = LogoImage::from_bytes(logo_bytes)?;
    let (mut output, report) = process_document(&source, &logo, selection, config)?;

    let mut buf = Vec::new();
    output.save_to(&mut buf).context("could not write the PDF document")?;
    info!("Processed {} of {} pages", report.processed(), report.page_count);
    Ok((buf, report))
}

#[cfg(not(target_arch = "wasm32"))]
pub fn process_pdf_with_logo(
    input: &std::path::Path,
    output: &std::path::Path,
    logo_path: &std::path::Path,
    selection: &PageSelection,
    config: &LogoConfig,
) -> Result<ProcessReport> {
    let source = Document::load(input).context("could not read the PDF document")?;
    let logo = LogoImage::open(logo_path)?;
    let (mut doc, report) = process_document(&source, &logo, selection, config)?;

    doc.save(output)
        .with_context(|| format!("could not write {}", output.display()))?;
    let size = std::fs::metadata(output)?.len();
    info!(
        "Modified PDF saved to {} ({:.1} KB)",
        output.display(),
        size as f64 / 1024.0
    );
    info!("Processed {} of {} pages", report.processed(), report.page_count);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Position;
    use crate::test_support::{png_bytes, PdfBuilder};
    use pretty_assertions::assert_eq;

    fn tinted_pages() -> Vec<u8> {
        PdfBuilder::new()
            .page(612.0, 792.0, "1 0 0 rg 0 0 612 792 re f")
            .page(612.0, 792.0, "0 1 0 rg 0 0 612 792 re f")
            .page(612.0, 792.0, "0 0 1 rg 0 0 612 792 re f")
            .build_bytes()
    }

    fn logo() -> Vec<u8> {
        png_bytes(200, 100, [0, 0, 0, 255])
    }

    #[test]
    fn letter_page_bottom_right_scenario() {
        let pdf = PdfBuilder::new().page(612.0, 792.0, "").build_bytes();
        let config = LogoConfig {
            max_width: 150.0,
            position: Position::BottomRight,
            padding: 20.0,
            ..LogoConfig::default()
        };
        let (_, report) = process_pdf_bytes(&pdf, &logo(), &PageSelection::All, &config).unwrap();
        let logo_rect = report.pages[0].placement.logo;
        assert_eq!(
            (logo_rect.width, logo_rect.height, logo_rect.x, logo_rect.y),
            (150.0, 75.0, 442.0, 20.0)
        );
    }

    #[test]
    fn all_pages_keeps_page_count_and_resamples_each_page() {
        let (out, report) =
            process_pdf_bytes(&tinted_pages(), &logo(), &PageSelection::All, &LogoConfig::default()).unwrap();
        assert_eq!(report.page_count, 3);
        assert_eq!(report.processed(), 3);
        let colors: Vec<Color> = report.pages.iter().map(|p| p.color).collect();
        assert_eq!(
            colors,
            vec![
                Color::new(1.0, 0.0, 0.0),
                Color::new(0.0, 1.0, 0.0),
                Color::new(0.0, 0.0, 1.0)
            ]
        );

        let reloaded = Document::load_mem(&out).unwrap();
        assert_eq!(reloaded.get_pages().len(), 3);
    }

    #[test]
    fn explicit_pages_reuse_first_page_color() {
        let selection = PageSelection::Pages(vec![1, 2, 9]);
        let (_, report) =
            process_pdf_bytes(&tinted_pages(), &logo(), &selection, &LogoConfig::default()).unwrap();
        let summary: Vec<(usize, Color)> = report.pages.iter().map(|p| (p.index, p.color)).collect();
        assert_eq!(
            summary,
            vec![(1, Color::new(1.0, 0.0, 0.0)), (2, Color::new(1.0, 0.0, 0.0))]
        );
    }

    #[test]
    fn unselected_pages_are_copied_untouched() {
        let source = Document::load_mem(&tinted_pages()).unwrap();
        let logo = LogoImage::from_bytes(&logo()).unwrap();
        let (output, _) =
            process_document(&source, &logo, &PageSelection::Pages(vec![0]), &LogoConfig::default()).unwrap();

        let untouched = pdf::page_id(&source, 2).unwrap();
        assert_eq!(
            source.get_page_content(untouched).unwrap(),
            output.get_page_content(untouched).unwrap()
        );
        let touched = pdf::page_id(&source, 0).unwrap();
        assert_ne!(
            source.get_page_content(touched).unwrap(),
            output.get_page_content(touched).unwrap()
        );
    }

    #[test]
    fn logo_is_embedded_once_for_all_pages() {
        let source = Document::load_mem(&tinted_pages()).unwrap();
        let logo = LogoImage::from_bytes(&logo()).unwrap();
        let (output, _) = process_document(&source, &logo, &PageSelection::All, &LogoConfig::default()).unwrap();

        let images = output
            .objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .filter(|s| pdf::is_name(&s.dict, b"Subtype", "Image"))
            .count();
        assert_eq!(images, 1);
    }

    #[test]
    fn unreadable_pdf_is_an_error() {
        let err = process_pdf_bytes(b"%PDF-garbage", &logo(), &PageSelection::All, &LogoConfig::default());
        assert!(err.is_err());
    }
}
