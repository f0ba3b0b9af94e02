use crate::config::{LogoConfig, Position, DEFAULT_BG_MARGIN};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Where the logo and its backing panel go on a page, in page units with a
/// bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub logo: Rect,
    pub background: Rect,
}

/// Final logo size from its natural pixel size.
///
/// With no width or height configured the logo keeps its natural size unless
/// it is wider than `max_width`, in which case it is scaled down to fit. With
/// exactly one of them configured the other follows the natural aspect ratio.
pub fn logo_size(natural: (u32, u32), config: &LogoConfig) -> (f64, f64) {
    let (nat_w, nat_h) = (natural.0 as f64, natural.1 as f64);

    match (config.width, config.height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if nat_w > 0.0 => (w, nat_h * (w / nat_w)),
        (None, Some(h)) if nat_h > 0.0 => (nat_w * (h / nat_h), h),
        (None, None) if nat_w > config.max_width => {
            let scale = config.max_width / nat_w;
            (config.max_width, nat_h * scale)
        }
        _ => (nat_w, nat_h),
    }
}

/// Lower-left corner of a logo of the given size for the configured position mode.
pub fn logo_origin(size: (f64, f64), page: (f64, f64), config: &LogoConfig) -> (f64, f64) {
    let (w, h) = size;
    let (page_w, page_h) = page;
    let pad = config.padding;

    match config.position {
        Position::BottomRight => (page_w - w - pad, pad),
        Position::BottomLeft => (pad, pad),
        Position::TopRight => (page_w - w - pad, page_h - h - pad),
        Position::TopLeft => (pad, page_h - h - pad),
        Position::Center => ((page_w - w) / 2.0, (page_h - h) / 2.0),
        Position::Custom => (
            config.x.unwrap_or(page_w - w - pad),
            config.y.unwrap_or(pad),
        ),
    }
}

pub fn compute_placement(natural: (u32, u32), page: (f64, f64), config: &LogoConfig) -> Placement {
    let (w, h) = logo_size(natural, config);
    let (x, y) = logo_origin((w, h), page, config);

    let bg_w = config.bg_width.unwrap_or(w + DEFAULT_BG_MARGIN);
    let bg_h = config.bg_height.unwrap_or(h + DEFAULT_BG_MARGIN);

    Placement {
        logo: Rect {
            x,
            y,
            width: w,
            height: h,
        },
        background: Rect {
            x: x - (bg_w - w) / 2.0,
            y: y - (bg_h - h) / 2.0,
            width: bg_w,
            height: bg_h,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LETTER: (f64, f64) = (612.0, 792.0);

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn wide_logo_is_capped_at_max_width() {
        let config = LogoConfig::default();
        let p = compute_placement((200, 100), LETTER, &config);
        assert_eq!(
            p.logo,
            Rect {
                x: 442.0,
                y: 20.0,
                width: 150.0,
                height: 75.0
            }
        );
    }

    #[test]
    fn narrow_logo_keeps_natural_size() {
        let config = LogoConfig::default();
        assert_eq!(logo_size((120, 60), &config), (120.0, 60.0));
        assert_eq!(logo_size((150, 60), &config), (150.0, 60.0));
    }

    #[test]
    fn width_only_derives_height_from_aspect() {
        let config = LogoConfig {
            width: Some(100.0),
            position: Position::Center,
            ..LogoConfig::default()
        };
        let p = compute_placement((100, 100), LETTER, &config);
        assert_eq!(p.logo.height, 100.0);
        assert_eq!((p.logo.x, p.logo.y), (256.0, 346.0));
    }

    #[test]
    fn single_dimension_preserves_aspect_ratio() {
        let naturals = [(200, 100), (37, 91), (640, 480), (1, 999), (333, 333)];
        for natural in naturals {
            let ratio = natural.0 as f64 / natural.1 as f64;
            for v in [10.0, 33.3, 150.0, 512.0] {
                let by_w = LogoConfig {
                    width: Some(v),
                    ..LogoConfig::default()
                };
                let (w, h) = logo_size(natural, &by_w);
                assert!(approx(w / h, ratio), "{:?} width={}", natural, v);

                let by_h = LogoConfig {
                    height: Some(v),
                    ..LogoConfig::default()
                };
                let (w, h) = logo_size(natural, &by_h);
                assert_eq!(h, v);
                assert!(approx(w / h, ratio), "{:?} height={}", natural, v);
            }
        }
    }

    #[test]
    fn both_dimensions_are_used_verbatim() {
        let config = LogoConfig {
            width: Some(80.0),
            height: Some(20.0),
            ..LogoConfig::default()
        };
        assert_eq!(logo_size((200, 100), &config), (80.0, 20.0));
    }

    #[test]
    fn anchored_modes_stay_inside_padded_page() {
        let pages = [LETTER, (595.28, 841.89), (1376.0, 768.0)];
        for page in pages {
            for position in Position::ALL {
                if position == Position::Custom {
                    continue;
                }
                for padding in [0.0, 20.0, 55.5] {
                    let config = LogoConfig {
                        position,
                        padding,
                        ..LogoConfig::default()
                    };
                    let p = compute_placement((300, 120), page, &config);
                    let l = p.logo;
                    assert!(l.x >= padding - 1e-9, "{} {:?}", position, page);
                    assert!(l.y >= padding - 1e-9, "{} {:?}", position, page);
                    assert!(l.x + l.width <= page.0 - padding + 1e-9, "{} {:?}", position, page);
                    assert!(l.y + l.height <= page.1 - padding + 1e-9, "{} {:?}", position, page);
                }
            }
        }
    }

    #[test]
    fn corner_origins() {
        let size = (100.0, 50.0);
        let at = |position| {
            let config = LogoConfig {
                position,
                ..LogoConfig::default()
            };
            logo_origin(size, LETTER, &config)
        };
        assert_eq!(at(Position::BottomRight), (492.0, 20.0));
        assert_eq!(at(Position::BottomLeft), (20.0, 20.0));
        assert_eq!(at(Position::TopRight), (492.0, 722.0));
        assert_eq!(at(Position::TopLeft), (20.0, 722.0));
    }

    #[test]
    fn custom_position_ignores_page_size() {
        let config = LogoConfig {
            position: Position::Custom,
            x: Some(10.0),
            y: Some(10.0),
            ..LogoConfig::default()
        };
        for page in [LETTER, (100.0, 100.0), (5000.0, 20.0)] {
            let p = compute_placement((200, 100), page, &config);
            assert_eq!((p.logo.x, p.logo.y), (10.0, 10.0));
        }
    }

    #[test]
    fn custom_position_without_coordinates_falls_back_to_bottom_right() {
        let config = LogoConfig {
            position: Position::Custom,
            ..LogoConfig::default()
        };
        let p = compute_placement((200, 100), LETTER, &config);
        assert_eq!((p.logo.x, p.logo.y), (442.0, 20.0));
    }

    #[test]
    fn background_defaults_to_logo_plus_forty() {
        let p = compute_placement((200, 100), LETTER, &LogoConfig::default());
        assert_eq!(
            p.background,
            Rect {
                x: 422.0,
                y: 0.0,
                width: 190.0,
                height: 115.0
            }
        );
    }

    #[test]
    fn background_is_centered_on_logo() {
        for (bg_w, bg_h) in [(None, None), (Some(10.0), Some(300.0)), (Some(500.0), None)] {
            for position in Position::ALL {
                let config = LogoConfig {
                    position,
                    bg_width: bg_w,
                    bg_height: bg_h,
                    x: Some(33.0),
                    y: Some(44.0),
                    ..LogoConfig::default()
                };
                let p = compute_placement((260, 90), LETTER, &config);
                let (lx, ly) = p.logo.center();
                let (bx, by) = p.background.center();
                assert!(approx(lx, bx) && approx(ly, by), "{} {:?}", position, (bg_w, bg_h));
            }
        }
    }
}
