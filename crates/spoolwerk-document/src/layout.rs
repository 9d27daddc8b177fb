// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page layout: where a rendered page lands on the paper.
//
// All geometry is in device pixels at the rendering resolution. The paper is
// laid out in the job's orientation; margins shrink the printable area and
// the page image is always centred inside it.

use image::{DynamicImage, GrayImage, Rgb, RgbImage, imageops};
use spoolwerk_core::types::{ColorMode, FitToPage, Orientation, PrintSettings};

const MM_PER_INCH: f32 = 25.4;

/// Share of the printable area a `FitToPage` page is allowed to fill.
const FIT_TO_PAGE_FILL: f32 = 0.9;

/// Axis-aligned rectangle in device pixels. The origin may be negative when
/// an oversized page overhangs the printable area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Paper and printable area for one job, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageGeometry {
    pub dpi: u32,
    pub paper_width: u32,
    pub paper_height: u32,
    pub printable: Rect,
}

impl PageGeometry {
    /// Geometry for `settings` at `dpi`.
    pub fn for_settings(settings: &PrintSettings, dpi: u32) -> Self {
        let (mut w_mm, mut h_mm) = settings.paper_size.dimensions_mm();
        if settings.orientation == Orientation::Landscape {
            std::mem::swap(&mut w_mm, &mut h_mm);
        }
        let px = |mm: f32| (mm / MM_PER_INCH * dpi as f32).round().max(0.0);
        let paper_width = px(w_mm as f32) as u32;
        let paper_height = px(h_mm as f32) as u32;

        let m = &settings.margins;
        let left = px(m.left);
        let top = px(m.top);
        let width = (paper_width as f32 - left - px(m.right)).max(1.0) as u32;
        let height = (paper_height as f32 - top - px(m.bottom)).max(1.0) as u32;

        Self {
            dpi,
            paper_width,
            paper_height,
            printable: Rect {
                x: left as i64,
                y: top as i64,
                width,
                height,
            },
        }
    }
}

/// Scale factor for a page of `image_w × image_h` in `area` under `fit`.
pub fn fit_factor(image_w: u32, image_h: u32, area: &Rect, fit: FitToPage) -> f32 {
    if image_w == 0 || image_h == 0 {
        return 1.0;
    }
    let to_paper = (area.width as f32 / image_w as f32).min(area.height as f32 / image_h as f32);
    match fit {
        FitToPage::ActualSize => 1.0,
        FitToPage::FitToPaper => to_paper,
        FitToPage::ShrinkToFit => to_paper.min(1.0),
        FitToPage::FitToPage | FitToPage::None => to_paper * FIT_TO_PAGE_FILL,
    }
}

/// Where a page of `image_w × image_h` lands, after the fit mode and the
/// job's `scale` percentage, centred on the printable area.
pub fn place(image_w: u32, image_h: u32, geometry: &PageGeometry, settings: &PrintSettings) -> Rect {
    let area = geometry.printable;
    let factor = fit_factor(image_w, image_h, &area, settings.fit_to_page)
        * settings.scale as f32
        / 100.0;
    let width = (image_w as f32 * factor).round().max(1.0) as u32;
    let height = (image_h as f32 * factor).round().max(1.0) as u32;
    Rect {
        x: area.x + (i64::from(area.width) - i64::from(width)) / 2,
        y: area.y + (i64::from(area.height) - i64::from(height)) / 2,
        width,
        height,
    }
}

/// Apply the job's colour handling to a rendered page.
pub fn apply_color_mode(image: DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::Color => image,
        ColorMode::Grayscale | ColorMode::BlackWhite => image.grayscale(),
    }
}

/// Paint `page` onto a white sheet the size of the paper at `placement`.
pub fn compose(page: &DynamicImage, geometry: &PageGeometry, placement: &Rect) -> DynamicImage {
    let mut sheet = RgbImage::from_pixel(
        geometry.paper_width.max(1),
        geometry.paper_height.max(1),
        Rgb([255, 255, 255]),
    );
    let scaled = page
        .resize_exact(placement.width, placement.height, imageops::FilterType::Triangle)
        .to_rgb8();
    imageops::overlay(&mut sheet, &scaled, placement.x, placement.y);
    DynamicImage::ImageRgb8(sheet)
}

/// Fit a page onto a fixed-width feed such as a receipt printer: landscape
/// pages are turned a quarter, then anything wider than `max_width` dots is
/// scaled down preserving aspect ratio.
pub fn fit_to_feed(page: &DynamicImage, orientation: Orientation, max_width: u32) -> GrayImage {
    let turned = match orientation {
        Orientation::Portrait => page.clone(),
        Orientation::Landscape => page.rotate90(),
    };
    let gray = turned.to_luma8();
    if gray.width() <= max_width || max_width == 0 {
        return gray;
    }
    let height = (u64::from(gray.height()) * u64::from(max_width) / u64::from(gray.width()))
        .max(1) as u32;
    imageops::resize(&gray, max_width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoolwerk_core::types::{Margins, PaperSize};

    fn settings(fit: FitToPage) -> PrintSettings {
        PrintSettings {
            fit_to_page: fit,
            ..PrintSettings::default()
        }
    }

    #[test]
    fn a4_geometry_at_150_dpi() {
        let geometry = PageGeometry::for_settings(&PrintSettings::default(), 150);
        assert_eq!(geometry.paper_width, 1240);
        assert_eq!(geometry.paper_height, 1754);
        assert_eq!(geometry.printable.width, 1240);
    }

    #[test]
    fn landscape_swaps_paper_axes() {
        let s = PrintSettings {
            orientation: Orientation::Landscape,
            paper_size: PaperSize::A5,
            ..PrintSettings::default()
        };
        let geometry = PageGeometry::for_settings(&s, 100);
        assert!(geometry.paper_width > geometry.paper_height);
    }

    #[test]
    fn margins_shrink_printable_area() {
        let s = PrintSettings {
            margins: Margins {
                top: 25.4,
                bottom: 25.4,
                left: 25.4,
                right: 25.4,
            },
            ..PrintSettings::default()
        };
        let geometry = PageGeometry::for_settings(&s, 100);
        assert_eq!(geometry.printable.x, 100);
        assert_eq!(geometry.printable.y, 100);
        assert_eq!(geometry.printable.width, geometry.paper_width - 200);
    }

    #[test]
    fn fit_modes() {
        let area = Rect {
            x: 0,
            y: 0,
            width: 1000,
            height: 2000,
        };
        assert_eq!(fit_factor(500, 500, &area, FitToPage::ActualSize), 1.0);
        assert_eq!(fit_factor(500, 500, &area, FitToPage::FitToPaper), 2.0);
        assert_eq!(fit_factor(500, 500, &area, FitToPage::ShrinkToFit), 1.0);
        assert_eq!(fit_factor(4000, 500, &area, FitToPage::ShrinkToFit), 0.25);
        assert!((fit_factor(500, 500, &area, FitToPage::FitToPage) - 1.8).abs() < 1e-6);
    }

    #[test]
    fn placement_is_centred() {
        let geometry = PageGeometry {
            dpi: 100,
            paper_width: 1000,
            paper_height: 1000,
            printable: Rect {
                x: 0,
                y: 0,
                width: 1000,
                height: 1000,
            },
        };
        let rect = place(200, 100, &geometry, &settings(FitToPage::ActualSize));
        assert_eq!(rect, Rect { x: 400, y: 450, width: 200, height: 100 });

        let mut half = settings(FitToPage::ActualSize);
        half.scale = 50;
        let rect = place(200, 100, &geometry, &half);
        assert_eq!((rect.width, rect.height), (100, 50));
        assert_eq!((rect.x, rect.y), (450, 475));
    }

    #[test]
    fn oversized_actual_size_overhangs() {
        let geometry = PageGeometry {
            dpi: 100,
            paper_width: 100,
            paper_height: 100,
            printable: Rect {
                x: 0,
                y: 0,
                width: 100,
                height: 100,
            },
        };
        let rect = place(300, 100, &geometry, &settings(FitToPage::ActualSize));
        assert_eq!(rect.x, -100);
    }

    #[test]
    fn feed_rotates_and_narrows() {
        let page = DynamicImage::new_rgb8(300, 1000);
        let fed = fit_to_feed(&page, Orientation::Landscape, 576);
        assert_eq!(fed.width(), 576);
        assert_eq!(fed.height(), 172);

        let narrow = fit_to_feed(&page, Orientation::Portrait, 576);
        assert_eq!((narrow.width(), narrow.height()), (300, 1000));
    }

    #[test]
    fn compose_fills_paper() {
        let geometry = PageGeometry::for_settings(&PrintSettings::default(), 20);
        let page = DynamicImage::new_rgb8(10, 10);
        let placement = place(10, 10, &geometry, &PrintSettings::default());
        let sheet = compose(&page, &geometry, &placement);
        assert_eq!(sheet.width(), geometry.paper_width);
        assert_eq!(sheet.height(), geometry.paper_height);
    }
}
