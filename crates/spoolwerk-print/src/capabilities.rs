// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print settings validation against device capabilities.
//
// Corrects settings a device would certainly refuse (colour on a monochrome
// device, duplex on a simplex one, paper it does not stock) before they are
// applied, and reports every change it made.

use tracing::{debug, info};

use spoolwerk_core::types::{
    ColorMode, DeviceCapabilities, DuplexMode, FitToPage, PaperSize, PrintSettings,
};

/// A notice about a setting that was auto-corrected.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionNotice {
    /// Which setting was changed.
    pub field: &'static str,
    /// What the job originally asked for.
    pub original: String,
    /// What it was changed to.
    pub corrected: String,
    /// Why it was changed.
    pub reason: String,
}

/// Correct `settings` to fit `caps`.
///
/// Returns the corrected settings and the list of changes. Unknown
/// capabilities (an empty paper list) never cause a correction.
pub fn auto_correct_settings(
    settings: &PrintSettings,
    caps: &DeviceCapabilities,
) -> (PrintSettings, Vec<CorrectionNotice>) {
    let mut corrected = settings.clone();
    let mut notices = Vec::new();

    if settings.color_mode == ColorMode::Color && !caps.color {
        notices.push(CorrectionNotice {
            field: "Colour",
            original: "color".into(),
            corrected: "grayscale".into(),
            reason: "This device only prints in black and white.".into(),
        });
        corrected.color_mode = ColorMode::Grayscale;
    }

    if settings.duplex != DuplexMode::None && !caps.duplex {
        notices.push(CorrectionNotice {
            field: "Duplex",
            original: settings.duplex.keyword().into(),
            corrected: DuplexMode::None.keyword().into(),
            reason: "This device only prints one-sided.".into(),
        });
        corrected.duplex = DuplexMode::None;
    }

    if !caps.paper_sizes.is_empty() && !caps.paper_sizes.contains(&settings.paper_size) {
        if let Some(fallback) = find_closest_paper(&settings.paper_size, &caps.paper_sizes) {
            notices.push(CorrectionNotice {
                field: "Paper size",
                original: format!("{:?}", settings.paper_size),
                corrected: format!("{:?}", fallback),
                reason: format!(
                    "This device doesn't stock {:?}; the document is scaled to fit.",
                    settings.paper_size
                ),
            });
            corrected.paper_size = fallback;
            if corrected.fit_to_page == FitToPage::ActualSize
                || corrected.fit_to_page == FitToPage::None
            {
                corrected.fit_to_page = FitToPage::FitToPaper;
            }
        }
    }

    if notices.is_empty() {
        debug!("print settings valid for device capabilities");
    } else {
        info!(
            corrections = notices.len(),
            "auto-corrected print settings for device capabilities"
        );
    }

    (corrected, notices)
}

/// Closest supported size by area.
fn find_closest_paper(requested: &PaperSize, supported: &[PaperSize]) -> Option<PaperSize> {
    let (req_w, req_h) = requested.dimensions_mm();
    let req_area = i64::from(req_w) * i64::from(req_h);
    supported
        .iter()
        .min_by_key(|p| {
            let (w, h) = p.dimensions_mm();
            (i64::from(w) * i64::from(h) - req_area).unsigned_abs()
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(color: bool, duplex: bool, paper_sizes: Vec<PaperSize>) -> DeviceCapabilities {
        DeviceCapabilities {
            color,
            duplex,
            paper_sizes,
        }
    }

    #[test]
    fn valid_settings_pass() {
        let (corrected, notices) =
            auto_correct_settings(&PrintSettings::default(), &caps(true, true, vec![]));
        assert!(notices.is_empty());
        assert_eq!(corrected, PrintSettings::default());
    }

    #[test]
    fn colour_corrected_on_mono_device() {
        let (corrected, notices) =
            auto_correct_settings(&PrintSettings::default(), &caps(false, true, vec![]));
        assert_eq!(corrected.color_mode, ColorMode::Grayscale);
        assert_eq!(notices[0].field, "Colour");
    }

    #[test]
    fn black_white_is_left_alone_on_mono_device() {
        let settings = PrintSettings {
            color_mode: ColorMode::BlackWhite,
            ..PrintSettings::default()
        };
        let (corrected, notices) = auto_correct_settings(&settings, &caps(false, false, vec![]));
        assert!(notices.is_empty());
        assert_eq!(corrected.color_mode, ColorMode::BlackWhite);
    }

    #[test]
    fn duplex_corrected_on_simplex_device() {
        let settings = PrintSettings {
            duplex: DuplexMode::Vertical,
            ..PrintSettings::default()
        };
        let (corrected, notices) = auto_correct_settings(&settings, &caps(true, false, vec![]));
        assert_eq!(corrected.duplex, DuplexMode::None);
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn unsupported_paper_falls_back_and_fits() {
        let settings = PrintSettings {
            paper_size: PaperSize::A3,
            fit_to_page: FitToPage::ActualSize,
            ..PrintSettings::default()
        };
        let supported = vec![PaperSize::A4, PaperSize::Letter, PaperSize::Tabloid];
        let (corrected, notices) = auto_correct_settings(&settings, &caps(true, true, supported));
        assert_eq!(corrected.paper_size, PaperSize::Tabloid);
        assert_eq!(corrected.fit_to_page, FitToPage::FitToPaper);
        assert_eq!(notices[0].field, "Paper size");
    }
}
