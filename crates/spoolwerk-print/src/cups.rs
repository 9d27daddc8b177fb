// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CUPS spooler backend.
//
// Drives the local CUPS scheduler through its command-line tools (`lpstat`,
// `lpoptions`, `lp`). Page documents are composed into PNG sheets in a
// scratch directory and submitted as a single multi-file job when the
// document is closed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{
    ColorMode, DeviceCapabilities, DuplexMode, Orientation, PaperSize, PrintQuality,
};
use spoolwerk_document::{PageGeometry, Rect, layout};

use crate::spooler::{DeviceSettings, DocHandle, HostDevice, HostStatus, Spooler, flags};

/// Upper bound on any single CUPS tool invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

struct OpenDoc {
    device: String,
    dir: TempDir,
    pages: Vec<PathBuf>,
}

/// Spooler backed by the local CUPS installation.
pub struct CupsSpooler {
    docs: Mutex<HashMap<u64, OpenDoc>>,
    next_doc: AtomicU64,
}

impl Default for CupsSpooler {
    fn default() -> Self {
        Self::new()
    }
}

impl CupsSpooler {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            next_doc: AtomicU64::new(1),
        }
    }

    async fn default_destination(&self) -> Option<String> {
        let out = run("lpstat", &["-d"]).await.ok()?;
        // "system default destination: NAME"
        out.lines()
            .find_map(|l| l.split_once(": ").map(|(_, name)| name.trim().to_string()))
            .filter(|name| !name.is_empty())
    }

    async fn capabilities(&self, name: &str) -> DeviceCapabilities {
        match run("lpoptions", &["-p", name, "-l"]).await {
            Ok(out) => parse_capabilities(&out),
            Err(err) => {
                debug!(device = name, error = %err, "no PPD options, assuming defaults");
                DeviceCapabilities::default()
            }
        }
    }
}

#[async_trait]
impl Spooler for CupsSpooler {
    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<HostDevice>> {
        let out = run("lpstat", &["-e"]).await?;
        let default = self.default_destination().await;
        let mut devices = Vec::new();
        for name in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            devices.push(HostDevice {
                name: name.to_string(),
                is_default: default.as_deref() == Some(name),
                capabilities: self.capabilities(name).await,
            });
        }
        info!(count = devices.len(), "enumerated CUPS destinations");
        Ok(devices)
    }

    async fn query(&self, name: &str) -> Result<HostStatus> {
        let printer = run("lpstat", &["-p", name]).await?;
        let jobs = run("lpstat", &["-o", name]).await.unwrap_or_default();
        let active_jobs = jobs.lines().filter(|l| !l.trim().is_empty()).count() as u32;
        Ok(HostStatus {
            flags: parse_printer_flags(&printer),
            active_jobs,
            work_offline: false,
        })
    }

    async fn capture_settings(&self, name: &str) -> Result<DeviceSettings> {
        let out = run("lpoptions", &["-p", name]).await?;
        Ok(parse_settings(&out))
    }

    async fn apply_settings(&self, name: &str, settings: &DeviceSettings) -> Result<()> {
        let mut args = vec!["-p".to_string(), name.to_string()];
        for (key, value) in settings_options(settings) {
            args.push("-o".into());
            args.push(format!("{key}={value}"));
        }
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run("lpoptions", &refs).await?;
        debug!(device = name, "CUPS options applied");
        Ok(())
    }

    async fn start_document(&self, name: &str, title: &str) -> Result<DocHandle> {
        let dir = tempfile::Builder::new()
            .prefix("spoolwerk-doc-")
            .tempdir()?;
        let id = self.next_doc.fetch_add(1, Ordering::Relaxed);
        self.docs.lock().expect("cups docs lock poisoned").insert(
            id,
            OpenDoc {
                device: name.to_string(),
                dir,
                pages: Vec::new(),
            },
        );
        Ok(DocHandle {
            id,
            device: name.to_string(),
            title: title.to_string(),
        })
    }

    async fn draw_page(
        &self,
        doc: &DocHandle,
        page: &DynamicImage,
        geometry: &PageGeometry,
        placement: &Rect,
    ) -> Result<()> {
        let path = {
            let docs = self.docs.lock().expect("cups docs lock poisoned");
            let open = docs
                .get(&doc.id)
                .ok_or_else(|| SpoolError::Host(format!("document {} is not open", doc.id)))?;
            open.dir
                .path()
                .join(format!("page-{:04}.png", open.pages.len() + 1))
        };

        let page = page.clone();
        let geometry = *geometry;
        let placement = *placement;
        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            layout::compose(&page, &geometry, &placement)
                .save(&target)
                .map_err(|e| SpoolError::ImageError(format!("write sheet: {e}")))
        })
        .await
        .map_err(|e| SpoolError::Host(format!("sheet writer panicked: {e}")))??;

        if let Some(open) = self
            .docs
            .lock()
            .expect("cups docs lock poisoned")
            .get_mut(&doc.id)
        {
            open.pages.push(path);
        }
        Ok(())
    }

    async fn end_document(&self, doc: DocHandle) -> Result<()> {
        let open = self
            .docs
            .lock()
            .expect("cups docs lock poisoned")
            .remove(&doc.id)
            .ok_or_else(|| SpoolError::Host(format!("document {} is not open", doc.id)))?;
        if open.pages.is_empty() {
            return Err(SpoolError::Host("document has no pages".into()));
        }
        let mut args = vec![
            "-d".to_string(),
            open.device.clone(),
            "-t".to_string(),
            doc.title.clone(),
        ];
        args.extend(open.pages.iter().map(|p| p.display().to_string()));
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = run("lp", &refs).await?;
        info!(device = %open.device, pages = open.pages.len(), reply = out.trim(), "document submitted");
        // `open.dir` is dropped here; lp has already copied the files.
        Ok(())
    }

    async fn abort_document(&self, doc: DocHandle) {
        if self
            .docs
            .lock()
            .expect("cups docs lock poisoned")
            .remove(&doc.id)
            .is_some()
        {
            debug!(doc = doc.id, "document aborted");
        }
    }

    async fn write_raw(&self, name: &str, title: &str, data: &[u8]) -> Result<()> {
        let file = tempfile::Builder::new()
            .prefix("spoolwerk-raw-")
            .tempfile()?;
        tokio::fs::write(file.path(), data).await?;
        let path = file.path().display().to_string();
        run("lp", &["-d", name, "-o", "raw", "-t", title, path.as_str()]).await?;
        info!(device = name, bytes = data.len(), "raw job submitted");
        Ok(())
    }
}

/// Run a CUPS tool and return its stdout.
async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = tokio::time::timeout(COMMAND_TIMEOUT, Command::new(program).args(args).output())
        .await
        .map_err(|_| {
            SpoolError::Timeout(format!(
                "{program} did not finish within {}s",
                COMMAND_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| SpoolError::Host(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(program, status = %output.status, stderr = stderr.trim(), "CUPS command failed");
        return Err(SpoolError::Host(format!("{program}: {}", stderr.trim())));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Fold `lpstat -p` output into spooler status bits.
fn parse_printer_flags(out: &str) -> u32 {
    let text = out.to_ascii_lowercase();
    let mut bits = 0;
    if text.contains(" disabled") {
        bits |= flags::PAUSED;
    }
    if text.contains("now printing") {
        bits |= flags::PRINTING;
    }
    for (needle, bit) in [
        ("offline", flags::OFFLINE),
        ("media-jam", flags::PAPER_JAM),
        ("media-empty", flags::PAPER_OUT),
        ("media-needed", flags::PAPER_OUT),
        ("door-open", flags::DOOR_OPEN),
        ("toner-empty", flags::NO_TONER),
        ("marker-supply-empty", flags::NO_TONER),
        ("output-area-full", flags::OUTPUT_BIN_FULL),
    ] {
        if text.contains(needle) {
            bits |= bit;
        }
    }
    if text.lines().any(|l| l.trim_end().ends_with("-error")) {
        bits |= flags::ERROR;
    }
    bits
}

/// Parse `lpoptions -p NAME -l` (PPD option listing).
fn parse_capabilities(out: &str) -> DeviceCapabilities {
    let mut caps = DeviceCapabilities::default();
    for line in out.lines() {
        let Some((key, values)) = line.split_once(':') else {
            continue;
        };
        let key = key.split('/').next().unwrap_or(key).trim();
        let values: Vec<&str> = values
            .split_whitespace()
            .map(|v| v.trim_start_matches('*'))
            .collect();
        match key {
            "ColorModel" => {
                caps.color = values
                    .iter()
                    .any(|v| !v.eq_ignore_ascii_case("gray") && !v.eq_ignore_ascii_case("black"));
            }
            "Duplex" => {
                caps.duplex = values.iter().any(|v| v.starts_with("Duplex"));
            }
            "PageSize" => {
                caps.paper_sizes = values.iter().filter_map(|v| v.parse().ok()).collect();
            }
            _ => {}
        }
    }
    caps
}

/// Parse `lpoptions -p NAME` (space-separated `key=value` pairs).
fn parse_settings(out: &str) -> DeviceSettings {
    let mut settings = DeviceSettings::default();
    for pair in out.split_whitespace() {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('\'');
        match key {
            "copies" => settings.copies = value.parse().unwrap_or(settings.copies),
            "media" | "PageSize" => {
                if let Ok(paper) = value.parse() {
                    settings.paper_size = paper;
                }
            }
            "sides" => {
                settings.duplex = match value {
                    "two-sided-long-edge" => DuplexMode::Vertical,
                    "two-sided-short-edge" => DuplexMode::Horizontal,
                    _ => DuplexMode::None,
                }
            }
            "print-color-mode" => {
                settings.color_mode = if value == "monochrome" {
                    ColorMode::Grayscale
                } else {
                    ColorMode::Color
                }
            }
            "orientation-requested" => {
                settings.orientation = if value == "4" {
                    Orientation::Landscape
                } else {
                    Orientation::Portrait
                }
            }
            "print-quality" => {
                settings.quality = match value {
                    "3" => PrintQuality::Draft,
                    "5" => PrintQuality::High,
                    _ => PrintQuality::Normal,
                }
            }
            "scaling" => settings.scale = value.parse().unwrap_or(settings.scale),
            _ => {}
        }
    }
    settings
}

/// CUPS job options for a settings block.
fn settings_options(settings: &DeviceSettings) -> Vec<(&'static str, String)> {
    let quality = match settings.quality {
        PrintQuality::Draft => "3",
        PrintQuality::Normal => "4",
        PrintQuality::High | PrintQuality::Photo => "5",
    };
    let orientation = match settings.orientation {
        Orientation::Portrait => "3",
        Orientation::Landscape => "4",
    };
    let color = if settings.color_mode.is_monochrome() {
        "monochrome"
    } else {
        "color"
    };
    vec![
        ("copies", settings.copies.to_string()),
        ("media", settings.paper_size.media_keyword()),
        ("sides", settings.duplex.sides_keyword().to_string()),
        ("print-color-mode", color.to_string()),
        ("orientation-requested", orientation.to_string()),
        ("print-quality", quality.to_string()),
        ("scaling", settings.scale.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lpstat_idle_printer_has_no_flags() {
        let out = "printer Office_Laser is idle.  enabled since Mon 01 Jan 2026\n";
        assert_eq!(parse_printer_flags(out), 0);
    }

    #[test]
    fn lpstat_reasons_map_to_flags() {
        let out = "printer Office_Laser disabled since Mon 01 Jan 2026 -\n\tmedia-jam-error\n";
        let bits = parse_printer_flags(out);
        assert_ne!(bits & flags::PAUSED, 0);
        assert_ne!(bits & flags::PAPER_JAM, 0);
        assert_ne!(bits & flags::ERROR, 0);
    }

    #[test]
    fn ppd_listing_capabilities() {
        let out = "PageSize/Media Size: *A4 Letter Legal Env10\n\
                   ColorModel/Color Model: *Gray\n\
                   Duplex/2-Sided Printing: *None DuplexNoTumble DuplexTumble\n";
        let caps = parse_capabilities(out);
        assert!(!caps.color);
        assert!(caps.duplex);
        assert_eq!(
            caps.paper_sizes,
            vec![PaperSize::A4, PaperSize::Letter, PaperSize::Legal]
        );
    }

    #[test]
    fn captured_options_match_applied_ones() {
        let settings = DeviceSettings {
            color_mode: ColorMode::Grayscale,
            copies: 3,
            paper_size: PaperSize::Letter,
            orientation: Orientation::Landscape,
            quality: PrintQuality::High,
            duplex: DuplexMode::Vertical,
            scale: 80,
        };
        let line = settings_options(&settings)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(parse_settings(&line), settings);
    }
}
