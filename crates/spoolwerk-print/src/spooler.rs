// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The host spooler seam.
//
// Everything the scheduler knows about devices comes through `Spooler`:
// enumeration, status polling, per-device settings, a page-drawing document
// channel and a raw byte channel. Status is reported as a spooler bitmask
// plus the number of jobs sitting in the device queue, which is also what
// delivery verification watches.

use async_trait::async_trait;
use image::DynamicImage;

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{
    COPIES_RANGE, ColorMode, DeviceCapabilities, DuplexMode, Orientation, PaperSize,
    PrintQuality, PrintSettings, SCALE_RANGE,
};
use spoolwerk_document::{PageGeometry, Rect};

/// Spooler status bits (Win32 `PRINTER_STATUS_*` layout).
pub mod flags {
    pub const PAUSED: u32 = 0x0000_0001;
    pub const ERROR: u32 = 0x0000_0002;
    pub const PAPER_JAM: u32 = 0x0000_0008;
    pub const PAPER_OUT: u32 = 0x0000_0010;
    pub const OFFLINE: u32 = 0x0000_0080;
    pub const BUSY: u32 = 0x0000_0200;
    pub const PRINTING: u32 = 0x0000_0400;
    pub const OUTPUT_BIN_FULL: u32 = 0x0000_0800;
    pub const NOT_AVAILABLE: u32 = 0x0000_1000;
    pub const NO_TONER: u32 = 0x0004_0000;
    pub const USER_INTERVENTION: u32 = 0x0010_0000;
    pub const OUT_OF_MEMORY: u32 = 0x0020_0000;
    pub const DOOR_OPEN: u32 = 0x0040_0000;

    /// Conditions that need a human before the device prints again.
    pub const FAULT_MASK: u32 = ERROR
        | PAPER_JAM
        | PAPER_OUT
        | OUTPUT_BIN_FULL
        | NO_TONER
        | USER_INTERVENTION
        | OUT_OF_MEMORY
        | DOOR_OPEN;

    /// Conditions where the device cannot be reached at all.
    pub const OFFLINE_MASK: u32 = OFFLINE | NOT_AVAILABLE;
}

/// A device as the host enumerates it, before id normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct HostDevice {
    pub name: String,
    pub is_default: bool,
    pub capabilities: DeviceCapabilities,
}

/// One live status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStatus {
    /// Bitmask of [`flags`].
    pub flags: u32,
    /// Jobs currently in the device's queue.
    pub active_jobs: u32,
    /// The operator switched the device to "use offline".
    pub work_offline: bool,
}

/// Host-side device settings: what the driver actually holds, as opposed to
/// what a job asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    pub color_mode: ColorMode,
    pub copies: u32,
    pub paper_size: PaperSize,
    pub orientation: Orientation,
    pub quality: PrintQuality,
    pub duplex: DuplexMode,
    /// Percent.
    pub scale: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::from_job(&PrintSettings::default())
    }
}

impl DeviceSettings {
    /// Driver settings for a job, with copies and scale clamped into range.
    pub fn from_job(settings: &PrintSettings) -> Self {
        Self {
            color_mode: settings.color_mode,
            copies: settings
                .copies
                .clamp(*COPIES_RANGE.start(), *COPIES_RANGE.end()),
            paper_size: settings.paper_size,
            orientation: settings.orientation,
            quality: settings.quality,
            duplex: settings.duplex,
            scale: settings.scale.clamp(*SCALE_RANGE.start(), *SCALE_RANGE.end()),
        }
    }

    /// The settings as DEVMODE-style numeric fields.
    pub fn devmode(&self) -> DevMode {
        DevMode {
            color: if self.color_mode.is_monochrome() { 1 } else { 2 },
            copies: self.copies as i16,
            paper_size: self.paper_size.host_code(),
            paper_mm: match self.paper_size {
                PaperSize::Custom { .. } => Some(self.paper_size.dimensions_mm()),
                _ => None,
            },
            orientation: self.orientation.host_code(),
            print_quality: self.quality.host_code(),
            duplex: self.duplex.host_code(),
            scale: self.scale as i16,
        }
    }
}

/// Numeric driver settings in the Win32 DEVMODE encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevMode {
    /// 1 = monochrome, 2 = colour.
    pub color: i16,
    pub copies: i16,
    /// `None` for custom sizes, which carry `paper_mm` instead.
    pub paper_size: Option<i16>,
    pub paper_mm: Option<(u32, u32)>,
    pub orientation: i16,
    pub print_quality: i16,
    pub duplex: i16,
    pub scale: i16,
}

/// An open page-drawing document on a device.
#[derive(Debug)]
pub struct DocHandle {
    pub id: u64,
    pub device: String,
    pub title: String,
}

/// Access to the host's print spooler.
#[async_trait]
pub trait Spooler: Send + Sync {
    /// Every device the host exposes.
    async fn enumerate(&self) -> Result<Vec<HostDevice>>;

    /// Poll a device's live status.
    async fn query(&self, name: &str) -> Result<HostStatus>;

    /// Current driver settings of a device.
    async fn capture_settings(&self, name: &str) -> Result<DeviceSettings>;

    /// Replace a device's driver settings.
    async fn apply_settings(&self, name: &str, settings: &DeviceSettings) -> Result<()>;

    /// Open a page-drawing document.
    async fn start_document(&self, name: &str, title: &str) -> Result<DocHandle>;

    /// Draw one page image at `placement` on a sheet described by `geometry`.
    async fn draw_page(
        &self,
        doc: &DocHandle,
        page: &DynamicImage,
        geometry: &PageGeometry,
        placement: &Rect,
    ) -> Result<()>;

    /// Close the document and hand it to the device queue.
    async fn end_document(&self, doc: DocHandle) -> Result<()>;

    /// Throw an open document away without printing it.
    async fn abort_document(&self, doc: DocHandle);

    /// Write a raw byte job straight to the device's queue.
    async fn write_raw(&self, name: &str, title: &str, data: &[u8]) -> Result<()>;
}
