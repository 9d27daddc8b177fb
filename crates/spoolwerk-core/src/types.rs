// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk print scheduler.
//
// A `PrintJob` owns its lifecycle: every state change goes through one of the
// transition helpers at the bottom of this file, each of which returns
// `false` (and leaves the job untouched) when the transition is not legal
// from the current status.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpoolError;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| SpoolError::InvalidSettings(format!("job id {s:?}: {e}")))
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Queued, waiting for the worker.
    Pending,
    /// Dequeued; a device is being resolved.
    Processing,
    /// The delivery chain is running against the resolved device.
    Printing,
    /// Held by the operator. Resuming puts the job back to `Pending`.
    Paused,
    /// A delivery strategy was verified by the device.
    Completed,
    /// Terminal failure; the job's `error` field says why.
    Failed,
    /// Cancelled by the operator.
    Cancelled,
}

impl JobStatus {
    /// `Completed`, `Failed` and `Cancelled` never change on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The job currently owns the device.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::Printing)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Printing)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Lowercase keyword used in filters and log output.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for JobStatus {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[
                Self::Pending,
                Self::Processing,
                Self::Printing,
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::keyword,
            "job status",
        )
    }
}

/// Colour handling requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorMode {
    Color,
    Grayscale,
    BlackWhite,
}

impl ColorMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Grayscale => "grayscale",
            Self::BlackWhite => "blackWhite",
        }
    }

    /// Anything other than full colour renders from luma.
    pub fn is_monochrome(&self) -> bool {
        !matches!(self, Self::Color)
    }
}

impl FromStr for ColorMode {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[Self::Color, Self::Grayscale, Self::BlackWhite],
            Self::keyword,
            "color mode",
        )
    }
}

/// Standard paper sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperSize {
    A4,
    A3,
    A5,
    Letter,
    Legal,
    Tabloid,
    Custom { width_mm: u32, height_mm: u32 },
}

impl PaperSize {
    /// Dimensions in millimetres (width, height), portrait.
    pub fn dimensions_mm(&self) -> (u32, u32) {
        match self {
            Self::A4 => (210, 297),
            Self::A3 => (297, 420),
            Self::A5 => (148, 210),
            Self::Letter => (216, 279),
            Self::Legal => (216, 356),
            Self::Tabloid => (279, 432),
            Self::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    /// Host paper code (DEVMODE `dmPaperSize`). `None` for custom sizes,
    /// which are sent as explicit dimensions instead.
    pub fn host_code(&self) -> Option<i16> {
        match self {
            Self::Letter => Some(1),
            Self::Tabloid => Some(3),
            Self::Legal => Some(5),
            Self::A3 => Some(8),
            Self::A4 => Some(9),
            Self::A5 => Some(11),
            Self::Custom { .. } => None,
        }
    }

    /// Media keyword understood by CUPS `-o media=`.
    pub fn media_keyword(&self) -> String {
        match self {
            Self::A4 => "A4".into(),
            Self::A3 => "A3".into(),
            Self::A5 => "A5".into(),
            Self::Letter => "Letter".into(),
            Self::Legal => "Legal".into(),
            Self::Tabloid => "Tabloid".into(),
            Self::Custom {
                width_mm,
                height_mm,
            } => format!("Custom.{width_mm}x{height_mm}mm"),
        }
    }
}

impl FromStr for PaperSize {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // "custom:210x99" is width x height in millimetres.
        if let Some(dims) = trimmed
            .strip_prefix("custom:")
            .or_else(|| trimmed.strip_prefix("Custom:"))
        {
            let (w, h) = dims
                .split_once('x')
                .ok_or_else(|| SpoolError::InvalidSettings(format!("paper size {s:?}")))?;
            let width_mm = w
                .trim()
                .parse()
                .map_err(|_| SpoolError::InvalidSettings(format!("paper width {w:?}")))?;
            let height_mm = h
                .trim()
                .parse()
                .map_err(|_| SpoolError::InvalidSettings(format!("paper height {h:?}")))?;
            return Ok(Self::Custom {
                width_mm,
                height_mm,
            });
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "a4" => Ok(Self::A4),
            "a3" => Ok(Self::A3),
            "a5" => Ok(Self::A5),
            "letter" => Ok(Self::Letter),
            "legal" => Ok(Self::Legal),
            "tabloid" => Ok(Self::Tabloid),
            _ => Err(SpoolError::InvalidSettings(format!("unknown paper size {s:?}"))),
        }
    }
}

/// Page orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// DEVMODE `dmOrientation` value.
    pub fn host_code(&self) -> i16 {
        match self {
            Self::Portrait => 1,
            Self::Landscape => 2,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }
}

impl FromStr for Orientation {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[Self::Portrait, Self::Landscape],
            Self::keyword,
            "orientation",
        )
    }
}

/// Output quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrintQuality {
    Draft,
    Normal,
    High,
    Photo,
}

impl PrintQuality {
    /// DEVMODE `dmPrintQuality`: negative values are the symbolic
    /// draft/medium/high levels, positive values are DPI.
    pub fn host_code(&self) -> i16 {
        match self {
            Self::Draft => -4,
            Self::Normal => -3,
            Self::High => -2,
            Self::Photo => 600,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Photo => "photo",
        }
    }
}

impl FromStr for PrintQuality {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[Self::Draft, Self::Normal, Self::High, Self::Photo],
            Self::keyword,
            "quality",
        )
    }
}

/// Duplex printing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplexMode {
    None,
    /// Flip on the short edge.
    Horizontal,
    /// Flip on the long edge.
    Vertical,
}

impl DuplexMode {
    /// DEVMODE `dmDuplex` value.
    pub fn host_code(&self) -> i16 {
        match self {
            Self::None => 1,
            Self::Horizontal => 2,
            Self::Vertical => 3,
        }
    }

    /// CUPS `sides` keyword.
    pub fn sides_keyword(&self) -> &'static str {
        match self {
            Self::None => "one-sided",
            Self::Horizontal => "two-sided-short-edge",
            Self::Vertical => "two-sided-long-edge",
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }
}

impl FromStr for DuplexMode {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[Self::None, Self::Horizontal, Self::Vertical],
            Self::keyword,
            "duplex mode",
        )
    }
}

/// How a rendered page is placed on the paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FitToPage {
    None,
    FitToPage,
    FitToPaper,
    ShrinkToFit,
    ActualSize,
}

impl FitToPage {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FitToPage => "fitToPage",
            Self::FitToPaper => "fitToPaper",
            Self::ShrinkToFit => "shrinkToFit",
            Self::ActualSize => "actualSize",
        }
    }
}

impl FromStr for FitToPage {
    type Err = SpoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_keyword(
            s,
            &[
                Self::None,
                Self::FitToPage,
                Self::FitToPaper,
                Self::ShrinkToFit,
                Self::ActualSize,
            ],
            Self::keyword,
            "fit mode",
        )
    }
}

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 0.0,
            bottom: 0.0,
            left: 0.0,
            right: 0.0,
        }
    }
}

/// A page selection such as `"1-5,8,11-13"` (1-based, inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange(String);

impl PageRange {
    /// Check the expression's syntax. Out-of-range page numbers are not an
    /// error here; they are clamped once the page count is known.
    pub fn parse(expr: &str) -> crate::error::Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(SpoolError::InvalidSettings("empty page range".into()));
        }
        for part in trimmed.split(',') {
            let part = part.trim();
            let bounds: Vec<&str> = part.splitn(2, '-').collect();
            for bound in &bounds {
                bound.trim().parse::<u32>().map_err(|_| {
                    SpoolError::InvalidSettings(format!("page range {expr:?}: bad part {part:?}"))
                })?;
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Zero-based page indices selected from a document of `total_pages`
    /// pages: every bound clamped to `1..=total_pages`, deduplicated and
    /// sorted. Reversed ranges select nothing.
    pub fn indices(&self, total_pages: usize) -> Vec<usize> {
        if total_pages == 0 {
            return Vec::new();
        }
        let clamp = |n: u32| (n as usize).clamp(1, total_pages);
        let mut pages = Vec::new();
        for part in self.0.split(',') {
            let mut bounds = part.splitn(2, '-').map(|b| b.trim().parse::<u32>());
            let start = match bounds.next() {
                Some(Ok(n)) => clamp(n),
                _ => continue,
            };
            let end = match bounds.next() {
                Some(Ok(n)) => clamp(n),
                Some(Err(_)) => continue,
                None => start,
            };
            pages.extend((start..=end).map(|p| p - 1));
        }
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive bounds for `PrintSettings::copies`.
pub const COPIES_RANGE: std::ops::RangeInclusive<u32> = 1..=999;
/// Inclusive bounds for `PrintSettings::scale` (percent).
pub const SCALE_RANGE: std::ops::RangeInclusive<u32> = 25..=400;

/// Print settings for a job. Immutable once the job is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintSettings {
    pub color_mode: ColorMode,
    pub copies: u32,
    pub paper_size: PaperSize,
    pub orientation: Orientation,
    pub quality: PrintQuality,
    pub duplex: DuplexMode,
    /// Percent, 100 = unscaled.
    pub scale: u32,
    pub margins: Margins,
    pub page_range: Option<PageRange>,
    pub fit_to_page: FitToPage,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            color_mode: ColorMode::Color,
            copies: 1,
            paper_size: PaperSize::A4,
            orientation: Orientation::Portrait,
            quality: PrintQuality::Normal,
            duplex: DuplexMode::None,
            scale: 100,
            margins: Margins::default(),
            page_range: None,
            fit_to_page: FitToPage::FitToPage,
        }
    }
}

impl PrintSettings {
    /// Reject values outside the accepted ranges.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !COPIES_RANGE.contains(&self.copies) {
            return Err(SpoolError::InvalidSettings(format!(
                "copies must be within {}..={}, got {}",
                COPIES_RANGE.start(),
                COPIES_RANGE.end(),
                self.copies
            )));
        }
        if !SCALE_RANGE.contains(&self.scale) {
            return Err(SpoolError::InvalidSettings(format!(
                "scale must be within {}..={}%, got {}",
                SCALE_RANGE.start(),
                SCALE_RANGE.end(),
                self.scale
            )));
        }
        let m = &self.margins;
        if [m.top, m.bottom, m.left, m.right]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(SpoolError::InvalidSettings(
                "margins must be non-negative millimetre values".into(),
            ));
        }
        let (w, h) = self.paper_size.dimensions_mm();
        if w == 0 || h == 0 {
            return Err(SpoolError::InvalidSettings("paper dimensions must be non-zero".into()));
        }
        if m.left + m.right >= w as f32 || m.top + m.bottom >= h as f32 {
            return Err(SpoolError::InvalidSettings(
                "margins leave no printable area".into(),
            ));
        }
        // Deserialised ranges skip `PageRange::parse`.
        if let Some(range) = &self.page_range {
            PageRange::parse(range.as_str())?;
        }
        Ok(())
    }
}

/// Operational status of a device, derived from a live poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Busy,
    Paused,
    Error,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
            Self::Paused => "paused",
            Self::Error => "error",
        })
    }
}

/// What a device can do. Empty `paper_sizes` means unknown, treated as
/// "anything goes".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub color: bool,
    pub duplex: bool,
    pub paper_sizes: Vec<PaperSize>,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            color: true,
            duplex: false,
            paper_sizes: Vec::new(),
        }
    }
}

/// A device visible to the host spooler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Normalised, stable identifier derived from `name`.
    pub id: String,
    /// Display name as the host reports it.
    pub name: String,
    pub is_default: bool,
    pub capabilities: DeviceCapabilities,
}

/// Ways of delivering a job to a device, ordered from most controlled to
/// most primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    /// Rasterise each page and draw it through the host's page primitive.
    Raster,
    /// Hand the file to a silent single-purpose rendering helper.
    Renderer,
    /// Ask the OS to run the file type's associated "print" verb.
    ShellVerb,
    /// Write control codes and bitmap rows straight to the raw job channel.
    RawStream,
    /// Run an operator-supplied automation script.
    Script,
}

impl StrategyKind {
    /// All strategies in delivery-preferred order.
    pub fn chain() -> &'static [StrategyKind] {
        &[
            StrategyKind::Raster,
            StrategyKind::Renderer,
            StrategyKind::ShellVerb,
            StrategyKind::RawStream,
            StrategyKind::Script,
        ]
    }

    /// Human-readable name for logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Raster => "Direct raster",
            Self::Renderer => "External renderer",
            Self::ShellVerb => "Shell print verb",
            Self::RawStream => "Raw command stream",
            Self::Script => "Automation script",
        }
    }

    /// Whether the strategy's job lands in the host queue where it can be
    /// counted. The others can only be verified heuristically.
    pub fn queue_visible(&self) -> bool {
        matches!(self, Self::Raster | Self::Renderer | Self::RawStream)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Pages delivered so far.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub pages_done: u32,
    pub total_pages: u32,
    pub percent: f32,
}

impl Progress {
    /// Record delivered pages. Never moves backwards.
    pub fn advance(&mut self, pages_done: u32, total_pages: u32) {
        if total_pages > 0 {
            self.total_pages = total_pages;
        }
        let capped = if self.total_pages > 0 {
            pages_done.min(self.total_pages)
        } else {
            pages_done
        };
        self.pages_done = self.pages_done.max(capped);
        self.percent = if self.total_pages == 0 {
            0.0
        } else {
            (self.pages_done as f32 / self.total_pages as f32 * 100.0).min(100.0)
        };
    }
}

/// Failure taxonomy surfaced on a job's `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DeviceNotFound,
    DeviceUnavailable,
    SourceNotFound,
    StrategyFailed,
    AllStrategiesFailed,
    Timeout,
    Cancelled,
    InvalidSettings,
    Internal,
}

/// Structured error carried by a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Default retry budget for operator-triggered retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A complete print job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Target device id. Rewritten once if a fallback device is substituted.
    pub device_id: String,
    /// Caller-owned source artifact.
    pub source: PathBuf,
    pub title: String,
    pub user: String,
    /// Source size in bytes at submission.
    pub file_size: u64,
    /// Lowercase source extension, if any.
    pub file_type: Option<String>,
    pub settings: PrintSettings,
    pub status: JobStatus,
    pub progress: Progress,
    pub error: Option<JobError>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PrintJob {
    pub fn new(device_id: String, source: PathBuf, settings: PrintSettings, user: String) -> Self {
        let title = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let file_type = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let user = if user.trim().is_empty() {
            "anonymous".to_string()
        } else {
            user
        };
        Self {
            id: JobId::new(),
            device_id,
            source,
            title,
            user,
            file_size: 0,
            file_type,
            settings,
            status: JobStatus::Pending,
            progress: Progress::default(),
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time from start to completion, or to now while still running.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started)
    }

    // -- Transitions ---------------------------------------------------------

    /// `Pending → Processing`.
    pub fn begin_processing(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// `Processing → Printing`, recording the resolved device.
    pub fn begin_printing(&mut self, device_id: &str) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.device_id = device_id.to_string();
        self.status = JobStatus::Printing;
        true
    }

    /// Progress updates only apply while printing.
    pub fn record_progress(&mut self, pages_done: u32, total_pages: u32) -> bool {
        if self.status != JobStatus::Printing {
            return false;
        }
        self.progress.advance(pages_done, total_pages);
        true
    }

    /// `Printing → Completed`.
    pub fn complete(&mut self) -> bool {
        if self.status != JobStatus::Printing {
            return false;
        }
        self.status = JobStatus::Completed;
        if self.progress.total_pages > 0 {
            self.progress.advance(self.progress.total_pages, self.progress.total_pages);
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// `Processing | Printing → Failed`. Submission-time failures fail a
    /// job that is still `Pending`.
    pub fn fail(&mut self, error: JobError) -> bool {
        if !matches!(
            self.status,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Printing
        ) {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Any non-terminal state `→ Cancelled`.
    pub fn cancel(&mut self) -> bool {
        if !self.status.can_cancel() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    /// `Pending | Processing | Printing → Paused`.
    pub fn pause(&mut self) -> bool {
        if !self.status.can_pause() {
            return false;
        }
        self.status = JobStatus::Paused;
        true
    }

    /// `Paused → Pending`. The caller re-enqueues the job.
    pub fn resume(&mut self) -> bool {
        if !self.status.can_resume() {
            return false;
        }
        self.status = JobStatus::Pending;
        self.progress = Progress::default();
        true
    }

    /// `Failed → Pending` while the retry budget lasts.
    pub fn retry(&mut self) -> bool {
        if self.status != JobStatus::Failed || self.retry_count >= self.max_retries {
            return false;
        }
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.error = None;
        self.progress = Progress::default();
        self.started_at = None;
        self.completed_at = None;
        true
    }
}

fn parse_keyword<T: Copy>(
    s: &str,
    all: &[T],
    keyword: fn(&T) -> &'static str,
    what: &str,
) -> Result<T, SpoolError> {
    let wanted = s.trim();
    all.iter()
        .find(|v| keyword(v).eq_ignore_ascii_case(wanted))
        .copied()
        .ok_or_else(|| SpoolError::InvalidSettings(format!("unknown {what} {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> PrintJob {
        PrintJob::new(
            "printer_a".into(),
            PathBuf::from("/tmp/report.pdf"),
            PrintSettings::default(),
            String::new(),
        )
    }

    #[test]
    fn new_job_defaults() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.user, "anonymous");
        assert_eq!(job.title, "report.pdf");
        assert_eq!(job.file_type.as_deref(), Some("pdf"));
        assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = job();
        assert!(job.begin_processing());
        assert!(job.started_at.is_some());
        assert!(job.begin_printing("printer_b"));
        assert_eq!(job.device_id, "printer_b");
        assert!(job.record_progress(1, 4));
        assert!(job.complete());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.pages_done, 4);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_jobs_do_not_move() {
        let mut job = job();
        assert!(job.cancel());
        assert!(!job.cancel());
        assert!(!job.pause());
        assert!(!job.resume());
        assert!(!job.begin_processing());
        assert!(!job.retry());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn cancelled_job_never_reaches_printing() {
        let mut job = job();
        assert!(job.begin_processing());
        assert!(job.cancel());
        assert!(!job.begin_printing("printer_a"));
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn pause_resume_goes_back_to_pending() {
        let mut job = job();
        assert!(job.begin_processing());
        assert!(job.begin_printing("printer_a"));
        assert!(job.pause());
        assert!(!job.complete());
        assert!(job.resume());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.resume());
    }

    #[test]
    fn retry_is_bounded() {
        let mut job = job();
        job.max_retries = 1;
        assert!(job.begin_processing());
        assert!(job.fail(JobError {
            kind: ErrorKind::AllStrategiesFailed,
            message: "nothing verified".into(),
        }));
        assert!(job.retry());
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());

        assert!(job.begin_processing());
        assert!(job.fail(JobError {
            kind: ErrorKind::AllStrategiesFailed,
            message: "nothing verified".into(),
        }));
        assert!(!job.retry());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn retry_resets_progress() {
        let mut job = job();
        job.begin_processing();
        job.begin_printing("printer_a");
        job.record_progress(3, 5);
        job.fail(JobError {
            kind: ErrorKind::Timeout,
            message: "device wait".into(),
        });
        assert!(job.retry());
        assert_eq!(job.progress.pages_done, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn progress_is_monotonic() {
        let mut p = Progress::default();
        p.advance(3, 10);
        p.advance(2, 10);
        assert_eq!(p.pages_done, 3);
        assert!((p.percent - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn page_range_indices() {
        let range = PageRange::parse("1-5, 8,11-13,3").expect("valid range");
        assert_eq!(range.indices(20), vec![0, 1, 2, 3, 4, 7, 10, 11, 12]);
        // Clamped to the document.
        assert_eq!(range.indices(4), vec![0, 1, 2, 3]);
        assert!(range.indices(0).is_empty());
    }

    #[test]
    fn page_range_rejects_garbage() {
        assert!(PageRange::parse("").is_err());
        assert!(PageRange::parse("1-x").is_err());
        assert!(PageRange::parse("one").is_err());
    }

    #[test]
    fn settings_bounds() {
        let mut settings = PrintSettings::default();
        assert!(settings.validate().is_ok());
        settings.copies = 0;
        assert!(settings.validate().is_err());
        settings.copies = 999;
        settings.scale = 401;
        assert!(settings.validate().is_err());
        settings.scale = 25;
        settings.margins.left = 200.0;
        settings.margins.right = 20.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn keywords_parse_case_insensitively() {
        assert_eq!("blackwhite".parse::<ColorMode>().ok(), Some(ColorMode::BlackWhite));
        assert_eq!("shrinkToFit".parse::<FitToPage>().ok(), Some(FitToPage::ShrinkToFit));
        assert_eq!("LETTER".parse::<PaperSize>().ok(), Some(PaperSize::Letter));
        assert_eq!(
            "custom:100x150".parse::<PaperSize>().ok(),
            Some(PaperSize::Custom {
                width_mm: 100,
                height_mm: 150
            })
        );
        assert!("sideways".parse::<Orientation>().is_err());
    }
}
