// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw command stream delivery.
//
// Bypasses the driver entirely: pages become 1-bit bitmap rows wrapped in ESC
// control codes and written to the device's raw job channel, one job per
// copy. Plain-text sources are sent page by page, each page between a reset
// and a form feed.

use std::sync::Arc;

use async_trait::async_trait;
use image::GrayImage;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{Device, StrategyKind};
use spoolwerk_document::layout::fit_to_feed;
use spoolwerk_document::text_pages;

use super::{JobContext, Strategy, StrategyResult};
use crate::verify::Verifier;

const ESC: u8 = 0x1B;
const FF: u8 = 0x0C;
const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// Reset, zero line spacing, default code table, left alignment.
const PREAMBLE: [u8; 11] = [ESC, b'@', ESC, b'3', 0, ESC, b't', 0, ESC, b'a', 0];
const PAGE_TRAILER: [u8; 3] = [FF, ESC, b'@'];

/// Luma below this prints as a black dot.
const INK_THRESHOLD: u8 = 128;

/// Encode one page: preamble, one `ESC * 0 <len> <bits> CR LF` per row,
/// trailer. Bytes-per-row is little-endian; bits are MSB first, black = 1.
pub fn encode_bitmap(page: &GrayImage) -> Vec<u8> {
    let bytes_per_row = page.width().div_ceil(8) as usize;
    let mut out = Vec::with_capacity(
        PREAMBLE.len() + page.height() as usize * (bytes_per_row + 7) + PAGE_TRAILER.len(),
    );
    out.extend_from_slice(&PREAMBLE);
    let len = (bytes_per_row as u16).to_le_bytes();
    for row in page.rows() {
        out.extend_from_slice(&[ESC, b'*', 0, len[0], len[1]]);
        let mut packed = vec![0u8; bytes_per_row];
        for (x, pixel) in row.enumerate() {
            if pixel.0[0] < INK_THRESHOLD {
                packed[x / 8] |= 0x80 >> (x % 8);
            }
        }
        out.extend_from_slice(&packed);
        out.extend_from_slice(&[CR, LF]);
    }
    out.extend_from_slice(&PAGE_TRAILER);
    out
}

/// Plain text between a reset and a form feed.
pub fn encode_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    out.extend_from_slice(&[ESC, b'@']);
    out.extend_from_slice(text.as_bytes());
    out.push(FF);
    out
}

pub struct RawStreamStrategy {
    verifier: Arc<Verifier>,
    dpi: u32,
    max_width_dots: u32,
}

impl RawStreamStrategy {
    pub fn new(verifier: Arc<Verifier>, dpi: u32, max_width_dots: u32) -> Self {
        Self {
            verifier,
            dpi,
            max_width_dots,
        }
    }

    fn encode_pages(&self, ctx: &JobContext, pages: &[usize]) -> Result<Vec<u8>> {
        let mut stream = Vec::new();
        for (n, &index) in pages.iter().enumerate() {
            if ctx.is_halted() {
                return Err(SpoolError::Cancelled);
            }
            let page = ctx.document.render_page(index, self.dpi)?;
            let feed = fit_to_feed(&page, ctx.settings.orientation, self.max_width_dots);
            debug!(page = index + 1, width = feed.width(), height = feed.height(), "page encoded");
            stream.extend(encode_bitmap(&feed));
            ctx.report_progress(n + 1, pages.len());
        }
        Ok(stream)
    }

    fn encode_text_pages(&self, ctx: &JobContext, text: &str, pages: &[usize]) -> Result<Vec<u8>> {
        let chunks = text_pages(text);
        let mut stream = Vec::new();
        for (n, &index) in pages.iter().enumerate() {
            if ctx.is_halted() {
                return Err(SpoolError::Cancelled);
            }
            let Some(chunk) = chunks.get(index) else {
                continue;
            };
            stream.extend(encode_text(chunk));
            ctx.report_progress(n + 1, pages.len());
        }
        Ok(stream)
    }
}

#[async_trait]
impl Strategy for RawStreamStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RawStream
    }

    #[instrument(skip_all, fields(job = %ctx.job_id(), device = %device.id))]
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult> {
        let text = ctx.document.text();
        if text.is_none() && !ctx.document.is_rasterizable() {
            return Ok(StrategyResult::skipped(format!(
                "{:?} source cannot be encoded as a raw stream",
                ctx.document.kind()
            )));
        }
        let pages = ctx.selected_pages();
        if pages.is_empty() {
            return Ok(StrategyResult::failed("page range selects no pages"));
        }
        let stream = match text {
            Some(text) => self.encode_text_pages(ctx, text, &pages)?,
            None => self.encode_pages(ctx, &pages)?,
        };

        // The raw channel ignores driver copy counts.
        let copies = ctx.settings.copies.max(1);
        let spooler = self.verifier.registry().spooler();
        let baseline = self.verifier.baseline(device).await;
        for copy in 1..=copies {
            if copy > 1 && ctx.is_halted() {
                return Err(SpoolError::Cancelled);
            }
            spooler
                .write_raw(&device.name, &ctx.job.title, &stream)
                .await?;
            debug!(copy, copies, bytes = stream.len(), "raw copy written");
        }
        Ok(StrategyResult::delivered(
            self.verifier.confirm_queued(device, baseline).await,
        ))
    }
}
