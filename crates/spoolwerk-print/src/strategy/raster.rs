// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Direct raster delivery: render every selected page, place it on the sheet
// and draw it through the host's page primitive.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{Device, StrategyKind};
use spoolwerk_document::PageGeometry;
use spoolwerk_document::layout::{apply_color_mode, place};

use super::{JobContext, Strategy, StrategyResult};
use crate::spooler::{DocHandle, Spooler};
use crate::verify::Verifier;

pub struct RasterStrategy {
    verifier: Arc<Verifier>,
    dpi: u32,
}

impl RasterStrategy {
    pub fn new(verifier: Arc<Verifier>, dpi: u32) -> Self {
        Self { verifier, dpi }
    }

    async fn draw_pages(
        &self,
        spooler: &dyn Spooler,
        doc: &DocHandle,
        ctx: &JobContext,
        pages: &[usize],
    ) -> Result<()> {
        let geometry = PageGeometry::for_settings(&ctx.settings, self.dpi);
        for (n, &index) in pages.iter().enumerate() {
            if ctx.is_halted() {
                return Err(SpoolError::Cancelled);
            }
            let page = ctx.document.render_page(index, self.dpi)?;
            let page = apply_color_mode(page, ctx.settings.color_mode);
            let placement = place(page.width(), page.height(), &geometry, &ctx.settings);
            spooler.draw_page(doc, &page, &geometry, &placement).await?;
            debug!(page = index + 1, ?placement, "page drawn");
            ctx.report_progress(n + 1, pages.len());
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for RasterStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Raster
    }

    #[instrument(skip_all, fields(job = %ctx.job_id(), device = %device.id))]
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult> {
        if !ctx.document.is_rasterizable() {
            return Ok(StrategyResult::skipped(format!(
                "{:?} source has no raster form",
                ctx.document.kind()
            )));
        }
        let pages = ctx.selected_pages();
        if pages.is_empty() {
            return Ok(StrategyResult::failed("page range selects no pages"));
        }

        let spooler = self.verifier.registry().spooler().clone();
        let baseline = self.verifier.baseline(device).await;
        let doc = spooler.start_document(&device.name, &ctx.job.title).await?;

        // Nothing reaches the queue unless the document is ended, so any
        // failure part-way aborts it.
        if let Err(err) = self.draw_pages(spooler.as_ref(), &doc, ctx, &pages).await {
            spooler.abort_document(doc).await;
            return Err(err);
        }
        spooler.end_document(doc).await?;

        Ok(StrategyResult::delivered(
            self.verifier.confirm_queued(device, baseline).await,
        ))
    }
}
