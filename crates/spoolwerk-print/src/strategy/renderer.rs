// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Headless renderer delivery: hand the source file to a silent helper that
// prints straight to the named device.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{Device, StrategyKind};

use super::{JobContext, Strategy, StrategyResult, expand_args, run_helper};
use crate::verify::Verifier;

pub struct RendererStrategy {
    verifier: Arc<Verifier>,
    program: PathBuf,
    args: Vec<String>,
}

impl RendererStrategy {
    pub fn new(verifier: Arc<Verifier>, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            verifier,
            program,
            args,
        }
    }
}

#[async_trait]
impl Strategy for RendererStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Renderer
    }

    #[instrument(skip_all, fields(job = %ctx.job_id(), device = %device.id))]
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult> {
        let args = expand_args(&self.args, &device.name, &ctx.job.source);
        let baseline = self.verifier.baseline(device).await;
        run_helper(self.kind(), &self.program, &args).await?;
        Ok(StrategyResult::delivered(
            self.verifier.confirm_queued(device, baseline).await,
        ))
    }
}
