// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OS print verb delivery. The associated application prints on its own
// schedule and often outside the host queue, so only a blind check follows.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{Device, StrategyKind};

use super::{JobContext, Strategy, StrategyResult, expand_args, run_helper};
use crate::verify::Verifier;

pub struct ShellVerbStrategy {
    verifier: Arc<Verifier>,
    program: PathBuf,
    args: Vec<String>,
}

impl ShellVerbStrategy {
    pub fn new(verifier: Arc<Verifier>, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            verifier,
            program,
            args,
        }
    }
}

#[async_trait]
impl Strategy for ShellVerbStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ShellVerb
    }

    #[instrument(skip_all, fields(job = %ctx.job_id(), device = %device.id))]
    async fn attempt(&self, ctx: &JobContext, device: &Device) -> Result<StrategyResult> {
        let args = expand_args(&self.args, &device.name, &ctx.job.source);
        run_helper(self.kind(), &self.program, &args).await?;
        Ok(StrategyResult::delivered(
            self.verifier.confirm_blind(device).await,
        ))
    }
}
